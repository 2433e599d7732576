//! Client-side form checks
//!
//! Everything here runs before a request is built, so a rejected form never
//! reaches the network.

use crate::error::ValidationError;
use crate::models::{LoginRequest, RegisterRequest};
use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;

/// Shortest password the registration form accepts
pub const MIN_PASSWORD_LEN: usize = 6;

/// Spreadsheet extensions accepted by the import endpoint
pub const IMPORT_EXTENSIONS: [&str; 2] = ["xlsx", "xls"];

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[\w\.-]+@[\w\.-]+\.[a-zA-Z]{2,}$").unwrap();
}

/// Check a login form
///
/// # Errors
/// * `MissingCredentials` if the login id or the password is empty
pub fn validate_login(request: &LoginRequest) -> Result<(), ValidationError> {
    if request.login.trim().is_empty() || request.password.is_empty() {
        return Err(ValidationError::MissingCredentials);
    }
    Ok(())
}

/// Check a registration form
///
/// Username, email and password are required; full name is optional.
///
/// # Errors
/// * `MissingRegistrationFields` if a required field is empty
/// * `PasswordTooShort` if the password has fewer than six characters
/// * `InvalidEmail` if the email address is malformed
pub fn validate_registration(request: &RegisterRequest) -> Result<(), ValidationError> {
    if request.username.trim().is_empty()
        || request.email.trim().is_empty()
        || request.password.is_empty()
    {
        return Err(ValidationError::MissingRegistrationFields);
    }
    if request.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::PasswordTooShort);
    }
    if !EMAIL_RE.is_match(request.email.trim()) {
        return Err(ValidationError::InvalidEmail);
    }
    Ok(())
}

/// Trim a comment and reject it when nothing is left.
pub fn normalize_comment(text: &str) -> Result<&str, ValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyComment);
    }
    Ok(trimmed)
}

/// Check the name of a file picked for import
///
/// # Errors
/// * `NoFile` if the name is empty
/// * `UnsupportedFileType` unless the name ends in `.xlsx` or `.xls`
pub fn validate_import_name(file_name: &str) -> Result<(), ValidationError> {
    if file_name.trim().is_empty() {
        return Err(ValidationError::NoFile);
    }
    let supported = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMPORT_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false);
    if !supported {
        return Err(ValidationError::UnsupportedFileType);
    }
    Ok(())
}

/// Check a file picked for import, name and contents
///
/// # Errors
/// Those of [`validate_import_name`], then `EmptyFile` if there are no
/// bytes to upload.
pub fn validate_import_file(file_name: &str, contents: &[u8]) -> Result<(), ValidationError> {
    validate_import_name(file_name)?;
    if contents.is_empty() {
        return Err(ValidationError::EmptyFile);
    }
    Ok(())
}
