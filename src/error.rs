//! Error types for the equipment client

use thiserror::Error;

/// Input rejected on the client before any request is sent.
///
/// The messages are the ones shown inline next to the offending form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please fill in all fields")]
    MissingCredentials,

    #[error("Username, Email and Password are required")]
    MissingRegistrationFields,

    #[error("Password must be at least 6 characters")]
    PasswordTooShort,

    #[error("Invalid email address")]
    InvalidEmail,

    #[error("Comment cannot be empty")]
    EmptyComment,

    #[error("Please select a file")]
    NoFile,

    #[error("Invalid file type. Upload .xlsx or .xls.")]
    UnsupportedFileType,

    #[error("Uploaded file is empty.")]
    EmptyFile,
}

/// Client error
#[derive(Debug, Error)]
pub enum ClientError {
    /// Rejected locally, never sent to the server
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Server answered with a non-success status
    #[error("{message}")]
    Request { status: u16, message: String },

    /// Network failure talking to the REST API
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Response body did not match the expected shape
    #[error("Invalid response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Session or export file could not be read or written
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Comment operation issued while no thread is open
    #[error("No comment thread is open")]
    ThreadNotOpen,
}

impl ClientError {
    pub fn is_validation(&self) -> bool {
        matches!(self, ClientError::Validation(_))
    }
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
