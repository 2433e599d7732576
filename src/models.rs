//! Wire types of the equipment API
//!
//! Field names follow the server's JSON; the Rust names are renamed where the
//! server's are awkward (`equipment_name`, `comment_text`, `extra`).

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Identifier of an equipment row
pub type EquipmentId = i64;

/// Identifier of a comment
pub type CommentId = i64;

/// Role string the server uses for administrators
pub const ADMIN_ROLE: &str = "admin";

/// Authenticated user profile
///
/// Returned by `GET /api/auth/me` and embedded in the login response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,

    pub username: String,

    pub email: String,

    /// Display name, optional at registration
    #[serde(default)]
    pub full_name: Option<String>,

    /// Either "admin" or "user"
    pub role: String,

    #[serde(default)]
    pub created_at: Option<NaiveDateTime>,
}

impl User {
    /// Admins are the only users offered the Excel import.
    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }
}

/// Credential data for login
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    /// Username or email address
    pub login: String,

    pub password: String,
}

/// Successful login payload
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,

    #[serde(default)]
    pub user: Option<User>,
}

/// Registration form
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegisterRequest {
    pub username: String,

    pub email: String,

    /// May be left empty
    pub full_name: String,

    pub password: String,
}

/// Plain `{ "message": ... }` acknowledgement
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: String,
}

/// One row of the equipment table
///
/// The fixed columns come first; `extra` carries the columns found in the
/// imported spreadsheet, keyed by their header. Which of those are displayed
/// is decided by the `dynamic_headers` of the page the row came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentRecord {
    pub id: EquipmentId,

    #[serde(rename = "equipment_name")]
    pub name: String,

    #[serde(rename = "equipment_code")]
    pub code: String,

    #[serde(default)]
    pub category: Option<String>,

    #[serde(default)]
    pub location: Option<String>,

    pub status: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Absent on the single-item endpoint
    #[serde(default)]
    pub comment_count: u32,

    #[serde(rename = "extra", default)]
    pub extra_fields: BTreeMap<String, Value>,

    #[serde(default)]
    pub imported_at: Option<NaiveDateTime>,

    #[serde(default)]
    pub updated_at: Option<NaiveDateTime>,
}

impl EquipmentRecord {
    /// Text of a dynamic column, empty when the row has no such field.
    pub fn extra_text(&self, header: &str) -> String {
        match self.extra_fields.get(header) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}

/// Filter options offered by the server alongside a page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterOptions {
    #[serde(default)]
    pub statuses: Vec<String>,
}

/// Response of `GET /api/equipment`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EquipmentPage {
    pub items: Vec<EquipmentRecord>,

    #[serde(default = "first_page")]
    pub page: u32,

    #[serde(default)]
    pub per_page: Option<u32>,

    #[serde(default)]
    pub total: Option<u64>,

    #[serde(default = "first_page")]
    pub total_pages: u32,

    #[serde(default)]
    pub filters: FilterOptions,

    #[serde(default)]
    pub dynamic_headers: Vec<String>,
}

fn first_page() -> u32 {
    1
}

/// Admin edit of an equipment row; unset fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EquipmentUpdate {
    #[serde(rename = "equipment_name", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl EquipmentUpdate {
    /// Field names accepted by [`EquipmentUpdate::set`]
    pub const FIELDS: [&'static str; 5] = ["name", "category", "location", "status", "description"];

    /// Set one field by name. `equipment_name` is accepted for `name`.
    pub fn set(&mut self, field: &str, value: &str) -> std::result::Result<(), String> {
        let slot = match field.trim() {
            "name" | "equipment_name" => &mut self.name,
            "category" => &mut self.category,
            "location" => &mut self.location,
            "status" => &mut self.status,
            "description" => &mut self.description,
            other => {
                return Err(format!(
                    "unknown field '{}', use one of: {}",
                    other,
                    Self::FIELDS.join(", ")
                ));
            }
        };
        *slot = Some(value.trim().to_string());
        Ok(())
    }

    /// Read `field=value` assignments; a value runs until the next
    /// `field=`, so `status=Repair description=Seal replaced` sets two fields.
    pub fn parse(assignments: &str) -> std::result::Result<Self, String> {
        let mut update = Self::default();
        let mut pending: Option<(&str, Vec<&str>)> = None;
        for word in assignments.split_whitespace() {
            match word.split_once('=') {
                Some((field, value)) if Self::is_field(field) => {
                    if let Some((field, words)) = pending.take() {
                        update.set(field, &words.join(" "))?;
                    }
                    pending = Some((field, vec![value]));
                }
                _ => match pending.as_mut() {
                    Some((_, words)) => words.push(word),
                    None => return Err(format!("expected field=value, got '{}'", word)),
                },
            }
        }
        if let Some((field, words)) = pending {
            update.set(field, &words.join(" "))?;
        }
        Ok(update)
    }

    fn is_field(name: &str) -> bool {
        name == "equipment_name" || Self::FIELDS.contains(&name)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A comment on an equipment row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,

    pub equipment_id: EquipmentId,

    #[serde(default)]
    pub user_id: Option<i64>,

    #[serde(rename = "username", default)]
    pub author_name: String,

    #[serde(rename = "comment_text")]
    pub text: String,

    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct NewComment<'a> {
    pub equipment_id: EquipmentId,
    pub comment_text: &'a str,
}

/// Result of a successful spreadsheet import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOutcome {
    pub message: String,
}
