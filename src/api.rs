//! HTTP client for the equipment REST API

use crate::config::ClientConfig;
use crate::equipment::FilterState;
use crate::error::{ClientError, Result};
use crate::models::{
    Comment, CommentId, EquipmentId, EquipmentPage, EquipmentRecord, EquipmentUpdate,
    ImportOutcome, LoginRequest, LoginResponse, MessageResponse, NewComment, RegisterRequest,
    User,
};
use crate::session::SessionStore;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

/// MIME type of `.xlsx` workbooks
pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// MIME type of legacy `.xls` workbooks
pub const XLS_MIME: &str = "application/vnd.ms-excel";

fn spreadsheet_mime(file_name: &str) -> &'static str {
    if file_name.to_lowercase().ends_with(".xls") {
        XLS_MIME
    } else {
        XLSX_MIME
    }
}

/// Error payload of the API: `message` (`msg` from the JWT layer), or
/// `errors` for import validation
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default, alias = "msg")]
    message: Option<String>,
    #[serde(default)]
    errors: Vec<String>,
}

/// Pick the message to show for a failed call.
///
/// Import validation lists every offending row, one per line.
fn error_message(body: &str, fallback: &str) -> String {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    if !parsed.errors.is_empty() {
        return parsed.errors.join("\n");
    }
    match parsed.message {
        Some(message) if !message.trim().is_empty() => message,
        _ => fallback.to_string(),
    }
}

/// HTTP client for the equipment API
///
/// Every request carries `Authorization: Bearer <token>` when the session
/// holds a token. A missing token is not checked here; the server rejects
/// protected calls and the front-end keeps logged-out users on the login
/// surface.
///
/// # Example
///
/// ```rust,no_run
/// use equipment_desk::{ApiClient, ClientConfig, FilterState, SessionStore};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let api = ApiClient::new(&ClientConfig::default(), SessionStore::in_memory())?;
/// api.login("ana", "secret").await?;
/// let page = api.list_equipment(&FilterState::default()).await?;
/// println!("{} rows", page.items.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    http: Client,
    session: SessionStore,
}

impl ApiClient {
    pub fn new(config: &ClientConfig, session: SessionStore) -> Result<Self> {
        let http = Client::builder().build()?;
        Ok(Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            http,
            session,
        })
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ==================== Auth ====================

    /// Log in with a username or email and store the returned token.
    pub async fn login(&self, login: &str, password: &str) -> Result<LoginResponse> {
        let body = LoginRequest {
            login: login.to_string(),
            password: password.to_string(),
        };
        let response = self
            .request(Method::POST, "/api/auth/login")
            .json(&body)
            .send()
            .await?;
        let login: LoginResponse = self.handle_response(response, "Login failed").await?;
        self.session.set(&login.access_token)?;
        log::info!("Logged in as {}", body.login);
        Ok(login)
    }

    pub async fn register(&self, form: &RegisterRequest) -> Result<MessageResponse> {
        let response = self
            .request(Method::POST, "/api/auth/register")
            .json(form)
            .send()
            .await?;
        self.handle_response(response, "Registration failed").await
    }

    /// Tell the server the token is being discarded, then forget it.
    ///
    /// The session is cleared whatever the server answers; the returned
    /// error, if any, is the server call's.
    pub async fn logout(&self) -> Result<()> {
        let outcome = match self.request(Method::POST, "/api/auth/logout").send().await {
            Ok(response) => self
                .check_status(response, "Logout failed")
                .await
                .map(|_| ()),
            Err(e) => Err(e.into()),
        };
        self.session.clear()?;
        outcome
    }

    pub async fn current_user(&self) -> Result<User> {
        let response = self.request(Method::GET, "/api/auth/me").send().await?;
        self.handle_response(response, "Failed to load profile").await
    }

    // ==================== Equipment ====================

    /// Fetch one page of equipment matching `filters`.
    pub async fn list_equipment(&self, filters: &FilterState) -> Result<EquipmentPage> {
        let path = format!("/api/equipment?{}", filters.to_query());
        let response = self.request(Method::GET, &path).send().await?;
        self.handle_response(response, "Failed to load equipment").await
    }

    pub async fn get_equipment(&self, id: EquipmentId) -> Result<EquipmentRecord> {
        let path = format!("/api/equipment/{}", id);
        let response = self.request(Method::GET, &path).send().await?;
        self.handle_response(response, "Failed to load equipment").await
    }

    /// Admin only.
    pub async fn update_equipment(
        &self,
        id: EquipmentId,
        changes: &EquipmentUpdate,
    ) -> Result<MessageResponse> {
        let path = format!("/api/equipment/{}", id);
        let response = self
            .request(Method::PUT, &path)
            .json(changes)
            .send()
            .await?;
        self.handle_response(response, "Update failed").await
    }

    /// Admin only.
    pub async fn delete_equipment(&self, id: EquipmentId) -> Result<MessageResponse> {
        let path = format!("/api/equipment/{}", id);
        let response = self.request(Method::DELETE, &path).send().await?;
        self.handle_response(response, "Delete failed").await
    }

    // ==================== Comments ====================

    /// History of one equipment row, newest first.
    pub async fn list_comments(&self, equipment_id: EquipmentId) -> Result<Vec<Comment>> {
        let path = format!("/api/comments/equipment/{}", equipment_id);
        let response = self.request(Method::GET, &path).send().await?;
        self.handle_response(response, "Failed to load comments").await
    }

    pub async fn add_comment(&self, equipment_id: EquipmentId, text: &str) -> Result<Comment> {
        let body = NewComment {
            equipment_id,
            comment_text: text,
        };
        let response = self
            .request(Method::POST, "/api/comments")
            .json(&body)
            .send()
            .await?;
        self.handle_response(response, "Failed to add comment").await
    }

    pub async fn delete_comment(&self, id: CommentId) -> Result<MessageResponse> {
        let path = format!("/api/comments/{}", id);
        let response = self.request(Method::DELETE, &path).send().await?;
        self.handle_response(response, "Failed to delete comment").await
    }

    // ==================== Spreadsheets ====================

    /// Upload a workbook as the multipart field `file`.
    ///
    /// `column_map` maps equipment fields to spreadsheet headers when the
    /// server cannot guess them.
    pub async fn import_file(
        &self,
        file_name: &str,
        contents: Vec<u8>,
        column_map: Option<&BTreeMap<String, String>>,
    ) -> Result<ImportOutcome> {
        let part = Part::bytes(contents)
            .file_name(file_name.to_string())
            .mime_str(spreadsheet_mime(file_name))?;
        let mut form = Form::new().part("file", part);
        if let Some(map) = column_map.filter(|m| !m.is_empty()) {
            form = form.text("column_map", serde_json::to_string(map)?);
        }

        let response = self
            .request(Method::POST, "/api/equipment/import")
            .multipart(form)
            .send()
            .await?;
        let reply: MessageResponse = self.handle_response(response, "Import failed").await?;
        let message = if reply.message.is_empty() {
            "Import complete".to_string()
        } else {
            reply.message
        };
        Ok(ImportOutcome { message })
    }

    /// Current equipment table as `.xlsx` bytes.
    pub async fn export(&self) -> Result<Vec<u8>> {
        self.download("/api/equipment/export", "Failed to export Excel")
            .await
    }

    /// Empty import template as `.xlsx` bytes.
    pub async fn download_template(&self) -> Result<Vec<u8>> {
        self.download("/api/equipment/template", "Failed to download template")
            .await
    }

    // ==================== Plumbing ====================

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        log::debug!("{} {}", method, path);
        let builder = self.http.request(method, format!("{}{}", self.base_url, path));
        match self.session.get() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn download(&self, path: &str, fallback: &str) -> Result<Vec<u8>> {
        let response = self.request(Method::GET, path).send().await?;
        let response = self.check_status(response, fallback).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn check_status(&self, response: Response, fallback: &str) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = error_message(&body, fallback);
        log::warn!("Request failed with {}: {}", status, message);
        Err(ClientError::Request { status, message })
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: Response,
        fallback: &str,
    ) -> Result<T> {
        let response = self.check_status(response, fallback).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
