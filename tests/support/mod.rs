//! In-process stand-in for the inventory backend
//!
//! Serves the REST routes the client uses and a minimal Socket.IO endpoint on
//! a random local port. Every HTTP request is recorded with its bearer header
//! so tests can assert on what was, or was not, sent.

#![allow(dead_code)]

use axum::{
    Json, Router,
    extract::{
        Multipart, Path, Query, Request, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use equipment_desk::ClientConfig;
use futures_util::{SinkExt, StreamExt};
use rust_xlsxwriter::Workbook;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

pub const TOKEN: &str = "token-ana";
/// Token of `bob`, a non-admin account
pub const USER_TOKEN: &str = "token-bob";
pub const PASSWORD: &str = "secret123";

const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// One HTTP request as the server saw it
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    /// Path and query
    pub uri: String,
    pub authorization: Option<String>,
}

struct SocketClient {
    outbound: mpsc::UnboundedSender<String>,
    rooms: HashSet<i64>,
}

#[derive(Default)]
pub struct Backend {
    equipment: Mutex<Vec<Value>>,
    comments: Mutex<Vec<Value>>,
    next_comment_id: Mutex<i64>,
    requests: Mutex<Vec<Recorded>>,
    sockets: Mutex<HashMap<u64, SocketClient>>,
    next_socket: Mutex<u64>,
    /// `join_equipment` / `leave_equipment` events in arrival order
    room_log: Mutex<Vec<(String, i64)>>,
    /// `column_map` field of the last import
    last_column_map: Mutex<Option<String>>,
    /// Content type of the last uploaded file
    last_upload_mime: Mutex<Option<String>>,
    /// JSON body of the last equipment update
    last_update: Mutex<Option<Value>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap()
}

impl Backend {
    pub fn requests(&self) -> Vec<Recorded> {
        lock(&self.requests).clone()
    }

    pub fn requests_to(&self, prefix: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.uri.starts_with(prefix))
            .collect()
    }

    pub fn room_log(&self) -> Vec<(String, i64)> {
        lock(&self.room_log).clone()
    }

    /// Rooms joined by any connected socket
    pub fn joined_rooms(&self) -> HashSet<i64> {
        lock(&self.sockets)
            .values()
            .flat_map(|c| c.rooms.iter().copied())
            .collect()
    }

    pub fn socket_count(&self) -> usize {
        lock(&self.sockets).len()
    }

    pub fn last_column_map(&self) -> Option<String> {
        lock(&self.last_column_map).clone()
    }

    pub fn last_upload_mime(&self) -> Option<String> {
        lock(&self.last_upload_mime).clone()
    }

    pub fn last_update(&self) -> Option<Value> {
        lock(&self.last_update).clone()
    }

    pub fn equipment_row(&self, id: i64) -> Option<Value> {
        lock(&self.equipment).iter().find(|row| row["id"] == id).cloned()
    }

    pub fn add_equipment(&self, id: i64, name: &str, status: &str) {
        lock(&self.equipment).push(json!({
            "id": id,
            "equipment_name": name,
            "equipment_code": format!("EQ-{:03}", id),
            "category": "Pumps",
            "location": "Plant 1",
            "status": status,
            "description": null,
            "extra": {},
            "imported_at": "2024-01-01T08:00:00",
            "updated_at": null,
        }));
    }

    /// Store a comment without broadcasting it.
    pub fn seed_comment(&self, equipment_id: i64, text: &str) -> i64 {
        self.insert_comment(equipment_id, text)["id"].as_i64().unwrap()
    }

    fn insert_comment(&self, equipment_id: i64, text: &str) -> Value {
        let id = {
            let mut next = lock(&self.next_comment_id);
            *next += 1;
            *next
        };
        let comment = json!({
            "id": id,
            "equipment_id": equipment_id,
            "user_id": 1,
            "username": "ana",
            "comment_text": text,
            "created_at": format!("2024-05-01T10:{:02}:00", id % 60),
        });
        lock(&self.comments).push(comment.clone());
        comment
    }

    fn comment_count(&self, equipment_id: i64) -> usize {
        lock(&self.comments)
            .iter()
            .filter(|c| c["equipment_id"] == equipment_id)
            .count()
    }

    /// Push an event to one room, or to every socket when `room` is `None`.
    pub fn emit(&self, room: Option<i64>, name: &str, data: Value) {
        let frame = format!("42{}", json!([name, data]));
        for client in lock(&self.sockets).values() {
            if room.is_none_or(|id| client.rooms.contains(&id)) {
                let _ = client.outbound.send(frame.clone());
            }
        }
    }

    fn emit_count(&self, equipment_id: i64) {
        let count = self.comment_count(equipment_id);
        self.emit(
            None,
            "comment_count_updated",
            json!({"equipment_id": equipment_id, "count": count}),
        );
    }
}

pub struct MockServer {
    pub backend: Arc<Backend>,
    pub base_url: String,
}

impl MockServer {
    pub async fn start() -> Self {
        let backend = Arc::new(Backend::default());
        let app = router(Arc::clone(&backend));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            backend,
            base_url: format!("http://{}", addr),
        }
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(self.base_url.clone())
    }
}

/// Poll `check` until it holds, failing the test after five seconds.
pub async fn eventually<F>(what: &str, check: F)
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn router(backend: Arc<Backend>) -> Router {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/register", post(register))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
        .route("/api/equipment", get(list_equipment))
        .route("/api/equipment/import", post(import))
        .route("/api/equipment/export", get(export))
        .route("/api/equipment/template", get(template))
        .route(
            "/api/equipment/:id",
            get(get_equipment)
                .put(update_equipment)
                .delete(delete_equipment),
        )
        .route("/api/comments", post(add_comment))
        .route("/api/comments/equipment/:id", get(list_comments))
        .route("/api/comments/:id", delete(delete_comment))
        .route("/socket.io/", get(socket))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&backend),
            record,
        ))
        .with_state(backend)
}

async fn record(State(backend): State<Arc<Backend>>, request: Request, next: Next) -> Response {
    if !request.uri().path().starts_with("/socket.io") {
        let authorization = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let uri = request
            .uri()
            .path_and_query()
            .map(|pq| pq.to_string())
            .unwrap_or_default();
        lock(&backend.requests).push(Recorded {
            method: request.method().to_string(),
            uri,
            authorization,
        });
    }
    next.run(request).await
}

fn message(status: StatusCode, text: &str) -> Response {
    (status, Json(json!({ "message": text }))).into_response()
}

/// The profile behind the bearer token, if it is one the mock issued
fn caller(headers: &axum::http::HeaderMap) -> Option<Value> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())?
        .strip_prefix("Bearer ")?;
    match bearer {
        TOKEN => Some(ana()),
        USER_TOKEN => Some(bob()),
        _ => None,
    }
}

fn authorized(headers: &axum::http::HeaderMap) -> bool {
    caller(headers).is_some()
}

fn is_admin(headers: &axum::http::HeaderMap) -> bool {
    caller(headers).is_some_and(|user| user["role"] == "admin")
}

fn ana() -> Value {
    json!({
        "id": 1,
        "username": "ana",
        "email": "ana@example.com",
        "full_name": "Ana Admin",
        "role": "admin",
        "created_at": "2024-01-01T00:00:00",
    })
}

fn bob() -> Value {
    json!({
        "id": 2,
        "username": "bob",
        "email": "bob@example.com",
        "full_name": null,
        "role": "user",
        "created_at": "2024-01-02T00:00:00",
    })
}

async fn login(Json(body): Json<Value>) -> Response {
    let login = body["login"].as_str().unwrap_or_default();
    let password = body["password"].as_str().unwrap_or_default();
    if password != PASSWORD {
        return message(StatusCode::UNAUTHORIZED, "Invalid credentials.");
    }
    match login {
        "ana" | "ana@example.com" => {
            Json(json!({ "access_token": TOKEN, "user": ana() })).into_response()
        }
        "bob" | "bob@example.com" => {
            Json(json!({ "access_token": USER_TOKEN, "user": bob() })).into_response()
        }
        _ => message(StatusCode::UNAUTHORIZED, "Invalid credentials."),
    }
}

async fn register(Json(body): Json<Value>) -> Response {
    if body["username"] == "taken" {
        return message(StatusCode::CONFLICT, "Username already exists");
    }
    message(StatusCode::CREATED, "User registered successfully")
}

async fn logout() -> Response {
    message(StatusCode::OK, "Logged out")
}

async fn me(headers: axum::http::HeaderMap) -> Response {
    match caller(&headers) {
        Some(user) => Json(user).into_response(),
        None => message(StatusCode::UNAUTHORIZED, "Missing or invalid token"),
    }
}

async fn list_equipment(
    State(backend): State<Arc<Backend>>,
    headers: axum::http::HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if !authorized(&headers) {
        return message(StatusCode::UNAUTHORIZED, "Missing or invalid token");
    }
    let page: usize = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let per_page: usize = params
        .get("per_page")
        .and_then(|p| p.parse().ok())
        .unwrap_or(20);
    let query = params.get("q").map(|q| q.to_lowercase()).unwrap_or_default();
    let status = params.get("status").cloned().unwrap_or_default();

    let rows: Vec<Value> = lock(&backend.equipment)
        .iter()
        .filter(|row| {
            query.is_empty()
                || row["equipment_name"]
                    .as_str()
                    .unwrap_or_default()
                    .to_lowercase()
                    .contains(&query)
        })
        .filter(|row| status.is_empty() || row["status"] == status.as_str())
        .cloned()
        .collect();
    let total = rows.len();
    let total_pages = total.div_ceil(per_page).max(1);
    let items: Vec<Value> = rows
        .into_iter()
        .skip((page - 1) * per_page)
        .take(per_page)
        .map(|mut row| {
            let id = row["id"].as_i64().unwrap_or_default();
            row["comment_count"] = json!(backend.comment_count(id));
            row
        })
        .collect();

    Json(json!({
        "items": items,
        "page": page,
        "per_page": per_page,
        "total": total,
        "total_pages": total_pages,
        "filters": { "statuses": ["Active", "Broken", "Repair", "Retired"] },
        "dynamic_headers": [],
    }))
    .into_response()
}

/// Single row as the item endpoint returns it: no comment count, no extras
async fn get_equipment(
    State(backend): State<Arc<Backend>>,
    headers: axum::http::HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    if !authorized(&headers) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "msg": "Missing Authorization Header" })),
        )
            .into_response();
    }
    let Some(mut row) = backend.equipment_row(id) else {
        return message(StatusCode::NOT_FOUND, "Equipment not found");
    };
    if let Some(fields) = row.as_object_mut() {
        fields.remove("extra");
    }
    Json(row).into_response()
}

async fn update_equipment(
    State(backend): State<Arc<Backend>>,
    headers: axum::http::HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Response {
    if !is_admin(&headers) {
        return message(StatusCode::FORBIDDEN, "Only admins can update.");
    }
    *lock(&backend.last_update) = Some(body.clone());
    let mut equipment = lock(&backend.equipment);
    let Some(row) = equipment.iter_mut().find(|row| row["id"] == id) else {
        return message(StatusCode::NOT_FOUND, "Equipment not found");
    };
    if let Some(changes) = body.as_object() {
        for (field, value) in changes {
            row[field.as_str()] = value.clone();
        }
    }
    row["updated_at"] = json!("2024-06-01T12:00:00");
    message(StatusCode::OK, "Equipment updated")
}

async fn delete_equipment(
    State(backend): State<Arc<Backend>>,
    headers: axum::http::HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    if !is_admin(&headers) {
        return message(StatusCode::FORBIDDEN, "Only admins can delete.");
    }
    let mut equipment = lock(&backend.equipment);
    let before = equipment.len();
    equipment.retain(|row| row["id"] != id);
    if equipment.len() == before {
        return message(StatusCode::NOT_FOUND, "Equipment not found");
    }
    message(StatusCode::OK, "Equipment deleted")
}

async fn list_comments(State(backend): State<Arc<Backend>>, Path(id): Path<i64>) -> Response {
    let mut comments: Vec<Value> = lock(&backend.comments)
        .iter()
        .filter(|c| c["equipment_id"] == id)
        .cloned()
        .collect();
    comments.reverse();
    Json(comments).into_response()
}

async fn add_comment(
    State(backend): State<Arc<Backend>>,
    headers: axum::http::HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return message(StatusCode::UNAUTHORIZED, "Missing or invalid token");
    }
    let equipment_id = body["equipment_id"].as_i64().unwrap_or_default();
    let text = body["comment_text"].as_str().unwrap_or_default().trim();
    if text.is_empty() {
        return message(StatusCode::BAD_REQUEST, "Comment text is required");
    }
    let comment = backend.insert_comment(equipment_id, text);
    backend.emit(Some(equipment_id), "new_comment", comment.clone());
    backend.emit_count(equipment_id);
    (StatusCode::CREATED, Json(comment)).into_response()
}

async fn delete_comment(State(backend): State<Arc<Backend>>, Path(id): Path<i64>) -> Response {
    let removed = {
        let mut comments = lock(&backend.comments);
        let position = comments.iter().position(|c| c["id"] == id);
        position.map(|p| comments.remove(p))
    };
    let Some(comment) = removed else {
        return message(StatusCode::NOT_FOUND, "Comment not found");
    };
    let equipment_id = comment["equipment_id"].as_i64().unwrap_or_default();
    backend.emit(
        Some(equipment_id),
        "comment_deleted",
        json!({"id": id, "equipment_id": equipment_id}),
    );
    backend.emit_count(equipment_id);
    message(StatusCode::OK, "Comment deleted")
}

async fn import(State(backend): State<Arc<Backend>>, mut multipart: Multipart) -> Response {
    let mut file_name = String::new();
    let mut contents = Vec::new();
    while let Some(field) = multipart.next_field().await.unwrap_or(None) {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                file_name = field.file_name().unwrap_or_default().to_string();
                *lock(&backend.last_upload_mime) = field.content_type().map(str::to_string);
                contents = field.bytes().await.unwrap_or_default().to_vec();
            }
            "column_map" => {
                *lock(&backend.last_column_map) = field.text().await.ok();
            }
            _ => {}
        }
    }

    if contents.is_empty() {
        return message(StatusCode::BAD_REQUEST, "No file uploaded");
    }
    if file_name.contains("bad") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "errors": ["Row 2: invalid status 'Lost'", "Row 3: duplicate code EQ-001"]
            })),
        )
            .into_response();
    }
    message(StatusCode::OK, "Imported 2 rows")
}

fn workbook(headers: &[&str], rows: &[Vec<String>]) -> Vec<u8> {
    let mut workbook = Workbook::new();
    {
        let sheet = workbook.add_worksheet();
        for (col, title) in headers.iter().enumerate() {
            sheet.write_string(0, col as u16, *title).unwrap();
        }
        for (r, row) in rows.iter().enumerate() {
            for (col, value) in row.iter().enumerate() {
                sheet.write_string(r as u32 + 1, col as u16, value).unwrap();
            }
        }
    }
    workbook.save_to_buffer().unwrap()
}

fn xlsx(bytes: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, XLSX_MIME)], bytes).into_response()
}

async fn export(State(backend): State<Arc<Backend>>) -> Response {
    let rows: Vec<Vec<String>> = lock(&backend.equipment)
        .iter()
        .map(|row| {
            ["equipment_name", "equipment_code", "status"]
                .iter()
                .map(|key| row[*key].as_str().unwrap_or_default().to_string())
                .collect()
        })
        .collect();
    xlsx(workbook(&["Name", "Code", "Status"], &rows))
}

async fn template() -> Response {
    xlsx(workbook(&["Name", "Code", "Category", "Location", "Status"], &[]))
}

async fn socket(State(backend): State<Arc<Backend>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, backend))
}

async fn serve_socket(socket: WebSocket, backend: Arc<Backend>) {
    let (mut write, mut read) = socket.split();
    let id = {
        let mut next = lock(&backend.next_socket);
        *next += 1;
        *next
    };

    let open = format!(
        r#"0{{"sid":"mock-{}","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}}"#,
        id
    );
    if write.send(Message::Text(open)).await.is_err() {
        return;
    }

    // Namespace connect.
    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) if text.starts_with("40") => break,
            Some(Ok(_)) => continue,
            _ => return,
        }
    }
    let ack = format!(r#"40{{"sid":"ns-{}"}}"#, id);
    if write.send(Message::Text(ack)).await.is_err() {
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    lock(&backend.sockets).insert(
        id,
        SocketClient {
            outbound: tx,
            rooms: HashSet::new(),
        },
    );

    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if write.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => handle_client_frame(&backend, id, &text),
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
    lock(&backend.sockets).remove(&id);
}

fn handle_client_frame(backend: &Backend, socket: u64, text: &str) {
    let Some(payload) = text.strip_prefix("42") else {
        return;
    };
    let Ok(Value::Array(args)) = serde_json::from_str::<Value>(payload) else {
        return;
    };
    let name = args.first().and_then(Value::as_str).unwrap_or_default();
    let Some(equipment_id) = args.get(1).and_then(|d| d["equipment_id"].as_i64()) else {
        return;
    };

    let mut sockets = lock(&backend.sockets);
    let Some(client) = sockets.get_mut(&socket) else {
        return;
    };
    match name {
        "join_equipment" => {
            client.rooms.insert(equipment_id);
        }
        "leave_equipment" => {
            client.rooms.remove(&equipment_id);
        }
        _ => return,
    }
    lock(&backend.room_log).push((name.to_string(), equipment_id));
}
