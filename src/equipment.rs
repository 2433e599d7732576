//! Equipment list state: filters, pagination and live comment counts
//!
//! Every filter change starts a new fetch generation. A response is applied
//! only if its generation is still the latest, so a slow answer for an old
//! filter set never overwrites the rows of a newer one.

use crate::api::ApiClient;
use crate::error::Result;
use crate::models::{EquipmentId, EquipmentPage, EquipmentRecord};
use crate::realtime::{EventKind, RealtimeChannel, ServerEvent, Subscription, Topic};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

/// Comment count filter; the last bucket matches three or more
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommentCountBucket {
    Zero,
    One,
    Two,
    ThreeOrMore,
}

impl CommentCountBucket {
    pub const ALL: [CommentCountBucket; 4] = [
        CommentCountBucket::Zero,
        CommentCountBucket::One,
        CommentCountBucket::Two,
        CommentCountBucket::ThreeOrMore,
    ];

    /// Query value understood by the server
    pub fn as_param(self) -> &'static str {
        match self {
            CommentCountBucket::Zero => "0",
            CommentCountBucket::One => "1",
            CommentCountBucket::Two => "2",
            CommentCountBucket::ThreeOrMore => "3",
        }
    }
}

impl fmt::Display for CommentCountBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommentCountBucket::ThreeOrMore => write!(f, "3+"),
            other => write!(f, "{}", other.as_param()),
        }
    }
}

impl FromStr for CommentCountBucket {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "0" => Ok(CommentCountBucket::Zero),
            "1" => Ok(CommentCountBucket::One),
            "2" => Ok(CommentCountBucket::Two),
            "3" | "3+" => Ok(CommentCountBucket::ThreeOrMore),
            other => Err(format!("unknown comment count '{}', use 0, 1, 2 or 3+", other)),
        }
    }
}

/// Filters and page of the equipment listing
///
/// Empty strings mean "any". Every setter except [`FilterState::set_page`]
/// moves back to page 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterState {
    pub page: u32,
    pub query: String,
    pub status: String,
    pub category: String,
    pub comment_count: Option<CommentCountBucket>,
    /// Server default (20) when unset
    pub per_page: Option<u32>,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            page: 1,
            query: String::new(),
            status: String::new(),
            category: String::new(),
            comment_count: None,
            per_page: None,
        }
    }
}

impl FilterState {
    pub fn set_query(&mut self, query: &str) {
        self.query = query.to_string();
        self.page = 1;
    }

    pub fn set_status(&mut self, status: &str) {
        self.status = status.to_string();
        self.page = 1;
    }

    pub fn set_category(&mut self, category: &str) {
        self.category = category.to_string();
        self.page = 1;
    }

    pub fn set_comment_count(&mut self, bucket: Option<CommentCountBucket>) {
        self.comment_count = bucket;
        self.page = 1;
    }

    /// Rows per page; `None` or 0 leaves it to the server.
    pub fn set_per_page(&mut self, per_page: Option<u32>) {
        self.per_page = per_page.filter(|n| *n > 0);
        self.page = 1;
    }

    /// Pages are 1-based; 0 is read as 1.
    pub fn set_page(&mut self, page: u32) {
        self.page = page.max(1);
    }

    /// Query string for `GET /api/equipment`, without the leading `?`.
    pub fn to_query(&self) -> String {
        let mut params = vec![format!("page={}", self.page)];
        if let Some(per_page) = self.per_page {
            params.push(format!("per_page={}", per_page));
        }
        let text_filters = [
            ("q", self.query.trim()),
            ("status", self.status.trim()),
            ("category", self.category.trim()),
        ];
        for (key, value) in text_filters {
            if !value.is_empty() {
                params.push(format!("{}={}", key, urlencoding::encode(value)));
            }
        }
        if let Some(bucket) = self.comment_count {
            params.push(format!("comment_count={}", bucket.as_param()));
        }
        params.join("&")
    }
}

/// Where the listing is in its fetch cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListPhase {
    Idle,
    Loading,
    Loaded,
    Error,
}

/// Result of handing a response to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Applied,
    /// A newer request was issued; the response was discarded
    Superseded,
}

/// What the table renders
#[derive(Debug, Clone, PartialEq)]
pub struct ListSnapshot {
    pub phase: ListPhase,
    pub filters: FilterState,
    pub items: Vec<EquipmentRecord>,
    pub total_pages: u32,
    /// Status values offered by the server for the status filter
    pub statuses: Vec<String>,
    pub dynamic_headers: Vec<String>,
    pub error: Option<String>,
}

struct ListState {
    view: ListSnapshot,
    generation: u64,
    /// Counts pushed while a fetch is in flight
    pushed_counts: HashMap<EquipmentId, u32>,
}

impl ListState {
    fn new() -> Self {
        Self {
            view: ListSnapshot {
                phase: ListPhase::Idle,
                filters: FilterState::default(),
                items: Vec::new(),
                total_pages: 1,
                statuses: Vec::new(),
                dynamic_headers: Vec::new(),
                error: None,
            },
            generation: 0,
            pushed_counts: HashMap::new(),
        }
    }

    fn apply_count(&mut self, equipment_id: EquipmentId, count: u32) {
        if self.view.phase == ListPhase::Loading {
            self.pushed_counts.insert(equipment_id, count);
        }
        if let Some(row) = self.view.items.iter_mut().find(|r| r.id == equipment_id) {
            row.comment_count = count;
        }
    }
}

/// Request issued for one fetch generation
#[derive(Debug, Clone)]
pub(crate) struct FetchTicket {
    pub generation: u64,
    pub filters: FilterState,
}

fn lock(state: &Mutex<ListState>) -> MutexGuard<'_, ListState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Controller behind the equipment table
pub struct EquipmentListController {
    api: ApiClient,
    state: Arc<Mutex<ListState>>,
    _counts: Subscription,
}

impl EquipmentListController {
    /// Create the controller and start following comment counts.
    pub fn new(api: ApiClient, channel: &RealtimeChannel) -> Self {
        let state = Arc::new(Mutex::new(ListState::new()));
        let weak = Arc::downgrade(&state);
        let counts = channel.on(
            EventKind::CommentCountUpdated,
            Topic::Broadcast,
            move |event| {
                if let ServerEvent::CommentCountUpdated {
                    equipment_id,
                    count,
                } = event
                {
                    if let Some(state) = weak.upgrade() {
                        lock(&state).apply_count(*equipment_id, *count);
                    }
                }
            },
        );
        Self {
            api,
            state,
            _counts: counts,
        }
    }

    /// Start with a fixed page size instead of the server default.
    pub fn with_per_page(self, per_page: Option<u32>) -> Self {
        lock(&self.state).view.filters.set_per_page(per_page);
        self
    }

    pub fn snapshot(&self) -> ListSnapshot {
        lock(&self.state).view.clone()
    }

    pub fn filters(&self) -> FilterState {
        lock(&self.state).view.filters.clone()
    }

    /// Fetch the current filters again.
    pub async fn refresh(&self) -> Result<FetchOutcome> {
        self.update(|_| {}).await
    }

    pub async fn set_query(&self, query: &str) -> Result<FetchOutcome> {
        self.update(|f| f.set_query(query)).await
    }

    pub async fn set_status(&self, status: &str) -> Result<FetchOutcome> {
        self.update(|f| f.set_status(status)).await
    }

    pub async fn set_category(&self, category: &str) -> Result<FetchOutcome> {
        self.update(|f| f.set_category(category)).await
    }

    pub async fn set_comment_count(
        &self,
        bucket: Option<CommentCountBucket>,
    ) -> Result<FetchOutcome> {
        self.update(|f| f.set_comment_count(bucket)).await
    }

    pub async fn set_per_page(&self, per_page: Option<u32>) -> Result<FetchOutcome> {
        self.update(|f| f.set_per_page(per_page)).await
    }

    pub async fn set_page(&self, page: u32) -> Result<FetchOutcome> {
        self.update(|f| f.set_page(page)).await
    }

    async fn update<F>(&self, mutate: F) -> Result<FetchOutcome>
    where
        F: FnOnce(&mut FilterState),
    {
        let ticket = self.begin(mutate);
        let result = self.api.list_equipment(&ticket.filters).await;
        self.complete(ticket.generation, result)
    }

    /// Apply `mutate` to the filters and open a new fetch generation.
    pub(crate) fn begin<F>(&self, mutate: F) -> FetchTicket
    where
        F: FnOnce(&mut FilterState),
    {
        let mut state = lock(&self.state);
        mutate(&mut state.view.filters);
        state.generation += 1;
        state.view.phase = ListPhase::Loading;
        state.view.error = None;
        state.pushed_counts.clear();
        log::debug!(
            "Equipment fetch #{} ({})",
            state.generation,
            state.view.filters.to_query()
        );
        FetchTicket {
            generation: state.generation,
            filters: state.view.filters.clone(),
        }
    }

    /// Hand over the response of generation `generation`.
    ///
    /// A failure keeps the rows already on screen and records the message.
    pub(crate) fn complete(
        &self,
        generation: u64,
        result: Result<EquipmentPage>,
    ) -> Result<FetchOutcome> {
        let mut state = lock(&self.state);
        if generation != state.generation {
            log::debug!(
                "Discarding equipment fetch #{} (latest is #{})",
                generation,
                state.generation
            );
            return Ok(FetchOutcome::Superseded);
        }
        match result {
            Ok(page) => {
                let pushed = std::mem::take(&mut state.pushed_counts);
                let mut items = page.items;
                for row in items.iter_mut() {
                    if let Some(count) = pushed.get(&row.id) {
                        row.comment_count = *count;
                    }
                }
                let view = &mut state.view;
                view.items = items;
                view.total_pages = page.total_pages.max(1);
                view.statuses = page.filters.statuses;
                view.dynamic_headers = page.dynamic_headers;
                view.phase = ListPhase::Loaded;
                Ok(FetchOutcome::Applied)
            }
            Err(e) => {
                state.pushed_counts.clear();
                state.view.phase = ListPhase::Error;
                state.view.error = Some(e.to_string());
                Err(e)
            }
        }
    }
}
