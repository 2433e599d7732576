//! Comment thread of one equipment row
//!
//! While a thread is open it holds the room membership and the two room
//! handlers for its equipment. Closing releases both and bumps the epoch, so
//! a history fetch or a handler call that belongs to an earlier opening
//! finds a different epoch and does nothing.
//!
//! Adding and deleting go through REST only. The visible list changes when
//! the matching `new_comment` / `comment_deleted` broadcast arrives.

use crate::api::ApiClient;
use crate::error::{ClientError, Result};
use crate::models::{Comment, CommentId, EquipmentId};
use crate::realtime::{
    EventKind, RealtimeChannel, RoomMembership, ServerEvent, Subscription, Topic,
};
use crate::validation;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadPhase {
    Closed,
    Loading,
    Open,
}

/// What the comment panel renders
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadSnapshot {
    pub phase: ThreadPhase,
    pub equipment_id: Option<EquipmentId>,
    /// Newest first
    pub comments: Vec<Comment>,
    pub error: Option<String>,
}

struct ThreadState {
    phase: ThreadPhase,
    equipment_id: Option<EquipmentId>,
    comments: Vec<Comment>,
    epoch: u64,
    /// Deletions seen before the history arrived
    deleted_while_loading: HashSet<CommentId>,
    error: Option<String>,
}

impl ThreadState {
    fn new() -> Self {
        Self {
            phase: ThreadPhase::Closed,
            equipment_id: None,
            comments: Vec::new(),
            epoch: 0,
            deleted_while_loading: HashSet::new(),
            error: None,
        }
    }

    fn reset(&mut self, phase: ThreadPhase, equipment_id: Option<EquipmentId>) -> u64 {
        self.epoch += 1;
        self.phase = phase;
        self.equipment_id = equipment_id;
        self.comments.clear();
        self.deleted_while_loading.clear();
        self.error = None;
        self.epoch
    }

    /// Prepend unless a comment with the same id is already listed.
    fn insert(&mut self, comment: Comment) {
        if self.comments.iter().any(|c| c.id == comment.id) {
            return;
        }
        self.comments.insert(0, comment);
    }

    fn remove(&mut self, id: CommentId) {
        if self.phase == ThreadPhase::Loading {
            self.deleted_while_loading.insert(id);
        }
        self.comments.retain(|c| c.id != id);
    }

    fn apply(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::NewComment(comment) => self.insert(comment.clone()),
            ServerEvent::CommentDeleted { id, .. } => self.remove(*id),
            ServerEvent::CommentCountUpdated { .. } => {}
        }
    }

    /// Append the fetched history behind anything pushed while loading.
    fn merge_history(&mut self, history: Vec<Comment>) {
        let deleted = std::mem::take(&mut self.deleted_while_loading);
        for comment in history {
            if deleted.contains(&comment.id) || self.comments.iter().any(|c| c.id == comment.id) {
                continue;
            }
            self.comments.push(comment);
        }
    }

    fn snapshot(&self) -> ThreadSnapshot {
        ThreadSnapshot {
            phase: self.phase,
            equipment_id: self.equipment_id,
            comments: self.comments.clone(),
            error: self.error.clone(),
        }
    }
}

fn lock(state: &Mutex<ThreadState>) -> MutexGuard<'_, ThreadState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Room membership and handlers owned by one opening
struct Attachment {
    room: RoomMembership,
    subscriptions: Vec<Subscription>,
}

impl Attachment {
    fn detach(self) {
        log::debug!("Leaving comment room {}", self.room.equipment_id());
        self.room.leave();
        for subscription in self.subscriptions {
            subscription.dispose();
        }
    }
}

/// Controller behind the comment panel
pub struct CommentThread {
    api: ApiClient,
    channel: RealtimeChannel,
    state: Arc<Mutex<ThreadState>>,
    attachment: Mutex<Option<Attachment>>,
    optimistic: bool,
}

impl CommentThread {
    pub fn new(api: ApiClient, channel: RealtimeChannel) -> Self {
        Self {
            api,
            channel,
            state: Arc::new(Mutex::new(ThreadState::new())),
            attachment: Mutex::new(None),
            optimistic: false,
        }
    }

    /// Also show a posted comment from the REST reply, without waiting for
    /// its broadcast. The later broadcast is de-duplicated by id.
    pub fn with_optimistic_insert(mut self, enabled: bool) -> Self {
        self.optimistic = enabled;
        self
    }

    pub fn snapshot(&self) -> ThreadSnapshot {
        lock(&self.state).snapshot()
    }

    pub fn phase(&self) -> ThreadPhase {
        lock(&self.state).phase
    }

    /// Open the thread of `equipment_id`, closing any other one first.
    pub async fn open(&self, equipment_id: EquipmentId) -> Result<()> {
        let epoch = self.begin_open(equipment_id);
        let history = self.api.list_comments(equipment_id).await;
        self.finish_open(epoch, history)
    }

    /// Subscribe and join for a new opening; returns its epoch.
    pub(crate) fn begin_open(&self, equipment_id: EquipmentId) -> u64 {
        self.close();
        let epoch = lock(&self.state).reset(ThreadPhase::Loading, Some(equipment_id));

        let subscriptions = vec![
            self.room_handler(EventKind::NewComment, equipment_id, epoch),
            self.room_handler(EventKind::CommentDeleted, equipment_id, epoch),
        ];
        let room = self.channel.join_room(equipment_id);
        let attachment = Attachment {
            room,
            subscriptions,
        };

        let mut slot = self.attachment.lock().unwrap_or_else(|e| e.into_inner());
        if lock(&self.state).epoch != epoch {
            // Closed before we got here.
            drop(slot);
            attachment.detach();
            return epoch;
        }
        if let Some(previous) = slot.replace(attachment) {
            previous.detach();
        }
        log::debug!("Opened comment room {}", equipment_id);
        epoch
    }

    /// Merge the history fetched for opening `epoch`.
    pub(crate) fn finish_open(&self, epoch: u64, history: Result<Vec<Comment>>) -> Result<()> {
        let mut state = lock(&self.state);
        if state.epoch != epoch {
            log::debug!("Dropping comment history of a closed thread");
            return Ok(());
        }
        state.phase = ThreadPhase::Open;
        match history {
            Ok(history) => {
                state.merge_history(history);
                Ok(())
            }
            Err(e) => {
                state.deleted_while_loading.clear();
                state.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Leave the room, drop the handlers and forget the comments.
    pub fn close(&self) {
        lock(&self.state).reset(ThreadPhase::Closed, None);
        let attachment = self
            .attachment
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(attachment) = attachment {
            attachment.detach();
        }
    }

    /// Post a comment on the open thread.
    ///
    /// Whitespace-only text is rejected without a request.
    pub async fn add_comment(&self, text: &str) -> Result<Comment> {
        let text = validation::normalize_comment(text)?;
        let (equipment_id, epoch) = self.current()?;
        let comment = self.api.add_comment(equipment_id, text).await?;
        if self.optimistic {
            let mut state = lock(&self.state);
            if state.epoch == epoch {
                state.insert(comment.clone());
            }
        }
        Ok(comment)
    }

    /// Ask the server to delete a comment; it disappears on broadcast.
    pub async fn delete_comment(&self, id: CommentId) -> Result<()> {
        self.current()?;
        self.api.delete_comment(id).await?;
        Ok(())
    }

    /// Equipment and epoch of the open thread; a thread still loading its
    /// history does not accept changes yet.
    fn current(&self) -> Result<(EquipmentId, u64)> {
        let state = lock(&self.state);
        match (state.phase, state.equipment_id) {
            (ThreadPhase::Open, Some(id)) => Ok((id, state.epoch)),
            _ => Err(ClientError::ThreadNotOpen),
        }
    }

    fn room_handler(&self, kind: EventKind, equipment_id: EquipmentId, epoch: u64) -> Subscription {
        let weak: Weak<Mutex<ThreadState>> = Arc::downgrade(&self.state);
        self.channel
            .on(kind, Topic::Room(equipment_id), move |event| {
                let Some(state) = weak.upgrade() else {
                    return;
                };
                let mut state = lock(&state);
                if state.epoch == epoch {
                    state.apply(event);
                }
            })
    }
}

impl Drop for CommentThread {
    fn drop(&mut self) {
        self.close();
    }
}
