use crate::models::{Comment, CommentId, EquipmentId};
use serde::Deserialize;
use serde_json::{Value, json};

/// Names of the events the server pushes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NewComment,
    CommentDeleted,
    CommentCountUpdated,
}

impl EventKind {
    pub fn name(self) -> &'static str {
        match self {
            EventKind::NewComment => "new_comment",
            EventKind::CommentDeleted => "comment_deleted",
            EventKind::CommentCountUpdated => "comment_count_updated",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "new_comment" => Some(EventKind::NewComment),
            "comment_deleted" => Some(EventKind::CommentDeleted),
            "comment_count_updated" => Some(EventKind::CommentCountUpdated),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct DeletedPayload {
    id: CommentId,
    equipment_id: EquipmentId,
}

#[derive(Deserialize)]
struct CountPayload {
    equipment_id: EquipmentId,
    count: u32,
}

/// A pushed event, decoded
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    NewComment(Comment),
    CommentDeleted {
        id: CommentId,
        equipment_id: EquipmentId,
    },
    CommentCountUpdated {
        equipment_id: EquipmentId,
        count: u32,
    },
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::NewComment(_) => EventKind::NewComment,
            ServerEvent::CommentDeleted { .. } => EventKind::CommentDeleted,
            ServerEvent::CommentCountUpdated { .. } => EventKind::CommentCountUpdated,
        }
    }

    /// Room the event belongs to.
    pub fn equipment_id(&self) -> EquipmentId {
        match self {
            ServerEvent::NewComment(comment) => comment.equipment_id,
            ServerEvent::CommentDeleted { equipment_id, .. } => *equipment_id,
            ServerEvent::CommentCountUpdated { equipment_id, .. } => *equipment_id,
        }
    }

    /// Decode a named event. Unknown names yield `Ok(None)`.
    pub fn from_wire(name: &str, data: Value) -> Result<Option<Self>, serde_json::Error> {
        let Some(kind) = EventKind::from_name(name) else {
            return Ok(None);
        };
        let event = match kind {
            EventKind::NewComment => ServerEvent::NewComment(serde_json::from_value(data)?),
            EventKind::CommentDeleted => {
                let payload: DeletedPayload = serde_json::from_value(data)?;
                ServerEvent::CommentDeleted {
                    id: payload.id,
                    equipment_id: payload.equipment_id,
                }
            }
            EventKind::CommentCountUpdated => {
                let payload: CountPayload = serde_json::from_value(data)?;
                ServerEvent::CommentCountUpdated {
                    equipment_id: payload.equipment_id,
                    count: payload.count,
                }
            }
        };
        Ok(Some(event))
    }
}

/// Room membership requests sent to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomCommand {
    Join(EquipmentId),
    Leave(EquipmentId),
}

impl RoomCommand {
    pub fn event_name(&self) -> &'static str {
        match self {
            RoomCommand::Join(_) => "join_equipment",
            RoomCommand::Leave(_) => "leave_equipment",
        }
    }

    pub fn payload(&self) -> Value {
        let (RoomCommand::Join(id) | RoomCommand::Leave(id)) = self;
        json!({ "equipment_id": id })
    }
}
