use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, Role};

/// Events pushed over the gateway WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChatEvent {
    /// Connection established and actor resolved.
    Ready { user_id: Uuid, role: Role },

    /// A new message was inserted.
    MessageCreate { message: Message },
}

impl ChatEvent {
    /// The two participants when the event is scoped to a conversation.
    /// Events that return `None` are global.
    pub fn participants(&self) -> Option<(Uuid, Uuid)> {
        match self {
            Self::MessageCreate { message } => Some((message.sender_id, message.receiver_id)),
            Self::Ready { .. } => None,
        }
    }
}
