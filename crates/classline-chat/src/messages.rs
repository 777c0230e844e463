use std::sync::Arc;

use uuid::Uuid;

use classline_store::Store;
use classline_types::error::ChatError;
use classline_types::models::{Actor, Message};

/// Typed access to the message table: insert, ordered transcript fetch,
/// bulk read-state flip.
#[derive(Clone)]
pub struct Messages {
    store: Arc<Store>,
}

impl Messages {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Insert a message from the actor to `receiver_id` and return the
    /// created row. Repeated calls with identical arguments create
    /// distinct messages; there is no dedup key.
    pub fn send(
        &self,
        actor: Option<&Actor>,
        receiver_id: Uuid,
        content: &str,
    ) -> Result<Message, ChatError> {
        let actor = actor.ok_or(ChatError::NotAuthenticated)?;
        if content.is_empty() {
            return Err(ChatError::InvalidArgument("content must not be empty"));
        }
        if receiver_id.is_nil() {
            return Err(ChatError::InvalidArgument("receiver must not be empty"));
        }
        Ok(self.store.insert_message(actor.id, receiver_id, content)?)
    }

    /// Full bidirectional transcript with `contact_id`, ordered by
    /// `(created_at, seq)`. An unauthenticated caller gets an empty
    /// transcript, not an error; a store failure is an error, so callers
    /// can tell "failed to load" from "no messages yet".
    pub fn history(
        &self,
        actor: Option<&Actor>,
        contact_id: Uuid,
    ) -> Result<Vec<Message>, ChatError> {
        let Some(actor) = actor else {
            return Ok(Vec::new());
        };
        Ok(self.store.conversation(actor.id, contact_id)?)
    }

    /// Flip every unread message from `contact_id` to the actor to read,
    /// in one bulk conditional update. No-op without an actor.
    pub fn mark_read(&self, actor: Option<&Actor>, contact_id: Uuid) -> Result<(), ChatError> {
        let Some(actor) = actor else {
            return Ok(());
        };
        self.store.mark_conversation_read(contact_id, actor.id)?;
        Ok(())
    }
}
