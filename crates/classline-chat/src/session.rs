use std::collections::HashSet;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};
use uuid::Uuid;

use classline_types::error::{ChatError, StoreError};
use classline_types::models::{Actor, Message};

use crate::live::InsertFeed;
use crate::messages::Messages;

/// Lifecycle of one open conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Loading,
    Active,
    Reconnecting,
}

/// Resubscribe policy when the insert feed closes under an active
/// session: doubling delay starting at 250ms, five attempts, then the
/// session gives up with a store error.
const RESUBSCRIBE_BASE_DELAY: Duration = Duration::from_millis(250);
const RESUBSCRIBE_MAX_ATTEMPTS: u32 = 5;

/// One open conversation between the actor and a contact.
///
/// Owns the ordered transcript and keeps it synchronized with the insert
/// feed. All event handling goes through `&mut self`, so one event is
/// processed to completion before the next is pulled.
pub struct ConversationSession {
    messages: Messages,
    actor: Actor,
    contact_id: Uuid,
    transcript: Vec<Message>,
    seen: HashSet<Uuid>,
    feed: InsertFeed,
    state: SessionState,
    reconnect_attempts: u32,
}

impl ConversationSession {
    /// Open the conversation: subscribe to the insert feed, then load
    /// history, then flip the contact's unread messages.
    ///
    /// Subscribing before the fetch means a message inserted while the
    /// fetch runs is either in the history result or still queued on the
    /// feed; id dedup keeps it from appearing twice either way.
    pub fn open(messages: Messages, actor: Actor, contact_id: Uuid) -> Result<Self, ChatError> {
        let feed = InsertFeed::subscribe(messages.store());
        let mut session = Self {
            messages,
            actor,
            contact_id,
            transcript: Vec::new(),
            seen: HashSet::new(),
            feed,
            state: SessionState::Loading,
            reconnect_attempts: 0,
        };

        let history = session.messages.history(Some(&session.actor), contact_id)?;
        for message in history {
            session.append(message);
        }
        session.messages.mark_read(Some(&session.actor), contact_id)?;

        session.state = SessionState::Active;
        debug!(
            actor = %session.actor.id,
            contact = %contact_id,
            len = session.transcript.len(),
            "conversation opened"
        );
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The ordered transcript as currently displayed.
    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    /// Send `content` to the contact. The created row is appended
    /// optimistically rather than waiting for the feed echo; the echo is
    /// later dropped by id dedup.
    pub fn send(&mut self, content: &str) -> Result<Message, ChatError> {
        let message = self
            .messages
            .send(Some(&self.actor), self.contact_id, content)?;
        self.append(message.clone());
        Ok(message)
    }

    /// Wait for the next message in this conversation and fold it into
    /// the transcript. Inserts for other conversations are dropped, as
    /// are duplicates of rows already present (history, optimistic
    /// appends, earlier feed events). A message from the contact is
    /// marked read immediately so unread counts stay live.
    pub async fn next_message(&mut self) -> Result<Message, ChatError> {
        loop {
            let Some(message) = self.feed.next().await else {
                self.resubscribe().await?;
                continue;
            };
            self.reconnect_attempts = 0;

            if self.feed.take_missed() {
                self.resync()?;
            }

            if !message.is_between(self.actor.id, self.contact_id) {
                continue;
            }
            if !self.append(message.clone()) {
                continue;
            }
            if message.sender_id == self.contact_id {
                self.messages.mark_read(Some(&self.actor), self.contact_id)?;
            }
            return Ok(message);
        }
    }

    /// Close the conversation. Delivery stops promptly and the transcript
    /// is discarded.
    pub fn close(mut self) {
        self.feed.unsubscribe();
        self.state = SessionState::Idle;
        debug!(actor = %self.actor.id, contact = %self.contact_id, "conversation closed");
    }

    /// Insert into the transcript preserving `(created_at, seq)` order.
    /// Returns false when the id is already present.
    fn append(&mut self, message: Message) -> bool {
        if !self.seen.insert(message.id) {
            return false;
        }
        let key = message.sort_key();
        let at = self.transcript.partition_point(|m| m.sort_key() <= key);
        self.transcript.insert(at, message);
        true
    }

    /// Reload history and fold in anything the feed dropped; ids dedup
    /// the overlap, so nothing is lost or duplicated.
    fn resync(&mut self) -> Result<(), ChatError> {
        let history = self.messages.history(Some(&self.actor), self.contact_id)?;
        for message in history {
            self.append(message);
        }
        self.messages.mark_read(Some(&self.actor), self.contact_id)?;
        Ok(())
    }

    /// Bounded resubscription with doubling backoff, then a resync so
    /// nothing delivered while detached is lost.
    async fn resubscribe(&mut self) -> Result<(), ChatError> {
        if self.reconnect_attempts >= RESUBSCRIBE_MAX_ATTEMPTS {
            self.state = SessionState::Idle;
            return Err(ChatError::Store(StoreError {
                message: "insert feed unavailable".into(),
                code: None,
            }));
        }
        self.state = SessionState::Reconnecting;
        self.reconnect_attempts += 1;

        let delay = RESUBSCRIBE_BASE_DELAY * 2u32.pow(self.reconnect_attempts - 1);
        sleep(delay).await;

        self.feed = InsertFeed::subscribe(self.messages.store());
        self.resync()?;
        self.state = SessionState::Active;
        warn!(attempt = self.reconnect_attempts, "insert feed resubscribed");
        Ok(())
    }
}
