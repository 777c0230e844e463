pub mod migrations;
pub mod queries;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tokio::sync::broadcast;
use tracing::info;

use classline_types::error::StoreError;
use classline_types::models::Message;

/// Capacity of the insert feed ring buffer. A subscriber that falls
/// further behind than this observes a lag and must resync from history.
const FEED_CAPACITY: usize = 1024;

/// SQLite-backed record store with an insert-subscription feed.
pub struct Store {
    conn: Mutex<Connection>,
    feed: broadcast::Sender<Message>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(db_err)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL").map_err(db_err)?;

        let store = Self::init(conn)?;
        info!("Store opened at {}", path.display());
        Ok(store)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON").map_err(db_err)?;

        migrations::run(&conn)?;

        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Ok(Self {
            conn: Mutex::new(conn),
            feed,
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError {
            message: "connection lock poisoned".into(),
            code: None,
        })?;
        f(&conn)
    }

    /// Standing watch on the message insert stream. Every insert anywhere
    /// in the store is delivered to every receiver, in insertion order.
    /// Conversation filtering is the subscriber's job.
    pub fn subscribe_inserts(&self) -> broadcast::Receiver<Message> {
        self.feed.subscribe()
    }

    /// No receivers is fine; inserts outside any open conversation go
    /// unobserved.
    pub(crate) fn publish(&self, message: Message) {
        let _ = self.feed.send(message);
    }
}

pub(crate) fn db_err(e: rusqlite::Error) -> StoreError {
    let code = match &e {
        rusqlite::Error::SqliteFailure(err, _) => Some(err.extended_code),
        _ => None,
    };
    StoreError {
        message: e.to_string(),
        code,
    }
}
