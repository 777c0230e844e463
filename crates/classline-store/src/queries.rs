use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::Connection;
use tracing::warn;
use uuid::Uuid;

use classline_types::error::StoreError;
use classline_types::models::{DirectoryEntry, Message, Role};

use crate::{Store, db_err};

impl Store {
    // -- Directory --

    pub fn create_user(&self, id: Uuid, name: &str, role: Role) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, role) VALUES (?1, ?2, ?3)",
                rusqlite::params![id.to_string(), name, role.as_str()],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    pub fn get_user(&self, id: Uuid) -> Result<Option<DirectoryEntry>, StoreError> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    /// Role of a directory user, or `None` when the row is absent.
    pub fn get_role(&self, id: Uuid) -> Result<Option<Role>, StoreError> {
        Ok(self.get_user(id)?.map(|entry| entry.role))
    }

    /// All directory entries with the given role, ordered by name.
    pub fn list_by_role(&self, role: Role) -> Result<Vec<DirectoryEntry>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, name, role FROM users WHERE role = ?1 ORDER BY name ASC")
                .map_err(db_err)?;

            let rows = stmt
                .query_map([role.as_str()], row_to_entry)
                .map_err(db_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)?;

            Ok(rows)
        })
    }

    // -- Messages --

    /// Insert a message. The store assigns `id`, `seq` and `created_at`,
    /// publishes the row on the insert feed, and returns it. Repeated
    /// calls with identical arguments create distinct rows.
    pub fn insert_message(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        content: &str,
    ) -> Result<Message, StoreError> {
        let id = Uuid::new_v4();
        // Millisecond precision: what the TEXT column round-trips.
        let created_at = Utc::now().trunc_subsecs(3);

        let seq = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, content, is_read, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                rusqlite::params![
                    id.to_string(),
                    sender_id.to_string(),
                    receiver_id.to_string(),
                    content,
                    created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
                ],
            )
            .map_err(db_err)?;
            Ok(conn.last_insert_rowid())
        })?;

        let message = Message {
            id,
            seq,
            sender_id,
            receiver_id,
            content: content.to_string(),
            created_at,
            is_read: false,
        };
        self.publish(message.clone());
        Ok(message)
    }

    /// Full transcript between `a` and `b`, both directions, ordered by
    /// `created_at` ascending with ties broken by insertion order.
    pub fn conversation(&self, a: Uuid, b: Uuid) -> Result<Vec<Message>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, rowid, sender_id, receiver_id, content, is_read, created_at
                     FROM messages
                     WHERE (sender_id = ?1 AND receiver_id = ?2)
                        OR (sender_id = ?2 AND receiver_id = ?1)
                     ORDER BY created_at ASC, rowid ASC",
                )
                .map_err(db_err)?;

            let rows = stmt
                .query_map(
                    rusqlite::params![a.to_string(), b.to_string()],
                    row_to_message,
                )
                .map_err(db_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)?;

            Ok(rows)
        })
    }

    /// Most recent message between `a` and `b`, if any.
    pub fn last_message(&self, a: Uuid, b: Uuid) -> Result<Option<Message>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, rowid, sender_id, receiver_id, content, is_read, created_at
                 FROM messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT 1",
                rusqlite::params![a.to_string(), b.to_string()],
                row_to_message,
            )
            .optional()
        })
    }

    /// Unread messages from `sender_id` to `receiver_id`.
    pub fn unread_count(&self, sender_id: Uuid, receiver_id: Uuid) -> Result<u32, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE sender_id = ?1 AND receiver_id = ?2 AND is_read = 0",
                rusqlite::params![sender_id.to_string(), receiver_id.to_string()],
                |row| row.get(0),
            )
            .map_err(db_err)
        })
    }

    /// Bulk read-state flip: every unread message from `sender_id` to
    /// `receiver_id` becomes read in one conditional UPDATE, so a row
    /// inserted mid-call is never half-updated. Returns the number of
    /// rows flipped; calling again is a no-op.
    pub fn mark_conversation_read(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
    ) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET is_read = 1
                 WHERE sender_id = ?1 AND receiver_id = ?2 AND is_read = 0",
                rusqlite::params![sender_id.to_string(), receiver_id.to_string()],
            )
            .map_err(db_err)
        })
    }
}

fn query_user_by_id(conn: &Connection, id: Uuid) -> Result<Option<DirectoryEntry>, StoreError> {
    conn.query_row(
        "SELECT id, name, role FROM users WHERE id = ?1",
        [id.to_string()],
        row_to_entry,
    )
    .optional()
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<DirectoryEntry> {
    let id: String = row.get(0)?;
    let role: String = row.get(2)?;
    Ok(DirectoryEntry {
        id: parse_uuid(&id, "user id"),
        name: row.get(1)?,
        role: Role::parse(&role).unwrap_or_else(|| {
            warn!("Corrupt role '{}' on user '{}'", role, id);
            Role::Student
        }),
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id: String = row.get(0)?;
    let sender_id: String = row.get(2)?;
    let receiver_id: String = row.get(3)?;
    let created_at: String = row.get(6)?;
    Ok(Message {
        seq: row.get(1)?,
        sender_id: parse_uuid(&sender_id, "sender_id"),
        receiver_id: parse_uuid(&receiver_id, "receiver_id"),
        content: row.get(4)?,
        is_read: row.get::<_, i64>(5)? != 0,
        created_at: parse_timestamp(&created_at, &id),
        id: parse_uuid(&id, "message id"),
    })
}

fn parse_uuid(raw: &str, field: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", field, raw, e);
        Uuid::default()
    })
}

fn parse_timestamp(raw: &str, message_id: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite default timestamps are 'YYYY-MM-DD HH:MM:SS' without
            // timezone. Parse as naive UTC and convert.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt created_at '{}' on message '{}': {}", raw, message_id, e);
            DateTime::default()
        })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, StoreError>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, StoreError> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_pair() -> (Store, Uuid, Uuid) {
        let store = Store::open_in_memory().unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store.create_user(a, "Ada Teacher", Role::Teacher).unwrap();
        store.create_user(b, "Ben Student", Role::Student).unwrap();
        (store, a, b)
    }

    fn raw_insert(store: &Store, id: &str, from: Uuid, to: Uuid, content: &str, at: &str) {
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO messages (id, sender_id, receiver_id, content, is_read, created_at)
                     VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                    rusqlite::params![id, from.to_string(), to.to_string(), content, at],
                )
                .map_err(db_err)?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn conversation_is_bidirectional_and_ordered() {
        let (store, a, b) = store_with_pair();
        let m1 = store.insert_message(a, b, "one").unwrap();
        let m2 = store.insert_message(b, a, "two").unwrap();
        let m3 = store.insert_message(a, b, "three").unwrap();

        let transcript = store.conversation(a, b).unwrap();
        let ids: Vec<Uuid> = transcript.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![m1.id, m2.id, m3.id]);

        // Same transcript regardless of which side asks.
        let mirrored = store.conversation(b, a).unwrap();
        assert_eq!(mirrored.len(), 3);
        assert_eq!(mirrored[0].id, m1.id);
    }

    #[test]
    fn equal_timestamps_fall_back_to_insertion_order() {
        let (store, a, b) = store_with_pair();
        let at = "2026-03-02T10:00:00.000Z";
        raw_insert(&store, &Uuid::new_v4().to_string(), a, b, "first", at);
        raw_insert(&store, &Uuid::new_v4().to_string(), b, a, "second", at);
        raw_insert(&store, &Uuid::new_v4().to_string(), a, b, "third", at);

        let transcript = store.conversation(a, b).unwrap();
        let contents: Vec<&str> = transcript.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
        assert!(transcript[0].seq < transcript[1].seq);
    }

    #[test]
    fn mark_read_flips_one_direction_only() {
        let (store, a, b) = store_with_pair();
        store.insert_message(a, b, "to b").unwrap();
        store.insert_message(a, b, "to b again").unwrap();
        store.insert_message(b, a, "to a").unwrap();

        let flipped = store.mark_conversation_read(a, b).unwrap();
        assert_eq!(flipped, 2);

        let transcript = store.conversation(a, b).unwrap();
        for m in &transcript {
            if m.sender_id == a {
                assert!(m.is_read);
            } else {
                assert!(!m.is_read, "reverse direction must be untouched");
            }
        }

        // Idempotent: nothing left to flip.
        assert_eq!(store.mark_conversation_read(a, b).unwrap(), 0);
    }

    #[test]
    fn unread_count_and_last_message_are_derived() {
        let (store, a, b) = store_with_pair();
        assert_eq!(store.unread_count(a, b).unwrap(), 0);
        assert!(store.last_message(a, b).unwrap().is_none());

        store.insert_message(a, b, "hello").unwrap();
        let latest = store.insert_message(a, b, "anyone there?").unwrap();

        assert_eq!(store.unread_count(a, b).unwrap(), 2);
        assert_eq!(store.last_message(a, b).unwrap().unwrap().id, latest.id);

        store.mark_conversation_read(a, b).unwrap();
        assert_eq!(store.unread_count(a, b).unwrap(), 0);
    }

    #[test]
    fn list_by_role_orders_by_name() {
        let store = Store::open_in_memory().unwrap();
        store.create_user(Uuid::new_v4(), "Zoe", Role::Student).unwrap();
        store.create_user(Uuid::new_v4(), "Amir", Role::Student).unwrap();
        store.create_user(Uuid::new_v4(), "Mara", Role::Teacher).unwrap();

        let students = store.list_by_role(Role::Student).unwrap();
        let names: Vec<&str> = students.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["Amir", "Zoe"]);
    }

    #[test]
    fn get_role_missing_row_is_none() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get_role(Uuid::new_v4()).unwrap().is_none());
    }

    #[tokio::test]
    async fn insert_publishes_on_feed() {
        let (store, a, b) = store_with_pair();
        let mut rx = store.subscribe_inserts();

        let inserted = store.insert_message(a, b, "live").unwrap();
        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.id, inserted.id);
        assert_eq!(delivered.content, "live");
        assert!(!delivered.is_read);
    }
}
