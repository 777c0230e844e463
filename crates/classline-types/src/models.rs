use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Directory roles. The full set mirrors the platform directory, but only
/// the Teacher/Student pairing participates in contact resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
    Parent,
    Supervisor,
    Admin,
    Secretary,
}

impl Role {
    /// The population an actor of this role may message: teachers see
    /// students, every other role sees teachers. Adding a pairing is a
    /// change to this table, not new branching logic.
    pub fn opposing(self) -> Role {
        match self {
            Role::Teacher => Role::Student,
            _ => Role::Teacher,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Teacher => "teacher",
            Role::Student => "student",
            Role::Parent => "parent",
            Role::Supervisor => "supervisor",
            Role::Admin => "admin",
            Role::Secretary => "secretary",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "teacher" => Some(Role::Teacher),
            "student" => Some(Role::Student),
            "parent" => Some(Role::Parent),
            "supervisor" => Some(Role::Supervisor),
            "admin" => Some(Role::Admin),
            "secretary" => Some(Role::Secretary),
            _ => None,
        }
    }
}

/// The authenticated user an operation runs as. Always passed explicitly;
/// there is no ambient current-user lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

/// A row of the directory table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
}

/// A direct message between two directory users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    /// Store-assigned insertion sequence; breaks ties between messages
    /// sharing a `created_at` timestamp.
    pub seq: i64,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
}

impl Message {
    /// True when this message belongs to the conversation between `a`
    /// and `b`, in either direction.
    pub fn is_between(&self, a: Uuid, b: Uuid) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }

    /// Transcript ordering key: `created_at` ascending, ties by `seq`.
    pub fn sort_key(&self) -> (DateTime<Utc>, i64) {
        (self.created_at, self.seq)
    }
}

/// A directory entry eligible to chat with the actor, plus the derived
/// conversation summary. Recomputed on every listing; owns no stored
/// state.
#[derive(Debug, Clone, Serialize)]
pub struct ChatContact {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    /// Most recent message in either direction, if any.
    pub last_message: Option<Message>,
    /// Unread messages from this contact to the actor.
    pub unread_count: u32,
}
