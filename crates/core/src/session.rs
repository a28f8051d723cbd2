//! Session store trait — persistent per-chat conversation history.
//!
//! A session is keyed by `channel:chat_id` and holds the user/assistant
//! exchange of every finished turn. Tool calls and hook guidance are not
//! stored; they live only inside the turn that produced them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::SessionError;
use crate::message::{Message, Role};

/// One stored exchange line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// The stored history of one chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// `channel:chat_id`
    pub key: String,

    /// Ordered messages, oldest first
    pub messages: Vec<SessionMessage>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message to the session.
    pub fn add_message(&mut self, role: Role, content: impl Into<String>) {
        self.updated_at = Utc::now();
        self.messages.push(SessionMessage {
            role,
            content: content.into(),
            timestamp: self.updated_at,
        });
    }

    /// The most recent `max_messages` entries as model input, oldest first.
    pub fn history(&self, max_messages: usize) -> Vec<Message> {
        let start = self.messages.len().saturating_sub(max_messages);
        self.messages[start..]
            .iter()
            .map(|m| match m.role {
                Role::Assistant => Message::assistant(&m.content),
                Role::System => Message::system(&m.content),
                _ => Message::user(&m.content),
            })
            .collect()
    }

    /// Drop all stored messages.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.updated_at = Utc::now();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Storage backend for sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// A human-readable name for this backend (e.g., "file", "in_memory").
    fn name(&self) -> &str;

    /// Load the session for `key`, or start an empty one.
    async fn get_or_create(&self, key: &str) -> Result<Session, SessionError>;

    /// Persist the session.
    async fn save(&self, session: &Session) -> Result<(), SessionError>;

    /// Archive the stored session for `key` so the next load starts fresh.
    /// Returns a description of where the archive went, or `None` if there
    /// was nothing to archive.
    async fn rotate(&self, key: &str) -> Result<Option<String>, SessionError>;
}

/// Archive location for a rotated file: `dir/stem.ext` becomes
/// `dir/stem-YYYYmmddHHMMSS.ext`. A `-N` counter is appended while that
/// name is already taken.
pub fn archive_path(path: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format("%Y%m%d%H%M%S").to_string();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path.extension().map(|e| e.to_string_lossy().into_owned());
    let name = |suffix: &str| match &extension {
        Some(ext) => format!("{stem}-{suffix}.{ext}"),
        None => format!("{stem}-{suffix}"),
    };

    let mut candidate = path.with_file_name(name(&stamp));
    let mut counter = 1;
    while candidate.exists() {
        candidate = path.with_file_name(name(&format!("{stamp}-{counter}")));
        counter += 1;
    }
    candidate
}
