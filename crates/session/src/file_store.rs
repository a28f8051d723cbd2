//! File-based session store — one JSON-lines file per chat.
//!
//! The first line of each file is a metadata record; every following line is
//! one [`SessionMessage`]. Files live under the sessions directory and are
//! named after the session key with `:` replaced by `_`.
//!
//! ```text
//! {"_type":"metadata","key":"telegram:42","created_at":"…","updated_at":"…"}
//! {"role":"user","content":"hi","timestamp":"…"}
//! {"role":"assistant","content":"hello","timestamp":"…"}
//! ```
//!
//! Loaded sessions are cached; the file is rewritten on every save.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hookclaw_core::error::SessionError;
use hookclaw_core::session::{Session, SessionMessage, SessionStore, archive_path};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize, Deserialize)]
struct MetadataLine {
    #[serde(rename = "_type")]
    kind: String,
    key: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

const METADATA_KIND: &str = "metadata";

pub struct FileSessionStore {
    dir: PathBuf,
    cache: RwLock<HashMap<String, Session>>,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        debug!(dir = %dir.display(), "File session store ready");
        Self {
            dir,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `key`.
    pub fn session_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", key.replace(':', "_")))
    }

    async fn load(&self, key: &str) -> Result<Option<Session>, SessionError> {
        let path = self.session_path(key);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SessionError::Storage(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        let mut session = Session::new(key);
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            if n == 0
                && let Ok(meta) = serde_json::from_str::<MetadataLine>(line)
                && meta.kind == METADATA_KIND
            {
                session.created_at = meta.created_at;
                session.updated_at = meta.updated_at;
                continue;
            }
            match serde_json::from_str::<SessionMessage>(line) {
                Ok(message) => session.messages.push(message),
                Err(e) => warn!(key, line = n + 1, error = %e, "Skipping corrupted session line"),
            }
        }
        Ok(Some(session))
    }

    fn render(session: &Session) -> Result<String, SessionError> {
        let corrupted = |e: serde_json::Error| SessionError::Corrupted {
            key: session.key.clone(),
            reason: e.to_string(),
        };
        let meta = MetadataLine {
            kind: METADATA_KIND.into(),
            key: session.key.clone(),
            created_at: session.created_at,
            updated_at: session.updated_at,
        };

        let mut content = serde_json::to_string(&meta).map_err(corrupted)?;
        content.push('\n');
        for message in &session.messages {
            content.push_str(&serde_json::to_string(message).map_err(corrupted)?);
            content.push('\n');
        }
        Ok(content)
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn get_or_create(&self, key: &str) -> Result<Session, SessionError> {
        if let Some(session) = self.cache.read().await.get(key) {
            return Ok(session.clone());
        }

        let session = self.load(key).await?.unwrap_or_else(|| Session::new(key));
        self.cache
            .write()
            .await
            .insert(key.to_string(), session.clone());
        Ok(session)
    }

    async fn save(&self, session: &Session) -> Result<(), SessionError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            SessionError::Storage(format!("Failed to create sessions directory: {e}"))
        })?;

        let content = Self::render(session)?;
        let path = self.session_path(&session.key);
        tokio::fs::write(&path, content).await.map_err(|e| {
            SessionError::Storage(format!("Failed to write {}: {e}", path.display()))
        })?;

        self.cache
            .write()
            .await
            .insert(session.key.clone(), session.clone());
        Ok(())
    }

    async fn rotate(&self, key: &str) -> Result<Option<String>, SessionError> {
        self.cache.write().await.remove(key);

        let path = self.session_path(key);
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        if !exists {
            return Ok(None);
        }

        let archived = archive_path(&path);
        tokio::fs::rename(&path, &archived).await.map_err(|e| {
            SessionError::Storage(format!("Failed to rotate {}: {e}", path.display()))
        })?;

        info!(key, archived = %archived.display(), "Rotated session file");
        Ok(Some(archived.display().to_string()))
    }
}
