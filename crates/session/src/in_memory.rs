//! In-memory session store — useful for testing and ephemeral runs.

use async_trait::async_trait;
use hookclaw_core::error::SessionError;
use hookclaw_core::session::{Session, SessionStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Keeps sessions in a map. Rotated sessions are kept under
/// `<key>#<n>` so tests can inspect them.
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of stored sessions, archived ones included.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn get_or_create(&self, key: &str) -> Result<Session, SessionError> {
        Ok(self
            .sessions
            .read()
            .await
            .get(key)
            .cloned()
            .unwrap_or_else(|| Session::new(key)))
    }

    async fn save(&self, session: &Session) -> Result<(), SessionError> {
        self.sessions
            .write()
            .await
            .insert(session.key.clone(), session.clone());
        Ok(())
    }

    async fn rotate(&self, key: &str) -> Result<Option<String>, SessionError> {
        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.remove(key) else {
            return Ok(None);
        };
        let archived = (1..)
            .map(|n| format!("{key}#{n}"))
            .find(|k| !sessions.contains_key(k))
            .unwrap_or_else(|| format!("{key}#archived"));
        sessions.insert(archived.clone(), session);
        Ok(Some(archived))
    }
}
