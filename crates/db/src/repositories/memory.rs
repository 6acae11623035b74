use std::collections::HashMap;

use async_trait::async_trait;
use threadline_core::errors::ApplicationError;
use threadline_core::session::SessionStore;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, String>>,
}

impl InMemorySessionStore {
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save(&self, session_id: &str, serialized_state: &str) -> Result<(), ApplicationError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id.to_string(), serialized_state.to_string());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<String>, ApplicationError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).cloned())
    }
}
