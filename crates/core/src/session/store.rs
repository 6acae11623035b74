use async_trait::async_trait;

use crate::errors::ApplicationError;

/// External persistence for serialized conversation state.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, session_id: &str, serialized_state: &str) -> Result<(), ApplicationError>;

    async fn load(&self, session_id: &str) -> Result<Option<String>, ApplicationError>;
}
