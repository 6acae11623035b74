use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use threadline_core::errors::ApplicationError;
use threadline_core::session::SessionStore;
use tracing::debug;

use super::RepositoryError;
use crate::DbPool;

/// Serialized conversations keyed by session id, one row per session.
pub struct SqlSessionStore {
    pool: DbPool,
}

impl SqlSessionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn save_state(
        &self,
        session_id: &str,
        serialized_state: &str,
    ) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO conversation_session (
                session_id,
                state_json,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?)
             ON CONFLICT(session_id) DO UPDATE SET
                state_json = excluded.state_json,
                updated_at = excluded.updated_at",
        )
        .bind(session_id)
        .bind(serialized_state)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        debug!(event_name = "db.session.saved", session_id, bytes = serialized_state.len(), "session row written");
        Ok(())
    }

    pub async fn load_state(&self, session_id: &str) -> Result<Option<String>, RepositoryError> {
        let row = sqlx::query("SELECT state_json FROM conversation_session WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            row.try_get::<String, _>("state_json")
                .map_err(|error| RepositoryError::Decode(error.to_string()))
        })
        .transpose()
    }

    pub async fn session_ids(&self) -> Result<Vec<String>, RepositoryError> {
        let rows = sqlx::query("SELECT session_id FROM conversation_session ORDER BY updated_at DESC, session_id")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                row.try_get::<String, _>("session_id")
                    .map_err(|error| RepositoryError::Decode(error.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl SessionStore for SqlSessionStore {
    async fn save(&self, session_id: &str, serialized_state: &str) -> Result<(), ApplicationError> {
        Ok(self.save_state(session_id, serialized_state).await?)
    }

    async fn load(&self, session_id: &str) -> Result<Option<String>, ApplicationError> {
        Ok(self.load_state(session_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use threadline_core::session::SessionStore;

    use super::SqlSessionStore;
    use crate::{connect_with_settings, migrations::run_pending, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn sql_session_store_round_trip_and_overwrite() {
        let store = SqlSessionStore::new(setup_pool().await);

        assert_eq!(store.load("s-1").await.expect("load missing"), None);

        store.save("s-1", r#"{"turn":1}"#).await.expect("save");
        store.save("s-1", r#"{"turn":2}"#).await.expect("overwrite");
        store.save("s-2", r#"{"turn":1}"#).await.expect("save other");

        assert_eq!(store.load("s-1").await.expect("load"), Some(r#"{"turn":2}"#.to_string()));
        let mut ids = store.session_ids().await.expect("ids");
        ids.sort();
        assert_eq!(ids, vec!["s-1".to_string(), "s-2".to_string()]);
    }

    #[tokio::test]
    async fn missing_schema_surfaces_as_persistence_error() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        let store = SqlSessionStore::new(pool);

        let error = store.save("s-1", "{}").await.expect_err("no table yet");
        assert!(error.to_string().contains("persistence failure"));
    }
}
