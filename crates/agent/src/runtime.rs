use threadline_core::action::Action;
use threadline_core::continuity::AnalyzerPolicy;
use threadline_core::errors::ApplicationError;
use threadline_core::session::{ConversationState, SessionStore};
use tracing::{debug, info};

use crate::conversation::Conversation;
use crate::router::Planner;

/// Loads a session, runs one turn through the planner, and saves it back.
///
/// Turns for one session must be submitted sequentially; independent
/// sessions may run concurrently.
pub struct AgentRuntime<S> {
    planner: Planner,
    store: S,
    policy: AnalyzerPolicy,
}

impl<S> AgentRuntime<S>
where
    S: SessionStore,
{
    pub fn new(planner: Planner, store: S, policy: AnalyzerPolicy) -> Self {
        Self { planner, store, policy }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn load(&self, session_id: &str) -> Result<Conversation, ApplicationError> {
        match self.store.load(session_id).await? {
            Some(serialized) => {
                let state = ConversationState::decode(&serialized)?;
                debug!(event_name = "runtime.session.loaded", session_id, "session loaded");
                Ok(Conversation::from_state(session_id, state, self.policy.clone()))
            }
            None => Ok(Conversation::new(session_id, self.policy.clone())),
        }
    }

    /// Nothing is saved when the turn fails.
    pub async fn handle_message(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<Action, ApplicationError> {
        let mut conversation = self.load(session_id).await?;
        let action = self.planner.handle_turn(&mut conversation, text).await?;

        let serialized = conversation.to_state().encode()?;
        self.store.save(session_id, &serialized).await?;
        info!(
            event_name = "runtime.session.saved",
            session_id,
            turns = conversation.transcript().user_turns(),
            action = action.kind(),
            "session saved"
        );
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use threadline_core::action::Action;
    use threadline_core::config::RoutingConfig;
    use threadline_core::errors::ApplicationError;
    use threadline_core::session::SessionStore;
    use threadline_core::workstream::WorkstreamState;

    use super::AgentRuntime;
    use crate::conversation::analyzer_policy;
    use crate::keywords::KeywordClassifier;
    use crate::router::Planner;
    use crate::slot_filling::{default_registry, default_tools};

    #[derive(Clone, Default)]
    struct MapStore {
        entries: Arc<Mutex<HashMap<String, String>>>,
        fail_saves: bool,
    }

    #[async_trait]
    impl SessionStore for MapStore {
        async fn save(&self, session_id: &str, serialized_state: &str) -> Result<(), ApplicationError> {
            if self.fail_saves {
                return Err(ApplicationError::Persistence("disk full".to_string()));
            }
            let mut entries =
                self.entries.lock().map_err(|_| ApplicationError::Persistence("poisoned".to_string()))?;
            entries.insert(session_id.to_string(), serialized_state.to_string());
            Ok(())
        }

        async fn load(&self, session_id: &str) -> Result<Option<String>, ApplicationError> {
            let entries =
                self.entries.lock().map_err(|_| ApplicationError::Persistence("poisoned".to_string()))?;
            Ok(entries.get(session_id).cloned())
        }
    }

    fn runtime(store: MapStore) -> AgentRuntime<MapStore> {
        let routing = RoutingConfig::default();
        let planner = Planner::new(
            Arc::new(KeywordClassifier::new()),
            default_registry(&default_tools()),
            &routing,
        );
        AgentRuntime::new(planner, store, analyzer_policy(&routing))
    }

    #[tokio::test]
    async fn turns_resume_from_the_stored_session() {
        let runtime = runtime(MapStore::default());

        let first = runtime.handle_message("s-1", "show me laptops under $1500").await.expect("first");
        assert!(matches!(first, Action::Present { .. }));

        let second = runtime.handle_message("s-1", "the first one").await.expect("second");
        assert!(matches!(second, Action::Commit { .. }));

        let restored = runtime.load("s-1").await.expect("load");
        assert_eq!(restored.transcript().user_turns(), 2);
        assert_eq!(restored.analyzer().snapshots().len(), 2);
        let workstream = restored.session().intents().first().map(|intent| intent.workstream.state);
        assert_eq!(workstream, Some(WorkstreamState::Completed));

        let other = runtime.load("s-2").await.expect("fresh session");
        assert!(other.session().intents().is_empty());
    }

    #[tokio::test]
    async fn failed_saves_surface_as_persistence_errors() {
        let store = MapStore { fail_saves: true, ..MapStore::default() };
        let runtime = runtime(store);

        let error = runtime.handle_message("s-1", "show me laptops").await.expect_err("save fails");
        assert!(matches!(error, ApplicationError::Persistence(_)));
        assert!(runtime.load("s-1").await.expect("load").session().intents().is_empty());
    }
}
