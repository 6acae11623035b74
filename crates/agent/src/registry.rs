//! Agent contract and the intent-keyed registry the planner dispatches through.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use threadline_core::action::Action;
use threadline_core::continuity::EntityConflict;
use threadline_core::intent::{Classification, IntentType};
use threadline_core::session::Session;
use threadline_core::workstream::{SlotMap, Workstream, WorkstreamState};

/// Read-only view handed to an agent; agents never mutate the session.
#[derive(Clone, Debug)]
pub struct AgentContext {
    pub workstream: Workstream,
    pub session: Session,
    pub classification: Classification,
    pub conflicts: Vec<EntityConflict>,
}

impl AgentContext {
    pub fn flagged_conflicts(&self) -> impl Iterator<Item = &EntityConflict> {
        self.conflicts.iter().filter(|conflict| conflict.needs_clarification)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AgentOutput {
    pub action: Action,
    pub updated_slots: SlotMap,
    pub presented_items: Option<Vec<Value>>,
    pub satisfaction_delta: f64,
    pub mark_completed: bool,
    /// Explicit transition path; `None` falls back to the action's implied state.
    pub state_path: Option<Vec<WorkstreamState>>,
}

impl AgentOutput {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            updated_slots: SlotMap::new(),
            presented_items: None,
            satisfaction_delta: 0.0,
            mark_completed: false,
            state_path: None,
        }
    }

    pub fn with_slot(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.updated_slots.insert(key.into(), value.into());
        self
    }

    pub fn presenting(mut self, items: Vec<Value>) -> Self {
        self.presented_items = Some(items);
        self
    }

    pub fn with_satisfaction(mut self, delta: f64) -> Self {
        self.satisfaction_delta = delta;
        self
    }

    pub fn completed(mut self) -> Self {
        self.mark_completed = true;
        self
    }

    pub fn via(mut self, path: Vec<WorkstreamState>) -> Self {
        self.state_path = Some(path);
        self
    }
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn intent_type(&self) -> IntentType;
    async fn decide_next(&self, context: &AgentContext) -> Result<AgentOutput>;
}

#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<IntentType, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn register<A>(&mut self, agent: A)
    where
        A: Agent + 'static,
    {
        self.agents.insert(agent.intent_type(), Arc::new(agent));
    }

    pub fn with<A>(mut self, agent: A) -> Self
    where
        A: Agent + 'static,
    {
        self.register(agent);
        self
    }

    pub fn get(&self, intent_type: &IntentType) -> Option<Arc<dyn Agent>> {
        self.agents.get(intent_type).cloned()
    }

    pub fn intent_types(&self) -> Vec<IntentType> {
        self.agents.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use async_trait::async_trait;
    use threadline_core::action::Action;
    use threadline_core::intent::IntentType;

    use super::{Agent, AgentContext, AgentOutput, AgentRegistry};

    struct Greeter;

    #[async_trait]
    impl Agent for Greeter {
        fn intent_type(&self) -> IntentType {
            IntentType::new("chitchat")
        }

        async fn decide_next(&self, _context: &AgentContext) -> Result<AgentOutput> {
            Ok(AgentOutput::new(Action::info("hello")))
        }
    }

    #[test]
    fn registry_looks_agents_up_by_intent() {
        let registry = AgentRegistry::default().with(Greeter);

        assert_eq!(registry.len(), 1);
        assert!(registry.get(&IntentType::new("CHITCHAT")).is_some());
        assert!(registry.get(&IntentType::new("order")).is_none());
        assert_eq!(registry.intent_types(), vec![IntentType::new("chitchat")]);
    }
}
