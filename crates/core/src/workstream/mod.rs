pub mod slots;
pub mod states;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::intent::IntentType;

pub use slots::{describe_target, target_of, SlotMap, Target, TargetKind};
pub use states::{can_transition, route, transition, walk, TransitionError, WorkstreamState};

/// Short sequential id (`ws-1`, `ws-2`, ...) readable in prompts and transcripts.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkstreamId(pub String);

impl WorkstreamId {
    pub fn from_sequence(sequence: u64) -> Self {
        Self(format!("ws-{sequence}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkstreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Workstream {
    pub id: WorkstreamId,
    pub intent_type: IntentType,
    pub state: WorkstreamState,
    #[serde(default)]
    pub slots: SlotMap,
    #[serde(default)]
    pub candidates: Vec<Value>,
    #[serde(default)]
    pub satisfaction: f64,
    /// Slot the last `Ask` was about; the next value for it is taken as the answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub awaiting_slot: Option<String>,
}

impl Workstream {
    pub fn new(id: WorkstreamId, intent_type: IntentType) -> Self {
        Self {
            id,
            intent_type,
            state: WorkstreamState::New,
            slots: SlotMap::new(),
            candidates: Vec::new(),
            satisfaction: 0.0,
            awaiting_slot: None,
        }
    }

    pub fn can_transition_to(&self, next: WorkstreamState) -> bool {
        can_transition(self.state, next)
    }

    pub fn transition_to(&mut self, next: WorkstreamState) -> Result<(), TransitionError> {
        self.state = transition(self.state, next)?;
        Ok(())
    }

    /// Applies every step or none of them.
    pub fn follow_path(&mut self, path: &[WorkstreamState]) -> Result<(), TransitionError> {
        self.state = walk(self.state, path)?;
        Ok(())
    }

    pub fn merge_slots(&mut self, entities: &SlotMap) {
        slots::merge_into(&mut self.slots, entities);
    }

    pub fn slot(&self, key: &str) -> Option<&Value> {
        self.slots.get(key).filter(|value| !slots::is_empty_value(value))
    }

    pub fn missing_slots<'a, S: AsRef<str>>(&self, required: &'a [S]) -> Vec<&'a str> {
        required
            .iter()
            .map(|key| key.as_ref())
            .filter(|key| self.slot(key).is_none())
            .collect()
    }

    pub fn replace_candidates(&mut self, items: Vec<Value>) {
        self.candidates = items;
    }

    /// Resolves "the third one" style references; `ordinal` is 1-based.
    pub fn candidate(&self, ordinal: usize) -> Option<&Value> {
        ordinal.checked_sub(1).and_then(|index| self.candidates.get(index))
    }

    pub fn adjust_satisfaction(&mut self, delta: f64) {
        if delta.is_finite() {
            self.satisfaction = (self.satisfaction + delta).clamp(0.0, 1.0);
        }
    }

    pub fn target_summary(&self) -> String {
        describe_target(&self.slots)
    }
}
