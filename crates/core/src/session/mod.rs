//! Session multiplexer: the authoritative set of workstreams for one
//! conversation and the single focused id.

pub mod store;

use serde::{Deserialize, Serialize};

use crate::continuity::{
    ContinuityAnalysis, EntityConflict, EntityResolver, MergeStrategy, PendingDecision,
    RecommendedAction, SnapshotBuffer,
};
use crate::errors::{ApplicationError, DomainError};
use crate::intent::{Classification, IntentStatus, IntentType, Priority, TrackedIntent};
use crate::transcript::Transcript;
use crate::workstream::slots::{self, SlotMap};
use crate::workstream::{Workstream, WorkstreamId, WorkstreamState};

pub use store::SessionStore;

pub const COMPARISON_SLOT: &str = "comparison";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    intents: Vec<TrackedIntent>,
    focus: Option<WorkstreamId>,
    next_sequence: u64,
    focus_clock: u64,
}

/// Result of applying a continuity decision.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContinuityOutcome {
    pub focus: Option<WorkstreamId>,
    pub created: Option<WorkstreamId>,
    pub conflicts: Vec<EntityConflict>,
    pub applied: bool,
}

impl Session {
    pub fn intents(&self) -> &[TrackedIntent] {
        &self.intents
    }

    pub fn intent(&self, id: &WorkstreamId) -> Option<&TrackedIntent> {
        self.intents.iter().find(|intent| intent.workstream.id == *id)
    }

    pub fn workstream(&self, id: &WorkstreamId) -> Option<&Workstream> {
        self.intent(id).map(|intent| &intent.workstream)
    }

    pub fn focus_id(&self) -> Option<&WorkstreamId> {
        self.focus.as_ref()
    }

    pub fn focused_intent(&self) -> Option<&TrackedIntent> {
        self.focus.as_ref().and_then(|id| self.intent(id))
    }

    pub fn focused_workstream(&self) -> Option<&Workstream> {
        self.focused_intent().map(|intent| &intent.workstream)
    }

    /// Open workstreams other than the focus, oldest first.
    pub fn pending_ids(&self) -> Vec<WorkstreamId> {
        self.intents
            .iter()
            .filter(|intent| !intent.is_archived() && Some(&intent.workstream.id) != self.focus.as_ref())
            .map(|intent| intent.workstream.id.clone())
            .collect()
    }

    /// Completed or abandoned workstreams; kept for read-only reference.
    pub fn archived_ids(&self) -> Vec<WorkstreamId> {
        self.intents
            .iter()
            .filter(|intent| intent.is_archived())
            .map(|intent| intent.workstream.id.clone())
            .collect()
    }

    pub fn ensure_workstream(&mut self, intent_type: IntentType, seed: &SlotMap) -> WorkstreamId {
        let existing = self
            .intents
            .iter()
            .find(|intent| intent.status == IntentStatus::Active && *intent.intent_type() == intent_type)
            .map(|intent| intent.workstream.id.clone());

        match existing {
            Some(id) => {
                self.focus_on(&id);
                id
            }
            None => self.open(intent_type, seed, Priority::Normal, 1.0, true),
        }
    }

    pub fn apply_continuity(
        &mut self,
        classification: &Classification,
        analysis: &ContinuityAnalysis,
        resolver: &EntityResolver,
    ) -> Result<ContinuityOutcome, DomainError> {
        let intent_type = classification.intent_type.clone();
        let entities = &classification.entities;
        let priority = analysis.priority_level;
        let confidence = classification.confidence;
        let mut outcome = ContinuityOutcome { applied: true, ..ContinuityOutcome::default() };

        let has_focus = self.focus.is_some();
        match analysis.recommended_action {
            RecommendedAction::Clarify => {
                outcome.applied = false;
            }
            RecommendedAction::StartNew
            | RecommendedAction::Continue
            | RecommendedAction::Compare
            | RecommendedAction::Separate
                if !has_focus =>
            {
                let before = self.intents.len();
                let id = self.ensure_workstream(intent_type, entities);
                self.raise_priority(&id, priority);
                if self.intents.len() > before {
                    outcome.created = Some(id);
                }
            }
            RecommendedAction::StartNew => {
                let before = self.intents.len();
                let id = self.ensure_workstream(intent_type, entities);
                self.raise_priority(&id, priority);
                if self.intents.len() > before {
                    outcome.created = Some(id);
                } else {
                    outcome.conflicts = self.resolve_into(&id, entities, resolver)?;
                }
            }
            RecommendedAction::Continue => {
                let id = self.require_focus()?;
                outcome.conflicts = self.resolve_into(&id, entities, resolver)?;
            }
            RecommendedAction::Replace => {
                if let Some(current) = self.focus.take() {
                    self.set_status(&current, IntentStatus::Abandoned)?;
                }
                match self.reactivation_target(&intent_type, entities) {
                    Some(id) => {
                        self.focus_on(&id);
                        self.raise_priority(&id, priority);
                        outcome.conflicts = self.resolve_into(&id, entities, resolver)?;
                    }
                    None => {
                        outcome.created =
                            Some(self.open(intent_type, entities, priority, confidence, true));
                    }
                }
            }
            RecommendedAction::Add => {
                outcome.created = Some(self.open(intent_type, entities, priority, confidence, true));
            }
            RecommendedAction::Compare => {
                let id = self.require_focus()?;
                let intent = self.intent_mut(&id)?;
                let pair = serde_json::json!([
                    slots::describe_target(&intent.workstream.slots),
                    slots::describe_target(entities)
                ]);
                let mut comparison = SlotMap::new();
                comparison.insert(COMPARISON_SLOT.to_string(), pair);
                intent.workstream.merge_slots(&comparison);
            }
            RecommendedAction::Separate => {
                outcome.created = Some(self.open(intent_type, entities, priority, confidence, false));
            }
        }

        outcome.focus = self.focus.clone();
        Ok(outcome)
    }

    /// Strict: the focused workstream must be allowed to reach COMPLETED.
    pub fn complete_focused(&mut self) -> Result<Option<WorkstreamId>, DomainError> {
        let id = self.require_focus()?;
        let mut workstream = self.intent_mut(&id)?.workstream.clone();
        workstream.transition_to(WorkstreamState::Completed)?;
        self.commit_workstream(workstream)
    }

    /// Installs an updated copy of a workstream. Completed workstreams are
    /// archived and, when focused, the next suspended one is promoted.
    /// Returns the focus afterwards.
    pub fn commit_workstream(
        &mut self,
        workstream: Workstream,
    ) -> Result<Option<WorkstreamId>, DomainError> {
        let id = workstream.id.clone();
        let completed = workstream.state == WorkstreamState::Completed;
        let intent = self.intent_mut(&id)?;
        intent.workstream = workstream;

        if completed && !intent.is_archived() {
            intent.status = IntentStatus::Completed;
            if self.focus.as_ref() == Some(&id) {
                self.focus = None;
                self.promote_next();
            }
        }
        Ok(self.focus.clone())
    }

    pub fn suspend_focus(&mut self) -> Result<(), DomainError> {
        if let Some(id) = self.focus.take() {
            self.set_status(&id, IntentStatus::Suspended)?;
        }
        Ok(())
    }

    fn promote_next(&mut self) {
        let next = self
            .intents
            .iter()
            .enumerate()
            .filter(|(_, intent)| intent.status == IntentStatus::Suspended)
            .max_by_key(|(index, intent)| (intent.priority, intent.last_focused, *index))
            .map(|(_, intent)| intent.workstream.id.clone());

        if let Some(id) = next {
            self.focus_on(&id);
        }
    }

    fn open(
        &mut self,
        intent_type: IntentType,
        seed: &SlotMap,
        priority: Priority,
        confidence: f64,
        focus: bool,
    ) -> WorkstreamId {
        self.next_sequence += 1;
        let id = WorkstreamId::from_sequence(self.next_sequence);
        let mut workstream = Workstream::new(id.clone(), intent_type);
        workstream.merge_slots(seed);

        let mut intent = TrackedIntent::new(workstream, priority, confidence);
        if !focus {
            intent.status = IntentStatus::Suspended;
        }
        self.intents.push(intent);
        if focus {
            self.focus_on(&id);
        }
        id
    }

    fn focus_on(&mut self, id: &WorkstreamId) {
        if let Some(current) = self.focus.clone() {
            if current != *id {
                for intent in &mut self.intents {
                    if intent.workstream.id == current && intent.status == IntentStatus::Active {
                        intent.status = IntentStatus::Suspended;
                    }
                }
            }
        }

        self.focus_clock += 1;
        let clock = self.focus_clock;
        if let Some(intent) = self.intents.iter_mut().find(|intent| intent.workstream.id == *id) {
            intent.status = IntentStatus::Active;
            intent.last_focused = clock;
            self.focus = Some(id.clone());
        }
    }

    fn reactivation_target(&self, intent_type: &IntentType, entities: &SlotMap) -> Option<WorkstreamId> {
        self.intents
            .iter()
            .filter(|intent| {
                intent.status == IntentStatus::Suspended
                    && intent.intent_type() == intent_type
                    && !slots::targets_conflict(&intent.workstream.slots, entities)
            })
            .max_by_key(|intent| intent.last_focused)
            .map(|intent| intent.workstream.id.clone())
    }

    fn resolve_into(
        &mut self,
        id: &WorkstreamId,
        entities: &SlotMap,
        resolver: &EntityResolver,
    ) -> Result<Vec<EntityConflict>, DomainError> {
        let intent = self.intent_mut(id)?;
        let answered = intent.workstream.awaiting_slot.take();
        let resolution = resolver.resolve_answering(
            &intent.workstream.slots,
            entities,
            MergeStrategy::Smart,
            answered.as_deref(),
        );
        intent.entity_history.extend(resolution.revisions);
        intent.workstream.slots = resolution.slots;
        Ok(resolution.conflicts)
    }

    fn raise_priority(&mut self, id: &WorkstreamId, priority: Priority) {
        if let Ok(intent) = self.intent_mut(id) {
            intent.priority = intent.priority.max(priority);
        }
    }

    fn set_status(&mut self, id: &WorkstreamId, status: IntentStatus) -> Result<(), DomainError> {
        self.intent_mut(id)?.status = status;
        Ok(())
    }

    fn require_focus(&self) -> Result<WorkstreamId, DomainError> {
        self.focus
            .clone()
            .ok_or_else(|| DomainError::InvariantViolation("no focused workstream".to_string()))
    }

    fn intent_mut(&mut self, id: &WorkstreamId) -> Result<&mut TrackedIntent, DomainError> {
        self.intents
            .iter_mut()
            .find(|intent| intent.workstream.id == *id)
            .ok_or_else(|| DomainError::UnknownWorkstream(id.clone()))
    }
}

/// Everything persisted between turns for one conversation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub session: Session,
    pub transcript: Transcript,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingDecision>,
    #[serde(default)]
    pub snapshots: SnapshotBuffer,
}

impl ConversationState {
    pub fn encode(&self) -> Result<String, ApplicationError> {
        serde_json::to_string(self).map_err(|error| {
            ApplicationError::Persistence(format!("failed to encode conversation state: {error}"))
        })
    }

    pub fn decode(serialized: &str) -> Result<Self, ApplicationError> {
        serde_json::from_str(serialized).map_err(|error| {
            ApplicationError::Persistence(format!("failed to decode conversation state: {error}"))
        })
    }
}
