//! Relationship between a newly classified message and the focused intent.
//!
//! The external classifier may propose a relationship; the analyzer applies
//! the routing policy on top of it: urgency overrides everything, switches
//! and additions ask first, and continuations merge through the conflict
//! rules. Snapshots taken here back the undo stack.

pub mod conflict;
pub mod signals;
pub mod snapshot;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::intent::{Classification, IntentType, Priority, ProposedContinuity, TrackedIntent};
use crate::session::Session;
use crate::transcript::Turn;
use crate::workstream::slots::{self, SlotMap, TargetKind};

pub use conflict::{
    ConflictRules, EntityConflict, EntityResolver, KeyPolicy, MergeStrategy, Resolution,
};
pub use snapshot::{Snapshot, SnapshotBuffer, DEFAULT_SNAPSHOT_CAPACITY};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContinuityType {
    Continuation,
    IntentSwitch,
    ContextSwitch,
    Addition,
    Unclear,
}

impl ContinuityType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Continuation => "CONTINUATION",
            Self::IntentSwitch => "INTENT_SWITCH",
            Self::ContextSwitch => "CONTEXT_SWITCH",
            Self::Addition => "ADDITION",
            Self::Unclear => "UNCLEAR",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContextSwitchOption {
    Replace,
    Add,
    Compare,
    Separate,
}

impl ContextSwitchOption {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Replace => "REPLACE",
            Self::Add => "ADD",
            Self::Compare => "COMPARE",
            Self::Separate => "SEPARATE",
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::Replace => "'replace' to switch to the new request",
            Self::Add => "'add' to handle both",
            Self::Compare => "'compare' to compare them",
            Self::Separate => "'separate' to keep the new one for later",
        }
    }
}

/// What the session multiplexer should do with a decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    StartNew,
    Continue,
    Replace,
    Add,
    Compare,
    Separate,
    Clarify,
}

impl RecommendedAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StartNew => "start_new",
            Self::Continue => "continue",
            Self::Replace => "replace",
            Self::Add => "add",
            Self::Compare => "compare",
            Self::Separate => "separate",
            Self::Clarify => "clarify",
        }
    }

    fn option(self) -> Option<ContextSwitchOption> {
        match self {
            Self::Replace => Some(ContextSwitchOption::Replace),
            Self::Add => Some(ContextSwitchOption::Add),
            Self::Compare => Some(ContextSwitchOption::Compare),
            Self::Separate => Some(ContextSwitchOption::Separate),
            Self::StartNew | Self::Continue | Self::Clarify => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContinuityAnalysis {
    #[serde(rename = "type")]
    pub kind: ContinuityType,
    pub confidence: f64,
    pub reasoning: String,
    pub requires_clarification: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_clarification: Option<String>,
    #[serde(default)]
    pub context_switch_options: Vec<ContextSwitchOption>,
    pub urgency_detected: bool,
    pub priority_level: Priority,
    pub recommended_action: RecommendedAction,
}

impl ContinuityAnalysis {
    fn decided(
        kind: ContinuityType,
        action: RecommendedAction,
        confidence: f64,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            confidence,
            reasoning: reasoning.into(),
            requires_clarification: false,
            suggested_clarification: None,
            context_switch_options: Vec::new(),
            urgency_detected: false,
            priority_level: Priority::Normal,
            recommended_action: action,
        }
    }

    fn clarify(mut self, prompt: String) -> Self {
        self.requires_clarification = true;
        self.suggested_clarification = Some(prompt);
        self.recommended_action = RecommendedAction::Clarify;
        self
    }

    /// Copy of this analysis with the user's clarification applied.
    pub fn resolved(&self, action: RecommendedAction) -> Self {
        let mut resolved = self.clone();
        resolved.requires_clarification = false;
        resolved.recommended_action = action;
        resolved
    }
}

/// A clarification question awaiting the user's answer on the next turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingDecision {
    pub analysis: ContinuityAnalysis,
    pub classification: Classification,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClarificationOutcome {
    Resolved(RecommendedAction),
    Reask(String),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AnalyzerPolicy {
    pub resolver: EntityResolver,
    pub suppress_switch_clarification: bool,
    pub snapshot_capacity: Option<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct ContinuityAnalyzer {
    policy: AnalyzerPolicy,
    snapshots: SnapshotBuffer,
}

impl ContinuityAnalyzer {
    pub fn new(policy: AnalyzerPolicy) -> Self {
        let snapshots = SnapshotBuffer::with_capacity(
            policy.snapshot_capacity.unwrap_or(DEFAULT_SNAPSHOT_CAPACITY),
        );
        Self { policy, snapshots }
    }

    /// Rebuilds an analyzer around a persisted undo stack.
    pub fn with_snapshots(policy: AnalyzerPolicy, snapshots: SnapshotBuffer) -> Self {
        let mut analyzer = Self::new(policy);
        for snapshot in snapshots.into_entries() {
            analyzer.snapshots.push(snapshot);
        }
        analyzer
    }

    pub fn policy(&self) -> &AnalyzerPolicy {
        &self.policy
    }

    pub fn resolver(&self) -> &EntityResolver {
        &self.policy.resolver
    }

    pub fn snapshots(&self) -> &SnapshotBuffer {
        &self.snapshots
    }

    pub fn analyze(
        &self,
        previous: Option<&TrackedIntent>,
        classification: &Classification,
        message: &str,
    ) -> ContinuityAnalysis {
        let urgency = signals::detect_urgency(message);

        let Some(previous) = previous else {
            let mut analysis = ContinuityAnalysis::decided(
                ContinuityType::Continuation,
                RecommendedAction::StartNew,
                1.0,
                "no focused intent; starting a new workstream",
            );
            if let Some(priority) = urgency {
                analysis.urgency_detected = true;
                analysis.priority_level = priority;
            }
            return analysis;
        };

        if let Some(priority) = urgency {
            let mut analysis = ContinuityAnalysis::decided(
                ContinuityType::Addition,
                RecommendedAction::Add,
                1.0,
                format!(
                    "urgent request; suspending {} and handling {} first",
                    previous.intent_type(),
                    classification.intent_type
                ),
            );
            analysis.urgency_detected = true;
            analysis.priority_level = priority;
            return analysis;
        }

        let proposal = classification
            .continuity
            .clone()
            .unwrap_or_else(|| derive_proposal(previous, classification));
        let suppress = self.policy.suppress_switch_clarification;
        let base = ContinuityAnalysis::decided(
            proposal.kind,
            RecommendedAction::Continue,
            proposal.confidence.clamp(0.0, 1.0),
            proposal.reasoning.clone(),
        );

        match proposal.kind {
            ContinuityType::Continuation => base,
            ContinuityType::IntentSwitch => {
                if suppress {
                    return ContinuityAnalysis { recommended_action: RecommendedAction::Replace, ..base };
                }
                let prompt = proposal
                    .suggested_clarification
                    .unwrap_or_else(|| intent_switch_prompt(previous.intent_type(), &classification.intent_type));
                base.clarify(prompt)
            }
            ContinuityType::ContextSwitch => {
                let options = relevant_options(&previous.workstream.slots, &classification.entities);
                let analysis = ContinuityAnalysis { context_switch_options: options, ..base };
                if suppress {
                    return ContinuityAnalysis {
                        recommended_action: RecommendedAction::Replace,
                        ..analysis
                    };
                }
                let prompt = proposal.suggested_clarification.unwrap_or_else(|| {
                    context_switch_prompt(&previous.workstream.slots, &classification.entities)
                });
                analysis.clarify(prompt)
            }
            ContinuityType::Addition => {
                let prompt = proposal.suggested_clarification.unwrap_or_else(|| {
                    addition_prompt(previous.intent_type(), &classification.intent_type)
                });
                base.clarify(prompt)
            }
            ContinuityType::Unclear => {
                let prompt = proposal.suggested_clarification.unwrap_or_else(|| {
                    format!(
                        "I'm not sure whether that relates to your current {} request. \
                         Should I continue with it or start something new?",
                        previous.intent_type()
                    )
                });
                base.clarify(prompt)
            }
        }
    }

    /// Resolves `incoming` into the intent's slots, logging overwrites first.
    pub fn update_entities(
        &self,
        intent: &mut TrackedIntent,
        incoming: &SlotMap,
        strategy: MergeStrategy,
    ) -> Vec<EntityConflict> {
        let resolution = self.policy.resolver.resolve(&intent.workstream.slots, incoming, strategy);
        intent.entity_history.extend(resolution.revisions);
        intent.workstream.slots = resolution.slots;
        resolution.conflicts
    }

    pub fn resolve_clarification(&self, pending: &PendingDecision, reply: &str) -> ClarificationOutcome {
        let analysis = &pending.analysis;
        let Some(action) = parse_reply(reply, analysis.kind) else {
            return ClarificationOutcome::Reask(reask_prompt(analysis));
        };

        let offered = match analysis.kind {
            ContinuityType::ContextSwitch => match action.option() {
                Some(option) => analysis.context_switch_options.contains(&option),
                None => true,
            },
            _ => !matches!(action, RecommendedAction::Compare | RecommendedAction::Separate),
        };
        if offered {
            ClarificationOutcome::Resolved(action)
        } else {
            ClarificationOutcome::Reask(reask_prompt(analysis))
        }
    }

    pub fn snapshot(&mut self, session: &Session, recent_context: Vec<Turn>, description: impl Into<String>) {
        self.snapshots.push(Snapshot {
            session: session.clone(),
            recent_context,
            description: description.into(),
            taken_at: Utc::now(),
        });
    }

    pub fn rollback(&mut self, steps: usize) -> Result<Snapshot, DomainError> {
        self.snapshots.rewind(steps)
    }
}

fn derive_proposal(previous: &TrackedIntent, classification: &Classification) -> ProposedContinuity {
    if classification.intent_type != *previous.intent_type() {
        return ProposedContinuity::new(
            ContinuityType::IntentSwitch,
            format!("intent changed from {} to {}", previous.intent_type(), classification.intent_type),
        );
    }
    if slots::targets_conflict(&previous.workstream.slots, &classification.entities) {
        return ProposedContinuity::new(
            ContinuityType::ContextSwitch,
            format!(
                "same {} intent but the target moved from {} to {}",
                classification.intent_type,
                slots::describe_target(&previous.workstream.slots),
                slots::describe_target(&classification.entities)
            ),
        );
    }
    ProposedContinuity::new(ContinuityType::Continuation, "same intent and target")
}

/// Options that make sense for the two targets; REPLACE and ADD always do.
pub fn relevant_options(existing: &SlotMap, incoming: &SlotMap) -> Vec<ContextSwitchOption> {
    let mut options = vec![ContextSwitchOption::Replace, ContextSwitchOption::Add];
    let before = slots::target_of(existing);
    let after = slots::target_of(incoming);

    let both_products = matches!(
        (&before, &after),
        (Some(a), Some(b)) if a.kind == TargetKind::Product && b.kind == TargetKind::Product
    );
    if both_products {
        options.push(ContextSwitchOption::Compare);
    }

    let kinds_differ = matches!((&before, &after), (Some(a), Some(b)) if a.kind != b.kind);
    let categories_differ = match (existing.get("category"), incoming.get("category")) {
        (Some(a), Some(b)) if !slots::is_empty_value(a) && !slots::is_empty_value(b) => {
            slots::value_text(a).to_ascii_lowercase() != slots::value_text(b).to_ascii_lowercase()
        }
        _ => false,
    };
    if kinds_differ || categories_differ {
        options.push(ContextSwitchOption::Separate);
    }

    options
}

fn intent_switch_prompt(previous: &IntentType, next: &IntentType) -> String {
    format!(
        "I see you were working on a {previous} request but now want help with {next}. \
         Should I switch to the new request or continue with the current one?"
    )
}

fn context_switch_prompt(existing: &SlotMap, incoming: &SlotMap) -> String {
    format!(
        "I see you were working on {} but now mention {}. Should I switch focus or do you want both?",
        slots::describe_target(existing),
        slots::describe_target(incoming)
    )
}

fn addition_prompt(previous: &IntentType, next: &IntentType) -> String {
    format!(
        "Do you want to handle this new {next} request in addition to your current {previous} request?"
    )
}

fn reask_prompt(analysis: &ContinuityAnalysis) -> String {
    if analysis.context_switch_options.is_empty() {
        return "I didn't understand. Please say 'continue' to keep the current request, \
                'switch' to move to the new one, or 'both' to handle both."
            .to_string();
    }
    let choices: Vec<&str> =
        analysis.context_switch_options.iter().map(|option| option.describe()).collect();
    format!(
        "I didn't understand. Please say 'continue' to keep the current request, or {}.",
        choices.join(", ")
    )
}

fn parse_reply(reply: &str, kind: ContinuityType) -> Option<RecommendedAction> {
    if signals::is_rollback_request(reply) {
        return Some(RecommendedAction::Continue);
    }

    let tokens = signals::tokenize(reply);
    let has = |words: &[&str]| words.iter().any(|word| signals::contains_phrase(&tokens, word));

    if has(&["compare", "comparison"]) {
        return Some(RecommendedAction::Compare);
    }
    if has(&["separate", "separately", "later"]) {
        return Some(RecommendedAction::Separate);
    }
    if has(&["continue", "keep", "same", "current", "stay"]) {
        return Some(RecommendedAction::Continue);
    }
    if has(&["switch", "new", "change", "replace", "instead", "different"]) {
        return Some(RecommendedAction::Replace);
    }
    if has(&["both", "add", "also", "too"]) {
        return Some(RecommendedAction::Add);
    }
    if has(&["yes", "yeah", "yep", "sure", "ok", "okay"]) {
        return match kind {
            ContinuityType::IntentSwitch | ContinuityType::ContextSwitch => {
                Some(RecommendedAction::Replace)
            }
            ContinuityType::Addition => Some(RecommendedAction::Add),
            ContinuityType::Continuation => Some(RecommendedAction::Continue),
            ContinuityType::Unclear => None,
        };
    }
    if has(&["no", "nope", "nah"]) {
        return Some(RecommendedAction::Continue);
    }
    None
}
