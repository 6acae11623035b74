use threadline_core::config::RoutingConfig;
use threadline_core::continuity::{
    AnalyzerPolicy, ConflictRules, ContinuityAnalyzer, EntityResolver, PendingDecision,
};
use threadline_core::session::{ConversationState, Session};
use threadline_core::transcript::Transcript;

/// Analyzer policy derived from the routing section of the configuration.
pub fn analyzer_policy(routing: &RoutingConfig) -> AnalyzerPolicy {
    let rules =
        ConflictRules::default().with_numeric_budget_narrowing(routing.numeric_budget_narrowing);
    AnalyzerPolicy {
        resolver: EntityResolver::new(rules),
        suppress_switch_clarification: routing.suppress_switch_clarification,
        snapshot_capacity: Some(routing.snapshot_capacity),
    }
}

/// All orchestration state owned by one session. Only the planner mutates it.
#[derive(Clone, Debug)]
pub struct Conversation {
    pub(crate) session_id: String,
    pub(crate) session: Session,
    pub(crate) transcript: Transcript,
    pub(crate) pending: Option<PendingDecision>,
    pub(crate) analyzer: ContinuityAnalyzer,
}

impl Conversation {
    pub fn new(session_id: impl Into<String>, policy: AnalyzerPolicy) -> Self {
        Self {
            session_id: session_id.into(),
            session: Session::default(),
            transcript: Transcript::default(),
            pending: None,
            analyzer: ContinuityAnalyzer::new(policy),
        }
    }

    pub fn from_state(
        session_id: impl Into<String>,
        state: ConversationState,
        policy: AnalyzerPolicy,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            session: state.session,
            transcript: state.transcript,
            pending: state.pending,
            analyzer: ContinuityAnalyzer::with_snapshots(policy, state.snapshots),
        }
    }

    pub fn to_state(&self) -> ConversationState {
        ConversationState {
            session: self.session.clone(),
            transcript: self.transcript.clone(),
            pending: self.pending.clone(),
            snapshots: self.analyzer.snapshots().clone(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn pending(&self) -> Option<&PendingDecision> {
        self.pending.as_ref()
    }

    pub fn analyzer(&self) -> &ContinuityAnalyzer {
        &self.analyzer
    }
}
