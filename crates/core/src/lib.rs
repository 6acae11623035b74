pub mod action;
pub mod audit;
pub mod config;
pub mod continuity;
pub mod errors;
pub mod intent;
pub mod session;
pub mod transcript;
pub mod workstream;

pub use action::Action;
pub use continuity::{
    ClarificationOutcome, ContextSwitchOption, ContinuityAnalysis, ContinuityAnalyzer,
    ContinuityType, PendingDecision, RecommendedAction,
};
pub use errors::{ApplicationError, DomainError};
pub use intent::{Classification, IntentStatus, IntentType, Priority, TrackedIntent};
pub use session::{ConversationState, Session, SessionStore};
pub use transcript::{Transcript, Turn};
pub use workstream::{SlotMap, TransitionError, Workstream, WorkstreamId, WorkstreamState};
