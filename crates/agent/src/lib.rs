//! Conversation routing runtime.
//!
//! This crate wires the pure orchestration domain in `threadline-core` to its
//! async collaborators:
//! - `classifier` / `keywords` turn raw text into a `Classification`
//! - `gate` enforces per-intent confidence floors
//! - `registry` / `slot_filling` hold the per-intent agents
//! - `router` is the single per-turn entry point (`Planner::handle_turn`)
//! - `runtime` loads and saves sessions around each turn
//!
//! # Safety Principle
//!
//! The classifier is strictly a translator. It never moves workstreams or
//! decides continuity; those are deterministic decisions made by the core.

pub mod classifier;
pub mod conversation;
pub mod gate;
pub mod keywords;
pub mod registry;
pub mod router;
pub mod runtime;
pub mod slot_filling;
pub mod telemetry;
pub mod tools;

pub use classifier::{Classifier, LlmClassifier, LlmClient};
pub use conversation::{analyzer_policy, Conversation};
pub use keywords::KeywordClassifier;
pub use registry::{Agent, AgentContext, AgentOutput, AgentRegistry};
pub use router::Planner;
pub use runtime::AgentRuntime;
pub use slot_filling::{default_registry, default_tools, Goal, SlotFillingAgent};
