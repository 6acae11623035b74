use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::continuity::ContextSwitchOption;
use crate::workstream::WorkstreamState;

/// The single externally observable result of a turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Ask {
        question: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        slot: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        options: Vec<ContextSwitchOption>,
    },
    ToolCall {
        name: String,
        #[serde(default)]
        params: Value,
    },
    Present {
        items: Vec<Value>,
        #[serde(default)]
        affordances: Vec<String>,
    },
    Commit {
        result: Value,
    },
    Info {
        message: String,
    },
}

impl Action {
    pub fn ask(question: impl Into<String>) -> Self {
        Self::Ask { question: question.into(), slot: None, options: Vec::new() }
    }

    pub fn ask_for_slot(question: impl Into<String>, slot: impl Into<String>) -> Self {
        Self::Ask { question: question.into(), slot: Some(slot.into()), options: Vec::new() }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::Info { message: message.into() }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ask { .. } => "ask",
            Self::ToolCall { .. } => "tool_call",
            Self::Present { .. } => "present",
            Self::Commit { .. } => "commit",
            Self::Info { .. } => "info",
        }
    }

    /// State a workstream moves to when an agent does not name one explicitly.
    pub fn implied_state(&self) -> Option<WorkstreamState> {
        match self {
            Self::Ask { .. } => Some(WorkstreamState::Collecting),
            Self::ToolCall { .. } => Some(WorkstreamState::Processing),
            Self::Present { .. } => Some(WorkstreamState::Presenting),
            Self::Commit { .. } => Some(WorkstreamState::Confirming),
            Self::Info { .. } => None,
        }
    }

    /// Human-readable text for transcripts.
    pub fn summary(&self) -> String {
        match self {
            Self::Ask { question, .. } => question.clone(),
            Self::ToolCall { name, .. } => format!("[tool call: {name}]"),
            Self::Present { items, .. } => format!("[presented {} item(s)]", items.len()),
            Self::Commit { result } => format!("[committed: {result}]"),
            Self::Info { message } => message.clone(),
        }
    }
}
