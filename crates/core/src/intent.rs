use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::continuity::ContinuityType;
use crate::workstream::{SlotMap, Workstream};

/// Business category a workstream serves. Case-insensitive, stored lowercase.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct IntentType(String);

impl IntentType {
    pub const UNKNOWN: &'static str = "unknown";

    pub fn new(value: impl AsRef<str>) -> Self {
        Self(value.as_ref().trim().to_ascii_lowercase())
    }

    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == Self::UNKNOWN
    }
}

impl From<String> for IntentType {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for IntentType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<IntentType> for String {
    fn from(value: IntentType) -> Self {
        value.0
    }
}

impl fmt::Display for IntentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentStatus {
    Active,
    Suspended,
    Completed,
    Abandoned,
}

impl IntentStatus {
    pub fn is_archived(self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Suspended => "SUSPENDED",
            Self::Completed => "COMPLETED",
            Self::Abandoned => "ABANDONED",
        }
    }
}

/// Ordered so that `Urgent` compares greatest.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Normal => "NORMAL",
            Self::High => "HIGH",
            Self::Urgent => "URGENT",
        }
    }
}

/// Relationship proposed by the external classifier. The analyzer has the final say.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProposedContinuity {
    #[serde(rename = "type")]
    pub kind: ContinuityType,
    #[serde(default = "full_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_clarification: Option<String>,
}

impl ProposedContinuity {
    pub fn new(kind: ContinuityType, reasoning: impl Into<String>) -> Self {
        Self { kind, confidence: 1.0, reasoning: reasoning.into(), suggested_clarification: None }
    }
}

fn full_confidence() -> f64 {
    1.0
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub intent_type: IntentType,
    pub confidence: f64,
    #[serde(default)]
    pub entities: SlotMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuity: Option<ProposedContinuity>,
}

impl Classification {
    pub fn new(intent_type: impl Into<IntentType>, confidence: f64) -> Self {
        Self {
            intent_type: intent_type.into(),
            confidence: confidence.clamp(0.0, 1.0),
            entities: SlotMap::new(),
            continuity: None,
        }
    }

    /// Conservative stand-in used when the classifier fails. The gate never
    /// passes an unknown intent, whatever its threshold.
    pub fn fallback() -> Self {
        Self::new(IntentType::unknown(), 0.0)
    }

    pub fn with_entity(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entities.insert(key.into(), value.into());
        self
    }

    pub fn with_continuity(mut self, continuity: ProposedContinuity) -> Self {
        self.continuity = Some(continuity);
        self
    }
}

/// One overwrite recorded before an entity value changed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityRevision {
    pub key: String,
    pub previous: Value,
    pub incoming: Value,
    pub resolved: Value,
    pub rule: String,
}

/// Continuity-layer view over a workstream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackedIntent {
    pub workstream: Workstream,
    pub status: IntentStatus,
    pub priority: Priority,
    pub confidence: f64,
    #[serde(default)]
    pub entity_history: Vec<EntityRevision>,
    /// Focus clock value from the last time this intent held focus.
    #[serde(default)]
    pub last_focused: u64,
}

impl TrackedIntent {
    pub fn new(workstream: Workstream, priority: Priority, confidence: f64) -> Self {
        Self {
            workstream,
            status: IntentStatus::Active,
            priority,
            confidence,
            entity_history: Vec::new(),
            last_focused: 0,
        }
    }

    pub fn intent_type(&self) -> &IntentType {
        &self.workstream.intent_type
    }

    pub fn is_archived(&self) -> bool {
        self.status.is_archived()
    }
}
