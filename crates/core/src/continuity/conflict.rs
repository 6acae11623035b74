//! Entity conflict resolution driven by a swappable rule table.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::signals::{contains_phrase, tokenize};
use crate::intent::EntityRevision;
use crate::workstream::slots::{self, SlotMap, SPECIFICATIONS};

pub const DEFAULT_NARROWING_PHRASES: [&str; 7] =
    ["under", "below", "less than", "at most", "no more than", "max", "cheaper than"];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Incoming values overwrite everything.
    Replace,
    /// Lists union, scalars overwrite.
    Merge,
    /// Per-key rules from the table, falling back to `Merge`.
    #[default]
    Smart,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPolicy {
    UnionSpecifications,
    /// Adopt the new budget only when it narrows; otherwise keep and flag.
    NarrowingBudget,
    /// Adopt the new value but flag it; these keys usually signal a pivot.
    AdoptAndFlag,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityConflict {
    pub key: String,
    pub existing: Value,
    pub incoming: Value,
    pub resolved: Value,
    pub needs_clarification: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Resolution {
    pub slots: SlotMap,
    pub revisions: Vec<EntityRevision>,
    pub conflicts: Vec<EntityConflict>,
}

impl Resolution {
    pub fn flagged(&self) -> impl Iterator<Item = &EntityConflict> {
        self.conflicts.iter().filter(|conflict| conflict.needs_clarification)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConflictRules {
    pub key_policies: BTreeMap<String, KeyPolicy>,
    pub narrowing_phrases: Vec<String>,
    /// Treat a numerically smaller budget as narrowing even without a phrase.
    pub numeric_budget_narrowing: bool,
}

impl Default for ConflictRules {
    fn default() -> Self {
        let key_policies = [
            (SPECIFICATIONS, KeyPolicy::UnionSpecifications),
            ("budget", KeyPolicy::NarrowingBudget),
            ("category", KeyPolicy::AdoptAndFlag),
            ("subcategory", KeyPolicy::AdoptAndFlag),
            ("product", KeyPolicy::AdoptAndFlag),
        ]
        .into_iter()
        .map(|(key, policy)| (key.to_string(), policy))
        .collect();

        Self {
            key_policies,
            narrowing_phrases: DEFAULT_NARROWING_PHRASES.iter().map(|p| p.to_string()).collect(),
            numeric_budget_narrowing: false,
        }
    }
}

impl ConflictRules {
    pub fn with_numeric_budget_narrowing(mut self, enabled: bool) -> Self {
        self.numeric_budget_narrowing = enabled;
        self
    }

    pub fn policy_for(&self, key: &str) -> Option<KeyPolicy> {
        self.key_policies.get(key).copied()
    }

    pub fn is_narrowing(&self, existing: &Value, incoming: &Value) -> bool {
        let incoming_text = slots::value_text(incoming);
        let tokens = tokenize(&incoming_text);
        if self.narrowing_phrases.iter().any(|phrase| contains_phrase(&tokens, phrase)) {
            return true;
        }
        if !self.numeric_budget_narrowing {
            return false;
        }
        match (first_amount(&slots::value_text(existing)), first_amount(&incoming_text)) {
            (Some(before), Some(after)) => after < before,
            _ => false,
        }
    }
}

/// First number in `text`, honoring a trailing `k` for thousands.
pub fn first_amount(text: &str) -> Option<f64> {
    let start = text.find(|ch: char| ch.is_ascii_digit())?;
    let rest = &text[start..];
    let end = rest
        .find(|ch: char| !(ch.is_ascii_digit() || ch == '.' || ch == ','))
        .unwrap_or(rest.len());
    let amount: f64 = rest[..end].replace(',', "").trim_end_matches('.').parse().ok()?;
    let thousands = rest[end..].starts_with(|ch: char| ch == 'k' || ch == 'K');
    Some(if thousands { amount * 1000.0 } else { amount })
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct EntityResolver {
    rules: ConflictRules,
}

impl EntityResolver {
    pub fn new(rules: ConflictRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &ConflictRules {
        &self.rules
    }

    /// Pure resolution of `incoming` against `existing`; the caller records
    /// the revisions before installing the resolved slots.
    pub fn resolve(&self, existing: &SlotMap, incoming: &SlotMap, strategy: MergeStrategy) -> Resolution {
        self.resolve_answering(existing, incoming, strategy, None)
    }

    /// Like [`resolve`](Self::resolve), but `answered` names a key the user was
    /// just asked about; its incoming value replaces the old one unflagged.
    pub fn resolve_answering(
        &self,
        existing: &SlotMap,
        incoming: &SlotMap,
        strategy: MergeStrategy,
        answered: Option<&str>,
    ) -> Resolution {
        let mut resolution = Resolution { slots: existing.clone(), ..Resolution::default() };

        for (key, value) in incoming {
            if slots::is_empty_value(value) {
                continue;
            }
            let Some(current) = existing.get(key).filter(|current| !slots::is_empty_value(current))
            else {
                resolution.slots.insert(key.clone(), value.clone());
                continue;
            };
            if current == value {
                continue;
            }

            let (resolved, rule, flagged) = if answered == Some(key.as_str()) {
                (value.clone(), "answered", false)
            } else {
                self.decide(key, current, value, strategy)
            };
            if flagged || resolved != *current {
                resolution.conflicts.push(EntityConflict {
                    key: key.clone(),
                    existing: current.clone(),
                    incoming: value.clone(),
                    resolved: resolved.clone(),
                    needs_clarification: flagged,
                });
            }
            if resolved != *current {
                resolution.revisions.push(EntityRevision {
                    key: key.clone(),
                    previous: current.clone(),
                    incoming: value.clone(),
                    resolved: resolved.clone(),
                    rule: rule.to_string(),
                });
                resolution.slots.insert(key.clone(), resolved);
            }
        }

        resolution
    }

    fn decide(
        &self,
        key: &str,
        current: &Value,
        incoming: &Value,
        strategy: MergeStrategy,
    ) -> (Value, &'static str, bool) {
        match strategy {
            MergeStrategy::Replace => (incoming.clone(), "replace", false),
            MergeStrategy::Merge => (slots::merged_value(key, Some(current), incoming), "merge", false),
            MergeStrategy::Smart => match self.rules.policy_for(key) {
                Some(KeyPolicy::UnionSpecifications) => {
                    (slots::merge_specifications(current, incoming), "union_specifications", false)
                }
                Some(KeyPolicy::NarrowingBudget) if self.rules.is_narrowing(current, incoming) => {
                    (incoming.clone(), "narrowing_budget", false)
                }
                Some(KeyPolicy::NarrowingBudget) => (current.clone(), "keep_budget", true),
                Some(KeyPolicy::AdoptAndFlag) => (incoming.clone(), "adopt_and_flag", true),
                None => (slots::merged_value(key, Some(current), incoming), "merge", false),
            },
        }
    }
}
