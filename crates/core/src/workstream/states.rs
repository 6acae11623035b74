use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkstreamState {
    New,
    Collecting,
    Ready,
    Processing,
    Presenting,
    AwaitingDecision,
    Confirming,
    Completed,
    Failed,
    Paused,
}

impl WorkstreamState {
    pub const ALL: [WorkstreamState; 10] = [
        Self::New,
        Self::Collecting,
        Self::Ready,
        Self::Processing,
        Self::Presenting,
        Self::AwaitingDecision,
        Self::Confirming,
        Self::Completed,
        Self::Failed,
        Self::Paused,
    ];

    /// Outgoing edges of the static transition table.
    pub fn successors(self) -> &'static [WorkstreamState] {
        use WorkstreamState::{
            AwaitingDecision, Collecting, Completed, Confirming, Failed, New, Paused, Presenting,
            Processing, Ready,
        };

        match self {
            New => &[Collecting, Failed],
            Collecting => &[Ready, Collecting, Failed],
            Ready => &[Processing, Presenting, Failed],
            Processing => &[Presenting, AwaitingDecision, Failed],
            Presenting => &[AwaitingDecision, Collecting, Failed],
            AwaitingDecision => &[Processing, Confirming, Collecting, Failed],
            Confirming => &[Completed, Failed, Collecting],
            Completed => &[],
            Failed => &[Collecting, Completed],
            Paused => &[Collecting, Ready, AwaitingDecision],
        }
    }

    pub fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Collecting => "COLLECTING",
            Self::Ready => "READY",
            Self::Processing => "PROCESSING",
            Self::Presenting => "PRESENTING",
            Self::AwaitingDecision => "AWAITING_DECISION",
            Self::Confirming => "CONFIRMING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Paused => "PAUSED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_uppercase();
        Self::ALL.into_iter().find(|state| state.as_str() == normalized)
    }
}

impl fmt::Display for WorkstreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid workstream transition from {from} to {to}")]
    InvalidTransition { from: WorkstreamState, to: WorkstreamState },
}

pub fn can_transition(current: WorkstreamState, target: WorkstreamState) -> bool {
    current.successors().contains(&target)
}

pub fn transition(
    current: WorkstreamState,
    target: WorkstreamState,
) -> Result<WorkstreamState, TransitionError> {
    if can_transition(current, target) {
        return Ok(target);
    }

    Err(TransitionError::InvalidTransition { from: current, to: target })
}

/// Validates a whole path without applying anything; returns the final state.
pub fn walk(
    current: WorkstreamState,
    path: &[WorkstreamState],
) -> Result<WorkstreamState, TransitionError> {
    path.iter().try_fold(current, |state, next| transition(state, *next))
}

/// Shortest legal path from `current` to `target`, excluding `current`.
pub fn route(current: WorkstreamState, target: WorkstreamState) -> Option<Vec<WorkstreamState>> {
    if current == target {
        return Some(Vec::new());
    }

    let mut previous: BTreeMap<WorkstreamState, WorkstreamState> = BTreeMap::new();
    let mut queue = VecDeque::from([current]);
    while let Some(state) = queue.pop_front() {
        for next in state.successors() {
            if *next == current || previous.contains_key(next) {
                continue;
            }
            previous.insert(*next, state);
            if *next == target {
                let mut path = vec![target];
                let mut cursor = target;
                while let Some(step) = previous.get(&cursor).copied() {
                    if step == current {
                        break;
                    }
                    path.push(step);
                    cursor = step;
                }
                path.reverse();
                return Some(path);
            }
            queue.push_back(*next);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::{can_transition, route, transition, walk, TransitionError, WorkstreamState};

    fn table_entry(state: WorkstreamState) -> &'static [&'static str] {
        match state {
            WorkstreamState::New => &["COLLECTING", "FAILED"],
            WorkstreamState::Collecting => &["READY", "COLLECTING", "FAILED"],
            WorkstreamState::Ready => &["PROCESSING", "PRESENTING", "FAILED"],
            WorkstreamState::Processing => &["PRESENTING", "AWAITING_DECISION", "FAILED"],
            WorkstreamState::Presenting => &["AWAITING_DECISION", "COLLECTING", "FAILED"],
            WorkstreamState::AwaitingDecision => {
                &["PROCESSING", "CONFIRMING", "COLLECTING", "FAILED"]
            }
            WorkstreamState::Confirming => &["COMPLETED", "FAILED", "COLLECTING"],
            WorkstreamState::Completed => &[],
            WorkstreamState::Failed => &["COLLECTING", "COMPLETED"],
            WorkstreamState::Paused => &["COLLECTING", "READY", "AWAITING_DECISION"],
        }
    }

    #[test]
    fn transition_matrix_matches_static_table() {
        for current in WorkstreamState::ALL {
            for target in WorkstreamState::ALL {
                let expected = table_entry(current).contains(&target.as_str());
                assert_eq!(
                    can_transition(current, target),
                    expected,
                    "{current} -> {target} should be {expected}"
                );
                assert_eq!(transition(current, target).is_ok(), expected);
            }
        }
    }

    #[test]
    fn completed_is_terminal() {
        assert!(WorkstreamState::Completed.is_terminal());
        for target in WorkstreamState::ALL {
            assert!(!can_transition(WorkstreamState::Completed, target));
        }
        assert_eq!(
            WorkstreamState::ALL.into_iter().filter(|state| state.is_terminal()).count(),
            1
        );
    }

    #[test]
    fn illegal_transition_fails_instead_of_clamping() {
        let error = transition(WorkstreamState::New, WorkstreamState::Presenting)
            .expect_err("new cannot jump to presenting");

        assert_eq!(
            error,
            TransitionError::InvalidTransition {
                from: WorkstreamState::New,
                to: WorkstreamState::Presenting
            }
        );
        assert!(error.to_string().contains("NEW to PRESENTING"));
    }

    #[test]
    fn failed_recovers_or_finishes() {
        assert_eq!(
            transition(WorkstreamState::Failed, WorkstreamState::Collecting),
            Ok(WorkstreamState::Collecting)
        );
        assert_eq!(
            transition(WorkstreamState::Failed, WorkstreamState::Completed),
            Ok(WorkstreamState::Completed)
        );
    }

    #[test]
    fn walk_stops_at_first_illegal_step() {
        let happy = walk(
            WorkstreamState::New,
            &[
                WorkstreamState::Collecting,
                WorkstreamState::Ready,
                WorkstreamState::Presenting,
                WorkstreamState::AwaitingDecision,
                WorkstreamState::Confirming,
                WorkstreamState::Completed,
            ],
        );
        assert_eq!(happy, Ok(WorkstreamState::Completed));

        let broken =
            walk(WorkstreamState::New, &[WorkstreamState::Collecting, WorkstreamState::Confirming]);
        assert!(matches!(
            broken,
            Err(TransitionError::InvalidTransition {
                from: WorkstreamState::Collecting,
                to: WorkstreamState::Confirming
            })
        ));
    }

    #[test]
    fn route_finds_shortest_legal_path() {
        use WorkstreamState::{
            AwaitingDecision, Collecting, Completed, Confirming, New, Paused, Presenting, Ready,
        };

        assert_eq!(route(New, Presenting), Some(vec![Collecting, Ready, Presenting]));
        assert_eq!(route(Presenting, Confirming), Some(vec![AwaitingDecision, Confirming]));
        assert_eq!(route(Ready, Ready), Some(Vec::new()));
        assert_eq!(route(Completed, Collecting), None);
        assert_eq!(route(New, Paused), None);

        let path = route(New, Completed).expect("completion is reachable from new");
        assert_eq!(walk(New, &path), Ok(Completed));
    }

    #[test]
    fn storage_encoding_round_trips() {
        for state in WorkstreamState::ALL {
            assert_eq!(WorkstreamState::parse(state.as_str()), Some(state));
        }
        assert_eq!(WorkstreamState::parse("awaiting_decision"), Some(WorkstreamState::AwaitingDecision));
        assert_eq!(WorkstreamState::parse("archived"), None);
    }
}
