use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::session::Session;
use crate::transcript::Turn;

pub const DEFAULT_SNAPSHOT_CAPACITY: usize = 10;

/// Immutable point-in-time copy of orchestration state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub session: Session,
    pub recent_context: Vec<Turn>,
    pub description: String,
    pub taken_at: DateTime<Utc>,
}

/// Bounded undo stack; the oldest entry is evicted once capacity is reached.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotBuffer {
    capacity: usize,
    entries: VecDeque<Snapshot>,
}

impl Default for SnapshotBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SNAPSHOT_CAPACITY)
    }
}

impl SnapshotBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { capacity, entries: VecDeque::with_capacity(capacity) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, snapshot: Snapshot) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(snapshot);
    }

    pub fn descriptions(&self) -> Vec<&str> {
        self.entries.iter().map(|snapshot| snapshot.description.as_str()).collect()
    }

    pub fn into_entries(self) -> impl Iterator<Item = Snapshot> {
        self.entries.into_iter()
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.entries.back()
    }

    /// Removes and returns the snapshot `steps` back, discarding every newer one.
    pub fn rewind(&mut self, steps: usize) -> Result<Snapshot, DomainError> {
        if steps == 0 {
            return Err(DomainError::InvalidRollbackDepth);
        }
        let available = self.entries.len();
        if steps > available {
            return Err(DomainError::InsufficientSnapshots { requested: steps, available });
        }

        let index = available - steps;
        let restored = self.entries.drain(index..).next();
        restored.ok_or(DomainError::InsufficientSnapshots { requested: steps, available })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{Snapshot, SnapshotBuffer};
    use crate::errors::DomainError;
    use crate::session::Session;

    fn snapshot(description: &str) -> Snapshot {
        Snapshot {
            session: Session::default(),
            recent_context: Vec::new(),
            description: description.to_string(),
            taken_at: Utc::now(),
        }
    }

    #[test]
    fn buffer_keeps_only_most_recent_entries() {
        let mut buffer = SnapshotBuffer::with_capacity(3);
        for index in 0..7 {
            buffer.push(snapshot(&format!("step {index}")));
        }

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.descriptions(), vec!["step 4", "step 5", "step 6"]);
    }

    #[test]
    fn rewind_discards_newer_history() {
        let mut buffer = SnapshotBuffer::default();
        for name in ["a", "b", "c", "d"] {
            buffer.push(snapshot(name));
        }

        let restored = buffer.rewind(2).expect("two steps back");
        assert_eq!(restored.description, "c");
        assert_eq!(buffer.descriptions(), vec!["a", "b"]);
    }

    #[test]
    fn rewind_beyond_history_fails_without_mutation() {
        let mut buffer = SnapshotBuffer::default();
        buffer.push(snapshot("only"));

        assert_eq!(
            buffer.rewind(2),
            Err(DomainError::InsufficientSnapshots { requested: 2, available: 1 })
        );
        assert_eq!(buffer.rewind(0), Err(DomainError::InvalidRollbackDepth));
        assert_eq!(buffer.len(), 1);
    }
}
