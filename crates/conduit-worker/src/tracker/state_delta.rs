// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Record counts between consecutive source checkpoints.
//!
//! Each source checkpoint closes a delta: the records emitted since the
//! previous checkpoint. When the destination echoes a checkpoint, every
//! delta up to and including it is committed.

use conduit_core::catalog::StreamDescriptor;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

use crate::protocol::StateMessage;

pub type StateHash = [u8; 32];

/// Fingerprint of a checkpoint, independent of attached statistics.
pub fn state_hash(state: &StateMessage) -> StateHash {
    let payload = state.checkpoint_payload().to_string();
    Sha256::digest(payload.as_bytes()).into()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamCounts {
    pub records: i64,
    pub bytes: i64,
}

impl StreamCounts {
    pub fn add(&mut self, other: StreamCounts) {
        self.records += other.records;
        self.bytes += other.bytes;
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateDeltaError {
    #[error("More than {0} checkpoints are awaiting destination acknowledgement")]
    CapacityExceeded(usize),

    #[error("Destination acknowledged a checkpoint the source never emitted")]
    UnknownState,
}

#[derive(Debug)]
struct StateDelta {
    hash: StateHash,
    counts: HashMap<StreamDescriptor, StreamCounts>,
}

#[derive(Debug)]
pub struct StateDeltaTracker {
    max_pending: usize,
    pending: VecDeque<StateDelta>,
    committed: HashMap<StreamDescriptor, StreamCounts>,
}

impl StateDeltaTracker {
    pub fn new(max_pending: usize) -> Self {
        Self {
            max_pending,
            pending: VecDeque::new(),
            committed: HashMap::new(),
        }
    }

    pub fn add_state(
        &mut self,
        hash: StateHash,
        counts: HashMap<StreamDescriptor, StreamCounts>,
    ) -> Result<(), StateDeltaError> {
        if self.pending.len() >= self.max_pending {
            return Err(StateDeltaError::CapacityExceeded(self.max_pending));
        }
        self.pending.push_back(StateDelta { hash, counts });
        Ok(())
    }

    /// Commit every pending delta up to and including `hash`.
    pub fn commit_state_hash(&mut self, hash: &StateHash) -> Result<(), StateDeltaError> {
        let position = self
            .pending
            .iter()
            .position(|delta| &delta.hash == hash)
            .ok_or(StateDeltaError::UnknownState)?;

        for delta in self.pending.drain(..=position) {
            for (stream, counts) in delta.counts {
                self.committed.entry(stream).or_default().add(counts);
            }
        }
        Ok(())
    }

    pub fn committed(&self) -> &HashMap<StreamDescriptor, StreamCounts> {
        &self.committed
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Message;
    use serde_json::json;

    fn state(cursor: i64) -> StateMessage {
        match Message::stream_state("users", None, json!({"cursor": cursor})) {
            Message::State { state } => state,
            _ => unreachable!(),
        }
    }

    fn counts(records: i64) -> HashMap<StreamDescriptor, StreamCounts> {
        HashMap::from([(
            StreamDescriptor::new("users", None),
            StreamCounts {
                records,
                bytes: records * 10,
            },
        )])
    }

    #[test]
    fn test_commit_covers_skipped_acknowledgements() {
        let mut tracker = StateDeltaTracker::new(10);
        tracker.add_state(state_hash(&state(1)), counts(2)).unwrap();
        tracker.add_state(state_hash(&state(2)), counts(3)).unwrap();
        tracker.add_state(state_hash(&state(3)), counts(4)).unwrap();

        tracker.commit_state_hash(&state_hash(&state(2))).unwrap();

        let committed = tracker.committed()[&StreamDescriptor::new("users", None)];
        assert_eq!(committed, StreamCounts { records: 5, bytes: 50 });
        assert_eq!(tracker.pending_len(), 1);
    }

    #[test]
    fn test_unknown_hash_is_rejected() {
        let mut tracker = StateDeltaTracker::new(10);
        tracker.add_state(state_hash(&state(1)), counts(2)).unwrap();

        assert_eq!(
            tracker.commit_state_hash(&state_hash(&state(9))),
            Err(StateDeltaError::UnknownState)
        );
        assert!(tracker.committed().is_empty());
    }

    #[test]
    fn test_capacity_is_bounded() {
        let mut tracker = StateDeltaTracker::new(1);
        tracker.add_state(state_hash(&state(1)), counts(1)).unwrap();
        assert_eq!(
            tracker.add_state(state_hash(&state(2)), counts(1)),
            Err(StateDeltaError::CapacityExceeded(1))
        );
    }
}
