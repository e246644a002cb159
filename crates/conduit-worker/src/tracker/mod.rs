// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Message tracking for a replication attempt.
//!
//! The tracker sees every message the worker reads from either side:
//!
//! - records: emitted counts and bytes per stream
//! - source checkpoints: close a state delta (see [`state_delta`])
//! - destination checkpoints: commit deltas, so committed counts never
//!   exceed what the destination acknowledged
//! - error traces: kept per side for failure classification
//! - estimate traces: expected volume per stream or for the whole sync
//!
//! All state sits behind one mutex; [`MessageTracker::snapshot`] reads it
//! under a single lock so emitted and committed figures are consistent.

pub mod state_aggregator;
pub mod state_delta;

use conduit_core::catalog::StreamDescriptor;
use conduit_core::output::{FailureOrigin, State};
use std::collections::{BTreeMap, HashMap};
use std::mem;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::warn;

use crate::protocol::{EstimateType, Message, RecordMessage, TraceMessage, TraceType};
use state_aggregator::StateAggregator;
use state_delta::{StateDeltaError, StateDeltaTracker, StreamCounts, state_hash};

/// Checkpoints that may await acknowledgement before committed counts are
/// given up on.
pub const DEFAULT_MAX_PENDING_STATES: usize = 100_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error(
        "Source emitted both stream and sync estimates; a source may only emit one kind"
    )]
    MixedEstimates,
}

impl TrackerError {
    pub fn origin(&self) -> FailureOrigin {
        FailureOrigin::Replication
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Estimate {
    pub records: Option<i64>,
    pub bytes: Option<i64>,
}

#[derive(Debug, Default)]
struct TrackerState {
    records_emitted: HashMap<StreamDescriptor, StreamCounts>,
    since_last_state: HashMap<StreamDescriptor, StreamCounts>,
    deltas: Option<StateDeltaTracker>,
    committed_unreliable: bool,
    source_state_messages: i64,
    destination_state_messages: i64,
    source_errors: Vec<TraceMessage>,
    destination_errors: Vec<TraceMessage>,
    stream_estimates: HashMap<StreamDescriptor, Estimate>,
    sync_estimate: Option<Estimate>,
    source_states: StateAggregator,
    destination_states: StateAggregator,
}

/// Point-in-time counters of one stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamTotals {
    pub records_emitted: i64,
    pub bytes_emitted: i64,
    pub records_committed: Option<i64>,
    pub bytes_committed: Option<i64>,
    pub estimate: Option<Estimate>,
}

/// Consistent copy of everything the tracker knows.
#[derive(Debug, Clone, Default)]
pub struct TrackerSnapshot {
    pub streams: BTreeMap<StreamDescriptor, StreamTotals>,
    pub total_records_emitted: i64,
    pub total_bytes_emitted: i64,
    /// `None` when committed counts are unreliable.
    pub total_records_committed: Option<i64>,
    pub total_bytes_committed: Option<i64>,
    pub source_state_messages: i64,
    pub destination_state_messages: i64,
    pub estimate: Option<Estimate>,
    pub source_state: Option<State>,
    pub destination_state: Option<State>,
}

pub struct MessageTracker {
    inner: Mutex<TrackerState>,
}

impl Default for MessageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageTracker {
    pub fn new() -> Self {
        Self::with_max_pending_states(DEFAULT_MAX_PENDING_STATES)
    }

    pub fn with_max_pending_states(max_pending: usize) -> Self {
        Self {
            inner: Mutex::new(TrackerState {
                deltas: Some(StateDeltaTracker::new(max_pending)),
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a message read from the source, before it reaches the destination.
    pub fn accept_from_source(&self, message: &Message) -> Result<(), TrackerError> {
        let mut state = self.lock();
        match message {
            Message::Record { record } => state.track_record(record),
            Message::State { state: checkpoint } => {
                state.source_state_messages += 1;
                state.source_states.ingest(checkpoint);
                let counts = mem::take(&mut state.since_last_state);
                let added = match state.deltas.as_mut() {
                    Some(deltas) => deltas.add_state(state_hash(checkpoint), counts),
                    None => Ok(()),
                };
                if let Err(e) = added {
                    state.give_up_committed(e);
                }
            }
            Message::Trace { trace } => match trace.trace_type {
                TraceType::Error => state.source_errors.push(trace.clone()),
                TraceType::Estimate => state.track_estimate(trace)?,
            },
            Message::Control { .. } | Message::Log { .. } => {}
        }
        Ok(())
    }

    /// Record a message the destination emitted.
    pub fn accept_from_destination(&self, message: &Message) -> Result<(), TrackerError> {
        let mut state = self.lock();
        match message {
            Message::State { state: checkpoint } => {
                state.destination_state_messages += 1;
                state.destination_states.ingest(checkpoint);
                let committed = match state.deltas.as_mut() {
                    Some(deltas) => deltas.commit_state_hash(&state_hash(checkpoint)),
                    None => Ok(()),
                };
                if let Err(e) = committed {
                    state.give_up_committed(e);
                }
            }
            Message::Trace { trace } if trace.trace_type == TraceType::Error => {
                state.destination_errors.push(trace.clone());
            }
            _ => {}
        }
        Ok(())
    }

    /// Earliest error trace from either side.
    pub fn first_error_trace(&self) -> Option<(FailureOrigin, TraceMessage)> {
        let state = self.lock();
        let source = state.source_errors.first();
        let destination = state.destination_errors.first();
        match (source, destination) {
            (Some(s), Some(d)) if d.emitted_at < s.emitted_at => {
                Some((FailureOrigin::Destination, d.clone()))
            }
            (Some(s), _) => Some((FailureOrigin::Source, s.clone())),
            (None, Some(d)) => Some((FailureOrigin::Destination, d.clone())),
            (None, None) => None,
        }
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        let state = self.lock();
        let committed = if state.committed_unreliable {
            None
        } else {
            state.deltas.as_ref().map(|d| d.committed())
        };

        let mut streams: BTreeMap<StreamDescriptor, StreamTotals> = BTreeMap::new();
        for (stream, counts) in &state.records_emitted {
            let totals = streams.entry(stream.clone()).or_default();
            totals.records_emitted = counts.records;
            totals.bytes_emitted = counts.bytes;
        }
        if let Some(committed) = committed {
            for (stream, counts) in committed {
                let totals = streams.entry(stream.clone()).or_default();
                totals.records_committed = Some(counts.records);
                totals.bytes_committed = Some(counts.bytes);
            }
            for totals in streams.values_mut() {
                totals.records_committed.get_or_insert(0);
                totals.bytes_committed.get_or_insert(0);
            }
        }
        for (stream, estimate) in &state.stream_estimates {
            streams.entry(stream.clone()).or_default().estimate = Some(*estimate);
        }

        let estimate = state.sync_estimate.or_else(|| {
            (!state.stream_estimates.is_empty()).then(|| Estimate {
                records: sum_known(state.stream_estimates.values().map(|e| e.records)),
                bytes: sum_known(state.stream_estimates.values().map(|e| e.bytes)),
            })
        });

        TrackerSnapshot {
            total_records_emitted: state.records_emitted.values().map(|c| c.records).sum(),
            total_bytes_emitted: state.records_emitted.values().map(|c| c.bytes).sum(),
            total_records_committed: committed.map(|c| c.values().map(|c| c.records).sum()),
            total_bytes_committed: committed.map(|c| c.values().map(|c| c.bytes).sum()),
            source_state_messages: state.source_state_messages,
            destination_state_messages: state.destination_state_messages,
            estimate,
            source_state: state.source_states.aggregated(),
            destination_state: state.destination_states.aggregated(),
            streams,
        }
    }
}

impl TrackerState {
    fn track_record(&mut self, record: &RecordMessage) {
        let counts = StreamCounts {
            records: 1,
            bytes: record.data.to_string().len() as i64,
        };
        let stream = record.descriptor();
        self.records_emitted.entry(stream.clone()).or_default().add(counts);
        if self.deltas.is_some() {
            self.since_last_state.entry(stream).or_default().add(counts);
        }
    }

    fn track_estimate(&mut self, trace: &TraceMessage) -> Result<(), TrackerError> {
        let Some(estimate) = &trace.estimate else {
            return Ok(());
        };
        let value = Estimate {
            records: estimate.row_estimate,
            bytes: estimate.byte_estimate,
        };
        match estimate.estimate_type {
            EstimateType::Stream => {
                if self.sync_estimate.is_some() {
                    return Err(TrackerError::MixedEstimates);
                }
                let stream = StreamDescriptor::new(&estimate.name, estimate.namespace.as_deref());
                self.stream_estimates.insert(stream, value);
            }
            EstimateType::Sync => {
                if !self.stream_estimates.is_empty() {
                    return Err(TrackerError::MixedEstimates);
                }
                self.sync_estimate = Some(value);
            }
        }
        Ok(())
    }

    /// Stop tracking deltas; committed counts will be reported as unknown.
    fn give_up_committed(&mut self, error: StateDeltaError) {
        warn!(error = %error, "Committed record counts are unreliable for this attempt");
        self.committed_unreliable = true;
        self.deltas = None;
        self.since_last_state.clear();
    }
}

fn sum_known(values: impl Iterator<Item = Option<i64>>) -> Option<i64> {
    values.fold(None, |acc, v| match (acc, v) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::EstimateTrace;
    use serde_json::json;

    fn users() -> StreamDescriptor {
        StreamDescriptor::new("users", None)
    }

    fn estimate(estimate_type: EstimateType, name: &str, rows: i64) -> Message {
        Message::Trace {
            trace: TraceMessage {
                trace_type: TraceType::Estimate,
                emitted_at: 1.0,
                error: None,
                estimate: Some(EstimateTrace {
                    estimate_type,
                    name: name.to_string(),
                    namespace: None,
                    row_estimate: Some(rows),
                    byte_estimate: None,
                }),
            },
        }
    }

    #[test]
    fn test_committed_follows_destination_acknowledgements() {
        let tracker = MessageTracker::new();
        let first = Message::stream_state("users", None, json!({"c": 1}));
        let second = Message::stream_state("users", None, json!({"c": 2}));

        tracker.accept_from_source(&Message::record("users", None, json!({"id": 1}))).unwrap();
        tracker.accept_from_source(&Message::record("users", None, json!({"id": 2}))).unwrap();
        tracker.accept_from_source(&first).unwrap();
        tracker.accept_from_source(&Message::record("users", None, json!({"id": 3}))).unwrap();
        tracker.accept_from_source(&second).unwrap();
        tracker.accept_from_destination(&first).unwrap();

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.total_records_emitted, 3);
        assert_eq!(snapshot.total_records_committed, Some(2));
        assert_eq!(snapshot.streams[&users()].records_committed, Some(2));
        assert_eq!(snapshot.source_state_messages, 2);
        assert_eq!(snapshot.destination_state_messages, 1);
        assert_eq!(
            snapshot.destination_state.unwrap().state[0]["stream"]["stream_state"],
            json!({"c": 1})
        );
    }

    #[test]
    fn test_unknown_acknowledgement_makes_committed_unreliable() {
        let tracker = MessageTracker::new();
        tracker.accept_from_source(&Message::record("users", None, json!({}))).unwrap();
        tracker
            .accept_from_destination(&Message::legacy_state(json!({"never": "sent"})))
            .unwrap();

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.total_records_committed, None);
        assert_eq!(snapshot.streams[&users()].records_committed, None);
    }

    #[test]
    fn test_pending_limit_makes_committed_unreliable() {
        let tracker = MessageTracker::with_max_pending_states(1);
        tracker.accept_from_source(&Message::legacy_state(json!({"c": 1}))).unwrap();
        tracker.accept_from_source(&Message::legacy_state(json!({"c": 2}))).unwrap();

        assert_eq!(tracker.snapshot().total_records_committed, None);
    }

    #[test]
    fn test_mixed_estimates_are_rejected() {
        let tracker = MessageTracker::new();
        tracker.accept_from_source(&estimate(EstimateType::Stream, "users", 10)).unwrap();
        tracker.accept_from_source(&estimate(EstimateType::Stream, "orders", 5)).unwrap();
        assert_eq!(tracker.snapshot().estimate.unwrap().records, Some(15));

        let error = tracker
            .accept_from_source(&estimate(EstimateType::Sync, "", 100))
            .unwrap_err();
        assert_eq!(error, TrackerError::MixedEstimates);
        assert_eq!(error.origin(), FailureOrigin::Replication);
    }

    #[test]
    fn test_first_error_trace_prefers_earliest() {
        let tracker = MessageTracker::new();
        let mut late = Message::error_trace("source broke", None);
        let mut early = Message::error_trace("destination broke", None);
        if let Message::Trace { trace } = &mut late {
            trace.emitted_at = 200.0;
        }
        if let Message::Trace { trace } = &mut early {
            trace.emitted_at = 100.0;
        }
        tracker.accept_from_source(&late).unwrap();
        tracker.accept_from_destination(&early).unwrap();

        let (origin, trace) = tracker.first_error_trace().unwrap();
        assert_eq!(origin, FailureOrigin::Destination);
        assert_eq!(trace.error.unwrap().message, "destination broke");
    }
}
