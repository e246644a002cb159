// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Folds checkpoints into the state a later attempt resumes from.
//!
//! Per-stream checkpoints are kept per stream, so the result holds the
//! latest checkpoint of every stream. A global or legacy checkpoint
//! replaces everything.

use conduit_core::catalog::StreamDescriptor;
use conduit_core::output::State;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

use crate::protocol::{StateMessage, StateType};

#[derive(Debug, Default)]
pub struct StateAggregator {
    single: Option<StateMessage>,
    streams: BTreeMap<StreamDescriptor, StateMessage>,
}

impl StateAggregator {
    pub fn ingest(&mut self, state: &StateMessage) {
        let mut state = state.clone();
        state.source_stats = None;
        state.destination_stats = None;

        match state.state_type {
            StateType::Stream => {
                let Some(descriptor) = state.stream.as_ref().map(|s| s.stream_descriptor.clone())
                else {
                    warn!("Ignoring STREAM checkpoint without a stream descriptor");
                    return;
                };
                self.single = None;
                self.streams.insert(descriptor, state);
            }
            StateType::Global | StateType::Legacy => {
                self.streams.clear();
                self.single = Some(state);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.single.is_none() && self.streams.is_empty()
    }

    /// Aggregated state, if any checkpoint was seen.
    ///
    /// Legacy checkpoints yield their raw payload; the other kinds yield a
    /// list of state messages.
    pub fn aggregated(&self) -> Option<State> {
        if let Some(single) = &self.single {
            return match single.state_type {
                StateType::Legacy => Some(State::new(single.data.clone().unwrap_or(Value::Null))),
                _ => serde_json::to_value([single]).ok().map(State::new),
            };
        }
        if self.streams.is_empty() {
            return None;
        }
        let states: Vec<&StateMessage> = self.streams.values().collect();
        serde_json::to_value(states).ok().map(State::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Message;
    use serde_json::json;

    fn state(message: Message) -> StateMessage {
        match message {
            Message::State { state } => state,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_keeps_latest_checkpoint_per_stream() {
        let mut aggregator = StateAggregator::default();
        aggregator.ingest(&state(Message::stream_state("users", None, json!({"c": 1}))));
        aggregator.ingest(&state(Message::stream_state("orders", None, json!({"c": 5}))));
        aggregator.ingest(&state(Message::stream_state("users", None, json!({"c": 2}))));

        let aggregated = aggregator.aggregated().unwrap().state;
        let states = aggregated.as_array().unwrap();
        assert_eq!(states.len(), 2);
        assert_eq!(states[0]["stream"]["stream_descriptor"]["name"], json!("orders"));
        assert_eq!(states[1]["stream"]["stream_state"], json!({"c": 2}));
    }

    #[test]
    fn test_legacy_replaces_everything() {
        let mut aggregator = StateAggregator::default();
        assert!(aggregator.aggregated().is_none());
        aggregator.ingest(&state(Message::stream_state("users", None, json!({"c": 1}))));
        aggregator.ingest(&state(Message::legacy_state(json!({"cursor": 9}))));

        assert_eq!(aggregator.aggregated().unwrap().state, json!({"cursor": 9}));
    }

    #[test]
    fn test_stats_are_stripped() {
        let mut message = state(Message::global_state(json!({"lsn": 4}), vec![]));
        message.source_stats = Some(crate::protocol::StateStats {
            record_count: Some(3.0),
        });
        let mut aggregator = StateAggregator::default();
        aggregator.ingest(&message);

        let aggregated = aggregator.aggregated().unwrap().state;
        assert!(aggregated[0].get("source_stats").is_none());
        assert_eq!(aggregated[0]["global"]["shared_state"], json!({"lsn": 4}));
    }
}
