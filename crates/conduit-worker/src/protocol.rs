// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Connector protocol messages.
//!
//! Connectors exchange one JSON object per line, tagged by `type`:
//!
//! ```json
//! {"type":"RECORD","record":{"stream":"users","data":{"id":1},"emitted_at":1700000000000}}
//! {"type":"STATE","state":{"type":"STREAM","stream":{"stream_descriptor":{"name":"users"},"stream_state":{"cursor":1}}}}
//! ```

use conduit_core::catalog::StreamDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    Record { record: RecordMessage },
    State { state: StateMessage },
    Trace { trace: TraceMessage },
    Control { control: ControlMessage },
    Log { log: LogMessage },
}

impl Message {
    pub fn record(stream: &str, namespace: Option<&str>, data: Value) -> Self {
        Message::Record {
            record: RecordMessage {
                stream: stream.to_string(),
                namespace: namespace.map(str::to_string),
                data,
                emitted_at: chrono::Utc::now().timestamp_millis(),
            },
        }
    }

    /// Per-stream checkpoint.
    pub fn stream_state(stream: &str, namespace: Option<&str>, state: Value) -> Self {
        Message::State {
            state: StateMessage {
                state_type: StateType::Stream,
                stream: Some(StreamState {
                    stream_descriptor: StreamDescriptor::new(stream, namespace),
                    stream_state: Some(state),
                }),
                global: None,
                data: None,
                source_stats: None,
                destination_stats: None,
            },
        }
    }

    /// Checkpoint covering every stream at once.
    pub fn global_state(shared_state: Value, stream_states: Vec<StreamState>) -> Self {
        Message::State {
            state: StateMessage {
                state_type: StateType::Global,
                stream: None,
                global: Some(GlobalState {
                    shared_state: Some(shared_state),
                    stream_states,
                }),
                data: None,
                source_stats: None,
                destination_stats: None,
            },
        }
    }

    pub fn legacy_state(data: Value) -> Self {
        Message::State {
            state: StateMessage {
                state_type: StateType::Legacy,
                stream: None,
                global: None,
                data: Some(data),
                source_stats: None,
                destination_stats: None,
            },
        }
    }

    pub fn error_trace(message: &str, failure_type: Option<ErrorFailureType>) -> Self {
        Message::Trace {
            trace: TraceMessage {
                trace_type: TraceType::Error,
                emitted_at: chrono::Utc::now().timestamp_millis() as f64,
                error: Some(ErrorTrace {
                    message: message.to_string(),
                    internal_message: None,
                    stack_trace: None,
                    failure_type,
                }),
                estimate: None,
            },
        }
    }

    pub fn connector_config(config: Value) -> Self {
        Message::Control {
            control: ControlMessage {
                control_type: ControlType::ConnectorConfig,
                emitted_at: chrono::Utc::now().timestamp_millis() as f64,
                connector_config: Some(ConnectorConfig { config }),
            },
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Record { .. } => "RECORD",
            Message::State { .. } => "STATE",
            Message::Trace { .. } => "TRACE",
            Message::Control { .. } => "CONTROL",
            Message::Log { .. } => "LOG",
        }
    }

    /// Only records and checkpoints travel from source to destination.
    pub fn is_forwarded(&self) -> bool {
        matches!(self, Message::Record { .. } | Message::State { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMessage {
    pub stream: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub data: Value,
    /// Epoch milliseconds.
    pub emitted_at: i64,
}

impl RecordMessage {
    pub fn descriptor(&self) -> StreamDescriptor {
        StreamDescriptor {
            name: self.stream.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateType {
    #[default]
    Legacy,
    Stream,
    Global,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamState {
    pub stream_descriptor: StreamDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_state: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_state: Option<Value>,
    #[serde(default)]
    pub stream_states: Vec<StreamState>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_count: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMessage {
    #[serde(rename = "type", default)]
    pub state_type: StateType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global: Option<GlobalState>,
    /// Payload of a LEGACY checkpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_stats: Option<StateStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_stats: Option<StateStats>,
}

impl StateMessage {
    /// The checkpoint itself, without statistics. Source and destination
    /// copies of the same checkpoint have equal payloads.
    pub fn checkpoint_payload(&self) -> Value {
        json!({
            "type": self.state_type,
            "stream": self.stream,
            "global": self.global,
            "data": self.data,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceType {
    Error,
    Estimate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorFailureType {
    SystemError,
    ConfigError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorTrace {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_type: Option<ErrorFailureType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EstimateType {
    Stream,
    Sync,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateTrace {
    #[serde(rename = "type")]
    pub estimate_type: EstimateType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_estimate: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_estimate: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceMessage {
    #[serde(rename = "type")]
    pub trace_type: TraceType,
    /// Epoch milliseconds.
    pub emitted_at: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorTrace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimate: Option<EstimateTrace>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlType {
    ConnectorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub config: Value,
}

/// A connector asking the platform to persist a new configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub control_type: ControlType,
    pub emitted_at: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_config: Option<ConnectorConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    pub level: LogLevel,
    pub message: String,
}
