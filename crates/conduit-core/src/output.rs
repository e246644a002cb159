// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Result of one replication attempt.
//!
//! The worker produces a [`ReplicationOutput`]; the scheduler stores it as
//! the attempt's output and, on failure, stores an
//! [`AttemptFailureSummary`] built from the same failure list.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::ConfiguredCatalog;

/// Opaque checkpoint that lets a source resume where it stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub state: Value,
}

impl State {
    pub fn new(state: Value) -> Self {
        Self { state }
    }
}

/// Final status of a replication attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Emitted versus committed counters.
///
/// Committed fields are `None` when the worker could not tell how much the
/// destination durably wrote.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStats {
    pub records_emitted: i64,
    pub bytes_emitted: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records_committed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_committed: Option<i64>,
    #[serde(default)]
    pub source_state_messages_emitted: i64,
    #[serde(default)]
    pub destination_state_messages_emitted: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_records: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_bytes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_start_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_end_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_read_start_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_read_end_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_write_start_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_write_end_time: Option<i64>,
}

/// Counters for a single stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSyncStats {
    pub stream_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_namespace: Option<String>,
    pub stats: SyncStats,
}

/// Summary block of a replication attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationAttemptSummary {
    pub status: ReplicationStatus,
    pub records_synced: i64,
    pub bytes_synced: i64,
    /// Epoch milliseconds.
    pub start_time: i64,
    /// Epoch milliseconds.
    pub end_time: i64,
    pub total_stats: SyncStats,
    #[serde(default)]
    pub stream_stats: Vec<StreamSyncStats>,
}

/// Which side of the relay a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureOrigin {
    Source,
    Destination,
    Replication,
}

impl FailureOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Destination => "destination",
            Self::Replication => "replication",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    ConfigError,
    SystemError,
    ManualCancellation,
    HeartbeatTimeout,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailureMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_number: Option<i32>,
    /// Set when the failure was reported by a connector trace message.
    #[serde(default)]
    pub from_trace_message: bool,
}

/// One reason an attempt failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReason {
    pub failure_origin: FailureOrigin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_type: Option<FailureType>,
    /// User-facing message.
    pub external_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    /// Epoch milliseconds.
    pub timestamp: i64,
    #[serde(default)]
    pub metadata: FailureMetadata,
}

/// Failures of an attempt, stored next to the attempt row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptFailureSummary {
    pub failures: Vec<FailureReason>,
    /// True when some records were committed before the attempt failed.
    #[serde(default)]
    pub partial_success: bool,
}

impl AttemptFailureSummary {
    pub fn from_output(output: &ReplicationOutput) -> Self {
        let committed = output
            .replication_attempt_summary
            .total_stats
            .records_committed
            .unwrap_or(0);
        Self {
            failures: output.failures.clone(),
            partial_success: committed > 0,
        }
    }
}

/// Everything a replication attempt reports back to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationOutput {
    pub replication_attempt_summary: ReplicationAttemptSummary,
    /// Catalog as seen by the destination (after namespace mapping).
    pub output_catalog: ConfiguredCatalog,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureReason>,
}

impl ReplicationOutput {
    pub fn status(&self) -> ReplicationStatus {
        self.replication_attempt_summary.status
    }

    pub fn is_success(&self) -> bool {
        self.status() == ReplicationStatus::Completed
    }
}
