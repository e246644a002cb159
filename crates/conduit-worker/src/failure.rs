// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Conversion of relay problems into attempt failure reasons.

use conduit_core::output::{FailureMetadata, FailureOrigin, FailureReason, FailureType};
use std::error::Error;
use std::time::Duration;

use crate::error::RelayError;
use crate::process::ProcessError;
use crate::protocol::{ErrorFailureType, TraceMessage};

fn external_message(origin: FailureOrigin) -> &'static str {
    match origin {
        FailureOrigin::Source => "Something went wrong within the source connector",
        FailureOrigin::Destination => "Something went wrong within the destination connector",
        FailureOrigin::Replication => "Something went wrong during replication",
    }
}

/// The error and its causes, one per line.
fn error_chain(error: &dyn Error) -> String {
    let mut chain = error.to_string();
    let mut cause = error.source();
    while let Some(e) = cause {
        chain.push_str("\nCaused by: ");
        chain.push_str(&e.to_string());
        cause = e.source();
    }
    chain
}

/// Builds failure reasons for one attempt.
#[derive(Debug, Clone, Copy)]
pub struct FailureReporter {
    job_id: i64,
    attempt_number: i32,
}

impl FailureReporter {
    pub fn new(job_id: i64, attempt_number: i32) -> Self {
        Self {
            job_id,
            attempt_number,
        }
    }

    fn reason(&self, origin: FailureOrigin, error: &dyn Error) -> FailureReason {
        FailureReason {
            failure_origin: origin,
            failure_type: None,
            external_message: external_message(origin).to_string(),
            internal_message: Some(error.to_string()),
            stacktrace: Some(error_chain(error)),
            retryable: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
            metadata: self.metadata(false),
        }
    }

    fn metadata(&self, from_trace_message: bool) -> FailureMetadata {
        FailureMetadata {
            job_id: Some(self.job_id),
            attempt_number: Some(self.attempt_number),
            from_trace_message,
        }
    }

    /// Failure reported by a connector's error trace.
    pub fn from_trace(&self, origin: FailureOrigin, trace: &TraceMessage) -> FailureReason {
        let error = trace.error.as_ref();
        FailureReason {
            failure_origin: origin,
            failure_type: error.and_then(|e| e.failure_type).map(|t| match t {
                ErrorFailureType::ConfigError => FailureType::ConfigError,
                ErrorFailureType::SystemError => FailureType::SystemError,
            }),
            external_message: error
                .map(|e| e.message.clone())
                .unwrap_or_else(|| external_message(origin).to_string()),
            internal_message: error.and_then(|e| e.internal_message.clone()),
            stacktrace: error.and_then(|e| e.stack_trace.clone()),
            retryable: None,
            timestamp: trace.emitted_at as i64,
            metadata: self.metadata(true),
        }
    }

    pub fn from_relay(&self, error: &RelayError) -> FailureReason {
        self.reason(error.origin(), error)
    }

    /// A connector that never started.
    pub fn start_failure(&self, origin: FailureOrigin, error: &ProcessError) -> FailureReason {
        let mut reason = self.reason(origin, error);
        reason.external_message = format!("The {} connector failed to start", origin.as_str());
        reason
    }

    pub fn heartbeat_timeout(&self, silence: Duration, threshold: Duration) -> FailureReason {
        FailureReason {
            failure_origin: FailureOrigin::Source,
            failure_type: Some(FailureType::HeartbeatTimeout),
            external_message: format!(
                "The source connector emitted nothing for {} seconds; the sync was stopped",
                silence.as_secs()
            ),
            internal_message: Some(format!(
                "Source heartbeat exceeded the {}s threshold",
                threshold.as_secs()
            )),
            stacktrace: None,
            retryable: Some(true),
            timestamp: chrono::Utc::now().timestamp_millis(),
            metadata: self.metadata(false),
        }
    }
}
