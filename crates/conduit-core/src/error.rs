// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for job persistence.
//!
//! Illegal transitions are kept apart from storage failures so a scheduler
//! can report the former as bugs and retry the latter.

use thiserror::Error;

/// Result type using PersistenceError
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Errors raised by the job/attempt store.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum PersistenceError {
    /// Job was not found in the database.
    #[error("Job {job_id} not found")]
    JobNotFound {
        /// The job ID that was not found.
        job_id: i64,
    },

    /// Attempt was not found for the job.
    #[error("Attempt {attempt_number} of job {job_id} not found")]
    AttemptNotFound {
        /// The owning job.
        job_id: i64,
        /// The attempt number that was not found.
        attempt_number: i32,
    },

    /// The job state table does not allow this transition.
    #[error("Job {job_id} cannot move from '{from}' to '{to}'")]
    IllegalStateTransition {
        /// The job ID.
        job_id: i64,
        /// Status the job is currently in.
        from: String,
        /// Status that was requested.
        to: String,
    },

    /// An attempt operation is not legal in the current state.
    #[error("Illegal attempt operation on job {job_id} attempt {attempt_number}: {reason}")]
    IllegalAttemptState {
        /// The job ID.
        job_id: i64,
        /// The attempt number.
        attempt_number: i32,
        /// Why the operation was rejected.
        reason: String,
    },

    /// A new attempt was requested while another one is still running.
    #[error("Job {job_id} already has a running attempt")]
    AttemptAlreadyRunning {
        /// The job ID.
        job_id: i64,
    },

    /// Input validation failed.
    #[error("Validation error for '{field}': {message}")]
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Database operation failed.
    #[error("Database error during '{operation}': {details}")]
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl PersistenceError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::JobNotFound { .. } => "JOB_NOT_FOUND",
            Self::AttemptNotFound { .. } => "ATTEMPT_NOT_FOUND",
            Self::IllegalStateTransition { .. } => "ILLEGAL_STATE_TRANSITION",
            Self::IllegalAttemptState { .. } => "ILLEGAL_ATTEMPT_STATE",
            Self::AttemptAlreadyRunning { .. } => "ATTEMPT_ALREADY_RUNNING",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
        }
    }

    /// True for errors caused by an operation the state machine forbids.
    pub fn is_illegal_state(&self) -> bool {
        matches!(
            self,
            Self::IllegalStateTransition { .. }
                | Self::IllegalAttemptState { .. }
                | Self::AttemptAlreadyRunning { .. }
        )
    }

    /// True when retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DatabaseError { .. })
    }

    pub(crate) fn database(operation: &str, details: impl std::fmt::Display) -> Self {
        Self::DatabaseError {
            operation: operation.to_string(),
            details: details.to_string(),
        }
    }
}

impl From<sqlx::Error> for PersistenceError {
    fn from(err: sqlx::Error) -> Self {
        PersistenceError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        PersistenceError::DatabaseError {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}
