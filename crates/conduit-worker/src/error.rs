// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for conduit-worker.

use conduit_core::output::FailureOrigin;
use std::path::PathBuf;
use thiserror::Error;

use crate::process::ProcessError;
use crate::tracker::TrackerError;
use crate::validator::SchemaCompileError;

/// Errors that prevent the worker from producing an output at all.
///
/// Everything that goes wrong once connectors are running is reported as a
/// failure inside the output instead.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WorkerError {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// The attempt's working directory could not be prepared.
    #[error("Failed to prepare job root {path}: {source}")]
    JobRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stream schema in the catalog does not compile.
    #[error(transparent)]
    Schema(#[from] SchemaCompileError),
}

/// Result type using WorkerError.
pub type Result<T> = std::result::Result<T, WorkerError>;

/// Why one of the relay tasks stopped early.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RelayError {
    #[error("Source process read attempt failed")]
    SourceRead(#[source] ProcessError),

    #[error("Source process exited with non-zero exit code {0}")]
    SourceExit(i32),

    #[error("Source process could not be closed")]
    SourceClose(#[source] ProcessError),

    #[error("Destination process message delivery failed")]
    DestinationWrite(#[source] ProcessError),

    #[error("Destination process end of stream notification failed")]
    DestinationEndOfInput(#[source] ProcessError),

    #[error("Destination process read attempt failed")]
    DestinationRead(#[source] ProcessError),

    #[error("Destination process exited with non-zero exit code {0}")]
    DestinationExit(i32),

    #[error("Destination process could not be closed")]
    DestinationClose(#[source] ProcessError),

    #[error("Message tracking failed")]
    Tracking(#[source] TrackerError),

    #[error("Relay task aborted: {0}")]
    Aborted(String),
}

impl RelayError {
    pub fn origin(&self) -> FailureOrigin {
        match self {
            Self::SourceRead(_) | Self::SourceExit(_) | Self::SourceClose(_) => {
                FailureOrigin::Source
            }
            Self::DestinationWrite(_)
            | Self::DestinationEndOfInput(_)
            | Self::DestinationRead(_)
            | Self::DestinationExit(_)
            | Self::DestinationClose(_) => FailureOrigin::Destination,
            Self::Tracking(e) => e.origin(),
            Self::Aborted(_) => FailureOrigin::Replication,
        }
    }

    /// A bare exit code carries no detail of its own.
    pub fn is_exit_code(&self) -> bool {
        matches!(self, Self::SourceExit(_) | Self::DestinationExit(_))
    }
}
