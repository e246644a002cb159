// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Source and destination handle definitions.
//!
//! The worker only talks to connectors through these traits, so the relay
//! logic is the same whether the connector is a subprocess or a mock.

use async_trait::async_trait;
use conduit_core::catalog::ConfiguredCatalog;
use conduit_core::output::State;
use serde_json::Value;
use std::path::Path;
use thiserror::Error;

use crate::protocol::Message;

/// Errors from connector handle operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProcessError {
    /// Connector could not be launched.
    #[error("Connector start failed: {0}")]
    StartFailed(String),

    /// Operation requires a started connector.
    #[error("Connector is not running")]
    NotStarted,

    /// Input side of the connector is closed.
    #[error("Connector input is closed")]
    InputClosed,

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error.
    #[error("Other: {0}")]
    Other(String),
}

/// Result type for connector handle operations.
pub type Result<T> = std::result::Result<T, ProcessError>;

/// Everything a source needs to start reading.
#[derive(Debug, Clone)]
pub struct SourceLaunchConfig {
    pub source_configuration: Value,
    pub catalog: ConfiguredCatalog,
    pub state: Option<State>,
}

/// Everything a destination needs to start writing.
#[derive(Debug, Clone)]
pub struct DestinationLaunchConfig {
    pub destination_configuration: Value,
    /// Catalog after namespace mapping.
    pub catalog: ConfiguredCatalog,
}

/// Read side of a sync.
#[async_trait]
pub trait Source: Send {
    /// Launch the connector. `job_root` is a scratch directory owned by the attempt.
    async fn start(&mut self, config: &SourceLaunchConfig, job_root: &Path) -> Result<()>;

    /// Next message if one is ready. Never waits for output.
    async fn attempt_read(&mut self) -> Result<Option<Message>>;

    /// True once the connector has exited and all output has been read.
    fn is_finished(&mut self) -> bool;

    /// Exit code, once the connector has exited.
    fn exit_value(&mut self) -> Option<i32>;

    /// Wait for a normal exit.
    async fn close(&mut self) -> Result<()>;

    /// Terminate immediately.
    async fn cancel(&mut self) -> Result<()>;
}

/// Write side of a sync.
#[async_trait]
pub trait Destination: Send {
    async fn start(&mut self, config: &DestinationLaunchConfig, job_root: &Path) -> Result<()>;

    /// Deliver one message to the connector's input.
    async fn accept(&mut self, message: &Message) -> Result<()>;

    /// Close the connector's input. No `accept` may follow.
    async fn notify_end_of_input(&mut self) -> Result<()>;

    /// Next output message (acknowledged states, traces) if one is ready.
    async fn attempt_read(&mut self) -> Result<Option<Message>>;

    fn is_finished(&mut self) -> bool;

    fn exit_value(&mut self) -> Option<i32>;

    async fn close(&mut self) -> Result<()>;

    async fn cancel(&mut self) -> Result<()>;
}
