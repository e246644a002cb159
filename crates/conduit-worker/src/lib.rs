// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Conduit Worker - Replication Relay
//!
//! Runs one sync attempt: reads a source connector, forwards records and
//! checkpoints to a destination connector and reports what was emitted,
//! what the destination committed and why the attempt failed, if it did.
//!
//! ```ignore
//! let worker = ReplicationWorker::new(job_id, attempt, source, destination, config);
//! let output = worker.run(&input, &job_root).await?;
//! ```

pub mod config;
pub mod control;
pub mod error;
pub mod failure;
pub mod heartbeat;
pub mod mapper;
pub mod process;
pub mod protocol;
pub mod tracker;
pub mod validator;
pub mod worker;

pub use config::{ReplicationWorkerConfig, WorkerConfig};
pub use error::{RelayError, Result, WorkerError};
pub use protocol::Message;
pub use tracker::MessageTracker;
pub use worker::{CancelHandle, ReplicationInput, ReplicationWorker};
