// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Conduit core: the job and attempt ledger behind replication runs.
//!
//! A job is a scheduling unit scoped to one connection. Every execution try
//! of a job is an attempt. This crate owns:
//!
//! - the data model shared with the replication worker ([`job`],
//!   [`job_config`], [`catalog`], [`output`])
//! - the persistence state machine ([`persistence::JobPersistence`]) with
//!   SQLite and PostgreSQL backends
//! - the [`job_creator`] that builds job configurations and enqueues them
//!
//! The worker never writes to the store. It returns a
//! [`output::ReplicationOutput`] that the scheduler persists through
//! [`persistence::JobPersistence::write_output`].

pub mod catalog;
pub mod config;
pub mod error;
pub mod job;
pub mod job_config;
pub mod job_creator;
pub mod migrations;
pub mod output;
pub mod persistence;

pub use error::{PersistenceError, Result};
pub use job::{Attempt, AttemptStatus, ConfigType, Job, JobStatus};
pub use persistence::JobPersistence;
