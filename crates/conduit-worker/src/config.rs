// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::heartbeat::HeartbeatConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Tuning for a single replication run.
#[derive(Debug, Clone)]
pub struct ReplicationWorkerConfig {
    pub heartbeat: HeartbeatConfig,
    /// How long cancelled tasks may take to stop before connectors are killed.
    pub cancel_grace_period: Duration,
    /// Sleep between reads when a connector has nothing ready.
    pub read_poll_interval: Duration,
    /// Log progress every this many records.
    pub log_every_records: i64,
}

impl Default for ReplicationWorkerConfig {
    fn default() -> Self {
        Self {
            heartbeat: HeartbeatConfig::default(),
            cancel_grace_period: Duration::from_secs(10),
            read_poll_interval: Duration::from_millis(10),
            log_every_records: 1000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Parent of every attempt's job root.
    pub workspace_root: PathBuf,
    pub replication: ReplicationWorkerConfig,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// - `CONDUIT_WORKSPACE_ROOT` (default: `./workspace`)
    /// - `CONDUIT_HEARTBEAT_TIMEOUT_SECS` (default: 10800)
    /// - `CONDUIT_HEARTBEAT_CHECK_INTERVAL_SECS` (default: 60)
    /// - `CONDUIT_CANCEL_GRACE_PERIOD_SECS` (default: 10)
    /// - `CONDUIT_READ_POLL_INTERVAL_MS` (default: 10)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = ReplicationWorkerConfig::default();
        let workspace_root = env::var("CONDUIT_WORKSPACE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("workspace"));

        Ok(Self {
            workspace_root,
            replication: ReplicationWorkerConfig {
                heartbeat: HeartbeatConfig {
                    timeout: secs_var("CONDUIT_HEARTBEAT_TIMEOUT_SECS", defaults.heartbeat.timeout)?,
                    check_interval: secs_var(
                        "CONDUIT_HEARTBEAT_CHECK_INTERVAL_SECS",
                        defaults.heartbeat.check_interval,
                    )?,
                },
                cancel_grace_period: secs_var(
                    "CONDUIT_CANCEL_GRACE_PERIOD_SECS",
                    defaults.cancel_grace_period,
                )?,
                read_poll_interval: match env::var("CONDUIT_READ_POLL_INTERVAL_MS") {
                    Ok(value) => Duration::from_millis(parse_positive(
                        "CONDUIT_READ_POLL_INTERVAL_MS",
                        value,
                    )?),
                    Err(_) => defaults.read_poll_interval,
                },
                log_every_records: defaults.log_every_records,
            },
        })
    }

    /// Working directory of one attempt.
    pub fn job_root(&self, job_id: i64, attempt_number: i32) -> PathBuf {
        self.workspace_root
            .join(job_id.to_string())
            .join(attempt_number.to_string())
    }
}

fn secs_var(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match env::var(name) {
        Ok(value) => Ok(Duration::from_secs(parse_positive(name, value)?)),
        Err(_) => Ok(default),
    }
}

fn parse_positive(name: &'static str, value: String) -> Result<u64, ConfigError> {
    match value.parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::Invalid { name, value }),
    }
}
