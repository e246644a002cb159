// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Source liveness tracking.
//!
//! The relay calls [`HeartbeatMonitor::beat`] for every message the source
//! emits. The worker checks [`HeartbeatMonitor::is_beating`] periodically
//! and fails the attempt once the source has been silent for longer than
//! the configured threshold.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Configuration for the heartbeat monitor.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Maximum silence before the source is considered stuck.
    pub timeout: Duration,
    /// How often the worker checks the monitor.
    pub check_interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3 * 60 * 60), // 3 hours of silence = stuck
            check_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
pub struct HeartbeatMonitor {
    timeout: Duration,
    last_beat: Mutex<Option<Instant>>,
}

impl HeartbeatMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_beat: Mutex::new(None),
        }
    }

    pub fn beat(&self) {
        *self.last_beat.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    /// `None` until the first beat.
    pub fn is_beating(&self) -> Option<bool> {
        self.time_since_last_beat()
            .map(|elapsed| elapsed <= self.timeout)
    }

    pub fn time_since_last_beat(&self) -> Option<Duration> {
        self.last_beat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|last| last.elapsed())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
