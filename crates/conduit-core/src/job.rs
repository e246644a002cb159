// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Jobs, attempts and their status machines.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job_config::{JobConfig, JobOutput};
use crate::output::AttemptFailureSummary;

/// Lifecycle status of a job.
///
/// ```text
/// PENDING ──► RUNNING ──► SUCCEEDED | INCOMPLETE | FAILED | CANCELLED
///    │                        ▲          │
///    │                        └──────────┤  (retry: INCOMPLETE ──► RUNNING)
///    └──► CANCELLED           INCOMPLETE ──► PENDING | FAILED | CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Incomplete,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const TERMINAL: [JobStatus; 3] = [Self::Succeeded, Self::Failed, Self::Cancelled];
    pub const NON_TERMINAL: [JobStatus; 3] = [Self::Pending, Self::Running, Self::Incomplete];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Incomplete => "incomplete",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }

    /// Whether the state table allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Succeeded)
                | (Running, Incomplete)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Incomplete, Running)
                | (Incomplete, Pending)
                | (Incomplete, Failed)
                | (Incomplete, Cancelled)
        )
    }

    /// Statuses from which `next` is reachable.
    pub fn predecessors(next: JobStatus) -> Vec<JobStatus> {
        ALL_JOB_STATUSES
            .iter()
            .copied()
            .filter(|s| s.can_transition_to(next))
            .collect()
    }
}

const ALL_JOB_STATUSES: [JobStatus; 6] = [
    JobStatus::Pending,
    JobStatus::Running,
    JobStatus::Incomplete,
    JobStatus::Succeeded,
    JobStatus::Failed,
    JobStatus::Cancelled,
];

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_JOB_STATUSES
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown job status '{}'", s))
    }
}

/// Lifecycle status of an attempt. Terminal values never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Running,
    Succeeded,
    Failed,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown attempt status '{}'", other)),
        }
    }
}

/// Kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigType {
    Sync,
    ResetConnection,
    CheckConnectionSource,
    CheckConnectionDestination,
    DiscoverSchema,
    GetSpec,
}

impl ConfigType {
    /// Config types that move data and are deduplicated per scope.
    pub const REPLICATION: [ConfigType; 2] = [Self::Sync, Self::ResetConnection];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::ResetConnection => "reset_connection",
            Self::CheckConnectionSource => "check_connection_source",
            Self::CheckConnectionDestination => "check_connection_destination",
            Self::DiscoverSchema => "discover_schema",
            Self::GetSpec => "get_spec",
        }
    }

    pub fn is_replication(&self) -> bool {
        Self::REPLICATION.contains(self)
    }
}

impl fmt::Display for ConfigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" => Ok(Self::Sync),
            "reset_connection" => Ok(Self::ResetConnection),
            "check_connection_source" => Ok(Self::CheckConnectionSource),
            "check_connection_destination" => Ok(Self::CheckConnectionDestination),
            "discover_schema" => Ok(Self::DiscoverSchema),
            "get_spec" => Ok(Self::GetSpec),
            other => Err(format!("unknown config type '{}'", other)),
        }
    }
}

/// One execution try of a job.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub job_id: i64,
    /// 0-based, sequential per job.
    pub attempt_number: i32,
    pub log_path: PathBuf,
    pub output: Option<JobOutput>,
    pub failure_summary: Option<AttemptFailureSummary>,
    pub status: AttemptStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// A scheduling unit scoped to one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: i64,
    pub config_type: ConfigType,
    pub scope: String,
    pub config: JobConfig,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    /// Ordered by attempt number.
    pub attempts: Vec<Attempt>,
}

impl Job {
    pub fn last_attempt(&self) -> Option<&Attempt> {
        self.attempts.iter().max_by_key(|a| a.attempt_number)
    }

    pub fn has_running_attempt(&self) -> bool {
        self.attempts
            .iter()
            .any(|a| a.status == AttemptStatus::Running)
    }

    pub fn attempts_count(&self) -> usize {
        self.attempts.len()
    }

    /// Output of the attempt that succeeded, if any.
    pub fn successful_output(&self) -> Option<&JobOutput> {
        self.attempts
            .iter()
            .find(|a| a.status == AttemptStatus::Succeeded)
            .and_then(|a| a.output.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use JobStatus::*;

        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Succeeded));
        assert!(!Pending.can_transition_to(Incomplete));

        for next in [Succeeded, Incomplete, Failed, Cancelled] {
            assert!(Running.can_transition_to(next), "running -> {}", next);
        }
        assert!(!Running.can_transition_to(Pending));

        for next in [Running, Pending, Failed, Cancelled] {
            assert!(Incomplete.can_transition_to(next), "incomplete -> {}", next);
        }
        assert!(!Incomplete.can_transition_to(Succeeded));

        for terminal in JobStatus::TERMINAL {
            for next in ALL_JOB_STATUSES {
                assert!(
                    !terminal.can_transition_to(next),
                    "{} -> {} must be rejected",
                    terminal,
                    next
                );
            }
        }
    }

    #[test]
    fn test_predecessors() {
        assert_eq!(
            JobStatus::predecessors(JobStatus::Running),
            vec![JobStatus::Pending, JobStatus::Incomplete]
        );
        assert_eq!(
            JobStatus::predecessors(JobStatus::Cancelled),
            vec![JobStatus::Pending, JobStatus::Running, JobStatus::Incomplete]
        );
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in ALL_JOB_STATUSES {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("paused".parse::<JobStatus>().is_err());
        assert_eq!("failed".parse::<AttemptStatus>().unwrap(), AttemptStatus::Failed);
        assert_eq!(
            "reset_connection".parse::<ConfigType>().unwrap(),
            ConfigType::ResetConnection
        );
    }

    #[test]
    fn test_replication_config_types() {
        assert!(ConfigType::Sync.is_replication());
        assert!(ConfigType::ResetConnection.is_replication());
        assert!(!ConfigType::DiscoverSchema.is_replication());
    }
}
