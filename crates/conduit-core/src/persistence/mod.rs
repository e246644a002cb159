// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Durable storage for jobs and attempts.
//!
//! [`JobPersistence`] is the only writer of job and attempt rows. Every
//! operation is atomic against the backing store. Status changes are
//! validated against [`JobStatus::can_transition_to`] and then applied as a
//! conditional update, so a concurrent writer that got there first turns
//! into [`PersistenceError::IllegalStateTransition`] instead of a lost update.

pub mod postgres;
pub mod sqlite;

pub use self::postgres::PostgresJobPersistence;
pub use self::sqlite::SqliteJobPersistence;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{PersistenceError, Result};
use crate::job::{Attempt, ConfigType, Job, JobStatus};
use crate::job_config::{JobConfig, JobOutput};
use crate::output::{AttemptFailureSummary, StreamSyncStats, SyncStats};

pub(crate) const METADATA_VERSION: &str = "version";
pub(crate) const METADATA_DEPLOYMENT_ID: &str = "deployment_id";
pub(crate) const METADATA_SECRET_MIGRATION: &str = "secret_migration";
pub(crate) const METADATA_PROTOCOL_VERSION_MIN: &str = "protocol_version_min";
pub(crate) const METADATA_PROTOCOL_VERSION_MAX: &str = "protocol_version_max";

/// Open the backend named by `config.database_url` and apply pending migrations.
pub async fn connect(config: &Config) -> Result<Arc<dyn JobPersistence>> {
    if config.is_sqlite() {
        let persistence =
            SqliteJobPersistence::connect(&config.database_url, config.max_connections).await?;
        info!(max_connections = config.max_connections, "Using SQLite job persistence");
        Ok(Arc::new(persistence))
    } else {
        let persistence =
            PostgresJobPersistence::connect(&config.database_url, config.max_connections).await?;
        info!(max_connections = config.max_connections, "Using PostgreSQL job persistence");
        Ok(Arc::new(persistence))
    }
}

/// Columns selected for every job query.
pub(crate) const JOB_COLUMNS: &str =
    "id, config_type, scope, config, status, created_at, updated_at, started_at";

/// Columns selected for every attempt query.
pub(crate) const ATTEMPT_COLUMNS: &str = "job_id, attempt_number, log_path, output, failure_summary, status, created_at, updated_at, ended_at";

/// Job row as stored.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRecord {
    pub id: i64,
    pub config_type: String,
    pub scope: String,
    /// Serialized [`JobConfig`].
    pub config: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Attempt row as stored.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AttemptRecord {
    pub job_id: i64,
    pub attempt_number: i32,
    pub log_path: String,
    /// Serialized [`JobOutput`].
    pub output: Option<String>,
    /// Serialized [`AttemptFailureSummary`].
    pub failure_summary: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct SyncStatsRecord {
    pub records_emitted: i64,
    pub bytes_emitted: i64,
    pub records_committed: Option<i64>,
    pub bytes_committed: Option<i64>,
    pub source_state_messages_emitted: i64,
    pub destination_state_messages_emitted: i64,
    pub estimated_records: Option<i64>,
    pub estimated_bytes: Option<i64>,
    pub replication_start_time: Option<i64>,
    pub replication_end_time: Option<i64>,
    pub source_read_start_time: Option<i64>,
    pub source_read_end_time: Option<i64>,
    pub destination_write_start_time: Option<i64>,
    pub destination_write_end_time: Option<i64>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct StreamStatsRecord {
    pub stream_name: String,
    pub stream_namespace: String,
    #[sqlx(flatten)]
    pub stats: SyncStatsRecord,
}

/// Stat columns shared by `sync_stats` and `stream_stats`, in bind order.
pub(crate) const STATS_COLUMNS: &str = "records_emitted, bytes_emitted, records_committed, \
    bytes_committed, source_state_messages_emitted, destination_state_messages_emitted, \
    estimated_records, estimated_bytes, replication_start_time, replication_end_time, \
    source_read_start_time, source_read_end_time, destination_write_start_time, \
    destination_write_end_time";

/// `col = excluded.col` for every stat column.
pub(crate) fn stats_upsert_assignments() -> String {
    STATS_COLUMNS
        .split(',')
        .map(str::trim)
        .map(|column| format!("{column} = excluded.{column}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Stats recorded for one attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttemptStats {
    pub total_stats: Option<SyncStats>,
    pub stream_stats: Vec<StreamSyncStats>,
}

/// Supported connector protocol versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolVersionRange {
    pub min: String,
    pub max: String,
}

/// Storage contract for the job/attempt state machine.
#[async_trait]
pub trait JobPersistence: Send + Sync {
    // ---- Jobs ----

    /// Insert a PENDING job unless a non-terminal replication job already
    /// exists for `scope`. Returns `None` when nothing was written.
    async fn enqueue_job(&self, scope: &str, config: &JobConfig) -> Result<Option<i64>>;

    /// Load a job with its attempts.
    async fn get_job(&self, job_id: i64) -> Result<Job>;

    /// Oldest PENDING job whose scope has no RUNNING or INCOMPLETE job.
    async fn get_next_job(&self) -> Result<Option<Job>>;

    /// Move an INCOMPLETE job back to PENDING.
    async fn reset_job(&self, job_id: i64) -> Result<()>;

    /// Cancel a job and close any running attempt as failed.
    async fn cancel_job(&self, job_id: i64) -> Result<()>;

    /// Fail a job and close any running attempt as failed.
    async fn fail_job(&self, job_id: i64) -> Result<()>;

    // ---- Attempts ----

    /// Create the next attempt of a job and move the job to RUNNING.
    async fn create_attempt(&self, job_id: i64, log_path: &Path) -> Result<i32>;

    /// Mark an attempt SUCCEEDED and the job SUCCEEDED.
    async fn succeed_attempt(&self, job_id: i64, attempt_number: i32) -> Result<()>;

    /// Mark an attempt FAILED and the job INCOMPLETE.
    async fn fail_attempt(&self, job_id: i64, attempt_number: i32) -> Result<()>;

    async fn write_output(&self, job_id: i64, attempt_number: i32, output: &JobOutput)
    -> Result<()>;

    async fn write_attempt_failure_summary(
        &self,
        job_id: i64,
        attempt_number: i32,
        summary: &AttemptFailureSummary,
    ) -> Result<()>;

    /// Upsert the stats of an attempt.
    async fn write_stats(
        &self,
        job_id: i64,
        attempt_number: i32,
        total_stats: &SyncStats,
        stream_stats: &[StreamSyncStats],
    ) -> Result<()>;

    async fn get_attempt_stats(&self, job_id: i64, attempt_number: i32) -> Result<AttemptStats>;

    // ---- Queries ----

    async fn get_job_count(&self, config_types: &[ConfigType], scope: &str) -> Result<i64>;

    /// Jobs of a scope, newest first.
    async fn list_jobs(
        &self,
        config_types: &[ConfigType],
        scope: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Job>>;

    /// Jobs in a given status across scopes, newest first.
    async fn list_jobs_with_status(
        &self,
        config_types: &[ConfigType],
        status: JobStatus,
    ) -> Result<Vec<Job>>;

    /// Jobs of a scope in any of `statuses`, newest first.
    async fn list_jobs_for_scope_with_statuses(
        &self,
        scope: &str,
        config_types: &[ConfigType],
        statuses: &[JobStatus],
    ) -> Result<Vec<Job>>;

    /// Most recent replication job of a scope.
    async fn get_last_replication_job(&self, scope: &str) -> Result<Option<Job>>;

    /// Oldest replication job of a scope.
    async fn get_first_replication_job(&self, scope: &str) -> Result<Option<Job>>;

    /// Most recent SYNC job of a scope.
    async fn get_last_sync_job(&self, scope: &str) -> Result<Option<Job>>;

    // ---- Metadata ----

    async fn get_version(&self) -> Result<Option<String>>;

    async fn set_version(&self, version: &str) -> Result<()>;

    async fn get_deployment(&self) -> Result<Option<Uuid>>;

    /// Store the deployment id if none is set. Returns the stored id.
    async fn set_deployment(&self, deployment_id: Uuid) -> Result<Uuid>;

    async fn is_secret_migrated(&self) -> Result<bool>;

    async fn set_secret_migration_done(&self) -> Result<()>;

    async fn get_protocol_version_range(&self) -> Result<Option<ProtocolVersionRange>>;

    async fn set_protocol_version_range(&self, range: &ProtocolVersionRange) -> Result<()>;

    async fn health_check_db(&self) -> Result<bool>;
}

impl JobRecord {
    pub(crate) fn into_job(self, attempts: Vec<Attempt>) -> Result<Job> {
        let config: JobConfig = serde_json::from_str(&self.config)?;
        let config_type = self
            .config_type
            .parse::<ConfigType>()
            .map_err(|e| PersistenceError::database("decode_job", e))?;
        let status = parse_job_status(&self.status)?;

        Ok(Job {
            id: self.id,
            config_type,
            scope: self.scope,
            config,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            started_at: self.started_at,
            attempts,
        })
    }
}

impl AttemptRecord {
    pub(crate) fn into_attempt(self) -> Result<Attempt> {
        let output = self
            .output
            .as_deref()
            .map(serde_json::from_str::<JobOutput>)
            .transpose()?;
        let failure_summary = self
            .failure_summary
            .as_deref()
            .map(serde_json::from_str::<AttemptFailureSummary>)
            .transpose()?;
        let status = self
            .status
            .parse()
            .map_err(|e| PersistenceError::database("decode_attempt", e))?;

        Ok(Attempt {
            job_id: self.job_id,
            attempt_number: self.attempt_number,
            log_path: PathBuf::from(self.log_path),
            output,
            failure_summary,
            status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            ended_at: self.ended_at,
        })
    }
}

impl From<SyncStatsRecord> for SyncStats {
    fn from(r: SyncStatsRecord) -> Self {
        SyncStats {
            records_emitted: r.records_emitted,
            bytes_emitted: r.bytes_emitted,
            records_committed: r.records_committed,
            bytes_committed: r.bytes_committed,
            source_state_messages_emitted: r.source_state_messages_emitted,
            destination_state_messages_emitted: r.destination_state_messages_emitted,
            estimated_records: r.estimated_records,
            estimated_bytes: r.estimated_bytes,
            replication_start_time: r.replication_start_time,
            replication_end_time: r.replication_end_time,
            source_read_start_time: r.source_read_start_time,
            source_read_end_time: r.source_read_end_time,
            destination_write_start_time: r.destination_write_start_time,
            destination_write_end_time: r.destination_write_end_time,
        }
    }
}

impl From<StreamStatsRecord> for StreamSyncStats {
    fn from(r: StreamStatsRecord) -> Self {
        StreamSyncStats {
            stream_name: r.stream_name,
            stream_namespace: (!r.stream_namespace.is_empty()).then_some(r.stream_namespace),
            stats: r.stats.into(),
        }
    }
}

pub(crate) fn parse_job_status(raw: &str) -> Result<JobStatus> {
    raw.parse()
        .map_err(|e| PersistenceError::database("decode_job", e))
}

/// Attach attempts to their jobs, keeping the order of `jobs`.
pub(crate) fn assemble_jobs(jobs: Vec<JobRecord>, attempts: Vec<AttemptRecord>) -> Result<Vec<Job>> {
    let mut by_job: HashMap<i64, Vec<Attempt>> = HashMap::new();
    for record in attempts {
        let attempt = record.into_attempt()?;
        by_job.entry(attempt.job_id).or_default().push(attempt);
    }

    jobs.into_iter()
        .map(|record| {
            let attempts = by_job.remove(&record.id).unwrap_or_default();
            record.into_job(attempts)
        })
        .collect()
}

/// Validate a transition before it is written.
pub(crate) fn check_transition(job_id: i64, from: JobStatus, to: JobStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(PersistenceError::IllegalStateTransition {
            job_id,
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

pub(crate) fn log_path_string(log_path: &Path) -> String {
    log_path.to_string_lossy().into_owned()
}
