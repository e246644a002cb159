// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed job persistence.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{PersistenceError, Result};
use crate::job::{AttemptStatus, ConfigType, Job, JobStatus};
use crate::job_config::{JobConfig, JobOutput};
use crate::output::{AttemptFailureSummary, StreamSyncStats, SyncStats};

use super::{
    ATTEMPT_COLUMNS, AttemptRecord, AttemptStats, JOB_COLUMNS, JobPersistence, JobRecord,
    METADATA_DEPLOYMENT_ID, METADATA_PROTOCOL_VERSION_MAX, METADATA_PROTOCOL_VERSION_MIN,
    METADATA_SECRET_MIGRATION, METADATA_VERSION, ProtocolVersionRange, StreamStatsRecord,
    STATS_COLUMNS, SyncStatsRecord, assemble_jobs, check_transition, log_path_string,
    parse_job_status, stats_upsert_assignments,
};

/// PostgreSQL-backed job persistence.
#[derive(Clone)]
pub struct PostgresJobPersistence {
    pool: PgPool,
}

impl PostgresJobPersistence {
    /// Create a new Postgres-backed persistence from an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` and apply pending migrations.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| {
                PersistenceError::database(
                    "connect",
                    format!("Failed to connect to PostgreSQL: {}", e),
                )
            })?;

        crate::migrations::run_postgres(&pool).await.map_err(|e| {
            PersistenceError::database("migrate", format!("Failed to run migrations: {}", e))
        })?;

        Ok(Self { pool })
    }

    async fn fetch_jobs(&self, mut builder: QueryBuilder<'_, Postgres>) -> Result<Vec<Job>> {
        let records = builder
            .build_query_as::<JobRecord>()
            .fetch_all(&self.pool)
            .await?;
        self.attach_attempts(records).await
    }

    async fn attach_attempts(&self, records: Vec<JobRecord>) -> Result<Vec<Job>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM attempts WHERE job_id IN (",
            ATTEMPT_COLUMNS
        ));
        let mut ids = builder.separated(", ");
        for record in &records {
            ids.push_bind(record.id);
        }
        ids.push_unseparated(") ORDER BY created_at ASC, id ASC");

        let attempts = builder
            .build_query_as::<AttemptRecord>()
            .fetch_all(&self.pool)
            .await?;

        assemble_jobs(records, attempts)
    }

    async fn first_job(&self, builder: QueryBuilder<'_, Postgres>) -> Result<Option<Job>> {
        Ok(self.fetch_jobs(builder).await?.into_iter().next())
    }

    /// Force a job into a terminal status and close its running attempt.
    async fn terminate_job(&self, job_id: i64, to: JobStatus) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        transition_job(&mut tx, job_id, to, now).await?;

        let closed = sqlx::query(
            r#"
            UPDATE attempts
            SET status = 'failed', ended_at = $1, updated_at = $1
            WHERE job_id = $2 AND status = 'running'
            "#,
        )
        .bind(now)
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if closed.rows_affected() > 0 {
            debug!(job_id, status = %to, "Closed running attempt of terminated job");
        }
        Ok(())
    }

    /// Close a running attempt and move its job, in one transaction.
    async fn finish_attempt(
        &self,
        job_id: i64,
        attempt_number: i32,
        attempt_status: AttemptStatus,
        job_status: JobStatus,
    ) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let current = attempt_status_of(&mut tx, job_id, attempt_number).await?;
        if current.is_terminal() {
            return Err(PersistenceError::IllegalAttemptState {
                job_id,
                attempt_number,
                reason: format!("attempt is already {}", current),
            });
        }

        transition_job(&mut tx, job_id, job_status, now).await?;

        sqlx::query(
            r#"
            UPDATE attempts
            SET status = $1, ended_at = $2, updated_at = $2
            WHERE job_id = $3 AND attempt_number = $4 AND status = 'running'
            "#,
        )
        .bind(attempt_status.as_str())
        .bind(now)
        .bind(job_id)
        .bind(attempt_number)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            job_id,
            attempt_number,
            attempt_status = %attempt_status,
            job_status = %job_status,
            "Attempt finished"
        );
        Ok(())
    }

    async fn attempt_id(&self, job_id: i64, attempt_number: i32) -> Result<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT id FROM attempts WHERE job_id = $1 AND attempt_number = $2",
        )
        .bind(job_id)
        .bind(attempt_number)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(PersistenceError::AttemptNotFound {
            job_id,
            attempt_number,
        })
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM metadata WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn put_metadata(&self, conn: &mut PgConnection, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO metadata (key, value) VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

fn job_query<'a>() -> QueryBuilder<'a, Postgres> {
    QueryBuilder::new(format!("SELECT {} FROM jobs WHERE 1 = 1", JOB_COLUMNS))
}

fn push_config_types(builder: &mut QueryBuilder<'_, Postgres>, config_types: &[ConfigType]) {
    builder.push(" AND config_type IN (");
    let mut types = builder.separated(", ");
    for config_type in config_types {
        types.push_bind(config_type.as_str());
    }
    types.push_unseparated(")");
}

fn push_statuses(builder: &mut QueryBuilder<'_, Postgres>, statuses: &[JobStatus]) {
    builder.push(" AND status IN (");
    let mut values = builder.separated(", ");
    for status in statuses {
        values.push_bind(status.as_str());
    }
    values.push_unseparated(")");
}

const NEWEST_FIRST: &str = " ORDER BY created_at DESC, id DESC";
const OLDEST_FIRST: &str = " ORDER BY created_at ASC, id ASC";

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// Bind every stat column in `STATS_COLUMNS` order.
fn bind_stats<'q>(query: PgQuery<'q>, stats: &SyncStats) -> PgQuery<'q> {
    query
        .bind(stats.records_emitted)
        .bind(stats.bytes_emitted)
        .bind(stats.records_committed)
        .bind(stats.bytes_committed)
        .bind(stats.source_state_messages_emitted)
        .bind(stats.destination_state_messages_emitted)
        .bind(stats.estimated_records)
        .bind(stats.estimated_bytes)
        .bind(stats.replication_start_time)
        .bind(stats.replication_end_time)
        .bind(stats.source_read_start_time)
        .bind(stats.source_read_end_time)
        .bind(stats.destination_write_start_time)
        .bind(stats.destination_write_end_time)
}

async fn job_status_of(conn: &mut PgConnection, job_id: i64) -> Result<JobStatus> {
    let status = sqlx::query_scalar::<_, String>("SELECT status FROM jobs WHERE id = $1 FOR UPDATE")
        .bind(job_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(PersistenceError::JobNotFound { job_id })?;
    parse_job_status(&status)
}

async fn attempt_status_of(
    conn: &mut PgConnection,
    job_id: i64,
    attempt_number: i32,
) -> Result<AttemptStatus> {
    let status = sqlx::query_scalar::<_, String>(
        "SELECT status FROM attempts WHERE job_id = $1 AND attempt_number = $2",
    )
    .bind(job_id)
    .bind(attempt_number)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(PersistenceError::AttemptNotFound {
        job_id,
        attempt_number,
    })?;
    status
        .parse()
        .map_err(|e| PersistenceError::database("decode_attempt", e))
}

/// Validate and apply a job status change.
///
/// The status read locks the job row for the rest of the transaction.
async fn transition_job(
    conn: &mut PgConnection,
    job_id: i64,
    to: JobStatus,
    now: DateTime<Utc>,
) -> Result<JobStatus> {
    let from = job_status_of(conn, job_id).await?;
    check_transition(job_id, from, to)?;

    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = $1,
            updated_at = $2,
            started_at = CASE WHEN $1 = 'running' AND started_at IS NULL THEN $2 ELSE started_at END
        WHERE id = $3 AND status = $4
        "#,
    )
    .bind(to.as_str())
    .bind(now)
    .bind(job_id)
    .bind(from.as_str())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        let actual = job_status_of(conn, job_id).await?;
        return Err(PersistenceError::IllegalStateTransition {
            job_id,
            from: actual.to_string(),
            to: to.to_string(),
        });
    }

    debug!(job_id, from = %from, to = %to, "Job status changed");
    Ok(from)
}

#[async_trait]
impl JobPersistence for PostgresJobPersistence {
    async fn enqueue_job(&self, scope: &str, config: &JobConfig) -> Result<Option<i64>> {
        let now = Utc::now();
        let config_type = config.config_type();
        let payload = serde_json::to_string(config)?;

        let job_id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO jobs (config_type, scope, config, status, created_at, updated_at)
            SELECT $1, $2, $3, 'pending', $4, $4
            WHERE NOT $5 OR NOT EXISTS (
                SELECT 1 FROM jobs
                WHERE scope = $2
                  AND config_type IN ('sync', 'reset_connection')
                  AND status NOT IN ('succeeded', 'failed', 'cancelled')
            )
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(config_type.as_str())
        .bind(scope)
        .bind(payload)
        .bind(now)
        .bind(config_type.is_replication())
        .fetch_optional(&self.pool)
        .await?;

        match job_id {
            Some(id) => info!(job_id = id, scope, config_type = %config_type, "Job enqueued"),
            None => info!(scope, config_type = %config_type, "Job already in flight for scope, not enqueued"),
        }
        Ok(job_id)
    }

    async fn get_job(&self, job_id: i64) -> Result<Job> {
        let mut builder = job_query();
        builder.push(" AND id = ").push_bind(job_id);
        self.first_job(builder)
            .await?
            .ok_or(PersistenceError::JobNotFound { job_id })
    }

    async fn get_next_job(&self) -> Result<Option<Job>> {
        let mut builder = job_query();
        builder.push(
            r#"
             AND status = 'pending'
             AND scope NOT IN (
                 SELECT scope FROM jobs WHERE status IN ('running', 'incomplete')
             )"#,
        );
        builder.push(OLDEST_FIRST).push(" LIMIT 1");
        self.first_job(builder).await
    }

    async fn reset_job(&self, job_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        transition_job(&mut tx, job_id, JobStatus::Pending, Utc::now()).await?;
        tx.commit().await?;
        info!(job_id, "Job reset to pending");
        Ok(())
    }

    async fn cancel_job(&self, job_id: i64) -> Result<()> {
        self.terminate_job(job_id, JobStatus::Cancelled).await?;
        info!(job_id, "Job cancelled");
        Ok(())
    }

    async fn fail_job(&self, job_id: i64) -> Result<()> {
        self.terminate_job(job_id, JobStatus::Failed).await?;
        info!(job_id, "Job failed");
        Ok(())
    }

    async fn create_attempt(&self, job_id: i64, log_path: &Path) -> Result<i32> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let status = job_status_of(&mut tx, job_id).await?;
        if status.is_terminal() {
            return Err(PersistenceError::IllegalStateTransition {
                job_id,
                from: status.to_string(),
                to: JobStatus::Running.to_string(),
            });
        }

        let running: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM attempts WHERE job_id = $1 AND status = 'running'",
        )
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await?;
        if running > 0 {
            return Err(PersistenceError::AttemptAlreadyRunning { job_id });
        }

        transition_job(&mut tx, job_id, JobStatus::Running, now).await?;

        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM attempts WHERE job_id = $1")
            .bind(job_id)
            .fetch_one(&mut *tx)
            .await?;
        let attempt_number = i32::try_from(existing)
            .map_err(|e| PersistenceError::database("create_attempt", e))?;

        sqlx::query(
            r#"
            INSERT INTO attempts (job_id, attempt_number, log_path, status, created_at, updated_at)
            VALUES ($1, $2, $3, 'running', $4, $4)
            "#,
        )
        .bind(job_id)
        .bind(attempt_number)
        .bind(log_path_string(log_path))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(job_id, attempt_number, "Attempt created");
        Ok(attempt_number)
    }

    async fn succeed_attempt(&self, job_id: i64, attempt_number: i32) -> Result<()> {
        self.finish_attempt(
            job_id,
            attempt_number,
            AttemptStatus::Succeeded,
            JobStatus::Succeeded,
        )
        .await
    }

    async fn fail_attempt(&self, job_id: i64, attempt_number: i32) -> Result<()> {
        self.finish_attempt(
            job_id,
            attempt_number,
            AttemptStatus::Failed,
            JobStatus::Incomplete,
        )
        .await
    }

    async fn write_output(
        &self,
        job_id: i64,
        attempt_number: i32,
        output: &JobOutput,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE attempts SET output = $1, updated_at = $2
            WHERE job_id = $3 AND attempt_number = $4
            "#,
        )
        .bind(serde_json::to_string(output)?)
        .bind(Utc::now())
        .bind(job_id)
        .bind(attempt_number)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::AttemptNotFound {
                job_id,
                attempt_number,
            });
        }
        Ok(())
    }

    async fn write_attempt_failure_summary(
        &self,
        job_id: i64,
        attempt_number: i32,
        summary: &AttemptFailureSummary,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE attempts SET failure_summary = $1, updated_at = $2
            WHERE job_id = $3 AND attempt_number = $4
            "#,
        )
        .bind(serde_json::to_string(summary)?)
        .bind(Utc::now())
        .bind(job_id)
        .bind(attempt_number)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::AttemptNotFound {
                job_id,
                attempt_number,
            });
        }
        Ok(())
    }

    async fn write_stats(
        &self,
        job_id: i64,
        attempt_number: i32,
        total_stats: &SyncStats,
        stream_stats: &[StreamSyncStats],
    ) -> Result<()> {
        let attempt_id = self.attempt_id(job_id, attempt_number).await?;
        let now = Utc::now();
        let assignments = stats_upsert_assignments();
        let mut tx = self.pool.begin().await?;

        let sync_sql = format!(
            "INSERT INTO sync_stats (attempt_id, {STATS_COLUMNS}, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             ON CONFLICT (attempt_id) DO UPDATE SET {assignments}, updated_at = excluded.updated_at"
        );
        bind_stats(sqlx::query(&sync_sql).bind(attempt_id), total_stats)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let stream_sql = format!(
            "INSERT INTO stream_stats (attempt_id, stream_name, stream_namespace, {STATS_COLUMNS}, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18) \
             ON CONFLICT (attempt_id, stream_name, stream_namespace) DO UPDATE SET {assignments}, updated_at = excluded.updated_at"
        );
        for stream in stream_stats {
            let query = sqlx::query(&stream_sql)
                .bind(attempt_id)
                .bind(&stream.stream_name)
                .bind(stream.stream_namespace.as_deref().unwrap_or(""));
            bind_stats(query, &stream.stats)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_attempt_stats(&self, job_id: i64, attempt_number: i32) -> Result<AttemptStats> {
        let attempt_id = self.attempt_id(job_id, attempt_number).await?;

        let total_sql = format!("SELECT {STATS_COLUMNS} FROM sync_stats WHERE attempt_id = $1");
        let total = sqlx::query_as::<_, SyncStatsRecord>(&total_sql)
            .bind(attempt_id)
            .fetch_optional(&self.pool)
            .await?;

        let streams_sql = format!(
            "SELECT stream_name, stream_namespace, {STATS_COLUMNS} FROM stream_stats \
             WHERE attempt_id = $1 ORDER BY stream_namespace ASC, stream_name ASC"
        );
        let streams = sqlx::query_as::<_, StreamStatsRecord>(&streams_sql)
            .bind(attempt_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(AttemptStats {
            total_stats: total.map(SyncStats::from),
            stream_stats: streams.into_iter().map(StreamSyncStats::from).collect(),
        })
    }

    async fn get_job_count(&self, config_types: &[ConfigType], scope: &str) -> Result<i64> {
        if config_types.is_empty() {
            return Ok(0);
        }
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM jobs WHERE scope = ");
        builder.push_bind(scope);
        push_config_types(&mut builder, config_types);
        let count = builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn list_jobs(
        &self,
        config_types: &[ConfigType],
        scope: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Job>> {
        if config_types.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder = job_query();
        builder.push(" AND scope = ").push_bind(scope);
        push_config_types(&mut builder, config_types);
        builder.push(NEWEST_FIRST);
        builder.push(" LIMIT ").push_bind(limit);
        builder.push(" OFFSET ").push_bind(offset);
        self.fetch_jobs(builder).await
    }

    async fn list_jobs_with_status(
        &self,
        config_types: &[ConfigType],
        status: JobStatus,
    ) -> Result<Vec<Job>> {
        if config_types.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder = job_query();
        builder.push(" AND status = ").push_bind(status.as_str());
        push_config_types(&mut builder, config_types);
        builder.push(NEWEST_FIRST);
        self.fetch_jobs(builder).await
    }

    async fn list_jobs_for_scope_with_statuses(
        &self,
        scope: &str,
        config_types: &[ConfigType],
        statuses: &[JobStatus],
    ) -> Result<Vec<Job>> {
        if config_types.is_empty() || statuses.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder = job_query();
        builder.push(" AND scope = ").push_bind(scope);
        push_config_types(&mut builder, config_types);
        push_statuses(&mut builder, statuses);
        builder.push(NEWEST_FIRST);
        self.fetch_jobs(builder).await
    }

    async fn get_last_replication_job(&self, scope: &str) -> Result<Option<Job>> {
        let mut builder = job_query();
        builder.push(" AND scope = ").push_bind(scope);
        push_config_types(&mut builder, &ConfigType::REPLICATION);
        builder.push(NEWEST_FIRST).push(" LIMIT 1");
        self.first_job(builder).await
    }

    async fn get_first_replication_job(&self, scope: &str) -> Result<Option<Job>> {
        let mut builder = job_query();
        builder.push(" AND scope = ").push_bind(scope);
        push_config_types(&mut builder, &ConfigType::REPLICATION);
        builder.push(OLDEST_FIRST).push(" LIMIT 1");
        self.first_job(builder).await
    }

    async fn get_last_sync_job(&self, scope: &str) -> Result<Option<Job>> {
        let mut builder = job_query();
        builder.push(" AND scope = ").push_bind(scope);
        push_config_types(&mut builder, &[ConfigType::Sync]);
        builder.push(NEWEST_FIRST).push(" LIMIT 1");
        self.first_job(builder).await
    }

    async fn get_version(&self) -> Result<Option<String>> {
        self.get_metadata(METADATA_VERSION).await
    }

    async fn set_version(&self, version: &str) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        self.put_metadata(&mut conn, METADATA_VERSION, version).await
    }

    async fn get_deployment(&self) -> Result<Option<Uuid>> {
        self.get_metadata(METADATA_DEPLOYMENT_ID)
            .await?
            .map(|raw| {
                Uuid::parse_str(&raw)
                    .map_err(|e| PersistenceError::database("decode_deployment", e))
            })
            .transpose()
    }

    async fn set_deployment(&self, deployment_id: Uuid) -> Result<Uuid> {
        sqlx::query("INSERT INTO metadata (key, value) VALUES ($1, $2) ON CONFLICT (key) DO NOTHING")
            .bind(METADATA_DEPLOYMENT_ID)
            .bind(deployment_id.to_string())
            .execute(&self.pool)
            .await?;

        let effective = self.get_deployment().await?.ok_or_else(|| {
            PersistenceError::database("set_deployment", "deployment id missing after insert")
        })?;
        if effective != deployment_id {
            debug!(existing = %effective, requested = %deployment_id, "Deployment id already set");
        }
        Ok(effective)
    }

    async fn is_secret_migrated(&self) -> Result<bool> {
        Ok(self
            .get_metadata(METADATA_SECRET_MIGRATION)
            .await?
            .is_some_and(|v| v == "true"))
    }

    async fn set_secret_migration_done(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        self.put_metadata(&mut conn, METADATA_SECRET_MIGRATION, "true")
            .await
    }

    async fn get_protocol_version_range(&self) -> Result<Option<ProtocolVersionRange>> {
        let min = self.get_metadata(METADATA_PROTOCOL_VERSION_MIN).await?;
        let max = self.get_metadata(METADATA_PROTOCOL_VERSION_MAX).await?;
        Ok(min.zip(max).map(|(min, max)| ProtocolVersionRange { min, max }))
    }

    async fn set_protocol_version_range(&self, range: &ProtocolVersionRange) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        self.put_metadata(&mut tx, METADATA_PROTOCOL_VERSION_MIN, &range.min)
            .await?;
        self.put_metadata(&mut tx, METADATA_PROTOCOL_VERSION_MAX, &range.max)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn health_check_db(&self) -> Result<bool> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(true)
    }
}
