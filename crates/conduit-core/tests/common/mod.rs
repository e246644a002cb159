// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for conduit-core integration tests.

#![allow(dead_code)]

use std::path::Path;

use serde_json::json;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use uuid::Uuid;

use conduit_core::catalog::{
    ConfiguredCatalog, ConfiguredStream, DestinationSyncMode, StreamDefinition, SyncMode,
};
use conduit_core::job_config::{
    JobConfig, JobGetSpecConfig, JobSyncConfig, NamespaceDefinition, ResourceRequirements,
};
use conduit_core::migrations;
use conduit_core::output::{
    FailureMetadata, FailureOrigin, FailureReason, ReplicationAttemptSummary, ReplicationOutput,
    ReplicationStatus, State, StreamSyncStats, SyncStats,
};
use conduit_core::persistence::{PostgresJobPersistence, SqliteJobPersistence};

/// In-memory SQLite persistence with migrations applied.
pub async fn sqlite_persistence() -> SqliteJobPersistence {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");
    migrations::run_sqlite(&pool)
        .await
        .expect("Failed to run migrations");
    SqliteJobPersistence::new(pool)
}

/// File-backed SQLite persistence with several pooled connections, so that
/// concurrent calls really race.
pub async fn shared_sqlite_persistence(dir: &Path) -> SqliteJobPersistence {
    let options = SqliteConnectOptions::new()
        .filename(dir.join("jobs.db"))
        .create_if_missing(true)
        .busy_timeout(std::time::Duration::from_secs(10));
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .expect("Failed to open SQLite database");
    migrations::run_sqlite(&pool)
        .await
        .expect("Failed to run migrations");
    SqliteJobPersistence::new(pool)
}

/// PostgreSQL persistence from `TEST_DATABASE_URL`, if set.
pub async fn postgres_persistence() -> Option<PostgresJobPersistence> {
    let database_url = std::env::var("TEST_DATABASE_URL").ok()?;
    PostgresJobPersistence::connect(&database_url, 4).await.ok()
}

/// Scope that does not collide with other tests sharing a database.
pub fn unique_scope() -> String {
    format!("conn-{}", Uuid::new_v4())
}

pub fn catalog() -> ConfiguredCatalog {
    ConfiguredCatalog {
        streams: vec![ConfiguredStream {
            stream: StreamDefinition {
                name: "users".to_string(),
                namespace: Some("public".to_string()),
                json_schema: json!({
                    "type": "object",
                    "properties": {"id": {"type": "integer"}, "name": {"type": "string"}}
                }),
                supported_sync_modes: vec![SyncMode::FullRefresh, SyncMode::Incremental],
            },
            sync_mode: SyncMode::Incremental,
            destination_sync_mode: DestinationSyncMode::Append,
            cursor_field: vec!["id".to_string()],
            primary_key: vec![vec!["id".to_string()]],
        }],
    }
}

pub fn sync_config() -> JobConfig {
    JobConfig::Sync(JobSyncConfig {
        namespace_definition: NamespaceDefinition::Source,
        namespace_format: None,
        prefix: Some("raw_".to_string()),
        source_image: "source-postgres:1.2.0".to_string(),
        source_configuration: json!({"host": "db", "port": 5432}),
        destination_image: "destination-bigquery:2.0.0".to_string(),
        destination_configuration: json!({"dataset": "analytics"}),
        configured_catalog: catalog(),
        state: Some(State::new(json!({"cursor": 10}))),
        resource_requirements: ResourceRequirements::default(),
    })
}

pub fn spec_config() -> JobConfig {
    JobConfig::GetSpec(JobGetSpecConfig {
        image: "source-postgres:1.2.0".to_string(),
    })
}

pub fn replication_output(status: ReplicationStatus) -> ReplicationOutput {
    let stats = SyncStats {
        records_emitted: 12,
        bytes_emitted: 480,
        records_committed: Some(10),
        bytes_committed: Some(400),
        source_state_messages_emitted: 3,
        destination_state_messages_emitted: 2,
        estimated_records: Some(20),
        estimated_bytes: None,
        replication_start_time: Some(1_700_000_000_000),
        replication_end_time: Some(1_700_000_060_000),
        source_read_start_time: Some(1_700_000_000_100),
        source_read_end_time: Some(1_700_000_050_000),
        destination_write_start_time: Some(1_700_000_000_200),
        destination_write_end_time: None,
    };
    ReplicationOutput {
        replication_attempt_summary: ReplicationAttemptSummary {
            status,
            records_synced: 10,
            bytes_synced: 400,
            start_time: 1_700_000_000_000,
            end_time: 1_700_000_060_000,
            total_stats: stats.clone(),
            stream_stats: vec![StreamSyncStats {
                stream_name: "users".to_string(),
                stream_namespace: Some("public".to_string()),
                stats,
            }],
        },
        output_catalog: catalog(),
        state: Some(State::new(json!([{"type": "STREAM", "stream": {"stream_descriptor": {"name": "users"}, "stream_state": {"cursor": 10}}}]))),
        failures: vec![FailureReason {
            failure_origin: FailureOrigin::Destination,
            failure_type: None,
            external_message: "Destination process exited with non-zero exit code 1".to_string(),
            internal_message: None,
            stacktrace: Some("at write()".to_string()),
            retryable: Some(true),
            timestamp: 1_700_000_059_000,
            metadata: FailureMetadata {
                job_id: Some(1),
                attempt_number: Some(0),
                from_trace_message: false,
            },
        }],
    }
}
