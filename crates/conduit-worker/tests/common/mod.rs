// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test utilities for replication worker tests.

#![allow(dead_code)]

use std::time::Duration;

use conduit_core::catalog::{
    ConfiguredCatalog, ConfiguredStream, DestinationSyncMode, StreamDefinition, SyncMode,
};
use conduit_core::job_config::NamespaceDefinition;
use conduit_core::output::ReplicationOutput;
use conduit_worker::config::ReplicationWorkerConfig;
use conduit_worker::heartbeat::HeartbeatConfig;
use conduit_worker::process::{MockDestination, MockSource};
use conduit_worker::{Message, ReplicationInput, ReplicationWorker};
use serde_json::json;

pub fn users_catalog() -> ConfiguredCatalog {
    ConfiguredCatalog {
        streams: vec![ConfiguredStream {
            stream: StreamDefinition {
                name: "users".to_string(),
                namespace: Some("public".to_string()),
                json_schema: json!({
                    "type": "object",
                    "properties": {"id": {"type": "integer"}}
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

pub fn input() -> ReplicationInput {
    ReplicationInput {
        namespace_definition: NamespaceDefinition::Source,
        namespace_format: None,
        prefix: None,
        source_configuration: json!({"host": "source.local"}),
        destination_configuration: json!({"host": "destination.local"}),
        catalog: users_catalog(),
        state: None,
    }
}

/// Fast polling and a generous heartbeat.
pub fn test_config() -> ReplicationWorkerConfig {
    ReplicationWorkerConfig {
        heartbeat: HeartbeatConfig {
            timeout: Duration::from_secs(3600),
            check_interval: Duration::from_secs(1),
        },
        cancel_grace_period: Duration::from_secs(5),
        read_poll_interval: Duration::from_millis(1),
        log_every_records: 1000,
    }
}

/// `count` user records with ids starting at `first_id`.
pub fn user_records(first_id: i64, count: i64) -> Vec<Message> {
    (first_id..first_id + count)
        .map(|id| Message::record("users", Some("public"), json!({"id": id})))
        .collect()
}

pub fn users_state(cursor: i64) -> Message {
    Message::stream_state("users", Some("public"), json!({"cursor": cursor}))
}

pub fn worker(source: MockSource, destination: MockDestination) -> ReplicationWorker {
    ReplicationWorker::new(7, 0, Box::new(source), Box::new(destination), test_config())
}

pub async fn run(source: MockSource, destination: MockDestination) -> ReplicationOutput {
    run_with_input(source, destination, &input()).await
}

pub async fn run_with_input(
    source: MockSource,
    destination: MockDestination,
    input: &ReplicationInput,
) -> ReplicationOutput {
    let dir = tempfile::tempdir().unwrap();
    worker(source, destination)
        .run(input, dir.path())
        .await
        .expect("worker should produce an output")
}
