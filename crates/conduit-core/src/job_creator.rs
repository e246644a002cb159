// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Builds replication job configurations and enqueues them.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::catalog::{ConfiguredCatalog, DestinationSyncMode, StreamDescriptor, SyncMode};
use crate::error::Result;
use crate::job_config::{
    JobConfig, JobResetConnectionConfig, JobSyncConfig, NamespaceDefinition, ResourceRequirements,
};
use crate::output::State;
use crate::persistence::JobPersistence;

/// Connection metadata a replication job is built from.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    /// Used as the job scope.
    pub connection_id: String,
    pub namespace_definition: NamespaceDefinition,
    pub namespace_format: Option<String>,
    pub prefix: Option<String>,
    pub catalog: ConfiguredCatalog,
    pub resource_requirements: Option<ResourceRequirements>,
}

/// A connector image and its configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectorSpec {
    pub image: String,
    pub configuration: Value,
}

/// Creates SYNC and RESET_CONNECTION jobs.
///
/// Both return `Ok(None)` when a replication job for the connection is
/// already in flight. That is the expected outcome of a duplicate request.
pub struct DefaultJobCreator {
    persistence: Arc<dyn JobPersistence>,
    worker_resource_requirements: ResourceRequirements,
}

impl DefaultJobCreator {
    pub fn new(
        persistence: Arc<dyn JobPersistence>,
        worker_resource_requirements: ResourceRequirements,
    ) -> Self {
        Self {
            persistence,
            worker_resource_requirements,
        }
    }

    /// Override > connection > worker default, field by field.
    fn resource_requirements(
        &self,
        connection: &Connection,
        overrides: Option<ResourceRequirements>,
    ) -> ResourceRequirements {
        let connection_level = connection
            .resource_requirements
            .clone()
            .unwrap_or_default()
            .or(&self.worker_resource_requirements);
        overrides.unwrap_or_default().or(&connection_level)
    }

    pub async fn create_sync_job(
        &self,
        connection: &Connection,
        source: &ConnectorSpec,
        destination: &ConnectorSpec,
        state: Option<State>,
        overrides: Option<ResourceRequirements>,
    ) -> Result<Option<i64>> {
        let config = JobConfig::Sync(JobSyncConfig {
            namespace_definition: connection.namespace_definition,
            namespace_format: connection.namespace_format.clone(),
            prefix: connection.prefix.clone(),
            source_image: source.image.clone(),
            source_configuration: source.configuration.clone(),
            destination_image: destination.image.clone(),
            destination_configuration: destination.configuration.clone(),
            configured_catalog: connection.catalog.clone(),
            state,
            resource_requirements: self.resource_requirements(connection, overrides),
        });

        let job_id = self
            .persistence
            .enqueue_job(&connection.connection_id, &config)
            .await?;
        info!(
            connection_id = %connection.connection_id,
            job_id = ?job_id,
            "Sync job requested"
        );
        Ok(job_id)
    }

    pub async fn create_reset_connection_job(
        &self,
        connection: &Connection,
        destination: &ConnectorSpec,
        streams_to_reset: &[StreamDescriptor],
        state: Option<State>,
    ) -> Result<Option<i64>> {
        let config = JobConfig::ResetConnection(JobResetConnectionConfig {
            namespace_definition: connection.namespace_definition,
            namespace_format: connection.namespace_format.clone(),
            prefix: connection.prefix.clone(),
            destination_image: destination.image.clone(),
            destination_configuration: destination.configuration.clone(),
            configured_catalog: reset_catalog(&connection.catalog, streams_to_reset),
            streams_to_reset: streams_to_reset.to_vec(),
            state,
            resource_requirements: self.resource_requirements(connection, None),
        });

        let job_id = self
            .persistence
            .enqueue_job(&connection.connection_id, &config)
            .await?;
        info!(
            connection_id = %connection.connection_id,
            streams = streams_to_reset.len(),
            job_id = ?job_id,
            "Reset job requested"
        );
        Ok(job_id)
    }
}

/// Catalog for a reset: streams being reset are overwritten, the rest are
/// appended to so the destination leaves them untouched.
pub fn reset_catalog(
    catalog: &ConfiguredCatalog,
    streams_to_reset: &[StreamDescriptor],
) -> ConfiguredCatalog {
    let reset: HashSet<&StreamDescriptor> = streams_to_reset.iter().collect();
    let streams = catalog
        .streams
        .iter()
        .cloned()
        .map(|mut configured| {
            configured.sync_mode = SyncMode::FullRefresh;
            configured.destination_sync_mode = if reset.contains(&configured.stream.descriptor()) {
                DestinationSyncMode::Overwrite
            } else {
                DestinationSyncMode::Append
            };
            configured
        })
        .collect();
    ConfiguredCatalog { streams }
}
