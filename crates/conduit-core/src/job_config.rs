// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Typed job configuration and output payloads.
//!
//! Both are stored as JSON in a single column. The `config_type` tag keeps
//! each payload tied to the job's [`ConfigType`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::{ConfiguredCatalog, StreamDescriptor};
use crate::job::ConfigType;
use crate::output::{ReplicationOutput, State};

/// Where destination namespaces come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceDefinition {
    /// Keep the namespace the source declares.
    #[default]
    Source,
    /// Let the destination pick its default namespace.
    Destination,
    /// Use `namespace_format`, substituting `${SOURCE_NAMESPACE}`.
    CustomFormat,
}

/// Compute limits for connector processes. Unset fields inherit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_request: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<String>,
}

impl ResourceRequirements {
    /// Fill every unset field from `fallback`.
    pub fn or(self, fallback: &ResourceRequirements) -> ResourceRequirements {
        ResourceRequirements {
            cpu_request: self.cpu_request.or_else(|| fallback.cpu_request.clone()),
            cpu_limit: self.cpu_limit.or_else(|| fallback.cpu_limit.clone()),
            memory_request: self.memory_request.or_else(|| fallback.memory_request.clone()),
            memory_limit: self.memory_limit.or_else(|| fallback.memory_limit.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSyncConfig {
    pub namespace_definition: NamespaceDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    pub source_image: String,
    pub source_configuration: Value,
    pub destination_image: String,
    pub destination_configuration: Value,
    pub configured_catalog: ConfiguredCatalog,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,
    pub resource_requirements: ResourceRequirements,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResetConnectionConfig {
    pub namespace_definition: NamespaceDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    pub destination_image: String,
    pub destination_configuration: Value,
    pub configured_catalog: ConfiguredCatalog,
    pub streams_to_reset: Vec<StreamDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,
    pub resource_requirements: ResourceRequirements,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCheckConnectionConfig {
    pub image: String,
    pub connection_configuration: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDiscoverCatalogConfig {
    pub image: String,
    pub connection_configuration: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobGetSpecConfig {
    pub image: String,
}

/// Configuration of a job, one variant per [`ConfigType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "config_type", rename_all = "snake_case")]
pub enum JobConfig {
    Sync(JobSyncConfig),
    ResetConnection(JobResetConnectionConfig),
    CheckConnectionSource(JobCheckConnectionConfig),
    CheckConnectionDestination(JobCheckConnectionConfig),
    DiscoverSchema(JobDiscoverCatalogConfig),
    GetSpec(JobGetSpecConfig),
}

impl JobConfig {
    pub fn config_type(&self) -> ConfigType {
        match self {
            Self::Sync(_) => ConfigType::Sync,
            Self::ResetConnection(_) => ConfigType::ResetConnection,
            Self::CheckConnectionSource(_) => ConfigType::CheckConnectionSource,
            Self::CheckConnectionDestination(_) => ConfigType::CheckConnectionDestination,
            Self::DiscoverSchema(_) => ConfigType::DiscoverSchema,
            Self::GetSpec(_) => ConfigType::GetSpec,
        }
    }

    pub fn is_replication(&self) -> bool {
        self.config_type().is_replication()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckConnectionOutput {
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Output attached to an attempt once it finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum JobOutput {
    Sync(ReplicationOutput),
    CheckConnection(CheckConnectionOutput),
    DiscoverCatalog { catalog: Value },
    GetSpec { spec: Value },
}

impl JobOutput {
    pub fn sync(&self) -> Option<&ReplicationOutput> {
        match self {
            Self::Sync(output) => Some(output),
            _ => None,
        }
    }
}
