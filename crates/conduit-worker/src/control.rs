// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Connector configuration updates requested through control messages.

use serde_json::Value;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
#[error("Failed to update connector configuration: {0}")]
pub struct ConfigUpdateError(pub String);

/// Receives configuration updates emitted by connectors during a sync.
///
/// A failed update is logged; it never fails the sync.
pub trait ConnectorConfigUpdater: Send + Sync {
    fn update_source(&self, config: &Value) -> Result<(), ConfigUpdateError>;
    fn update_destination(&self, config: &Value) -> Result<(), ConfigUpdateError>;
}

/// Updater that only records that an update was requested.
#[derive(Debug, Default)]
pub struct LoggingConfigUpdater;

impl ConnectorConfigUpdater for LoggingConfigUpdater {
    fn update_source(&self, config: &Value) -> Result<(), ConfigUpdateError> {
        info!(
            keys = config.as_object().map_or(0, |o| o.len()),
            "Source requested a configuration update"
        );
        Ok(())
    }

    fn update_destination(&self, config: &Value) -> Result<(), ConfigUpdateError> {
        info!(
            keys = config.as_object().map_or(0, |o| o.len()),
            "Destination requested a configuration update"
        );
        Ok(())
    }
}
