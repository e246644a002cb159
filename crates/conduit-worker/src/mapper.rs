// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Namespace and stream-name mapping between source and destination.

use conduit_core::catalog::ConfiguredCatalog;
use conduit_core::job_config::NamespaceDefinition;

use crate::protocol::Message;

/// Placeholder replaced by the source namespace in a custom format.
pub const SOURCE_NAMESPACE_PLACEHOLDER: &str = "${SOURCE_NAMESPACE}";

#[derive(Debug, Clone)]
pub struct NamespacingMapper {
    namespace_definition: NamespaceDefinition,
    namespace_format: Option<String>,
    prefix: String,
}

impl NamespacingMapper {
    pub fn new(
        namespace_definition: NamespaceDefinition,
        namespace_format: Option<String>,
        prefix: Option<String>,
    ) -> Self {
        Self {
            namespace_definition,
            namespace_format,
            prefix: prefix.unwrap_or_default(),
        }
    }

    pub fn map_catalog(&self, catalog: &ConfiguredCatalog) -> ConfiguredCatalog {
        let mut mapped = catalog.clone();
        for configured in &mut mapped.streams {
            configured.stream.namespace = self.namespace(configured.stream.namespace.as_deref());
            configured.stream.name = self.stream_name(&configured.stream.name);
        }
        mapped
    }

    /// Rewrite records for the destination. Other messages pass unchanged.
    pub fn map_message(&self, message: Message) -> Message {
        match message {
            Message::Record { mut record } => {
                record.namespace = self.namespace(record.namespace.as_deref());
                record.stream = self.stream_name(&record.stream);
                Message::Record { record }
            }
            other => other,
        }
    }

    fn namespace(&self, source_namespace: Option<&str>) -> Option<String> {
        match self.namespace_definition {
            NamespaceDefinition::Source => source_namespace.map(str::to_string),
            NamespaceDefinition::Destination => None,
            NamespaceDefinition::CustomFormat => {
                let format = self.namespace_format.as_deref().unwrap_or_default();
                let namespace = format
                    .replace(SOURCE_NAMESPACE_PLACEHOLDER, source_namespace.unwrap_or_default());
                let namespace = namespace.trim();
                (!namespace.is_empty()).then(|| namespace.to_string())
            }
        }
    }

    fn stream_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }
}
