// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Record validation against the configured catalog.
//!
//! Validation never stops a sync. Violations are collected per stream and
//! logged once the source is drained; after a stream produced
//! [`MAX_INVALID_RECORDS_PER_STREAM`] invalid records, its remaining
//! records are no longer checked.

use conduit_core::catalog::{ConfiguredCatalog, StreamDescriptor};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use tracing::warn;

use crate::protocol::RecordMessage;

pub const MAX_INVALID_RECORDS_PER_STREAM: usize = 10;

#[derive(Debug, Error)]
#[error("Invalid JSON schema for stream {stream}: {message}")]
pub struct SchemaCompileError {
    pub stream: StreamDescriptor,
    pub message: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Record in stream {stream} does not match its schema: {}", .errors.iter().cloned().collect::<Vec<_>>().join("; "))]
pub struct RecordValidationError {
    pub stream: StreamDescriptor,
    pub errors: BTreeSet<String>,
}

struct StreamSchema {
    validator: jsonschema::Validator,
    /// Top-level properties, when the schema declares any.
    fields: Option<BTreeSet<String>>,
}

pub struct RecordSchemaValidator {
    schemas: HashMap<StreamDescriptor, StreamSchema>,
}

impl RecordSchemaValidator {
    /// Compile one validator per stream. Streams without a schema are not validated.
    pub fn from_catalog(catalog: &ConfiguredCatalog) -> Result<Self, SchemaCompileError> {
        let mut schemas = HashMap::new();
        for configured in &catalog.streams {
            let schema = &configured.stream.json_schema;
            if schema.is_null() {
                continue;
            }
            let descriptor = configured.stream.descriptor();
            let validator =
                jsonschema::validator_for(schema).map_err(|e| SchemaCompileError {
                    stream: descriptor.clone(),
                    message: e.to_string(),
                })?;
            let fields = schema
                .get("properties")
                .and_then(Value::as_object)
                .map(|props| props.keys().cloned().collect());
            schemas.insert(descriptor, StreamSchema { validator, fields });
        }
        Ok(Self { schemas })
    }

    pub fn validate(&self, record: &RecordMessage) -> Result<(), RecordValidationError> {
        let stream = record.descriptor();
        let Some(schema) = self.schemas.get(&stream) else {
            return Ok(());
        };
        let errors: BTreeSet<String> = schema
            .validator
            .iter_errors(&record.data)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(RecordValidationError { stream, errors })
        }
    }

    /// Top-level fields of the record the schema does not declare.
    pub fn unexpected_fields(&self, record: &RecordMessage) -> Vec<String> {
        let declared = self
            .schemas
            .get(&record.descriptor())
            .and_then(|s| s.fields.as_ref());
        match (declared, record.data.as_object()) {
            (Some(declared), Some(data)) => data
                .keys()
                .filter(|k| !declared.contains(k.as_str()))
                .cloned()
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct StreamViolations {
    invalid_records: usize,
    errors: BTreeSet<String>,
    records_with_unexpected_fields: usize,
    unexpected_fields: BTreeSet<String>,
}

/// Validation results of one attempt.
#[derive(Debug, Default)]
pub struct ValidationReport {
    streams: HashMap<StreamDescriptor, StreamViolations>,
}

impl ValidationReport {
    /// Validate `record` unless its stream already reached the sampling limit.
    /// Unexpected fields are sampled from the same number of records.
    pub fn check(&mut self, validator: &RecordSchemaValidator, record: &RecordMessage) {
        let stream = record.descriptor();
        let violations = self.streams.entry(stream).or_default();

        if violations.records_with_unexpected_fields < MAX_INVALID_RECORDS_PER_STREAM {
            let unexpected = validator.unexpected_fields(record);
            if !unexpected.is_empty() {
                violations.records_with_unexpected_fields += 1;
                violations.unexpected_fields.extend(unexpected);
            }
        }

        if violations.invalid_records >= MAX_INVALID_RECORDS_PER_STREAM {
            return;
        }
        if let Err(e) = validator.validate(record) {
            violations.invalid_records += 1;
            violations.errors.extend(e.errors);
        }
    }

    pub fn invalid_records(&self, stream: &StreamDescriptor) -> usize {
        self.streams.get(stream).map_or(0, |v| v.invalid_records)
    }

    pub fn errors(&self, stream: &StreamDescriptor) -> Option<&BTreeSet<String>> {
        self.streams
            .get(stream)
            .map(|v| &v.errors)
            .filter(|e| !e.is_empty())
    }

    pub fn unexpected_fields(&self, stream: &StreamDescriptor) -> Option<&BTreeSet<String>> {
        self.streams
            .get(stream)
            .map(|v| &v.unexpected_fields)
            .filter(|f| !f.is_empty())
    }

    pub fn log(&self) {
        for (stream, violations) in &self.streams {
            if !violations.errors.is_empty() {
                warn!(
                    stream = %stream,
                    invalid_records = violations.invalid_records,
                    errors = ?violations.errors,
                    "Records did not match the stream schema"
                );
            }
            if !violations.unexpected_fields.is_empty() {
                warn!(
                    stream = %stream,
                    fields = ?violations.unexpected_fields,
                    "Records contain fields missing from the stream schema"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Message;
    use conduit_core::catalog::{
        ConfiguredStream, DestinationSyncMode, StreamDefinition, SyncMode,
    };
    use serde_json::json;

    fn catalog(schema: Value) -> ConfiguredCatalog {
        ConfiguredCatalog {
            streams: vec![ConfiguredStream {
                stream: StreamDefinition {
                    name: "users".to_string(),
                    namespace: None,
                    json_schema: schema,
                    supported_sync_modes: vec![SyncMode::FullRefresh],
                },
                sync_mode: SyncMode::FullRefresh,
                destination_sync_mode: DestinationSyncMode::Append,
                cursor_field: vec![],
                primary_key: vec![],
            }],
        }
    }

    fn record(data: Value) -> RecordMessage {
        match Message::record("users", None, data) {
            Message::Record { record } => record,
            _ => unreachable!(),
        }
    }

    fn users_schema() -> Value {
        json!({
            "type": "object",
            "properties": {"id": {"type": "integer"}, "name": {"type": "string"}},
            "required": ["id"]
        })
    }

    #[test]
    fn test_valid_and_invalid_records() {
        let validator = RecordSchemaValidator::from_catalog(&catalog(users_schema())).unwrap();

        assert!(validator.validate(&record(json!({"id": 1, "name": "a"}))).is_ok());
        let error = validator.validate(&record(json!({"name": 5}))).unwrap_err();
        assert_eq!(error.stream, StreamDescriptor::new("users", None));
        assert_eq!(error.errors.len(), 2);
    }

    #[test]
    fn test_unknown_stream_is_not_validated() {
        let validator = RecordSchemaValidator::from_catalog(&catalog(users_schema())).unwrap();
        let other = match Message::record("orders", None, json!("not an object")) {
            Message::Record { record } => record,
            _ => unreachable!(),
        };
        assert!(validator.validate(&other).is_ok());
    }

    #[test]
    fn test_unexpected_fields() {
        let validator = RecordSchemaValidator::from_catalog(&catalog(users_schema())).unwrap();
        assert_eq!(
            validator.unexpected_fields(&record(json!({"id": 1, "email": "x"}))),
            vec!["email".to_string()]
        );
    }

    #[test]
    fn test_invalid_schema_is_rejected() {
        let result = RecordSchemaValidator::from_catalog(&catalog(json!({"type": 12})));
        assert!(result.is_err());
    }

    #[test]
    fn test_report_samples_at_most_ten_invalid_records() {
        let validator = RecordSchemaValidator::from_catalog(&catalog(users_schema())).unwrap();
        let mut report = ValidationReport::default();
        for _ in 0..25 {
            report.check(&validator, &record(json!({"id": "nope"})));
        }
        report.check(&validator, &record(json!({"id": 1})));

        let users = StreamDescriptor::new("users", None);
        assert_eq!(report.invalid_records(&users), MAX_INVALID_RECORDS_PER_STREAM);
        assert_eq!(report.errors(&users).unwrap().len(), 1);
    }

    #[test]
    fn test_report_samples_unexpected_fields_from_ten_records() {
        let validator = RecordSchemaValidator::from_catalog(&catalog(users_schema())).unwrap();
        let mut report = ValidationReport::default();
        for i in 0..100 {
            let mut data = json!({"id": i});
            data[format!("key_{i}")] = json!(true);
            report.check(&validator, &record(data));
        }

        let users = StreamDescriptor::new("users", None);
        let fields = report.unexpected_fields(&users).unwrap();
        assert_eq!(fields.len(), MAX_INVALID_RECORDS_PER_STREAM);
        assert!(fields.contains("key_0"));
        assert!(!fields.contains("key_10"));
        assert_eq!(report.invalid_records(&users), 0);
    }
}
