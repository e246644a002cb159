// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Replication worker: runs one sync attempt.
//!
//! Two tasks run side by side:
//!
//! - the replication task reads the source, validates and tracks every
//!   message, maps records and forwards records and checkpoints to the
//!   destination
//! - the destination task reads what the destination emits (acknowledged
//!   checkpoints, traces) into the tracker
//!
//! A supervisor loop watches both tasks, the source heartbeat and the
//! cancel signal. Once both tasks are done the connectors are shut down
//! (source first) and the output is assembled from the tracker.

use conduit_core::catalog::ConfiguredCatalog;
use conduit_core::job_config::{JobSyncConfig, NamespaceDefinition};
use conduit_core::output::{
    FailureOrigin, FailureReason, ReplicationAttemptSummary, ReplicationOutput,
    ReplicationStatus, State, StreamSyncStats, SyncStats,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinError;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::ReplicationWorkerConfig;
use crate::control::{ConnectorConfigUpdater, LoggingConfigUpdater};
use crate::error::{RelayError, Result, WorkerError};
use crate::failure::FailureReporter;
use crate::heartbeat::HeartbeatMonitor;
use crate::mapper::NamespacingMapper;
use crate::process::{
    Destination, DestinationLaunchConfig, Source, SourceLaunchConfig, exit_code_accepted,
};
use crate::protocol::Message;
use crate::tracker::{MessageTracker, TrackerSnapshot};
use crate::validator::{RecordSchemaValidator, ValidationReport};

type SharedSource = Arc<Mutex<Box<dyn Source>>>;
type SharedDestination = Arc<Mutex<Box<dyn Destination>>>;
type TaskResult = std::result::Result<(), RelayError>;

/// Everything a replication attempt needs besides the connectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationInput {
    #[serde(default)]
    pub namespace_definition: NamespaceDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    pub source_configuration: Value,
    pub destination_configuration: Value,
    pub catalog: ConfiguredCatalog,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,
}

impl From<&JobSyncConfig> for ReplicationInput {
    fn from(config: &JobSyncConfig) -> Self {
        Self {
            namespace_definition: config.namespace_definition,
            namespace_format: config.namespace_format.clone(),
            prefix: config.prefix.clone(),
            source_configuration: config.source_configuration.clone(),
            destination_configuration: config.destination_configuration.clone(),
            catalog: config.configured_catalog.clone(),
            state: config.state.clone(),
        }
    }
}

/// Requests cancellation of a running worker. Cloneable and usable from any task.
#[derive(Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Default, Clone, Copy)]
struct Timings {
    replication_start: Option<i64>,
    replication_end: Option<i64>,
    source_read_start: Option<i64>,
    source_read_end: Option<i64>,
    destination_write_start: Option<i64>,
    destination_write_end: Option<i64>,
}

/// State shared by the relay tasks and the supervisor.
struct Relay {
    source: SharedSource,
    destination: SharedDestination,
    tracker: Arc<MessageTracker>,
    mapper: NamespacingMapper,
    validator: RecordSchemaValidator,
    heartbeat: HeartbeatMonitor,
    config_updater: Arc<dyn ConnectorConfigUpdater>,
    cancel: CancelHandle,
    heartbeat_timed_out: AtomicBool,
    destination_failed: AtomicBool,
    end_of_input_sent: AtomicBool,
    timings: std::sync::Mutex<Timings>,
    poll_interval: Duration,
    log_every_records: i64,
}

impl Relay {
    fn mark(&self, update: impl FnOnce(&mut Timings)) {
        update(&mut self.timings.lock().unwrap_or_else(PoisonError::into_inner));
    }

    fn timings(&self) -> Timings {
        *self.timings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// True once the worker itself asked the source to stop.
    fn source_terminated(&self) -> bool {
        self.is_cancelled() || self.heartbeat_timed_out.load(Ordering::SeqCst)
    }

    fn stop_reading(&self) -> bool {
        self.is_cancelled()
            || self.heartbeat_timed_out.load(Ordering::SeqCst)
            || self.destination_failed.load(Ordering::SeqCst)
    }

    /// Close the destination's input. Only the first call reaches the destination.
    async fn signal_end_of_input(&self) -> TaskResult {
        if self.end_of_input_sent.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.destination
            .lock()
            .await
            .notify_end_of_input()
            .await
            .map_err(RelayError::DestinationEndOfInput)
    }

    async fn handle_source_message(
        &self,
        message: Message,
        report: &mut ValidationReport,
    ) -> TaskResult {
        match &message {
            Message::Record { record } => report.check(&self.validator, record),
            Message::Control { control } => {
                if let Some(update) = &control.connector_config
                    && let Err(e) = self.config_updater.update_source(&update.config)
                {
                    error!(error = %e, "Error updating source configuration");
                }
            }
            Message::Log { log } => info!(component = "source", level = ?log.level, "{}", log.message),
            Message::State { .. } => debug!("Source emitted a checkpoint"),
            Message::Trace { .. } => {}
        }

        self.tracker
            .accept_from_source(&message)
            .map_err(RelayError::Tracking)?;

        if message.is_forwarded() {
            let mapped = self.mapper.map_message(message);
            self.destination
                .lock()
                .await
                .accept(&mapped)
                .await
                .map_err(RelayError::DestinationWrite)?;
        }
        Ok(())
    }

    fn handle_destination_message(&self, message: Message) -> TaskResult {
        match &message {
            Message::State { .. } => debug!("Destination acknowledged a checkpoint"),
            Message::Control { control } => {
                if let Some(update) = &control.connector_config
                    && let Err(e) = self.config_updater.update_destination(&update.config)
                {
                    error!(error = %e, "Error updating destination configuration");
                }
            }
            Message::Log { log } => {
                info!(component = "destination", level = ?log.level, "{}", log.message)
            }
            Message::Record { .. } | Message::Trace { .. } => {}
        }
        self.tracker
            .accept_from_destination(&message)
            .map_err(RelayError::Tracking)
    }

    /// Stop the source after the replication task is done with it.
    async fn shutdown_source(&self) -> Option<RelayError> {
        let mut source = self.source.lock().await;
        if source.is_finished() {
            return source.close().await.err().map(RelayError::SourceClose);
        }
        if let Err(e) = source.cancel().await {
            warn!(error = %e, "Failed to stop source");
        }
        None
    }

    async fn shutdown_destination(&self) -> Option<RelayError> {
        let mut destination = self.destination.lock().await;
        if destination.is_finished() {
            return destination
                .close()
                .await
                .err()
                .map(RelayError::DestinationClose);
        }
        if let Err(e) = destination.cancel().await {
            warn!(error = %e, "Failed to stop destination");
        }
        None
    }

    async fn kill_connectors(&self) {
        if let Err(e) = self.source.lock().await.cancel().await {
            warn!(error = %e, "Failed to kill source");
        }
        if let Err(e) = self.destination.lock().await.cancel().await {
            warn!(error = %e, "Failed to kill destination");
        }
    }
}

/// Read the source until it finishes, forwarding to the destination.
async fn replicate(relay: Arc<Relay>) -> TaskResult {
    relay.mark(|t| t.source_read_start = Some(now_millis()));
    let mut report = ValidationReport::default();
    let mut records_read: i64 = 0;

    let result = loop {
        if relay.stop_reading() {
            break Ok(());
        }
        let read = {
            let mut source = relay.source.lock().await;
            if source.is_finished() {
                break Ok(());
            }
            source.attempt_read().await
        };
        match read {
            Ok(Some(message)) => {
                relay.heartbeat.beat();
                let is_record = matches!(message, Message::Record { .. });
                if let Err(e) = relay.handle_source_message(message, &mut report).await {
                    break Err(e);
                }
                if is_record {
                    records_read += 1;
                    if records_read % relay.log_every_records == 0 {
                        info!(records = records_read, "Records read");
                    }
                }
            }
            Ok(None) => tokio::time::sleep(relay.poll_interval).await,
            Err(e) => break Err(RelayError::SourceRead(e)),
        }
    };

    relay.mark(|t| t.source_read_end = Some(now_millis()));
    report.log();
    info!(records = records_read, "Source finished reading");
    result?;

    if relay.destination_failed.load(Ordering::SeqCst) {
        return Ok(());
    }
    relay.signal_end_of_input().await?;

    let exit = relay.source.lock().await.exit_value();
    match exit {
        Some(code) if !exit_code_accepted(code, relay.source_terminated()) => {
            Err(RelayError::SourceExit(code))
        }
        _ => Ok(()),
    }
}

/// Read destination output until the destination finishes.
async fn drain_destination(relay: Arc<Relay>) -> TaskResult {
    relay.mark(|t| t.destination_write_start = Some(now_millis()));

    let result = loop {
        if relay.is_cancelled() {
            break Ok(());
        }
        let read = {
            let mut destination = relay.destination.lock().await;
            if destination.is_finished() {
                break Ok(());
            }
            destination.attempt_read().await
        };
        match read {
            Ok(Some(message)) => {
                if let Err(e) = relay.handle_destination_message(message) {
                    break Err(e);
                }
            }
            Ok(None) => tokio::time::sleep(relay.poll_interval).await,
            Err(e) => break Err(RelayError::DestinationRead(e)),
        }
    };

    relay.mark(|t| t.destination_write_end = Some(now_millis()));
    result?;

    let exit = relay.destination.lock().await.exit_value();
    match exit {
        Some(code) if !exit_code_accepted(code, relay.is_cancelled()) => {
            Err(RelayError::DestinationExit(code))
        }
        _ => Ok(()),
    }
}

fn flatten(joined: std::result::Result<TaskResult, JoinError>) -> TaskResult {
    joined.unwrap_or_else(|e| Err(RelayError::Aborted(e.to_string())))
}

fn origin_rank(origin: FailureOrigin) -> u8 {
    match origin {
        FailureOrigin::Source => 0,
        FailureOrigin::Replication => 1,
        FailureOrigin::Destination => 2,
    }
}

/// What the supervisor observed while the tasks ran.
#[derive(Default)]
struct RunOutcome {
    task_errors: Vec<RelayError>,
    heartbeat_failure: Option<FailureReason>,
}

/// Runs a single replication attempt between one source and one destination.
pub struct ReplicationWorker {
    job_id: i64,
    attempt_number: i32,
    source: SharedSource,
    destination: SharedDestination,
    tracker: Arc<MessageTracker>,
    config_updater: Arc<dyn ConnectorConfigUpdater>,
    config: ReplicationWorkerConfig,
    cancel: CancelHandle,
}

impl ReplicationWorker {
    pub fn new(
        job_id: i64,
        attempt_number: i32,
        source: Box<dyn Source>,
        destination: Box<dyn Destination>,
        config: ReplicationWorkerConfig,
    ) -> Self {
        Self {
            job_id,
            attempt_number,
            source: Arc::new(Mutex::new(source)),
            destination: Arc::new(Mutex::new(destination)),
            tracker: Arc::new(MessageTracker::new()),
            config_updater: Arc::new(LoggingConfigUpdater),
            config,
            cancel: CancelHandle::default(),
        }
    }

    pub fn with_tracker(mut self, tracker: Arc<MessageTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_config_updater(mut self, updater: Arc<dyn ConnectorConfigUpdater>) -> Self {
        self.config_updater = updater;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Request cooperative cancellation; connectors are killed after the grace period.
    pub fn cancel(&self) {
        info!(job_id = self.job_id, attempt = self.attempt_number, "Cancelling replication");
        self.cancel.cancel();
    }

    /// Run the attempt to completion.
    ///
    /// Connector failures are reported inside the output; `Err` means no
    /// output could be produced.
    pub async fn run(&self, input: &ReplicationInput, job_root: &Path) -> Result<ReplicationOutput> {
        info!(
            job_id = self.job_id,
            attempt = self.attempt_number,
            job_root = %job_root.display(),
            "Starting replication worker"
        );
        tokio::fs::create_dir_all(job_root)
            .await
            .map_err(|source| WorkerError::JobRoot {
                path: job_root.to_path_buf(),
                source,
            })?;

        let mapper = NamespacingMapper::new(
            input.namespace_definition,
            input.namespace_format.clone(),
            input.prefix.clone(),
        );
        let destination_catalog = mapper.map_catalog(&input.catalog);
        let relay = Arc::new(Relay {
            source: self.source.clone(),
            destination: self.destination.clone(),
            tracker: self.tracker.clone(),
            validator: RecordSchemaValidator::from_catalog(&input.catalog)?,
            mapper,
            heartbeat: HeartbeatMonitor::new(self.config.heartbeat.timeout),
            config_updater: self.config_updater.clone(),
            cancel: self.cancel.clone(),
            heartbeat_timed_out: AtomicBool::new(false),
            destination_failed: AtomicBool::new(false),
            end_of_input_sent: AtomicBool::new(false),
            timings: std::sync::Mutex::new(Timings::default()),
            poll_interval: self.config.read_poll_interval,
            log_every_records: self.config.log_every_records.max(1),
        });
        relay.mark(|t| t.replication_start = Some(now_millis()));
        let reporter = FailureReporter::new(self.job_id, self.attempt_number);

        let destination_config = DestinationLaunchConfig {
            destination_configuration: input.destination_configuration.clone(),
            catalog: destination_catalog.clone(),
        };
        let started = self
            .destination
            .lock()
            .await
            .start(&destination_config, job_root)
            .await;
        if let Err(e) = started {
            error!(error = %e, "Destination failed to start");
            let failure = reporter.start_failure(FailureOrigin::Destination, &e);
            return Ok(self.build_output(&relay, input, destination_catalog, vec![failure]));
        }

        let source_config = SourceLaunchConfig {
            source_configuration: input.source_configuration.clone(),
            catalog: input.catalog.clone(),
            state: input.state.clone(),
        };
        let started = self.source.lock().await.start(&source_config, job_root).await;
        if let Err(e) = started {
            error!(error = %e, "Source failed to start");
            if let Err(e) = self.destination.lock().await.cancel().await {
                warn!(error = %e, "Failed to stop destination");
            }
            let failure = reporter.start_failure(FailureOrigin::Source, &e);
            return Ok(self.build_output(&relay, input, destination_catalog, vec![failure]));
        }

        relay.heartbeat.beat();
        let outcome = self.supervise(&relay, &reporter).await;

        let mut failures = Vec::new();
        if !relay.is_cancelled()
            && (outcome.heartbeat_failure.is_some() || !outcome.task_errors.is_empty())
        {
            let trace = self.tracker.first_error_trace();
            let trace_origin = trace.as_ref().map(|(origin, _)| *origin);
            if let Some((origin, trace)) = &trace {
                failures.push(reporter.from_trace(*origin, trace));
            }
            failures.extend(outcome.heartbeat_failure);

            let mut task_errors = outcome.task_errors;
            task_errors.sort_by_key(|e| origin_rank(e.origin()));
            for error in &task_errors {
                if error.is_exit_code() && trace_origin == Some(error.origin()) {
                    continue;
                }
                failures.push(reporter.from_relay(error));
            }
        }

        Ok(self.build_output(&relay, input, destination_catalog, failures))
    }

    async fn supervise(&self, relay: &Arc<Relay>, reporter: &FailureReporter) -> RunOutcome {
        let mut outcome = RunOutcome::default();
        let mut replication = tokio::spawn(replicate(relay.clone()));
        let mut destination = tokio::spawn(drain_destination(relay.clone()));
        let mut replication_done = false;
        let mut destination_done = false;
        let mut cancel_requested = false;

        let mut heartbeat_check = tokio::time::interval(self.config.heartbeat.check_interval);
        heartbeat_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat_check.tick().await;

        while !(replication_done && destination_done) {
            tokio::select! {
                _ = self.cancel.notify.notified() => {
                    info!("Cancellation requested, stopping relay tasks");
                    cancel_requested = true;
                    break;
                }

                joined = &mut replication, if !replication_done => {
                    replication_done = true;
                    if let Err(e) = flatten(joined) {
                        error!(error = %e, "Replication task failed");
                        if let Err(eoi) = relay.signal_end_of_input().await {
                            debug!(error = %eoi, "Could not close destination input");
                        }
                        outcome.task_errors.push(e);
                    }
                    outcome.task_errors.extend(relay.shutdown_source().await);
                }

                joined = &mut destination, if !destination_done => {
                    destination_done = true;
                    if let Err(e) = flatten(joined) {
                        error!(error = %e, "Destination task failed");
                        relay.destination_failed.store(true, Ordering::SeqCst);
                        outcome.task_errors.push(e);
                    }
                }

                _ = heartbeat_check.tick(), if !replication_done && outcome.heartbeat_failure.is_none() => {
                    if relay.heartbeat.is_beating() == Some(false) {
                        let mut source = relay.source.lock().await;
                        if !source.is_finished() {
                            let silence = relay.heartbeat.time_since_last_beat().unwrap_or_default();
                            warn!(silence_secs = silence.as_secs(), "Source heartbeat timed out, stopping source");
                            outcome.heartbeat_failure =
                                Some(reporter.heartbeat_timeout(silence, relay.heartbeat.timeout()));
                            relay.heartbeat_timed_out.store(true, Ordering::SeqCst);
                            if let Err(e) = source.cancel().await {
                                warn!(error = %e, "Failed to stop stalled source");
                            }
                        }
                    }
                }
            }
        }

        if cancel_requested {
            let deadline = Instant::now() + self.config.cancel_grace_period;
            if !replication_done && tokio::time::timeout_at(deadline, &mut replication).await.is_err() {
                warn!("Replication task did not stop within the grace period, aborting");
                replication.abort();
            }
            if !destination_done && tokio::time::timeout_at(deadline, &mut destination).await.is_err() {
                warn!("Destination task did not stop within the grace period, aborting");
                destination.abort();
            }
            relay.kill_connectors().await;
        } else {
            outcome.task_errors.extend(relay.shutdown_destination().await);
        }

        outcome
    }

    fn build_output(
        &self,
        relay: &Relay,
        input: &ReplicationInput,
        destination_catalog: ConfiguredCatalog,
        failures: Vec<FailureReason>,
    ) -> ReplicationOutput {
        relay.mark(|t| t.replication_end = Some(now_millis()));
        let timings = relay.timings();
        let snapshot = self.tracker.snapshot();

        let status = if relay.is_cancelled() {
            ReplicationStatus::Cancelled
        } else if !failures.is_empty() {
            ReplicationStatus::Failed
        } else {
            ReplicationStatus::Completed
        };
        let completed = status == ReplicationStatus::Completed;

        let mut total_stats = totals(&snapshot, completed);
        total_stats.replication_start_time = timings.replication_start;
        total_stats.replication_end_time = timings.replication_end;
        total_stats.source_read_start_time = timings.source_read_start;
        total_stats.source_read_end_time = timings.source_read_end;
        total_stats.destination_write_start_time = timings.destination_write_start;
        total_stats.destination_write_end_time = timings.destination_write_end;

        let stream_stats = snapshot
            .streams
            .iter()
            .map(|(stream, totals)| StreamSyncStats {
                stream_name: stream.name.clone(),
                stream_namespace: stream.namespace.clone(),
                stats: SyncStats {
                    records_emitted: totals.records_emitted,
                    bytes_emitted: totals.bytes_emitted,
                    records_committed: if completed {
                        Some(totals.records_emitted)
                    } else {
                        totals.records_committed
                    },
                    bytes_committed: if completed {
                        Some(totals.bytes_emitted)
                    } else {
                        totals.bytes_committed
                    },
                    estimated_records: totals.estimate.and_then(|e| e.records),
                    estimated_bytes: totals.estimate.and_then(|e| e.bytes),
                    ..Default::default()
                },
            })
            .collect();

        let state = match snapshot.destination_state {
            Some(state) => Some(state),
            None => {
                if input.state.is_some() {
                    warn!("No new state from destination, falling back on input state");
                }
                input.state.clone()
            }
        };

        info!(
            job_id = self.job_id,
            attempt = self.attempt_number,
            status = ?status,
            records_emitted = total_stats.records_emitted,
            records_committed = ?total_stats.records_committed,
            failures = failures.len(),
            "Replication finished"
        );

        ReplicationOutput {
            replication_attempt_summary: ReplicationAttemptSummary {
                status,
                records_synced: total_stats.records_emitted,
                bytes_synced: total_stats.bytes_emitted,
                start_time: timings.replication_start.unwrap_or_default(),
                end_time: timings.replication_end.unwrap_or_default(),
                total_stats,
                stream_stats,
            },
            output_catalog: destination_catalog,
            state,
            failures,
        }
    }
}

/// Totals of an attempt; a completed attempt committed everything it emitted.
fn totals(snapshot: &TrackerSnapshot, completed: bool) -> SyncStats {
    SyncStats {
        records_emitted: snapshot.total_records_emitted,
        bytes_emitted: snapshot.total_bytes_emitted,
        records_committed: if completed {
            Some(snapshot.total_records_emitted)
        } else {
            snapshot.total_records_committed
        },
        bytes_committed: if completed {
            Some(snapshot.total_bytes_emitted)
        } else {
            snapshot.total_bytes_committed
        },
        source_state_messages_emitted: snapshot.source_state_messages,
        destination_state_messages_emitted: snapshot.destination_state_messages,
        estimated_records: snapshot.estimate.and_then(|e| e.records),
        estimated_bytes: snapshot.estimate.and_then(|e| e.bytes),
        ..Default::default()
    }
}
