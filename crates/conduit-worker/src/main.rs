// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Conduit Worker - runs a single replication attempt.
//!
//! Usage: `conduit-worker <run-file.json>`
//!
//! The run file names the job, the attempt, the replication input and the
//! commands that launch both connectors. The replication output is printed
//! to stdout as JSON; logs go to stderr.

use anyhow::Context;
use serde::Deserialize;
use tracing::{info, warn};

use conduit_worker::process::{ConnectorCommand, SubprocessDestination, SubprocessSource};
use conduit_worker::{ReplicationInput, ReplicationWorker, WorkerConfig};

#[derive(Debug, Deserialize)]
struct RunFile {
    job_id: i64,
    attempt_number: i32,
    input: ReplicationInput,
    source: ConnectorCommand,
    destination: ConnectorCommand,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conduit_worker=info,conduit_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = WorkerConfig::from_env()?;

    let path = std::env::args()
        .nth(1)
        .context("usage: conduit-worker <run-file.json>")?;
    let contents = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read run file {}", path))?;
    let run: RunFile = serde_json::from_str(&contents)
        .with_context(|| format!("Invalid run file {}", path))?;

    let job_root = config.job_root(run.job_id, run.attempt_number);
    info!(
        job_id = run.job_id,
        attempt = run.attempt_number,
        job_root = %job_root.display(),
        "Starting Conduit Worker"
    );

    let worker = ReplicationWorker::new(
        run.job_id,
        run.attempt_number,
        Box::new(SubprocessSource::new(run.source)),
        Box::new(SubprocessDestination::new(run.destination)),
        config.replication.clone(),
    );

    let cancel = worker.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, cancelling replication");
            cancel.cancel();
        }
    });

    let output = worker.run(&run.input, &job_root).await?;
    println!("{}", serde_json::to_string(&output)?);

    if !output.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
