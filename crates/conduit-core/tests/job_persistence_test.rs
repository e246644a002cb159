// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job/attempt state machine tests.
//!
//! Every scenario runs against in-memory SQLite. The `postgres_*` tests run
//! the same scenarios when `TEST_DATABASE_URL` is set and skip otherwise.

mod common;

use std::path::Path;
use std::sync::Arc;

use futures::future::join_all;

use conduit_core::config::Config;
use conduit_core::job_config::JobOutput;
use conduit_core::persistence;
use conduit_core::output::{AttemptFailureSummary, ReplicationStatus};
use conduit_core::{AttemptStatus, ConfigType, JobPersistence, JobStatus, PersistenceError};

async fn enqueue_is_deduplicated_per_scope(persistence: &dyn JobPersistence) {
    let scope = common::unique_scope();

    let first = persistence
        .enqueue_job(&scope, &common::sync_config())
        .await
        .unwrap();
    let second = persistence
        .enqueue_job(&scope, &common::sync_config())
        .await
        .unwrap();

    assert!(first.is_some());
    assert_eq!(second, None, "second enqueue for the same scope must be empty");
    assert_eq!(
        persistence
            .get_job_count(&ConfigType::REPLICATION, &scope)
            .await
            .unwrap(),
        1
    );

    // Other scopes are unaffected.
    let other = persistence
        .enqueue_job(&common::unique_scope(), &common::sync_config())
        .await
        .unwrap();
    assert!(other.is_some());
}

async fn enqueue_allowed_after_terminal(persistence: &dyn JobPersistence) {
    let scope = common::unique_scope();
    let job_id = persistence
        .enqueue_job(&scope, &common::sync_config())
        .await
        .unwrap()
        .unwrap();

    persistence.cancel_job(job_id).await.unwrap();

    let next = persistence
        .enqueue_job(&scope, &common::sync_config())
        .await
        .unwrap();
    assert!(next.is_some());
    assert_ne!(next, Some(job_id));
}

async fn create_attempt_on_terminal_job_fails(persistence: &dyn JobPersistence) {
    let scope = common::unique_scope();
    let job_id = persistence
        .enqueue_job(&scope, &common::sync_config())
        .await
        .unwrap()
        .unwrap();
    persistence.cancel_job(job_id).await.unwrap();

    let err = persistence
        .create_attempt(job_id, Path::new("/logs/0"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PersistenceError::IllegalStateTransition { .. }
    ));
    assert!(err.is_illegal_state());
    let job = persistence.get_job(job_id).await.unwrap();
    assert!(job.attempts.is_empty(), "no attempt row may be created");
    assert_eq!(job.status, JobStatus::Cancelled);
}

async fn failed_then_succeeded_attempts(persistence: &dyn JobPersistence) {
    let scope = common::unique_scope();
    let job_id = persistence
        .enqueue_job(&scope, &common::sync_config())
        .await
        .unwrap()
        .unwrap();

    let first = persistence
        .create_attempt(job_id, Path::new("/logs/0"))
        .await
        .unwrap();
    assert_eq!(first, 0);
    persistence.fail_attempt(job_id, first).await.unwrap();
    assert_eq!(
        persistence.get_job(job_id).await.unwrap().status,
        JobStatus::Incomplete
    );

    let second = persistence
        .create_attempt(job_id, Path::new("/logs/1"))
        .await
        .unwrap();
    assert_eq!(second, 1);
    persistence.succeed_attempt(job_id, second).await.unwrap();

    let jobs = persistence
        .list_jobs(&ConfigType::REPLICATION, &scope, 10, 0)
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert_eq!(job.status, JobStatus::Succeeded);
    let statuses: Vec<_> = job.attempts.iter().map(|a| a.status).collect();
    assert_eq!(statuses, vec![AttemptStatus::Failed, AttemptStatus::Succeeded]);
    assert!(job.attempts.iter().all(|a| a.ended_at.is_some()));
}

async fn terminal_attempt_is_immutable(persistence: &dyn JobPersistence) {
    let scope = common::unique_scope();
    let job_id = persistence
        .enqueue_job(&scope, &common::sync_config())
        .await
        .unwrap()
        .unwrap();
    let attempt = persistence
        .create_attempt(job_id, Path::new("/logs/0"))
        .await
        .unwrap();
    persistence.fail_attempt(job_id, attempt).await.unwrap();

    let err = persistence
        .succeed_attempt(job_id, attempt)
        .await
        .unwrap_err();
    assert!(matches!(err, PersistenceError::IllegalAttemptState { .. }));

    let job = persistence.get_job(job_id).await.unwrap();
    assert_eq!(job.attempts[0].status, AttemptStatus::Failed);
    assert_eq!(job.status, JobStatus::Incomplete);
}

async fn cancel_succeeded_job_is_rejected(persistence: &dyn JobPersistence) {
    let scope = common::unique_scope();
    let job_id = persistence
        .enqueue_job(&scope, &common::sync_config())
        .await
        .unwrap()
        .unwrap();
    persistence
        .create_attempt(job_id, Path::new("/logs/0"))
        .await
        .unwrap();
    persistence.succeed_attempt(job_id, 0).await.unwrap();

    let err = persistence.cancel_job(job_id).await.unwrap_err();
    match err {
        PersistenceError::IllegalStateTransition { from, to, .. } => {
            assert_eq!(from, "succeeded");
            assert_eq!(to, "cancelled");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    let err = persistence.fail_job(job_id).await.unwrap_err();
    assert!(err.is_illegal_state());
    assert!(!err.is_retryable());
}

async fn cancel_closes_running_attempt(persistence: &dyn JobPersistence) {
    let scope = common::unique_scope();
    let job_id = persistence
        .enqueue_job(&scope, &common::sync_config())
        .await
        .unwrap()
        .unwrap();
    persistence
        .create_attempt(job_id, Path::new("/logs/0"))
        .await
        .unwrap();

    persistence.cancel_job(job_id).await.unwrap();

    let job = persistence.get_job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.attempts[0].status, AttemptStatus::Failed);
    assert!(job.attempts[0].ended_at.is_some());

    // The scheduler's late fail_attempt is reported, not applied.
    let err = persistence.fail_attempt(job_id, 0).await.unwrap_err();
    assert!(err.is_illegal_state());
}

async fn fail_job_after_incomplete(persistence: &dyn JobPersistence) {
    let scope = common::unique_scope();
    let job_id = persistence
        .enqueue_job(&scope, &common::sync_config())
        .await
        .unwrap()
        .unwrap();
    persistence
        .create_attempt(job_id, Path::new("/logs/0"))
        .await
        .unwrap();
    persistence.fail_attempt(job_id, 0).await.unwrap();

    persistence.fail_job(job_id).await.unwrap();

    let job = persistence.get_job(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
}

async fn write_output_round_trip(persistence: &dyn JobPersistence) {
    let scope = common::unique_scope();
    let job_id = persistence
        .enqueue_job(&scope, &common::sync_config())
        .await
        .unwrap()
        .unwrap();
    let attempt = persistence
        .create_attempt(job_id, Path::new("/logs/0"))
        .await
        .unwrap();

    let output = JobOutput::Sync(common::replication_output(ReplicationStatus::Failed));
    let summary = AttemptFailureSummary::from_output(output.sync().unwrap());
    persistence
        .write_output(job_id, attempt, &output)
        .await
        .unwrap();
    persistence
        .write_attempt_failure_summary(job_id, attempt, &summary)
        .await
        .unwrap();

    let job = persistence.get_job(job_id).await.unwrap();
    assert_eq!(job.attempts[0].output.as_ref(), Some(&output));
    assert_eq!(job.attempts[0].failure_summary.as_ref(), Some(&summary));
    assert!(summary.partial_success);
    // No status side effects.
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.attempts[0].status, AttemptStatus::Running);
}

async fn stats_round_trip(persistence: &dyn JobPersistence) {
    let scope = common::unique_scope();
    let job_id = persistence
        .enqueue_job(&scope, &common::sync_config())
        .await
        .unwrap()
        .unwrap();
    let attempt = persistence
        .create_attempt(job_id, Path::new("/logs/0"))
        .await
        .unwrap();
    let output = common::replication_output(ReplicationStatus::Completed);
    let summary = &output.replication_attempt_summary;

    persistence
        .write_stats(job_id, attempt, &summary.total_stats, &summary.stream_stats)
        .await
        .unwrap();
    // Upsert, not append.
    persistence
        .write_stats(job_id, attempt, &summary.total_stats, &summary.stream_stats)
        .await
        .unwrap();

    let stats = persistence.get_attempt_stats(job_id, attempt).await.unwrap();
    let total = stats.total_stats.as_ref().expect("total stats should be stored");
    assert_eq!(total.replication_start_time, Some(1_700_000_000_000));
    assert_eq!(total.source_read_end_time, Some(1_700_000_050_000));
    assert_eq!(total.destination_write_end_time, None);
    assert_eq!(total, &summary.total_stats);

    assert_eq!(stats.stream_stats.len(), 1);
    let users = &stats.stream_stats[0].stats;
    assert_eq!(users.source_state_messages_emitted, 3);
    assert_eq!(users.destination_state_messages_emitted, 2);
    assert_eq!(users.replication_end_time, Some(1_700_000_060_000));
    assert_eq!(stats.stream_stats, summary.stream_stats);
}

async fn second_running_attempt_is_rejected(persistence: &dyn JobPersistence) {
    let scope = common::unique_scope();
    let job_id = persistence
        .enqueue_job(&scope, &common::sync_config())
        .await
        .unwrap()
        .unwrap();
    persistence
        .create_attempt(job_id, Path::new("/logs/0"))
        .await
        .unwrap();

    let err = persistence
        .create_attempt(job_id, Path::new("/logs/1"))
        .await
        .unwrap_err();
    assert!(matches!(err, PersistenceError::AttemptAlreadyRunning { job_id: id } if id == job_id));
    assert!(err.is_illegal_state());
    assert_eq!(persistence.get_job(job_id).await.unwrap().attempts.len(), 1);
}

async fn next_job_skips_busy_scopes(persistence: &dyn JobPersistence) {
    let busy_scope = common::unique_scope();
    let idle_scope = common::unique_scope();

    let busy_job = persistence
        .enqueue_job(&busy_scope, &common::sync_config())
        .await
        .unwrap()
        .unwrap();
    persistence
        .create_attempt(busy_job, Path::new("/logs/0"))
        .await
        .unwrap();
    // A maintenance job on the busy scope bypasses dedup but must not be picked.
    let blocked = persistence
        .enqueue_job(&busy_scope, &common::spec_config())
        .await
        .unwrap()
        .unwrap();
    let runnable = persistence
        .enqueue_job(&idle_scope, &common::sync_config())
        .await
        .unwrap()
        .unwrap();

    let next = persistence.get_next_job().await.unwrap();
    let next = next.expect("a runnable job should be found");
    assert_ne!(next.id, blocked);
    assert_ne!(next.scope, busy_scope);
    if next.scope == idle_scope {
        assert_eq!(next.id, runnable);
    }
}

#[tokio::test]
async fn test_enqueue_is_deduplicated_per_scope() {
    enqueue_is_deduplicated_per_scope(&common::sqlite_persistence().await).await;
}

#[tokio::test]
async fn test_enqueue_allowed_after_terminal() {
    enqueue_allowed_after_terminal(&common::sqlite_persistence().await).await;
}

#[tokio::test]
async fn test_second_running_attempt_is_rejected() {
    second_running_attempt_is_rejected(&common::sqlite_persistence().await).await;
}

#[tokio::test]
async fn test_connect_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        database_url: format!("sqlite:{}?mode=rwc", dir.path().join("jobs.db").display()),
        max_connections: 2,
    };

    let store = persistence::connect(&config).await.unwrap();
    let job_id = store
        .enqueue_job("conn-1", &common::sync_config())
        .await
        .unwrap()
        .unwrap();
    drop(store);

    // Migrations are idempotent and the job survives a reconnect.
    let reopened = persistence::connect(&config).await.unwrap();
    let job = reopened.get_job(job_id).await.unwrap();
    assert_eq!(job.scope, "conn-1");
    assert!(reopened.health_check_db().await.unwrap());
}

#[tokio::test]
async fn test_connect_from_config_reports_unreachable_database() {
    let config = Config {
        database_url: "sqlite:/nonexistent-dir/conduit/jobs.db".to_string(),
        max_connections: 1,
    };

    let err = persistence::connect(&config).await.err().unwrap();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_create_attempt_on_terminal_job_fails() {
    create_attempt_on_terminal_job_fails(&common::sqlite_persistence().await).await;
}

#[tokio::test]
async fn test_failed_then_succeeded_attempts() {
    failed_then_succeeded_attempts(&common::sqlite_persistence().await).await;
}

#[tokio::test]
async fn test_terminal_attempt_is_immutable() {
    terminal_attempt_is_immutable(&common::sqlite_persistence().await).await;
}

#[tokio::test]
async fn test_cancel_succeeded_job_is_rejected() {
    cancel_succeeded_job_is_rejected(&common::sqlite_persistence().await).await;
}

#[tokio::test]
async fn test_cancel_closes_running_attempt() {
    cancel_closes_running_attempt(&common::sqlite_persistence().await).await;
}

#[tokio::test]
async fn test_fail_job_after_incomplete() {
    fail_job_after_incomplete(&common::sqlite_persistence().await).await;
}

#[tokio::test]
async fn test_write_output_round_trip() {
    write_output_round_trip(&common::sqlite_persistence().await).await;
}

#[tokio::test]
async fn test_stats_round_trip() {
    stats_round_trip(&common::sqlite_persistence().await).await;
}

#[tokio::test]
async fn test_next_job_skips_busy_scopes() {
    next_job_skips_busy_scopes(&common::sqlite_persistence().await).await;
}

#[tokio::test]
async fn test_get_next_job_is_oldest_pending() {
    let persistence = common::sqlite_persistence().await;
    let first = persistence
        .enqueue_job("conn-a", &common::sync_config())
        .await
        .unwrap()
        .unwrap();
    let second = persistence
        .enqueue_job("conn-b", &common::sync_config())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(persistence.get_next_job().await.unwrap().unwrap().id, first);

    persistence
        .create_attempt(first, Path::new("/logs/0"))
        .await
        .unwrap();
    assert_eq!(persistence.get_next_job().await.unwrap().unwrap().id, second);

    // An INCOMPLETE job still blocks its scope.
    persistence.fail_attempt(first, 0).await.unwrap();
    persistence
        .enqueue_job("conn-a", &common::spec_config())
        .await
        .unwrap();
    assert_eq!(persistence.get_next_job().await.unwrap().unwrap().id, second);
}

#[tokio::test]
async fn test_get_next_job_empty() {
    let persistence = common::sqlite_persistence().await;
    assert!(persistence.get_next_job().await.unwrap().is_none());
}

#[tokio::test]
async fn test_reset_job_makes_job_runnable_again() {
    let persistence = common::sqlite_persistence().await;
    let job_id = persistence
        .enqueue_job("conn-1", &common::sync_config())
        .await
        .unwrap()
        .unwrap();
    persistence
        .create_attempt(job_id, Path::new("/logs/0"))
        .await
        .unwrap();
    persistence.fail_attempt(job_id, 0).await.unwrap();
    assert!(persistence.get_next_job().await.unwrap().is_none());

    persistence.reset_job(job_id).await.unwrap();

    let next = persistence.get_next_job().await.unwrap().unwrap();
    assert_eq!(next.id, job_id);
    assert_eq!(next.status, JobStatus::Pending);
    assert_eq!(next.attempts.len(), 1);
}

#[tokio::test]
async fn test_list_jobs_newest_first_with_paging() {
    let persistence = common::sqlite_persistence().await;
    let mut ids = Vec::new();
    for _ in 0..3 {
        let id = persistence
            .enqueue_job("conn-1", &common::sync_config())
            .await
            .unwrap()
            .unwrap();
        persistence.cancel_job(id).await.unwrap();
        ids.push(id);
    }

    let all = persistence
        .list_jobs(&[ConfigType::Sync], "conn-1", 10, 0)
        .await
        .unwrap();
    let listed: Vec<_> = all.iter().map(|j| j.id).collect();
    assert_eq!(listed, vec![ids[2], ids[1], ids[0]]);

    let page = persistence
        .list_jobs(&[ConfigType::Sync], "conn-1", 1, 1)
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, ids[1]);

    let none = persistence
        .list_jobs(&[ConfigType::ResetConnection], "conn-1", 10, 0)
        .await
        .unwrap();
    assert!(none.is_empty());

    assert_eq!(
        persistence
            .get_last_replication_job("conn-1")
            .await
            .unwrap()
            .unwrap()
            .id,
        ids[2]
    );
    assert_eq!(
        persistence
            .get_first_replication_job("conn-1")
            .await
            .unwrap()
            .unwrap()
            .id,
        ids[0]
    );
    assert_eq!(
        persistence.get_last_sync_job("conn-1").await.unwrap().unwrap().id,
        ids[2]
    );
}

#[tokio::test]
async fn test_list_jobs_by_status() {
    let persistence = common::sqlite_persistence().await;
    let pending = persistence
        .enqueue_job("conn-1", &common::sync_config())
        .await
        .unwrap()
        .unwrap();
    let running = persistence
        .enqueue_job("conn-2", &common::sync_config())
        .await
        .unwrap()
        .unwrap();
    persistence
        .create_attempt(running, Path::new("/logs/0"))
        .await
        .unwrap();

    let jobs = persistence
        .list_jobs_with_status(&ConfigType::REPLICATION, JobStatus::Running)
        .await
        .unwrap();
    assert_eq!(jobs.iter().map(|j| j.id).collect::<Vec<_>>(), vec![running]);

    let jobs = persistence
        .list_jobs_for_scope_with_statuses(
            "conn-1",
            &ConfigType::REPLICATION,
            &JobStatus::NON_TERMINAL,
        )
        .await
        .unwrap();
    assert_eq!(jobs.iter().map(|j| j.id).collect::<Vec<_>>(), vec![pending]);

    let jobs = persistence
        .list_jobs_for_scope_with_statuses("conn-1", &ConfigType::REPLICATION, &[])
        .await
        .unwrap();
    assert!(jobs.is_empty());
}

#[tokio::test]
async fn test_concurrent_enqueue_has_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let persistence = Arc::new(common::shared_sqlite_persistence(dir.path()).await);

    for round in 0..5 {
        let scope = format!("conn-{}", round);
        let calls = (0..8).map(|_| {
            let persistence = persistence.clone();
            let scope = scope.clone();
            tokio::spawn(async move {
                persistence
                    .enqueue_job(&scope, &common::sync_config())
                    .await
            })
        });

        let results: Vec<_> = join_all(calls)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        let created = results.iter().filter(|r| r.is_some()).count();
        assert_eq!(created, 1, "round {}: {:?}", round, results);
    }
}

#[tokio::test]
async fn test_concurrent_create_attempt_has_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let persistence = Arc::new(common::shared_sqlite_persistence(dir.path()).await);
    let job_id = persistence
        .enqueue_job("conn-1", &common::sync_config())
        .await
        .unwrap()
        .unwrap();

    let calls = (0..4).map(|i| {
        let persistence = persistence.clone();
        tokio::spawn(async move {
            persistence
                .create_attempt(job_id, Path::new(&format!("/logs/{}", i)))
                .await
        })
    });
    let results: Vec<_> = join_all(calls)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    // Losers either saw the running attempt or lost the busy-lock race.
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| e.is_illegal_state() || e.is_retryable()));
    let job = persistence.get_job(job_id).await.unwrap();
    assert_eq!(job.attempts.len(), 1);
}

#[tokio::test]
async fn postgres_state_machine_scenarios() {
    let Some(persistence) = common::postgres_persistence().await else {
        eprintln!("TEST_DATABASE_URL not set, skipping PostgreSQL scenarios");
        return;
    };

    enqueue_is_deduplicated_per_scope(&persistence).await;
    enqueue_allowed_after_terminal(&persistence).await;
    create_attempt_on_terminal_job_fails(&persistence).await;
    failed_then_succeeded_attempts(&persistence).await;
    terminal_attempt_is_immutable(&persistence).await;
    cancel_succeeded_job_is_rejected(&persistence).await;
    cancel_closes_running_attempt(&persistence).await;
    fail_job_after_incomplete(&persistence).await;
    write_output_round_trip(&persistence).await;
    stats_round_trip(&persistence).await;
    second_running_attempt_is_rejected(&persistence).await;
}
