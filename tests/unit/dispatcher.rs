use super::{data_source, harness, harness_with, tracker, Mode};
use anyhow::Result;
use futures::future::join_all;
use pretty_assertions::assert_eq;
use quarry::{
    Execution, Job, JobStatus, Orchestrator, QuarryConfig, QuarryError, QueryCatalog, ResultStore,
    RunQuery,
};
use quarry_core::{DataSource, JobId, ParameterizedQuery, QueryId, SavedQuery, User};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::test;

fn fresh(ds: &DataSource, text: &str) -> RunQuery {
    RunQuery::new(Some(ds.clone()), ParameterizedQuery::new(text, vec![])).max_age(0)
}

async fn queue(orchestrator: &Orchestrator, request: RunQuery) -> Result<Job> {
    match orchestrator.run_query(request).await? {
        Execution::Queued(job) => Ok(job),
        Execution::Cached(result) => anyhow::bail!("unexpected cache hit {}", result.id),
    }
}

#[test]
async fn test_concurrent_identical_requests_share_one_job() -> Result<()> {
    let h = harness();
    let ds = data_source(1, "dedup", Mode::Hold);
    let tracker = tracker("dedup");

    let requests = (0..8).map(|_| queue(&h.orchestrator, fresh(&ds, "SELECT * FROM big")));
    let jobs = join_all(requests)
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

    let id = jobs[0].id;
    assert!(jobs.iter().all(|job| job.id == id));

    tracker.release(1);
    let job = h.orchestrator.dispatcher().wait(id).await?;
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(tracker.executions(), 1);

    let metrics = h.orchestrator.dispatcher().metrics();
    assert_eq!(metrics.enqueued, 1);
    assert_eq!(metrics.deduplicated, 7);
    assert_eq!(metrics.succeeded, 1);
    Ok(())
}

#[test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_identical_requests_run_once() -> Result<()> {
    let orchestrator = Arc::new(harness().orchestrator);
    let ds = data_source(1, "dedup-parallel", Mode::Hold);
    let tracker = tracker("dedup-parallel");

    let tasks = (0..16).map(|_| {
        let orchestrator = orchestrator.clone();
        let request = fresh(&ds, "SELECT * FROM events");
        tokio::spawn(async move { queue(&orchestrator, request).await })
    });
    let mut ids = HashSet::new();
    for joined in join_all(tasks).await {
        ids.insert(joined??.id);
    }
    assert_eq!(ids.len(), 1);

    tracker.release(1);
    let id = ids.into_iter().next().unwrap();
    let job = orchestrator.dispatcher().wait(id).await?;
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(tracker.executions(), 1);

    let metrics = orchestrator.dispatcher().metrics();
    assert_eq!(metrics.enqueued, 1);
    assert_eq!(metrics.deduplicated, 15);
    Ok(())
}

#[test]
async fn test_different_text_is_not_deduplicated() -> Result<()> {
    let h = harness();
    let ds = data_source(1, "distinct", Mode::Hold);

    let a = queue(&h.orchestrator, fresh(&ds, "SELECT 1")).await?;
    let b = queue(&h.orchestrator, fresh(&ds, "SELECT 2")).await?;
    assert_ne!(a.id, b.id);
    assert_ne!(a.fingerprint, b.fingerprint);

    tracker("distinct").release(2);
    h.orchestrator.dispatcher().wait(a.id).await?;
    h.orchestrator.dispatcher().wait(b.id).await?;
    Ok(())
}

#[test]
async fn test_success_stores_result() -> Result<()> {
    let h = harness();
    let ds = data_source(3, "success", Mode::Ok);
    let user = User::new(9, "ada");

    let job = queue(&h.orchestrator, fresh(&ds, "SELECT 42").user(user)).await?;
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.metadata.username.as_deref(), Some("ada"));

    let job = h.orchestrator.dispatcher().wait(job.id).await?;
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.error, None);

    let result = h.store.get(job.result_id.unwrap())?.unwrap();
    assert_eq!(result.data_source_id, ds.id);
    assert_eq!(result.query_text, "SELECT 42");
    assert_eq!(result.fingerprint, job.fingerprint);
    assert_eq!(result.data.rows[0]["q"], "SELECT 42");
    Ok(())
}

#[test]
async fn test_runner_error_is_recorded_on_job() -> Result<()> {
    let h = harness();
    let ds = data_source(1, "failure", Mode::Fail);

    let job = queue(&h.orchestrator, fresh(&ds, "relation \"t\" does not exist")).await?;
    let job = h.orchestrator.dispatcher().wait(job.id).await?;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("relation \"t\" does not exist"));
    assert_eq!(job.result_id, None);
    assert_eq!(h.store.result_count(), 0);
    assert_eq!(h.orchestrator.dispatcher().metrics().failed, 1);
    Ok(())
}

#[test]
async fn test_panicking_runner_fails_only_its_job() -> Result<()> {
    let mut config = QuarryConfig::default();
    config.dispatcher.workers = 1;
    let h = harness_with(config);
    let ds = data_source(1, "panic", Mode::Panic);

    let job = queue(&h.orchestrator, fresh(&ds, "SELECT boom")).await?;
    let job = tokio::time::timeout(Duration::from_secs(5), h.orchestrator.dispatcher().wait(job.id))
        .await??;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.as_deref().unwrap_or_default().contains("runner blew up on SELECT boom"));
    assert_eq!(h.orchestrator.dispatcher().active_jobs(), 0);

    // the fingerprint is free and the single worker is still alive
    let retry = queue(&h.orchestrator, fresh(&ds, "SELECT boom")).await?;
    assert_ne!(retry.id, job.id);
    let retry = tokio::time::timeout(Duration::from_secs(5), h.orchestrator.dispatcher().wait(retry.id))
        .await??;
    assert_eq!(retry.status, JobStatus::Failed);
    assert_eq!(tracker("panic").executions(), 2);
    assert_eq!(h.orchestrator.dispatcher().metrics().failed, 2);
    Ok(())
}

#[test]
async fn test_abandoned_enqueue_does_not_leave_a_stuck_job() -> Result<()> {
    let mut config = QuarryConfig::default();
    config.dispatcher.workers = 1;
    config.dispatcher.queue_size = 1;
    let h = harness_with(config);
    let ds = data_source(1, "abandoned", Mode::Hold);
    let tracker = tracker("abandoned");

    let running = queue(&h.orchestrator, fresh(&ds, "SELECT 1")).await?;
    tracker.started.notified().await;
    let waiting = queue(&h.orchestrator, fresh(&ds, "SELECT 2")).await?;

    // queue is full, so this caller gives up while waiting to send
    let gave_up = tokio::time::timeout(
        Duration::from_millis(50),
        queue(&h.orchestrator, fresh(&ds, "SELECT 3")),
    )
    .await;
    assert!(gave_up.is_err());
    assert_eq!(h.orchestrator.dispatcher().active_jobs(), 2);
    assert_eq!(h.orchestrator.dispatcher().metrics().cancelled, 1);

    tracker.release(3);
    let retry = queue(&h.orchestrator, fresh(&ds, "SELECT 3")).await?;
    assert_eq!(retry.status, JobStatus::Queued);
    let retry = h.orchestrator.dispatcher().wait(retry.id).await?;
    assert_eq!(retry.status, JobStatus::Succeeded);

    h.orchestrator.dispatcher().wait(running.id).await?;
    h.orchestrator.dispatcher().wait(waiting.id).await?;
    assert_eq!(tracker.executions(), 3);
    Ok(())
}

#[test]
async fn test_cancel_running_job_discards_result() -> Result<()> {
    let h = harness();
    let ds = data_source(1, "cancel-running", Mode::Hold);
    let tracker = tracker("cancel-running");

    let job = queue(&h.orchestrator, fresh(&ds, "SELECT pg_sleep(60)")).await?;
    tracker.started.notified().await;
    assert_eq!(h.orchestrator.fetch_job(job.id)?.status, JobStatus::Running);

    let cancelled = h.orchestrator.cancel_job(job.id)?;
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    tracker.release(1);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let job = h.orchestrator.fetch_job(job.id)?;
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.result_id, None);
    assert_eq!(h.store.result_count(), 0);
    assert_eq!(h.orchestrator.dispatcher().active_jobs(), 0);
    assert_eq!(h.orchestrator.dispatcher().metrics().cancelled, 1);
    Ok(())
}

#[test]
async fn test_cancel_queued_job_never_runs() -> Result<()> {
    let mut config = QuarryConfig::default();
    config.dispatcher.workers = 1;
    let h = harness_with(config);
    let ds = data_source(1, "cancel-queued", Mode::Hold);
    let tracker = tracker("cancel-queued");

    let first = queue(&h.orchestrator, fresh(&ds, "SELECT 1")).await?;
    tracker.started.notified().await;
    let second = queue(&h.orchestrator, fresh(&ds, "SELECT 2")).await?;
    assert_eq!(h.orchestrator.cancel_job(second.id)?.status, JobStatus::Cancelled);

    let third = queue(&h.orchestrator, fresh(&ds, "SELECT 3")).await?;
    tracker.release(2);
    h.orchestrator.dispatcher().wait(first.id).await?;
    let third = h.orchestrator.dispatcher().wait(third.id).await?;

    assert_eq!(third.status, JobStatus::Succeeded);
    assert_eq!(tracker.executions(), 2);
    assert_eq!(h.orchestrator.fetch_job(second.id)?.status, JobStatus::Cancelled);
    Ok(())
}

#[test]
async fn test_cancel_finished_job_is_noop() -> Result<()> {
    let h = harness();
    let ds = data_source(1, "cancel-finished", Mode::Ok);

    let job = queue(&h.orchestrator, fresh(&ds, "SELECT 1")).await?;
    let finished = h.orchestrator.dispatcher().wait(job.id).await?;
    assert_eq!(finished.status, JobStatus::Succeeded);

    assert_eq!(h.orchestrator.cancel_job(job.id)?, finished);
    assert_eq!(h.orchestrator.fetch_job(job.id)?, finished);
    assert_eq!(h.orchestrator.dispatcher().metrics().cancelled, 0);
    Ok(())
}

#[test]
async fn test_cancel_failed_or_cancelled_job_is_noop() -> Result<()> {
    let h = harness();

    let failing = data_source(1, "cancel-failed", Mode::Fail);
    let job = queue(&h.orchestrator, fresh(&failing, "SELECT broken")).await?;
    let failed = h.orchestrator.dispatcher().wait(job.id).await?;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(h.orchestrator.cancel_job(job.id)?, failed);
    assert_eq!(h.orchestrator.fetch_job(job.id)?, failed);

    let held = data_source(2, "cancel-twice", Mode::Hold);
    let job = queue(&h.orchestrator, fresh(&held, "SELECT 1")).await?;
    let cancelled = h.orchestrator.cancel_job(job.id)?;
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert_eq!(h.orchestrator.cancel_job(job.id)?, cancelled);
    assert_eq!(h.orchestrator.fetch_job(job.id)?, cancelled);

    assert_eq!(h.orchestrator.dispatcher().metrics().cancelled, 1);
    tracker("cancel-twice").release(1);
    Ok(())
}

#[test]
async fn test_finished_fingerprint_gets_new_job() -> Result<()> {
    let h = harness();
    let ds = data_source(1, "rerun", Mode::Ok);

    let first = queue(&h.orchestrator, fresh(&ds, "SELECT 1")).await?;
    h.orchestrator.dispatcher().wait(first.id).await?;
    let second = queue(&h.orchestrator, fresh(&ds, "SELECT 1")).await?;

    assert_ne!(first.id, second.id);
    assert_eq!(first.fingerprint, second.fingerprint);
    h.orchestrator.dispatcher().wait(second.id).await?;
    assert_eq!(tracker("rerun").executions(), 2);
    Ok(())
}

#[test]
async fn test_saved_query_latest_result_is_updated() -> Result<()> {
    let h = harness();
    let ds = data_source(4, "latest", Mode::Ok);
    h.store.add_query(SavedQuery {
        id: QueryId(12),
        name: "Daily signups".into(),
        data_source_id: Some(ds.id),
        latest_result_id: None,
    });

    let job = queue(&h.orchestrator, fresh(&ds, "SELECT 1").query_id(QueryId(12))).await?;
    assert_eq!(job.metadata.query_id, Some(QueryId(12)));
    let job = h.orchestrator.dispatcher().wait(job.id).await?;

    let saved = h.store.query(QueryId(12))?.unwrap();
    assert_eq!(saved.latest_result_id, job.result_id);
    Ok(())
}

#[test]
async fn test_unknown_job() -> Result<()> {
    let h = harness();
    let id = JobId::new();

    assert!(matches!(h.orchestrator.fetch_job(id), Err(QuarryError::JobNotFound(j)) if j == id));
    assert!(matches!(h.orchestrator.cancel_job(id), Err(QuarryError::JobNotFound(_))));
    Ok(())
}

#[test]
async fn test_shutdown_rejects_new_work() -> Result<()> {
    let h = harness();
    let ds = data_source(1, "shutdown", Mode::Hold);

    let pending = queue(&h.orchestrator, fresh(&ds, "SELECT 1")).await?;
    h.orchestrator.shutdown().await;

    assert_eq!(h.orchestrator.fetch_job(pending.id)?.status, JobStatus::Cancelled);
    let err = h
        .orchestrator
        .run_query(fresh(&ds, "SELECT 2"))
        .await
        .unwrap_err();
    assert!(matches!(err, QuarryError::DispatcherClosed));
    Ok(())
}
