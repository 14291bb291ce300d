use super::{data_source, harness, tracker, rows, Mode};
use anyhow::Result;
use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use quarry::{CacheOutcome, Execution, MaxAge, MemoryStore, ResultCache, ResultStore, RunQuery};
use quarry_core::{DataSourceId, ParameterizedQuery, QueryResult};
use serde_json::json;
use std::sync::Arc;
use tokio::test;

fn seeded(text: &str, age_secs: i64) -> (ResultCache, QueryResult, chrono::DateTime<Utc>) {
    let store = Arc::new(MemoryStore::new());
    let now = Utc::now();
    let result = QueryResult::new(
        DataSourceId(1),
        text,
        rows(&[("n", json!(1))]),
        now - Duration::seconds(age_secs),
        0.2,
    );
    store.insert(result.clone()).unwrap();
    (ResultCache::new(store), result, now)
}

#[test]
async fn test_max_age_window() -> Result<()> {
    let (cache, stored, now) = seeded("SELECT 1", 60);
    let lookup = |max_age: MaxAge| cache.get_latest_at(DataSourceId(1), "SELECT 1", max_age, now);

    assert_eq!(lookup(MaxAge::Seconds(60))?, Some(stored.clone()));
    assert_eq!(lookup(MaxAge::Seconds(59))?, None);
    assert_eq!(lookup(MaxAge::Forever)?, Some(stored));
    assert_eq!(lookup(MaxAge::Never)?, None);
    Ok(())
}

#[test]
async fn test_lookup_is_scoped_to_data_source_and_text() -> Result<()> {
    let (cache, _, now) = seeded("SELECT 1", 0);

    assert_eq!(cache.get_latest_at(DataSourceId(2), "SELECT 1", MaxAge::Forever, now)?, None);
    assert_eq!(cache.get_latest_at(DataSourceId(1), "SELECT 2", MaxAge::Forever, now)?, None);
    Ok(())
}

#[test]
async fn test_forever_serves_old_result_without_running() -> Result<()> {
    let h = harness();
    let ds = data_source(1, "cache-forever", Mode::Ok);
    let stored = QueryResult::new(
        ds.id,
        "SELECT count(*) FROM t",
        rows(&[("count", json!(3))]),
        Utc::now() - Duration::days(365),
        1.0,
    );
    h.store.insert(stored.clone())?;

    let execution = h
        .orchestrator
        .run_query(
            RunQuery::new(Some(ds), ParameterizedQuery::new("SELECT count(*) FROM t", vec![]))
                .max_age(-1),
        )
        .await?;

    assert_eq!(execution, Execution::Cached(stored));
    assert_eq!(tracker("cache-forever").executions(), 0);
    assert_eq!(h.orchestrator.dispatcher().metrics().enqueued, 0);
    assert_eq!(h.events.events()[0].cache, CacheOutcome::Hit);
    Ok(())
}

#[test]
async fn test_zero_max_age_always_runs() -> Result<()> {
    let h = harness();
    let ds = data_source(1, "cache-never", Mode::Ok);
    h.store.insert(QueryResult::new(ds.id, "SELECT 1", rows(&[]), Utc::now(), 0.0))?;

    let execution = h
        .orchestrator
        .run_query(RunQuery::new(Some(ds), ParameterizedQuery::new("SELECT 1", vec![])).max_age(0))
        .await?;

    let Execution::Queued(job) = execution else {
        panic!("expected a job, got {:?}", execution);
    };
    let job = h.orchestrator.dispatcher().wait(job.id).await?;
    assert!(job.result_id.is_some());
    assert_eq!(tracker("cache-never").executions(), 1);
    assert_eq!(h.store.result_count(), 2);
    assert_eq!(h.events.events()[0].cache, CacheOutcome::Miss);
    Ok(())
}

#[test]
async fn test_fresh_run_is_served_from_cache_next_time() -> Result<()> {
    let h = harness();
    let ds = data_source(1, "cache-refill", Mode::Ok);
    let request = || {
        RunQuery::new(Some(ds.clone()), ParameterizedQuery::new("SELECT now()", vec![])).max_age(600)
    };

    let Execution::Queued(job) = h.orchestrator.run_query(request()).await? else {
        panic!("empty cache should schedule a job");
    };
    let job = h.orchestrator.dispatcher().wait(job.id).await?;

    match h.orchestrator.run_query(request()).await? {
        Execution::Cached(result) => assert_eq!(Some(result.id), job.result_id),
        other => panic!("expected a cache hit, got {:?}", other),
    }
    assert_eq!(tracker("cache-refill").executions(), 1);
    Ok(())
}
