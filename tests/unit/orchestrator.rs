use super::{data_source, harness, tracker, rows, Mode};
use anyhow::Result;
use chrono::Utc;
use maplit::btreemap;
use pretty_assertions::assert_eq;
use quarry::{CacheOutcome, Execution, ExecutionEvent, QuarryError, ResultStore, RunQuery, TimeRange};
use quarry_core::{
    DataSource, ParameterDefinition, ParameterError, ParameterizedQuery, QueryId, QueryResult,
    SavedQuery, User,
};
use serde_json::{json, Map, Value};
use tokio::test;

fn values(v: Value) -> Map<String, Value> {
    v.as_object().cloned().unwrap()
}

async fn queued_text(h: &super::Harness, request: RunQuery) -> Result<String> {
    match h.orchestrator.run_query(request).await? {
        Execution::Queued(job) => Ok(job.query_text),
        Execution::Cached(_) => anyhow::bail!("unexpected cache hit"),
    }
}

#[test]
async fn test_paused_data_source_is_refused() -> Result<()> {
    let h = harness();
    let mut ds = data_source(1, "paused", Mode::Ok);
    ds.name = "Warehouse".into();
    ds.pause(Some("nightly load".into()));

    let err = h
        .orchestrator
        .run_query(RunQuery::new(Some(ds), ParameterizedQuery::new("SELECT 1", vec![])))
        .await
        .unwrap_err();

    assert!(matches!(err, QuarryError::DataSourceUnavailable(_)));
    assert_eq!(
        err.to_string(),
        "Warehouse is paused (nightly load). Please try again later."
    );
    assert!(h.events.events().is_empty());
    assert_eq!(tracker("paused").executions(), 0);
    Ok(())
}

#[test]
async fn test_missing_data_source_is_refused() -> Result<()> {
    let h = harness();

    let err = h
        .orchestrator
        .run_query(RunQuery::new(None, ParameterizedQuery::new("SELECT 1", vec![])))
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Target data source is not available.");
    Ok(())
}

#[test]
async fn test_missing_parameters_are_reported() -> Result<()> {
    let h = harness();
    let ds = data_source(1, "missing", Mode::Ok);
    let query = ParameterizedQuery::new(
        "SELECT * FROM orders WHERE region = '{{ region }}' AND total > {{ min }}",
        vec![ParameterDefinition::text("region"), ParameterDefinition::number("min")],
    );

    let err = h
        .orchestrator
        .run_query(RunQuery::new(Some(ds), query).parameters(values(json!({"region": "emea"}))))
        .await
        .unwrap_err();

    match err {
        QuarryError::MissingParameters(names) => assert_eq!(names, vec!["min".to_string()]),
        other => panic!("expected missing parameters, got {:?}", other),
    }
    assert_eq!(h.orchestrator.dispatcher().metrics().enqueued, 0);
    Ok(())
}

#[test]
async fn test_invalid_number_parameter() -> Result<()> {
    let h = harness();
    let ds = data_source(1, "invalid", Mode::Ok);
    let query = ParameterizedQuery::new("SELECT {{ n }}", vec![ParameterDefinition::number("n")]);

    let err = h
        .orchestrator
        .run_query(RunQuery::new(Some(ds), query).parameters(values(json!({"n": "1; DROP TABLE t"}))))
        .await
        .unwrap_err();

    assert!(matches!(err, QuarryError::Parameter(ParameterError::Invalid { .. })));
    Ok(())
}

#[test]
async fn test_restricted_access_refuses_dropdown_parameters() -> Result<()> {
    let h = harness();
    let ds = data_source(1, "restricted", Mode::Ok);
    let unsafe_query = ParameterizedQuery::new(
        "SELECT * FROM t WHERE owner = {{ owner }}",
        vec![ParameterDefinition::dropdown("owner", 8)],
    );
    assert!(!h.orchestrator.safety(&unsafe_query));

    let err = h
        .orchestrator
        .run_query(
            RunQuery::new(Some(ds.clone()), unsafe_query)
                .parameters(values(json!({"owner": "x"})))
                .restricted(true),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, QuarryError::UnsafeQuery));

    let safe_query = ParameterizedQuery::new(
        "SELECT * FROM t WHERE name = '{{ name }}' AND id = {{ id }}",
        vec![ParameterDefinition::text("name"), ParameterDefinition::number("id")],
    );
    assert!(h.orchestrator.safety(&safe_query));
    let text = queued_text(
        &h,
        RunQuery::new(Some(ds), safe_query)
            .parameters(values(json!({"name": "ada", "id": 7})))
            .restricted(true),
    )
    .await?;
    assert_eq!(text, "SELECT * FROM t WHERE name = 'ada' AND id = 7");
    Ok(())
}

#[test]
async fn test_dropdown_values_come_from_latest_result() -> Result<()> {
    let h = harness();
    let ds = data_source(1, "dropdown", Mode::Ok);
    let cities = QueryResult::new(
        ds.id,
        "SELECT name, value FROM cities",
        rows(&[("name", json!("Berlin")), ("value", json!(1))]),
        Utc::now(),
        0.1,
    );
    let cities_id = h.store.insert(cities)?;
    h.store.add_query(SavedQuery {
        id: QueryId(3),
        name: "Cities".into(),
        data_source_id: Some(ds.id),
        latest_result_id: Some(cities_id),
    });

    // no resolver attached: run_query supplies the store-backed one
    let query = || {
        ParameterizedQuery::new(
            "SELECT * FROM visits WHERE city = {{ city }}",
            vec![ParameterDefinition::dropdown("city", 3)],
        )
    };

    let text = queued_text(
        &h,
        RunQuery::new(Some(ds.clone()), query()).parameters(values(json!({"city": "1"}))),
    )
    .await?;
    assert_eq!(text, "SELECT * FROM visits WHERE city = 1");

    let err = h
        .orchestrator
        .run_query(RunQuery::new(Some(ds), query()).parameters(values(json!({"city": "9"}))))
        .await
        .unwrap_err();
    assert!(matches!(err, QuarryError::Parameter(ParameterError::Invalid { .. })));
    Ok(())
}

#[test]
async fn test_dropdown_on_detached_query() -> Result<()> {
    let h = harness();
    let ds = data_source(1, "detached", Mode::Ok);
    h.store.add_query(SavedQuery {
        id: QueryId(5),
        name: "Orphan".into(),
        data_source_id: None,
        latest_result_id: None,
    });
    let query = ParameterizedQuery::new(
        "SELECT {{ pick }}",
        vec![ParameterDefinition::dropdown("pick", 5)],
    );

    let err = h
        .orchestrator
        .run_query(RunQuery::new(Some(ds), query).parameters(values(json!({"pick": "a"}))))
        .await
        .unwrap_err();
    assert!(matches!(err, QuarryError::Parameter(ParameterError::Detached { .. })));
    Ok(())
}

#[test]
async fn test_auto_limit_and_time_range_shape_query_text() -> Result<()> {
    let h = harness();
    let ds = data_source(1, "shape", Mode::Ok);

    let limited = queued_text(
        &h,
        RunQuery::new(Some(ds.clone()), ParameterizedQuery::new("SELECT * FROM t", vec![]))
            .auto_limit(true),
    )
    .await?;
    assert_eq!(limited, "SELECT * FROM t LIMIT 10");

    let ranged = queued_text(
        &h,
        RunQuery::new(
            Some(ds.clone()),
            ParameterizedQuery::new("query=up&start=now-1d&step=60s", vec![]),
        )
        .time_range(TimeRange::new(Some("1700000000".into()), Some("1700003600".into()))),
    )
    .await?;
    assert_eq!(ranged, "query=up&start=1700000000&end=1700003600");

    let unbounded = queued_text(
        &h,
        RunQuery::new(Some(ds), ParameterizedQuery::new("query=up&step=60s", vec![]))
            .time_range(TimeRange::default()),
    )
    .await?;
    assert_eq!(unbounded, "query=up&step=60s");
    Ok(())
}

#[test]
async fn test_execution_event_is_recorded() -> Result<()> {
    let h = harness();
    let ds = data_source(6, "events", Mode::Ok);
    let mut user = User::new(2, "reporting-bot");
    user.is_api_user = true;
    let query = ParameterizedQuery::new("SELECT {{ n }}", vec![ParameterDefinition::number("n")]);

    queued_text(
        &h,
        RunQuery::new(Some(ds), query)
            .parameters(values(json!({"n": 3})))
            .user(user)
            .query_id(QueryId(40)),
    )
    .await?;

    let events = h.events.events();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.action, ExecutionEvent::ACTION);
    assert_eq!(event.cache, CacheOutcome::Miss);
    assert_eq!(event.username.as_deref(), Some("reporting-bot"));
    assert!(event.is_api_user);
    assert_eq!(event.query_text, "SELECT 3");
    assert_eq!(event.query_id, Some(QueryId(40)));
    assert_eq!(
        event.parameters.clone().into_iter().collect::<std::collections::BTreeMap<_, _>>(),
        btreemap! { "n".to_string() => json!(3) }
    );
    Ok(())
}

#[test]
async fn test_unknown_runner_type() -> Result<()> {
    let h = harness();
    let ds = DataSource::new(1, "Mongo", "mongodb", json!({}));

    let err = h
        .orchestrator
        .run_query(RunQuery::new(Some(ds), ParameterizedQuery::new("{}", vec![])))
        .await
        .unwrap_err();
    assert!(matches!(err, QuarryError::Registry(_)));
    Ok(())
}
