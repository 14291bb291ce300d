//! Entry point for query execution requests.

use crate::cache::{MaxAge, ResultCache};
use crate::config::QuarryConfig;
use crate::dispatcher::{Dispatcher, Job, JobRequest};
use crate::events::{CacheOutcome, EventSink, ExecutionEvent};
use crate::runners::RunnerPool;
use crate::store::{CatalogDropdowns, QueryCatalog, ResultStore};
use crate::{QuarryError, Result};
use quarry_core::{
    DataSource, DropdownResolver, JobId, ParameterizedQuery, QueryId, QueryResult, User,
};
use quarry_runners::RunnerRegistry;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Explicit bounds appended to time-series query text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<String>,
    pub end: Option<String>,
}

impl TimeRange {
    pub fn new(start: Option<String>, end: Option<String>) -> Self {
        Self { start, end }
    }

    /// Keeps the text up to the first `&` and appends the given bounds. An
    /// empty range leaves the text alone.
    pub fn apply(&self, query_text: &str) -> String {
        if self.start.is_none() && self.end.is_none() {
            return query_text.to_string();
        }
        let mut text = query_text
            .split('&')
            .next()
            .unwrap_or_default()
            .to_string();
        if let Some(start) = &self.start {
            text.push_str("&start=");
            text.push_str(start);
        }
        if let Some(end) = &self.end {
            text.push_str("&end=");
            text.push_str(end);
        }
        text
    }
}

/// One execution request.
#[derive(Debug, Clone)]
pub struct RunQuery {
    pub data_source: Option<DataSource>,
    pub query: ParameterizedQuery,
    pub parameters: Map<String, Value>,
    pub max_age: MaxAge,
    pub user: Option<User>,
    pub query_id: Option<QueryId>,
    pub auto_limit: bool,
    pub time_range: Option<TimeRange>,
    /// Set for view-only or shared access; unsafe queries are refused.
    pub restricted: bool,
}

impl RunQuery {
    pub fn new(data_source: Option<DataSource>, query: ParameterizedQuery) -> Self {
        Self {
            data_source,
            query,
            parameters: Map::new(),
            max_age: MaxAge::default(),
            user: None,
            query_id: None,
            auto_limit: false,
            time_range: None,
            restricted: false,
        }
    }

    pub fn parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn max_age(mut self, max_age: impl Into<MaxAge>) -> Self {
        self.max_age = max_age.into();
        self
    }

    pub fn user(mut self, user: User) -> Self {
        self.user = Some(user);
        self
    }

    pub fn query_id(mut self, query_id: QueryId) -> Self {
        self.query_id = Some(query_id);
        self
    }

    pub fn auto_limit(mut self, enabled: bool) -> Self {
        self.auto_limit = enabled;
        self
    }

    pub fn time_range(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    pub fn restricted(mut self, restricted: bool) -> Self {
        self.restricted = restricted;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    /// A stored result was fresh enough.
    Cached(QueryResult),
    /// A job was scheduled, or an equivalent one was already in flight.
    Queued(Job),
}

pub struct Orchestrator {
    cache: ResultCache,
    dispatcher: Dispatcher,
    runners: Arc<RunnerPool>,
    dropdowns: Arc<CatalogDropdowns>,
    events: Arc<dyn EventSink>,
}

/// The data source a request may run against, or the message explaining
/// why it may not.
fn available(data_source: Option<DataSource>) -> Result<DataSource> {
    let message = match data_source {
        None => "Target data source is not available.".to_string(),
        Some(ds) if !ds.paused => return Ok(ds),
        Some(ds) => match &ds.pause_reason {
            Some(reason) => format!(
                "{} is paused ({}). Please try again later.",
                ds.name, reason
            ),
            None => format!("{} is paused. Please try again later.", ds.name),
        },
    };
    Err(QuarryError::DataSourceUnavailable(message))
}

impl Orchestrator {
    /// Builds the runner pool and starts the dispatcher. Must be called from
    /// within a tokio runtime.
    pub fn new<S>(
        config: &QuarryConfig,
        store: Arc<S>,
        registry: Arc<RunnerRegistry>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self>
    where
        S: ResultStore + QueryCatalog + 'static,
    {
        config.validate()?;
        let results: Arc<dyn ResultStore> = store.clone();
        let catalog: Arc<dyn QueryCatalog> = store;
        let runners = Arc::new(RunnerPool::new(registry, &config.runners));
        let dispatcher = Dispatcher::start(
            &config.dispatcher,
            results.clone(),
            catalog.clone(),
            runners.clone(),
        )?;
        Ok(Self {
            cache: ResultCache::new(results.clone()),
            dispatcher,
            runners,
            dropdowns: Arc::new(CatalogDropdowns::new(catalog, results)),
            events,
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn runners(&self) -> &RunnerPool {
        &self.runners
    }

    /// Resolver for `query` parameters, backed by the store.
    pub fn dropdown_resolver(&self) -> Arc<dyn DropdownResolver> {
        self.dropdowns.clone()
    }

    /// Whether `query` may run under restricted access.
    pub fn safety(&self, query: &ParameterizedQuery) -> bool {
        query.is_safe()
    }

    /// Answers from the cache or schedules a job.
    #[instrument(skip_all, fields(data_source_id = ?request.data_source.as_ref().map(|ds| ds.id)))]
    pub async fn run_query(&self, request: RunQuery) -> Result<Execution> {
        let RunQuery {
            data_source,
            mut query,
            parameters,
            max_age,
            user,
            query_id,
            auto_limit,
            time_range,
            restricted,
        } = request;

        let data_source = available(data_source)?;
        if restricted && !query.is_safe() {
            return Err(QuarryError::UnsafeQuery);
        }

        if !query.has_resolver() {
            query = query.with_resolver(self.dropdown_resolver());
        }
        query.apply(&parameters)?;

        let runner = self.runners.get(&data_source)?;
        let mut query_text = runner.apply_auto_limit(query.text(), auto_limit);
        if let Some(range) = &time_range {
            query_text = range.apply(&query_text);
        }

        let missing = query.missing_params();
        if !missing.is_empty() {
            return Err(QuarryError::MissingParameters(missing));
        }

        let cached = match max_age {
            MaxAge::Never => None,
            max_age => self.cache.get_latest(data_source.id, &query_text, max_age)?,
        };
        let outcome = if cached.is_some() {
            CacheOutcome::Hit
        } else {
            CacheOutcome::Miss
        };
        self.events.record(ExecutionEvent::new(
            outcome,
            user.as_ref(),
            data_source.id,
            query_text.clone(),
            query_id,
            parameters,
        ));

        if let Some(result) = cached {
            debug!(result_id = %result.id, "served from cache");
            return Ok(Execution::Cached(result));
        }

        let job_request = JobRequest::new(data_source, query_text)
            .user(user)
            .query_id(query_id);
        let job = self.dispatcher.enqueue(job_request).await?;
        Ok(Execution::Queued(job))
    }

    pub fn fetch_job(&self, id: JobId) -> Result<Job> {
        self.dispatcher.fetch(id)
    }

    pub fn cancel_job(&self, id: JobId) -> Result<Job> {
        self.dispatcher.cancel(id)
    }

    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }
}
