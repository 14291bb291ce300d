//! quarry - cache-aware query dispatch
//!
//! The [`Orchestrator`] decides, for every execution request, whether a
//! stored result is fresh enough to answer it or whether the query has to be
//! run. Runs are handed to the [`Dispatcher`], which collapses concurrent
//! equivalent requests into one job and executes it on a pool of worker
//! tasks through a pluggable [`quarry_runners::QueryRunner`].

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod events;
pub mod orchestrator;
pub mod runners;
pub mod store;

pub use cache::{MaxAge, ResultCache};
pub use config::{DispatcherConfig, QuarryConfig, RunnerPoolConfig};
pub use dispatcher::{Dispatcher, Job, JobMetadata, JobRequest, JobStatus, MetricsSnapshot};
pub use events::{CacheOutcome, EventSink, ExecutionEvent, TracingEventSink};
pub use orchestrator::{Execution, Orchestrator, RunQuery, TimeRange};
pub use runners::RunnerPool;
pub use store::{CatalogDropdowns, MemoryStore, QueryCatalog, ResultStore};

use quarry_core::{JobId, ParameterError};
use quarry_runners::{RegistryError, RunnerError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuarryError {
    /// The target data source is missing or paused. Carries the user facing
    /// message.
    #[error("{0}")]
    DataSourceUnavailable(String),

    #[error(transparent)]
    Parameter(#[from] ParameterError),

    #[error("Missing parameter value for: {}", .0.join(", "))]
    MissingParameters(Vec<String>),

    #[error("This query contains potentially unsafe parameters and cannot be executed with restricted access.")]
    UnsafeQuery,

    #[error("Job {0} not found")]
    JobNotFound(JobId),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Registry(Arc<RegistryError>),

    #[error("Storage error: {0}")]
    Store(#[from] anyhow::Error),

    #[error("Dispatcher is shut down")]
    DispatcherClosed,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<RegistryError> for QuarryError {
    fn from(e: RegistryError) -> Self {
        QuarryError::Registry(Arc::new(e))
    }
}

pub type Result<T> = std::result::Result<T, QuarryError>;
