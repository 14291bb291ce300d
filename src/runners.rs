use crate::config::RunnerPoolConfig;
use crate::{QuarryError, Result};
use moka::sync::Cache;
use quarry_core::{DataSource, DataSourceId};
use quarry_runners::{QueryRunner, RunnerRegistry};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

type RunnerKey = (DataSourceId, String, String);

/// Built runner instances, one per data source configuration. Editing a data
/// source's options yields a new key, so stale runners age out on their own.
pub struct RunnerPool {
    registry: Arc<RunnerRegistry>,
    runners: Cache<RunnerKey, Arc<dyn QueryRunner>>,
}

fn options_digest(data_source: &DataSource) -> String {
    format!("{:x}", Sha256::digest(data_source.options.to_string().as_bytes()))
}

impl RunnerPool {
    pub fn new(registry: Arc<RunnerRegistry>, config: &RunnerPoolConfig) -> Self {
        Self {
            registry,
            runners: Cache::builder()
                .max_capacity(config.max_runners)
                .time_to_idle(config.idle())
                .support_invalidation_closures()
                .build(),
        }
    }

    pub fn registry(&self) -> &RunnerRegistry {
        &self.registry
    }

    /// Runner for `data_source`, built through the registry on first use.
    /// Concurrent callers for the same key share one build.
    pub fn get(&self, data_source: &DataSource) -> Result<Arc<dyn QueryRunner>> {
        let key = (
            data_source.id,
            data_source.runner_type.clone(),
            options_digest(data_source),
        );
        self.runners
            .try_get_with(key, || {
                self.registry
                    .build(&data_source.runner_type, &data_source.options)
                    .inspect(|_| {
                        debug!(
                            data_source_id = %data_source.id,
                            runner_type = %data_source.runner_type,
                            "built query runner"
                        )
                    })
            })
            .map_err(QuarryError::Registry)
    }

    pub fn invalidate(&self, data_source_id: DataSourceId) {
        // keys embed the options digest, so match on the id only
        let _ = self
            .runners
            .invalidate_entries_if(move |key, _| key.0 == data_source_id);
    }
}
