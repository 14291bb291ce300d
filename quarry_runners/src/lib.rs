//! quarry_runners - pluggable query runners
//!
//! Every backend adapter implements [`QueryRunner`]. Capabilities beyond
//! running a query (schema browsing, connection tests) are optional and
//! discovered through presence checks, never assumed.

pub mod certs;
pub mod error;
pub mod exasol;
pub mod prometheus;
pub mod registry;
pub mod schema;
pub mod sql;

pub use error::{RegistryError, RunnerError, RunnerResult};
pub use registry::{RunnerDescriptor, RunnerFactory, RunnerRegistry};
pub use schema::{ConfigurationSchema, PropertySchema, PropertyType};

use async_trait::async_trait;
use quarry_core::{QueryData, User};
use serde::{Deserialize, Serialize};

/// A table (or metric) as reported by schema browsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<String>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }
}

/// The capability set every backend adapter implements.
#[async_trait]
pub trait QueryRunner: Send + Sync + 'static {
    /// Registry name of this runner.
    fn runner_type(&self) -> &'static str;

    /// Execute `query` and map the answer into canonical columns and rows.
    async fn run_query(&self, query: &str, user: Option<&User>) -> RunnerResult<QueryData>;

    /// Inject a row ceiling into `query` when `enabled`. Runners without a
    /// notion of row limits return the text unchanged.
    fn apply_auto_limit(&self, query: &str, enabled: bool) -> String {
        let _ = enabled;
        query.to_string()
    }

    fn schema_browser(&self) -> Option<&dyn SchemaBrowser> {
        None
    }

    fn connection_tester(&self) -> Option<&dyn ConnectionTester> {
        None
    }
}

#[async_trait]
pub trait SchemaBrowser: Send + Sync {
    async fn get_schema(&self, get_stats: bool) -> RunnerResult<Vec<TableSchema>>;
}

#[async_trait]
pub trait ConnectionTester: Send + Sync {
    async fn test_connection(&self) -> RunnerResult<()>;
}
