//! Columnar warehouse runner (Exasol).

pub mod session;
pub mod types;

use crate::error::{RunnerError, RunnerResult};
use crate::registry::RunnerDescriptor;
use crate::schema::{ConfigurationSchema, PropertySchema};
use crate::sql::{self, DEFAULT_ROW_LIMIT};
use crate::{ConnectionTester, QueryRunner, SchemaBrowser, TableSchema};
use async_trait::async_trait;
use quarry_core::{CanonicalColumn, QueryData, Row, User};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use session::{ExasolConnector, NativeResultSet, WebSocketConnector};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument};

pub const RUNNER_TYPE: &str = "exasol";
const NOOP_QUERY: &str = "SELECT 1 FROM DUAL";
const SCHEMA_QUERY: &str =
    "SELECT COLUMN_SCHEMA, COLUMN_TABLE, COLUMN_NAME FROM EXA_ALL_COLUMNS";

fn default_port() -> u16 {
    8563
}

fn default_encrypted() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExasolConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    pub password: String,
    #[serde(default = "default_encrypted")]
    pub encrypted: bool,
}

pub fn configuration_schema() -> ConfigurationSchema {
    ConfigurationSchema::object()
        .property("user", PropertySchema::string())
        .property("password", PropertySchema::string())
        .property("host", PropertySchema::string())
        .property("port", PropertySchema::number().default_value(8563))
        .property(
            "encrypted",
            PropertySchema::boolean().title("Enable SSL Encryption"),
        )
        .required(&["host", "port", "user", "password"])
        .order(&["host", "port", "user", "password", "encrypted"])
        .secret(&["password"])
}

pub fn descriptor() -> RunnerDescriptor {
    RunnerDescriptor::new(RUNNER_TYPE, "Exasol", configuration_schema, |options| {
        Ok(Arc::new(ExasolRunner::from_options(options)?) as Arc<dyn QueryRunner>)
    })
}

pub struct ExasolRunner {
    config: ExasolConfig,
    connector: Arc<dyn ExasolConnector>,
}

impl ExasolRunner {
    pub fn new(config: ExasolConfig) -> Self {
        Self::with_connector(config, Arc::new(WebSocketConnector))
    }

    pub fn with_connector(config: ExasolConfig, connector: Arc<dyn ExasolConnector>) -> Self {
        Self { config, connector }
    }

    pub fn from_options(options: &Value) -> RunnerResult<Self> {
        configuration_schema().validate(options)?;
        let config: ExasolConfig = serde_json::from_value(options.clone())
            .map_err(|e| RunnerError::Configuration(e.to_string()))?;
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &ExasolConfig {
        &self.config
    }

    /// One session per statement, closed whatever the outcome.
    async fn execute(&self, sql: &str) -> RunnerResult<NativeResultSet> {
        let mut session = self.connector.connect(&self.config).await?;
        let result = session.execute(sql).await;
        if let Err(e) = session.close().await {
            debug!(error = %e, "failed to close exasol session");
        }
        result
    }
}

/// Maps a native result set into canonical columns and keyed rows.
pub fn to_query_data(set: NativeResultSet) -> RunnerResult<QueryData> {
    let columns: Vec<CanonicalColumn> = set
        .columns
        .iter()
        .map(|c| CanonicalColumn::new(c.name.clone(), types::canonical_type(&c.data_type)))
        .collect();

    let mut rows = Vec::with_capacity(set.rows.len());
    for cells in set.rows {
        let mut row = Row::new();
        for (column, cell) in set.columns.iter().zip(cells) {
            row.insert(column.name.clone(), types::map_value(&cell, &column.data_type)?);
        }
        rows.push(row);
    }
    Ok(QueryData::new(columns, rows))
}

#[async_trait]
impl QueryRunner for ExasolRunner {
    fn runner_type(&self) -> &'static str {
        RUNNER_TYPE
    }

    #[instrument(skip(self, _user), fields(host = %self.config.host))]
    async fn run_query(&self, query: &str, _user: Option<&User>) -> RunnerResult<QueryData> {
        let set = self.execute(query).await?;
        debug!(rows = set.rows.len(), columns = set.columns.len(), "exasol statement finished");
        to_query_data(set)
    }

    fn apply_auto_limit(&self, query: &str, enabled: bool) -> String {
        if enabled {
            sql::apply_auto_limit(query, DEFAULT_ROW_LIMIT)
        } else {
            query.to_string()
        }
    }

    fn schema_browser(&self) -> Option<&dyn SchemaBrowser> {
        Some(self)
    }

    fn connection_tester(&self) -> Option<&dyn ConnectionTester> {
        Some(self)
    }
}

#[async_trait]
impl SchemaBrowser for ExasolRunner {
    async fn get_schema(&self, _get_stats: bool) -> RunnerResult<Vec<TableSchema>> {
        let set = self.execute(SCHEMA_QUERY).await?;
        let mut tables: BTreeMap<String, TableSchema> = BTreeMap::new();
        for row in set.rows {
            let text: Vec<&str> = row.iter().map(|v| v.as_str().unwrap_or_default()).collect();
            let [schema, table, column] = text[..] else {
                return Err(RunnerError::Format("expected three catalog columns".to_string()));
            };
            let name = format!("{}.{}", schema, table);
            tables
                .entry(name.clone())
                .or_insert_with(|| TableSchema::new(name))
                .columns
                .push(column.to_string());
        }
        Ok(tables.into_values().collect())
    }
}

#[async_trait]
impl ConnectionTester for ExasolRunner {
    async fn test_connection(&self) -> RunnerResult<()> {
        self.execute(NOOP_QUERY).await.map(|_| ())
    }
}
