//! Time-series runner (Prometheus HTTP API).
//!
//! Query text is a URL query string, e.g.
//! `query=http_requests_total&start=now-1d&step=60s`. Requests always go to
//! `/api/v1/query_range`; the reported query type only reflects whether a
//! step was given.

pub mod range;
pub mod rows;

use crate::certs::CertificateSet;
use crate::error::{RunnerError, RunnerResult};
use crate::registry::RunnerDescriptor;
use crate::schema::{ConfigurationSchema, PropertySchema};
use crate::{ConnectionTester, QueryRunner, SchemaBrowser, TableSchema};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quarry_core::{QueryData, User};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, instrument};

pub const RUNNER_TYPE: &str = "prometheus";
const QUERY_RANGE_PATH: &str = "/api/v1/query_range";
const METRIC_NAMES_PATH: &str = "/api/v1/label/__name__/values";

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

fn default_verify_ssl() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrometheusConfig {
    pub url: String,
    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,
    #[serde(default, rename = "cert_File")]
    pub cert_file: Option<String>,
    #[serde(default, rename = "cert_key_File")]
    pub cert_key_file: Option<String>,
    #[serde(default, rename = "ca_cert_File")]
    pub ca_cert_file: Option<String>,
}

impl PrometheusConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            verify_ssl: true,
            cert_file: None,
            cert_key_file: None,
            ca_cert_file: None,
        }
    }
}

pub fn configuration_schema() -> ConfigurationSchema {
    ConfigurationSchema::object()
        .property("url", PropertySchema::string().title("Prometheus API URL"))
        .property(
            "verify_ssl",
            PropertySchema::boolean()
                .title("Verify SSL (ignored if CA certificate is provided)")
                .default_value(true),
        )
        .property("cert_File", PropertySchema::string().title("SSL Client Certificate"))
        .property("cert_key_File", PropertySchema::string().title("SSL Client Key"))
        .property("ca_cert_File", PropertySchema::string().title("SSL Root Certificate"))
        .required(&["url"])
        .secret(&["cert_File", "cert_key_File", "ca_cert_File"])
        .extra_options(&["verify_ssl", "cert_File", "cert_key_File", "ca_cert_File"])
}

pub fn descriptor() -> RunnerDescriptor {
    RunnerDescriptor::new(RUNNER_TYPE, "Prometheus", configuration_schema, |options| {
        Ok(Arc::new(PrometheusRunner::from_options(options)?) as Arc<dyn QueryRunner>)
    })
}

pub struct PrometheusRunner {
    config: PrometheusConfig,
    clock: Clock,
    /// Where certificate material is written; the system temp dir if unset.
    cert_dir: Option<PathBuf>,
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    data: T,
}

#[derive(Deserialize)]
struct QueryResultData {
    #[serde(default)]
    result: Vec<Value>,
}

impl PrometheusRunner {
    pub fn new(config: PrometheusConfig) -> Self {
        Self::with_clock(config, Arc::new(Utc::now))
    }

    /// Runner that reads "now" from `clock` when resolving relative bounds.
    pub fn with_clock(config: PrometheusConfig, clock: Clock) -> Self {
        Self {
            config,
            clock,
            cert_dir: None,
        }
    }

    pub fn with_cert_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cert_dir = Some(dir.into());
        self
    }

    pub fn from_options(options: &Value) -> RunnerResult<Self> {
        configuration_schema().validate(options)?;
        let config: PrometheusConfig = serde_json::from_value(options.clone())
            .map_err(|e| RunnerError::Configuration(e.to_string()))?;
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &PrometheusConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.url.trim_end_matches('/'), path)
    }

    /// Decodes the certificate material for the duration of one request.
    /// The returned set must outlive the client.
    fn client(&self) -> RunnerResult<(CertificateSet, reqwest::Client)> {
        let certs = CertificateSet::decode_in(
            self.cert_dir.as_deref(),
            self.config.ca_cert_file.as_deref(),
            self.config.cert_file.as_deref(),
            self.config.cert_key_file.as_deref(),
        )?;
        let client = certs.client(self.config.verify_ssl)?;
        Ok((certs, client))
    }
}

#[async_trait]
impl QueryRunner for PrometheusRunner {
    fn runner_type(&self) -> &'static str {
        RUNNER_TYPE
    }

    #[instrument(skip(self, _user), fields(url = %self.config.url))]
    async fn run_query(&self, query: &str, _user: Option<&User>) -> RunnerResult<QueryData> {
        let resolved = range::resolve(query, (self.clock)())?;
        let (_certs, client) = self.client()?;

        let response: ApiResponse<QueryResultData> = client
            .get(self.endpoint(QUERY_RANGE_PATH))
            .query(&resolved.params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let series = response.data.result;
        debug!(series = series.len(), query_type = resolved.query_type, "prometheus answered");
        let mut data = rows::to_query_data(&series)?;
        data.query_type = Some(resolved.query_type.to_string());
        Ok(data)
    }

    fn schema_browser(&self) -> Option<&dyn SchemaBrowser> {
        Some(self)
    }

    fn connection_tester(&self) -> Option<&dyn ConnectionTester> {
        Some(self)
    }
}

#[async_trait]
impl SchemaBrowser for PrometheusRunner {
    async fn get_schema(&self, _get_stats: bool) -> RunnerResult<Vec<TableSchema>> {
        let (_certs, client) = self.client()?;
        let response: ApiResponse<Vec<String>> = client
            .get(self.endpoint(METRIC_NAMES_PATH))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut names = response.data;
        names.dedup();
        Ok(names.into_iter().map(TableSchema::new).collect())
    }
}

#[async_trait]
impl ConnectionTester for PrometheusRunner {
    async fn test_connection(&self) -> RunnerResult<()> {
        let (_certs, client) = self.client()?;
        client.get(&self.config.url).send().await?.error_for_status()?;
        Ok(())
    }
}
