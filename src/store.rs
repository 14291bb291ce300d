//! Persistence collaborators.
//!
//! Durable storage belongs to the embedding application. The core only
//! needs to read and append results and to move a saved query's latest
//! result pointer; [`MemoryStore`] does both in process.

use anyhow::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use quarry_core::{
    DropdownOption, DropdownResolver, Fingerprint, ParameterError, QueryData, QueryId,
    QueryResult, ResultId, SavedQuery,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Append-only result storage.
pub trait ResultStore: Send + Sync {
    fn get(&self, id: ResultId) -> Result<Option<QueryResult>>;

    /// Most recently retrieved result with `fingerprint`.
    fn latest(&self, fingerprint: &Fingerprint) -> Result<Option<QueryResult>>;

    fn insert(&self, result: QueryResult) -> Result<ResultId>;
}

pub trait QueryCatalog: Send + Sync {
    fn query(&self, id: QueryId) -> Result<Option<SavedQuery>>;

    /// Called by the dispatcher after a job for `query_id` stored a result.
    fn update_latest_result(&self, query_id: QueryId, result_id: ResultId) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryStore {
    results: DashMap<ResultId, QueryResult>,
    latest: DashMap<Fingerprint, (DateTime<Utc>, ResultId)>,
    queries: DashMap<QueryId, SavedQuery>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_query(&self, query: SavedQuery) {
        self.queries.insert(query.id, query);
    }

    pub fn result_count(&self) -> usize {
        self.results.len()
    }
}

impl ResultStore for MemoryStore {
    fn get(&self, id: ResultId) -> Result<Option<QueryResult>> {
        Ok(self.results.get(&id).map(|r| r.value().clone()))
    }

    fn latest(&self, fingerprint: &Fingerprint) -> Result<Option<QueryResult>> {
        let Some(id) = self.latest.get(fingerprint).map(|e| e.value().1) else {
            return Ok(None);
        };
        self.get(id)
    }

    fn insert(&self, result: QueryResult) -> Result<ResultId> {
        let id = result.id;
        let stamp = (result.retrieved_at, id);
        self.latest
            .entry(result.fingerprint.clone())
            .and_modify(|current| {
                if stamp.0 >= current.0 {
                    *current = stamp;
                }
            })
            .or_insert(stamp);
        self.results.insert(id, result);
        Ok(id)
    }
}

impl QueryCatalog for MemoryStore {
    fn query(&self, id: QueryId) -> Result<Option<SavedQuery>> {
        Ok(self.queries.get(&id).map(|q| q.value().clone()))
    }

    fn update_latest_result(&self, query_id: QueryId, result_id: ResultId) -> Result<()> {
        match self.queries.get_mut(&query_id) {
            Some(mut query) => {
                query.latest_result_id = Some(result_id);
                Ok(())
            }
            None => anyhow::bail!("query {} does not exist", query_id),
        }
    }
}

/// Dropdown values read from the latest result of the referenced query.
pub struct CatalogDropdowns {
    catalog: Arc<dyn QueryCatalog>,
    results: Arc<dyn ResultStore>,
}

impl CatalogDropdowns {
    pub fn new(catalog: Arc<dyn QueryCatalog>, results: Arc<dyn ResultStore>) -> Self {
        Self { catalog, results }
    }
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Option name from the `name` column, value from the `value` column, each
/// falling back to the first column.
pub fn dropdown_options(data: &QueryData) -> Vec<DropdownOption> {
    let Some(first) = data.columns.first().map(|c| c.name.as_str()) else {
        return Vec::new();
    };
    let name_column = data.column("name").map_or(first, |c| c.name.as_str());
    let value_column = data.column("value").map_or(first, |c| c.name.as_str());
    data.rows
        .iter()
        .map(|row| DropdownOption {
            name: cell_text(row.get(name_column)),
            value: cell_text(row.get(value_column)),
        })
        .collect()
}

impl DropdownResolver for CatalogDropdowns {
    fn dropdown_values(&self, query_id: QueryId) -> std::result::Result<Vec<DropdownOption>, ParameterError> {
        let detached = || ParameterError::Detached { query_id };
        let query = match self.catalog.query(query_id) {
            Ok(Some(query)) => query,
            Ok(None) => return Err(detached()),
            Err(e) => {
                warn!(%query_id, error = %e, "failed to load dropdown query");
                return Err(detached());
            }
        };
        if query.data_source_id.is_none() {
            return Err(detached());
        }
        let Some(result_id) = query.latest_result_id else {
            return Ok(Vec::new());
        };
        match self.results.get(result_id) {
            Ok(Some(result)) => Ok(dropdown_options(&result.data)),
            Ok(None) => Ok(Vec::new()),
            Err(e) => {
                warn!(%query_id, error = %e, "failed to load dropdown values");
                Err(detached())
            }
        }
    }
}
