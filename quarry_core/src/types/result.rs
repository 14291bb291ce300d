use super::canonical::QueryData;
use super::ids::{DataSourceId, ResultId};
use crate::fingerprint::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An immutable, append-only record of one backend execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub id: ResultId,
    pub data_source_id: DataSourceId,
    pub fingerprint: Fingerprint,
    pub query_text: String,
    pub data: QueryData,
    pub retrieved_at: DateTime<Utc>,
    /// Execution time in seconds.
    pub runtime: f64,
}

impl QueryResult {
    pub fn new(
        data_source_id: DataSourceId,
        query_text: impl Into<String>,
        data: QueryData,
        retrieved_at: DateTime<Utc>,
        runtime: f64,
    ) -> Self {
        let query_text = query_text.into();
        Self {
            id: ResultId::new(),
            data_source_id,
            fingerprint: Fingerprint::of(data_source_id, &query_text),
            query_text,
            data,
            retrieved_at,
            runtime,
        }
    }

    /// Age of the result relative to `now`, in whole seconds. Results
    /// stamped in the future count as zero seconds old.
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.retrieved_at).num_seconds().max(0)
    }
}
