//! Freshness decisions over the append-only result store.

use crate::store::ResultStore;
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use quarry_core::{DataSourceId, Fingerprint, QueryResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// How old a stored result may be and still answer a request.
///
/// On the wire this is a plain integer: `0` never reuses a result, any
/// negative value reuses whatever is stored, `N > 0` accepts results up to
/// `N` seconds old.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum MaxAge {
    Never,
    #[default]
    Forever,
    Seconds(u64),
}

impl From<i64> for MaxAge {
    fn from(value: i64) -> Self {
        match value {
            0 => MaxAge::Never,
            v if v < 0 => MaxAge::Forever,
            v => MaxAge::Seconds(v as u64),
        }
    }
}

impl From<MaxAge> for i64 {
    fn from(value: MaxAge) -> Self {
        match value {
            MaxAge::Never => 0,
            MaxAge::Forever => -1,
            MaxAge::Seconds(n) => i64::try_from(n).unwrap_or(i64::MAX),
        }
    }
}

impl MaxAge {
    /// Whether a result retrieved at `retrieved_at` is acceptable at `now`.
    pub fn accepts(&self, retrieved_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self {
            MaxAge::Never => false,
            MaxAge::Forever => true,
            MaxAge::Seconds(n) => {
                let secs = i64::try_from(*n).unwrap_or(i64::MAX).min(i64::MAX / 1_000);
                now - retrieved_at <= Duration::seconds(secs)
            }
        }
    }
}

/// Read-only view answering "is there a usable result for this text".
#[derive(Clone)]
pub struct ResultCache {
    store: Arc<dyn ResultStore>,
}

impl ResultCache {
    pub fn new(store: Arc<dyn ResultStore>) -> Self {
        Self { store }
    }

    pub fn get_latest(
        &self,
        data_source_id: DataSourceId,
        query_text: &str,
        max_age: MaxAge,
    ) -> Result<Option<QueryResult>> {
        self.get_latest_at(data_source_id, query_text, max_age, Utc::now())
    }

    /// [`ResultCache::get_latest`] evaluated at a fixed instant.
    pub fn get_latest_at(
        &self,
        data_source_id: DataSourceId,
        query_text: &str,
        max_age: MaxAge,
        now: DateTime<Utc>,
    ) -> Result<Option<QueryResult>> {
        if max_age == MaxAge::Never {
            return Ok(None);
        }
        let fingerprint = Fingerprint::of(data_source_id, query_text);
        let Some(result) = self.store.latest(&fingerprint)? else {
            return Ok(None);
        };
        if max_age.accepts(result.retrieved_at, now) {
            debug!(%fingerprint, age_secs = result.age_secs(now), "cache hit");
            Ok(Some(result))
        } else {
            debug!(%fingerprint, age_secs = result.age_secs(now), "cached result too old");
            Ok(None)
        }
    }
}
