use super::ids::{DataSourceId, QueryId, ResultId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A configured backend. Owned by the configuration store; the core only
/// reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub id: DataSourceId,
    pub name: String,
    /// Registry name of the runner, e.g. `prometheus`.
    #[serde(rename = "type")]
    pub runner_type: String,
    /// Connection options, deserialized by the runner into its typed config.
    #[serde(default)]
    pub options: Value,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub pause_reason: Option<String>,
}

impl DataSource {
    pub fn new(
        id: impl Into<DataSourceId>,
        name: impl Into<String>,
        runner_type: impl Into<String>,
        options: Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            runner_type: runner_type.into(),
            options,
            paused: false,
            pause_reason: None,
        }
    }

    pub fn pause(&mut self, reason: Option<String>) {
        self.paused = true;
        self.pause_reason = reason;
    }

    pub fn resume(&mut self) {
        self.paused = false;
        self.pause_reason = None;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub is_api_user: bool,
}

impl User {
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_api_user: false,
        }
    }
}

/// A saved query as known to the persistence layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedQuery {
    pub id: QueryId,
    pub name: String,
    pub data_source_id: Option<DataSourceId>,
    /// Updated by the persistence collaborator whenever a job produces a
    /// result for this query.
    pub latest_result_id: Option<ResultId>,
}
