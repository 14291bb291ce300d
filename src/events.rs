use quarry_core::{DataSourceId, QueryId, User, UserId};
use serde::Serialize;
use serde_json::{Map, Value};
use strum::Display;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CacheOutcome {
    Hit,
    Miss,
}

/// Audit record of one execution decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionEvent {
    pub action: &'static str,
    pub cache: CacheOutcome,
    pub user_id: Option<UserId>,
    pub username: Option<String>,
    pub is_api_user: bool,
    pub data_source_id: DataSourceId,
    pub query_text: String,
    pub query_id: Option<QueryId>,
    pub parameters: Map<String, Value>,
}

impl ExecutionEvent {
    pub const ACTION: &'static str = "execute_query";

    pub fn new(
        cache: CacheOutcome,
        user: Option<&User>,
        data_source_id: DataSourceId,
        query_text: impl Into<String>,
        query_id: Option<QueryId>,
        parameters: Map<String, Value>,
    ) -> Self {
        Self {
            action: Self::ACTION,
            cache,
            user_id: user.map(|u| u.id),
            username: user.map(|u| u.name.clone()),
            is_api_user: user.is_some_and(|u| u.is_api_user),
            data_source_id,
            query_text: query_text.into(),
            query_id,
            parameters,
        }
    }
}

pub trait EventSink: Send + Sync {
    fn record(&self, event: ExecutionEvent);
}

/// Emits events as structured log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn record(&self, event: ExecutionEvent) {
        info!(
            action = event.action,
            cache = %event.cache,
            user_id = event.user_id.map(|u| u.0),
            api_user = event.is_api_user,
            data_source_id = %event.data_source_id,
            query_id = event.query_id.map(|q| q.0),
            query = %event.query_text,
            "query execution"
        );
    }
}
