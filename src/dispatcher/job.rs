use chrono::{DateTime, Utc};
use quarry_core::{DataSource, DataSourceId, Fingerprint, JobId, QueryId, ResultId, User};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// `queued -> running -> {succeeded, failed}`; `queued | running -> cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Running) | (Queued, Cancelled) | (Running, Succeeded | Failed | Cancelled)
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMetadata {
    pub username: Option<String>,
    pub query_id: Option<QueryId>,
    #[serde(default)]
    pub is_api_user: bool,
}

impl JobMetadata {
    pub fn new(user: Option<&User>, query_id: Option<QueryId>) -> Self {
        Self {
            username: user.map(|u| u.name.clone()),
            query_id,
            is_api_user: user.is_some_and(|u| u.is_api_user),
        }
    }
}

/// Snapshot of a job as returned by `fetch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub fingerprint: Fingerprint,
    pub data_source_id: DataSourceId,
    pub query_text: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_id: Option<ResultId>,
    pub metadata: JobMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        data_source_id: DataSourceId,
        query_text: impl Into<String>,
        metadata: JobMetadata,
    ) -> Self {
        let query_text = query_text.into();
        let now = Utc::now();
        Self {
            id: JobId::new(),
            fingerprint: Fingerprint::of(data_source_id, &query_text),
            data_source_id,
            query_text,
            status: JobStatus::Queued,
            error: None,
            result_id: None,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves to `next` if the state machine allows it. Returns whether the
    /// job changed.
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.updated_at = Utc::now();
        true
    }

    pub fn succeed(&mut self, result_id: ResultId) -> bool {
        let changed = self.transition(JobStatus::Succeeded);
        if changed {
            self.result_id = Some(result_id);
        }
        changed
    }

    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        let changed = self.transition(JobStatus::Failed);
        if changed {
            self.error = Some(error.into());
        }
        changed
    }
}

/// Work item for the dispatcher.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub data_source: DataSource,
    /// Effective query text, sent to the runner as is.
    pub query_text: String,
    pub user: Option<User>,
    pub metadata: JobMetadata,
}

impl JobRequest {
    pub fn new(data_source: DataSource, query_text: impl Into<String>) -> Self {
        Self {
            data_source,
            query_text: query_text.into(),
            user: None,
            metadata: JobMetadata::default(),
        }
    }

    pub fn user(mut self, user: Option<User>) -> Self {
        self.metadata = JobMetadata::new(user.as_ref(), self.metadata.query_id);
        self.user = user;
        self
    }

    pub fn query_id(mut self, query_id: Option<QueryId>) -> Self {
        self.metadata.query_id = query_id;
        self
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self.data_source.id, &self.query_text)
    }
}
