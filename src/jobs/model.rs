//! Job records, raw store states and the public status taxonomy

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Work a job asks a worker to perform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobTask {
    /// Proxy a chat completion to `model` once it is active
    Chat {
        model: String,
        payload: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    /// Make `model` the active backend
    Switch { model: String },
}

impl JobTask {
    pub fn model(&self) -> &str {
        match self {
            JobTask::Chat { model, .. } | JobTask::Switch { model } => model,
        }
    }
}

/// State as recorded by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawJobState {
    Queued,
    Deferred,
    Scheduled,
    Started,
    Finished,
    Failed,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl RawJobState {
    pub fn is_ended(&self) -> bool {
        matches!(
            self,
            RawJobState::Finished | RawJobState::Failed | RawJobState::Canceled
        )
    }
}

/// Externally visible job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Total mapping from store state to public status
    ///
    /// Precedence: finished, failed, canceled, the waiting states, started; anything
    /// the store reports beyond those is treated as still queued.
    pub fn from_raw(state: RawJobState) -> Self {
        match state {
            RawJobState::Finished => JobStatus::Succeeded,
            RawJobState::Failed => JobStatus::Failed,
            RawJobState::Canceled => JobStatus::Cancelled,
            RawJobState::Queued | RawJobState::Deferred | RawJobState::Scheduled => {
                JobStatus::Queued
            }
            RawJobState::Started => JobStatus::Running,
            RawJobState::Unknown => JobStatus::Queued,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Worker- and orchestrator-written bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobMeta {
    pub requested_model: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub progress: Option<f64>,
    pub error: Option<String>,
    pub queue_position: Option<usize>,
    pub request_id: Option<String>,
}

/// Partial update of [`JobMeta`]; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobMetaPatch {
    pub requested_model: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub progress: Option<f64>,
    pub error: Option<String>,
    pub queue_position: Option<usize>,
}

impl JobMeta {
    pub fn apply(&mut self, patch: JobMetaPatch) {
        if patch.requested_model.is_some() {
            self.requested_model = patch.requested_model;
        }
        if patch.started_at.is_some() {
            self.started_at = patch.started_at;
        }
        if patch.finished_at.is_some() {
            self.finished_at = patch.finished_at;
        }
        if patch.cancelled_at.is_some() {
            self.cancelled_at = patch.cancelled_at;
        }
        if patch.progress.is_some() {
            self.progress = patch.progress;
        }
        if patch.error.is_some() {
            self.error = patch.error;
        }
        if patch.queue_position.is_some() {
            self.queue_position = patch.queue_position;
        }
    }
}

/// How long ended jobs are kept around
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub result_ttl_secs: u64,
    pub failure_ttl_secs: u64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            result_ttl_secs: 86_400,
            failure_ttl_secs: 86_400,
        }
    }
}

/// Request to enqueue a job
#[derive(Debug, Clone)]
pub struct NewJob {
    pub task: JobTask,
    pub retention: RetentionPolicy,
    /// Jump ahead of everything already pending
    pub at_front: bool,
}

impl NewJob {
    pub fn new(task: JobTask, retention: RetentionPolicy) -> Self {
        Self {
            task,
            retention,
            at_front: false,
        }
    }

    pub fn at_front(mut self) -> Self {
        self.at_front = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub task: JobTask,
    pub state: RawJobState,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub meta: JobMeta,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub failure: Option<String>,
    pub retention: RetentionPolicy,
}

impl JobRecord {
    pub fn status(&self) -> JobStatus {
        JobStatus::from_raw(self.state)
    }

    /// The record may be dropped from the store
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let Some(ended_at) = self.ended_at else {
            return false;
        };
        let ttl = match self.state {
            RawJobState::Failed => self.retention.failure_ttl_secs,
            _ => self.retention.result_ttl_secs,
        };
        now.signed_duration_since(ended_at).num_seconds() >= ttl as i64
    }
}
