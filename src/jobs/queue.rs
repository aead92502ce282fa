//! FIFO queue bookkeeping shared by every store backend

use super::model::{JobMeta, JobMetaPatch, JobRecord, JobTask, NewJob, RawJobState};
use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};

/// All jobs plus the order of those still waiting
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct QueueState {
    #[serde(default)]
    jobs: HashMap<String, JobRecord>,
    #[serde(default)]
    pending: VecDeque<String>,
}

impl QueueState {
    pub fn enqueue(&mut self, new: NewJob, now: DateTime<Utc>) -> JobRecord {
        self.purge_expired(now);

        let id = uuid::Uuid::new_v4().to_string();
        let request_id = match &new.task {
            JobTask::Chat { request_id, .. } => request_id.clone(),
            JobTask::Switch { .. } => None,
        };
        let record = JobRecord {
            id: id.clone(),
            meta: JobMeta {
                requested_model: Some(new.task.model().to_string()),
                request_id,
                ..Default::default()
            },
            task: new.task,
            state: RawJobState::Queued,
            created_at: now,
            ended_at: None,
            result: None,
            failure: None,
            retention: new.retention,
        };

        if new.at_front {
            self.pending.push_front(id.clone());
        } else {
            self.pending.push_back(id.clone());
        }
        self.jobs.insert(id, record.clone());
        record
    }

    pub fn fetch(&self, id: &str) -> Option<JobRecord> {
        self.jobs.get(id).cloned()
    }

    /// Take a job out of the pending list; the record itself stays
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.pending.len();
        self.pending.retain(|pending| pending != id);
        self.pending.len() != before
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Zero-based index among pending jobs
    pub fn position(&self, id: &str) -> Option<usize> {
        self.pending.iter().position(|pending| pending == id)
    }

    pub fn update_meta(&mut self, id: &str, patch: JobMetaPatch) -> Result<()> {
        let Some(record) = self.jobs.get_mut(id) else {
            bail!("Job '{}' not found", id);
        };
        record.meta.apply(patch);
        Ok(())
    }

    pub fn set_state(&mut self, id: &str, state: RawJobState, now: DateTime<Utc>) -> Result<()> {
        let Some(record) = self.jobs.get_mut(id) else {
            bail!("Job '{}' not found", id);
        };
        record.state = state;
        if state.is_ended() {
            record.ended_at = Some(now);
            self.pending.retain(|pending| pending != id);
        }
        Ok(())
    }

    /// Pop the oldest pending job that is still queued and mark it started
    pub fn claim_next(&mut self, now: DateTime<Utc>) -> Option<JobRecord> {
        self.purge_expired(now);

        while let Some(id) = self.pending.pop_front() {
            let Some(record) = self.jobs.get_mut(&id) else {
                continue;
            };
            if record.state != RawJobState::Queued {
                continue;
            }
            record.state = RawJobState::Started;
            return Some(record.clone());
        }
        None
    }

    /// Store a result; a job cancelled meanwhile keeps its cancelled state
    pub fn complete(&mut self, id: &str, result: Value, now: DateTime<Utc>) -> Result<bool> {
        let Some(record) = self.jobs.get_mut(id) else {
            bail!("Job '{}' not found", id);
        };
        if record.state == RawJobState::Canceled {
            return Ok(false);
        }
        record.state = RawJobState::Finished;
        record.result = Some(result);
        record.ended_at = Some(now);
        Ok(true)
    }

    /// Store a failure; a job cancelled meanwhile keeps its cancelled state
    pub fn fail(&mut self, id: &str, error: String, now: DateTime<Utc>) -> Result<bool> {
        let Some(record) = self.jobs.get_mut(id) else {
            bail!("Job '{}' not found", id);
        };
        if record.state == RawJobState::Canceled {
            return Ok(false);
        }
        record.state = RawJobState::Failed;
        record.failure = Some(error);
        record.ended_at = Some(now);
        Ok(true)
    }

    /// Oldest job currently being executed
    pub fn current_job(&self) -> Option<String> {
        self.jobs
            .values()
            .filter(|record| record.state == RawJobState::Started)
            .min_by_key(|record| record.created_at)
            .map(|record| record.id.clone())
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) {
        let before = self.jobs.len();
        self.jobs.retain(|_, record| !record.is_expired(now));
        let purged = before - self.jobs.len();
        if purged > 0 {
            tracing::debug!(purged = purged, "Dropped expired job records");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::model::RetentionPolicy;
    use chrono::Duration;

    fn switch(model: &str) -> NewJob {
        NewJob::new(
            JobTask::Switch {
                model: model.to_string(),
            },
            RetentionPolicy::default(),
        )
    }

    #[test]
    fn test_claims_in_fifo_order() {
        let mut queue = QueueState::default();
        let now = Utc::now();
        let first = queue.enqueue(switch("a"), now);
        let second = queue.enqueue(switch("b"), now);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.position(&second.id), Some(1));
        assert_eq!(queue.claim_next(now).unwrap().id, first.id);
        assert_eq!(queue.claim_next(now).unwrap().id, second.id);
        assert!(queue.claim_next(now).is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_front_insertion_jumps_the_line() {
        let mut queue = QueueState::default();
        let now = Utc::now();
        queue.enqueue(switch("a"), now);
        let urgent = queue.enqueue(switch("b").at_front(), now);

        assert_eq!(queue.position(&urgent.id), Some(0));
        assert_eq!(queue.claim_next(now).unwrap().id, urgent.id);
    }

    #[test]
    fn test_enqueue_records_requested_model() {
        let mut queue = QueueState::default();
        let job = queue.enqueue(switch("qwen"), Utc::now());
        assert_eq!(job.meta.requested_model.as_deref(), Some("qwen"));
        assert_eq!(job.state, RawJobState::Queued);
    }

    #[test]
    fn test_removed_job_is_kept_but_not_claimed() {
        let mut queue = QueueState::default();
        let now = Utc::now();
        let job = queue.enqueue(switch("a"), now);

        assert!(queue.remove(&job.id));
        assert!(!queue.remove(&job.id));
        assert!(queue.fetch(&job.id).is_some());
        assert!(queue.claim_next(now).is_none());
    }

    #[test]
    fn test_cancelled_state_survives_completion_and_failure() {
        let mut queue = QueueState::default();
        let now = Utc::now();
        let job = queue.enqueue(switch("a"), now);
        queue.claim_next(now).unwrap();

        queue.set_state(&job.id, RawJobState::Canceled, now).unwrap();
        assert!(!queue.complete(&job.id, serde_json::json!({"ok": true}), now).unwrap());
        assert!(!queue.fail(&job.id, "late".to_string(), now).unwrap());

        let record = queue.fetch(&job.id).unwrap();
        assert_eq!(record.state, RawJobState::Canceled);
        assert!(record.result.is_none());
        assert!(record.failure.is_none());
    }

    #[test]
    fn test_ending_a_pending_job_drops_it_from_the_queue() {
        let mut queue = QueueState::default();
        let now = Utc::now();
        let job = queue.enqueue(switch("a"), now);

        queue.set_state(&job.id, RawJobState::Canceled, now).unwrap();
        assert_eq!(queue.len(), 0);
        assert!(queue.fetch(&job.id).unwrap().ended_at.is_some());
    }

    #[test]
    fn test_current_job_tracks_started() {
        let mut queue = QueueState::default();
        let now = Utc::now();
        assert!(queue.current_job().is_none());

        let job = queue.enqueue(switch("a"), now);
        queue.claim_next(now);
        assert_eq!(queue.current_job(), Some(job.id.clone()));

        queue.complete(&job.id, serde_json::Value::Null, now).unwrap();
        assert!(queue.current_job().is_none());
    }

    #[test]
    fn test_expired_records_are_purged() {
        let mut queue = QueueState::default();
        let then = Utc::now() - Duration::days(2);
        let old = queue.enqueue(switch("a"), then);
        queue.claim_next(then);
        queue.fail(&old.id, "boom".to_string(), then).unwrap();

        let fresh = queue.enqueue(switch("b"), Utc::now());

        assert!(queue.fetch(&old.id).is_none());
        assert!(queue.fetch(&fresh.id).is_some());
    }

    #[test]
    fn test_unknown_job_operations_fail() {
        let mut queue = QueueState::default();
        let now = Utc::now();
        assert!(queue.update_meta("nope", JobMetaPatch::default()).is_err());
        assert!(queue.set_state("nope", RawJobState::Canceled, now).is_err());
        assert!(queue.complete("nope", serde_json::Value::Null, now).is_err());
    }
}
