//! Job admission, status derivation and cancellation
//!
//! Sits between the HTTP layer and the [`ModelController`]. Synchronous requests bypass
//! the queue only when nothing would be starved by it; everything else becomes a job
//! executed by a worker.

use crate::backend::InferenceBackend;
use crate::controller::ModelController;
use crate::error::{SwitchboardError, SwitchboardResult};
use crate::jobs::{JobMetaPatch, JobStatus, JobStore, JobTask, NewJob, RawJobState, RetentionPolicy};
use crate::slot::LifecycleState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Longest failure text reported by a status lookup
pub const MAX_ERROR_LEN: usize = 4000;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SubmittedJob {
    pub id: String,
    pub status: JobStatus,
    pub status_url: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobStatusView {
    pub id: String,
    pub status: JobStatus,
    pub requested_model: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub queue_position: Option<usize>,
    pub progress: Option<f64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CancelMode {
    QueuedRemove,
    HardCancel,
    AlreadyTerminal,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CancelOutcome {
    pub id: String,
    pub status: JobStatus,
    pub mode: CancelMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SwitchOutcome {
    Switched { active_model: Option<String> },
    Queued { job_id: String },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobResult {
    pub id: String,
    pub result: Value,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueueInfo {
    pub queue_length: usize,
    pub current_job_id: Option<String>,
    pub active_model: Option<String>,
    pub switching: bool,
    pub drain_mode: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GatewayStatus {
    pub active_model: Option<String>,
    pub switching: bool,
    pub backend_state: LifecycleState,
    pub queue_length: usize,
    pub drain_mode: bool,
    pub uptime_sec: u64,
}

pub struct JobOrchestrator {
    controller: Arc<ModelController>,
    store: Arc<dyn JobStore>,
    backend: Arc<dyn InferenceBackend>,
    retention: RetentionPolicy,
    inference_timeout: Duration,
    drain_mode: AtomicBool,
    started_at: Instant,
}

impl JobOrchestrator {
    pub fn new(
        controller: Arc<ModelController>,
        store: Arc<dyn JobStore>,
        backend: Arc<dyn InferenceBackend>,
        retention: RetentionPolicy,
        inference_timeout: Duration,
    ) -> Self {
        Self {
            controller,
            store,
            backend,
            retention,
            inference_timeout,
            drain_mode: AtomicBool::new(false),
            started_at: Instant::now(),
        }
    }

    pub fn controller(&self) -> &Arc<ModelController> {
        &self.controller
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Proxy a chat request directly when admission allows it
    pub async fn submit_sync(&self, model: &str, payload: Value) -> SwitchboardResult<Value> {
        let config = self.controller.model(model)?;

        if !self.admissible(model).await? {
            return Err(self.reject(model));
        }

        // A switch that starts after admission waits for this permit to drop
        let Some(_permit) = self.controller.try_serve() else {
            return Err(self.reject(model));
        };
        if !self.admissible(model).await? {
            return Err(self.reject(model));
        }

        crate::metrics::record_sync_request(model);
        let timeout = config
            .inference_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.inference_timeout);

        let response = self.backend.chat(config, &payload, timeout).await?;
        Ok(response)
    }

    /// Enqueue a chat job and return where to poll for it
    pub async fn submit_async(
        &self,
        model: &str,
        payload: Value,
        request_id: Option<String>,
    ) -> SwitchboardResult<SubmittedJob> {
        self.controller.model(model)?;

        let task = JobTask::Chat {
            model: model.to_string(),
            payload,
            request_id,
        };
        let job = self.store.enqueue(NewJob::new(task, self.retention)).await?;

        crate::metrics::record_job_submitted("chat");
        self.publish_queue_length().await;
        tracing::info!(job_id = %job.id, model = %model, "Chat job queued");

        Ok(SubmittedJob {
            status_url: format!("/jobs/{}", job.id),
            id: job.id,
            status: JobStatus::Queued,
        })
    }

    pub async fn get_status(&self, id: &str) -> SwitchboardResult<JobStatusView> {
        let record = self.fetch(id).await?;
        let status = record.status();

        let queue_position = match status {
            JobStatus::Queued => self
                .store
                .position(id)
                .await?
                .or(record.meta.queue_position),
            _ => record.meta.queue_position,
        };

        let error = match status {
            JobStatus::Failed => record
                .failure
                .as_deref()
                .or(record.meta.error.as_deref())
                .map(truncate_error),
            _ => record.meta.error.clone(),
        };

        Ok(JobStatusView {
            id: record.id,
            status,
            requested_model: record
                .meta
                .requested_model
                .unwrap_or_else(|| "unknown".to_string()),
            created_at: record.created_at,
            started_at: record.meta.started_at,
            finished_at: record.meta.finished_at,
            cancelled_at: record.meta.cancelled_at,
            queue_position,
            progress: record.meta.progress,
            error,
        })
    }

    pub async fn cancel(&self, id: &str) -> SwitchboardResult<CancelOutcome> {
        let record = self.fetch(id).await?;
        let mut status = record.status();

        // A worker may claim the job between the fetch and the removal
        if status == JobStatus::Queued && !self.store.remove(id).await? {
            status = self.fetch(id).await?.status();
            tracing::debug!(job_id = %id, status = ?status, "Job left the queue before removal");
        }

        let mode = match status {
            JobStatus::Queued => {
                self.store
                    .update_meta(
                        id,
                        JobMetaPatch {
                            cancelled_at: Some(Utc::now()),
                            ..Default::default()
                        },
                    )
                    .await?;
                self.store.set_state(id, RawJobState::Canceled).await?;
                self.publish_queue_length().await;
                CancelMode::QueuedRemove
            }
            JobStatus::Running => {
                tracing::warn!(job_id = %id, "Hard-cancelling running job, stopping backend");
                self.controller.stop_current().await?;

                let now = Utc::now();
                self.store
                    .update_meta(
                        id,
                        JobMetaPatch {
                            cancelled_at: Some(now),
                            finished_at: Some(now),
                            ..Default::default()
                        },
                    )
                    .await?;
                self.store.set_state(id, RawJobState::Canceled).await?;
                CancelMode::HardCancel
            }
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled => {
                return Ok(CancelOutcome {
                    id: id.to_string(),
                    status,
                    mode: CancelMode::AlreadyTerminal,
                    detail: Some("Job already terminal".to_string()),
                });
            }
        };

        crate::metrics::record_job_cancelled(match mode {
            CancelMode::QueuedRemove => "queued-remove",
            CancelMode::HardCancel => "hard-cancel",
            CancelMode::AlreadyTerminal => "already-terminal",
        });
        tracing::info!(job_id = %id, mode = ?mode, "Job cancelled");

        Ok(CancelOutcome {
            id: id.to_string(),
            status: JobStatus::Cancelled,
            mode,
            detail: None,
        })
    }

    /// Switch now when idle, otherwise put a switch job at the head of the queue
    pub async fn force_switch(&self, model: &str) -> SwitchboardResult<SwitchOutcome> {
        if self.drain_mode() {
            return Err(SwitchboardError::DrainMode);
        }
        self.controller.model(model)?;

        let queue_length = self.store.len().await?;
        if queue_length == 0 && !self.controller.is_switching().await {
            self.controller.ensure_active(model).await?;
            return Ok(SwitchOutcome::Switched {
                active_model: self.controller.active_model().await,
            });
        }

        let task = JobTask::Switch {
            model: model.to_string(),
        };
        let job = self
            .store
            .enqueue(NewJob::new(task, self.retention).at_front())
            .await?;

        crate::metrics::record_job_submitted("switch");
        self.publish_queue_length().await;
        tracing::info!(job_id = %job.id, model = %model, queue_length = queue_length, "Switch queued at front");

        Ok(SwitchOutcome::Queued { job_id: job.id })
    }

    pub fn set_drain_mode(&self, enabled: bool) {
        self.drain_mode.store(enabled, Ordering::SeqCst);
        tracing::info!(drain_mode = enabled, "Drain mode updated");
    }

    pub fn drain_mode(&self) -> bool {
        self.drain_mode.load(Ordering::SeqCst)
    }

    pub async fn job_result(&self, id: &str) -> SwitchboardResult<JobResult> {
        let record = self.fetch(id).await?;
        if record.state != RawJobState::Finished {
            return Err(SwitchboardError::JobNotFinished { id: id.to_string() });
        }

        Ok(JobResult {
            id: record.id,
            result: record.result.unwrap_or(Value::Null),
        })
    }

    pub async fn queue_info(&self) -> SwitchboardResult<QueueInfo> {
        let snapshot = self.controller.snapshot().await;
        Ok(QueueInfo {
            queue_length: self.store.len().await?,
            current_job_id: self.store.current_job().await?,
            active_model: snapshot.active_model,
            switching: snapshot.switching,
            drain_mode: self.drain_mode(),
        })
    }

    pub async fn status(&self) -> SwitchboardResult<GatewayStatus> {
        let snapshot = self.controller.snapshot().await;
        Ok(GatewayStatus {
            active_model: snapshot.active_model,
            switching: snapshot.switching,
            backend_state: snapshot.state,
            queue_length: self.store.len().await?,
            drain_mode: self.drain_mode(),
            uptime_sec: self.started_at.elapsed().as_secs(),
        })
    }

    async fn admissible(&self, model: &str) -> SwitchboardResult<bool> {
        if self.store.len().await? != 0 {
            return Ok(false);
        }
        Ok(self.controller.snapshot().await.is_serving(model))
    }

    fn reject(&self, model: &str) -> SwitchboardError {
        crate::metrics::record_admission_rejected(model);
        tracing::debug!(model = %model, "Synchronous request not admitted");
        SwitchboardError::Admission
    }

    async fn fetch(&self, id: &str) -> SwitchboardResult<crate::jobs::JobRecord> {
        self.store
            .fetch(id)
            .await?
            .ok_or_else(|| SwitchboardError::JobNotFound { id: id.to_string() })
    }

    async fn publish_queue_length(&self) {
        match self.store.len().await {
            Ok(length) => crate::metrics::update_queue_length(length),
            Err(e) => tracing::warn!(error = %e, "Could not read queue length"),
        }
    }
}

fn truncate_error(error: &str) -> String {
    error.chars().take(MAX_ERROR_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mocks::MockBackend;
    use crate::config::ModelConfig;
    use crate::controller::ControllerSettings;
    use crate::jobs::MemoryJobStore;
    use crate::probe::mocks::MockProbe;
    use crate::runtime::mocks::{MockRuntime, RuntimeCall};
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        runtime: Arc<MockRuntime>,
        backend: Arc<MockBackend>,
        store: Arc<MemoryJobStore>,
        controller: Arc<ModelController>,
        orchestrator: JobOrchestrator,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let mut models = BTreeMap::new();
        for (name, port) in [("a", 8001), ("b", 8002)] {
            let mut model = ModelConfig::new(name, format!("/mnt/models/{name}"));
            model.port = port;
            models.insert(name.to_string(), model);
        }
        let settings = ControllerSettings {
            slot_name: "llm-backend-active".to_string(),
            network: "host".to_string(),
            lock_path: dir.path().join("switch.lock"),
            slot_state_file: None,
            graceful_stop: Duration::from_secs(1),
            switch_lock_timeout: Duration::from_secs(5),
            ready_timeout: Duration::from_secs(5),
            probe_interval: Duration::from_millis(10),
            log_tail_lines: 50,
            hf_home: PathBuf::from("/var/lib/huggingface"),
            model_mounts: Vec::new(),
            env: BTreeMap::new(),
        };

        let runtime = Arc::new(MockRuntime::new());
        let backend = Arc::new(MockBackend::new());
        let store = Arc::new(MemoryJobStore::new());
        let controller = Arc::new(ModelController::new(
            models,
            settings,
            runtime.clone(),
            Arc::new(MockProbe::ready_after(0)),
        ));
        let orchestrator = JobOrchestrator::new(
            controller.clone(),
            store.clone(),
            backend.clone(),
            RetentionPolicy::default(),
            Duration::from_secs(30),
        );

        Harness {
            _dir: dir,
            runtime,
            backend,
            store,
            controller,
            orchestrator,
        }
    }

    fn payload(model: &str) -> Value {
        serde_json::json!({
            "model": model,
            "messages": [{"role": "user", "content": "hi"}],
        })
    }

    async fn enqueue_switch(store: &MemoryJobStore, model: &str) -> String {
        store
            .enqueue(NewJob::new(
                JobTask::Switch {
                    model: model.to_string(),
                },
                RetentionPolicy::default(),
            ))
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_admission_gate_truth_table() {
        for queue_empty in [true, false] {
            for model_active in [true, false] {
                for switching in [true, false] {
                    let h = harness();
                    h.controller.ensure_active("a").await.unwrap();
                    if !queue_empty {
                        enqueue_switch(&h.store, "b").await;
                    }
                    let requested = if model_active { "a" } else { "b" };
                    let _switch = switching.then(|| h.controller.mark_switching());

                    let result = h.orchestrator.submit_sync(requested, payload(requested)).await;

                    let admitted = queue_empty && model_active && !switching;
                    assert_eq!(
                        result.is_ok(),
                        admitted,
                        "queue_empty={queue_empty} model_active={model_active} switching={switching}"
                    );
                    if !admitted {
                        assert!(matches!(result, Err(SwitchboardError::Admission)));
                        assert_eq!(h.backend.calls(), 0);
                    }
                }
            }
        }
    }

    #[tokio::test]
    async fn test_sync_rejected_while_backend_not_ready() {
        let h = harness();
        let result = h.orchestrator.submit_sync("a", payload("a")).await;
        assert!(matches!(result, Err(SwitchboardError::Admission)));
    }

    #[tokio::test]
    async fn test_sync_unknown_model() {
        let h = harness();
        let result = h.orchestrator.submit_sync("zzz", payload("zzz")).await;
        assert!(matches!(result, Err(SwitchboardError::UnknownModel { .. })));
    }

    #[tokio::test]
    async fn test_sync_passes_backend_errors_through() {
        let h = harness();
        h.controller.ensure_active("a").await.unwrap();
        h.backend.fail_with(422, "{\"detail\":\"bad\"}").await;

        let err = h.orchestrator.submit_sync("a", payload("a")).await.unwrap_err();
        match err {
            SwitchboardError::Backend(crate::error::BackendError::Status { status, body }) => {
                assert_eq!(status, 422);
                assert!(body.contains("bad"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Backend failures leave the slot alone
        assert_eq!(h.controller.backend_state().await, LifecycleState::Ready);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_switch_waits_for_in_flight_sync_request() {
        let h = harness();
        h.controller.ensure_active("a").await.unwrap();
        h.backend.set_delay(Duration::from_millis(200)).await;

        let orchestrator = Arc::new(h.orchestrator);
        let sync = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.submit_sync("a", payload("a")).await })
        };
        h.backend.entered().await;

        let started = Instant::now();
        orchestrator.controller().ensure_active("b").await.unwrap();

        // The switch could only begin once the proxied call released its permit
        assert!(started.elapsed() >= Duration::from_millis(150));
        assert!(sync.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_submit_async_returns_status_url() {
        let h = harness();
        let submitted = h
            .orchestrator
            .submit_async("b", payload("b"), Some("req-42".to_string()))
            .await
            .unwrap();

        assert_eq!(submitted.status, JobStatus::Queued);
        assert_eq!(submitted.status_url, format!("/jobs/{}", submitted.id));

        let view = h.orchestrator.get_status(&submitted.id).await.unwrap();
        assert_eq!(view.status, JobStatus::Queued);
        assert_eq!(view.requested_model, "b");
        assert_eq!(view.queue_position, Some(0));

        let record = h.store.fetch(&submitted.id).await.unwrap().unwrap();
        assert_eq!(record.meta.request_id.as_deref(), Some("req-42"));
        assert!(h.runtime.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_status_derived_for_every_raw_state() {
        let h = harness();
        let table = [
            (RawJobState::Finished, JobStatus::Succeeded),
            (RawJobState::Failed, JobStatus::Failed),
            (RawJobState::Canceled, JobStatus::Cancelled),
            (RawJobState::Queued, JobStatus::Queued),
            (RawJobState::Deferred, JobStatus::Queued),
            (RawJobState::Scheduled, JobStatus::Queued),
            (RawJobState::Started, JobStatus::Running),
            (RawJobState::Unknown, JobStatus::Queued),
        ];

        for (raw, expected) in table {
            let id = enqueue_switch(&h.store, "a").await;
            h.store.set_state(&id, raw).await.unwrap();
            let view = h.orchestrator.get_status(&id).await.unwrap();
            assert_eq!(view.status, expected, "{raw:?}");
        }
    }

    #[tokio::test]
    async fn test_failed_error_is_truncated() {
        let h = harness();
        let id = enqueue_switch(&h.store, "a").await;
        h.store.claim_next().await.unwrap();
        h.store.fail(&id, "x".repeat(10_000)).await.unwrap();

        let view = h.orchestrator.get_status(&id).await.unwrap();
        assert_eq!(view.status, JobStatus::Failed);
        assert_eq!(view.error.unwrap().len(), MAX_ERROR_LEN);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let h = harness();
        assert!(matches!(
            h.orchestrator.get_status("missing").await,
            Err(SwitchboardError::JobNotFound { .. })
        ));
        assert!(matches!(
            h.orchestrator.cancel("missing").await,
            Err(SwitchboardError::JobNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_queued_job() {
        let h = harness();
        let submitted = h
            .orchestrator
            .submit_async("a", payload("a"), None)
            .await
            .unwrap();

        let outcome = h.orchestrator.cancel(&submitted.id).await.unwrap();

        assert_eq!(outcome.mode, CancelMode::QueuedRemove);
        assert_eq!(outcome.status, JobStatus::Cancelled);
        assert_eq!(h.store.len().await.unwrap(), 0);
        assert!(h.runtime.calls().await.is_empty());

        let view = h.orchestrator.get_status(&submitted.id).await.unwrap();
        assert_eq!(view.status, JobStatus::Cancelled);
        assert!(view.cancelled_at.is_some());
        assert!(view.finished_at.is_none());
    }

    #[tokio::test]
    async fn test_cancel_running_job_stops_backend_once() {
        let h = harness();
        h.controller.ensure_active("a").await.unwrap();
        let submitted = h
            .orchestrator
            .submit_async("a", payload("a"), None)
            .await
            .unwrap();
        h.store.claim_next().await.unwrap();
        let stops_before = h.runtime.stop_count().await;

        let outcome = h.orchestrator.cancel(&submitted.id).await.unwrap();

        assert_eq!(outcome.mode, CancelMode::HardCancel);
        assert_eq!(h.runtime.stop_count().await, stops_before + 1);
        assert_eq!(h.controller.active_model().await, None);

        let view = h.orchestrator.get_status(&submitted.id).await.unwrap();
        assert_eq!(view.status, JobStatus::Cancelled);
        assert!(view.cancelled_at.is_some());
        assert!(view.finished_at.is_some());
    }

    /// Store whose `remove` lets a worker get to the job first
    struct ClaimingStore {
        inner: Arc<MemoryJobStore>,
        complete_claimed: bool,
    }

    #[async_trait::async_trait]
    impl JobStore for ClaimingStore {
        async fn enqueue(&self, job: NewJob) -> anyhow::Result<crate::jobs::JobRecord> {
            self.inner.enqueue(job).await
        }
        async fn fetch(&self, id: &str) -> anyhow::Result<Option<crate::jobs::JobRecord>> {
            self.inner.fetch(id).await
        }
        async fn remove(&self, id: &str) -> anyhow::Result<bool> {
            if let Some(claimed) = self.inner.claim_next().await?
                && self.complete_claimed
            {
                self.inner
                    .complete(&claimed.id, serde_json::json!({"ok": true}))
                    .await?;
            }
            self.inner.remove(id).await
        }
        async fn len(&self) -> anyhow::Result<usize> {
            self.inner.len().await
        }
        async fn position(&self, id: &str) -> anyhow::Result<Option<usize>> {
            self.inner.position(id).await
        }
        async fn update_meta(&self, id: &str, patch: JobMetaPatch) -> anyhow::Result<()> {
            self.inner.update_meta(id, patch).await
        }
        async fn set_state(&self, id: &str, state: RawJobState) -> anyhow::Result<()> {
            self.inner.set_state(id, state).await
        }
        async fn claim_next(&self) -> anyhow::Result<Option<crate::jobs::JobRecord>> {
            self.inner.claim_next().await
        }
        async fn complete(&self, id: &str, result: Value) -> anyhow::Result<bool> {
            self.inner.complete(id, result).await
        }
        async fn fail(&self, id: &str, error: String) -> anyhow::Result<bool> {
            self.inner.fail(id, error).await
        }
        async fn current_job(&self) -> anyhow::Result<Option<String>> {
            self.inner.current_job().await
        }
    }

    fn claiming_orchestrator(h: &Harness, complete_claimed: bool) -> JobOrchestrator {
        JobOrchestrator::new(
            h.controller.clone(),
            Arc::new(ClaimingStore {
                inner: h.store.clone(),
                complete_claimed,
            }),
            h.backend.clone(),
            RetentionPolicy::default(),
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn test_cancel_job_claimed_during_removal_hard_cancels() {
        let h = harness();
        h.controller.ensure_active("a").await.unwrap();
        let orchestrator = claiming_orchestrator(&h, false);
        let submitted = orchestrator
            .submit_async("a", payload("a"), None)
            .await
            .unwrap();
        let stops_before = h.runtime.stop_count().await;

        let outcome = orchestrator.cancel(&submitted.id).await.unwrap();

        assert_eq!(outcome.mode, CancelMode::HardCancel);
        assert_eq!(outcome.status, JobStatus::Cancelled);
        assert_eq!(h.runtime.stop_count().await, stops_before + 1);
        assert_eq!(h.controller.active_model().await, None);

        let view = orchestrator.get_status(&submitted.id).await.unwrap();
        assert_eq!(view.status, JobStatus::Cancelled);
        assert!(view.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_cancel_job_finished_during_removal_is_terminal() {
        let h = harness();
        let orchestrator = claiming_orchestrator(&h, true);
        let submitted = orchestrator
            .submit_async("a", payload("a"), None)
            .await
            .unwrap();

        let outcome = orchestrator.cancel(&submitted.id).await.unwrap();

        assert_eq!(outcome.mode, CancelMode::AlreadyTerminal);
        assert_eq!(outcome.status, JobStatus::Succeeded);
        assert!(h.runtime.calls().await.is_empty());
        assert_eq!(
            orchestrator.get_status(&submitted.id).await.unwrap().status,
            JobStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn test_cancel_terminal_job_is_noop() {
        let h = harness();
        let id = enqueue_switch(&h.store, "a").await;
        h.store.claim_next().await.unwrap();
        h.store.complete(&id, serde_json::json!({"ok": true})).await.unwrap();

        let outcome = h.orchestrator.cancel(&id).await.unwrap();

        assert_eq!(outcome.mode, CancelMode::AlreadyTerminal);
        assert_eq!(outcome.status, JobStatus::Succeeded);
        assert!(h.runtime.calls().await.is_empty());
        assert_eq!(h.orchestrator.get_status(&id).await.unwrap().status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_force_switch_runs_inline_when_idle() {
        let h = harness();
        let outcome = h.orchestrator.force_switch("b").await.unwrap();
        assert_eq!(
            outcome,
            SwitchOutcome::Switched {
                active_model: Some("b".to_string())
            }
        );
        assert_eq!(h.runtime.run_count().await, 1);
    }

    #[tokio::test]
    async fn test_force_switch_queues_at_front_when_busy() {
        let h = harness();
        let waiting = h
            .orchestrator
            .submit_async("a", payload("a"), None)
            .await
            .unwrap();

        let outcome = h.orchestrator.force_switch("b").await.unwrap();
        let SwitchOutcome::Queued { job_id } = outcome else {
            panic!("expected a queued switch");
        };

        assert_eq!(h.store.position(&job_id).await.unwrap(), Some(0));
        assert_eq!(h.store.position(&waiting.id).await.unwrap(), Some(1));
        assert!(h.runtime.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_force_switch_rejected_in_drain_mode() {
        let h = harness();
        h.orchestrator.set_drain_mode(true);

        assert!(matches!(
            h.orchestrator.force_switch("b").await,
            Err(SwitchboardError::DrainMode)
        ));
        assert!(h.runtime.calls().await.is_empty());

        h.orchestrator.set_drain_mode(false);
        assert!(h.orchestrator.force_switch("b").await.is_ok());
    }

    #[tokio::test]
    async fn test_job_result_requires_finished_job() {
        let h = harness();
        let id = enqueue_switch(&h.store, "a").await;

        assert!(matches!(
            h.orchestrator.job_result(&id).await,
            Err(SwitchboardError::JobNotFinished { .. })
        ));

        h.store.claim_next().await.unwrap();
        h.store.complete(&id, serde_json::json!({"answer": 42})).await.unwrap();
        let result = h.orchestrator.job_result(&id).await.unwrap();
        assert_eq!(result.result["answer"], 42);
    }

    #[tokio::test]
    async fn test_queue_info_and_status() {
        let h = harness();
        h.controller.ensure_active("a").await.unwrap();
        let id = enqueue_switch(&h.store, "b").await;
        enqueue_switch(&h.store, "a").await;
        h.store.claim_next().await.unwrap();

        let info = h.orchestrator.queue_info().await.unwrap();
        assert_eq!(info.queue_length, 1);
        assert_eq!(info.current_job_id, Some(id));
        assert_eq!(info.active_model.as_deref(), Some("a"));
        assert!(!info.drain_mode);

        let status = h.orchestrator.status().await.unwrap();
        assert_eq!(status.backend_state, LifecycleState::Ready);
        assert_eq!(status.queue_length, 1);
        assert!(!status.switching);
    }

    #[test]
    fn test_cancel_outcome_serialization() {
        let outcome = CancelOutcome {
            id: "j".to_string(),
            status: JobStatus::Cancelled,
            mode: CancelMode::QueuedRemove,
            detail: None,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["mode"], "queued-remove");
        assert_eq!(json["status"], "cancelled");
        assert!(json.get("detail").is_none());

        let switched = serde_json::to_value(SwitchOutcome::Queued {
            job_id: "j".to_string(),
        })
        .unwrap();
        assert_eq!(switched["status"], "queued");
        assert_eq!(switched["job_id"], "j");
    }
}
