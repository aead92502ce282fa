//! Queue consumer executing chat and switch jobs
//!
//! Each worker process drives its own [`ModelController`] against the shared slot; the
//! switch coordinator's file lock keeps it from racing the gateway.

use crate::backend::InferenceBackend;
use crate::controller::ModelController;
use crate::error::SwitchboardError;
use crate::jobs::{JobMetaPatch, JobRecord, JobStore, JobTask};
use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Worker loop settings resolved from configuration
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub job_timeout: Duration,
    pub poll_interval: Duration,
    /// Used when a model has no override
    pub inference_timeout: Duration,
}

pub struct JobRunner {
    controller: Arc<ModelController>,
    store: Arc<dyn JobStore>,
    backend: Arc<dyn InferenceBackend>,
    settings: RunnerSettings,
}

impl JobRunner {
    pub fn new(
        controller: Arc<ModelController>,
        store: Arc<dyn JobStore>,
        backend: Arc<dyn InferenceBackend>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            controller,
            store,
            backend,
            settings,
        }
    }

    /// Claim and execute at most one job; returns whether one was found
    pub async fn run_once(&self) -> Result<bool> {
        let Some(job) = self.store.claim_next().await? else {
            return Ok(false);
        };

        tracing::info!(
            job_id = %job.id,
            model = %job.task.model(),
            kind = job_kind(&job.task),
            "Job picked up"
        );

        self.store
            .update_meta(
                &job.id,
                JobMetaPatch {
                    started_at: Some(Utc::now()),
                    requested_model: Some(job.task.model().to_string()),
                    ..Default::default()
                },
            )
            .await?;

        let outcome = match tokio::time::timeout(self.settings.job_timeout, self.execute(&job)).await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(SwitchboardError::Internal(anyhow::anyhow!(
                "Job exceeded timeout of {}s",
                self.settings.job_timeout.as_secs()
            ))),
        };

        self.record_outcome(&job, outcome).await?;
        Ok(true)
    }

    /// Poll the queue until `shutdown` flips to true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        tracing::info!(
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            "Worker started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let found = match self.run_once().await {
                Ok(found) => found,
                Err(e) => {
                    tracing::error!(error = %e, "Job store error");
                    false
                }
            };

            if !found {
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!("Worker stopped");
        Ok(())
    }

    async fn execute(&self, job: &JobRecord) -> Result<Value, SwitchboardError> {
        match &job.task {
            JobTask::Chat { model, payload, .. } => {
                let config = self.controller.model(model)?;
                self.controller.ensure_active(model).await?;

                let timeout = config
                    .inference_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(self.settings.inference_timeout);
                Ok(self.backend.chat(config, payload, timeout).await?)
            }
            JobTask::Switch { model } => {
                self.controller.ensure_active(model).await?;
                Ok(serde_json::json!({"status": "switched", "active_model": model}))
            }
        }
    }

    async fn record_outcome(
        &self,
        job: &JobRecord,
        outcome: Result<Value, SwitchboardError>,
    ) -> Result<()> {
        let finished_at = Some(Utc::now());

        match outcome {
            Ok(result) => {
                self.store
                    .update_meta(
                        &job.id,
                        JobMetaPatch {
                            finished_at,
                            progress: Some(1.0),
                            ..Default::default()
                        },
                    )
                    .await?;

                if self.store.complete(&job.id, result).await? {
                    crate::metrics::record_job_finished("succeeded");
                    tracing::info!(job_id = %job.id, "Job succeeded");
                } else {
                    tracing::info!(job_id = %job.id, "Job was cancelled, discarding result");
                }
            }
            Err(e) => {
                let message = e.to_string();
                self.store
                    .update_meta(
                        &job.id,
                        JobMetaPatch {
                            finished_at,
                            error: Some(message.clone()),
                            ..Default::default()
                        },
                    )
                    .await?;

                if self.store.fail(&job.id, message).await? {
                    crate::metrics::record_job_finished("failed");
                    tracing::error!(job_id = %job.id, error = %e, "Job failed");
                } else {
                    tracing::info!(job_id = %job.id, error = %e, "Cancelled job ended with error");
                }
            }
        }

        Ok(())
    }
}

fn job_kind(task: &JobTask) -> &'static str {
    match task {
        JobTask::Chat { .. } => "chat",
        JobTask::Switch { .. } => "switch",
    }
}
