//! Model lifecycle controller for the single backend slot
//!
//! Owns the active-model slot and serializes switches through a [`SwitchCoordinator`].
//! A switch is stop → start → wait-ready; any step failing leaves the slot in `Failed`,
//! which the next switch recovers from by forcing a clean stop first.

use crate::config::{ModelConfig, SwitchboardConfig};
use crate::error::{SwitchboardError, SwitchboardResult};
use crate::lock::{ServingPermit, SwitchCoordinator};
use crate::probe::ReadinessProbe;
use crate::runtime::{ContainerRuntime, ContainerSpec};
use crate::slot::{LifecycleState, SlotRecord, SlotRecordFile, SlotSnapshot};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Lifecycle knobs resolved from configuration
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub slot_name: String,
    pub network: String,
    pub lock_path: PathBuf,
    pub slot_state_file: Option<PathBuf>,
    pub graceful_stop: Duration,
    pub switch_lock_timeout: Duration,
    /// Default readiness deadline; models may override it
    pub ready_timeout: Duration,
    pub probe_interval: Duration,
    pub log_tail_lines: usize,
    pub hf_home: PathBuf,
    pub model_mounts: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl From<&SwitchboardConfig> for ControllerSettings {
    fn from(config: &SwitchboardConfig) -> Self {
        Self {
            slot_name: config.slot_name(),
            network: config.backend.network.clone(),
            lock_path: config.paths.lock_file.clone(),
            slot_state_file: Some(config.paths.slot_record_path()),
            graceful_stop: Duration::from_secs(config.timeouts.graceful_stop_secs),
            switch_lock_timeout: Duration::from_secs(config.timeouts.switch_lock_secs),
            ready_timeout: Duration::from_secs(config.timeouts.backend_ready_secs),
            probe_interval: Duration::from_millis(config.timeouts.probe_interval_ms),
            log_tail_lines: config.backend.log_tail_lines,
            hf_home: config.paths.hf_home.clone(),
            model_mounts: config.paths.model_mounts.clone(),
            env: config.backend.env.clone(),
        }
    }
}

pub struct ModelController {
    models: BTreeMap<String, ModelConfig>,
    settings: ControllerSettings,
    runtime: Arc<dyn ContainerRuntime>,
    prober: Arc<dyn ReadinessProbe>,
    coordinator: SwitchCoordinator,
    slot: RwLock<SlotRecord>,
    switching: AtomicBool,
    record: Option<SlotRecordFile>,
}

/// Clears the local `switching` flag however the switch ends
pub(crate) struct SwitchingFlag<'a>(&'a AtomicBool);

impl<'a> SwitchingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for SwitchingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Marks the slot `Failed` when a switch or teardown future is dropped midway
///
/// A caller timing out or disconnecting would otherwise leave `Starting` or `Stopping`
/// in the shared record, which every process reads as a switch in progress.
struct UnfinishedTransition<'a> {
    controller: &'a ModelController,
    model: Option<String>,
    finished: bool,
}

impl<'a> UnfinishedTransition<'a> {
    fn begin(controller: &'a ModelController, model: Option<String>) -> Self {
        Self {
            controller,
            model,
            finished: false,
        }
    }

    fn finish(mut self) {
        self.finished = true;
    }
}

impl Drop for UnfinishedTransition<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        tracing::warn!(model = ?self.model, "Slot transition abandoned, marking backend failed");
        let record = SlotRecord {
            active_model: self.model.take(),
            state: LifecycleState::Failed,
            updated_at: Some(chrono::Utc::now()),
        };

        if let Some(file) = &self.controller.record
            && let Err(e) = file.save_blocking(&record)
        {
            tracing::warn!(path = ?file.path(), error = %e, "Failed to persist slot record");
        }

        match self.controller.slot.try_write() {
            Ok(mut slot) => *slot = record,
            Err(_) => tracing::warn!("Slot busy, failed state only recorded on disk"),
        }
    }
}

impl ModelController {
    pub fn new(
        models: BTreeMap<String, ModelConfig>,
        settings: ControllerSettings,
        runtime: Arc<dyn ContainerRuntime>,
        prober: Arc<dyn ReadinessProbe>,
    ) -> Self {
        let coordinator = SwitchCoordinator::new(settings.lock_path.clone());
        let record = settings.slot_state_file.clone().map(SlotRecordFile::new);

        Self {
            models,
            settings,
            runtime,
            prober,
            coordinator,
            slot: RwLock::new(SlotRecord::default()),
            switching: AtomicBool::new(false),
            record,
        }
    }

    pub fn from_config(
        config: &SwitchboardConfig,
        runtime: Arc<dyn ContainerRuntime>,
        prober: Arc<dyn ReadinessProbe>,
    ) -> Self {
        Self::new(
            config.models.clone(),
            ControllerSettings::from(config),
            runtime,
            prober,
        )
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn model(&self, name: &str) -> SwitchboardResult<&ModelConfig> {
        self.models
            .get(name)
            .ok_or_else(|| SwitchboardError::UnknownModel {
                model: name.to_string(),
            })
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelConfig> {
        self.models.values()
    }

    /// Current occupant, lifecycle state and switching flag
    ///
    /// Readers may observe transient states such as `Starting`.
    pub async fn snapshot(&self) -> SlotSnapshot {
        self.refresh().await;
        let slot = self.slot.read().await;
        SlotSnapshot {
            active_model: slot.active_model.clone(),
            state: slot.state,
            switching: self.switching.load(Ordering::SeqCst) || slot.state.is_transitional(),
        }
    }

    pub async fn active_model(&self) -> Option<String> {
        self.snapshot().await.active_model
    }

    pub async fn backend_state(&self) -> LifecycleState {
        self.snapshot().await.state
    }

    pub async fn is_switching(&self) -> bool {
        self.snapshot().await.switching
    }

    /// Shared permit for proxying a request without a switch racing it
    pub fn try_serve(&self) -> Option<ServingPermit> {
        self.coordinator.try_serve()
    }

    #[cfg(test)]
    pub(crate) fn mark_switching(&self) -> SwitchingFlag<'_> {
        SwitchingFlag::raise(&self.switching)
    }

    /// Guarantee `name` occupies the slot and is ready
    pub async fn ensure_active(&self, name: &str) -> SwitchboardResult<()> {
        let model = self.model(name)?;

        let snapshot = self.snapshot().await;
        if snapshot.active_model.as_deref() == Some(name) && snapshot.state == LifecycleState::Ready
        {
            return Ok(());
        }

        let started = Instant::now();
        let _guard = match self
            .coordinator
            .acquire(self.settings.switch_lock_timeout)
            .await
        {
            Ok(guard) => guard,
            Err(e) => {
                crate::metrics::record_switch(name, "lock_timeout", started.elapsed());
                tracing::error!(model = %name, error = %e, "Could not acquire switch lock");
                return Err(e);
            }
        };

        // Another caller may have finished the same switch while we waited
        self.refresh().await;
        if self.is_ready_with(name).await {
            tracing::debug!(model = %name, "Model became active while waiting for the switch lock");
            return Ok(());
        }

        let _switching = SwitchingFlag::raise(&self.switching);
        let transition = UnfinishedTransition::begin(self, Some(name.to_string()));
        let result = self.switch_locked(model).await;
        transition.finish();

        let outcome = match &result {
            Ok(()) => "ok",
            Err(SwitchboardError::ReadinessTimeout { .. }) => "readiness_timeout",
            Err(SwitchboardError::Launch { .. }) => "launch_failed",
            Err(_) => "error",
        };
        crate::metrics::record_switch(name, outcome, started.elapsed());

        result
    }

    /// Tear down whatever occupies the slot
    ///
    /// Best-effort and idempotent; runtime errors are logged, never raised. Only the
    /// switch lock acquisition can fail.
    ///
    /// A switch in flight holds the lock until it settles, so a hard cancel issued
    /// mid-switch waits up to the readiness deadline before anything is stopped.
    pub async fn stop_current(&self) -> SwitchboardResult<()> {
        if self.is_switching().await {
            tracing::info!(
                timeout_secs = self.settings.switch_lock_timeout.as_secs(),
                "Stop waiting for the in-flight switch to release the lock"
            );
        }

        let _guard = self
            .coordinator
            .acquire(self.settings.switch_lock_timeout)
            .await?;
        self.refresh().await;

        let previous = self.slot.read().await.active_model.clone();
        let transition = UnfinishedTransition::begin(self, previous);
        self.teardown().await;
        transition.finish();
        Ok(())
    }

    async fn switch_locked(&self, model: &ModelConfig) -> SwitchboardResult<()> {
        let current = self.slot.read().await.clone();

        tracing::info!(
            from = ?current.active_model,
            from_state = %current.state,
            to = %model.name,
            "Switching backend model"
        );

        if current.active_model.is_some() || current.state != LifecycleState::Idle {
            self.teardown().await;
        }

        self.start_model(model).await?;
        self.wait_ready(model).await
    }

    async fn teardown(&self) {
        let name = self.settings.slot_name.as_str();
        let previous = self.slot.read().await.active_model.clone();

        self.set_slot(previous.clone(), LifecycleState::Stopping).await;

        if let Err(e) = self.runtime.remove(name).await {
            tracing::warn!(container = %name, error = %e, "Force remove failed");
        }

        let acknowledged = match self.runtime.stop(name, self.settings.graceful_stop).await {
            Ok(acknowledged) => acknowledged,
            Err(e) => {
                tracing::warn!(container = %name, error = %e, "Graceful stop failed");
                false
            }
        };

        if !acknowledged {
            tracing::debug!(container = %name, "Stop not acknowledged, killing");
            if let Err(e) = self.runtime.kill(name).await {
                tracing::warn!(container = %name, error = %e, "Kill failed");
            }
        }

        if let Err(e) = self.runtime.remove(name).await {
            tracing::warn!(container = %name, error = %e, "Final force remove failed");
        }

        self.set_slot(None, LifecycleState::Idle).await;

        tracing::info!(container = %name, previous = ?previous, "Backend slot cleared");
    }

    async fn start_model(&self, model: &ModelConfig) -> SwitchboardResult<()> {
        let name = self.settings.slot_name.as_str();

        // The slot name is fixed; a container left behind by another process would
        // make the run fail.
        if let Err(e) = self.runtime.remove(name).await {
            tracing::warn!(container = %name, error = %e, "Pre-start remove failed");
        }

        self.set_slot(Some(model.name.clone()), LifecycleState::Starting)
            .await;

        let spec = self.container_spec(model);
        if let Err(e) = self.runtime.run(&spec).await {
            self.set_slot(None, LifecycleState::Failed).await;
            tracing::error!(model = %model.name, error = %e, "Backend launch failed");
            return Err(SwitchboardError::Launch {
                model: model.name.clone(),
                message: format!("{e:#}"),
            });
        }

        tracing::info!(
            model = %model.name,
            image = %model.image,
            port = model.port,
            "Backend starting"
        );

        Ok(())
    }

    async fn wait_ready(&self, model: &ModelConfig) -> SwitchboardResult<()> {
        let timeout = model
            .ready_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.settings.ready_timeout);
        let started = Instant::now();
        let deadline = started + timeout;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            match self.prober.probe(model).await {
                Ok(()) => {
                    self.set_slot(Some(model.name.clone()), LifecycleState::Ready)
                        .await;
                    tracing::info!(
                        model = %model.name,
                        attempts = attempts,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Backend ready"
                    );
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!(model = %model.name, attempt = attempts, error = %e, "Backend not ready yet");
                }
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(self.settings.probe_interval.min(deadline - now)).await;
        }

        let logs = match self
            .runtime
            .logs(&self.settings.slot_name, self.settings.log_tail_lines)
            .await
        {
            Ok(logs) => logs,
            Err(e) => format!("<failed to capture backend logs: {e}>"),
        };

        self.set_slot(Some(model.name.clone()), LifecycleState::Failed)
            .await;

        tracing::error!(
            model = %model.name,
            timeout_secs = timeout.as_secs(),
            attempts = attempts,
            "Backend readiness timeout"
        );

        Err(SwitchboardError::ReadinessTimeout {
            model: model.name.clone(),
            timeout_secs: timeout.as_secs(),
            logs,
        })
    }

    fn container_spec(&self, model: &ModelConfig) -> ContainerSpec {
        let hf_home = self.settings.hf_home.to_string_lossy().to_string();

        let mut env = vec![
            (
                "HF_TOKEN".to_string(),
                std::env::var("HF_TOKEN").unwrap_or_default(),
            ),
            ("HF_HOME".to_string(), hf_home.clone()),
            ("TRANSFORMERS_CACHE".to_string(), hf_home.clone()),
        ];
        env.extend(self.settings.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env.extend(model.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut mounts = self.settings.model_mounts.clone();
        mounts.push(format!("{hf_home}:{hf_home}"));
        mounts.extend(model.mounts.iter().cloned());

        let mut args = model.command.clone();
        args.extend([
            "--model".to_string(),
            model.source.clone(),
            "--port".to_string(),
            model.port.to_string(),
        ]);
        args.extend(model.launch_args.iter().cloned());

        ContainerSpec {
            name: self.settings.slot_name.clone(),
            image: model.image.clone(),
            network: self.settings.network.clone(),
            env,
            mounts,
            args,
        }
    }

    async fn is_ready_with(&self, name: &str) -> bool {
        let slot = self.slot.read().await;
        slot.active_model.as_deref() == Some(name) && slot.state == LifecycleState::Ready
    }

    /// Pull the shared slot record, if one is configured
    async fn refresh(&self) {
        let Some(record) = &self.record else {
            return;
        };

        match record.load().await {
            Ok(Some(loaded)) => *self.slot.write().await = loaded,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(path = ?record.path(), error = %e, "Ignoring unreadable slot record");
            }
        }
    }

    async fn set_slot(&self, active_model: Option<String>, state: LifecycleState) {
        let record = SlotRecord {
            active_model,
            state,
            updated_at: Some(chrono::Utc::now()),
        };

        if let Some(file) = &self.record
            && let Err(e) = file.save(&record).await
        {
            tracing::warn!(path = ?file.path(), error = %e, "Failed to persist slot record");
        }

        *self.slot.write().await = record;
    }
}
