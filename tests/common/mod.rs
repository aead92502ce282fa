//! Shared fakes and server setup for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum_test::TestServer;
use llm_switchboard::{
    ContainerRuntime, ContainerSpec, InferenceBackend, JobOrchestrator, JobStore, MemoryJobStore,
    ModelController, ReadinessProbe,
    api::{AppState, create_router},
    config::{ModelConfig, SwitchboardConfig},
    error::BackendError,
    jobs::RetentionPolicy,
    metrics,
};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tempfile::TempDir;

pub const API_KEY: &str = "test-api-key";
pub const ADMIN_KEY: &str = "test-admin-key";

// Global metrics handle - only initialize once per test process
static METRICS_HANDLE: OnceLock<metrics_exporter_prometheus::PrometheusHandle> = OnceLock::new();

pub fn get_metrics_handle() -> metrics_exporter_prometheus::PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| metrics::setup_metrics().expect("Failed to setup metrics"))
        .clone()
}

/// Runtime that accepts every command and remembers launched images
#[derive(Default)]
pub struct FakeRuntime {
    pub launched: Mutex<Vec<String>>,
    pub stops: AtomicUsize,
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn run(&self, spec: &ContainerSpec) -> anyhow::Result<()> {
        self.launched.lock().unwrap().push(spec.args.join(" "));
        Ok(())
    }

    async fn stop(&self, _name: &str, _grace: Duration) -> anyhow::Result<bool> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn kill(&self, _name: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn remove(&self, _name: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn logs(&self, _name: &str, _tail: usize) -> anyhow::Result<String> {
        Ok(String::new())
    }
}

/// Backend that is ready as soon as it is launched
pub struct InstantProbe;

#[async_trait]
impl ReadinessProbe for InstantProbe {
    async fn probe(&self, _model: &ModelConfig) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Answers every chat with a completion naming the model
#[derive(Default)]
pub struct EchoBackend {
    pub calls: AtomicUsize,
}

#[async_trait]
impl InferenceBackend for EchoBackend {
    async fn chat(
        &self,
        model: &ModelConfig,
        payload: &Value,
        _timeout: Duration,
    ) -> Result<Value, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({
            "object": "chat.completion",
            "model": model.name,
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "pong"},
                "finish_reason": "stop"
            }],
            "echo": payload,
        }))
    }
}

pub fn test_config(temp_dir: &TempDir) -> SwitchboardConfig {
    let mut config = SwitchboardConfig::default();
    config.paths.lock_file = temp_dir.path().join("switch.lock");
    config.paths.slot_state_file = Some(temp_dir.path().join("slot.json"));
    config.paths.hf_home = temp_dir.path().join("hf");
    config.timeouts.probe_interval_ms = 10;
    config.timeouts.switch_lock_secs = 2;
    config.timeouts.backend_ready_secs = 2;
    config.security.rate_limit.enabled = false;
    config.api_key = API_KEY.to_string();
    config.admin_api_key = ADMIN_KEY.to_string();

    for (name, port) in [("qwen", 8001), ("llama", 8002)] {
        let mut model = ModelConfig::new(name, format!("/mnt/models/{name}"));
        model.port = port;
        config.models.insert(name.to_string(), model);
    }

    config
}

pub struct TestGateway {
    pub server: TestServer,
    pub orchestrator: Arc<JobOrchestrator>,
    pub controller: Arc<ModelController>,
    pub store: Arc<dyn JobStore>,
    pub runtime: Arc<FakeRuntime>,
    pub backend: Arc<EchoBackend>,
    pub config: SwitchboardConfig,
    _temp_dir: TempDir,
}

pub async fn create_gateway() -> TestGateway {
    create_gateway_with(|_| {}).await
}

/// Gateway with an in-memory store and fakes behind every external seam
pub async fn create_gateway_with(customize: impl FnOnce(&mut SwitchboardConfig)) -> TestGateway {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let mut config = test_config(&temp_dir);
    customize(&mut config);

    let runtime = Arc::new(FakeRuntime::default());
    let backend = Arc::new(EchoBackend::default());
    let controller = Arc::new(ModelController::from_config(
        &config,
        runtime.clone(),
        Arc::new(InstantProbe),
    ));
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());

    let orchestrator = Arc::new(JobOrchestrator::new(
        controller.clone(),
        store.clone(),
        backend.clone(),
        RetentionPolicy::from(&config.jobs),
        Duration::from_secs(config.timeouts.inference_secs),
    ));

    let state = AppState {
        orchestrator: orchestrator.clone(),
        config: Arc::new(config.clone()),
        prometheus_handle: get_metrics_handle(),
    };

    let server = TestServer::try_new(create_router(state)).expect("Failed to create test server");

    TestGateway {
        server,
        orchestrator,
        controller,
        store,
        runtime,
        backend,
        config,
        _temp_dir: temp_dir,
    }
}

pub fn chat_body(model: &str) -> Value {
    json!({
        "model": model,
        "messages": [{"role": "user", "content": "ping"}]
    })
}
