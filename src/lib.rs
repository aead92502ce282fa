//! LLM Switchboard - single-slot GPU inference gateway
//!
//! Serves OpenAI-style chat requests from whichever model currently occupies the one
//! backend slot, switching models on demand and queueing work that cannot be served
//! immediately.

pub mod api;
pub mod auth;
pub mod backend;
pub mod config;
pub mod controller;
pub mod error;
pub mod jobs;
pub mod lock;
pub mod metrics;
pub mod orchestrator;
pub mod probe;
pub mod runtime;
pub mod slot;
pub mod worker;

pub use backend::{HttpBackend, InferenceBackend};
pub use config::{ModelConfig, SwitchboardConfig};
pub use controller::{ControllerSettings, ModelController};
pub use error::{BackendError, SwitchboardError, SwitchboardResult};
pub use jobs::{FileJobStore, JobStatus, JobStore, MemoryJobStore};
pub use lock::SwitchCoordinator;
pub use orchestrator::JobOrchestrator;
pub use probe::{HttpProbe, ReadinessProbe};
pub use runtime::{ContainerRuntime, ContainerSpec, DockerRuntime};
pub use slot::{LifecycleState, SlotSnapshot};
pub use worker::{JobRunner, RunnerSettings};

use std::sync::Arc;
use std::time::Duration;

/// Controller wired to docker and the HTTP prober, as both binaries run it
pub fn build_controller(config: &SwitchboardConfig) -> anyhow::Result<Arc<ModelController>> {
    let runtime = Arc::new(DockerRuntime::new(config.backend.docker_binary.clone()));
    let prober = Arc::new(HttpProbe::new(
        config.backend.host.clone(),
        Duration::from_secs(config.timeouts.probe_request_secs),
    )?);

    Ok(Arc::new(ModelController::from_config(config, runtime, prober)))
}
