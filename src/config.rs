//! Configuration structures and loading logic

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Main gateway configuration, shared by the gateway and the worker
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SwitchboardConfig {
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub timeouts: TimeoutConfig,
    pub jobs: JobsConfig,
    pub paths: PathsConfig,
    pub backend: BackendConfig,
    pub models: BTreeMap<String, ModelConfig>,

    /// Shared secret for the public API (env `GATEWAY_API_KEY`)
    #[serde(skip)]
    pub api_key: String,

    /// Shared secret for admin routes (env `GATEWAY_ADMIN_API_KEY`, falls back to `api_key`)
    #[serde(skip)]
    pub admin_api_key: String,
}

impl Default for SwitchboardConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            security: SecurityConfig::default(),
            timeouts: TimeoutConfig::default(),
            jobs: JobsConfig::default(),
            paths: PathsConfig::default(),
            backend: BackendConfig::default(),
            models: BTreeMap::new(),
            api_key: String::new(),
            admin_api_key: String::new(),
        }
    }
}

impl SwitchboardConfig {
    /// Load configuration from file with environment variable overrides
    ///
    /// When `path` is `None`, `SWITCHBOARD_CONFIG` is consulted before falling back
    /// to defaults.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = path.or_else(|| std::env::var("SWITCHBOARD_CONFIG").ok().map(PathBuf::from));

        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            Self::from_toml(&content)?
        } else {
            Self::default()
        };

        // Environment variable overrides
        if let Ok(port) = std::env::var("SWITCHBOARD_PORT") {
            config.server.port = port.parse().context("Invalid SWITCHBOARD_PORT value")?;
        }
        if let Ok(store_path) = std::env::var("SWITCHBOARD_JOB_STORE") {
            config.jobs.store_path = Some(PathBuf::from(store_path));
        }
        if let Ok(prefix) = std::env::var("BACKEND_CONTAINER_NAME_PREFIX") {
            config.backend.container_prefix = prefix;
        }
        if let Ok(network) = std::env::var("DOCKER_NETWORK_MODE") {
            config.backend.network = network;
        }

        config.api_key = std::env::var("GATEWAY_API_KEY").unwrap_or_default();
        config.admin_api_key =
            std::env::var("GATEWAY_ADMIN_API_KEY").unwrap_or_else(|_| config.api_key.clone());

        Ok(config)
    }

    /// Parse a TOML document and attach each model's table key as its name
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content).context("Failed to parse TOML config")?;
        for (name, model) in config.models.iter_mut() {
            model.name = name.clone();
        }
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port < 1024 {
            anyhow::bail!("API port must be >= 1024 (got {})", self.server.port);
        }

        if self.models.is_empty() {
            anyhow::bail!("At least one model must be configured");
        }

        for (name, model) in &self.models {
            if name.is_empty() {
                anyhow::bail!("Model name cannot be empty");
            }
            if model.source.is_empty() {
                anyhow::bail!("Model '{}' has an empty source", name);
            }
            if model.port < 1024 {
                anyhow::bail!("Model '{}' port must be >= 1024 (got {})", name, model.port);
            }
            if model.port == self.server.port {
                anyhow::bail!(
                    "Model '{}' port {} conflicts with API port",
                    name,
                    model.port
                );
            }
        }

        let timeouts = &self.timeouts;
        for (label, value) in [
            ("graceful_stop_secs", timeouts.graceful_stop_secs),
            ("backend_ready_secs", timeouts.backend_ready_secs),
            ("switch_lock_secs", timeouts.switch_lock_secs),
            ("inference_secs", timeouts.inference_secs),
            ("probe_interval_ms", timeouts.probe_interval_ms),
            ("probe_request_secs", timeouts.probe_request_secs),
        ] {
            if value == 0 {
                anyhow::bail!("Timeout '{}' must be greater than zero", label);
            }
        }

        if self.backend.container_prefix.is_empty() {
            anyhow::bail!("Backend container prefix cannot be empty");
        }

        if self.security.require_api_key && self.api_key.is_empty() {
            anyhow::bail!("GATEWAY_API_KEY must be set when security.require_api_key is true");
        }

        if let Some(parent) = self.paths.lock_file.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create lock file directory: {:?}", parent))?;
        }

        Ok(())
    }

    /// Look up a configured model by name
    pub fn model(&self, name: &str) -> Option<&ModelConfig> {
        self.models.get(name)
    }

    /// Fixed container name of the single backend slot
    pub fn slot_name(&self) -> String {
        format!("{}-active", self.backend.container_prefix)
    }

    /// Inference timeout for a model, honoring its override
    pub fn inference_timeout(&self, model: &ModelConfig) -> Duration {
        Duration::from_secs(
            model
                .inference_timeout_secs
                .unwrap_or(self.timeouts.inference_secs),
        )
    }

    /// Readiness deadline for a model, honoring its override
    pub fn ready_timeout(&self, model: &ModelConfig) -> Duration {
        Duration::from_secs(
            model
                .ready_timeout_secs
                .unwrap_or(self.timeouts.backend_ready_secs),
        )
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: default_api_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub require_api_key: bool,
    pub health_without_api_key: bool,
    pub rate_limit: RateLimitConfig,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            require_api_key: true,
            health_without_api_key: true,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_minute: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 120,
        }
    }
}

/// Lifecycle and request timeouts
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub graceful_stop_secs: u64,
    pub backend_ready_secs: u64,
    pub switch_lock_secs: u64,
    pub inference_secs: u64,
    pub probe_interval_ms: u64,
    pub probe_request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            graceful_stop_secs: 20,
            backend_ready_secs: 600,
            switch_lock_secs: 900,
            inference_secs: 1200,
            probe_interval_ms: 2000,
            probe_request_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Shared queue file; when unset the gateway keeps its queue in memory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
    pub result_ttl_secs: u64,
    pub failure_ttl_secs: u64,
    pub job_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            result_ttl_secs: 86_400,
            failure_ttl_secs: 86_400,
            job_timeout_secs: 7_200,
            poll_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsConfig {
    pub hf_home: PathBuf,
    pub lock_file: PathBuf,
    /// Shared slot record; defaults to `<lock_file stem>.slot.json` beside the lock
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot_state_file: Option<PathBuf>,
    /// `host:container` volume mounts given to every backend container
    pub model_mounts: Vec<String>,
}

impl PathsConfig {
    /// Slot record every controller on this host reads and writes
    pub fn slot_record_path(&self) -> PathBuf {
        self.slot_state_file
            .clone()
            .unwrap_or_else(|| self.lock_file.with_extension("slot.json"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            hf_home: PathBuf::from("/var/lib/huggingface"),
            lock_file: PathBuf::from("/var/lock/llm-switch.lock"),
            slot_state_file: None,
            model_mounts: vec!["/mnt/models:/mnt/models".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    pub container_prefix: String,
    pub network: String,
    pub docker_binary: String,
    pub host: String,
    pub log_tail_lines: usize,
    /// Extra environment passed to every backend container
    pub env: BTreeMap<String, String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            container_prefix: "llm-backend".to_string(),
            network: "host".to_string(),
            docker_binary: "docker".to_string(),
            host: "127.0.0.1".to_string(),
            log_tail_lines: 200,
            env: BTreeMap::new(),
        }
    }
}

/// Configuration for a single servable model
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ModelConfig {
    /// Filled from the `[models.<name>]` table key
    #[serde(default, skip_serializing)]
    pub name: String,

    /// Model path or hub id handed to the serving process
    pub source: String,

    #[serde(default = "default_image")]
    pub image: String,

    #[serde(default = "default_backend_port")]
    pub port: u16,

    /// Container entrypoint, followed by `--model <source> --port <port>`
    #[serde(default = "default_command")]
    pub command: Vec<String>,

    /// Additional CLI args appended after the generated ones
    #[serde(default)]
    pub launch_args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub mounts: Vec<String>,

    #[serde(default = "default_health_path")]
    pub health_path: String,

    #[serde(default = "default_chat_path")]
    pub chat_path: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference_timeout_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_timeout_secs: Option<u64>,
}

impl ModelConfig {
    /// Minimal model definition with defaults for everything but name and source
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            image: default_image(),
            port: default_backend_port(),
            command: default_command(),
            launch_args: Vec::new(),
            env: BTreeMap::new(),
            mounts: Vec::new(),
            health_path: default_health_path(),
            chat_path: default_chat_path(),
            inference_timeout_secs: None,
            ready_timeout_secs: None,
        }
    }
}

// Default functions
fn default_api_port() -> u16 {
    8000
}
fn default_image() -> String {
    "nvcr.io/nvidia/vllm:25.11-py3".to_string()
}
fn default_backend_port() -> u16 {
    8001
}
fn default_command() -> Vec<String> {
    ["python", "-m", "vllm.entrypoints.openai.api_server"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_health_path() -> String {
    "/v1/models".to_string()
}
fn default_chat_path() -> String {
    "/v1/chat/completions".to_string()
}
