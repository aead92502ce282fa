//! Readiness probing of the backend's health surface

use crate::config::ModelConfig;
use async_trait::async_trait;
use std::time::Duration;

/// A single readiness check against a model's backend
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// `Ok` once the backend answers its health endpoint with 200
    async fn probe(&self, model: &ModelConfig) -> anyhow::Result<()>;
}

/// HTTP prober hitting `http://{host}:{port}{health_path}`
pub struct HttpProbe {
    client: reqwest::Client,
    host: String,
}

impl HttpProbe {
    pub fn new(host: impl Into<String>, request_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            host: host.into(),
        })
    }
}

#[async_trait]
impl ReadinessProbe for HttpProbe {
    async fn probe(&self, model: &ModelConfig) -> anyhow::Result<()> {
        let url = format!("http://{}:{}{}", self.host, model.port, model.health_path);
        let response = self.client.get(&url).send().await?;

        if response.status() != reqwest::StatusCode::OK {
            anyhow::bail!("Health check returned status: {}", response.status());
        }

        Ok(())
    }
}
