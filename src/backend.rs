//! Inference calls against the active backend's OpenAI-compatible surface

use crate::config::ModelConfig;
use crate::error::BackendError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// POST `payload` to the model's chat endpoint and return the JSON body verbatim
    async fn chat(
        &self,
        model: &ModelConfig,
        payload: &Value,
        timeout: Duration,
    ) -> Result<Value, BackendError>;
}

pub struct HttpBackend {
    client: reqwest::Client,
    host: String,
}

impl HttpBackend {
    pub fn new(host: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self {
            client,
            host: host.into(),
        })
    }
}

#[async_trait]
impl InferenceBackend for HttpBackend {
    async fn chat(
        &self,
        model: &ModelConfig,
        payload: &Value,
        timeout: Duration,
    ) -> Result<Value, BackendError> {
        let url = format!("http://{}:{}{}", self.host, model.port, model.chat_path);

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                model = %model.name,
                status = status.as_u16(),
                "Backend returned error status"
            );
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| BackendError::Transport(format!("Invalid backend response: {e}")))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_backend_is_transport_error() {
        let backend = HttpBackend::new("127.0.0.1").unwrap();
        let mut model = ModelConfig::new("qwen", "/mnt/models/qwen");
        model.port = 1;

        let err = backend
            .chat(&model, &serde_json::json!({}), Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Transport(_)));
    }
}
