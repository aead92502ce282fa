//! API request and response models

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the job store cannot be read
    pub status: String,
    pub store_ok: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// OpenAI-style chat request body, as queued for a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub stream: bool,

    /// Any other sampling parameters, forwarded untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatRequest {
    /// Body forwarded to the backend
    pub fn to_payload(&self) -> Value {
        let mut payload = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut payload {
            map.remove("async");
        }
        payload
    }
}

/// `POST /v1/chat/completions`; `async` picks queueing over direct proxying
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(flatten)]
    pub chat: ChatRequest,

    #[serde(rename = "async", default = "default_async")]
    pub async_mode: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelCard {
    pub id: String,
    pub object: String,
    pub owned_by: String,
}

impl ModelCard {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            object: "model".to_string(),
            owned_by: "llm-switchboard".to_string(),
        }
    }
}

/// `GET /v1/models`
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub object: String,
    pub data: Vec<ModelCard>,
    pub active_model: Option<String>,
    pub backend_ready: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SwitchRequest {
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DrainRequest {
    #[serde(default = "default_drain")]
    pub enabled: bool,
}

impl Default for DrainRequest {
    fn default() -> Self {
        Self {
            enabled: default_drain(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DrainResponse {
    pub drain_mode: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopResponse {
    pub stopped: bool,
    pub active_model: Option<String>,
}

fn default_temperature() -> f64 {
    0.7
}
fn default_max_tokens() -> u32 {
    512
}
fn default_async() -> bool {
    true
}
fn default_drain() -> bool {
    true
}
