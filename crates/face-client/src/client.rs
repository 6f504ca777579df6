use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use face_protocol::{
    CallEnvelope, EVENTS_PATH, FaceName, MCP_PATH, Mood, ResponseEnvelope, methods,
};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_BROKER_URL: &str = "http://127.0.0.1:4173";
const NON_JSON_SAMPLE_CHARS: usize = 120;

#[derive(Debug, Clone)]
pub struct BrokerClientConfig {
    pub base_url: String,
    /// Unset means the call waits as long as the broker does.
    pub timeout_ms: Option<u64>,
}

impl BrokerClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: None,
        }
    }
}

impl Default for BrokerClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BROKER_URL)
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("broker_client_base_url_missing")]
    BaseUrlMissing,
    #[error("broker_client_invalid_base_url:{0}")]
    InvalidBaseUrl(String),
    #[error("broker_request_failed:{message}")]
    Request { message: String },
    #[error("broker_read_failed:{message}")]
    Read { message: String },
    #[error("Non-JSON MCP response (ct={content_type}): {sample}")]
    NonJson {
        content_type: String,
        sample: String,
    },
    #[error("broker_json_decode_failed:{message}")]
    Decode { message: String },
}

/// Tab-side call wrapper for `POST /mcp`.
///
/// Every call gets the next id from a per-client counter. Calls are never
/// retried here; the caller decides.
#[derive(Debug, Clone)]
pub struct BrokerClient {
    base_url: String,
    timeout: Option<Duration>,
    next_id: Arc<AtomicU64>,
    http: reqwest::Client,
}

impl BrokerClient {
    pub fn new(config: BrokerClientConfig) -> Result<Self, ClientError> {
        let base_url = normalize_base_url(&config.base_url)?;
        Ok(Self {
            base_url,
            timeout: config.timeout_ms.map(Duration::from_millis),
            next_id: Arc::new(AtomicU64::new(0)),
            http: reqwest::Client::new(),
        })
    }

    pub fn from_base_url(base_url: &str) -> Result<Self, ClientError> {
        Self::new(BrokerClientConfig::new(base_url))
    }

    #[must_use]
    pub fn mcp_url(&self) -> String {
        format!("{}{MCP_PATH}", self.base_url)
    }

    /// WebSocket URL a tab attaches to for broadcast notifications.
    pub fn events_url(&self) -> Result<String, ClientError> {
        let rest = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(ClientError::InvalidBaseUrl(self.base_url.clone()));
        };
        Ok(format!("{rest}{EVENTS_PATH}"))
    }

    /// Id the next call will carry.
    #[must_use]
    pub fn peek_next_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst).saturating_add(1)
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<ResponseEnvelope, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        let envelope = CallEnvelope::new(id, method, params);
        debug!(id, method, "sending broker call");

        let mut request = self
            .http
            .post(self.mcp_url())
            .header("content-type", "application/json")
            .header("x-request-id", format!("req_{}", Uuid::new_v4().simple()))
            .json(&envelope);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|error| ClientError::Request {
                message: error.to_string(),
            })?;
        decode_envelope(response).await
    }

    pub async fn set_mood(&self, mood: Mood) -> Result<ResponseEnvelope, ClientError> {
        self.call(methods::EYES_SET_MOOD, json!({ "mood": mood }))
            .await
    }

    pub async fn set_face(&self, name: FaceName) -> Result<ResponseEnvelope, ClientError> {
        self.call(methods::FACE_SET, json!({ "name": name })).await
    }

    pub async fn set_panels(&self, visible: bool) -> Result<ResponseEnvelope, ClientError> {
        self.call(methods::UI_PANELS_SET, json!({ "visible": visible }))
            .await
    }

    pub async fn toggle_panels(&self) -> Result<ResponseEnvelope, ClientError> {
        self.call(methods::UI_PANELS_TOGGLE, json!({})).await
    }

    pub async fn disconnect_voice(&self) -> Result<ResponseEnvelope, ClientError> {
        self.call(methods::VOICE_DISCONNECT, json!({})).await
    }

    pub async fn post_webhook(
        &self,
        payload: Map<String, Value>,
        url: Option<&str>,
    ) -> Result<ResponseEnvelope, ClientError> {
        let mut params = Map::new();
        params.insert("payload".to_string(), Value::Object(payload));
        if let Some(url) = url {
            params.insert("url".to_string(), Value::String(url.to_string()));
        }
        self.call(methods::WEBHOOK_POST, Value::Object(params))
            .await
    }

    pub async fn env(&self) -> Result<ResponseEnvelope, ClientError> {
        self.call(methods::ENV_GET, json!({})).await
    }

    pub async fn list_tools(&self) -> Result<ResponseEnvelope, ClientError> {
        self.call(methods::TOOLS_LIST, json!({})).await
    }
}

fn normalize_base_url(base_url: &str) -> Result<String, ClientError> {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return Err(ClientError::BaseUrlMissing);
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

async fn decode_envelope(response: reqwest::Response) -> Result<ResponseEnvelope, ClientError> {
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let bytes = response
        .bytes()
        .await
        .map_err(|error| ClientError::Read {
            message: error.to_string(),
        })?;

    // Parse failures come back as 400 with a JSON envelope, so the status is
    // not checked; only the content type is.
    if !content_type.contains("application/json") {
        return Err(ClientError::NonJson {
            content_type: if content_type.is_empty() {
                "unknown".to_string()
            } else {
                content_type
            },
            sample: non_json_sample(&String::from_utf8_lossy(&bytes)),
        });
    }

    serde_json::from_slice::<ResponseEnvelope>(&bytes).map_err(|error| ClientError::Decode {
        message: error.to_string(),
    })
}

fn non_json_sample(body: &str) -> String {
    let sample: String = body.chars().take(NON_JSON_SAMPLE_CHARS).collect();
    sample.split_whitespace().collect::<Vec<_>>().join(" ")
}
