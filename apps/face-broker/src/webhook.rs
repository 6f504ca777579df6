use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookReply {
    pub status: u16,
    pub ok: bool,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("{0}")]
    Transport(String),
    #[error("timed out after {0} ms")]
    Timeout(u64),
}

/// Outbound POST of a JSON payload. Any HTTP status is a reply; only
/// transport-level failures are errors.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn post(&self, url: &str, payload: &Map<String, Value>)
    -> Result<WebhookReply, WebhookError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestWebhookTransport {
    http: reqwest::Client,
    timeout_ms: Option<u64>,
}

impl ReqwestWebhookTransport {
    pub fn new(timeout_ms: Option<u64>) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout_ms: timeout_ms.filter(|timeout_ms| *timeout_ms > 0),
        }
    }
}

#[async_trait]
impl WebhookTransport for ReqwestWebhookTransport {
    async fn post(
        &self,
        url: &str,
        payload: &Map<String, Value>,
    ) -> Result<WebhookReply, WebhookError> {
        let mut request = self
            .http
            .post(url)
            .header("content-type", "application/json")
            .json(payload);
        if let Some(timeout_ms) = self.timeout_ms {
            request = request.timeout(Duration::from_millis(timeout_ms));
        }

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                WebhookError::Timeout(self.timeout_ms.unwrap_or_default())
            } else {
                WebhookError::Transport(error.to_string())
            }
        })?;
        let status = response.status();
        // An unreadable body still counts as a completed call.
        let body = response.text().await.unwrap_or_default();
        Ok(WebhookReply {
            status: status.as_u16(),
            ok: status.is_success(),
            body,
        })
    }
}
