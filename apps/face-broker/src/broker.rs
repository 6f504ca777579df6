//! Request broker: parse, validate, dispatch, broadcast, respond.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use face_protocol::{
    CallResult, RequestId, ResponseEnvelope, RpcError, TabEvent, WebhookOutcome,
};
use futures::FutureExt;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::env_resolver::{EnvResolver, WEBHOOK_URL_KEY};
use crate::fanout::FanoutHub;
use crate::registry::{self, Command};
use crate::webhook::WebhookTransport;

pub const WEBHOOK_URL_MISSING_ALERT: &str =
    "Webhook URL is not configured. Provide params.url or set WEBHOOK_URL in env.js.";
pub const WEBHOOK_URL_MISSING_MESSAGE: &str =
    "Missing webhook URL: provide params.url or set WEBHOOK_URL in env.js";
pub const WEBHOOK_BODY_LIMIT_CHARS: usize = 2048;

#[derive(Debug, Clone, PartialEq)]
pub struct BrokerReply {
    pub envelope: ResponseEnvelope,
    /// The body was not a usable envelope; the HTTP layer answers 400.
    pub parse_failure: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    pub calls: u64,
    pub errors: u64,
    pub webhook_posts: u64,
}

pub struct RequestBroker {
    env: Arc<EnvResolver>,
    fanout: Arc<FanoutHub>,
    webhook: Arc<dyn WebhookTransport>,
    calls: AtomicU64,
    errors: AtomicU64,
    webhook_posts: AtomicU64,
}

impl RequestBroker {
    pub fn new(
        env: Arc<EnvResolver>,
        fanout: Arc<FanoutHub>,
        webhook: Arc<dyn WebhookTransport>,
    ) -> Self {
        Self {
            env,
            fanout,
            webhook,
            calls: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            webhook_posts: AtomicU64::new(0),
        }
    }

    pub fn fanout(&self) -> &Arc<FanoutHub> {
        &self.fanout
    }

    pub fn env(&self) -> &Arc<EnvResolver> {
        &self.env
    }

    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            calls: self.calls.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            webhook_posts: self.webhook_posts.load(Ordering::Relaxed),
        }
    }

    /// Startup check: resolves `WEBHOOK_URL` once and alerts every tab when
    /// it is missing. Returns whether a URL is configured.
    pub async fn activate(&self) -> bool {
        if self.configured_webhook_url().await.is_some() {
            info!("WEBHOOK_URL found at activation");
            return true;
        }
        warn!("WEBHOOK_URL missing at activation");
        self.fanout.publish(TabEvent::Alert {
            text: WEBHOOK_URL_MISSING_ALERT.to_string(),
        });
        false
    }

    /// Handles one raw `POST /mcp` body. Always produces an envelope.
    pub async fn handle_body(&self, body: &[u8]) -> BrokerReply {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let request = match serde_json::from_slice::<Value>(body) {
            Ok(value) => value,
            Err(error) => return self.parse_failure(None, format!("Parse error: {error}")),
        };
        let Value::Object(mut request) = request else {
            return self.parse_failure(None, "Parse error: request must be a JSON object".into());
        };
        let id = request
            .get("id")
            .cloned()
            .and_then(|id| serde_json::from_value::<RequestId>(id).ok());
        let Some(method) = request
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return self.parse_failure(id, "Parse error: method must be a string".into());
        };
        let params = request.remove("params").unwrap_or(Value::Null);

        let outcome = AssertUnwindSafe(self.dispatch(&method, &params))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let detail = panic_message(panic.as_ref());
                error!(method = %method, detail = %detail, "handler panicked");
                Err(RpcError::internal(format!("Internal error: {detail}")))
            });

        let envelope = match outcome {
            Ok(result) => {
                info!(method = %method, "call succeeded");
                ResponseEnvelope::success(id, result)
            }
            Err(rpc_error) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    method = %method,
                    code = rpc_error.code,
                    message = %rpc_error.message,
                    "call failed"
                );
                ResponseEnvelope::failure(id, rpc_error)
            }
        };
        BrokerReply {
            envelope,
            parse_failure: false,
        }
    }

    fn parse_failure(&self, id: Option<RequestId>, message: String) -> BrokerReply {
        self.errors.fetch_add(1, Ordering::Relaxed);
        warn!(message = %message, "rejecting unparseable call");
        BrokerReply {
            envelope: ResponseEnvelope::failure(id, RpcError::parse(message)),
            parse_failure: true,
        }
    }

    async fn dispatch(&self, method: &str, params: &Value) -> Result<CallResult, RpcError> {
        let command = registry::resolve(method, params)?;
        debug!(method = command.method(), "dispatching command");
        let result = match command {
            Command::SetMood(mood) => {
                self.fanout.publish(TabEvent::MoodSet { mood });
                CallResult::text(format!("Mood set to: {mood}"))
            }
            Command::SetFace(name) => {
                self.fanout.publish(TabEvent::FaceSet { name });
                CallResult::text(format!("Face set to: {name}"))
            }
            Command::SetPanels { visible } => {
                self.fanout.publish(TabEvent::PanelsSet { visible });
                CallResult::text(format!("Panels visible: {visible}"))
            }
            Command::TogglePanels => {
                self.fanout.publish(TabEvent::PanelsToggle);
                CallResult::text("Panels toggled")
            }
            Command::DisconnectVoice => {
                self.fanout.publish(TabEvent::VoiceDisconnect);
                CallResult::text("Voice disconnect broadcast")
            }
            Command::PostWebhook { payload, url } => self.post_webhook(payload, url).await?,
            Command::GetEnv => {
                CallResult::default().with_field("env", Value::Object(self.env.exposed().await))
            }
            Command::ListTools => {
                CallResult::default().with_field("tools", registry::tool_descriptors())
            }
        };
        Ok(result)
    }

    async fn configured_webhook_url(&self) -> Option<String> {
        self.env
            .get(WEBHOOK_URL_KEY)
            .await
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
    }

    /// Explicit url, else the configured one (reloading the configuration
    /// once if it is missing), else an alert and `-32602`.
    async fn resolve_webhook_url(&self, explicit: Option<String>) -> Result<String, RpcError> {
        if let Some(url) = explicit {
            return Ok(url);
        }
        if let Some(url) = self.configured_webhook_url().await {
            return Ok(url);
        }
        self.env.invalidate();
        if let Some(url) = self.configured_webhook_url().await {
            info!("WEBHOOK_URL found after configuration reload");
            return Ok(url);
        }
        self.fanout.publish(TabEvent::Alert {
            text: WEBHOOK_URL_MISSING_ALERT.to_string(),
        });
        Err(RpcError::invalid_params(WEBHOOK_URL_MISSING_MESSAGE))
    }

    async fn post_webhook(
        &self,
        payload: Map<String, Value>,
        explicit_url: Option<String>,
    ) -> Result<CallResult, RpcError> {
        let url = self.resolve_webhook_url(explicit_url).await?;
        self.fanout.publish(TabEvent::WebhookAttempt {
            url: url.clone(),
            payload_keys: payload.len(),
        });
        self.webhook_posts.fetch_add(1, Ordering::Relaxed);

        match self.webhook.post(&url, &payload).await {
            Ok(reply) => {
                info!(url = %url, status = reply.status, ok = reply.ok, "webhook posted");
                self.fanout.publish(TabEvent::WebhookResult {
                    url: url.clone(),
                    outcome: WebhookOutcome::Completed {
                        status: reply.status,
                        ok: reply.ok,
                    },
                });
                Ok(
                    CallResult::text(format!("Webhook POST status: {}", reply.status))
                        .with_field("used_url", url)
                        .with_field("status", reply.status)
                        .with_field("body", truncate_chars(&reply.body, WEBHOOK_BODY_LIMIT_CHARS)),
                )
            }
            Err(post_error) => {
                warn!(url = %url, error = %post_error, "webhook post failed");
                self.fanout.publish(TabEvent::WebhookResult {
                    url,
                    outcome: WebhookOutcome::Failed {
                        error: post_error.to_string(),
                    },
                });
                Err(RpcError::operation_failed(format!(
                    "Failed to POST webhook: {post_error}"
                )))
            }
        }
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
