use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use face_protocol::{
    BroadcastNotification, EVENTS_PATH, MCP_PATH, ResponseEnvelope, RpcError,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, warn};

use crate::{
    broker::{BrokerStats, RequestBroker},
    config::Config,
    fanout::FanoutMetrics,
};

#[derive(Clone)]
pub struct AppState {
    config: Config,
    broker: Arc<RequestBroker>,
    started_at: chrono::DateTime<Utc>,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config, broker: Arc<RequestBroker>) -> Self {
        Self {
            config,
            broker,
            started_at: Utc::now(),
        }
    }

    pub fn broker(&self) -> &Arc<RequestBroker> {
        &self.broker
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: String,
    uptime_seconds: i64,
    tabs: usize,
    config_source: Option<&'static str>,
    broker: BrokerStats,
}

fn cors_headers() -> [(header::HeaderName, &'static str); 3] {
    [
        (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        (header::ACCESS_CONTROL_ALLOW_METHODS, "POST, OPTIONS"),
        (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
    ]
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route(MCP_PATH, post(mcp_call).options(mcp_preflight))
        .route(EVENTS_PATH, get(tab_events_ws))
        .route("/internal/v1/fanout/metrics", get(fanout_metrics))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = (Utc::now() - state.started_at).num_seconds();
    Json(HealthResponse {
        status: "ok",
        service: state.config.service_name.clone(),
        uptime_seconds,
        tabs: state.broker.fanout().tab_count(),
        config_source: state
            .broker
            .env()
            .loaded_source()
            .map(|source| source.as_str()),
        broker: state.broker.stats(),
    })
}

async fn fanout_metrics(State(state): State<AppState>) -> Json<FanoutMetrics> {
    Json(state.broker.fanout().metrics())
}

async fn mcp_preflight() -> impl IntoResponse {
    (StatusCode::OK, cors_headers())
}

async fn mcp_call(State(state): State<AppState>, body: Bytes) -> Response {
    // Dispatch runs to completion even if the caller goes away, so the
    // broadcasts of a started call are never cut short.
    let broker = state.broker.clone();
    let reply = tokio::spawn(async move { broker.handle_body(&body).await }).await;
    let (status, envelope) = match reply {
        Ok(reply) if reply.parse_failure => (StatusCode::BAD_REQUEST, reply.envelope),
        Ok(reply) => (StatusCode::OK, reply.envelope),
        Err(join_error) => {
            error!(error = %join_error, "broker task failed");
            (
                StatusCode::OK,
                ResponseEnvelope::failure(
                    None,
                    RpcError::internal(format!("Internal error: {join_error}")),
                ),
            )
        }
    };
    (status, cors_headers(), Json(envelope)).into_response()
}

async fn tab_events_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    // Subscribe before the upgrade completes so a freshly attached tab sees
    // every notification published after its handshake.
    let receiver = state.broker.fanout().subscribe();
    ws.on_upgrade(move |socket| tab_event_stream(socket, receiver))
}

async fn tab_event_stream(
    socket: WebSocket,
    mut receiver: broadcast::Receiver<BroadcastNotification>,
) {
    let (mut sender, mut inbound) = socket.split();
    debug!("tab attached");
    loop {
        tokio::select! {
            notification = receiver.recv() => {
                let notification = match notification {
                    Ok(notification) => notification,
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "tab fell behind; notifications dropped");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let payload = match serde_json::to_string(&notification) {
                    Ok(payload) => payload,
                    Err(encode_error) => {
                        warn!(error = %encode_error, "failed to encode notification");
                        continue;
                    }
                };
                if sender.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            incoming = inbound.next() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    if let Err(close_error) = sender.close().await {
        debug!(error = %close_error, "tab socket already closed");
    }
    debug!("tab detached");
}
