#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;

use crate::{
    broker::RequestBroker,
    config::Config,
    env_resolver::{ConfigurationMap, DirectoryFetcher, DocumentFetcher, EnvResolver, HttpFetcher},
    fanout::FanoutHub,
    server::{AppState, build_router},
    webhook::ReqwestWebhookTransport,
};

pub mod broker;
pub mod config;
pub mod env_resolver;
pub mod fanout;
pub mod registry;
pub mod server;
pub mod webhook;

pub fn build_broker(config: &Config) -> RequestBroker {
    let fetcher: Arc<dyn DocumentFetcher> = match config.env_base_url.as_deref() {
        Some(base_url) => Arc::new(HttpFetcher::new(base_url)),
        None => Arc::new(DirectoryFetcher::new(config.env_dir.clone())),
    };
    let inline: ConfigurationMap = config.inline_env.iter().cloned().collect();
    let env = Arc::new(EnvResolver::new(inline, fetcher));
    let fanout = Arc::new(FanoutHub::new(config.fanout_capacity));
    let webhook = Arc::new(ReqwestWebhookTransport::new(config.webhook_timeout_ms));
    RequestBroker::new(env, fanout, webhook)
}

pub fn build_state(config: Config) -> AppState {
    let broker = Arc::new(build_broker(&config));
    AppState::new(config, broker)
}

pub fn build_app(config: Config) -> axum::Router {
    build_router(build_state(config))
}

pub async fn serve(config: Config) -> Result<()> {
    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(
        service = %config.service_name,
        bind_addr = %config.bind_addr,
        "face broker listening"
    );
    let state = build_state(config);
    // No tab can be attached before `axum::serve` starts accepting, so at
    // startup the alert this publishes reaches nobody and the warning log is
    // what an operator sees.
    state.broker().activate().await;
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
