use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use face_broker::config::{Config, parse_inline_entry};
use face_client::{BrokerClient, DEFAULT_BROKER_URL, TabEffect, TabSession};
use serde_json::Value;

#[derive(Parser, Debug)]
#[command(name = "face-broker", about = "Remote-control broker for face tabs")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the broker service.
    Serve(ServeArgs),
    /// Send one call to a running broker and print the response envelope.
    Call(CallArgs),
    /// Attach as a tab and print every notification with the reduced state.
    Watch(WatchArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long)]
    bind: Option<SocketAddr>,
    #[arg(long)]
    env_dir: Option<PathBuf>,
    #[arg(long)]
    env_base_url: Option<String>,
    /// In-process configuration entry, `KEY=VALUE`. Repeatable.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,
    #[arg(long)]
    fanout_capacity: Option<usize>,
    #[arg(long)]
    webhook_timeout_ms: Option<u64>,
}

#[derive(Args, Debug)]
struct CallArgs {
    method: String,
    /// JSON params object.
    #[arg(long, default_value = "{}")]
    params: String,
    #[arg(long, default_value = DEFAULT_BROKER_URL)]
    broker: String,
}

#[derive(Args, Debug)]
struct WatchArgs {
    #[arg(long, default_value = DEFAULT_BROKER_URL)]
    broker: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Call(args) => call(args).await,
        Command::Watch(args) => watch(args).await,
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let mut config = Config::from_env()?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(env_dir) = args.env_dir {
        config.env_dir = env_dir;
    }
    if let Some(env_base_url) = args.env_base_url {
        config.env_base_url = Some(env_base_url);
    }
    if let Some(capacity) = args.fanout_capacity {
        config.fanout_capacity = capacity.max(1);
    }
    if let Some(timeout_ms) = args.webhook_timeout_ms {
        config.webhook_timeout_ms = (timeout_ms > 0).then_some(timeout_ms);
    }
    config.inline_env = args
        .set
        .iter()
        .map(|entry| parse_inline_entry(entry))
        .collect::<Result<_, _>>()?;
    face_broker::serve(config).await
}

async fn call(args: CallArgs) -> Result<()> {
    let params: Value = serde_json::from_str(&args.params).context("--params must be JSON")?;
    let client = BrokerClient::from_base_url(&args.broker)?;
    let envelope = client.call(&args.method, params).await?;
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(())
}

async fn watch(args: WatchArgs) -> Result<()> {
    let client = BrokerClient::from_base_url(&args.broker)?;
    let mut session = TabSession::connect(&client.events_url()?).await?;
    while let Some(applied) = session.next_notification().await? {
        println!("{}", serde_json::to_string(&applied.notification)?);
        for effect in &applied.effects {
            match effect {
                TabEffect::Log(line) => println!("  {line}"),
                TabEffect::ShowAlert(text) => println!("  alert: {text}"),
                TabEffect::TeardownVoiceSession => println!("  voice session torn down"),
            }
        }
        println!("  state: {:?}", session.state());
    }
    Ok(())
}
