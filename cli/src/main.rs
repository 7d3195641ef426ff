//! chainwatch CLI — stream block-scoped events from a Flow access node.
//!
//! Usage:
//! ```bash
//! # Print EVM events from the latest sealed block on previewnet
//! chainwatch watch
//!
//! # Start at a fixed height on mainnet and reconnect on failure
//! chainwatch watch --network mainnet --start-height 85000000 --reconnect
//!
//! # Latest sealed height
//! chainwatch latest --network testnet
//!
//! # Built-in defaults
//! chainwatch info
//! ```

mod config;
mod logging;
mod printer;

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use futures::future::select_all;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use chainwatch_core::{
    CancellationToken, EventFilter, EventSource, HandlerRegistry, RetryConfig, SubscriptionConsumer,
    Supervisor, SupervisorOutcome, TracingTelemetry,
};
use chainwatch_flow::{FlowAccessClient, FlowNetwork};

use crate::config::{WatchConfig, DEFAULT_EVENT_TYPES};
use crate::logging::init_tracing;
use crate::printer::Printer;

/// Exit code when the stream ended without cancellation and was not reopened.
const EXIT_DISCONNECTED: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "chainwatch", version)]
#[command(about = "Stream block-scoped events from a Flow access node")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe and print matching events until interrupted
    Watch(WatchArgs),
    /// Print the latest sealed block height
    Latest(SourceArgs),
    /// Print built-in defaults
    Info,
}

#[derive(Args, Debug, Default)]
struct SourceArgs {
    /// TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Public network: mainnet, testnet or previewnet
    #[arg(long)]
    network: Option<FlowNetwork>,
    /// Access node REST base URL (requires --ws-url)
    #[arg(long, requires = "ws_url")]
    rest_url: Option<String>,
    /// Access node WebSocket base URL (requires --rest-url)
    #[arg(long, requires = "rest_url")]
    ws_url: Option<String>,
    /// Log level filter, e.g. "info" or "debug"
    #[arg(long)]
    log_level: Option<String>,
    /// Emit JSON logs
    #[arg(long)]
    json_logs: bool,
}

#[derive(Args, Debug, Default)]
struct WatchArgs {
    #[command(flatten)]
    source: SourceArgs,
    /// First block height (defaults to the latest sealed height)
    #[arg(long)]
    start_height: Option<u64>,
    /// Event type to watch; repeat for several
    #[arg(long = "event-type")]
    event_types: Vec<String>,
    /// Heartbeat interval in blocks
    #[arg(long)]
    heartbeat: Option<u64>,
    /// Reopen the stream after disconnects and source errors
    #[arg(long)]
    reconnect: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Watch(args) => cmd_watch(args).await,
        Command::Latest(args) => cmd_latest(args).await,
        Command::Info => {
            cmd_info();
            Ok(ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Load the config file (if any) and apply source/log flags on top.
fn load_config(args: &SourceArgs) -> anyhow::Result<WatchConfig> {
    let mut config = match &args.config {
        Some(path) => WatchConfig::load(path)?,
        None => WatchConfig::default(),
    };
    if let Some(network) = args.network {
        config.source.network = network;
        config.source.rest_url = None;
        config.source.ws_url = None;
    }
    if let (Some(rest), Some(ws)) = (&args.rest_url, &args.ws_url) {
        config.source.rest_url = Some(rest.clone());
        config.source.ws_url = Some(ws.clone());
    }
    if let Some(level) = &args.log_level {
        config.log.level = level.clone();
    }
    if args.json_logs {
        config.log.json = true;
    }
    Ok(config)
}

fn apply_watch_args(config: &mut WatchConfig, args: &WatchArgs) {
    if args.start_height.is_some() {
        config.subscription.start_height = args.start_height;
    }
    if !args.event_types.is_empty() {
        config.subscription.event_types = args.event_types.clone();
    }
    if let Some(heartbeat) = args.heartbeat {
        config.subscription.heartbeat_interval = heartbeat;
    }
    if args.reconnect {
        config.reconnect.enabled = true;
    }
}

fn client(config: &WatchConfig) -> anyhow::Result<Arc<FlowAccessClient>> {
    let endpoints = config.source.endpoints()?;
    info!(rest = %endpoints.rest(), ws = %endpoints.ws(), "Access node configured");
    Ok(Arc::new(FlowAccessClient::new(
        endpoints,
        config.source.client_config(),
    )?))
}

async fn cmd_watch(args: WatchArgs) -> anyhow::Result<ExitCode> {
    let mut config = load_config(&args.source)?;
    apply_watch_args(&mut config, &args);
    init_tracing(&config.log);

    let client = client(&config)?;
    let start = config
        .subscription
        .start_position()
        .resolve(client.as_ref())
        .await
        .context("could not resolve start height")?;
    let request = config.subscription.request(start)?;

    let registry = printer_registry(request.filter(), std::io::stdout);

    let telemetry = Arc::new(TracingTelemetry::new());
    let consumer = SubscriptionConsumer::new(Arc::new(registry), telemetry.clone());
    let supervisor = Supervisor::new(client, consumer, config.reconnect.supervisor_config());

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone())?;

    let report = supervisor.run(request, &cancel).await;
    let metrics = telemetry.metrics();
    info!(
        sessions = report.sessions,
        last_height = report.cursor.map(|c| c.height),
        batches = metrics.batches,
        events = metrics.events_dispatched,
        reconnects = metrics.reconnects,
        "Subscription finished"
    );

    exit_status(report.outcome).map(ExitCode::from)
}

/// One printer per requested type. An empty filter makes the node stream
/// every type, so a single catch-all printer is registered instead.
fn printer_registry<W, F>(filter: &EventFilter, mut out: F) -> HandlerRegistry
where
    W: Write + Send + 'static,
    F: FnMut() -> W,
{
    let mut registry = HandlerRegistry::new();
    if filter.is_empty() {
        registry.on_any_event(Arc::new(Printer::new("*", out())));
    } else {
        for event_type in filter.event_types() {
            registry.on_event(Arc::new(Printer::new(event_type, out())));
        }
    }
    registry
}

/// Process exit status for a finished watch. The closure or failure itself
/// has already been logged by the telemetry handle.
fn exit_status(outcome: SupervisorOutcome) -> anyhow::Result<u8> {
    match outcome {
        SupervisorOutcome::Cancelled => Ok(0),
        SupervisorOutcome::Disconnected => Ok(EXIT_DISCONNECTED),
        SupervisorOutcome::Failed(e) => bail!("subscription failed: {e}"),
        SupervisorOutcome::InitFailed(e) => bail!("could not subscribe to events: {e}"),
    }
}

async fn cmd_latest(args: SourceArgs) -> anyhow::Result<ExitCode> {
    let config = load_config(&args)?;
    init_tracing(&config.log);

    let height = client(&config)?.latest_height().await?;
    println!("{height}");
    Ok(ExitCode::SUCCESS)
}

fn cmd_info() {
    let retry = RetryConfig::default();
    println!("chainwatch {}", env!("CARGO_PKG_VERSION"));
    println!("Stream block-scoped events from a Flow access node\n");
    println!("NETWORKS:");
    for network in [
        FlowNetwork::Mainnet,
        FlowNetwork::Testnet,
        FlowNetwork::Previewnet,
    ] {
        match network.endpoints() {
            Ok(ep) => println!("    {:<12} {}", network, ep.rest()),
            Err(e) => println!("    {:<12} ({e})", network),
        }
    }
    println!("\nDEFAULTS:");
    println!("    network          {}", FlowNetwork::default());
    println!("    event types      {}", DEFAULT_EVENT_TYPES.join(", "));
    println!(
        "    heartbeat        {} blocks",
        chainwatch_core::request::DEFAULT_HEARTBEAT_INTERVAL
    );
    println!("    start height     latest sealed");
    println!("    reconnect        off");
    println!(
        "    retry            max {} attempts, {:?} .. {:?}",
        retry
            .max_retries
            .map_or_else(|| "unlimited".to_string(), |n| n.to_string()),
        retry.initial_backoff,
        retry.max_backoff
    );
}

/// Cancel `cancel` on SIGINT or SIGTERM.
fn spawn_shutdown_listener(cancel: CancellationToken) -> anyhow::Result<()> {
    let mut signals: Vec<_> = [SignalKind::interrupt(), SignalKind::terminate()]
        .into_iter()
        .filter_map(|kind| signal(kind).ok())
        .collect();

    if signals.is_empty() {
        bail!("No shutdown signals could be registered");
    }

    tokio::spawn(async move {
        let _ = select_all(signals.iter_mut().map(|s| Box::pin(s.recv()))).await;
        warn!("Received shutdown signal, stopping");
        cancel.cancel();
    });
    Ok(())
}
