//! boardsync — watch a boards server's live update channel
//!
//! Connects to a server in standalone mode, authenticates, subscribes to a
//! workspace (and optionally individual blocks), and prints every coalesced
//! batch of block and category updates as JSON lines on stdout. Subscriptions
//! are renewed after each reconnect.
//!
//! Usage:
//!   boardsync --server https://boards.example.com --workspace w1
//!   boardsync --server http://localhost:8000 --workspace w1 --token abc --block b1 --block b2
//!   boardsync --server http://localhost:8000 --workspace w1 --verbose --log-file

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use boardsync_client::{ChangeKind, ClientConfig, Entity, LifecycleState, LiveClient, TransportError};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "boardsync", about = "Boardsync — live board update watcher")]
struct Cli {
    /// Server base address (http, https, ws or wss)
    #[arg(long)]
    server: String,

    /// Workspace to subscribe to
    #[arg(long)]
    workspace: String,

    /// Session token sent with AUTH (skipped when empty)
    #[arg(long, default_value = "")]
    token: String,

    /// Block to subscribe to individually (repeatable)
    #[arg(long = "block")]
    blocks: Vec<String>,

    /// Read token for shared-board block subscriptions
    #[arg(long, default_value = "")]
    read_token: String,

    /// Delay before reopening a dropped socket
    #[arg(long, default_value = "3000")]
    reconnect_delay_ms: u64,

    /// Quiet window before buffered updates are printed
    #[arg(long, default_value = "100")]
    notification_delay_ms: u64,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Write logs to a file (defaults to ~/.boardsync/logs/boardsync.log if no path given)
    #[arg(long, default_missing_value = "DEFAULT", num_args = 0..=1)]
    log_file: Option<String>,
}

fn init_tracing(cli: &Cli) -> Result<()> {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let Some(log_file_arg) = &cli.log_file else {
        // Batches go to stdout; keep logs off it.
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(());
    };

    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    let log_path = if log_file_arg == "DEFAULT" {
        PathBuf::from(&home).join(".boardsync/logs/boardsync.log")
    } else {
        PathBuf::from(log_file_arg)
    };

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();

    eprintln!("Logging to {}", log_path.display());
    Ok(())
}

/// (Re)issue authentication and subscriptions on the current connection.
fn subscribe(client: &LiveClient, cli: &Cli) {
    client.authenticate(&cli.workspace, &cli.token);
    client.subscribe_to_workspace(&cli.workspace);
    if !cli.blocks.is_empty() {
        client.subscribe_to_entities(&cli.workspace, &cli.blocks, &cli.read_token);
    }
}

fn print_batch(kind: ChangeKind, entities: &[Entity]) {
    for entity in entities {
        match serde_json::to_string(entity) {
            Ok(line) => println!("{{\"kind\":\"{kind}\",\"entity\":{line}}}"),
            Err(e) => warn!("Unprintable {kind} {}: {e}", entity.id),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Arc::new(Cli::parse());
    init_tracing(&cli)?;

    let config = ClientConfig {
        reconnect_delay: Duration::from_millis(cli.reconnect_delay_ms),
        notification_delay: Duration::from_millis(cli.notification_delay_ms),
        ..ClientConfig::with_server_url(cli.server.clone())
    };
    let client = LiveClient::new(config)?;

    let on_open = cli.clone();
    client.add_on_state_change(Arc::new(move |client: &LiveClient, state: LifecycleState| {
        info!("Connection {state}");
        if state == LifecycleState::Open {
            subscribe(client, &on_open);
        }
    }));

    client.add_on_reconnect(Arc::new(|_: &LiveClient| {
        info!("Reconnected; subscriptions will be renewed on open");
    }));

    client.add_on_error(Arc::new(|_: &LiveClient, e: &TransportError| {
        warn!("Transport error: {e}");
    }));

    for kind in ChangeKind::ALL {
        client.add_on_change(
            Arc::new(move |_: &LiveClient, entities: &[Entity]| print_batch(kind, entities)),
            kind,
        );
    }

    client
        .open()
        .with_context(|| format!("Failed to open live channel to {}", cli.server))?;

    info!("Watching workspace {} on {}", cli.workspace, cli.server);
    eprintln!("Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    client.close();

    Ok(())
}
