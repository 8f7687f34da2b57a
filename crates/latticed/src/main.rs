//! Lattice Replica Daemon (latticed)
//!
//! Runs one CRDT replica over UDP and an interactive console to drive it.
//!
//! # Usage
//!
//! ```bash
//! # Counter replica, rendezvous on 127.0.0.1:1234
//! latticed
//!
//! # State-based OR-Set on a fixed port
//! latticed --kind state-set --port 4000
//!
//! # Op-based OR-Set that loses 20% of what it sends and retransmits its log
//! latticed --kind op-set --drop-rate 0.2 --retransmit
//!
//! # With configuration file, no console
//! latticed --config /etc/lattice/replica.toml --headless
//! ```

mod config;
mod console;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lattice_core::CrdtKind;
use lattice_transport::{Channel, LossyChannel, Replica, UdpChannel};

use config::{FileConfig, Settings};

/// Lattice Replica Daemon - CRDT replica over UDP
#[derive(Parser, Debug)]
#[command(name = "latticed")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Replicated data type (counter, state-set, op-set)
    #[arg(short, long, env = "LATTICE_KIND")]
    kind: Option<CrdtKind>,

    /// Bind address
    #[arg(long, env = "LATTICE_BIND")]
    bind: Option<String>,

    /// UDP port to listen on (0 = any)
    #[arg(short, long, env = "LATTICE_PORT")]
    port: Option<u16>,

    /// Rendezvous service address
    #[arg(short, long, env = "LATTICE_RENDEZVOUS")]
    rendezvous: Option<String>,

    /// Broadcast period in milliseconds
    #[arg(long, env = "LATTICE_SYNC_INTERVAL_MS")]
    sync_interval_ms: Option<u64>,

    /// Re-send the operation log on every broadcast (op-set only)
    #[arg(long, env = "LATTICE_RETRANSMIT")]
    retransmit: bool,

    /// Probability that an outbound datagram is dropped
    #[arg(long, env = "LATTICE_DROP_RATE")]
    drop_rate: Option<f64>,

    /// Seed for the drop generator
    #[arg(long, env = "LATTICE_DROP_SEED")]
    drop_seed: Option<u64>,

    /// Largest datagram sent or accepted
    #[arg(long, env = "LATTICE_MAX_DATAGRAM")]
    max_datagram: Option<usize>,

    /// Configuration file path
    #[arg(short, long, env = "LATTICE_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter (trace, debug, info, warn, error, or a RUST_LOG directive)
    #[arg(long, env = "LATTICE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Run without the interactive console
    #[arg(long)]
    headless: bool,
}

impl Args {
    fn overrides(&self) -> FileConfig {
        FileConfig {
            kind: self.kind,
            bind: self.bind.clone(),
            port: self.port,
            rendezvous: self.rendezvous.clone(),
            sync_interval_ms: self.sync_interval_ms,
            retransmit: self.retransmit.then_some(true),
            drop_rate: self.drop_rate,
            drop_seed: self.drop_seed,
            max_datagram: self.max_datagram,
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let settings = Settings::resolve(file.overlay(args.overrides()))?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    if !args.headless {
        print_banner(&settings);
    }

    let rendezvous = resolve(&settings.rendezvous).await?;
    let udp = UdpChannel::bind((settings.bind.as_str(), settings.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", settings.bind, settings.port))?;

    let channel: Arc<dyn Channel> = if settings.drop_rate > 0.0 {
        let seed = settings.drop_seed.unwrap_or_else(rand::random);
        info!(rate = settings.drop_rate, seed, "Dropping outbound datagrams");
        Arc::new(LossyChannel::with_drop_rate(udp, settings.drop_rate, seed))
    } else {
        Arc::new(udp)
    };

    let local = channel.local_addr()?;
    let replica = Arc::new(Replica::new(settings.replica_config(rendezvous), channel));

    info!(
        kind = %settings.kind,
        local = %local,
        rendezvous = %rendezvous,
        interval_ms = settings.sync_interval.as_millis() as u64,
        retransmit = settings.retransmit,
        "Starting replica"
    );

    let (intents_tx, intents_rx) = mpsc::channel(64);
    if !args.headless {
        tokio::spawn(console::render_events(replica.subscribe()));
        console::spawn(replica.clone(), intents_tx)?;
    }

    let mut running = tokio::spawn(replica.clone().run(intents_rx));

    // Wait for shutdown signal or for the console to quit
    tokio::select! {
        result = &mut running => {
            result??;
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutting down...");
            replica.shutdown();
        }
    }

    running.await??;
    Ok(())
}

async fn resolve(addr: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(addr)
        .await
        .with_context(|| format!("Invalid rendezvous address {}", addr))?
        .next()
        .with_context(|| format!("Rendezvous address {} did not resolve", addr))
}

fn print_banner(settings: &Settings) {
    println!(
        r#"
  ╦  ╔═╗╔╦╗╔╦╗╦╔═╗╔═╗
  ║  ╠═╣ ║  ║ ║║  ║╣
  ╩═╝╩ ╩ ╩  ╩ ╩╚═╝╚═╝
  CRDT replica ({})
  Version {}
  Type 'help' for commands, 'quit' to exit
"#,
        settings.kind,
        env!("CARGO_PKG_VERSION")
    );
}
