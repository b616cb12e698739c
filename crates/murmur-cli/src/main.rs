//! murmur - run a gossip membership node from the command line

use anyhow::{Context, Result};
use clap::Parser;
use murmur_core::{GossipConfig, NodeId};
use murmur_net::{CodecKind, GossipNode, SeedAddr, TransportKind};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Run a gossip membership node
#[derive(Debug, Parser)]
#[command(name = "murmur")]
#[command(about = "Run a gossip membership node")]
#[command(version)]
struct Cli {
    /// Bind address for the gossip transport
    #[arg(short, long, default_value = "127.0.0.1:7946")]
    bind: SocketAddr,

    /// Seed node to contact on startup, as id@host:port
    #[arg(short, long)]
    seed: Option<SeedAddr>,

    /// Node id (random when omitted)
    #[arg(long)]
    id: Option<NodeId>,

    /// Transport to use (udp, tcp)
    #[arg(long, default_value_t = TransportKind::Udp)]
    transport: TransportKind,

    /// Wire codec to use (json, bincode)
    #[arg(long, default_value_t = CodecKind::Json)]
    codec: CodecKind,

    /// Milliseconds between gossip ticks
    #[arg(long, default_value_t = 100)]
    tick_interval_ms: u64,

    /// Milliseconds of silence before a peer becomes suspect
    #[arg(long, default_value_t = 2000)]
    failure_timeout_ms: u64,

    /// Role tag attached to the local view
    #[arg(long)]
    role: Option<String>,

    /// Region tag attached to the local view
    #[arg(long)]
    region: Option<String>,

    /// Seconds between stats lines (0 disables them)
    #[arg(long, default_value_t = 10)]
    stats_interval_secs: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = GossipConfig::default()
        .with_heartbeat_interval(Duration::from_millis(cli.tick_interval_ms))
        .with_failure_timeout(Duration::from_millis(cli.failure_timeout_ms));

    let mut builder = GossipNode::builder()
        .with_bind_addr(cli.bind)
        .with_config(config)
        .with_transport(cli.transport)
        .with_codec(cli.codec);
    if let Some(id) = cli.id {
        builder = builder.with_id(id);
    }
    if let Some(role) = cli.role {
        builder = builder.with_role(role);
    }
    if let Some(region) = cli.region {
        builder = builder.with_region(region);
    }

    let mut node = builder.build().await.context("failed to start gossip node")?;
    info!(
        "Node {} up on {} ({}/{})",
        node.local_id(),
        node.local_addr(),
        cli.transport,
        cli.codec
    );
    info!("Others can reach this node with --seed {}", node.seed_addr());

    if let Some(events) = node.take_events() {
        tokio::spawn(print_events(events));
    }

    if let Some(seed) = &cli.seed {
        info!("Contacting seed {}", seed);
        node.meet(seed).context("failed to contact seed")?;
    }

    let stats_period = if cli.stats_interval_secs > 0 {
        Duration::from_secs(cli.stats_interval_secs)
    } else {
        // Effectively never.
        Duration::from_secs(u32::MAX as u64)
    };
    let mut stats_tick = tokio::time::interval(stats_period);
    stats_tick.tick().await; // skip the immediate first firing

    loop {
        tokio::select! {
            _ = stats_tick.tick() => {
                let stats = node.stats().await?;
                info!(
                    "{} known, {} sent, {} received, last tick {:?}",
                    stats.known_nodes,
                    stats.sent_messages,
                    stats.received_messages,
                    stats.last_tick_duration
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    node.shutdown().await.context("failed to shut down cleanly")?;
    Ok(())
}

async fn print_events(mut events: tokio::sync::mpsc::UnboundedReceiver<murmur_net::MemberEvent>) {
    while let Some(event) = events.recv().await {
        info!(
            "Node {} at {}: {} -> {}",
            event.view.id,
            event.view.addr,
            event.previous_status,
            event.view.status
        );
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
