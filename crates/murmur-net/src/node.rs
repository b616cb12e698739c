//! The async driver that owns a gossip engine.
//!
//! The engine expects a single logical driver: every entry point must be
//! invoked in a serialized order. [`GossipNode`] provides that driver as one
//! tokio task that multiplexes the tick cadence, inbound messages, outbound
//! delivery, and control commands. The engine's send callback only queues
//! work for this task, so it never re-enters the engine and never blocks on
//! the network.

use crate::codec::CodecKind;
use crate::transport::TransportKind;
use crate::{NetError, Result};
use murmur_core::{
    GossipConfig, GossipEngine, GossipMessage, GossipStats, NodeId, NodeStatus, NodeView,
};
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Membership transition surfaced to the embedding application.
#[derive(Debug, Clone)]
pub struct MemberEvent {
    /// The node's view after the transition.
    pub view: NodeView,
    /// The status it held before.
    pub previous_status: NodeStatus,
}

/// `id@host:port` descriptor of a seed node.
///
/// The protocol refuses to learn about peers from hearsay, so contacting a
/// seed requires naming its identity, not just its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedAddr {
    pub id: NodeId,
    pub addr: SocketAddr,
}

impl SeedAddr {
    /// The seed as a placeholder view suitable for meet/join.
    pub fn to_view(&self) -> NodeView {
        NodeView::new(self.id, self.addr)
    }
}

impl FromStr for SeedAddr {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self> {
        let (id_part, addr_part) = s
            .split_once('@')
            .ok_or_else(|| NetError::InvalidSeed(format!("Expected id@host:port, got `{}`", s)))?;
        let id: NodeId = id_part
            .parse()
            .map_err(|e| NetError::InvalidSeed(format!("Bad node id `{}`: {}", id_part, e)))?;
        let addr = addr_part
            .to_socket_addrs()
            .map_err(|e| NetError::InvalidSeed(format!("Bad address `{}`: {}", addr_part, e)))?
            .next()
            .ok_or_else(|| {
                NetError::InvalidSeed(format!("Address `{}` resolved to nothing", addr_part))
            })?;
        Ok(Self { id, addr })
    }
}

impl fmt::Display for SeedAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.addr)
    }
}

enum Command {
    Meet(NodeView),
    Join(NodeView),
    Leave(NodeId),
    Broadcast,
    SetMetadata(String, String),
    SetRole(String),
    Stats(oneshot::Sender<GossipStats>),
    Nodes(oneshot::Sender<Vec<NodeView>>),
    Shutdown,
}

/// A running gossip node: engine, transport, and driver task.
pub struct GossipNode {
    local_id: NodeId,
    local_addr: SocketAddr,
    command_tx: mpsc::UnboundedSender<Command>,
    events: Option<mpsc::UnboundedReceiver<MemberEvent>>,
    driver: Option<JoinHandle<()>>,
}

impl GossipNode {
    pub fn builder() -> GossipNodeBuilder {
        GossipNodeBuilder::new()
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// Address the transport actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Seed descriptor other nodes can use to contact this one.
    pub fn seed_addr(&self) -> SeedAddr {
        SeedAddr {
            id: self.local_id,
            addr: self.local_addr,
        }
    }

    /// Introduce this node to a seed (discovery handshake).
    pub fn meet(&self, seed: &SeedAddr) -> Result<()> {
        self.command(Command::Meet(seed.to_view()))
    }

    /// Explicitly join the cluster through a seed.
    pub fn join(&self, seed: &SeedAddr) -> Result<()> {
        self.command(Command::Join(seed.to_view()))
    }

    /// Announce the departure of a known peer.
    pub fn leave(&self, id: NodeId) -> Result<()> {
        self.command(Command::Leave(id))
    }

    /// Trigger one full-broadcast cycle, e.g. after a role change.
    pub fn broadcast(&self) -> Result<()> {
        self.command(Command::Broadcast)
    }

    /// Attach metadata to the local view; it propagates with gossip.
    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.command(Command::SetMetadata(key.into(), value.into()))
    }

    /// Change the local role tag, bumping configuration authority.
    pub fn set_role(&self, role: impl Into<String>) -> Result<()> {
        self.command(Command::SetRole(role.into()))
    }

    /// Engine counters snapshot.
    pub async fn stats(&self) -> Result<GossipStats> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Stats(tx))?;
        rx.await.map_err(|_| NetError::NotRunning)
    }

    /// Snapshot of all known peer views.
    pub async fn nodes(&self) -> Result<Vec<NodeView>> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Nodes(tx))?;
        rx.await.map_err(|_| NetError::NotRunning)
    }

    /// Take the membership event stream. Yields `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<MemberEvent>> {
        self.events.take()
    }

    /// Stop the driver and release the transport.
    pub async fn shutdown(mut self) -> Result<()> {
        let _ = self.command_tx.send(Command::Shutdown);
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.await {
                warn!("Driver task ended abnormally: {}", e);
            }
        }
        Ok(())
    }

    fn command(&self, command: Command) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| NetError::NotRunning)
    }
}

impl fmt::Debug for GossipNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GossipNode")
            .field("local_id", &self.local_id)
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

/// Builder for [`GossipNode`].
pub struct GossipNodeBuilder {
    id: Option<NodeId>,
    bind_addr: SocketAddr,
    config: GossipConfig,
    transport: TransportKind,
    codec: CodecKind,
    role: String,
    region: String,
    metadata: Vec<(String, String)>,
}

impl Default for GossipNodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GossipNodeBuilder {
    pub fn new() -> Self {
        Self {
            id: None,
            bind_addr: "127.0.0.1:0".parse().expect("static loopback address"),
            config: GossipConfig::default(),
            transport: TransportKind::default(),
            codec: CodecKind::default(),
            role: String::new(),
            region: String::new(),
            metadata: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: NodeId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_config(mut self, config: GossipConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_codec(mut self, codec: CodecKind) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    /// Validate the configuration, bind the transport, and spawn the driver.
    pub async fn build(self) -> Result<GossipNode> {
        self.config.validate()?;

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let codec = self.codec.build();
        let mut transport = self.transport.build(self.bind_addr, codec, inbound_tx);
        transport.start().await?;
        let local_addr = transport
            .local_addr()
            .ok_or_else(|| NetError::Transport("Transport reported no local address".into()))?;

        let local_id = self.id.unwrap_or_else(NodeId::generate);
        let mut local = NodeView::new(local_id, local_addr)
            .with_role(self.role)
            .with_region(self.region);
        for (key, value) in self.metadata {
            local = local.with_metadata(key, value);
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<(GossipMessage, SocketAddr)>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<MemberEvent>();
        let (command_tx, command_rx) = mpsc::unbounded_channel::<Command>();

        // SEND only queues: the driver task performs the actual I/O, so the
        // callback can never re-enter the engine or block.
        let engine = GossipEngine::with_config(
            local,
            self.config.clone(),
            Box::new(move |msg, target| {
                let _ = outbound_tx.send((msg.clone(), target.addr));
            }),
            Some(Box::new(move |view, previous_status| {
                let _ = event_tx.send(MemberEvent {
                    view: view.clone(),
                    previous_status,
                });
            })),
        );

        info!("Gossip node {} listening on {}", local_id, local_addr);

        let config = self.config;
        let driver = tokio::spawn(drive(
            engine, transport, config, inbound_rx, outbound_rx, command_rx,
        ));

        Ok(GossipNode {
            local_id,
            local_addr,
            command_tx,
            events: Some(event_rx),
            driver: Some(driver),
        })
    }
}

/// The single logical driver: every engine call happens on this task.
async fn drive(
    mut engine: GossipEngine,
    mut transport: Box<dyn crate::transport::Transport>,
    config: GossipConfig,
    mut inbound_rx: mpsc::UnboundedReceiver<(GossipMessage, SocketAddr)>,
    mut outbound_rx: mpsc::UnboundedReceiver<(GossipMessage, SocketAddr)>,
    mut command_rx: mpsc::UnboundedReceiver<Command>,
) {
    let mut tick = tokio::time::interval(config.heartbeat_interval);
    let mut cleanup = tokio::time::interval(config.expiry_timeout);

    loop {
        tokio::select! {
            _ = tick.tick() => engine.tick(),

            _ = cleanup.tick() => engine.cleanup_expired(config.expiry_timeout),

            Some((msg, from)) = inbound_rx.recv() => {
                debug!("Handling {:?} from {}", msg.kind, from);
                engine.handle_message(&msg, Instant::now());
            }

            Some((msg, addr)) = outbound_rx.recv() => {
                if let Err(e) = transport.send_to(&msg, addr).await {
                    debug!("Send to {} failed: {}", addr, e);
                }
            }

            command = command_rx.recv() => match command {
                Some(Command::Meet(view)) => engine.meet(&view),
                Some(Command::Join(view)) => engine.join(&view),
                Some(Command::Leave(id)) => engine.leave(id),
                Some(Command::Broadcast) => engine.tick_full_broadcast(),
                Some(Command::SetMetadata(key, value)) => engine.set_local_metadata(key, value),
                Some(Command::SetRole(role)) => engine.set_local_role(role),
                Some(Command::Stats(reply)) => { let _ = reply.send(engine.get_stats()); }
                Some(Command::Nodes(reply)) => { let _ = reply.send(engine.get_nodes()); }
                Some(Command::Shutdown) | None => break,
            },
        }
    }

    // Flush whatever the engine queued before the shutdown command.
    while let Ok((msg, addr)) = outbound_rx.try_recv() {
        if let Err(e) = transport.send_to(&msg, addr).await {
            debug!("Send to {} failed during shutdown: {}", addr, e);
        }
    }

    if let Err(e) = transport.stop().await {
        warn!("Transport stop failed: {}", e);
    }
    info!("Gossip node {} stopped", engine.self_view().id);
}
