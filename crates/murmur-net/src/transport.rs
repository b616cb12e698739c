//! Datagram and stream transports for gossip messages.
//!
//! A transport delivers decoded inbound messages through an unbounded
//! channel and sends outbound messages fire-and-forget. It never calls back
//! into the gossip engine; the driver in [`crate::node`] owns that boundary.

use crate::codec::WireCodec;
use crate::{NetError, Result};
use async_trait::async_trait;
use murmur_core::GossipMessage;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Channel end the transport pushes decoded inbound messages into.
pub type InboundSender = mpsc::UnboundedSender<(GossipMessage, SocketAddr)>;

/// Safe default for a single UDP datagram.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1400;

/// Upper bound for one TCP frame.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Gossip transport abstraction.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Bind sockets and start delivering inbound messages.
    async fn start(&mut self) -> Result<()>;

    /// Stop delivery and release sockets.
    async fn stop(&mut self) -> Result<()>;

    /// Encode and send one message to a specific address.
    async fn send_to(&self, msg: &GossipMessage, addr: SocketAddr) -> Result<()>;

    /// Actual bound address, once started.
    fn local_addr(&self) -> Option<SocketAddr>;

    fn is_running(&self) -> bool;
}

/// UDP datagram transport: one message per packet.
pub struct UdpTransport {
    bind_addr: SocketAddr,
    max_packet_size: usize,
    codec: Arc<dyn WireCodec>,
    inbound: InboundSender,
    socket: Option<Arc<UdpSocket>>,
    recv_task: Option<JoinHandle<()>>,
}

impl UdpTransport {
    pub fn new(bind_addr: SocketAddr, codec: Arc<dyn WireCodec>, inbound: InboundSender) -> Self {
        Self {
            bind_addr,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            codec,
            inbound,
            socket: None,
            recv_task: None,
        }
    }

    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn start(&mut self) -> Result<()> {
        if self.recv_task.is_some() {
            return Ok(());
        }

        let socket = Arc::new(UdpSocket::bind(self.bind_addr).await?);
        self.bind_addr = socket.local_addr()?;
        info!("UDP transport listening on {}", self.bind_addr);

        let recv_socket = Arc::clone(&socket);
        let codec = Arc::clone(&self.codec);
        let inbound = self.inbound.clone();
        let max_packet_size = self.max_packet_size;
        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; max_packet_size];
            loop {
                match recv_socket.recv_from(&mut buf).await {
                    Ok((len, from)) => match codec.decode(&buf[..len]) {
                        Ok(msg) => {
                            debug!("Received {:?} ({} bytes) from {}", msg.kind, len, from);
                            if inbound.send((msg, from)).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Dropping undecodable packet from {}: {}", from, e),
                    },
                    Err(e) => {
                        error!("UDP receive error: {}", e);
                        break;
                    }
                }
            }
        });

        self.socket = Some(socket);
        self.recv_task = Some(task);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.recv_task.take() {
            task.abort();
        }
        self.socket = None;
        info!("UDP transport stopped");
        Ok(())
    }

    async fn send_to(&self, msg: &GossipMessage, addr: SocketAddr) -> Result<()> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| NetError::Transport("UDP transport not started".to_string()))?;

        let bytes = self.codec.encode(msg)?;
        if bytes.len() > self.max_packet_size {
            return Err(NetError::Transport(format!(
                "Message too large for one datagram: {} bytes (max {})",
                bytes.len(),
                self.max_packet_size
            )));
        }

        socket.send_to(&bytes, addr).await?;
        debug!("Sent {:?} ({} bytes) to {}", msg.kind, bytes.len(), addr);
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().map(|_| self.bind_addr)
    }

    fn is_running(&self) -> bool {
        self.recv_task.is_some()
    }
}

/// TCP stream transport: length-prefixed frames, one connection per send.
pub struct TcpTransport {
    bind_addr: SocketAddr,
    codec: Arc<dyn WireCodec>,
    inbound: InboundSender,
    accept_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl TcpTransport {
    pub fn new(bind_addr: SocketAddr, codec: Arc<dyn WireCodec>, inbound: InboundSender) -> Self {
        Self {
            bind_addr,
            codec,
            inbound,
            accept_task: None,
            local_addr: None,
        }
    }

    async fn read_frames(
        mut stream: TcpStream,
        peer: SocketAddr,
        codec: Arc<dyn WireCodec>,
        inbound: InboundSender,
    ) {
        loop {
            let mut len_bytes = [0u8; 4];
            if stream.read_exact(&mut len_bytes).await.is_err() {
                break;
            }
            let len = u32::from_be_bytes(len_bytes) as usize;
            if len == 0 || len > MAX_FRAME_SIZE {
                warn!("Dropping frame with bad length {} from {}", len, peer);
                break;
            }

            let mut frame = vec![0u8; len];
            if let Err(e) = stream.read_exact(&mut frame).await {
                debug!("Connection from {} ended mid-frame: {}", peer, e);
                break;
            }

            match codec.decode(&frame) {
                Ok(msg) => {
                    debug!("Received {:?} ({} bytes) from {}", msg.kind, len, peer);
                    if inbound.send((msg, peer)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Dropping undecodable frame from {}: {}", peer, e);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn start(&mut self) -> Result<()> {
        if self.accept_task.is_some() {
            return Ok(());
        }

        let listener = TcpListener::bind(self.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);
        info!("TCP transport listening on {}", local_addr);

        let codec = Arc::clone(&self.codec);
        let inbound = self.inbound.clone();
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        tokio::spawn(Self::read_frames(
                            stream,
                            peer,
                            Arc::clone(&codec),
                            inbound.clone(),
                        ));
                    }
                    Err(e) => {
                        error!("TCP accept error: {}", e);
                        break;
                    }
                }
            }
        });

        self.accept_task = Some(task);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
        self.local_addr = None;
        info!("TCP transport stopped");
        Ok(())
    }

    async fn send_to(&self, msg: &GossipMessage, addr: SocketAddr) -> Result<()> {
        if self.accept_task.is_none() {
            return Err(NetError::Transport("TCP transport not started".to_string()));
        }

        let bytes = self.codec.encode(msg)?;
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(NetError::Transport(format!(
                "Message too large for one frame: {} bytes",
                bytes.len()
            )));
        }

        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
        stream.write_all(&bytes).await?;
        stream.flush().await?;
        debug!("Sent {:?} ({} bytes) to {}", msg.kind, bytes.len(), addr);
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn is_running(&self) -> bool {
        self.accept_task.is_some()
    }
}

/// Transport selector for configuration surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    #[default]
    Udp,
    Tcp,
}

impl TransportKind {
    pub fn build(
        self,
        bind_addr: SocketAddr,
        codec: Arc<dyn WireCodec>,
        inbound: InboundSender,
    ) -> Box<dyn Transport> {
        match self {
            TransportKind::Udp => Box::new(UdpTransport::new(bind_addr, codec, inbound)),
            TransportKind::Tcp => Box::new(TcpTransport::new(bind_addr, codec, inbound)),
        }
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "udp" => Ok(TransportKind::Udp),
            "tcp" => Ok(TransportKind::Tcp),
            _ => Err(format!("Unknown transport: {}", s)),
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Udp => write!(f, "udp"),
            TransportKind::Tcp => write!(f, "tcp"),
        }
    }
}
