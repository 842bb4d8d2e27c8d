// TCP Transport Implementation
// Listens for and dials TCP connections, authenticates them, registers them in
// the connection pool and runs one task per connection that writes queued
// frames and forwards decoded messages to the node.

use super::handshake::{Handshake, HandshakeOutcome};
use super::pool::{Channel, ConnectionPool, Route};
use super::traits::{Direction, MessageSender, TransportConfig, TransportError};
use crate::identity::PeerId;
use crate::peer::PeerTable;
use crate::policy::{self, DialPolicy};
use crate::task::spawn_supervised;
use crate::wire::{self, Framing, Message};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A decoded message and the authenticated peer it came from
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub from: PeerId,
    pub message: Message,
}

/// Statistics for transport operations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportStats {
    pub connections_accepted: u64,
    pub connections_dialed: u64,
    pub connections_rejected: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub malformed_frames: u64,
}

#[derive(Default)]
struct Counters {
    connections_accepted: AtomicU64,
    connections_dialed: AtomicU64,
    connections_rejected: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    malformed_frames: AtomicU64,
}

struct Inner {
    config: TransportConfig,
    local: PeerId,
    pool: ConnectionPool,
    table: Arc<dyn PeerTable>,
    handshake: Arc<dyn Handshake>,
    policy: Arc<dyn DialPolicy>,
    inbound: mpsc::Sender<InboundMessage>,
    cancel: CancellationToken,
    counters: Counters,
}

/// TCP transport. Cheap to clone; clones share the pool and tasks.
#[derive(Clone)]
pub struct TcpTransport {
    inner: Arc<Inner>,
}

impl TcpTransport {
    /// Create a transport and the receiver for messages arriving on any of
    /// its connections. Every task it spawns stops when `cancel` fires.
    pub fn new(
        config: TransportConfig,
        local: PeerId,
        table: Arc<dyn PeerTable>,
        handshake: Arc<dyn Handshake>,
        policy: Arc<dyn DialPolicy>,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<InboundMessage>) {
        let (inbound, inbound_rx) = mpsc::channel(config.channel_buffer * 8);
        let pool = ConnectionPool::new(local, config.max_connections);
        let transport = Self {
            inner: Arc::new(Inner {
                config,
                local,
                pool,
                table,
                handshake,
                policy,
                inbound,
                cancel,
                counters: Counters::default(),
            }),
        };
        (transport, inbound_rx)
    }

    pub fn local_peer(&self) -> &PeerId {
        &self.inner.local
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.inner.pool
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> TransportStats {
        let c = &self.inner.counters;
        TransportStats {
            connections_accepted: c.connections_accepted.load(Ordering::Relaxed),
            connections_dialed: c.connections_dialed.load(Ordering::Relaxed),
            connections_rejected: c.connections_rejected.load(Ordering::Relaxed),
            messages_sent: c.messages_sent.load(Ordering::Relaxed),
            messages_received: c.messages_received.load(Ordering::Relaxed),
            malformed_frames: c.malformed_frames.load(Ordering::Relaxed),
        }
    }

    /// Close the pooled channel to a peer
    pub fn close(&self, peer: &PeerId) -> bool {
        self.inner.pool.close(peer)
    }

    // ========================================================================
    // LISTEN PATH
    // ========================================================================

    /// Bind the listening socket. Done before the transport exists so the
    /// handshake can announce the bound address.
    pub async fn bind(config: &TransportConfig) -> Result<TcpListener, TransportError> {
        let bind_addr = format!("{}:{}", config.bind_address, config.bind_port);
        TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("bind {}: {}", bind_addr, e)))
    }

    /// Accept connections until cancelled. Each connection is handled in its
    /// own supervised task.
    pub async fn listen(&self, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, peer = %self.inner.local.short(), "listening");
        }
        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let this = self.clone();
                        spawn_supervised("inbound-connection", async move {
                            if let Err(e) = this.accept(stream, addr).await {
                                this.inner.counters.connections_rejected.fetch_add(1, Ordering::Relaxed);
                                debug!(%addr, error = %e, "inbound connection dropped");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
        }
        debug!("listener stopped");
    }

    async fn accept(&self, stream: TcpStream, addr: SocketAddr) -> Result<Channel, TransportError> {
        stream.set_nodelay(self.inner.config.nodelay).ok();
        let mut framing = wire::framed(stream, self.inner.config.max_frame_len);

        let mut outcome = timeout(
            self.inner.config.handshake_timeout(),
            self.inner.handshake.handshake(&mut framing, Direction::Inbound, None),
        )
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(|e| TransportError::Handshake(e.to_string()))?;

        // A peer bound to a wildcard address is reachable where it came from
        if outcome.listen_addr.ip().is_unspecified() {
            outcome.listen_addr.set_ip(addr.ip());
        }

        let channel = self.establish(framing, outcome, Direction::Inbound)?;
        self.inner.counters.connections_accepted.fetch_add(1, Ordering::Relaxed);
        Ok(channel)
    }

    // ========================================================================
    // DIAL PATH
    // ========================================================================

    /// Dial a peer once: connect, handshake, register. No retries.
    pub async fn connect(&self, peer: PeerId, addr: SocketAddr) -> Result<Channel, TransportError> {
        let stream = timeout(self.inner.config.connect_timeout(), TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        stream.set_nodelay(self.inner.config.nodelay).ok();
        let mut framing = wire::framed(stream, self.inner.config.max_frame_len);

        let mut outcome = timeout(
            self.inner.config.handshake_timeout(),
            self.inner.handshake.handshake(&mut framing, Direction::Outbound, Some(peer)),
        )
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(|e| TransportError::Handshake(e.to_string()))?;

        // We reached it at `addr`; that is the address worth remembering
        outcome.listen_addr = addr;

        let channel = self.establish(framing, outcome, Direction::Outbound)?;
        self.inner.counters.connections_dialed.fetch_add(1, Ordering::Relaxed);
        Ok(channel)
    }

    /// Dial with the retry policy, then deliver whatever was queued for the
    /// peer in the meantime.
    async fn dial(&self, peer: PeerId, addr: SocketAddr) {
        let result = policy::retry(self.inner.policy.as_ref(), &self.inner.cancel, |attempt| {
            let this = self.clone();
            async move {
                debug!(peer = %peer.short(), %addr, attempt, "dialling");
                this.connect(peer, addr).await
            }
        })
        .await;

        match &result {
            Ok(_) => debug!(peer = %peer.short(), "dial succeeded"),
            // Lost arbitration to a connection the peer opened; that one carries the backlog
            Err(TransportError::ConnectionExists) => debug!(peer = %peer.short(), "dial superseded"),
            Err(e) => warn!(peer = %peer.short(), %addr, error = %e, "dial failed"),
        }

        let (backlog, channel) = self.inner.pool.finish_dial(&peer);
        match channel {
            Some(channel) => self.flush(&channel, backlog).await,
            None if !backlog.is_empty() => {
                warn!(peer = %peer.short(), dropped = backlog.len(), "no channel, dropping queued messages");
            }
            None => {}
        }
    }

    // ========================================================================
    // CONNECTION LIFECYCLE
    // ========================================================================

    /// Admit, register and start the connection task for an authenticated stream
    fn establish(
        &self,
        framing: Framing<TcpStream>,
        outcome: HandshakeOutcome,
        direction: Direction,
    ) -> Result<Channel, TransportError> {
        let HandshakeOutcome { peer, listen_addr } = outcome;
        self.inner
            .pool
            .admit(&peer, direction, listen_addr, self.inner.table.as_ref())?;

        let (tx, rx) = mpsc::channel(self.inner.config.channel_buffer);
        let token = self.inner.cancel.child_token();
        let channel = Channel::new(peer, direction, listen_addr, tx, token.clone());

        let registered = self.inner.pool.register(channel.clone())?;
        self.inner.table.add_peer(peer, listen_addr);
        info!(peer = %peer.short(), addr = %listen_addr, %direction, "connection established");

        let this = self.clone();
        let task_channel = channel.clone();
        spawn_supervised("connection", async move {
            this.run_connection(framing, rx, token, &task_channel).await;
            this.inner.pool.remove_if_current(&peer, task_channel.id());
            task_channel.close();
            debug!(peer = %peer.short(), %direction, "connection closed");
        });

        if !registered.backlog.is_empty() {
            let this = self.clone();
            let flush_channel = channel.clone();
            spawn_supervised("flush-backlog", async move {
                this.flush(&flush_channel, registered.backlog).await;
            });
        }
        Ok(channel)
    }

    /// Per-connection loop: write queued frames, forward decoded messages
    async fn run_connection(
        &self,
        framing: Framing<TcpStream>,
        mut outgoing: mpsc::Receiver<Bytes>,
        token: CancellationToken,
        channel: &Channel,
    ) {
        let peer = *channel.peer();
        let (mut sink, mut stream) = framing.split();

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                frame = outgoing.recv() => {
                    let Some(frame) = frame else { break };
                    if let Err(e) = sink.send(frame).await {
                        warn!(peer = %peer.short(), error = %e, "write failed");
                        break;
                    }
                    self.inner.counters.messages_sent.fetch_add(1, Ordering::Relaxed);
                }
                item = stream.next() => {
                    let frame = match item {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => {
                            debug!(peer = %peer.short(), error = %e, "read failed");
                            break;
                        }
                        None => break,
                    };
                    let message = match Message::from_bytes(&frame) {
                        Ok(message) => message,
                        Err(e) => {
                            // Malformed frames are dropped; the connection stays up
                            self.inner.counters.malformed_frames.fetch_add(1, Ordering::Relaxed);
                            warn!(peer = %peer.short(), error = %e, "dropping malformed frame");
                            continue;
                        }
                    };
                    self.inner.counters.messages_received.fetch_add(1, Ordering::Relaxed);
                    if self.inner.inbound.send(InboundMessage { from: peer, message }).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    async fn flush(&self, channel: &Channel, backlog: Vec<Bytes>) {
        for frame in backlog {
            match timeout(self.inner.config.send_timeout(), channel.send(frame)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(peer = %channel.peer().short(), error = %e, "failed to flush queued message");
                    return;
                }
                Err(_) => {
                    warn!(peer = %channel.peer().short(), "timed out flushing queued message");
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl MessageSender for TcpTransport {
    async fn send(&self, peer: &PeerId, addr: SocketAddr, msg: Message) -> Result<(), TransportError> {
        if *peer == self.inner.local {
            return Err(TransportError::ConnectionFailed("cannot send to self".to_string()));
        }
        let frame = wire::encode(&msg)?;

        match self.inner.pool.route(*peer, frame, self.inner.config.channel_buffer)? {
            Route::Channel(channel, frame) => timeout(self.inner.config.send_timeout(), channel.send(frame))
                .await
                .map_err(|_| TransportError::Timeout)?,
            Route::Queued { start_dial } => {
                if start_dial {
                    let this = self.clone();
                    let peer = *peer;
                    spawn_supervised("dial", async move {
                        this.dial(peer, addr).await;
                    });
                }
                Ok(())
            }
        }
    }
}
