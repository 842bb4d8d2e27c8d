// Node module - THE ASSEMBLY
// Wires identity, cache, peer table, transport and gossip engine into one
// runnable peer

mod config;

pub use config::{DialConfig, NodeConfig};

use crate::gossip::{GossipEngine, GossipError, GossipEvent, GossipStats};
use crate::identity::{Keypair, PeerId};
use crate::peer::{InMemoryPeerTable, PeerTable, SubnetId};
use crate::policy::{ConstantBackoff, DialPolicy, MaxAttempts};
use crate::resolver::{ContentId, ContentResolver, DoubleCacheResolver, PersistentResolver, StoreError};
use crate::task::spawn_supervised;
use crate::transport::{InboundMessage, SignedHandshake, TcpTransport, TransportError, TransportStats};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Node errors
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Gossip error: {0}")]
    Gossip(#[from] GossipError),

    #[error("Node is already running")]
    AlreadyRunning,
}

/// Parts consumed by the first call to [`Node::run`]
struct RunParts {
    listener: TcpListener,
    inbound: mpsc::Receiver<InboundMessage>,
}

/// A gossip peer: listens, dials on demand and disseminates content
pub struct Node {
    id: PeerId,
    local_addr: SocketAddr,
    table: Arc<InMemoryPeerTable>,
    cache: Arc<DoubleCacheResolver>,
    store: Option<Arc<PersistentResolver>>,
    transport: TcpTransport,
    engine: Arc<GossipEngine>,
    cancel: CancellationToken,
    parts: Mutex<Option<RunParts>>,
}

impl Node {
    /// Bind the listener and assemble the node. Nothing is served until
    /// [`run`](Self::run) is called.
    pub async fn new(keypair: Keypair, config: NodeConfig) -> Result<Self, NodeError> {
        config.validate()?;
        let id = keypair.peer_id();

        let listener = TcpTransport::bind(&config.transport).await?;
        let local_addr = listener.local_addr().map_err(TransportError::from)?;

        let store = match &config.store_path {
            Some(path) => Some(Arc::new(PersistentResolver::open(path)?)),
            None => None,
        };
        let inner = store.clone().map(|s| s as Arc<dyn ContentResolver>);
        let cache = Arc::new(DoubleCacheResolver::new(config.cache.clone(), inner));

        let table = Arc::new(InMemoryPeerTable::new());
        let backoff = ConstantBackoff::new(config.dial.retry_delay());
        let policy: Arc<dyn DialPolicy> = match config.dial.max_attempts {
            Some(n) => Arc::new(MaxAttempts::new(backoff, n)),
            None => Arc::new(backoff),
        };

        let cancel = CancellationToken::new();
        let (transport, inbound) = TcpTransport::new(
            config.transport.clone(),
            id,
            table.clone(),
            Arc::new(SignedHandshake::new(keypair, local_addr)),
            policy,
            cancel.clone(),
        );

        let engine = Arc::new(GossipEngine::new(
            config.gossip.clone(),
            cache.clone(),
            table.clone(),
            Arc::new(transport.clone()),
        ));

        info!(peer = %id, addr = %local_addr, "node created");
        Ok(Self {
            id,
            local_addr,
            table,
            cache,
            store,
            transport,
            engine,
            cancel,
            parts: Mutex::new(Some(RunParts { listener, inbound })),
        })
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn table(&self) -> &Arc<InMemoryPeerTable> {
        &self.table
    }

    pub fn cache(&self) -> &Arc<DoubleCacheResolver> {
        &self.cache
    }

    /// Durable store behind the cache, when configured
    pub fn store(&self) -> Option<&Arc<PersistentResolver>> {
        self.store.as_ref()
    }

    pub fn transport(&self) -> &TcpTransport {
        &self.transport
    }

    pub fn engine(&self) -> &Arc<GossipEngine> {
        &self.engine
    }

    pub fn events(&self) -> broadcast::Receiver<GossipEvent> {
        self.engine.events()
    }

    pub fn gossip_stats(&self) -> GossipStats {
        self.engine.stats()
    }

    pub fn transport_stats(&self) -> TransportStats {
        self.transport.stats()
    }

    /// Token that stops the node when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Remember where a peer can be reached
    pub fn add_peer(&self, peer: PeerId, addr: SocketAddr) {
        self.table.add_peer(peer, addr);
    }

    /// Disseminate content to a subnet, or to a single peer when `subnet` is
    /// a peer id
    pub async fn gossip(&self, subnet: SubnetId, data: Vec<u8>) -> Result<ContentId, NodeError> {
        Ok(self.engine.gossip(subnet, data).await?)
    }

    /// Send a direct message to a peer
    pub async fn send(&self, peer: &PeerId, data: Vec<u8>) -> Result<(), NodeError> {
        Ok(self.engine.send_direct(peer, data).await?)
    }

    /// Serve connections and dispatch inbound messages until shut down.
    ///
    /// Each message is handled in its own task so a slow peer cannot stall
    /// the others.
    pub async fn run(&self) -> Result<(), NodeError> {
        let RunParts { listener, mut inbound } = self.parts.lock().take().ok_or(NodeError::AlreadyRunning)?;

        let transport = self.transport.clone();
        spawn_supervised("listener", async move {
            transport.listen(listener).await;
        });

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = inbound.recv() => {
                    let Some(InboundMessage { from, message }) = received else { break };
                    let engine = self.engine.clone();
                    spawn_supervised("gossip-handler", async move {
                        let kind = message.msg_type;
                        match engine.handle_message(from, message).await {
                            Ok(()) => {}
                            Err(GossipError::ProtocolViolation(reason)) => {
                                warn!(peer = %from.short(), %reason, "protocol violation");
                            }
                            Err(e) => debug!(peer = %from.short(), %kind, error = %e, "handling message failed"),
                        }
                    });
                }
            }
        }

        info!(peer = %self.id.short(), "node stopped");
        Ok(())
    }

    /// Stop every task the node started and flush the store
    pub fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(store) = &self.store {
            if let Err(e) = store.flush() {
                warn!(error = %e, "failed to flush store");
            }
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
