// Gossip Engine - Epidemic content dissemination
//
// Push/pull/sync with duplicate suppression:
// - Push: announce a content id to the peers of a subnet
// - Pull: ask the announcer for content we have not seen
// - Sync: deliver the content, which the receiver then re-announces
//
// Per-id state lives in the content resolver: no entry is unknown, a pending
// marker is an outstanding pull, data is known.

use crate::identity::PeerId;
use crate::peer::{PeerTable, SubnetId};
use crate::resolver::{Completion, ContentEntry, ContentId, ContentResolver};
use crate::transport::{MessageSender, TransportError};
use crate::wire::{Message, MessageType};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Gossip-related errors
#[derive(Error, Debug)]
pub enum GossipError {
    #[error("Broadcast failed for {} peer(s)", .failures.len())]
    Broadcast {
        failures: Vec<(PeerId, TransportError)>,
    },

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Send failed: {0}")]
    Send(#[from] TransportError),
}

/// Configuration for the gossip engine
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GossipConfig {
    /// Events buffered per subscriber before the slowest one starts lagging
    pub event_buffer: usize,
    /// Re-announce content after it arrives through a sync
    pub rebroadcast: bool,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            event_buffer: 1024,
            rebroadcast: true,
        }
    }
}

impl GossipConfig {
    /// Create a new config builder
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_buffer(mut self, size: usize) -> Self {
        self.event_buffer = size;
        self
    }

    pub fn with_rebroadcast(mut self, rebroadcast: bool) -> Self {
        self.rebroadcast = rebroadcast;
        self
    }
}

/// Events produced by the gossip engine
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GossipEvent {
    /// New content arrived through a sync
    ContentReceived {
        id: ContentId,
        data: Vec<u8>,
        from: PeerId,
    },
    /// A point-to-point message
    DirectMessage { from: PeerId, data: Vec<u8> },
}

/// Statistics about the gossip engine
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipStats {
    pub pushes_received: u64,
    pub pulls_received: u64,
    pub syncs_received: u64,
    pub directs_received: u64,
    pub pushes_sent: u64,
    pub pulls_sent: u64,
    pub syncs_sent: u64,
    pub duplicates_suppressed: u64,
    pub unsolicited_syncs: u64,
    pub unknown_pulls: u64,
    pub rejected_syncs: u64,
    pub rebroadcasts: u64,
}

#[derive(Default)]
struct Counters {
    pushes_received: AtomicU64,
    pulls_received: AtomicU64,
    syncs_received: AtomicU64,
    directs_received: AtomicU64,
    pushes_sent: AtomicU64,
    pulls_sent: AtomicU64,
    syncs_sent: AtomicU64,
    duplicates_suppressed: AtomicU64,
    unsolicited_syncs: AtomicU64,
    unknown_pulls: AtomicU64,
    rejected_syncs: AtomicU64,
    rebroadcasts: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// The gossip engine. Shared behind an `Arc`; every method takes `&self`.
pub struct GossipEngine {
    config: GossipConfig,
    resolver: Arc<dyn ContentResolver>,
    table: Arc<dyn PeerTable>,
    sender: Arc<dyn MessageSender>,
    events: broadcast::Sender<GossipEvent>,
    counters: Counters,
}

impl GossipEngine {
    pub fn new(
        config: GossipConfig,
        resolver: Arc<dyn ContentResolver>,
        table: Arc<dyn PeerTable>,
        sender: Arc<dyn MessageSender>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            config,
            resolver,
            table,
            sender,
            events,
            counters: Counters::default(),
        }
    }

    /// Subscribe to engine events. Only events emitted after subscribing are seen.
    pub fn events(&self) -> broadcast::Receiver<GossipEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &GossipConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Arc<dyn ContentResolver> {
        &self.resolver
    }

    /// Get statistics
    pub fn stats(&self) -> GossipStats {
        let c = &self.counters;
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        GossipStats {
            pushes_received: load(&c.pushes_received),
            pulls_received: load(&c.pulls_received),
            syncs_received: load(&c.syncs_received),
            directs_received: load(&c.directs_received),
            pushes_sent: load(&c.pushes_sent),
            pulls_sent: load(&c.pulls_sent),
            syncs_sent: load(&c.syncs_sent),
            duplicates_suppressed: load(&c.duplicates_suppressed),
            unsolicited_syncs: load(&c.unsolicited_syncs),
            unknown_pulls: load(&c.unknown_pulls),
            rejected_syncs: load(&c.rejected_syncs),
            rebroadcasts: load(&c.rebroadcasts),
        }
    }

    // ========================================================================
    // ORIGINATE
    // ========================================================================

    /// Store `data` locally and announce it to `subnet`.
    ///
    /// The content is stored even if some announcements fail; those failures
    /// are reported together once every recipient has been tried.
    pub async fn gossip(&self, subnet: SubnetId, data: Vec<u8>) -> Result<ContentId, GossipError> {
        let id = ContentId::of(&data);
        self.resolver.insert(id, ContentEntry::Data(data));
        self.announce(subnet, id).await?;
        Ok(id)
    }

    /// Send a point-to-point message
    pub async fn send_direct(&self, peer: &PeerId, data: Vec<u8>) -> Result<(), GossipError> {
        let addr = self
            .table
            .peer_address(peer)
            .ok_or(TransportError::PeerNotFound(*peer))?;
        self.sender.send(peer, addr, Message::direct(data)).await?;
        Ok(())
    }

    /// Send `Push(id)` to the recipients of `subnet`.
    ///
    /// A subnet id that is also the id of a known peer addresses only that
    /// peer. Otherwise the table resolves the subnet, the global subnet
    /// meaning every known peer.
    async fn announce(&self, subnet: SubnetId, id: ContentId) -> Result<(), GossipError> {
        let as_peer = subnet.as_peer();
        let recipients = if self.table.peer_address(&as_peer).is_some() {
            vec![as_peer]
        } else {
            self.table.subnet(&subnet)
        };
        debug!(content = %id, recipients = recipients.len(), "announcing content");

        let msg = Message::push(&id);
        let sends = recipients.into_iter().map(|peer| {
            let msg = msg.clone();
            async move {
                let result = match self.table.peer_address(&peer) {
                    Some(addr) => self.sender.send(&peer, addr, msg).await,
                    None => Err(TransportError::PeerNotFound(peer)),
                };
                (peer, result)
            }
        });

        let mut failures = Vec::new();
        for (peer, result) in join_all(sends).await {
            match result {
                Ok(()) => bump(&self.counters.pushes_sent),
                Err(e) => {
                    debug!(peer = %peer.short(), content = %id, error = %e, "push failed");
                    failures.push((peer, e));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(GossipError::Broadcast { failures })
        }
    }

    // ========================================================================
    // INBOUND MESSAGES
    // ========================================================================

    /// Handle a message received from `from`
    pub async fn handle_message(&self, from: PeerId, msg: Message) -> Result<(), GossipError> {
        match msg.msg_type {
            MessageType::Push => self.handle_push(from, &msg).await,
            MessageType::Pull => self.handle_pull(from, &msg).await,
            MessageType::Sync => self.handle_sync(from, msg.data).await,
            MessageType::Direct => {
                bump(&self.counters.directs_received);
                self.emit(GossipEvent::DirectMessage { from, data: msg.data });
                Ok(())
            }
        }
    }

    async fn handle_push(&self, from: PeerId, msg: &Message) -> Result<(), GossipError> {
        bump(&self.counters.pushes_received);
        let id = content_id(from, msg)?;

        if !self.resolver.insert_if_absent(id, ContentEntry::Pending) {
            bump(&self.counters.duplicates_suppressed);
            debug!(peer = %from.short(), content = %id, "already seen");
            return Ok(());
        }

        if let Err(e) = self.reply(&from, Message::pull(&id)).await {
            // Forget the pending marker so a later push can retry
            self.resolver.delete(&id);
            warn!(peer = %from.short(), content = %id, error = %e, "pull failed");
            return Err(e);
        }
        bump(&self.counters.pulls_sent);
        Ok(())
    }

    async fn handle_pull(&self, from: PeerId, msg: &Message) -> Result<(), GossipError> {
        bump(&self.counters.pulls_received);
        let id = content_id(from, msg)?;

        let data = match self.resolver.content(&id) {
            Some(ContentEntry::Data(data)) => data,
            _ => {
                bump(&self.counters.unknown_pulls);
                warn!(peer = %from.short(), content = %id, "pull for content we do not hold");
                return Ok(());
            }
        };

        self.reply(&from, Message::sync(data)).await?;
        bump(&self.counters.syncs_sent);
        Ok(())
    }

    async fn handle_sync(&self, from: PeerId, data: Vec<u8>) -> Result<(), GossipError> {
        bump(&self.counters.syncs_received);
        let id = ContentId::of(&data);

        match self.resolver.complete(id, data.clone()) {
            Completion::Unsolicited => {
                bump(&self.counters.unsolicited_syncs);
                warn!(peer = %from.short(), content = %id, "dropping unsolicited sync");
                Ok(())
            }
            Completion::Rejected => {
                bump(&self.counters.rejected_syncs);
                warn!(peer = %from.short(), content = %id, len = data.len(), "dropping sync too large to cache");
                Ok(())
            }
            Completion::AlreadyKnown => {
                bump(&self.counters.duplicates_suppressed);
                debug!(peer = %from.short(), content = %id, "sync for known content");
                Ok(())
            }
            Completion::Resolved => {
                info!(peer = %from.short(), content = %id, len = data.len(), "content received");
                self.emit(GossipEvent::ContentReceived { id, data, from });
                if !self.config.rebroadcast {
                    return Ok(());
                }
                bump(&self.counters.rebroadcasts);
                self.announce(SubnetId::GLOBAL, id).await
            }
        }
    }

    async fn reply(&self, to: &PeerId, msg: Message) -> Result<(), GossipError> {
        let addr = self
            .table
            .peer_address(to)
            .ok_or(TransportError::PeerNotFound(*to))?;
        self.sender.send(to, addr, msg).await?;
        Ok(())
    }

    fn emit(&self, event: GossipEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

fn content_id(from: PeerId, msg: &Message) -> Result<ContentId, GossipError> {
    msg.content_id().ok_or_else(|| {
        warn!(peer = %from.short(), len = msg.data.len(), kind = %msg.msg_type, "malformed content id");
        GossipError::ProtocolViolation(format!(
            "{} carries {} bytes, expected a 32 byte content id",
            msg.msg_type,
            msg.data.len()
        ))
    })
}
