// Connection Pool - At most one live channel per peer
//
// Both the listen path and the dial path register authenticated channels
// here. When two channels to the same peer meet, arbitration keeps exactly
// one of them, and both ends of the pair independently keep the same one.

use super::traits::{Direction, TransportError};
use crate::identity::PeerId;
use crate::peer::PeerTable;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// CHANNEL
// ============================================================================

/// Handle to one authenticated connection with a peer.
///
/// Cloning the handle does not clone the connection. Frames sent here are
/// written by the connection's own task; cancelling the token tears the
/// connection down.
#[derive(Clone, Debug)]
pub struct Channel {
    id: u64,
    peer: PeerId,
    direction: Direction,
    remote_addr: SocketAddr,
    sender: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
}

impl Channel {
    pub fn new(
        peer: PeerId,
        direction: Direction,
        remote_addr: SocketAddr,
        sender: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            direction,
            remote_addr,
            sender,
            cancel,
        }
    }

    /// Process-unique id of this channel
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The listen address the remote announced during the handshake
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Queue a frame for the connection's writer
    pub async fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::SendFailed("channel closed".to_string()));
        }
        self.sender
            .send(frame)
            .await
            .map_err(|_| TransportError::SendFailed("channel closed".to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.sender.is_closed()
    }

    /// Ask the connection task to shut down
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

// ============================================================================
// ARBITRATION
// ============================================================================

/// Direction of the connection that survives when `local` and `remote` have
/// dialled each other. The survivor is the connection dialled by the higher
/// identity, so both peers compute the same physical connection.
pub fn tie_break(local: &PeerId, remote: &PeerId) -> Direction {
    if local > remote {
        Direction::Outbound
    } else {
        Direction::Inbound
    }
}

/// Returns true if a new connection should replace the existing one
fn should_replace(local: &PeerId, remote: &PeerId, existing: Direction, new: Direction) -> bool {
    use Direction::*;
    match (existing, new) {
        // They connected to us again; the newer connection is the live one
        (Inbound, Inbound) => true,
        // We already dialled them; keep what we have
        (Outbound, Outbound) => false,
        _ => new == tie_break(local, remote),
    }
}

/// Result of a successful registration
#[derive(Debug)]
pub struct Registered {
    /// Channel that lost arbitration and has been closed
    pub replaced: Option<Channel>,
    /// Frames queued for the peer while no channel existed
    pub backlog: Vec<Bytes>,
}

/// Where a frame should go
#[derive(Debug)]
pub enum Route {
    /// A live channel exists; send the frame on it
    Channel(Channel, Bytes),
    /// The frame was queued until a channel is registered. `start_dial` is
    /// true for the first frame, whose sender must start the dial.
    Queued { start_dial: bool },
}

// ============================================================================
// POOL
// ============================================================================

#[derive(Default)]
struct PoolState {
    channels: HashMap<PeerId, Channel>,
    pending: HashMap<PeerId, Vec<Bytes>>,
    dialing: HashSet<PeerId>,
}

/// Registry of live channels keyed by peer identity
pub struct ConnectionPool {
    local: PeerId,
    max_connections: usize,
    state: Mutex<PoolState>,
}

impl ConnectionPool {
    pub fn new(local: PeerId, max_connections: usize) -> Self {
        Self {
            local,
            max_connections,
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn local(&self) -> &PeerId {
        &self.local
    }

    /// Live channel for a peer
    pub fn channel(&self, peer: &PeerId) -> Option<Channel> {
        self.state
            .lock()
            .channels
            .get(peer)
            .filter(|ch| !ch.is_closed())
            .cloned()
    }

    /// Close and forget the channel for a peer
    pub fn close(&self, peer: &PeerId) -> bool {
        let removed = self.state.lock().channels.remove(peer);
        match removed {
            Some(channel) => {
                channel.close();
                true
            }
            None => false,
        }
    }

    /// Forget a channel only if it is still the registered one for its peer.
    /// Connection tasks call this on exit so a replaced channel never removes
    /// its successor.
    pub fn remove_if_current(&self, peer: &PeerId, channel_id: u64) -> bool {
        let mut state = self.state.lock();
        if state.channels.get(peer).map(Channel::id) == Some(channel_id) {
            state.channels.remove(peer);
            return true;
        }
        false
    }

    /// Number of registered channels
    pub fn len(&self) -> usize {
        self.state.lock().channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Peers with a registered channel
    pub fn peers(&self) -> Vec<PeerId> {
        self.state.lock().channels.keys().copied().collect()
    }

    /// Address-reuse check, run after the handshake and before registration.
    ///
    /// If the announced address is mapped to a different identity, that
    /// mapping is stale: the old identity is evicted from the table and its
    /// channel closed. If the address already carries a live channel for the
    /// same identity that the new connection would lose against, the new
    /// connection is refused.
    pub fn admit(
        &self,
        remote: &PeerId,
        direction: Direction,
        announced: SocketAddr,
        table: &dyn PeerTable,
    ) -> Result<(), TransportError> {
        if let Some(owner) = table.peer_id(&announced) {
            if owner != *remote {
                debug!(
                    addr = %announced,
                    stale = %owner.short(),
                    peer = %remote.short(),
                    "address changed hands, evicting stale peer"
                );
                table.delete_peer(&owner);
                self.close(&owner);
            }
        }

        let state = self.state.lock();
        if let Some(existing) = state.channels.get(remote) {
            if !existing.is_closed()
                && existing.remote_addr == announced
                && !should_replace(&self.local, remote, existing.direction, direction)
            {
                debug!(peer = %remote.short(), %direction, "refusing duplicate connection");
                return Err(TransportError::ConnectionExists);
            }
        }
        Ok(())
    }

    /// Register an authenticated channel, arbitrating against any existing
    /// channel to the same peer.
    ///
    /// Returns `ConnectionExists` when the new channel loses; the caller must
    /// tear it down. When the existing channel loses it is closed and
    /// returned in [`Registered::replaced`].
    pub fn register(&self, channel: Channel) -> Result<Registered, TransportError> {
        let peer = channel.peer;
        let mut state = self.state.lock();

        let existing = state
            .channels
            .get(&peer)
            .map(|existing| (existing.is_closed(), existing.direction));

        let replaced = match existing {
            Some((false, existing_direction)) => {
                if !should_replace(&self.local, &peer, existing_direction, channel.direction) {
                    debug!(
                        peer = %peer.short(),
                        keep = %existing_direction,
                        drop = %channel.direction,
                        "tie break: keeping existing connection"
                    );
                    return Err(TransportError::ConnectionExists);
                }
                debug!(
                    peer = %peer.short(),
                    keep = %channel.direction,
                    drop = %existing_direction,
                    "tie break: replacing existing connection"
                );
                state.channels.insert(peer, channel)
            }
            Some((true, _)) => state.channels.insert(peer, channel),
            None => {
                if state.channels.len() >= self.max_connections {
                    return Err(TransportError::MaxConnectionsReached);
                }
                state.channels.insert(peer, channel);
                None
            }
        };

        if let Some(old) = &replaced {
            old.close();
        }
        let backlog = state.pending.remove(&peer).unwrap_or_default();
        Ok(Registered { replaced, backlog })
    }

    /// Route a frame to a peer's channel, or queue it while a dial is made.
    ///
    /// At most `max_backlog` frames are queued per peer.
    pub fn route(&self, peer: PeerId, frame: Bytes, max_backlog: usize) -> Result<Route, TransportError> {
        let mut state = self.state.lock();
        if let Some(channel) = state.channels.get(&peer).filter(|ch| !ch.is_closed()) {
            return Ok(Route::Channel(channel.clone(), frame));
        }

        let queue = state.pending.entry(peer).or_default();
        if queue.len() >= max_backlog {
            return Err(TransportError::SendFailed("dial backlog full".to_string()));
        }
        queue.push(frame);
        let start_dial = state.dialing.insert(peer);
        Ok(Route::Queued { start_dial })
    }

    /// Mark a dial as finished, draining anything still queued for the peer
    /// together with the channel it should go to, if one exists now.
    pub fn finish_dial(&self, peer: &PeerId) -> (Vec<Bytes>, Option<Channel>) {
        let mut state = self.state.lock();
        state.dialing.remove(peer);
        let backlog = state.pending.remove(peer).unwrap_or_default();
        let channel = state.channels.get(peer).filter(|ch| !ch.is_closed()).cloned();
        (backlog, channel)
    }
}
