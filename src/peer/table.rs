// Peer Table - Who we know and where they live
//
// Maps peer identities to network addresses, and subnets to their members.
// The gossip engine only reads from it; the connection layer adds peers after
// a handshake and evicts stale entries when an address changes hands.

use crate::identity::PeerId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;

// ============================================================================
// SUBNET ID
// ============================================================================

/// Opaque identifier for a group of peers
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubnetId([u8; 32]);

impl SubnetId {
    /// Reserved subnet meaning "every known peer"
    pub const GLOBAL: SubnetId = SubnetId([0xFF; 32]);

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_global(&self) -> bool {
        *self == Self::GLOBAL
    }

    /// The same 32 bytes read as a peer identity. Lets a gossip target name a
    /// single peer instead of a subnet.
    pub fn as_peer(&self) -> PeerId {
        PeerId::from_bytes(self.0)
    }
}

impl From<PeerId> for SubnetId {
    fn from(peer: PeerId) -> Self {
        Self(*peer.as_bytes())
    }
}

impl fmt::Debug for SubnetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_global() {
            f.write_str("SubnetId(global)")
        } else {
            write!(f, "SubnetId({})", hex::encode(&self.0[..8]))
        }
    }
}

// ============================================================================
// PEER TABLE TRAIT
// ============================================================================

/// Address book consulted by the gossip engine and connection layer
pub trait PeerTable: Send + Sync {
    /// Add or update a peer
    fn add_peer(&self, peer: PeerId, addr: SocketAddr);

    /// Remove a peer and its address mapping
    fn delete_peer(&self, peer: &PeerId);

    /// Address of a peer
    fn peer_address(&self, peer: &PeerId) -> Option<SocketAddr>;

    /// Peer currently mapped to an address
    fn peer_id(&self, addr: &SocketAddr) -> Option<PeerId>;

    /// Every known peer
    fn all(&self) -> Vec<PeerId>;

    /// Members of a subnet. The global subnet resolves to [`all`](Self::all).
    fn subnet(&self, subnet: &SubnetId) -> Vec<PeerId>;

    /// Define or replace a subnet's membership
    fn add_subnet(&self, subnet: SubnetId, members: Vec<PeerId>);
}

// ============================================================================
// IN-MEMORY TABLE
// ============================================================================

#[derive(Default)]
struct TableState {
    peers: HashMap<PeerId, SocketAddr>,
    by_addr: HashMap<SocketAddr, PeerId>,
    subnets: HashMap<SubnetId, HashSet<PeerId>>,
}

/// Peer table held in memory
#[derive(Default)]
pub struct InMemoryPeerTable {
    state: RwLock<TableState>,
}

impl InMemoryPeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of known peers
    pub fn peer_count(&self) -> usize {
        self.state.read().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peer_count() == 0
    }

    /// Check if we have a peer
    pub fn has_peer(&self, peer: &PeerId) -> bool {
        self.state.read().peers.contains_key(peer)
    }
}

impl PeerTable for InMemoryPeerTable {
    fn add_peer(&self, peer: PeerId, addr: SocketAddr) {
        let mut state = self.state.write();
        if let Some(old_addr) = state.peers.insert(peer, addr) {
            if old_addr != addr && state.by_addr.get(&old_addr) == Some(&peer) {
                state.by_addr.remove(&old_addr);
            }
        }
        // The address now belongs to this peer only
        if let Some(previous_owner) = state.by_addr.insert(addr, peer) {
            if previous_owner != peer && state.peers.get(&previous_owner) == Some(&addr) {
                state.peers.remove(&previous_owner);
            }
        }
    }

    fn delete_peer(&self, peer: &PeerId) {
        let mut state = self.state.write();
        if let Some(addr) = state.peers.remove(peer) {
            if state.by_addr.get(&addr) == Some(peer) {
                state.by_addr.remove(&addr);
            }
        }
        for members in state.subnets.values_mut() {
            members.remove(peer);
        }
    }

    fn peer_address(&self, peer: &PeerId) -> Option<SocketAddr> {
        self.state.read().peers.get(peer).copied()
    }

    fn peer_id(&self, addr: &SocketAddr) -> Option<PeerId> {
        self.state.read().by_addr.get(addr).copied()
    }

    fn all(&self) -> Vec<PeerId> {
        self.state.read().peers.keys().copied().collect()
    }

    fn subnet(&self, subnet: &SubnetId) -> Vec<PeerId> {
        if subnet.is_global() {
            return self.all();
        }
        self.state
            .read()
            .subnets
            .get(subnet)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    fn add_subnet(&self, subnet: SubnetId, members: Vec<PeerId>) {
        self.state
            .write()
            .subnets
            .insert(subnet, members.into_iter().collect());
    }
}
