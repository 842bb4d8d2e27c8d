// Peer Table Tests

use gossipmesh::identity::{Keypair, PeerId};
use gossipmesh::peer::{InMemoryPeerTable, PeerTable, SubnetId};
use std::collections::HashSet;
use std::net::SocketAddr;

fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, 1], port))
}

fn new_peer() -> PeerId {
    Keypair::generate().peer_id()
}

#[test]
fn test_add_lookup_both_ways() {
    let table = InMemoryPeerTable::new();
    let peer = new_peer();

    table.add_peer(peer, addr(4000));

    assert_eq!(table.peer_address(&peer), Some(addr(4000)));
    assert_eq!(table.peer_id(&addr(4000)), Some(peer));
    assert!(table.has_peer(&peer));
}

#[test]
fn test_moving_peer_frees_old_address() {
    let table = InMemoryPeerTable::new();
    let peer = new_peer();

    table.add_peer(peer, addr(4000));
    table.add_peer(peer, addr(4001));

    assert_eq!(table.peer_id(&addr(4000)), None);
    assert_eq!(table.peer_id(&addr(4001)), Some(peer));
}

#[test]
fn test_address_reuse_replaces_owner() {
    let table = InMemoryPeerTable::new();
    let old = new_peer();
    let new = new_peer();

    table.add_peer(old, addr(4000));
    table.add_peer(new, addr(4000));

    assert_eq!(table.peer_id(&addr(4000)), Some(new));
    assert_eq!(table.peer_address(&old), None);
    assert_eq!(table.peer_count(), 1);
}

#[test]
fn test_delete_peer_leaves_subnets() {
    let table = InMemoryPeerTable::new();
    let (a, b) = (new_peer(), new_peer());
    let subnet = SubnetId::from_bytes([1; 32]);
    table.add_peer(a, addr(1));
    table.add_peer(b, addr(2));
    table.add_subnet(subnet, vec![a, b]);

    table.delete_peer(&a);

    assert_eq!(table.subnet(&subnet), vec![b]);
    assert_eq!(table.peer_id(&addr(1)), None);
}

#[test]
fn test_global_subnet_is_everyone() {
    let table = InMemoryPeerTable::new();
    let peers: HashSet<_> = (0..5).map(|_| new_peer()).collect();
    for (i, peer) in peers.iter().enumerate() {
        table.add_peer(*peer, addr(5000 + i as u16));
    }

    let global: HashSet<_> = table.subnet(&SubnetId::GLOBAL).into_iter().collect();
    assert_eq!(global, peers);
}

#[test]
fn test_unknown_subnet_is_empty() {
    let table = InMemoryPeerTable::new();
    table.add_peer(new_peer(), addr(1));
    assert!(table.subnet(&SubnetId::from_bytes([9; 32])).is_empty());
}

#[test]
fn test_subnet_as_peer_round_trip() {
    let peer = new_peer();
    let subnet = SubnetId::from(peer);
    assert_eq!(subnet.as_peer(), peer);
    assert!(!subnet.is_global());
    assert!(SubnetId::GLOBAL.is_global());
}
