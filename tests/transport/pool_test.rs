// Connection Pool Tests
// Arbitration between simultaneous connections and address reuse

use bytes::Bytes;
use gossipmesh::identity::{Keypair, PeerId};
use gossipmesh::peer::{InMemoryPeerTable, PeerTable};
use gossipmesh::transport::{tie_break, Channel, ConnectionPool, Direction, Route, TransportError};
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

fn channel(remote: PeerId, direction: Direction, port: u16) -> (Channel, mpsc::Receiver<Bytes>) {
    let (tx, rx) = mpsc::channel(8);
    (Channel::new(remote, direction, addr(port), tx, CancellationToken::new()), rx)
}

/// Two identities, ordered so that `high > low`
fn ordered_pair() -> (PeerId, PeerId) {
    let a = Keypair::generate().peer_id();
    let b = Keypair::generate().peer_id();
    if a > b {
        (a, b)
    } else {
        (b, a)
    }
}

// ============================================================================
// TIE BREAK
// ============================================================================

#[test]
fn test_tie_break_is_antisymmetric() {
    let (high, low) = ordered_pair();

    assert_eq!(tie_break(&high, &low), Direction::Outbound);
    assert_eq!(tie_break(&low, &high), Direction::Inbound);
}

/// Which physical connection survives on one side, given the registration order
fn survivor(local: PeerId, remote: PeerId, first: Direction, second: Direction) -> Direction {
    let pool = ConnectionPool::new(local, 8);
    let (c1, _r1) = channel(remote, first, 7000);
    let (c2, _r2) = channel(remote, second, 7000);
    pool.register(c1).unwrap();
    let _ = pool.register(c2);
    pool.channel(&remote).unwrap().direction()
}

#[test]
fn test_both_sides_keep_the_same_connection() {
    let (high, low) = ordered_pair();
    use Direction::*;

    for (first, second) in [(Inbound, Outbound), (Outbound, Inbound)] {
        // The connection dialled by `high` is outbound at high and inbound at low
        assert_eq!(survivor(high, low, first, second), Outbound);
        assert_eq!(survivor(low, high, first, second), Inbound);
    }
}

#[test]
fn test_losing_new_channel_is_refused() {
    let (high, low) = ordered_pair();
    let pool = ConnectionPool::new(low, 8);

    let (outbound, _r1) = channel(high, Direction::Outbound, 7000);
    pool.register(outbound.clone()).unwrap();

    // high dialled us: its connection wins and replaces ours
    let (inbound, _r2) = channel(high, Direction::Inbound, 7000);
    let registered = pool.register(inbound.clone()).unwrap();
    assert_eq!(registered.replaced.map(|c| c.id()), Some(outbound.id()));
    assert!(outbound.is_closed());

    // Our next dial loses against the surviving inbound channel
    let (again, _r3) = channel(high, Direction::Outbound, 7000);
    assert_eq!(pool.register(again).unwrap_err(), TransportError::ConnectionExists);
    assert_eq!(pool.channel(&high).unwrap().id(), inbound.id());
}

#[test]
fn test_repeated_inbound_replaces() {
    let (_, remote) = ordered_pair();
    let pool = ConnectionPool::new(Keypair::generate().peer_id(), 8);

    let (first, _r1) = channel(remote, Direction::Inbound, 7000);
    let (second, _r2) = channel(remote, Direction::Inbound, 7000);
    pool.register(first.clone()).unwrap();
    pool.register(second.clone()).unwrap();

    assert!(first.is_closed());
    assert_eq!(pool.channel(&remote).unwrap().id(), second.id());
}

#[test]
fn test_repeated_outbound_keeps_existing() {
    let (_, remote) = ordered_pair();
    let pool = ConnectionPool::new(Keypair::generate().peer_id(), 8);

    let (first, _r1) = channel(remote, Direction::Outbound, 7000);
    let (second, _r2) = channel(remote, Direction::Outbound, 7000);
    pool.register(first.clone()).unwrap();

    assert!(pool.register(second).is_err());
    assert_eq!(pool.channel(&remote).unwrap().id(), first.id());
}

#[test]
fn test_pool_limit() {
    let pool = ConnectionPool::new(Keypair::generate().peer_id(), 1);
    let (a, _ra) = channel(Keypair::generate().peer_id(), Direction::Inbound, 1);
    let (b, _rb) = channel(Keypair::generate().peer_id(), Direction::Inbound, 2);

    pool.register(a).unwrap();
    assert_eq!(pool.register(b).unwrap_err(), TransportError::MaxConnectionsReached);
}

// ============================================================================
// ADDRESS REUSE
// ============================================================================

#[test]
fn test_admit_evicts_stale_identity_on_address() {
    let local = Keypair::generate().peer_id();
    let stale = Keypair::generate().peer_id();
    let fresh = Keypair::generate().peer_id();
    let pool = ConnectionPool::new(local, 8);
    let table = InMemoryPeerTable::new();

    table.add_peer(stale, addr(7100));
    let (old, _r) = channel(stale, Direction::Outbound, 7100);
    pool.register(old.clone()).unwrap();

    pool.admit(&fresh, Direction::Inbound, addr(7100), &table).unwrap();

    assert_eq!(table.peer_address(&stale), None);
    assert!(old.is_closed());
    assert!(pool.channel(&stale).is_none());
}

#[test]
fn test_admit_refuses_duplicate_that_would_lose() {
    let (high, low) = ordered_pair();
    let pool = ConnectionPool::new(low, 8);
    let table = InMemoryPeerTable::new();
    table.add_peer(high, addr(7200));

    let (inbound, _r) = channel(high, Direction::Inbound, 7200);
    pool.register(inbound).unwrap();

    let result = pool.admit(&high, Direction::Outbound, addr(7200), &table);
    assert_eq!(result, Err(TransportError::ConnectionExists));
    // The existing mapping is untouched
    assert_eq!(table.peer_id(&addr(7200)), Some(high));
}

#[test]
fn test_admit_allows_winning_duplicate() {
    let (high, low) = ordered_pair();
    let pool = ConnectionPool::new(high, 8);
    let table = InMemoryPeerTable::new();
    table.add_peer(low, addr(7300));

    let (inbound, _r) = channel(low, Direction::Inbound, 7300);
    pool.register(inbound).unwrap();

    assert!(pool.admit(&low, Direction::Outbound, addr(7300), &table).is_ok());
}

// ============================================================================
// ROUTING
// ============================================================================

#[tokio::test]
async fn test_route_uses_live_channel() {
    let (remote, local) = ordered_pair();
    let pool = ConnectionPool::new(local, 8);
    let (ch, mut rx) = channel(remote, Direction::Inbound, 7400);
    pool.register(ch).unwrap();

    match pool.route(remote, Bytes::from_static(b"frame"), 4).unwrap() {
        Route::Channel(channel, frame) => channel.send(frame).await.unwrap(),
        Route::Queued { .. } => panic!("expected a live channel"),
    }
    assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"frame"));
}

#[test]
fn test_finish_dial_drains_queue() {
    let (remote, local) = ordered_pair();
    let pool = ConnectionPool::new(local, 8);

    assert!(matches!(
        pool.route(remote, Bytes::from_static(b"a"), 4).unwrap(),
        Route::Queued { start_dial: true }
    ));
    let (backlog, channel) = pool.finish_dial(&remote);
    assert_eq!(backlog.len(), 1);
    assert!(channel.is_none());

    // The next frame starts a new dial
    assert!(matches!(
        pool.route(remote, Bytes::from_static(b"b"), 4).unwrap(),
        Route::Queued { start_dial: true }
    ));
}
