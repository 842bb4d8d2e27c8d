// Peer module - THE ADDRESS BOOK
// Peer identities to addresses, and subnet membership

mod table;

pub use table::{InMemoryPeerTable, PeerTable, SubnetId};
