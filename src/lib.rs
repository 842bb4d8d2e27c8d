//! gossipmesh - epidemic content dissemination for peer-to-peer networks
//!
//! A node announces content with `Push(id)`, peers that have not seen the id
//! answer with `Pull(id)`, and the holder delivers the payload with `Sync`.
//! Duplicate work is suppressed by a bounded two-generation content cache.
//! Connections are authenticated and arbitrated so that at most one channel
//! exists between any two peers, even when both dial at once.
//!
//! ```text
//! node ── gossip ── resolver   (double cache, optional sled store)
//!   │        └───── peer       (address book, subnets)
//!   └── transport ── pool      (one channel per peer, tie break)
//!            ├────── handshake (signed challenge)
//!            └────── policy    (dial retries)
//! ```

pub mod gossip;
pub mod identity;
pub mod node;
pub mod peer;
pub mod policy;
pub mod resolver;
pub mod task;
pub mod transport;
pub mod wire;

pub use gossip::{GossipConfig, GossipEngine, GossipError, GossipEvent};
pub use identity::{Keypair, PeerId};
pub use node::{Node, NodeConfig, NodeError};
pub use peer::{InMemoryPeerTable, PeerTable, SubnetId};
pub use resolver::{ContentEntry, ContentId, ContentResolver, DoubleCacheResolver};
pub use transport::{MessageSender, TcpTransport, TransportConfig, TransportError};
pub use wire::{Message, MessageType};
