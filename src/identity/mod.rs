// Identity module - Ed25519 keypairs and peer identities

mod keypair;
mod peer_id;

pub use keypair::{Keypair, KeypairError, PublicKey};
pub use peer_id::{PeerId, PeerIdError, ShortPeerId};
