// Handshake - Authenticate the remote end of a raw connection
//
// Runs on a freshly framed stream before any gossip traffic. Yields the
// remote's identity and the listen address it announces; the pool uses both
// for arbitration and the address-reuse check.

use super::traits::Direction;
use crate::identity::{Keypair, KeypairError, PeerId, PublicKey};
use crate::wire::{self, CodecError, Framing};
use async_trait::async_trait;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpStream;

const HANDSHAKE_VERSION: u16 = 1;
const DOMAIN: &[u8] = b"gossipmesh-handshake-v1:";

/// Handshake errors
#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Malformed handshake message: {0}")]
    Malformed(String),

    #[error("Unsupported handshake version: {0}")]
    UnsupportedVersion(u16),

    #[error("Invalid public key: {0}")]
    InvalidKey(#[from] KeypairError),

    #[error("Unexpected peer: expected {expected}, got {actual}")]
    UnexpectedPeer { expected: PeerId, actual: PeerId },

    #[error("Refusing connection to self")]
    SelfConnection,
}

/// Result of a successful handshake
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandshakeOutcome {
    /// Authenticated identity of the remote
    pub peer: PeerId,
    /// Address the remote says it listens on
    pub listen_addr: SocketAddr,
}

/// Authenticates a raw connection
#[async_trait]
pub trait Handshake: Send + Sync {
    /// `expected` is the identity we meant to reach when dialling
    async fn handshake(
        &self,
        framing: &mut Framing<TcpStream>,
        direction: Direction,
        expected: Option<PeerId>,
    ) -> Result<HandshakeOutcome, HandshakeError>;
}

// ============================================================================
// SIGNED CHALLENGE HANDSHAKE
// ============================================================================

#[derive(Serialize, Deserialize)]
struct Hello {
    version: u16,
    public_key: [u8; 32],
    listen_addr: SocketAddr,
    nonce: [u8; 32],
}

#[derive(Serialize, Deserialize)]
struct Proof {
    signature: Vec<u8>,
}

/// Each side sends a fresh nonce, then proves possession of its key by
/// signing the other side's nonce. Both sides run the same steps, so the
/// exchange is symmetric regardless of direction.
pub struct SignedHandshake {
    keypair: Keypair,
    listen_addr: SocketAddr,
}

impl SignedHandshake {
    pub fn new(keypair: Keypair, listen_addr: SocketAddr) -> Self {
        Self { keypair, listen_addr }
    }

    fn transcript(nonce: &[u8; 32], signer: &PublicKey) -> Vec<u8> {
        [DOMAIN, nonce.as_slice(), signer.as_bytes().as_slice()].concat()
    }
}

async fn send<T: Serialize>(framing: &mut Framing<TcpStream>, value: &T) -> Result<(), HandshakeError> {
    let bytes = postcard::to_allocvec(value).map_err(|e| HandshakeError::Malformed(e.to_string()))?;
    wire::write_frame(framing, bytes.into()).await?;
    Ok(())
}

async fn recv<T: for<'de> Deserialize<'de>>(framing: &mut Framing<TcpStream>) -> Result<T, HandshakeError> {
    let frame = wire::read_frame(framing).await?;
    postcard::from_bytes(&frame).map_err(|e| HandshakeError::Malformed(e.to_string()))
}

#[async_trait]
impl Handshake for SignedHandshake {
    async fn handshake(
        &self,
        framing: &mut Framing<TcpStream>,
        _direction: Direction,
        expected: Option<PeerId>,
    ) -> Result<HandshakeOutcome, HandshakeError> {
        let mut nonce = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut nonce);
        let own_key = self.keypair.public_key();

        send(
            framing,
            &Hello {
                version: HANDSHAKE_VERSION,
                public_key: *own_key.as_bytes(),
                listen_addr: self.listen_addr,
                nonce,
            },
        )
        .await?;

        let hello: Hello = recv(framing).await?;
        if hello.version != HANDSHAKE_VERSION {
            return Err(HandshakeError::UnsupportedVersion(hello.version));
        }
        let remote_key = PublicKey::from_bytes(&hello.public_key)?;
        let remote = remote_key.peer_id();

        if remote == own_key.peer_id() {
            return Err(HandshakeError::SelfConnection);
        }
        if let Some(expected) = expected {
            if expected != remote {
                return Err(HandshakeError::UnexpectedPeer {
                    expected,
                    actual: remote,
                });
            }
        }

        let signature = self.keypair.sign(&Self::transcript(&hello.nonce, &own_key));
        send(
            framing,
            &Proof {
                signature: signature.to_vec(),
            },
        )
        .await?;

        let proof: Proof = recv(framing).await?;
        remote_key.verify(&Self::transcript(&nonce, &remote_key), &proof.signature)?;

        Ok(HandshakeOutcome {
            peer: remote,
            listen_addr: hello.listen_addr,
        })
    }
}
