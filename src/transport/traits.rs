// Transport Traits and Core Types
// Configuration, errors, connection direction and the send primitive the
// gossip engine is written against

use crate::identity::PeerId;
use crate::wire::{Message, WireError, DEFAULT_MAX_FRAME_LEN};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// TRANSPORT CONFIG
// ============================================================================

/// Configuration for the TCP transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Address to bind to
    pub bind_address: String,
    /// Port to bind to (0 for random)
    pub bind_port: u16,
    /// Maximum number of pooled channels
    pub max_connections: usize,
    /// Timeout for a single TCP connect attempt
    pub connect_timeout_ms: u64,
    /// Timeout for the identity handshake
    pub handshake_timeout_ms: u64,
    /// Timeout for handing one message to the network
    pub send_timeout_ms: u64,
    /// Upper bound on a single frame
    pub max_frame_len: usize,
    /// Outbound frames buffered per channel
    pub channel_buffer: usize,
    /// Enable TCP_NODELAY
    pub nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            bind_port: 0,
            max_connections: 256,
            connect_timeout_ms: 5_000,
            handshake_timeout_ms: 5_000,
            send_timeout_ms: 5_000,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            channel_buffer: 128,
            nodelay: true,
        }
    }
}

impl TransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bind_address(mut self, addr: &str) -> Self {
        self.bind_address = addr.to_string();
        self
    }

    pub fn with_bind_port(mut self, port: u16) -> Self {
        self.bind_port = port;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.max_connections == 0 {
            return Err(TransportError::InvalidConfig("max_connections cannot be 0".to_string()));
        }
        if self.channel_buffer == 0 {
            return Err(TransportError::InvalidConfig("channel_buffer cannot be 0".to_string()));
        }
        if self.max_frame_len == 0 {
            return Err(TransportError::InvalidConfig("max_frame_len cannot be 0".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// DIRECTION
// ============================================================================

/// Which side dialled a connection, from the local point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// The remote peer dialled us
    Inbound,
    /// We dialled the remote peer
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => f.write_str("inbound"),
            Self::Outbound => f.write_str("outbound"),
        }
    }
}

// ============================================================================
// TRANSPORT ERRORS
// ============================================================================

/// Errors that can occur in the transport layer
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Peer not found: {0}")]
    PeerNotFound(PeerId),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Connection already exists")]
    ConnectionExists,

    #[error("Maximum connections reached")]
    MaxConnectionsReached,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl TransportError {
    /// Check if the operation can be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::ConnectionFailed(_)
                | Self::SendFailed(_)
                | Self::Handshake(_)
                | Self::Io(_)
        )
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<WireError> for TransportError {
    fn from(e: WireError) -> Self {
        Self::Codec(e.to_string())
    }
}

// ============================================================================
// SEND PRIMITIVE
// ============================================================================

/// Delivers a message to a peer, dialling if no channel exists yet.
///
/// The gossip engine treats this as a black box: success or an error.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, peer: &PeerId, addr: SocketAddr, msg: Message) -> Result<(), TransportError>;
}
