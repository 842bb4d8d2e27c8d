// Transport module - Authenticated TCP channels between peers
// One pooled channel per peer, arbitrated when both ends dial at once

mod handshake;
mod pool;
mod tcp;
mod traits;

pub use traits::{
    // Configuration
    TransportConfig,
    // Connection direction
    Direction,
    // Errors
    TransportError,
    // Send primitive
    MessageSender,
};

pub use handshake::{Handshake, HandshakeError, HandshakeOutcome, SignedHandshake};

pub use pool::{tie_break, Channel, ConnectionPool, Registered, Route};

pub use tcp::{InboundMessage, TcpTransport, TransportStats};
