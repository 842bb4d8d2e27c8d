// Message - Wire envelope for gossip traffic
//
// Every frame carries a version, a type tag and an opaque payload:
// - Push / Pull: a 32-byte content id
// - Sync: the content bytes being delivered
// - Direct: an application message, outside dissemination

use crate::resolver::ContentId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Current wire version
pub const VERSION_1: u16 = 1;

/// Wire errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),

    #[error("Unknown or reserved message type: {0}")]
    InvalidType(u16),
}

/// Types of messages in the protocol. Tags 0 and 1 are reserved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    /// "I have content with this id"
    Push = 2,
    /// "Send me the payload for this id"
    Pull = 3,
    /// "Here is the payload"
    Sync = 4,
    /// Point-to-point application message
    Direct = 5,
}

impl MessageType {
    pub fn tag(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for MessageType {
    type Error = WireError;

    fn try_from(tag: u16) -> Result<Self, Self::Error> {
        match tag {
            2 => Ok(Self::Push),
            3 => Ok(Self::Pull),
            4 => Ok(Self::Sync),
            5 => Ok(Self::Direct),
            other => Err(WireError::InvalidType(other)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Push => "push",
            Self::Pull => "pull",
            Self::Sync => "sync",
            Self::Direct => "direct",
        };
        f.write_str(name)
    }
}

#[derive(Serialize, Deserialize)]
struct RawMessage {
    version: u16,
    msg_type: u16,
    data: Vec<u8>,
}

/// A gossip protocol message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub version: u16,
    pub msg_type: MessageType,
    pub data: Vec<u8>,
}

impl Message {
    pub fn new(msg_type: MessageType, data: Vec<u8>) -> Self {
        Self {
            version: VERSION_1,
            msg_type,
            data,
        }
    }

    /// Announce a content id
    pub fn push(id: &ContentId) -> Self {
        Self::new(MessageType::Push, id.as_bytes().to_vec())
    }

    /// Request the payload for a content id
    pub fn pull(id: &ContentId) -> Self {
        Self::new(MessageType::Pull, id.as_bytes().to_vec())
    }

    /// Deliver a payload
    pub fn sync(data: Vec<u8>) -> Self {
        Self::new(MessageType::Sync, data)
    }

    /// Point-to-point application data
    pub fn direct(data: Vec<u8>) -> Self {
        Self::new(MessageType::Direct, data)
    }

    /// Interpret the payload as a content id (push and pull)
    pub fn content_id(&self) -> Option<ContentId> {
        ContentId::from_slice(&self.data)
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        let raw = RawMessage {
            version: self.version,
            msg_type: self.msg_type.tag(),
            data: self.data.clone(),
        };
        postcard::to_allocvec(&raw).map_err(|e| WireError::SerializationFailed(e.to_string()))
    }

    /// Deserialize from bytes, rejecting unknown versions and reserved types
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let raw: RawMessage = postcard::from_bytes(bytes)
            .map_err(|e| WireError::DeserializationFailed(e.to_string()))?;
        if raw.version != VERSION_1 {
            return Err(WireError::UnsupportedVersion(raw.version));
        }
        Ok(Self {
            version: raw.version,
            msg_type: MessageType::try_from(raw.msg_type)?,
            data: raw.data,
        })
    }
}
