// Content - Content identifiers and the resolver capability
//
// A resolver is a content-addressed key-value store. The gossip engine uses the
// found / pending / missing distinction as its only deduplication mechanism.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// CONTENT ID
// ============================================================================

/// SHA-256 of a content payload. Used as the cache key and as the reference
/// carried by push and pull messages.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentId([u8; 32]);

impl ContentId {
    /// Hash a payload into its content id
    pub fn of(data: &[u8]) -> Self {
        let result = Sha256::digest(data);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&result);
        Self(bytes)
    }

    /// Create from raw bytes
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse an id received on the wire. Anything other than 32 bytes is rejected.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self)
    }
}

// ============================================================================
// CONTENT ENTRY
// ============================================================================

/// Value held for a content id
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContentEntry {
    /// A pull for this id is outstanding; no payload yet
    Pending,
    /// The payload is known
    Data(Vec<u8>),
}

impl ContentEntry {
    /// Payload bytes, if known
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::Data(data) => Some(data),
            Self::Pending => None,
        }
    }

    /// Check if this is a pending marker
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Payload length (0 for a pending marker)
    pub fn payload_len(&self) -> usize {
        self.data().map_or(0, <[u8]>::len)
    }
}

/// Outcome of [`ContentResolver::complete`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completion {
    /// A pending marker was replaced by the payload
    Resolved,
    /// The payload was already known; nothing changed
    AlreadyKnown,
    /// No entry existed for the id; nothing changed
    Unsolicited,
    /// The payload cannot be held, so the pending marker was dropped
    Rejected,
}

// ============================================================================
// RESOLVER TRAIT
// ============================================================================

/// Content-addressed store shared by many concurrent tasks.
///
/// `insert_if_absent` and `complete` have default implementations composed
/// from the three primitive operations. Those are not atomic; implementations
/// that are shared between concurrent handlers must override them.
pub trait ContentResolver: Send + Sync {
    /// Store an entry under `id`
    fn insert(&self, id: ContentId, entry: ContentEntry);

    /// Remove `id`; no-op if absent
    fn delete(&self, id: &ContentId);

    /// Look up `id`
    fn content(&self, id: &ContentId) -> Option<ContentEntry>;

    /// Store `entry` only if nothing is stored under `id`. Returns true if it
    /// was stored.
    fn insert_if_absent(&self, id: ContentId, entry: ContentEntry) -> bool {
        if self.content(&id).is_some() {
            return false;
        }
        self.insert(id, entry);
        true
    }

    /// Replace a pending marker for `id` with `data`
    fn complete(&self, id: ContentId, data: Vec<u8>) -> Completion {
        match self.content(&id) {
            None => Completion::Unsolicited,
            Some(ContentEntry::Data(_)) => Completion::AlreadyKnown,
            Some(ContentEntry::Pending) => {
                self.insert(id, ContentEntry::Data(data));
                Completion::Resolved
            }
        }
    }
}

impl<R: ContentResolver + ?Sized> ContentResolver for Arc<R> {
    fn insert(&self, id: ContentId, entry: ContentEntry) {
        (**self).insert(id, entry)
    }

    fn delete(&self, id: &ContentId) {
        (**self).delete(id)
    }

    fn content(&self, id: &ContentId) -> Option<ContentEntry> {
        (**self).content(id)
    }

    fn insert_if_absent(&self, id: ContentId, entry: ContentEntry) -> bool {
        (**self).insert_if_absent(id, entry)
    }

    fn complete(&self, id: ContentId, data: Vec<u8>) -> Completion {
        (**self).complete(id, data)
    }
}

// ============================================================================
// CALLBACK RESOLVER
// ============================================================================

type InsertFn = Box<dyn Fn(&ContentId, &ContentEntry) + Send + Sync>;
type DeleteFn = Box<dyn Fn(&ContentId) + Send + Sync>;
type ContentFn = Box<dyn Fn(&ContentId) -> Option<ContentEntry> + Send + Sync>;

/// Resolver that delegates every operation to optional closures.
///
/// Unset callbacks are no-ops and `content` then reports not-found. Mostly
/// useful for observing what a layered resolver forwards to its inner store.
#[derive(Default)]
pub struct CallbackResolver {
    on_insert: Option<InsertFn>,
    on_delete: Option<DeleteFn>,
    on_content: Option<ContentFn>,
}

impl CallbackResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_insert(mut self, f: impl Fn(&ContentId, &ContentEntry) + Send + Sync + 'static) -> Self {
        self.on_insert = Some(Box::new(f));
        self
    }

    pub fn on_delete(mut self, f: impl Fn(&ContentId) + Send + Sync + 'static) -> Self {
        self.on_delete = Some(Box::new(f));
        self
    }

    pub fn on_content(
        mut self,
        f: impl Fn(&ContentId) -> Option<ContentEntry> + Send + Sync + 'static,
    ) -> Self {
        self.on_content = Some(Box::new(f));
        self
    }
}

impl ContentResolver for CallbackResolver {
    fn insert(&self, id: ContentId, entry: ContentEntry) {
        if let Some(f) = &self.on_insert {
            f(&id, &entry);
        }
    }

    fn delete(&self, id: &ContentId) {
        if let Some(f) = &self.on_delete {
            f(id);
        }
    }

    fn content(&self, id: &ContentId) -> Option<ContentEntry> {
        self.on_content.as_ref().and_then(|f| f(id))
    }
}

impl fmt::Debug for CallbackResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackResolver")
            .field("on_insert", &self.on_insert.is_some())
            .field("on_delete", &self.on_delete.is_some())
            .field("on_content", &self.on_content.is_some())
            .finish()
    }
}
