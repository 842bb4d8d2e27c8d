// PersistentResolver - Durable content store backed by sled
//
// Intended as the large, slow inner resolver behind a DoubleCacheResolver.
// Only known payloads are persisted; pending markers are transient protocol
// state and never reach disk.

use super::content::{ContentEntry, ContentId, ContentResolver};
use std::path::Path;
use thiserror::Error;
use tracing::warn;

/// Key prefix for content payloads
const CONTENT_PREFIX: &[u8] = b"content:";

/// Errors from opening or maintaining the store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open database: {0}")]
    OpenFailed(String),

    #[error("Database operation failed: {0}")]
    DatabaseError(String),

    #[error("Flush failed: {0}")]
    FlushFailed(String),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::DatabaseError(err.to_string())
    }
}

/// sled-backed content store
///
/// Every write is atomic; durability is guaranteed after [`flush`](Self::flush).
pub struct PersistentResolver {
    db: sled::Db,
}

impl PersistentResolver {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::OpenFailed(e.to_string()))?;
        Ok(Self { db })
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::FlushFailed(e.to_string()))?;
        Ok(())
    }

    /// Number of stored payloads
    pub fn len(&self) -> usize {
        self.db.scan_prefix(CONTENT_PREFIX).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn key(id: &ContentId) -> Vec<u8> {
        [CONTENT_PREFIX, id.as_bytes().as_slice()].concat()
    }
}

impl ContentResolver for PersistentResolver {
    fn insert(&self, id: ContentId, entry: ContentEntry) {
        let ContentEntry::Data(data) = entry else {
            return;
        };
        if let Err(e) = self.db.insert(Self::key(&id), data) {
            warn!(content = %id, error = %e, "failed to persist content");
        }
    }

    fn delete(&self, id: &ContentId) {
        if let Err(e) = self.db.remove(Self::key(id)) {
            warn!(content = %id, error = %e, "failed to delete persisted content");
        }
    }

    fn content(&self, id: &ContentId) -> Option<ContentEntry> {
        match self.db.get(Self::key(id)) {
            Ok(value) => value.map(|v| ContentEntry::Data(v.to_vec())),
            Err(e) => {
                warn!(content = %id, error = %e, "failed to read persisted content");
                None
            }
        }
    }
}
