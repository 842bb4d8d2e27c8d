// Double Cache - Bounded content resolver with two-generation eviction
//
// New entries go to the current generation. When an insert would take the
// current generation over capacity, current is demoted to previous (the old
// previous is dropped) and the insert starts a fresh current generation.
// Lookups check current, then previous.

use super::content::{Completion, ContentEntry, ContentId, ContentResolver};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Fixed bookkeeping charge added to every entry's payload length when it is
/// measured against the capacity.
pub const ENTRY_OVERHEAD: usize = 10;

/// Configuration for [`DoubleCacheResolver`]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DoubleCacheConfig {
    /// Maximum aggregate size of one generation, in bytes
    pub capacity: usize,
}

impl Default for DoubleCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 16 * 1024 * 1024,
        }
    }
}

impl DoubleCacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

#[derive(Default)]
struct Generation {
    entries: HashMap<ContentId, ContentEntry>,
    size: usize,
}

impl Generation {
    fn insert(&mut self, id: ContentId, entry: ContentEntry) {
        self.size += entry_size(&entry);
        if let Some(old) = self.entries.insert(id, entry) {
            self.size -= entry_size(&old);
        }
    }

    fn remove(&mut self, id: &ContentId) -> Option<ContentEntry> {
        let removed = self.entries.remove(id)?;
        self.size -= entry_size(&removed);
        Some(removed)
    }
}

struct Generations {
    current: Generation,
    previous: Generation,
}

impl Generations {
    fn get(&self, id: &ContentId) -> Option<&ContentEntry> {
        self.current
            .entries
            .get(id)
            .or_else(|| self.previous.entries.get(id))
    }

    /// Remove from both generations so a rewrite never leaves a stale copy behind.
    fn remove(&mut self, id: &ContentId) {
        self.current.remove(id);
        self.previous.remove(id);
    }

    /// Returns false if the entry can never fit a generation and was dropped.
    fn store(&mut self, id: ContentId, entry: ContentEntry, capacity: usize) -> bool {
        let size = entry_size(&entry);
        if size > capacity {
            trace!(content = %id, size, capacity, "dropping oversized entry");
            return false;
        }

        self.remove(&id);
        if self.current.size + size > capacity {
            self.previous = std::mem::take(&mut self.current);
            trace!(content = %id, "rotated cache generation");
        }
        self.current.insert(id, entry);
        true
    }
}

fn entry_size(entry: &ContentEntry) -> usize {
    entry.payload_len() + ENTRY_OVERHEAD
}

/// Bounded, thread-safe content resolver.
///
/// An optional inner resolver sees every `insert`, `delete` and `content`
/// call exactly once. Its answers are ignored; this cache alone decides
/// found / not-found. Inner calls happen after the lock is released.
pub struct DoubleCacheResolver {
    config: DoubleCacheConfig,
    generations: Mutex<Generations>,
    inner: Option<Arc<dyn ContentResolver>>,
}

impl DoubleCacheResolver {
    pub fn new(config: DoubleCacheConfig, inner: Option<Arc<dyn ContentResolver>>) -> Self {
        Self {
            config,
            generations: Mutex::new(Generations {
                current: Generation::default(),
                previous: Generation::default(),
            }),
            inner,
        }
    }

    /// Configured per-generation capacity
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Number of ids resident across both generations
    pub fn len(&self) -> usize {
        let gens = self.generations.lock();
        gens.current.entries.len() + gens.previous.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Accounted size across both generations
    pub fn resident_size(&self) -> usize {
        let gens = self.generations.lock();
        gens.current.size + gens.previous.size
    }

    fn forward_insert(&self, id: ContentId, entry: ContentEntry) {
        if let Some(inner) = &self.inner {
            inner.insert(id, entry);
        }
    }
}

impl ContentResolver for DoubleCacheResolver {
    fn insert(&self, id: ContentId, entry: ContentEntry) {
        let forwarded = self.inner.as_ref().map(|_| entry.clone());
        let _ = self.generations.lock().store(id, entry, self.config.capacity);
        if let Some(entry) = forwarded {
            self.forward_insert(id, entry);
        }
    }

    fn delete(&self, id: &ContentId) {
        self.generations.lock().remove(id);
        if let Some(inner) = &self.inner {
            inner.delete(id);
        }
    }

    fn content(&self, id: &ContentId) -> Option<ContentEntry> {
        let found = self.generations.lock().get(id).cloned();
        if let Some(inner) = &self.inner {
            let _ = inner.content(id);
        }
        found
    }

    fn insert_if_absent(&self, id: ContentId, entry: ContentEntry) -> bool {
        let forwarded = self.inner.as_ref().map(|_| entry.clone());
        {
            let mut gens = self.generations.lock();
            if gens.get(&id).is_some() {
                return false;
            }
            let _ = gens.store(id, entry, self.config.capacity);
        }
        if let Some(entry) = forwarded {
            self.forward_insert(id, entry);
        }
        true
    }

    fn complete(&self, id: ContentId, data: Vec<u8>) -> Completion {
        let forwarded = self.inner.as_ref().map(|_| data.clone());
        let stored = {
            let mut gens = self.generations.lock();
            match gens.get(&id) {
                None => return Completion::Unsolicited,
                Some(ContentEntry::Data(_)) => return Completion::AlreadyKnown,
                Some(ContentEntry::Pending) => {}
            }
            let stored = gens.store(id, ContentEntry::Data(data), self.config.capacity);
            if !stored {
                gens.remove(&id);
            }
            stored
        };

        if !stored {
            if let Some(inner) = &self.inner {
                inner.delete(&id);
            }
            return Completion::Rejected;
        }
        if let Some(data) = forwarded {
            self.forward_insert(id, ContentEntry::Data(data));
        }
        Completion::Resolved
    }
}

impl std::fmt::Debug for DoubleCacheResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoubleCacheResolver")
            .field("capacity", &self.config.capacity)
            .field("len", &self.len())
            .field("has_inner", &self.inner.is_some())
            .finish()
    }
}
