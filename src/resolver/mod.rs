// Resolver module - CONTENT DEDUPLICATION
// Content-addressed stores: the bounded double cache, a callback resolver and
// a sled-backed persistent store that can sit behind the cache.

mod content;
mod double_cache;
mod persistent;

pub use content::{CallbackResolver, Completion, ContentEntry, ContentId, ContentResolver};
pub use double_cache::{DoubleCacheConfig, DoubleCacheResolver, ENTRY_OVERHEAD};
pub use persistent::{PersistentResolver, StoreError};
