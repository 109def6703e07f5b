//! Result cache subsystem.
//!
//! # Data Flow
//! ```text
//! get(key):
//!     → local layer (DashMap, lazy expiry on read)
//!     → on miss: shared store "cache:{key}" (read-through, populates local)
//!     → miss
//!
//! set(key, value, ttl):
//!     → shared store (TTL enforced by the store)
//!     → local layer
//!
//! sweeper task: drops expired local entries every sweep_interval_secs
//! ```
//!
//! # Design Decisions
//! - Expiry only, no size-based eviction
//! - Per-key writes replace the whole entry, so age and TTL never tear
//! - The shared store is best effort; the cache never fails a dispatch

pub mod entry;
pub mod store;
pub mod ttl;

pub use entry::{CacheEntry, CachedValue};
pub use store::{MemoryStore, SharedStore, StoreError};
pub use ttl::{cache_key, TtlCache};
