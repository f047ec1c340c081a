//! Offline-first caching layer for server-owned records.
//!
//! This module provides a domain-agnostic caching mechanism that:
//! - Persists every successful list fetch into a business-scoped local store
//! - Serves lists from the store when offline or when the server fails,
//!   applying the same search/filter/sort/pagination the server would
//! - Searches the local store first, reaching for the server only on a miss
//! - Tracks when each entity type was last fully refreshed

pub mod filter;
mod layer;
mod storage;
mod sync;
mod traits;

pub use filter::{ListParams, Page, Pagination, SortOrder};
pub use layer::{require_scope, CacheLayer};
pub use storage::{CacheStorage, SqliteStorage};
pub use sync::{StalenessPolicy, SyncMetadataStore};
pub use traits::{BusinessId, CacheResult, CacheSource, Cacheable, EntityType, RemoteAccessor};
