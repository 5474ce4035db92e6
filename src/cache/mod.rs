//! Cache Module
//!
//! Provides named cache tables with per-entry TTL expiration, lazy loading on miss
//! and lifecycle callbacks.

mod callbacks;
mod entry;
mod registry;
mod table;


// Re-export public types
pub use callbacks::{
    AboutToDeleteCallback, AboutToExpireCallback, AddedItemCallback, CacheLogger, DataLoader,
    LoadArg, TracingLogger,
};
pub use entry::CacheEntry;
pub use registry::{cache, Registry};
pub use table::CacheTable;
