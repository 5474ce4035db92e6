//! TTL Cache - An embedded key/value cache
//!
//! Named tables of entries that expire after going unread for their life span,
//! with lazy loading on miss and lifecycle callbacks.

pub mod cache;
pub mod config;
pub mod error;
mod tasks;

pub use cache::{cache, CacheEntry, CacheTable, Registry};
pub use config::Config;
pub use error::{CacheError, Hook, Result};
