//! Callback Module
//!
//! Strategy traits for the hooks a table or entry can be given. Each trait has a
//! single method and a blanket implementation for matching closures, so callers can
//! pass either a closure or a dedicated type.
//!
//! Hooks run synchronously on the worker of the operation that triggered them, with
//! the table lock released. A hook may call back into the same table.

use std::any::Any;
use std::fmt;

use crate::cache::CacheEntry;

/// Extra arguments forwarded from [`CacheTable::value_with`](crate::cache::CacheTable::value_with)
/// to the data loader.
pub type LoadArg<'a> = &'a (dyn Any + Send + Sync);

// == Data Loader ==
/// Materializes an entry for a key that missed.
pub trait DataLoader<K, V>: Send + Sync {
    /// Returns `Ok(None)` when the key cannot be loaded.
    ///
    /// The returned entry's value, life span and expire callback are stored under the
    /// requested key.
    fn load(&self, key: &K, args: &[LoadArg<'_>]) -> anyhow::Result<Option<CacheEntry<K, V>>>;
}

impl<K, V, F> DataLoader<K, V> for F
where
    F: Fn(&K, &[LoadArg<'_>]) -> anyhow::Result<Option<CacheEntry<K, V>>> + Send + Sync,
{
    fn load(&self, key: &K, args: &[LoadArg<'_>]) -> anyhow::Result<Option<CacheEntry<K, V>>> {
        self(key, args)
    }
}

// == Added Item ==
/// Runs after an entry has been inserted.
pub trait AddedItemCallback<K, V>: Send + Sync {
    fn added(&self, entry: &CacheEntry<K, V>) -> anyhow::Result<()>;
}

impl<K, V, F> AddedItemCallback<K, V> for F
where
    F: Fn(&CacheEntry<K, V>) -> anyhow::Result<()> + Send + Sync,
{
    fn added(&self, entry: &CacheEntry<K, V>) -> anyhow::Result<()> {
        self(entry)
    }
}

// == About To Delete ==
/// Runs before an entry leaves the table, ahead of the entry's own expire callback.
pub trait AboutToDeleteCallback<K, V>: Send + Sync {
    fn about_to_delete(&self, entry: &CacheEntry<K, V>) -> anyhow::Result<()>;
}

impl<K, V, F> AboutToDeleteCallback<K, V> for F
where
    F: Fn(&CacheEntry<K, V>) -> anyhow::Result<()> + Send + Sync,
{
    fn about_to_delete(&self, entry: &CacheEntry<K, V>) -> anyhow::Result<()> {
        self(entry)
    }
}

// == About To Expire ==
/// Per-entry hook, run with the key right before the entry is removed.
pub trait AboutToExpireCallback<K>: Send + Sync {
    fn about_to_expire(&self, key: &K) -> anyhow::Result<()>;
}

impl<K, F> AboutToExpireCallback<K> for F
where
    F: Fn(&K) -> anyhow::Result<()> + Send + Sync,
{
    fn about_to_expire(&self, key: &K) -> anyhow::Result<()> {
        self(key)
    }
}

// == Logger ==
/// Sink for a table's trace lines (adds, deletes, sweeps, flushes).
pub trait CacheLogger: Send + Sync {
    fn log(&self, args: fmt::Arguments<'_>);
}

impl<F> CacheLogger for F
where
    F: Fn(fmt::Arguments<'_>) + Send + Sync,
{
    fn log(&self, args: fmt::Arguments<'_>) {
        self(args)
    }
}

/// Forwards table trace lines to `tracing` at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl CacheLogger for TracingLogger {
    fn log(&self, args: fmt::Arguments<'_>) {
        tracing::debug!(target: "ttl_cache::table", "{}", args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn test_closure_loader_sees_args() {
        let loader = |key: &String,
                      args: &[LoadArg<'_>]|
         -> anyhow::Result<Option<CacheEntry<String, String>>> {
            let suffix = args
                .first()
                .and_then(|arg| arg.downcast_ref::<&str>())
                .copied()
                .unwrap_or("");
            Ok(Some(CacheEntry::new(
                key.clone(),
                Duration::ZERO,
                format!("{key}{suffix}"),
            )))
        };

        let key = "user".to_string();
        let loaded = DataLoader::load(&loader, &key, &[&"-42"]).unwrap().unwrap();
        assert_eq!(loaded.value(), "user-42");
    }

    #[test]
    fn test_closure_logger_receives_lines() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let logger = move |args: fmt::Arguments<'_>| sink.lock().unwrap().push(args.to_string());

        logger.log(format_args!("Adding item with key {:?}", "k1"));

        assert_eq!(*lines.lock().unwrap(), vec!["Adding item with key \"k1\"".to_string()]);
    }
}
