//! Cache Table Module
//!
//! A named, independently locked collection of entries with a self-adjusting
//! expiration timer.
//!
//! # Locking
//! The entry map sits behind the table's `RwLock`; each entry's access metadata sits
//! behind the entry's own lock. Hooks (`added`, `about_to_delete`, `about_to_expire`)
//! always run with the table lock released so they can call back into the table. While
//! a hook runs, other callers may observe an insertion that has not yet reported to
//! its hook, or an entry whose removal is already under way.
//!
//! # Expiration
//! There is no periodic scan. Every sweep computes the time left until the next entry
//! can expire and arms a single one-shot timer for exactly that long. Inserting an entry
//! that expires sooner than the armed timer triggers an immediate sweep, which re-arms.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{RwLock, RwLockWriteGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::warn;

use crate::cache::callbacks::{
    AboutToDeleteCallback, AddedItemCallback, CacheLogger, DataLoader, LoadArg,
};
use crate::cache::CacheEntry;
use crate::error::{CacheError, Hook, Result};
use crate::tasks::spawn_expiration_timer;

type WriteGuard<'a, K, V> = RwLockWriteGuard<'a, TableInner<K, V>>;

// == Cache Table ==
/// A named cache table.
///
/// Tables are always handled through an `Arc` (see [`CacheTable::new`]) because the
/// expiration timer needs a handle back to its table.
pub struct CacheTable<K, V> {
    name: String,
    inner: RwLock<TableInner<K, V>>,
    this: Weak<CacheTable<K, V>>,
}

struct TableInner<K, V> {
    items: HashMap<K, Arc<CacheEntry<K, V>>>,
    /// Delay the current timer was armed with, zero when idle
    cleanup_interval: Duration,
    cleanup_deadline: Option<Instant>,
    cleanup_timer: Option<JoinHandle<()>>,
    logger: Option<Arc<dyn CacheLogger>>,
    load_data: Option<Arc<dyn DataLoader<K, V>>>,
    added_item: Option<Arc<dyn AddedItemCallback<K, V>>>,
    about_to_delete_item: Option<Arc<dyn AboutToDeleteCallback<K, V>>>,
}

impl<K, V> TableInner<K, V> {
    fn new() -> Self {
        Self {
            items: HashMap::new(),
            cleanup_interval: Duration::ZERO,
            cleanup_deadline: None,
            cleanup_timer: None,
            logger: None,
            load_data: None,
            added_item: None,
            about_to_delete_item: None,
        }
    }

    fn log(&self, args: fmt::Arguments<'_>) {
        if let Some(logger) = &self.logger {
            logger.log(args);
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.cleanup_timer.take() {
            timer.abort();
        }
        self.cleanup_deadline = None;
    }

    /// Time until the armed timer fires, `None` when idle.
    fn until_next_sweep(&self, now: Instant) -> Option<Duration> {
        self.cleanup_deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }
}

impl<K, V> Drop for TableInner<K, V> {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

/// Keeps an entry claimed for removal; gives the claim back unless completed.
struct RemovalClaim<'a, K, V> {
    entry: &'a CacheEntry<K, V>,
    completed: bool,
}

impl<'a, K, V> RemovalClaim<'a, K, V> {
    fn complete(mut self) {
        self.completed = true;
    }
}

impl<K, V> Drop for RemovalClaim<'_, K, V> {
    fn drop(&mut self) {
        if !self.completed {
            self.entry.release_removal();
        }
    }
}

impl<K, V> CacheTable<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates an empty, idle table.
    ///
    /// Most callers obtain tables through [`Registry`](crate::cache::Registry) or
    /// [`cache`](fn@crate::cache::cache) instead, which keep one table per name.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|this| Self {
            name,
            inner: RwLock::new(TableInner::new()),
            this: this.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // == Count ==
    /// Returns how many entries the table holds.
    pub async fn count(&self) -> usize {
        self.inner.read().await.items.len()
    }

    // == Foreach ==
    /// Calls `f` for every entry while holding the table's shared lock.
    ///
    /// `f` must not add or delete entries on this table.
    pub async fn foreach<F>(&self, mut f: F)
    where
        F: FnMut(&K, &Arc<CacheEntry<K, V>>),
    {
        let inner = self.inner.read().await;
        for (key, entry) in &inner.items {
            f(key, entry);
        }
    }

    // == Exists ==
    /// Returns whether `key` is present.
    ///
    /// Unlike [`value`](Self::value), this neither consults the data loader nor keeps
    /// the entry alive.
    pub async fn exists(&self, key: &K) -> bool {
        self.inner.read().await.items.contains_key(key)
    }

    // == Most Accessed ==
    /// Returns up to `count` entries, most accessed first.
    ///
    /// Access counts are snapshotted once; entries with equal counts come in no
    /// particular order.
    pub async fn most_accessed(&self, count: usize) -> Vec<Arc<CacheEntry<K, V>>> {
        let inner = self.inner.read().await;

        let mut pairs: Vec<(u64, &Arc<CacheEntry<K, V>>)> = inner
            .items
            .values()
            .map(|entry| (entry.access_count(), entry))
            .collect();
        pairs.sort_by(|a, b| b.0.cmp(&a.0));

        pairs
            .into_iter()
            .take(count)
            .map(|(_, entry)| Arc::clone(entry))
            .collect()
    }

    // == Add ==
    /// Stores `value` under `key`, replacing any existing entry.
    ///
    /// An entry with a non-zero `life_span` is removed once it has gone unread for
    /// that long. The added-item hook runs after insertion; if it fails the entry stays
    /// in the table and the failure is returned.
    pub async fn add(&self, key: K, life_span: Duration, value: V) -> Result<Arc<CacheEntry<K, V>>> {
        let entry = Arc::new(CacheEntry::new(key, life_span, value));
        let inner = self.inner.write().await;
        self.add_internal(inner, entry).await
    }

    // == Not Found Add ==
    /// Stores `value` only if `key` is absent. Returns whether it was stored.
    ///
    /// The presence check and the insertion happen under one write lock.
    pub async fn not_found_add(&self, key: K, life_span: Duration, value: V) -> Result<bool> {
        let inner = self.inner.write().await;
        if inner.items.contains_key(&key) {
            return Ok(false);
        }

        let entry = Arc::new(CacheEntry::new(key, life_span, value));
        self.add_internal(inner, entry).await.map(|_| true)
    }

    /// Inserts `entry`, then releases the lock to run the added-item hook and, if the
    /// entry expires before the armed timer would fire, an immediate sweep.
    async fn add_internal(
        &self,
        mut inner: WriteGuard<'_, K, V>,
        entry: Arc<CacheEntry<K, V>>,
    ) -> Result<Arc<CacheEntry<K, V>>> {
        inner.log(format_args!(
            "Adding item with key {:?} and lifespan of {:?} to table {}",
            entry.key(),
            entry.life_span(),
            self.name
        ));
        inner.items.insert(entry.key().clone(), Arc::clone(&entry));

        let until_next_sweep = inner.until_next_sweep(Instant::now());
        let added_item = inner.added_item.clone();
        drop(inner);

        let hook_result = match added_item {
            Some(callback) => callback
                .added(&entry)
                .map_err(|err| CacheError::callback(Hook::AddedItem, err)),
            None => Ok(()),
        };

        let life_span = entry.life_span();
        if !life_span.is_zero() && until_next_sweep.map_or(true, |left| life_span < left) {
            self.expiration_check().await;
        }

        hook_result.map(|()| entry)
    }

    // == Delete ==
    /// Removes the entry stored under `key` and returns it.
    ///
    /// The about-to-delete hook runs first, then the entry's own expire callback, then
    /// the entry leaves the table. If either hook fails the entry stays and the failure
    /// is returned.
    pub async fn delete(&self, key: &K) -> Result<Arc<CacheEntry<K, V>>> {
        let inner = self.inner.write().await;
        let entry = match inner.items.get(key) {
            Some(entry) if entry.claim_removal() => Arc::clone(entry),
            // Absent, or another removal is already under way
            _ => return Err(CacheError::KeyNotFound),
        };
        let claim = RemovalClaim {
            entry: &entry,
            completed: false,
        };
        let about_to_delete = inner.about_to_delete_item.clone();
        drop(inner);

        if let Err(err) = run_delete_hooks(about_to_delete.as_deref(), &entry) {
            drop(claim);
            // A sweep during the hook window skipped this entry
            self.rearm_for(&entry).await;
            return Err(err);
        }

        let mut inner = self.inner.write().await;
        self.remove_claimed(&mut inner, &entry);
        claim.complete();
        drop(inner);

        Ok(entry)
    }

    /// Sweeps now if `entry` is due before the armed timer, or no timer is armed.
    async fn rearm_for(&self, entry: &CacheEntry<K, V>) {
        let now = Instant::now();
        let Some(left) = entry.remaining(now) else {
            return;
        };
        let until_next_sweep = self.inner.read().await.until_next_sweep(now);
        if until_next_sweep.map_or(true, |due| left < due) {
            self.expiration_check().await;
        }
    }

    /// Drops a claimed entry from the map, unless its key has been re-added meanwhile.
    fn remove_claimed(&self, inner: &mut TableInner<K, V>, entry: &Arc<CacheEntry<K, V>>) {
        let key = entry.key();
        if inner
            .items
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
        {
            inner.items.remove(key);
        }
        inner.log(format_args!(
            "Deleting item with key {:?} created on {:?} and hit {} times from table {}",
            key,
            entry.created_on(),
            entry.access_count(),
            self.name
        ));
    }

    // == Value ==
    /// Returns the entry stored under `key` and keeps it alive.
    ///
    /// On a miss the data loader, if any, is asked for the entry; a loaded entry is
    /// stored under `key` and returned.
    ///
    /// # Errors
    /// - `KeyNotFound` on a miss with no loader configured
    /// - `KeyNotFoundOrNotLoadable` when the loader yields nothing
    pub async fn value(&self, key: &K) -> Result<Arc<CacheEntry<K, V>>> {
        self.value_with(key, &[]).await
    }

    /// Same as [`value`](Self::value), forwarding `args` to the data loader.
    pub async fn value_with(&self, key: &K, args: &[LoadArg<'_>]) -> Result<Arc<CacheEntry<K, V>>> {
        let (entry, load_data) = {
            let inner = self.inner.read().await;
            (inner.items.get(key).cloned(), inner.load_data.clone())
        };

        if let Some(entry) = entry {
            // May race with a removal of the same entry; the keep-alive then only
            // touches the detached entry.
            entry.keep_alive();
            return Ok(entry);
        }

        let Some(load_data) = load_data else {
            return Err(CacheError::KeyNotFound);
        };

        let loaded = load_data
            .load(key, args)
            .map_err(|err| CacheError::callback(Hook::DataLoader, err))?;
        match loaded {
            Some(entry) => {
                let entry = Arc::new(entry.with_key(key.clone()));
                let inner = self.inner.write().await;
                self.add_internal(inner, entry).await
            }
            None => Err(CacheError::KeyNotFoundOrNotLoadable),
        }
    }

    // == Flush ==
    /// Removes every entry and cancels the pending sweep.
    ///
    /// No delete or expire hooks run for flushed entries.
    pub async fn flush(&self) {
        let mut inner = self.inner.write().await;
        inner.log(format_args!("Flush table {}", self.name));

        inner.items = HashMap::new();
        inner.cleanup_interval = Duration::ZERO;
        inner.cancel_timer();
    }

    // == Hooks ==
    /// Sets the loader consulted by [`value`](Self::value) on a miss.
    pub async fn set_data_loader<L>(&self, loader: L)
    where
        L: DataLoader<K, V> + 'static,
    {
        self.inner.write().await.load_data = Some(Arc::new(loader));
    }

    pub async fn clear_data_loader(&self) {
        self.inner.write().await.load_data = None;
    }

    /// Sets the hook run after each insertion.
    pub async fn set_added_item_callback<C>(&self, callback: C)
    where
        C: AddedItemCallback<K, V> + 'static,
    {
        self.inner.write().await.added_item = Some(Arc::new(callback));
    }

    pub async fn clear_added_item_callback(&self) {
        self.inner.write().await.added_item = None;
    }

    /// Sets the hook run before each removal by [`delete`](Self::delete) or expiry.
    pub async fn set_about_to_delete_item_callback<C>(&self, callback: C)
    where
        C: AboutToDeleteCallback<K, V> + 'static,
    {
        self.inner.write().await.about_to_delete_item = Some(Arc::new(callback));
    }

    pub async fn clear_about_to_delete_item_callback(&self) {
        self.inner.write().await.about_to_delete_item = None;
    }

    /// Sets the sink for this table's trace lines. Without one they are dropped.
    pub async fn set_logger<L>(&self, logger: L)
    where
        L: CacheLogger + 'static,
    {
        self.inner.write().await.logger = Some(Arc::new(logger));
    }

    pub async fn clear_logger(&self) {
        self.inner.write().await.logger = None;
    }

    // == Expiration ==
    /// Boxed sweep, spawned by the expiration timer.
    fn sweep(table: Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move { table.expiration_check().await })
    }

    /// Removes every expired entry and arms the timer for the next one due.
    async fn expiration_check(&self) {
        let mut inner = self.inner.write().await;
        inner.cancel_timer();
        if inner.cleanup_interval > Duration::ZERO {
            inner.log(format_args!(
                "Expiration check triggered after {:?} for table {}",
                inner.cleanup_interval, self.name
            ));
        } else {
            inner.log(format_args!(
                "Expiration check installed for table {}",
                self.name
            ));
        }

        loop {
            let now = Instant::now();
            let mut expired = Vec::new();
            let mut smallest: Option<Duration> = None;

            for entry in inner.items.values() {
                // Entries already being removed belong to that removal
                if entry.is_removing() {
                    continue;
                }
                match entry.remaining(now) {
                    None => {}
                    Some(left) if left.is_zero() => {
                        if entry.claim_removal() {
                            expired.push(Arc::clone(entry));
                        }
                    }
                    Some(left) => {
                        smallest = Some(smallest.map_or(left, |s| s.min(left)));
                    }
                }
            }

            if expired.is_empty() {
                self.schedule(&mut inner, smallest);
                return;
            }

            // Hooks may add entries while the lock is released, so rescan afterwards
            for entry in expired {
                inner = self.remove_expired(inner, entry).await;
            }
        }
    }

    /// Runs the delete hooks for an expired entry with the lock released, then drops it.
    ///
    /// Hook failures and panics are logged and do not keep the entry alive.
    async fn remove_expired<'a>(
        &'a self,
        inner: WriteGuard<'a, K, V>,
        entry: Arc<CacheEntry<K, V>>,
    ) -> WriteGuard<'a, K, V> {
        let about_to_delete = inner.about_to_delete_item.clone();
        drop(inner);

        {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                run_delete_hooks(about_to_delete.as_deref(), &entry)
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(
                    table = %self.name,
                    key = ?entry.key(),
                    error = %err,
                    "Callback failed while expiring entry"
                ),
                Err(_) => warn!(
                    table = %self.name,
                    key = ?entry.key(),
                    "Callback panicked while expiring entry"
                ),
            }
        }

        let mut inner = self.inner.write().await;
        self.remove_claimed(&mut inner, &entry);
        inner
    }

    /// Arms the timer to fire after `delay`, or leaves the table idle.
    fn schedule(&self, inner: &mut TableInner<K, V>, delay: Option<Duration>) {
        // A sweep that ran during one of our hook windows may have armed a timer
        inner.cancel_timer();
        inner.cleanup_interval = delay.unwrap_or(Duration::ZERO);

        let Some(delay) = delay else {
            return;
        };
        let table = self.this.clone();
        inner.cleanup_deadline = Some(Instant::now() + delay);
        inner.cleanup_timer = Some(spawn_expiration_timer(delay, move || {
            if let Some(table) = table.upgrade() {
                tokio::spawn(CacheTable::sweep(table));
            }
        }));
    }

    #[cfg(test)]
    async fn cleanup_interval(&self) -> Duration {
        self.inner.read().await.cleanup_interval
    }
}

/// Runs the table's about-to-delete hook, then the entry's own expire callback.
fn run_delete_hooks<K, V>(
    about_to_delete: Option<&dyn AboutToDeleteCallback<K, V>>,
    entry: &CacheEntry<K, V>,
) -> Result<()> {
    if let Some(callback) = about_to_delete {
        callback
            .about_to_delete(entry)
            .map_err(|err| CacheError::callback(Hook::AboutToDelete, err))?;
    }
    if let Some(callback) = entry.about_to_expire_callback() {
        callback
            .about_to_expire(entry.key())
            .map_err(|err| CacheError::callback(Hook::AboutToExpire, err))?;
    }
    Ok(())
}

impl<K, V> fmt::Debug for CacheTable<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheTable")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
