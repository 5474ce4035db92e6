//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with access tracking.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use crate::cache::callbacks::AboutToExpireCallback;

// == Cache Entry ==
/// A single cached key/value record with access metadata.
///
/// `key`, `value`, `life_span` and `created_on` are fixed at construction and read
/// without locking. The access metadata and the expire callback sit behind the
/// entry's own lock, which is never the owning table's lock.
pub struct CacheEntry<K, V> {
    key: K,
    value: V,
    /// Zero means the entry never expires
    life_span: Duration,
    created_on: Instant,
    state: RwLock<EntryState<K>>,
    /// Set while a removal of this entry is in flight
    removing: AtomicBool,
}

struct EntryState<K> {
    accessed_on: Instant,
    access_count: u64,
    about_to_expire: Option<Arc<dyn AboutToExpireCallback<K>>>,
}

impl<K, V> CacheEntry<K, V> {
    // == Constructor ==
    /// Creates a new entry, stamped with the current time.
    ///
    /// # Arguments
    /// * `key` - The key the entry is stored under
    /// * `life_span` - Idle time after which the entry expires (`Duration::ZERO` = never)
    /// * `value` - The value to store
    pub fn new(key: K, life_span: Duration, value: V) -> Self {
        let now = Instant::now();
        Self {
            key,
            value,
            life_span,
            created_on: now,
            state: RwLock::new(EntryState {
                accessed_on: now,
                access_count: 0,
                about_to_expire: None,
            }),
            removing: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn life_span(&self) -> Duration {
        self.life_span
    }

    pub fn created_on(&self) -> Instant {
        self.created_on
    }

    /// Returns the time of the last [`keep_alive`](Self::keep_alive) (or creation).
    pub fn accessed_on(&self) -> Instant {
        self.state.read().accessed_on
    }

    /// Returns how many times the entry has been read through the table.
    pub fn access_count(&self) -> u64 {
        self.state.read().access_count
    }

    // == Keep Alive ==
    /// Marks the entry as accessed now and bumps its access counter.
    ///
    /// This is the only thing that pushes the expiration horizon back.
    pub fn keep_alive(&self) {
        let mut state = self.state.write();
        state.accessed_on = Instant::now();
        state.access_count += 1;
    }

    // == Expire Callback ==
    /// Installs a callback run with the key right before the entry is removed.
    pub fn set_about_to_expire_callback<C>(&self, callback: C)
    where
        C: AboutToExpireCallback<K> + 'static,
    {
        self.state.write().about_to_expire = Some(Arc::new(callback));
    }

    pub fn clear_about_to_expire_callback(&self) {
        self.state.write().about_to_expire = None;
    }

    pub(crate) fn about_to_expire_callback(&self) -> Option<Arc<dyn AboutToExpireCallback<K>>> {
        self.state.read().about_to_expire.clone()
    }

    // == Expiry ==
    /// Time left before the entry expires as of `now`.
    ///
    /// `None` for entries that never expire, `Some(ZERO)` once expired.
    pub(crate) fn remaining(&self, now: Instant) -> Option<Duration> {
        if self.life_span.is_zero() {
            return None;
        }
        let idle = now.saturating_duration_since(self.accessed_on());
        Some(self.life_span.saturating_sub(idle))
    }

    // == Removal Claim ==
    /// Claims the entry for removal. Returns false if another removal holds it.
    pub(crate) fn claim_removal(&self) -> bool {
        !self.removing.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_removing(&self) -> bool {
        self.removing.load(Ordering::Acquire)
    }

    pub(crate) fn release_removal(&self) {
        self.removing.store(false, Ordering::Release);
    }

    /// Swaps the key, used when a loaded entry is stored under the requested key.
    pub(crate) fn with_key(self, key: K) -> Self {
        Self { key, ..self }
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for CacheEntry<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("life_span", &self.life_span)
            .field("created_on", &self.created_on)
            .field("accessed_on", &state.accessed_on)
            .field("access_count", &state.access_count)
            .finish_non_exhaustive()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_entry_creation() {
        let entry = CacheEntry::new("key", Duration::from_secs(5), 42);

        assert_eq!(*entry.key(), "key");
        assert_eq!(*entry.value(), 42);
        assert_eq!(entry.life_span(), Duration::from_secs(5));
        assert_eq!(entry.access_count(), 0);
        assert_eq!(entry.created_on(), entry.accessed_on());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_updates_access() {
        let entry = CacheEntry::new("key", Duration::from_secs(5), 42);
        let created = entry.created_on();

        tokio::time::advance(Duration::from_secs(2)).await;
        entry.keep_alive();
        entry.keep_alive();

        assert_eq!(entry.access_count(), 2);
        assert_eq!(entry.accessed_on(), created + Duration::from_secs(2));
        assert_eq!(entry.created_on(), created);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining() {
        let entry = CacheEntry::new("key", Duration::from_secs(5), ());
        let start = entry.created_on();

        assert_eq!(entry.remaining(start), Some(Duration::from_secs(5)));
        assert_eq!(
            entry.remaining(start + Duration::from_secs(3)),
            Some(Duration::from_secs(2))
        );
        // Boundary: exactly at the life span the entry is expired
        assert_eq!(
            entry.remaining(start + Duration::from_secs(5)),
            Some(Duration::ZERO)
        );
        assert_eq!(
            entry.remaining(start + Duration::from_secs(9)),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_remaining_never_expires() {
        let entry = CacheEntry::new("key", Duration::ZERO, ());
        assert!(entry.remaining(Instant::now()).is_none());
    }

    #[test]
    fn test_expire_callback_set_and_clear() {
        let calls = Arc::new(AtomicUsize::new(0));
        let entry = CacheEntry::new("key".to_string(), Duration::ZERO, ());

        let counter = calls.clone();
        entry.set_about_to_expire_callback(move |_key: &String| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let callback = entry.about_to_expire_callback().unwrap();
        callback.about_to_expire(entry.key()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        entry.clear_about_to_expire_callback();
        assert!(entry.about_to_expire_callback().is_none());
    }

    #[test]
    fn test_removal_claim_is_exclusive() {
        let entry = CacheEntry::new("key", Duration::ZERO, ());

        assert!(!entry.is_removing());
        assert!(entry.claim_removal());
        assert!(entry.is_removing());
        assert!(!entry.claim_removal());
        entry.release_removal();
        assert!(entry.claim_removal());
    }
}
