//! Table Registry Module
//!
//! Maps table names to tables, creating each table on first use.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::cache::CacheTable;
use crate::error::{CacheError, Result};

type AnyTable = Arc<dyn Any + Send + Sync>;

// == Registry ==
/// A set of named tables, one per name.
///
/// Tables of different key and value types can share a registry; asking for an
/// existing name with other types fails with `TableTypeMismatch`.
#[derive(Default)]
pub struct Registry {
    tables: RwLock<HashMap<String, AnyTable>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // == Table ==
    /// Returns the table called `name`, creating it if needed.
    pub fn table<K, V>(&self, name: &str) -> Result<Arc<CacheTable<K, V>>>
    where
        K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        let existing = self.tables.read().get(name).cloned();
        if let Some(table) = existing {
            return downcast(name, table);
        }

        let mut tables = self.tables.write();
        // Double check, another caller may have created it meanwhile
        if let Some(table) = tables.get(name) {
            return downcast(name, Arc::clone(table));
        }

        let table = CacheTable::<K, V>::new(name);
        tables.insert(name.to_string(), Arc::clone(&table) as AnyTable);
        Ok(table)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }
}

fn downcast<K, V>(name: &str, table: AnyTable) -> Result<Arc<CacheTable<K, V>>>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    table
        .downcast::<CacheTable<K, V>>()
        .map_err(|_| CacheError::TableTypeMismatch {
            name: name.to_string(),
        })
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("tables", &self.names())
            .finish()
    }
}

// == Process-wide Registry ==
static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// Returns the process-wide table called `name`, creating it on first use.
///
/// Tables live for the rest of the process; [`CacheTable::flush`] empties one but
/// keeps it registered.
pub fn cache<K, V>(name: &str) -> Result<Arc<CacheTable<K, V>>>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    GLOBAL.get_or_init(Registry::new).table(name)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_registry_memoizes_by_name() {
        let registry = Registry::new();
        assert!(registry.is_empty());

        let first = registry.table::<String, u32>("users").unwrap();
        let second = registry.table::<String, u32>("users").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.name(), "users");
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("users"));
        assert!(!registry.contains("orders"));
    }

    #[test]
    fn test_registry_type_mismatch() {
        let registry = Registry::new();
        registry.table::<String, u32>("users").unwrap();

        let result = registry.table::<u64, u32>("users");
        assert!(matches!(
            result,
            Err(CacheError::TableTypeMismatch { ref name }) if name == "users"
        ));
    }

    #[test]
    fn test_registry_concurrent_creation() {
        let registry = Arc::new(Registry::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || registry.table::<String, u32>("shared").unwrap())
            })
            .collect();
        let tables: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(registry.len(), 1);
        assert!(tables.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test]
    async fn test_global_cache_is_shared() {
        let table = cache::<String, u32>("registry-test-global").unwrap();
        table
            .add("k".to_string(), Duration::ZERO, 7)
            .await
            .unwrap();

        let again = cache::<String, u32>("registry-test-global").unwrap();
        assert_eq!(*again.value(&"k".to_string()).await.unwrap().value(), 7);
    }
}
