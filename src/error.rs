//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use std::fmt;

use thiserror::Error;

// == Hook ==
/// Identifies the user hook whose failure is carried by [`CacheError::Callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    /// Table-level loader consulted on a miss
    DataLoader,
    /// Table-level callback run after an insertion
    AddedItem,
    /// Table-level callback run before a removal
    AboutToDelete,
    /// Entry-level callback run before the entry is removed
    AboutToExpire,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Hook::DataLoader => "data loader",
            Hook::AddedItem => "added item",
            Hook::AboutToDelete => "about-to-delete",
            Hook::AboutToExpire => "about-to-expire",
        };
        f.write_str(name)
    }
}

// == Cache Error Enum ==
/// Unified error type for the cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key not present in the table
    #[error("Key not found in cache")]
    KeyNotFound,

    /// Key missed and the configured loader declined to produce an entry
    #[error("Key not found and could not be loaded into cache")]
    KeyNotFoundOrNotLoadable,

    /// A user-supplied hook returned an error
    #[error("{hook} callback failed: {source}")]
    Callback {
        hook: Hook,
        #[source]
        source: anyhow::Error,
    },

    /// A table with this name exists with different key or value types
    #[error("Table {name} is already registered with different key or value types")]
    TableTypeMismatch { name: String },
}

impl CacheError {
    pub(crate) fn callback(hook: Hook, source: anyhow::Error) -> Self {
        CacheError::Callback { hook, source }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(CacheError::KeyNotFound.to_string(), "Key not found in cache");
        assert_eq!(
            CacheError::KeyNotFoundOrNotLoadable.to_string(),
            "Key not found and could not be loaded into cache"
        );
        let err = CacheError::TableTypeMismatch {
            name: "users".to_string(),
        };
        assert!(err.to_string().contains("users"));
    }

    #[test]
    fn test_callback_error_keeps_source() {
        let err = CacheError::callback(Hook::AboutToDelete, anyhow::anyhow!("disk full"));

        assert_eq!(err.to_string(), "about-to-delete callback failed: disk full");
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("disk full"));
    }
}
