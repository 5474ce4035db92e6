//! Configuration Module
//!
//! Handles loading the demo program's settings from environment variables.

use std::env;
use std::time::Duration;

/// Demo configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the table the demo works on
    pub table_name: String,
    /// Life span given to the demo's expiring entry
    pub entry_life_span: Duration,
    /// Whether the table's trace lines are forwarded to tracing
    pub trace_table: bool,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `TABLE_NAME` - Table to use (default: myCache)
    /// - `ENTRY_LIFE_SPAN_MS` - Entry life span in milliseconds (default: 5000)
    /// - `TABLE_TRACE` - Forward table trace lines to tracing (default: true)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            table_name: env::var("TABLE_NAME")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.table_name),
            entry_life_span: env::var("ENTRY_LIFE_SPAN_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.entry_life_span),
            trace_table: env::var("TABLE_TRACE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.trace_table),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            table_name: "myCache".to_string(),
            entry_life_span: Duration::from_secs(5),
            trace_table: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.table_name, "myCache");
        assert_eq!(config.entry_life_span, Duration::from_secs(5));
        assert!(config.trace_table);
    }

    #[test]
    fn test_config_from_env() {
        // Single test touching the environment, so no other test races on it
        env::remove_var("TABLE_NAME");
        env::remove_var("ENTRY_LIFE_SPAN_MS");
        env::remove_var("TABLE_TRACE");

        let config = Config::from_env();
        assert_eq!(config.table_name, "myCache");
        assert_eq!(config.entry_life_span, Duration::from_secs(5));
        assert!(config.trace_table);

        env::set_var("TABLE_NAME", "sessions");
        env::set_var("ENTRY_LIFE_SPAN_MS", "250");
        env::set_var("TABLE_TRACE", "false");

        let config = Config::from_env();
        assert_eq!(config.table_name, "sessions");
        assert_eq!(config.entry_life_span, Duration::from_millis(250));
        assert!(!config.trace_table);

        // Unparseable values fall back to defaults
        env::set_var("ENTRY_LIFE_SPAN_MS", "soon");
        env::set_var("TABLE_TRACE", "maybe");
        let config = Config::from_env();
        assert_eq!(config.entry_life_span, Duration::from_secs(5));
        assert!(config.trace_table);

        env::remove_var("TABLE_NAME");
        env::remove_var("ENTRY_LIFE_SPAN_MS");
        env::remove_var("TABLE_TRACE");
    }
}
