//! TTL Cache demo
//!
//! Walks through a table's lifecycle: add, read, expire, re-add without a life span,
//! delete with a hook, flush.

use std::time::Duration;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ttl_cache::cache::TracingLogger;
use ttl_cache::{cache, CacheEntry, CacheError, Config};

#[derive(Debug)]
struct Payload {
    text: String,
    more_data: Vec<u8>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ttl_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        "Configuration loaded: table_name={}, entry_life_span={:?}, trace_table={}",
        config.table_name, config.entry_life_span, config.trace_table
    );

    let table = cache::<&'static str, Payload>(&config.table_name)
        .context("failed to open demo table")?;
    if config.trace_table {
        table.set_logger(TracingLogger).await;
    }

    let payload = Payload {
        text: "This is a test!".to_string(),
        more_data: Vec::new(),
    };
    table.add("someKey", config.entry_life_span, payload).await?;

    match table.value(&"someKey").await {
        Ok(entry) => info!("Found value in cache: {}", entry.value().text),
        Err(err) => info!("Error retrieving value from cache: {}", err),
    }

    // Let the entry go unread past its life span
    tokio::time::sleep(config.entry_life_span + Duration::from_secs(1)).await;
    if let Err(CacheError::KeyNotFound) = table.value(&"someKey").await {
        info!("Item is not cached (anymore).");
    }

    // Add another item that never expires
    let payload = Payload {
        text: "This is a test!".to_string(),
        more_data: vec![1, 2, 3],
    };
    table.add("someKey", Duration::ZERO, payload).await?;

    table
        .set_about_to_delete_item_callback(|entry: &CacheEntry<&'static str, Payload>| {
            info!(
                "Deleting: {} {} ({} bytes) created {:?} ago",
                entry.key(),
                entry.value().text,
                entry.value().more_data.len(),
                entry.created_on().elapsed()
            );
            Ok(())
        })
        .await;

    table.delete(&"someKey").await?;

    table.flush().await;
    info!("Table {} flushed, {} entries left", table.name(), table.count().await);

    Ok(())
}
