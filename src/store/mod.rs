//! Counter store subsystem.
//!
//! # Data Flow
//! ```text
//! Rate limiter stage
//!     → CounterStore::get(client key)   (suspension point)
//!     → decide / update record
//!     → CounterStore::set(client key)   (suspension point)
//! ```
//!
//! # Design Decisions
//! - Values are opaque bytes; the record codec belongs to the limiter
//! - No expiry is applied here; TTL is the backing store's own policy
//! - Stores are shared via `Arc<dyn CounterStore>` across all requests

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::config::StoreConfig;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

/// Error type for counter store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[cfg(feature = "redis")]
    #[error("redis: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// A key-value store with TTL-less read and write.
pub trait CounterStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, StoreError>>;

    fn set<'a>(&'a self, key: &'a str, value: Vec<u8>) -> BoxFuture<'a, Result<(), StoreError>>;
}

/// Build the store named by the configuration.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn CounterStore>, StoreError> {
    match config {
        StoreConfig::Memory => {
            tracing::info!("Using in-memory rate-limit store");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "redis")]
        StoreConfig::Redis { url } => {
            let store = RedisStore::connect(url).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        StoreConfig::Redis { .. } => Err(StoreError::Unavailable(
            "redis store requested but the `redis` feature is not compiled in".to_string(),
        )),
    }
}
