//! Redis-backed counter store.
//!
//! Keys are the client identity verbatim and values are the JSON record,
//! so records written by other deployments sharing the instance stay readable.

use futures_util::future::{BoxFuture, FutureExt};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::store::{CounterStore, StoreError};

pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to `url` (e.g. "redis://127.0.0.1:6379/").
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!(url = %url, "Connected to redis rate-limit store");
        Ok(Self { conn })
    }
}

impl CounterStore for RedisStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, StoreError>> {
        let mut conn = self.conn.clone();
        async move {
            let value: Option<Vec<u8>> = conn.get(key).await?;
            Ok(value)
        }
        .boxed()
    }

    fn set<'a>(&'a self, key: &'a str, value: Vec<u8>) -> BoxFuture<'a, Result<(), StoreError>> {
        let mut conn = self.conn.clone();
        async move {
            let () = conn.set(key, value).await?;
            Ok(())
        }
        .boxed()
    }
}
