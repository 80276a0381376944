//! Process-local counter store.

use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::{self, BoxFuture, FutureExt};

use crate::store::{CounterStore, StoreError};

/// A thread-safe in-memory store.
///
/// Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<DashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys held.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl CounterStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, StoreError>> {
        let value = self.inner.get(key).map(|r| r.value().clone());
        future::ready(Ok(value)).boxed()
    }

    fn set<'a>(&'a self, key: &'a str, value: Vec<u8>) -> BoxFuture<'a, Result<(), StoreError>> {
        self.inner.insert(key.to_owned(), value);
        future::ready(Ok(())).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_returns_what_set_stored() {
        let store = MemoryStore::new();
        assert!(store.get("10.0.0.1").await.unwrap().is_none());

        store.set("10.0.0.1", b"[]".to_vec()).await.unwrap();
        assert_eq!(store.get("10.0.0.1").await.unwrap().as_deref(), Some(&b"[]"[..]));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let store = MemoryStore::new();
        let other = store.clone();
        other.set("k", vec![1]).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(vec![1]));
    }
}
