//! Promise-memoized cache.
//!
//! A map from key to a shared one-shot future. Concurrent lookups of the same
//! key subscribe to one in-flight computation; a failed computation evicts
//! the entry so the next caller retries. This gives both halves at once:
//! no double-fetch, no failure poisoning.

use dashmap::DashMap;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use std::hash::Hash;
use std::sync::Arc;

type SharedFetch<V, E> = Shared<BoxFuture<'static, Result<V, Arc<E>>>>;

/// Key-addressed one-shot future cache.
pub struct MemoMap<K, V, E> {
    inner: DashMap<K, SharedFetch<V, E>>,
}

impl<K, V, E> Default for MemoMap<K, V, E>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }
}

impl<K, V, E> MemoMap<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    pub fn new() -> Self
    where
        K: Eq + Hash,
    {
        Self::default()
    }

    /// Resolve `key`, starting `make()` if no fetch is in flight. With
    /// `bypass` set the cache is not consulted and not populated; used by
    /// wallet mode so transient failures are never remembered.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, bypass: bool, make: F) -> Result<V, Arc<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        if bypass {
            return make().await.map_err(Arc::new);
        }
        let fetch = self
            .inner
            .entry(key.clone())
            .or_insert_with(|| make().map(|r| r.map_err(Arc::new)).boxed().shared())
            .clone();
        let result = fetch.await;
        if result.is_err() {
            self.inner.remove(&key);
        }
        result
    }

    /// Drop a cached entry.
    pub fn evict(&self, key: &K) {
        self.inner.remove(key);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn concurrent_lookups_share_one_fetch() {
        let map: Arc<MemoMap<u32, u32, String>> = Arc::new(MemoMap::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let map = Arc::clone(&map);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                map.get_or_fetch(1, false, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    Ok::<_, String>(42)
                })
                .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_evicts_and_retries() {
        let map: MemoMap<u32, u32, String> = MemoMap::new();
        let err = map
            .get_or_fetch(1, false, || async { Err("down".to_string()) })
            .await
            .unwrap_err();
        assert_eq!(*err, "down");
        assert_eq!(map.len(), 0);

        let ok = map
            .get_or_fetch(1, false, || async { Ok::<_, String>(7) })
            .await
            .unwrap();
        assert_eq!(ok, 7);
        assert_eq!(map.len(), 1);
    }

    #[tokio::test]
    async fn bypass_never_touches_the_cache() {
        let map: MemoMap<u32, u32, String> = MemoMap::new();
        let value = map
            .get_or_fetch(1, true, || async { Ok::<_, String>(9) })
            .await
            .unwrap();
        assert_eq!(value, 9);
        assert_eq!(map.len(), 0);
    }
}
