use std::{collections::HashMap, hash::Hash, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::Result;

/// One-method fetch capability backing a [`TtrCache`].
///
/// `fetch` must return the value for `key`, or `None` to record an explicit
/// absence, which is itself cached so that a missing upstream value does not
/// cause a refetch storm. An `Err` leaves the cache unwritten, so the next
/// read retries instead of caching the failure.
///
/// `Cx` is a caller-scoped context threaded into each fetch, for fetchers
/// that depend on an external client owned by the call site rather than a
/// process-wide one.
#[async_trait]
pub trait Fetch<K, V, Cx = ()>: Send + Sync {
    async fn fetch(&self, key: &K, cx: &Cx) -> Result<Option<V>>;
}

struct Entry<V> {
    fetched_at: DateTime<Utc>,
    value: Option<V>,
}

/// Key/value store where a value is valid for a fixed duration after fetch.
///
/// Staleness is checked lazily at read time; nothing is evicted proactively
/// and entries are replaced, never merged. Concurrent `get`s for the same
/// key are *not* deduplicated: the interior lock is released across the
/// fetch await, so several callers hitting an expired key will each fetch
/// once (the classic thundering herd). Single-flight coalescing is left to
/// callers that need it.
pub struct TtrCache<K, V> {
    ttr: Duration,
    entries: Mutex<HashMap<K, Entry<V>>>,
}

impl<K, V> TtrCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    pub fn new(ttr: Duration) -> Self {
        Self {
            ttr,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record a value (or explicit absence) for `key`, stamped now.
    pub async fn insert(&self, key: K, value: Option<V>) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key,
            Entry {
                fetched_at: Utc::now(),
                value,
            },
        );
    }

    pub async fn contains(&self, key: &K) -> bool {
        self.entries.lock().await.contains_key(key)
    }

    fn is_fresh(&self, entry: &Entry<V>, now: DateTime<Utc>) -> bool {
        match now.signed_duration_since(entry.fetched_at).to_std() {
            Ok(age) => age < self.ttr,
            // A clock step backwards reads as fresh; it will age out again.
            Err(_) => true,
        }
    }

    /// Return the cached value for `key`, refetching through `fetcher` when
    /// the entry is missing or its age has reached the time-to-refresh.
    pub async fn get<Cx, F>(&self, key: K, cx: &Cx, fetcher: &F) -> Result<Option<V>>
    where
        Cx: Sync,
        F: Fetch<K, V, Cx> + ?Sized,
    {
        let now = Utc::now();
        let needs_fetch = {
            let entries = self.entries.lock().await;
            match entries.get(&key) {
                Some(entry) => !self.is_fresh(entry, now),
                None => true,
            }
        };

        if needs_fetch {
            tracing::debug!("cache entry missing or outdated; fetching");
            // Lock deliberately not held across this await.
            let value = fetcher.fetch(&key, cx).await?;
            self.insert(key.clone(), value).await;
        }

        let entries = self.entries.lock().await;
        Ok(entries.get(&key).and_then(|e| e.value.clone()))
    }
}
