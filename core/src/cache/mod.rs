//! Client-side query cache
//!
//! The access layer reads entries, patches them through an updater, stores
//! fresh service results and invalidates them. Only a fresh store clears
//! the stale flag. [`MemoryCache`] is the
//! in-process implementation; other query caches plug in behind [`Cache`].

use crate::schema::Record;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::broadcast;
use tracing::trace;

/// Ordered key segments, e.g. `["products", "list", "page=2"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(Vec<String>);

impl CacheKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// The default list key of a table: `[table, "list"]`.
    pub fn list(table: &str) -> Self {
        Self::new([table, "list"])
    }

    /// Append a caller-supplied discriminator.
    pub fn with(mut self, segment: impl Into<String>) -> Self {
        self.0.push(segment.into());
        self
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn starts_with(&self, prefix: &CacheKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

/// A cached fetch result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachedList {
    pub rows: Vec<Record>,
    pub count: Option<u64>,
}

impl CachedList {
    pub fn new(rows: Vec<Record>, count: Option<u64>) -> Self {
        Self { rows, count }
    }
}

/// Computes the next value of an entry from its previous value.
pub type CacheUpdater<'a> = Box<dyn FnOnce(Option<CachedList>) -> Option<CachedList> + Send + 'a>;

pub trait Cache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<CachedList>;

    /// Replace the entry with the updater's result; `None` removes it.
    /// An existing entry keeps its stale flag.
    fn set(&self, key: &CacheKey, updater: CacheUpdater<'_>);

    /// Store a result just read from the service, marking it fresh.
    fn fill(&self, key: &CacheKey, value: CachedList);

    /// Mark `key` and every key it prefixes as stale.
    fn invalidate(&self, key: &CacheKey);

    fn is_stale(&self, key: &CacheKey) -> bool;

    fn replace(&self, key: &CacheKey, value: Option<CachedList>) {
        self.set(key, Box::new(move |_: Option<CachedList>| value));
    }
}

struct Entry {
    value: CachedList,
    stale: bool,
}

pub struct MemoryCache {
    entries: RwLock<HashMap<CacheKey, Entry>>,
    invalidations: broadcast::Sender<CacheKey>,
}

impl MemoryCache {
    pub fn new() -> Self {
        let (invalidations, _) = broadcast::channel(64);
        Self {
            entries: RwLock::new(HashMap::new()),
            invalidations,
        }
    }

    /// Receive every key passed to `invalidate`, so dependents can refetch.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheKey> {
        self.invalidations.subscribe()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &CacheKey) -> Option<CachedList> {
        self.entries.read().get(key).map(|e| e.value.clone())
    }

    fn set(&self, key: &CacheKey, updater: CacheUpdater<'_>) {
        let mut entries = self.entries.write();
        let (previous, stale) = match entries.remove(key) {
            Some(entry) => (Some(entry.value), entry.stale),
            None => (None, false),
        };
        if let Some(value) = updater(previous) {
            entries.insert(key.clone(), Entry { value, stale });
        }
    }

    fn fill(&self, key: &CacheKey, value: CachedList) {
        self.entries.write().insert(
            key.clone(),
            Entry {
                value,
                stale: false,
            },
        );
    }

    fn invalidate(&self, key: &CacheKey) {
        {
            let mut entries = self.entries.write();
            for (existing, entry) in entries.iter_mut() {
                if existing.starts_with(key) {
                    entry.stale = true;
                }
            }
        }
        trace!(key = %key, "cache invalidated");
        // No subscribers is fine.
        let _ = self.invalidations.send(key.clone());
    }

    fn is_stale(&self, key: &CacheKey) -> bool {
        self.entries.read().get(key).is_none_or(|e| e.stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn list(ids: &[i64]) -> CachedList {
        let rows = ids
            .iter()
            .map(|id| match json!({ "id": id }) {
                serde_json::Value::Object(map) => map,
                _ => unreachable!(),
            })
            .collect();
        CachedList::new(rows, Some(ids.len() as u64))
    }

    #[test]
    fn test_set_receives_previous_value() {
        let cache = MemoryCache::new();
        let key = CacheKey::list("products");
        cache.replace(&key, Some(list(&[1])));

        cache.set(
            &key,
            Box::new(|previous: Option<CachedList>| {
                let mut next = previous.unwrap_or_default();
                next.rows.extend(list(&[2]).rows);
                next.count = next.count.map(|c| c + 1);
                Some(next)
            }),
        );

        assert_eq!(cache.get(&key), Some(list(&[1, 2])));
    }

    #[test]
    fn test_invalidate_marks_prefixed_keys_stale() {
        let cache = MemoryCache::new();
        let list_key = CacheKey::list("orders");
        let page_key = CacheKey::list("orders").with("page=2");
        let other = CacheKey::list("brands");
        for key in [&list_key, &page_key, &other] {
            cache.replace(key, Some(list(&[1])));
        }

        let mut rx = cache.subscribe();
        cache.invalidate(&list_key);

        assert!(cache.is_stale(&list_key));
        assert!(cache.is_stale(&page_key));
        assert!(!cache.is_stale(&other));
        assert_eq!(rx.try_recv().unwrap(), list_key);
        // Stale entries still serve their last value.
        assert_eq!(cache.get(&page_key), Some(list(&[1])));
    }

    #[test]
    fn test_set_keeps_stale_flag_until_filled() {
        let cache = MemoryCache::new();
        let key = CacheKey::list("products");
        cache.fill(&key, list(&[1]));
        cache.invalidate(&key);

        cache.replace(&key, Some(list(&[1, 2])));
        assert!(cache.is_stale(&key));
        assert_eq!(cache.get(&key), Some(list(&[1, 2])));

        cache.fill(&key, list(&[1, 2, 3]));
        assert!(!cache.is_stale(&key));
    }

    #[test]
    fn test_missing_entry_counts_as_stale() {
        assert!(MemoryCache::new().is_stale(&CacheKey::list("banners")));
    }

    #[test]
    fn test_updater_returning_none_removes_entry() {
        let cache = MemoryCache::new();
        let key = CacheKey::list("addresses");
        cache.replace(&key, Some(list(&[1])));
        cache.replace(&key, None);
        assert!(cache.is_empty());
    }
}
