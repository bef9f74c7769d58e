//! Process-wide memo cache with a pluggable eviction policy.
//!
//! Both the resolution cache and the render cache sit on top of
//! [`MemoCache`]. The default policy keeps every entry for the lifetime of
//! the process, which bounds memory by the number of distinct keys touched.
//! Very large source trees can opt into a bounded LRU instead.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;

/// Eviction policy for a [`MemoCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CachePolicy {
    /// Never evict.
    #[default]
    Unbounded,
    /// Keep at most `capacity` entries, evicting the least recently used.
    Lru { capacity: usize },
}

/// Thread-safe key/value memo table.
///
/// `get` hands out clones, so values should be cheap to clone (paths,
/// `Arc`s, small structs).
#[derive(Debug)]
pub struct MemoCache<K, V> {
    policy: CachePolicy,
    inner: Mutex<Inner<K, V>>,
}

#[derive(Debug)]
struct Inner<K, V> {
    entries: HashMap<K, Slot<V>>,
    tick: u64,
}

#[derive(Debug)]
struct Slot<V> {
    value: V,
    last_used: u64,
}

impl<K, V> MemoCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    #[must_use]
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                tick: 0,
            }),
        }
    }

    #[must_use]
    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Look up `key`, marking it as recently used.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut inner = self.inner.lock().unwrap();
        inner.tick += 1;
        let tick = inner.tick;
        inner.entries.get_mut(key).map(|slot| {
            slot.last_used = tick;
            slot.value.clone()
        })
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock().unwrap();
        inner.tick += 1;
        let tick = inner.tick;
        inner.entries.insert(
            key,
            Slot {
                value,
                last_used: tick,
            },
        );

        if let CachePolicy::Lru { capacity } = self.policy {
            let capacity = capacity.max(1);
            while inner.entries.len() > capacity {
                let Some(oldest) = inner
                    .entries
                    .iter()
                    .min_by_key(|(_, slot)| slot.last_used)
                    .map(|(k, _)| k.clone())
                else {
                    break;
                };
                inner.entries.remove(&oldest);
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_keeps_everything() {
        let cache = MemoCache::new(CachePolicy::Unbounded);
        for i in 0..100 {
            cache.insert(i, i * 2);
        }
        assert_eq!(cache.len(), 100);
        assert_eq!(cache.get(&7), Some(14));
    }

    #[test]
    fn test_insert_replaces() {
        let cache = MemoCache::new(CachePolicy::Unbounded);
        cache.insert("a".to_string(), 1);
        cache.insert("a".to_string(), 2);
        assert_eq!(cache.get("a"), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_lru_evicts_least_recently_used() {
        let cache = MemoCache::new(CachePolicy::Lru { capacity: 2 });
        cache.insert("a", 1);
        cache.insert("b", 2);
        // Touch "a" so "b" becomes the eviction candidate.
        assert_eq!(cache.get("a"), Some(1));
        cache.insert("c", 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn test_policy_deserializes_tagged() {
        let policy: CachePolicy =
            serde_json::from_str(r#"{"kind": "lru", "capacity": 16}"#).unwrap();
        assert_eq!(policy, CachePolicy::Lru { capacity: 16 });
        let policy: CachePolicy = serde_json::from_str(r#"{"kind": "unbounded"}"#).unwrap();
        assert_eq!(policy, CachePolicy::Unbounded);
    }
}
