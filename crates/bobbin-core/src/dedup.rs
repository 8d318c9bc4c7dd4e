//! Short-lived memo of recent results, keyed by namespace and request id.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::task::SharedValue;

struct DedupEntry {
    value: SharedValue,
    inserted_at: Instant,
}

/// Entries older than `window` are never returned. Eviction is lazy: stale
/// entries are dropped when looked up and swept on every insert.
///
/// Ids are only unique within a namespace, so the same id stored by two
/// namespaces yields two independent entries.
pub struct DedupCache {
    window: Duration,
    entries: HashMap<(String, String), DedupEntry>,
}

impl DedupCache {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: HashMap::new(),
        }
    }

    /// Cached result for `id` in `namespace` if it was stored within the window.
    pub fn check(&mut self, namespace: &str, id: &str, now: Instant) -> Option<SharedValue> {
        let key = (namespace.to_string(), id.to_string());
        let fresh = self
            .entries
            .get(&key)
            .map(|entry| now.saturating_duration_since(entry.inserted_at) < self.window)?;
        if fresh {
            self.entries.get(&key).map(|entry| entry.value.clone())
        } else {
            self.entries.remove(&key);
            None
        }
    }

    /// Insert or overwrite.
    pub fn store(&mut self, namespace: &str, id: &str, value: SharedValue, now: Instant) {
        self.evict_expired(now);
        self.entries.insert(
            (namespace.to_string(), id.to_string()),
            DedupEntry {
                value,
                inserted_at: now,
            },
        );
    }

    pub fn evict_expired(&mut self, now: Instant) {
        let window = self.window;
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.inserted_at) < window);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
