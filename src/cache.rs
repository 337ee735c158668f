// Local response cache
// Session-scoped: the controller clears it as part of logout cleanup

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Thread-safe TTL cache for authenticated GET responses.
///
/// Entries are keyed by request path and expire individually. Holding
/// cached API responses past the end of a session would leak data across
/// users on a shared machine, so `clear()` runs on every logout.
pub struct ResponseCache {
    /// Cached bodies indexed by request path, with insertion timestamp
    entries: Arc<DashMap<String, (Value, u64)>>,

    /// Entry TTL in seconds
    ttl: u64,
}

impl ResponseCache {
    pub fn new(ttl: u64) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Get a cached body if present and not yet expired
    pub fn get(&self, path: &str) -> Option<Value> {
        let entry = self.entries.get(path)?;
        let (value, inserted_at) = entry.value();

        if now_secs().saturating_sub(*inserted_at) > self.ttl {
            drop(entry);
            self.entries.remove(path);
            return None;
        }

        Some(value.clone())
    }

    pub fn insert(&self, path: &str, value: Value) {
        self.entries.insert(path.to_string(), (value, now_secs()));
    }

    /// Drop every entry. Part of the logout cleanup path.
    pub fn clear(&self) {
        let count = self.entries.len();
        self.entries.clear();
        if count > 0 {
            tracing::debug!(count, "Cleared response cache");
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Clone for ResponseCache {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            ttl: self.ttl,
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_and_get() {
        let cache = ResponseCache::new(3600);
        assert!(cache.get("/api/portfolio").is_none());

        cache.insert("/api/portfolio", json!({"items": [1, 2]}));
        assert_eq!(
            cache.get("/api/portfolio").unwrap(),
            json!({"items": [1, 2]})
        );
    }

    #[test]
    fn test_expired_entry_is_dropped() {
        let cache = ResponseCache::new(0);
        cache.insert("/api/testimonials", json!([]));

        // TTL of zero: anything older than this second is stale
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(cache.get("/api/testimonials").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_drops_everything() {
        let cache = ResponseCache::new(3600);
        cache.insert("/api/team", json!([]));
        cache.insert("/api/plans", json!([]));
        assert!(!cache.is_empty());

        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get("/api/team").is_none());
    }

    #[test]
    fn test_clone_shares_storage() {
        let cache = ResponseCache::new(3600);
        let view = cache.clone();

        cache.insert("/api/messages", json!({"unread": 3}));
        assert_eq!(view.get("/api/messages").unwrap(), json!({"unread": 3}));

        view.clear();
        assert!(cache.is_empty());
    }
}
