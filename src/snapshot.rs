//! Last known-good embed URL per episode

use std::collections::HashMap;
use std::sync::RwLock;

/// Episode URL → last embed URL that was observed live.
///
/// Written on every live success, read only when live extraction fails.
/// Failures never remove entries.
pub trait SnapshotCache: Send + Sync {
    fn get(&self, episode_url: &str) -> Option<String>;

    fn put(&self, episode_url: &str, embed_url: &str);
}

/// Process-lifetime snapshot cache
#[derive(Default)]
pub struct MemorySnapshotCache {
    entries: RwLock<HashMap<String, String>>,
}

impl MemorySnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SnapshotCache for MemorySnapshotCache {
    fn get(&self, episode_url: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(episode_url)
            .cloned()
    }

    fn put(&self, episode_url: &str, embed_url: &str) {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(episode_url.to_string(), embed_url.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_last_write_wins() {
        let cache = MemorySnapshotCache::new();
        assert!(cache.get("ep1").is_none());

        cache.put("ep1", "https://embed.test/a");
        cache.put("ep1", "https://embed.test/b");
        assert_eq!(cache.get("ep1").as_deref(), Some("https://embed.test/b"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_concurrent_writers() {
        let cache = Arc::new(MemorySnapshotCache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    cache.put(&format!("ep{}", i), &format!("https://embed.test/{}", i));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 8);
        assert_eq!(cache.get("ep3").as_deref(), Some("https://embed.test/3"));
    }
}
