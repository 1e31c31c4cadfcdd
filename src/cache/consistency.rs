//! Two-tier cache in front of the file entry store.
//!
//! Tier 1 belongs to one unit of work and is authoritative while that unit
//! runs. Tier 2 is the shared cache: every update removes and reinserts the
//! entry so it restarts its expiration window and moves to the young end of
//! the eviction order. Tier 2 never answers existence on its own; a miss
//! always falls through to the KV store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use spin::Mutex;

use super::SharedCache;
use crate::entry::FileEntry;
use crate::error::VfsResult;

pub struct ConsistencyCache {
    local: Mutex<HashMap<String, FileEntry>>,
    shared: Arc<dyn SharedCache>,
    ttl: Duration,
}

impl ConsistencyCache {
    pub fn new(shared: Arc<dyn SharedCache>, ttl: Duration) -> Self {
        Self {
            local: Mutex::new(HashMap::new()),
            shared,
            ttl,
        }
    }

    /// Tier 1 first, then tier 2. A tier-2 hit is copied into tier 1.
    pub fn get(&self, path: &str) -> Option<FileEntry> {
        if let Some(entry) = self.local.lock().get(path) {
            return Some(entry.clone());
        }
        let bytes = match self.shared.get(path) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!("shared cache get {path} failed: {e}");
                return None;
            }
        };
        match serde_json::from_slice::<FileEntry>(&bytes) {
            Ok(entry) if entry.path() == path && !entry.is_absent() => {
                self.local.lock().insert(path.to_string(), entry.clone());
                Some(entry)
            }
            Ok(_) => {
                warn!("shared cache entry for {path} does not describe it, ignoring");
                None
            }
            Err(e) => {
                warn!("shared cache entry for {path} is undecodable: {e}");
                None
            }
        }
    }

    /// Records a persisted entry in both tiers.
    pub fn put(&self, entry: &FileEntry) {
        let path = entry.path();
        self.local.lock().insert(path.to_string(), entry.clone());
        let bytes = match serde_json::to_vec(entry) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("cannot encode {path} for the shared cache: {e}");
                return;
            }
        };
        // remove first: a plain overwrite would keep the old eviction slot and expiry
        let refreshed = self
            .shared
            .remove(path)
            .and_then(|_| self.shared.put(path, bytes, self.ttl));
        if let Err(e) = refreshed {
            warn!("shared cache put {path} failed: {e}");
        }
    }

    /// Evicts both tiers; tier-2 failures are returned to the caller.
    pub fn remove(&self, path: &str) -> VfsResult<()> {
        self.local.lock().remove(path);
        self.shared.remove(path)
    }

    pub fn contains_local(&self, path: &str) -> bool {
        self.local.lock().contains_key(path)
    }

    pub fn local_len(&self) -> usize {
        self.local.lock().len()
    }

    /// Ends the unit of work: tier 1 is dropped, tier 2 is left to expire.
    pub fn release(&self) {
        let mut local = self.local.lock();
        if !local.is_empty() {
            debug!("releasing {} execution-scoped cache entries", local.len());
        }
        local.clear();
    }
}

impl Drop for ConsistencyCache {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    fn folder(path: &str) -> FileEntry {
        let mut entry = FileEntry::absent(path, 4);
        entry.make_folder();
        entry
    }

    #[test]
    fn test_tier2_hit_populates_tier1() {
        let shared = Arc::new(MemoryCache::new(16));
        let writer = ConsistencyCache::new(shared.clone(), Duration::from_secs(60));
        writer.put(&folder("/docs"));

        let reader = ConsistencyCache::new(shared, Duration::from_secs(60));
        assert!(!reader.contains_local("/docs"));
        assert_eq!(reader.get("/docs"), Some(folder("/docs")));
        assert!(reader.contains_local("/docs"));
    }

    #[test]
    fn test_remove_evicts_both_tiers() {
        let shared = Arc::new(MemoryCache::new(16));
        let cache = ConsistencyCache::new(shared.clone(), Duration::from_secs(60));
        cache.put(&folder("/docs"));
        cache.remove("/docs").unwrap();
        assert_eq!(cache.get("/docs"), None);
        assert!(!shared.contains("/docs"));
    }

    #[test]
    fn test_put_moves_entry_to_young_end() {
        let shared = Arc::new(MemoryCache::new(2));
        let cache = ConsistencyCache::new(shared.clone(), Duration::from_secs(60));
        cache.put(&folder("/a"));
        cache.put(&folder("/b"));
        cache.put(&folder("/a"));
        cache.put(&folder("/c"));
        assert!(shared.contains("/a"));
        assert!(!shared.contains("/b"));
    }

    #[test]
    fn test_release_clears_tier1_only() {
        let shared = Arc::new(MemoryCache::new(16));
        let cache = ConsistencyCache::new(shared.clone(), Duration::from_secs(60));
        cache.put(&folder("/docs"));
        cache.release();
        assert_eq!(cache.local_len(), 0);
        assert!(shared.contains("/docs"));
    }

    #[test]
    fn test_garbage_in_tier2_is_a_miss() {
        let shared = Arc::new(MemoryCache::new(16));
        shared
            .put("/bad", b"not json".to_vec(), Duration::from_secs(60))
            .unwrap();
        let cache = ConsistencyCache::new(shared, Duration::from_secs(60));
        assert_eq!(cache.get("/bad"), None);
    }
}
