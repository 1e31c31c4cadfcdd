//! Distributed cache client seam and the two-tier consistency cache.

mod consistency;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use spin::Mutex;

use crate::error::VfsResult;

pub use consistency::ConsistencyCache;

/// Cache shared by every worker. Best effort: entries may vanish at any time.
pub trait SharedCache: Send + Sync {
    fn get(&self, key: &str) -> VfsResult<Option<Vec<u8>>>;
    fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> VfsResult<()>;
    fn remove(&self, key: &str) -> VfsResult<()>;
}

struct CacheSlot {
    value: Vec<u8>,
    expires_at: Instant,
    /// Creation order; a plain overwrite keeps the slot it was created with.
    seq: u64,
}

#[derive(Default)]
struct CacheState {
    slots: HashMap<String, CacheSlot>,
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl CacheState {
    fn drop_slot(&mut self, key: &str) {
        if let Some(slot) = self.slots.remove(key) {
            self.order.remove(&slot.seq);
        }
    }
}

/// In-process stand-in for the distributed cache.
///
/// Eviction is first created, first deleted. Overwriting an existing key does
/// not move it in the eviction order, so callers that want a fresh slot must
/// remove before they put.
#[derive(Clone)]
pub struct MemoryCache {
    capacity: usize,
    state: Arc<Mutex<CacheState>>,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "MemoryCache capacity must be > 0");
        Self {
            capacity,
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().slots.contains_key(key)
    }
}

impl SharedCache for MemoryCache {
    fn get(&self, key: &str) -> VfsResult<Option<Vec<u8>>> {
        let mut state = self.state.lock();
        let expired = match state.slots.get(key) {
            None => return Ok(None),
            Some(slot) => Instant::now() >= slot.expires_at,
        };
        if expired {
            state.drop_slot(key);
            return Ok(None);
        }
        Ok(state.slots.get(key).map(|slot| slot.value.clone()))
    }

    fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> VfsResult<()> {
        let expires_at = Instant::now() + ttl;
        let mut state = self.state.lock();
        if let Some(slot) = state.slots.get_mut(key) {
            slot.value = value;
            slot.expires_at = expires_at;
            return Ok(());
        }
        while state.slots.len() >= self.capacity {
            let oldest = match state.order.iter().next() {
                Some((_, key)) => key.clone(),
                None => break,
            };
            state.drop_slot(&oldest);
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.order.insert(seq, key.to_string());
        state.slots.insert(
            key.to_string(),
            CacheSlot {
                value,
                expires_at,
                seq,
            },
        );
        Ok(())
    }

    fn remove(&self, key: &str) -> VfsResult<()> {
        self.state.lock().drop_slot(key);
        Ok(())
    }
}
