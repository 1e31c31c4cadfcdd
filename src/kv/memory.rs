//! In-memory entity store backed by a `BTreeMap`.
//!
//! Clones share the same map, so several execution contexts can run against
//! one store the way workers share the real backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use spin::RwLock;

use super::{Entity, Key, KvStore};
use crate::error::{VfsError, VfsResult};

#[derive(Clone, Default)]
pub struct MemoryKvStore {
    data: Arc<RwLock<BTreeMap<Key, Entity>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &Key) -> VfsResult<Entity> {
        self.data
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| VfsError::NotFound(key.encode()))
    }

    fn put(&self, entity: &Entity) -> VfsResult<()> {
        self.data.write().insert(entity.key().clone(), entity.clone());
        Ok(())
    }

    fn delete(&self, key: &Key) -> VfsResult<()> {
        self.data.write().remove(key);
        Ok(())
    }

    fn delete_many(&self, keys: &[Key]) -> VfsResult<()> {
        let mut data = self.data.write();
        for key in keys {
            data.remove(key);
        }
        Ok(())
    }

    fn query_by_parent(&self, parent: &Key) -> VfsResult<Vec<Entity>> {
        Ok(self
            .data
            .read()
            .values()
            .filter(|e| e.key().parent() == Some(parent))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::Property;

    #[test]
    fn test_get_put_delete() {
        let store = MemoryKvStore::new();
        let key = Key::root("/a");
        assert!(store.get(&key).unwrap_err().is_not_found());

        let mut entity = Entity::new(key.clone());
        entity.set("content-size", Property::Int(3));
        store.put(&entity).unwrap();
        assert_eq!(store.get(&key).unwrap(), entity);

        store.delete(&key).unwrap();
        store.delete(&key).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_query_by_parent_is_direct_only() {
        let store = MemoryKvStore::new();
        let file = Key::root("/f");
        let block = Key::child(&file, "block.0");
        let nested = Key::child(&block, "x");
        for key in [&file, &block, &nested] {
            store.put(&Entity::new(key.clone())).unwrap();
        }
        let children = store.query_by_parent(&file).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].key(), &block);
    }

    #[test]
    fn test_clones_share_data() {
        let store = MemoryKvStore::new();
        let other = store.clone();
        store.put(&Entity::new(Key::root("/shared"))).unwrap();
        assert_eq!(other.len(), 1);
    }
}
