//! The KV entity store consumed by the file layer.
//!
//! Entities are named-key property bags. The store offers single-entity
//! get/put/delete and a parent-scoped query; nothing spans more than one
//! entity atomically.

mod jammdb_store;
mod memory;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::VfsResult;

pub use jammdb_store::JammdbKvStore;
pub use memory::MemoryKvStore;

/// Separates a parent's encoded key from a child's name. Never valid in a path.
const KEY_SEPARATOR: char = '\u{0}';

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    parent: Option<Box<Key>>,
    name: String,
}

impl Key {
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            parent: None,
            name: name.into(),
        }
    }

    pub fn child(parent: &Key, name: impl Into<String>) -> Self {
        Self {
            parent: Some(Box::new(parent.clone())),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&Key> {
        self.parent.as_deref()
    }

    /// Flat string form, used by byte-keyed backends.
    pub fn encode(&self) -> String {
        match &self.parent {
            Some(parent) => format!("{}{}{}", parent.encode(), KEY_SEPARATOR, self.name),
            None => self.name.clone(),
        }
    }

    /// Prefix shared by the encoded form of every direct child of `self`.
    pub(crate) fn child_prefix(&self) -> String {
        format!("{}{}", self.encode(), KEY_SEPARATOR)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Property {
    Str(String),
    Int(i64),
    Bytes(Vec<u8>),
    Keys(Vec<Key>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    key: Key,
    properties: BTreeMap<String, Property>,
}

impl Entity {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            properties: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn set(&mut self, name: &str, value: Property) {
        self.properties.insert(name.to_string(), value);
    }

    pub fn remove(&mut self, name: &str) -> Option<Property> {
        self.properties.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.properties.get(name) {
            Some(Property::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.properties.get(name) {
            Some(Property::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_bytes(&self, name: &str) -> Option<&[u8]> {
        match self.properties.get(name) {
            Some(Property::Bytes(b)) => Some(b),
            _ => None,
        }
    }

    pub fn get_keys(&self, name: &str) -> Option<&[Key]> {
        match self.properties.get(name) {
            Some(Property::Keys(k)) => Some(k),
            _ => None,
        }
    }
}

/// Per-entity storage operations.
pub trait KvStore: Send + Sync {
    /// Fails with `VfsError::NotFound` when no entity has this key.
    fn get(&self, key: &Key) -> VfsResult<Entity>;
    fn put(&self, entity: &Entity) -> VfsResult<()>;
    /// Deleting a missing key is not an error.
    fn delete(&self, key: &Key) -> VfsResult<()>;
    fn delete_many(&self, keys: &[Key]) -> VfsResult<()> {
        for key in keys {
            self.delete(key)?;
        }
        Ok(())
    }
    /// Entities whose key has `parent` as its direct parent, in store order.
    fn query_by_parent(&self, parent: &Key) -> VfsResult<Vec<Entity>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_encoding() {
        let file = Key::root("/docs/a.txt");
        let block = Key::child(&file, "block.3");
        assert_eq!(file.encode(), "/docs/a.txt");
        assert_eq!(block.encode(), "/docs/a.txt\u{0}block.3");
        assert!(block.encode().starts_with(&file.child_prefix()));
        assert_eq!(block.parent(), Some(&file));
    }

    #[test]
    fn test_entity_typed_getters() {
        let mut entity = Entity::new(Key::root("/x"));
        entity.set("filetype", Property::Str("file".into()));
        entity.set("content-size", Property::Int(10));
        assert_eq!(entity.get_str("filetype"), Some("file"));
        assert_eq!(entity.get_int("content-size"), Some(10));
        assert_eq!(entity.get_int("filetype"), None);
        assert!(entity.remove("filetype").is_some());
        assert_eq!(entity.get_str("filetype"), None);
    }
}
