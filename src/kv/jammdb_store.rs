//! Persistent entity store on top of a jammdb database file.
//!
//! All entities live in one bucket. The bucket key is the encoded entity key
//! and the value is the JSON-encoded entity.

use std::path::Path;

use jammdb::{Data, Error as JammdbError, DB};
use log::debug;

use super::{Entity, Key, KvStore};
use crate::error::{VfsError, VfsResult};

const ENTITY_BUCKET: &str = "entities";

#[derive(Clone)]
pub struct JammdbKvStore {
    db: DB,
}

impl JammdbKvStore {
    /// Opens (or creates) the database file and makes sure the entity bucket exists.
    pub fn open(path: impl AsRef<Path>) -> VfsResult<Self> {
        let db = DB::open(path.as_ref())?;
        {
            let tx = db.tx(true)?;
            tx.get_or_create_bucket(ENTITY_BUCKET)?;
            tx.commit()?;
        }
        debug!("opened jammdb entity store at {}", path.as_ref().display());
        Ok(Self { db })
    }
}

impl KvStore for JammdbKvStore {
    fn get(&self, key: &Key) -> VfsResult<Entity> {
        let tx = self.db.tx(false)?;
        let bucket = tx.get_bucket(ENTITY_BUCKET)?;
        match bucket.get_kv(key.encode().as_bytes()) {
            Some(kv) => Ok(serde_json::from_slice(kv.value())?),
            None => Err(VfsError::NotFound(key.encode())),
        }
    }

    fn put(&self, entity: &Entity) -> VfsResult<()> {
        let value = serde_json::to_vec(entity)?;
        let tx = self.db.tx(true)?;
        let bucket = tx.get_bucket(ENTITY_BUCKET)?;
        bucket.put(entity.key().encode().into_bytes(), value)?;
        tx.commit()?;
        Ok(())
    }

    fn delete(&self, key: &Key) -> VfsResult<()> {
        self.delete_many(std::slice::from_ref(key))
    }

    fn delete_many(&self, keys: &[Key]) -> VfsResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let tx = self.db.tx(true)?;
        let bucket = tx.get_bucket(ENTITY_BUCKET)?;
        for key in keys {
            match bucket.delete(key.encode().as_bytes()) {
                Ok(_) | Err(JammdbError::KeyValueMissing) => {}
                Err(e) => return Err(e.into()),
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn query_by_parent(&self, parent: &Key) -> VfsResult<Vec<Entity>> {
        let prefix = parent.child_prefix();
        let tx = self.db.tx(false)?;
        let bucket = tx.get_bucket(ENTITY_BUCKET)?;

        let mut raw = Vec::new();
        let mut cursor = bucket.cursor();
        cursor.seek(prefix.as_bytes());
        for data in cursor {
            if let Data::KeyValue(kv) = data {
                // keys are ordered, so the children form one run starting at the prefix
                if !kv.key().starts_with(prefix.as_bytes()) {
                    break;
                }
                raw.push(kv.value().to_vec());
            }
        }

        let mut entities = Vec::with_capacity(raw.len());
        for value in raw {
            let entity: Entity = serde_json::from_slice(&value)?;
            // the prefix also matches grandchildren
            if entity.key().parent() == Some(parent) {
                entities.push(entity);
            }
        }
        Ok(entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::Property;

    #[test]
    fn test_roundtrip_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let store = JammdbKvStore::open(dir.path().join("entities.db")).unwrap();

        let file = Key::root("/notes.txt");
        let mut entity = Entity::new(file.clone());
        entity.set("filetype", Property::Str("file".into()));
        store.put(&entity).unwrap();

        for i in 0..3 {
            let mut block = Entity::new(Key::child(&file, format!("block.{i}")));
            block.set("content-blob", Property::Bytes(vec![i as u8; 4]));
            store.put(&block).unwrap();
        }

        // neighbours on both sides of the child run, plus a grandchild inside it
        store.put(&Entity::new(Key::root("/notes.tx"))).unwrap();
        store.put(&Entity::new(Key::root("/notes.txtz"))).unwrap();
        let nested = Key::child(&Key::child(&file, "block.0"), "meta");
        store.put(&Entity::new(nested)).unwrap();

        assert_eq!(store.get(&file).unwrap(), entity);
        let children = store.query_by_parent(&file).unwrap();
        assert_eq!(children.len(), 3);
        assert!(children.iter().all(|e| e.key().parent() == Some(&file)));
        assert!(store.query_by_parent(&Key::root("/notes.txtz")).unwrap().is_empty());

        let doomed = [Key::child(&file, "block.1"), Key::child(&file, "block.9")];
        store.delete_many(&doomed).unwrap();
        assert_eq!(store.query_by_parent(&file).unwrap().len(), 2);
        assert!(store.get(&doomed[0]).unwrap_err().is_not_found());
    }
}
