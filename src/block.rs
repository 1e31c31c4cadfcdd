//! Fixed-size content blocks, one KV entity each, addressed by (file, index).

use std::sync::Arc;

use log::{debug, warn};

use crate::entry::FileEntry;
use crate::error::{VfsError, VfsResult};
use crate::kv::{Entity, Key, KvStore, Property};

const CONTENT_BLOB: &str = "content-blob";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    key: Key,
    index: u64,
    pub content: Vec<u8>,
}

impl Block {
    fn placeholder(key: Key, index: u64) -> Self {
        Self {
            key,
            index,
            content: Vec::new(),
        }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    fn to_entity(&self) -> Entity {
        let mut entity = Entity::new(self.key.clone());
        entity.set(CONTENT_BLOB, Property::Bytes(self.content.clone()));
        entity
    }

    fn from_entity(entity: Entity, index: u64) -> Self {
        let content = entity.get_bytes(CONTENT_BLOB).unwrap_or_default().to_vec();
        Self {
            key: entity.key().clone(),
            index,
            content,
        }
    }
}

/// Result of [`BlockStore::get_block`].
pub struct BlockFetch {
    pub block: Block,
    /// The block key list changed and the file entry must be persisted.
    pub list_changed: bool,
}

#[derive(Clone)]
pub struct BlockStore {
    kv: Arc<dyn KvStore>,
}

impl BlockStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub fn block_key(file: &Key, index: u64) -> Key {
        Key::child(file, format!("block.{index}"))
    }

    /// Returns block `index`, creating and persisting empty placeholders for
    /// every missing index up to and including it. A listed block whose
    /// entity has gone missing is recreated in place.
    pub fn get_block(&self, file: &mut FileEntry, index: u64) -> VfsResult<BlockFetch> {
        let file_key = file.key();
        let path = file.path().to_string();
        let block_keys = file
            .block_keys_mut()
            .ok_or_else(|| VfsError::invalid(format!("{path} is not a file")))?;

        let count = block_keys.len() as u64;
        if index < count {
            let key = block_keys[index as usize].clone();
            return match self.kv.get(&key) {
                Ok(entity) => Ok(BlockFetch {
                    block: Block::from_entity(entity, index),
                    list_changed: false,
                }),
                Err(e) if e.is_not_found() => {
                    warn!("{path}: block {index} is missing from the store, recreating it");
                    let block = Block::placeholder(Self::block_key(&file_key, index), index);
                    self.kv.put(&block.to_entity())?;
                    block_keys[index as usize] = block.key.clone();
                    Ok(BlockFetch {
                        block,
                        list_changed: true,
                    })
                }
                Err(e) => Err(e),
            };
        }

        let mut last = None;
        for i in count..=index {
            let block = Block::placeholder(Self::block_key(&file_key, i), i);
            self.kv.put(&block.to_entity())?;
            block_keys.push(block.key.clone());
            last = Some(block);
        }
        debug!("{path}: back-filled blocks {count}..={index}");
        let block = last.ok_or_else(|| {
            VfsError::StorageFailure(format!("{path}: back-fill produced no block"))
        })?;
        Ok(BlockFetch {
            block,
            list_changed: true,
        })
    }

    /// Unconditional overwrite.
    pub fn put_block(&self, block: &Block) -> VfsResult<()> {
        self.kv.put(&block.to_entity())
    }

    /// Truncates the block list to `stop_index + 1` entries and deletes the
    /// removed block entities. Returns whether anything was removed.
    pub fn delete_blocks_from(&self, file: &mut FileEntry, stop_index: u64) -> VfsResult<bool> {
        let block_keys = match file.block_keys_mut() {
            Some(keys) => keys,
            None => return Ok(false),
        };
        let keep = stop_index.saturating_add(1);
        if block_keys.len() as u64 <= keep {
            return Ok(false);
        }
        let removed = block_keys.split_off(keep as usize);
        self.kv.delete_many(&removed)?;
        debug!(
            "{}: deleted {} blocks from index {}",
            file.path(),
            removed.len(),
            keep
        );
        Ok(true)
    }

    /// Cuts the stored payload of block `index` down to `keep` bytes.
    pub fn trim_block(&self, file: &FileEntry, index: u64, keep: usize) -> VfsResult<()> {
        let key = match file.block_keys().get(index as usize) {
            Some(key) => key,
            None => return Ok(()),
        };
        let mut block = match self.kv.get(key) {
            Ok(entity) => Block::from_entity(entity, index),
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        if block.content.len() > keep {
            block.content.truncate(keep);
            self.put_block(&block)?;
        }
        Ok(())
    }

    /// Deletes every listed block plus any orphan left under the file key by
    /// an interrupted back-fill.
    pub fn delete_all(&self, file: &FileEntry) -> VfsResult<()> {
        let mut keys = file.block_keys().to_vec();
        for orphan in self.kv.query_by_parent(&file.key())? {
            if !keys.contains(orphan.key()) {
                keys.push(orphan.key().clone());
            }
        }
        self.kv.delete_many(&keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;

    fn setup() -> (MemoryKvStore, BlockStore, FileEntry) {
        let kv = MemoryKvStore::new();
        let blocks = BlockStore::new(Arc::new(kv.clone()));
        let mut file = FileEntry::absent("/f", 4);
        file.make_file();
        (kv, blocks, file)
    }

    #[test]
    fn test_get_block_backfills() {
        let (kv, blocks, mut file) = setup();
        let fetch = blocks.get_block(&mut file, 3).unwrap();
        assert!(fetch.list_changed);
        assert_eq!(fetch.block.index(), 3);
        assert_eq!(file.block_count(), 4);
        assert_eq!(kv.len(), 4);
        for i in 0..4 {
            assert!(!blocks.get_block(&mut file, i).unwrap().list_changed);
        }
        // placeholders do not grow the file
        assert_eq!(file.content_size(), 0);
    }

    #[test]
    fn test_missing_block_is_recreated() {
        let (kv, blocks, mut file) = setup();
        blocks.get_block(&mut file, 1).unwrap();
        kv.delete(&file.block_keys()[0]).unwrap();
        let fetch = blocks.get_block(&mut file, 0).unwrap();
        assert!(fetch.list_changed);
        assert!(fetch.block.content.is_empty());
        assert_eq!(kv.len(), 2);
    }

    #[test]
    fn test_delete_blocks_from() {
        let (kv, blocks, mut file) = setup();
        blocks.get_block(&mut file, 4).unwrap();
        assert!(blocks.delete_blocks_from(&mut file, 1).unwrap());
        assert_eq!(file.block_count(), 2);
        assert_eq!(kv.len(), 2);
        assert!(!blocks.delete_blocks_from(&mut file, 1).unwrap());
        assert!(!blocks.delete_blocks_from(&mut file, 7).unwrap());
    }

    #[test]
    fn test_delete_all_sweeps_orphans() {
        let (kv, blocks, mut file) = setup();
        blocks.get_block(&mut file, 1).unwrap();
        // an orphan from a back-fill whose metadata never got persisted
        let orphan = Block::placeholder(BlockStore::block_key(&file.key(), 2), 2);
        blocks.put_block(&orphan).unwrap();
        blocks.delete_all(&file).unwrap();
        assert!(kv.is_empty());
    }

    #[test]
    fn test_trim_block() {
        let (_kv, blocks, mut file) = setup();
        let mut block = blocks.get_block(&mut file, 0).unwrap().block;
        block.content = b"ABCD".to_vec();
        blocks.put_block(&block).unwrap();
        blocks.trim_block(&file, 0, 1).unwrap();
        assert_eq!(blocks.get_block(&mut file, 0).unwrap().block.content, b"A");
    }
}
