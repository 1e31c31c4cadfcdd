//! File and folder metadata.

use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{VfsError, VfsResult};
use crate::kv::{Entity, Key, Property};

// entity property names
const FILETYPE: &str = "filetype";
const LAST_MODIFIED: &str = "last-modified";
const CHILD_KEYS: &str = "child-keys";
const BLOCK_KEYS: &str = "block-keys";
const CONTENT_SIZE: &str = "content-size";
const BLOCK_SIZE: &str = "block-size";

const TYPE_FILE: &str = "file";
const TYPE_FOLDER: &str = "folder";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Folder,
    Absent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum EntryKind {
    File {
        /// Fixed when the file is created.
        block_size: u32,
        /// Position is the block index; no gaps.
        block_keys: Vec<Key>,
        content_size: u64,
    },
    Folder {
        child_keys: BTreeSet<String>,
    },
    /// Not stored. Carries the block size the file will get if it is created.
    Absent { block_size: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    path: String,
    /// Milliseconds since the Unix epoch.
    last_modified: u64,
    kind: EntryKind,
}

impl FileEntry {
    pub fn absent(path: impl Into<String>, block_size: u32) -> Self {
        Self {
            path: path.into(),
            last_modified: 0,
            kind: EntryKind::Absent { block_size },
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn key(&self) -> Key {
        Key::root(self.path.as_str())
    }

    pub fn file_type(&self) -> FileType {
        match self.kind {
            EntryKind::File { .. } => FileType::File,
            EntryKind::Folder { .. } => FileType::Folder,
            EntryKind::Absent { .. } => FileType::Absent,
        }
    }

    pub fn is_absent(&self) -> bool {
        self.file_type() == FileType::Absent
    }

    pub fn last_modified(&self) -> u64 {
        self.last_modified
    }

    pub(crate) fn touch(&mut self) {
        self.last_modified = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
    }

    /// Block size for files and not-yet-created files; `None` for folders.
    pub fn block_size(&self) -> Option<u32> {
        match self.kind {
            EntryKind::File { block_size, .. } | EntryKind::Absent { block_size } => {
                Some(block_size)
            }
            EntryKind::Folder { .. } => None,
        }
    }

    /// Only legal before the file exists.
    pub fn set_block_size(&mut self, size: u32) -> VfsResult<()> {
        match &mut self.kind {
            EntryKind::Absent { block_size } => {
                *block_size = size;
                Ok(())
            }
            _ => Err(VfsError::invalid(format!(
                "cannot set block size after {} is created",
                self.path
            ))),
        }
    }

    pub fn content_size(&self) -> u64 {
        match self.kind {
            EntryKind::File { content_size, .. } => content_size,
            _ => 0,
        }
    }

    pub(crate) fn set_content_size(&mut self, size: u64) {
        if let EntryKind::File { content_size, .. } = &mut self.kind {
            *content_size = size;
        }
    }

    pub fn block_keys(&self) -> &[Key] {
        match &self.kind {
            EntryKind::File { block_keys, .. } => block_keys,
            _ => &[],
        }
    }

    pub fn block_count(&self) -> u64 {
        self.block_keys().len() as u64
    }

    pub(crate) fn block_keys_mut(&mut self) -> Option<&mut Vec<Key>> {
        match &mut self.kind {
            EntryKind::File { block_keys, .. } => Some(block_keys),
            _ => None,
        }
    }

    pub fn child_paths(&self) -> impl Iterator<Item = &str> {
        let children = match &self.kind {
            EntryKind::Folder { child_keys } => Some(child_keys),
            _ => None,
        };
        children.into_iter().flatten().map(String::as_str)
    }

    pub fn has_children(&self) -> bool {
        self.child_paths().next().is_some()
    }

    pub(crate) fn add_child(&mut self, child: &str) -> bool {
        match &mut self.kind {
            EntryKind::Folder { child_keys } => child_keys.insert(child.to_string()),
            _ => false,
        }
    }

    pub(crate) fn remove_child(&mut self, child: &str) -> bool {
        match &mut self.kind {
            EntryKind::Folder { child_keys } => child_keys.remove(child),
            _ => false,
        }
    }

    /// Turns an absent entry into an empty file with its pending block size.
    pub(crate) fn make_file(&mut self) {
        if let EntryKind::Absent { block_size } = self.kind {
            self.kind = EntryKind::File {
                block_size,
                block_keys: Vec::new(),
                content_size: 0,
            };
        }
    }

    pub(crate) fn make_folder(&mut self) {
        if self.is_absent() {
            self.kind = EntryKind::Folder {
                child_keys: BTreeSet::new(),
            };
        }
    }

    pub fn to_entity(&self) -> Entity {
        let mut entity = Entity::new(self.key());
        entity.set(LAST_MODIFIED, Property::Int(self.last_modified as i64));
        match &self.kind {
            EntryKind::File {
                block_size,
                block_keys,
                content_size,
            } => {
                entity.set(FILETYPE, Property::Str(TYPE_FILE.to_string()));
                entity.set(BLOCK_SIZE, Property::Int(*block_size as i64));
                entity.set(CONTENT_SIZE, Property::Int(*content_size as i64));
                if !block_keys.is_empty() {
                    entity.set(BLOCK_KEYS, Property::Keys(block_keys.clone()));
                }
            }
            EntryKind::Folder { child_keys } => {
                entity.set(FILETYPE, Property::Str(TYPE_FOLDER.to_string()));
                if !child_keys.is_empty() {
                    let keys = child_keys.iter().map(|c| Key::root(c.as_str())).collect();
                    entity.set(CHILD_KEYS, Property::Keys(keys));
                }
            }
            EntryKind::Absent { .. } => {}
        }
        entity
    }

    /// Missing optional properties read as empty; a missing block size falls
    /// back to `default_block_size`.
    pub fn from_entity(entity: &Entity, default_block_size: u32) -> VfsResult<Self> {
        let path = entity.key().name().to_string();
        let last_modified = entity.get_int(LAST_MODIFIED).unwrap_or(0).max(0) as u64;
        let block_size = match entity.get_int(BLOCK_SIZE) {
            Some(size) if size > 0 => size as u32,
            Some(size) => {
                return Err(VfsError::StorageFailure(format!(
                    "{path}: stored block size {size} is not positive"
                )))
            }
            None => default_block_size,
        };
        let kind = match entity.get_str(FILETYPE) {
            Some(TYPE_FILE) => EntryKind::File {
                block_size,
                block_keys: entity.get_keys(BLOCK_KEYS).unwrap_or_default().to_vec(),
                content_size: entity.get_int(CONTENT_SIZE).unwrap_or(0).max(0) as u64,
            },
            Some(TYPE_FOLDER) => EntryKind::Folder {
                child_keys: entity
                    .get_keys(CHILD_KEYS)
                    .unwrap_or_default()
                    .iter()
                    .map(|k| k.name().to_string())
                    .collect(),
            },
            _ => EntryKind::Absent { block_size },
        };
        Ok(Self {
            path,
            last_modified,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_entity_roundtrip() {
        let mut entry = FileEntry::absent("/a.txt", 4);
        entry.make_file();
        let block = Key::child(&entry.key(), "block.0");
        entry.block_keys_mut().unwrap().push(block);
        entry.set_content_size(3);
        entry.touch();

        let back = FileEntry::from_entity(&entry.to_entity(), 1024).unwrap();
        assert_eq!(back, entry);
        assert_eq!(back.block_size(), Some(4));
        assert_eq!(back.block_count(), 1);
    }

    #[test]
    fn test_folder_has_no_blocks() {
        let mut entry = FileEntry::absent("/docs", 4);
        entry.make_folder();
        assert!(entry.add_child("/docs/a"));
        assert!(!entry.add_child("/docs/a"));
        assert_eq!(entry.block_keys().len(), 0);
        assert_eq!(entry.block_size(), None);

        let entity = entry.to_entity();
        assert_eq!(entity.get_int("block-size"), None);
        let back = FileEntry::from_entity(&entity, 4).unwrap();
        assert_eq!(back.child_paths().collect::<Vec<_>>(), vec!["/docs/a"]);
    }

    #[test]
    fn test_block_size_fixed_after_creation() {
        let mut entry = FileEntry::absent("/f", 4);
        entry.set_block_size(8).unwrap();
        entry.make_file();
        assert_eq!(entry.block_size(), Some(8));
        assert!(entry.set_block_size(16).is_err());
    }

    #[test]
    fn test_untyped_entity_is_absent() {
        let entity = Entity::new(Key::root("/ghost"));
        let entry = FileEntry::from_entity(&entity, 4).unwrap();
        assert!(entry.is_absent());
    }
}
