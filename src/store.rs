//! Metadata CRUD over files and folders, keyed by canonical path.
//!
//! A `FileEntryStore` is the handle for one unit of work: it owns the
//! execution-scoped cache tier, which is released when the store is dropped.
//! Nothing here locks across workers; concurrent updates to the same entity
//! are last-writer-wins.

use std::sync::Arc;

use log::{debug, warn};

use crate::block::{Block, BlockStore};
use crate::cache::ConsistencyCache;
use crate::config::{block_size_from_kib, VfsConfig};
use crate::entry::{FileEntry, FileType};
use crate::error::{VfsError, VfsResult};
use crate::kv::{Key, KvStore};
use crate::path::{is_descendant, parent_path, rebase, LocalChildren, PathResolver};
use crate::session::{OpenFlags, RandomAccessSession};

pub struct FileEntryStore {
    kv: Arc<dyn KvStore>,
    blocks: BlockStore,
    cache: ConsistencyCache,
    resolver: Arc<dyn PathResolver>,
    local: Option<Arc<dyn LocalChildren>>,
    config: Arc<VfsConfig>,
}

impl FileEntryStore {
    pub(crate) fn new(
        kv: Arc<dyn KvStore>,
        cache: ConsistencyCache,
        resolver: Arc<dyn PathResolver>,
        local: Option<Arc<dyn LocalChildren>>,
        config: Arc<VfsConfig>,
    ) -> Self {
        Self {
            blocks: BlockStore::new(kv.clone()),
            kv,
            cache,
            resolver,
            local,
            config,
        }
    }

    pub fn resolve(&self, path: &str) -> VfsResult<String> {
        self.resolver.resolve(path)
    }

    pub fn cache(&self) -> &ConsistencyCache {
        &self.cache
    }

    /// Drops the execution-scoped cache tier without ending the store.
    pub fn clear_cache(&self) {
        self.cache.release();
    }

    // ---- attach / existence ----

    /// Loads the entry, or returns an unsaved absent placeholder.
    pub fn attach(&self, path: &str) -> VfsResult<FileEntry> {
        let path = self.resolve(path)?;
        self.attach_canonical(&path)
    }

    fn attach_canonical(&self, path: &str) -> VfsResult<FileEntry> {
        if let Some(entry) = self.cache.get(path) {
            return Ok(entry);
        }
        match self.kv.get(&Key::root(path)) {
            Ok(entity) => {
                let entry = FileEntry::from_entity(&entity, self.config.block_size)?;
                if !entry.is_absent() {
                    self.cache.put(&entry);
                }
                Ok(entry)
            }
            Err(e) if e.is_not_found() => Ok(FileEntry::absent(path, self.config.block_size)),
            Err(e) => Err(e),
        }
    }

    /// Reads straight from the KV store, bypassing both cache tiers. Use this
    /// when existence must be confirmed rather than guessed.
    pub fn load_uncached(&self, path: &str) -> VfsResult<FileEntry> {
        let path = self.resolve(path)?;
        let entity = self.kv.get(&Key::root(path.as_str()))?;
        let entry = FileEntry::from_entity(&entity, self.config.block_size)?;
        if entry.is_absent() {
            return Err(VfsError::NotFound(path));
        }
        self.cache.put(&entry);
        Ok(entry)
    }

    /// Cache-backed and advisory.
    pub fn file_type(&self, path: &str) -> VfsResult<FileType> {
        Ok(self.attach(path)?.file_type())
    }

    /// Cache-backed and advisory; see [`FileEntryStore::load_uncached`].
    pub fn exists(&self, path: &str) -> VfsResult<bool> {
        Ok(self.file_type(path)? != FileType::Absent)
    }

    pub fn content_size(&self, path: &str) -> VfsResult<u64> {
        Ok(self.attach(path)?.content_size())
    }

    pub fn last_modified(&self, path: &str) -> VfsResult<u64> {
        Ok(self.attach(path)?.last_modified())
    }

    // ---- persistence ----

    /// Stamps the modification time, writes the entity and refreshes both tiers.
    pub fn put_entry(&self, entry: &mut FileEntry) -> VfsResult<()> {
        if entry.is_absent() {
            return Err(VfsError::invalid(format!(
                "{} has no type and cannot be stored",
                entry.path()
            )));
        }
        entry.touch();
        self.kv.put(&entry.to_entity())?;
        self.cache.put(entry);
        Ok(())
    }

    // ---- creation ----

    pub fn create_file(&self, path: &str) -> VfsResult<FileEntry> {
        let mut entry = self.attach(path)?;
        match entry.file_type() {
            FileType::File => Ok(entry),
            FileType::Folder => Err(VfsError::invalid(format!(
                "{} already exists as a folder",
                entry.path()
            ))),
            FileType::Absent => {
                entry.make_file();
                self.store_new(&mut entry)?;
                Ok(entry)
            }
        }
    }

    /// Creates an empty file whose blocks are `kib` KiB instead of the default.
    pub fn create_file_with_block_size(&self, path: &str, kib: i64) -> VfsResult<FileEntry> {
        let size = block_size_from_kib(kib)?;
        let mut entry = self.attach(path)?;
        entry.set_block_size(size)?;
        entry.make_file();
        self.store_new(&mut entry)?;
        Ok(entry)
    }

    pub fn create_folder(&self, path: &str) -> VfsResult<FileEntry> {
        let path = self.resolve(path)?;
        self.create_folder_canonical(&path)
    }

    fn create_folder_canonical(&self, path: &str) -> VfsResult<FileEntry> {
        let mut entry = self.attach_canonical(path)?;
        match entry.file_type() {
            FileType::Folder => Ok(entry),
            FileType::File => Err(VfsError::invalid(format!(
                "{path} already exists as a file"
            ))),
            FileType::Absent => {
                entry.make_folder();
                self.store_new(&mut entry)?;
                Ok(entry)
            }
        }
    }

    /// Persists a freshly typed entry and links it into its parent folder,
    /// creating missing ancestors on the way.
    pub(crate) fn store_new(&self, entry: &mut FileEntry) -> VfsResult<()> {
        self.put_entry(entry)?;
        debug!("created {:?} {}", entry.file_type(), entry.path());
        if let Some(parent) = parent_path(entry.path()) {
            self.link_child(parent, entry.path())?;
        }
        Ok(())
    }

    fn link_child(&self, parent: &str, child: &str) -> VfsResult<()> {
        let mut folder = self.create_folder_canonical(parent)?;
        if folder.add_child(child) {
            self.put_entry(&mut folder)?;
        }
        Ok(())
    }

    fn unlink_child(&self, parent: &str, child: &str) -> VfsResult<()> {
        let mut folder = self.attach_canonical(parent)?;
        if folder.file_type() != FileType::Folder {
            warn!("{child}: parent {parent} is not a stored folder, nothing to unlink");
            return Ok(());
        }
        if folder.remove_child(child) {
            self.put_entry(&mut folder)?;
        }
        Ok(())
    }

    // ---- blocks ----

    /// Fetches block `index`, back-filling as needed. An absent entry becomes
    /// a stored file first.
    pub fn get_block(&self, entry: &mut FileEntry, index: u64) -> VfsResult<Block> {
        let was_absent = entry.is_absent();
        if was_absent {
            entry.make_file();
        }
        let fetch = self.blocks.get_block(entry, index)?;
        if was_absent {
            self.store_new(entry)?;
        } else if fetch.list_changed {
            self.put_entry(entry)?;
        }
        Ok(fetch.block)
    }

    pub fn put_block(&self, block: &Block) -> VfsResult<()> {
        self.blocks.put_block(block)
    }

    /// Keeps blocks `0..=stop_index` and deletes the rest.
    pub fn delete_blocks_from(&self, entry: &mut FileEntry, stop_index: u64) -> VfsResult<()> {
        if self.blocks.delete_blocks_from(entry, stop_index)? {
            self.put_entry(entry)?;
        }
        Ok(())
    }

    pub(crate) fn trim_block(&self, entry: &FileEntry, index: u64, keep: usize) -> VfsResult<()> {
        self.blocks.trim_block(entry, index, keep)
    }

    // ---- deletion ----

    /// Deletes a file or an empty folder. Returns `false` if nothing was there.
    pub fn delete(&self, path: &str) -> VfsResult<bool> {
        let path = self.resolve(path)?;
        self.delete_canonical(&path)
    }

    fn delete_canonical(&self, path: &str) -> VfsResult<bool> {
        let entry = self.attach_canonical(path)?;
        match entry.file_type() {
            FileType::Absent => return Ok(false),
            FileType::Folder if path == "/" => {
                return Err(VfsError::invalid("the root folder cannot be deleted"))
            }
            FileType::Folder if entry.has_children() => {
                return Err(VfsError::invalid(format!("{path} is not empty")))
            }
            _ => {}
        }
        self.cache.remove(path)?;
        if entry.file_type() == FileType::File {
            self.blocks.delete_all(&entry)?;
        }
        self.kv.delete(&entry.key())?;
        if let Some(parent) = parent_path(path) {
            self.unlink_child(parent, path)?;
        }
        debug!("deleted {path}");
        Ok(true)
    }

    /// Deletes `path` and everything below it. Returns the number of entries removed.
    pub fn delete_all(&self, path: &str) -> VfsResult<usize> {
        let path = self.resolve(path)?;
        self.delete_all_canonical(&path)
    }

    fn delete_all_canonical(&self, path: &str) -> VfsResult<usize> {
        let entry = self.attach_canonical(path)?;
        let mut removed = 0;
        let children: Vec<String> = entry.child_paths().map(str::to_string).collect();
        for child in children {
            removed += self.delete_all_canonical(&child)?;
        }
        if path != "/" && self.delete_canonical(path)? {
            removed += 1;
        }
        Ok(removed)
    }

    // ---- rename ----

    /// Moves a file or folder. An existing destination is replaced.
    pub fn rename(&self, path: &str, new_path: &str) -> VfsResult<()> {
        let from = self.resolve(path)?;
        let to = self.resolve(new_path)?;
        if from == to {
            return Ok(());
        }
        if from == "/" || to == "/" || is_descendant(&to, &from) || is_descendant(&from, &to) {
            return Err(VfsError::invalid(format!("cannot move {from} into {to}")));
        }
        self.rename_canonical(&from, &to)
    }

    fn rename_canonical(&self, from: &str, to: &str) -> VfsResult<()> {
        let mut source = self.attach_canonical(from)?;
        match source.file_type() {
            FileType::Absent => return Err(VfsError::NotFound(from.to_string())),
            FileType::Folder => {
                self.delete_all_canonical(to)?;
                self.create_folder_canonical(to)?;
                let children: Vec<String> = source.child_paths().map(str::to_string).collect();
                for child in children {
                    self.rename_canonical(&child, &rebase(&child, from, to))?;
                }
            }
            FileType::File => {
                self.delete_all_canonical(to)?;
                let mut target =
                    FileEntry::absent(to, source.block_size().unwrap_or(self.config.block_size));
                for i in 0..source.block_count() {
                    let content = self.get_block(&mut source, i)?.content;
                    let mut block = self.get_block(&mut target, i)?;
                    block.content = content;
                    self.put_block(&block)?;
                }
                if target.is_absent() {
                    target.make_file();
                    target.set_content_size(source.content_size());
                    self.store_new(&mut target)?;
                } else {
                    target.set_content_size(source.content_size());
                    self.put_entry(&mut target)?;
                }
            }
        }
        self.delete_canonical(from)?;
        debug!("renamed {from} to {to}");
        Ok(())
    }

    // ---- listing ----

    /// Local children first, then stored ones. No ordering guarantee beyond that.
    pub fn list_children(&self, path: &str) -> VfsResult<Vec<String>> {
        let path = self.resolve(path)?;
        let entry = self.attach_canonical(&path)?;
        if entry.file_type() != FileType::Folder {
            return Err(VfsError::invalid(format!("{path} is not a folder")));
        }
        let mut children = match &self.local {
            Some(local) => local.children(&path),
            None => Vec::new(),
        };
        for child in entry.child_paths() {
            if !children.iter().any(|c| c == child) {
                children.push(child.to_string());
            }
        }
        Ok(children)
    }

    // ---- content access ----

    pub fn open(&self, path: &str, flags: OpenFlags) -> VfsResult<RandomAccessSession<'_>> {
        let entry = self.attach(path)?;
        RandomAccessSession::open(self, entry, flags)
    }

    pub fn read_to_vec(&self, path: &str) -> VfsResult<Vec<u8>> {
        let mut session = self.open(path, OpenFlags::READ)?;
        let mut out = vec![0u8; session.length() as usize];
        let mut filled = 0;
        while filled < out.len() {
            let n = session.read(&mut out[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        out.truncate(filled);
        session.close()?;
        Ok(out)
    }

    /// Replaces the file content, creating the file if needed.
    pub fn write_all(&self, path: &str, data: &[u8]) -> VfsResult<()> {
        self.create_file(path)?;
        let mut session = self.open(path, OpenFlags::WRITE | OpenFlags::TRUNCATE)?;
        session.write(data)?;
        session.close()
    }

    pub fn append(&self, path: &str, data: &[u8]) -> VfsResult<()> {
        let mut session = self.open(path, OpenFlags::WRITE | OpenFlags::APPEND)?;
        session.write(data)?;
        session.close()
    }

    pub fn truncate(&self, path: &str, len: u64) -> VfsResult<()> {
        let mut session = self.open(path, OpenFlags::READ | OpenFlags::WRITE)?;
        session.set_length(len)?;
        session.close()
    }
}
