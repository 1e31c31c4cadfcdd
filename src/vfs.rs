//! Process-wide handle shared by every unit of work.

use std::sync::Arc;

use log::info;

use crate::cache::{ConsistencyCache, SharedCache};
use crate::config::VfsConfig;
use crate::entry::FileType;
use crate::error::{VfsError, VfsResult};
use crate::kv::KvStore;
use crate::path::{BasePathResolver, LocalChildren, PathResolver};
use crate::store::FileEntryStore;

/// Cheap to clone; clones share the KV store and the shared cache.
#[derive(Clone)]
pub struct Vfs {
    kv: Arc<dyn KvStore>,
    shared: Arc<dyn SharedCache>,
    resolver: Arc<dyn PathResolver>,
    local: Option<Arc<dyn LocalChildren>>,
    config: Arc<VfsConfig>,
}

impl Vfs {
    pub fn new(
        kv: Arc<dyn KvStore>,
        shared: Arc<dyn SharedCache>,
        config: VfsConfig,
    ) -> VfsResult<Self> {
        let config = config.validate()?;
        Ok(Self {
            kv,
            shared,
            resolver: Arc::new(BasePathResolver::new(&config.root_path)),
            local: None,
            config: Arc::new(config),
        })
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn PathResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_local_children(mut self, local: Arc<dyn LocalChildren>) -> Self {
        self.local = Some(local);
        self
    }

    /// Creates the root folder if it is not stored yet.
    pub fn init(&self) -> VfsResult<()> {
        self.run(|store| match store.load_uncached("/") {
            Ok(root) if root.file_type() == FileType::Folder => Ok(()),
            Ok(_) => Err(VfsError::StorageFailure(
                "root entry is stored but is not a folder".to_string(),
            )),
            Err(e) if e.is_not_found() => {
                store.create_folder("/")?;
                info!(
                    "initialized root folder, block size {} bytes",
                    self.config.block_size
                );
                Ok(())
            }
            Err(e) => Err(e),
        })
    }

    /// Starts a unit of work with a fresh execution-scoped cache tier.
    pub fn begin(&self) -> FileEntryStore {
        FileEntryStore::new(
            self.kv.clone(),
            ConsistencyCache::new(self.shared.clone(), self.config.cache_ttl()),
            self.resolver.clone(),
            self.local.clone(),
            self.config.clone(),
        )
    }

    /// Runs `f` as one unit of work. The execution-scoped cache is released
    /// when `f` returns, whether or not it failed.
    pub fn run<T, F>(&self, f: F) -> VfsResult<T>
    where
        F: FnOnce(&FileEntryStore) -> VfsResult<T>,
    {
        let store = self.begin();
        let result = f(&store);
        store.clear_cache();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::kv::MemoryKvStore;

    fn vfs() -> Vfs {
        Vfs::new(
            Arc::new(MemoryKvStore::new()),
            Arc::new(MemoryCache::new(16)),
            VfsConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_init_is_idempotent() {
        let vfs = vfs();
        vfs.init().unwrap();
        vfs.init().unwrap();
        let root = vfs.run(|store| store.load_uncached("/")).unwrap();
        assert_eq!(root.file_type(), FileType::Folder);
    }

    #[test]
    fn test_units_do_not_share_tier1() {
        let vfs = vfs();
        vfs.init().unwrap();
        let first = vfs.begin();
        first.create_file("/a").unwrap();
        assert!(first.cache().contains_local("/a"));
        let second = vfs.begin();
        assert!(!second.cache().contains_local("/a"));
        // tier 2 still answers for the second unit
        assert!(second.exists("/a").unwrap());
        assert!(second.cache().contains_local("/a"));
    }

    #[test]
    fn test_run_returns_closure_result() {
        let vfs = vfs();
        vfs.init().unwrap();
        let cached = vfs
            .run(|store| {
                store.create_folder("/d")?;
                Ok(store.cache().local_len())
            })
            .unwrap();
        assert!(cached > 0);
        let err = vfs.run(|store| store.delete("/")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_clear_cache_empties_tier1() {
        let vfs = vfs();
        vfs.init().unwrap();
        let store = vfs.begin();
        store.create_folder("/d").unwrap();
        assert!(store.cache().local_len() > 0);
        store.clear_cache();
        assert_eq!(store.cache().local_len(), 0);
        // tier 2 and the store still answer
        assert_eq!(store.file_type("/d").unwrap(), FileType::Folder);
    }

    #[test]
    fn test_custom_resolver() {
        struct Lowercase;
        impl PathResolver for Lowercase {
            fn resolve(&self, path: &str) -> VfsResult<String> {
                BasePathResolver::new("/").resolve(&path.to_lowercase())
            }
        }
        let vfs = vfs().with_resolver(Arc::new(Lowercase));
        vfs.init().unwrap();
        let store = vfs.begin();
        store.write_all("/Docs/README", b"hi").unwrap();
        assert_eq!(store.read_to_vec("/docs/readme").unwrap(), b"hi");
        assert_eq!(store.list_children("/DOCS").unwrap(), vec!["/docs/readme"]);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = VfsConfig {
            block_size: 0,
            ..VfsConfig::default()
        };
        let err = Vfs::new(
            Arc::new(MemoryKvStore::new()),
            Arc::new(MemoryCache::new(16)),
            config,
        )
        .err()
        .map(|e| e.kind());
        assert_eq!(err, Some(crate::error::ErrorKind::InvalidArgument));
    }
}
