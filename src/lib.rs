//! Block-chunked virtual file storage over a key-value entity store.
//!
//! File content is cut into fixed-size blocks, one store entity each, so no
//! single item exceeds the store's size ceiling. File and folder metadata is
//! keyed by canonical path and fronted by a two-tier cache: one tier per unit
//! of work, one shared between workers.
//!
//! ```no_run
//! use std::sync::Arc;
//! use blockvfs::{JammdbKvStore, MemoryCache, Vfs, VfsConfig};
//!
//! let kv = JammdbKvStore::open("vfs.db").unwrap();
//! let vfs = Vfs::new(Arc::new(kv), Arc::new(MemoryCache::new(4096)), VfsConfig::default()).unwrap();
//! vfs.init().unwrap();
//! vfs.run(|store| store.write_all("/hello.txt", b"hello")).unwrap();
//! ```

pub mod block;
pub mod cache;
pub mod config;
pub mod entry;
pub mod error;
pub mod kv;
pub mod path;
pub mod session;
pub mod store;
pub mod vfs;


pub use cache::{ConsistencyCache, MemoryCache, SharedCache};
pub use config::VfsConfig;
pub use entry::{FileEntry, FileType};
pub use error::{ErrorKind, VfsError, VfsResult};
pub use kv::{JammdbKvStore, KvStore, MemoryKvStore};
pub use path::{BasePathResolver, LocalChildren, PathResolver};
pub use session::{OpenFlags, RandomAccessSession};
pub use store::FileEntryStore;
pub use vfs::Vfs;
