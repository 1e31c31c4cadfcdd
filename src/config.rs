//! Runtime configuration.
//!
//! The default block size is picked at build time through the `sli*` features;
//! everything else is read from a JSON document or left at its default.

use serde::Deserialize;

use crate::error::{VfsError, VfsResult};

#[cfg(feature = "sli4k")]
pub const DEFAULT_BLOCK_SIZE: u32 = 4 * 1024;

#[cfg(all(feature = "sli32k", not(feature = "sli4k")))]
pub const DEFAULT_BLOCK_SIZE: u32 = 32 * 1024;

#[cfg(all(
    feature = "sli128k",
    not(any(feature = "sli4k", feature = "sli32k"))
))]
pub const DEFAULT_BLOCK_SIZE: u32 = 128 * 1024;

#[cfg(all(
    feature = "sli512k",
    not(any(feature = "sli4k", feature = "sli32k", feature = "sli128k"))
))]
pub const DEFAULT_BLOCK_SIZE: u32 = 512 * 1024;

#[cfg(not(any(
    feature = "sli4k",
    feature = "sli32k",
    feature = "sli128k",
    feature = "sli512k"
)))]
pub const DEFAULT_BLOCK_SIZE: u32 = 128 * 1024;

/// Largest block that fits in one store item once entity overhead is paid.
pub const MAX_BLOCK_SIZE: u32 = 1023 * 1024;

/// Tier-2 expiration window: 20 minutes.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 20 * 60;

pub const DEFAULT_SHARED_CACHE_CAPACITY: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VfsConfig {
    /// Base directory that canonical paths are rooted at.
    pub root_path: String,
    /// Block size in bytes for files created without an explicit size.
    pub block_size: u32,
    pub cache_ttl_secs: u64,
    /// Entry bound for the in-process stand-in of the distributed cache.
    pub shared_cache_capacity: usize,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            root_path: "/".to_string(),
            block_size: DEFAULT_BLOCK_SIZE,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            shared_cache_capacity: DEFAULT_SHARED_CACHE_CAPACITY,
        }
    }
}

impl VfsConfig {
    pub fn from_json(text: &str) -> VfsResult<Self> {
        let config: VfsConfig = serde_json::from_str(text)?;
        config.validate()
    }

    /// Checks the block size and clamps it to the per-item ceiling.
    pub fn validate(mut self) -> VfsResult<Self> {
        if self.block_size == 0 {
            return Err(VfsError::invalid("block size must be positive"));
        }
        if self.shared_cache_capacity == 0 {
            return Err(VfsError::invalid("shared cache capacity must be positive"));
        }
        self.block_size = self.block_size.min(MAX_BLOCK_SIZE);
        if !self.root_path.starts_with('/') {
            self.root_path.insert(0, '/');
        }
        Ok(self)
    }

    pub fn cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Converts a block size given in KiB, clamping to 1023 KiB.
pub fn block_size_from_kib(kib: i64) -> VfsResult<u32> {
    if kib <= 0 {
        return Err(VfsError::invalid(format!("invalid block size: {kib}")));
    }
    Ok(kib.min(1023) as u32 * 1024)
}

/// Smallest buffer a session allocates for a block of `block_size` bytes.
pub fn min_buffer_size(block_size: u32) -> usize {
    let block_size = block_size as usize;
    if block_size <= 8 * 1024 {
        block_size
    } else if block_size <= 32 * 1024 {
        8 * 1024
    } else if block_size >= 256 * 1024 {
        64 * 1024
    } else {
        block_size >> 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_defaults() {
        let config = VfsConfig::from_json(r#"{ "root_path": "srv/app" }"#).unwrap();
        assert_eq!(config.root_path, "/srv/app");
        assert_eq!(config.block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(config.cache_ttl_secs, 1200);
    }

    #[test]
    fn test_block_size_clamped() {
        let config = VfsConfig::from_json(r#"{ "block_size": 4194304 }"#).unwrap();
        assert_eq!(config.block_size, MAX_BLOCK_SIZE);
        assert!(VfsConfig::from_json(r#"{ "block_size": 0 }"#).is_err());
    }

    #[test]
    fn test_block_size_from_kib() {
        assert_eq!(block_size_from_kib(1).unwrap(), 1024);
        assert_eq!(block_size_from_kib(5000).unwrap(), MAX_BLOCK_SIZE);
        assert!(block_size_from_kib(0).is_err());
        assert!(block_size_from_kib(-3).is_err());
    }

    #[test]
    fn test_min_buffer_size() {
        assert_eq!(min_buffer_size(4), 4);
        assert_eq!(min_buffer_size(8 * 1024), 8 * 1024);
        assert_eq!(min_buffer_size(32 * 1024), 8 * 1024);
        assert_eq!(min_buffer_size(128 * 1024), 32 * 1024);
        assert_eq!(min_buffer_size(MAX_BLOCK_SIZE), 64 * 1024);
    }
}
