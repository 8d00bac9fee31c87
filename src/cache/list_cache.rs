//! Short-TTL cache of blob listings, used when enumerating index blobs
//! (prefix `n`) so that repeated `load_pack_indexes` calls in a short window
//! don't each pay for a full listing round-trip against the blob store.

use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::blobstore::BlobStore;
use crate::config::DEFAULT_INDEX_LOAD_ATTEMPTS;
use crate::error::{ManagerError, Result};

#[derive(Serialize, Deserialize)]
struct CachedListing {
    cached_at_secs: i64,
    ids: Vec<String>,
}

/// TTL of 0 disables caching: every call goes straight to the blob store.
pub struct ListCache {
    cache_file: PathBuf,
    ttl_secs: u64,
}

impl ListCache {
    pub fn new(cache_dir: impl Into<PathBuf>, ttl_secs: u64) -> Result<Self> {
        let cache_dir = cache_dir.into();
        if ttl_secs > 0 {
            fs::create_dir_all(&cache_dir).map_err(ManagerError::from)?;
        }
        Ok(Self {
            cache_file: cache_dir.join("list_cache.json"),
            ttl_secs,
        })
    }

    /// List blob IDs with `prefix`, serving a cached listing if it is still
    /// within its TTL. A cache miss or expiry falls through to
    /// [`BlobStore::list_all_consistent`].
    pub fn list(&self, store: &dyn BlobStore, prefix: &str) -> Result<Vec<String>> {
        if self.ttl_secs == 0 {
            return store.list_all_consistent(prefix, DEFAULT_INDEX_LOAD_ATTEMPTS);
        }

        let now = now_secs();
        if let Some(cached) = self.read_cache() {
            if now - cached.cached_at_secs < self.ttl_secs as i64 {
                return Ok(cached.ids);
            }
        }

        let ids = store.list_all_consistent(prefix, DEFAULT_INDEX_LOAD_ATTEMPTS)?;
        self.write_cache(&CachedListing {
            cached_at_secs: now,
            ids: ids.clone(),
        });
        Ok(ids)
    }

    /// Drop the cached listing, forcing the next `list` to hit the store.
    /// Called after writing a new index blob so it's visible immediately.
    pub fn invalidate(&self) {
        let _ = fs::remove_file(&self.cache_file);
    }

    fn read_cache(&self) -> Option<CachedListing> {
        let data = fs::read(&self.cache_file).ok()?;
        serde_json::from_slice(&data).ok()
    }

    fn write_cache(&self, listing: &CachedListing) {
        if let Ok(data) = serde_json::to_vec(listing) {
            let _ = fs::write(&self.cache_file, data);
        }
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobstore::MemoryBlobStore;
    use tempfile::tempdir;

    #[test]
    fn caches_listing_within_ttl() {
        let dir = tempdir().unwrap();
        let store = MemoryBlobStore::new();
        store.put("n0001", b"x").unwrap();
        let cache = ListCache::new(dir.path(), 60).unwrap();

        let first = cache.list(&store, "n").unwrap();
        store.put("n0002", b"y").unwrap();
        let second = cache.list(&store, "n").unwrap();
        assert_eq!(first, second, "cached listing should not see the new blob");
    }

    #[test]
    fn invalidate_forces_refresh() {
        let dir = tempdir().unwrap();
        let store = MemoryBlobStore::new();
        store.put("n0001", b"x").unwrap();
        let cache = ListCache::new(dir.path(), 60).unwrap();

        let first = cache.list(&store, "n").unwrap();
        assert_eq!(first.len(), 1);
        store.put("n0002", b"y").unwrap();
        cache.invalidate();
        let second = cache.list(&store, "n").unwrap();
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn zero_ttl_disables_caching() {
        let dir = tempdir().unwrap();
        let store = MemoryBlobStore::new();
        store.put("n0001", b"x").unwrap();
        let cache = ListCache::new(dir.path(), 0).unwrap();

        let first = cache.list(&store, "n").unwrap();
        store.put("n0002", b"y").unwrap();
        let second = cache.list(&store, "n").unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 2);
    }
}
