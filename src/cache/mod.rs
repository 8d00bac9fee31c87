//! On-disk caches fronting the blob store: content bytes, content metadata,
//! and (in [`list_cache`]) blob listings. All three are pure performance
//! layers — a cold or disabled cache must never change the answer the
//! manager returns, only how quickly it arrives.

pub mod list_cache;

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::blobstore::BlobStore;
use crate::error::{ManagerError, Result};

/// Bounded on-disk LRU cache keyed by opaque string keys. A `max_size_bytes`
/// of 0 disables the cache: every `get` misses and `put` is a no-op, so
/// callers always fall back to the blob store directly.
pub struct DiskLruCache {
    root: PathBuf,
    max_size_bytes: u64,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    /// Least-recently-used order, oldest at the front.
    order: VecDeque<String>,
    sizes: std::collections::HashMap<String, u64>,
    total: u64,
}

impl DiskLruCache {
    pub fn new(root: impl Into<PathBuf>, max_size_bytes: u64) -> Result<Self> {
        let root = root.into();
        if max_size_bytes > 0 {
            fs::create_dir_all(&root).map_err(ManagerError::from)?;
        }
        Ok(Self {
            root,
            max_size_bytes,
            state: Mutex::new(State::default()),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.max_size_bytes > 0
    }

    fn sanitize(key: &str) -> String {
        key.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        if !self.is_enabled() {
            return None;
        }
        let path = self.root.join(Self::sanitize(key));
        let data = fs::read(&path).ok()?;
        let mut state = self.state.lock().unwrap();
        if let Some(pos) = state.order.iter().position(|k| k == key) {
            state.order.remove(pos);
        }
        state.order.push_back(key.to_string());
        Some(data)
    }

    pub fn put(&self, key: &str, data: &[u8]) {
        if !self.is_enabled() || data.len() as u64 > self.max_size_bytes {
            return;
        }
        let path = self.root.join(Self::sanitize(key));
        if fs::write(&path, data).is_err() {
            return;
        }

        let mut state = self.state.lock().unwrap();
        if let Some(pos) = state.order.iter().position(|k| k == key) {
            state.order.remove(pos);
        }
        let old_size = state.sizes.insert(key.to_string(), data.len() as u64);
        state.total += data.len() as u64;
        if let Some(old) = old_size {
            state.total -= old;
        }
        state.order.push_back(key.to_string());

        while state.total > self.max_size_bytes {
            let Some(victim) = state.order.pop_front() else {
                break;
            };
            if let Some(size) = state.sizes.remove(&victim) {
                state.total -= size;
            }
            let _ = fs::remove_file(self.root.join(Self::sanitize(&victim)));
        }
    }

    /// `get(key, blob_id, offset, length) -> bytes` from spec §4.2: serve a
    /// cache hit, or fetch the ranged bytes from `store`, cache them, and
    /// return them. A disabled cache (capacity 0) degrades to a direct
    /// pass-through, since `get`/`put` above are already no-ops in that case.
    pub fn get_or_fetch(
        &self,
        key: &str,
        store: &dyn BlobStore,
        blob_id: &str,
        offset: u64,
        length: i64,
    ) -> Result<Vec<u8>> {
        if let Some(cached) = self.get(key) {
            return Ok(cached);
        }
        let data = store.get_range(blob_id, offset, length)?;
        self.put(key, &data);
        Ok(data)
    }
}
