//! Blob store contract: the durable, content-ignorant storage this crate
//! layers content addressing, dedup and encryption on top of. Neither
//! implementation below is required by any external interface; they exist so
//! the manager has something real to run against (tests use the in-memory
//! store, the CLI uses the filesystem one).

mod filesystem;
mod memory;

pub use filesystem::FilesystemBlobStore;
pub use memory::MemoryBlobStore;

use crate::error::Result;

/// A durable key-value store keyed by opaque blob IDs. Implementations need
/// not be transactional; the manager tolerates a blob existing without yet
/// being referenced, and never assumes atomic multi-blob writes.
pub trait BlobStore: Send + Sync {
    fn put(&self, id: &str, data: &[u8]) -> Result<()>;
    fn get(&self, id: &str) -> Result<Vec<u8>>;
    fn delete(&self, id: &str) -> Result<()>;

    /// List blob IDs starting with `prefix`. Implementations backed by
    /// eventually-consistent storage may return a stale or incomplete
    /// listing; callers that need a consistent view should use
    /// [`BlobStore::list_all_consistent`] instead.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Ranged read: `offset` bytes in, `length` bytes long. A negative
    /// `length` means "to end of blob". The default implementation fetches
    /// the whole blob and slices it; a backend that can seek (e.g. a local
    /// file) should override this to avoid the full read.
    fn get_range(&self, id: &str, offset: u64, length: i64) -> Result<Vec<u8>> {
        let data = self.get(id)?;
        let start = offset as usize;
        if start > data.len() {
            return Err(crate::error::ManagerError::invalid_format(format!(
                "range start {start} past end of blob {id} (len {})",
                data.len()
            )));
        }
        if length < 0 {
            Ok(data[start..].to_vec())
        } else {
            let end = (start + length as usize).min(data.len());
            Ok(data[start..end].to_vec())
        }
    }

    /// List twice and retry while the two listings disagree, then return the
    /// union of attempts that matched. This is the "list twice" consistency
    /// strategy for blob stores that may otherwise return divergent listings
    /// across calls (e.g. an eventually-consistent object store).
    fn list_all_consistent(&self, prefix: &str, max_attempts: u32) -> Result<Vec<String>> {
        let mut last = self.list(prefix)?;
        for _ in 1..max_attempts {
            let next = self.list(prefix)?;
            if same_set(&last, &next) {
                return Ok(next);
            }
            last = next;
        }
        Ok(last)
    }
}

fn same_set(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a_sorted = a.to_vec();
    let mut b_sorted = b.to_vec();
    a_sorted.sort();
    b_sorted.sort();
    a_sorted == b_sorted
}
