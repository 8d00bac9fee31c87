use std::collections::BTreeMap;
use std::sync::Mutex;

use super::BlobStore;
use crate::error::{ManagerError, Result};

/// In-memory blob store; contents do not survive process restart. Used in
/// tests and by the integration-test scenarios.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, id: &str, data: &[u8]) -> Result<()> {
        self.blobs
            .lock()
            .unwrap()
            .insert(id.to_string(), data.to_vec());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or(ManagerError::NotFound)
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.blobs.lock().unwrap().remove(id);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .blobs
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete_round_trip() {
        let store = MemoryBlobStore::new();
        store.put("p0001", b"hello").unwrap();
        assert_eq!(store.get("p0001").unwrap(), b"hello");
        store.delete("p0001").unwrap();
        assert!(store.get("p0001").is_err());
    }

    #[test]
    fn list_filters_by_prefix() {
        let store = MemoryBlobStore::new();
        store.put("p0001", b"a").unwrap();
        store.put("n0001", b"b").unwrap();
        let mut listed = store.list("p").unwrap();
        listed.sort();
        assert_eq!(listed, vec!["p0001".to_string()]);
    }
}
