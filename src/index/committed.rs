//! Merged, read-only view across a declared set of "in-use" index blobs:
//! the committed index the manager consults for every read that isn't
//! satisfied by a still-pending write.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use crate::blobstore::BlobStore;
use crate::crypto::{Encryptor, HashFunc};
use crate::error::{ManagerError, Result};
use crate::id::{index_blob_iv, ContentId};
use crate::index::builder::PackIndexBuilder;
use crate::info::Info;

/// The result of merging every entry across a set of index blobs using the
/// newest-`timestamp_seconds`-wins rule (ties favor the non-deleted entry).
#[derive(Debug, Default)]
pub struct CommittedContentIndex {
    entries: HashMap<ContentId, Info>,
    /// Index blob IDs that contributed to this merge, for diagnostics and
    /// for `iterate_packs`/recovery bookkeeping.
    source_blob_ids: Vec<String>,
    /// Where each index blob's decrypted plaintext is persisted locally, so
    /// a cold-started manager doesn't have to re-fetch and re-decrypt every
    /// index blob just to discover it already has a copy. `None` disables
    /// local persistence (in-memory-only, used by unit tests).
    local_dir: Option<PathBuf>,
}

impl CommittedContentIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    /// A committed index that persists each index blob's plaintext under
    /// `local_dir` as it is added, and consults that directory to answer
    /// [`Self::has_index_blob_id`] across process restarts.
    pub fn with_local_dir(local_dir: impl Into<PathBuf>) -> Result<Self> {
        let local_dir = local_dir.into();
        fs::create_dir_all(&local_dir).map_err(ManagerError::from)?;
        Ok(Self {
            local_dir: Some(local_dir),
            ..Self::default()
        })
    }

    pub fn source_blob_ids(&self) -> &[String] {
        &self.source_blob_ids
    }

    /// True if this index blob's plaintext is already persisted locally —
    /// the fast cold-start path that skips a blob-store fetch and a decrypt.
    pub fn has_index_blob_id(&self, blob_id: &str) -> bool {
        match &self.local_dir {
            Some(dir) => dir.join(sanitize(blob_id)).is_file(),
            None => false,
        }
    }

    /// Read a locally-persisted index blob's plaintext without touching the
    /// blob store. Only meaningful when [`Self::has_index_blob_id`] is true.
    pub fn read_local(&self, blob_id: &str) -> Result<Vec<u8>> {
        let dir = self
            .local_dir
            .as_ref()
            .ok_or(ManagerError::NotFound)?;
        fs::read(dir.join(sanitize(blob_id))).map_err(|_| ManagerError::NotFound)
    }

    pub fn get(&self, id: &ContentId) -> Option<&Info> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Info> {
        self.entries.values()
    }

    /// Fetch, decrypt and merge every index blob named in `blob_ids`. Blobs
    /// are fetched independently; a caller that wants bounded parallel
    /// fetching should fan this call out itself and merge the resulting
    /// builders with [`Self::merge_builder`].
    pub fn load(
        store: &dyn BlobStore,
        encryptor: &dyn Encryptor,
        blob_ids: &[String],
    ) -> Result<Self> {
        let mut index = Self::default();
        for blob_id in blob_ids {
            let builder = load_one_index_blob(store, encryptor, blob_id)?;
            index.merge_builder(&builder);
            index.source_blob_ids.push(blob_id.clone());
        }
        Ok(index)
    }

    /// Merge one parsed index blob's entries into this view.
    pub fn merge_builder(&mut self, builder: &PackIndexBuilder) {
        for info in builder.iter() {
            match self.entries.get(&info.id) {
                Some(existing) if !info.supersedes(existing) => {}
                _ => {
                    self.entries.insert(info.id.clone(), info.clone());
                }
            }
        }
    }

    /// Add one index blob's already-decrypted plaintext: persist it locally
    /// (if local persistence is enabled), merge its entries, and record it
    /// as a contributing blob. `is_new` marks a blob this process just wrote
    /// versus one discovered by listing — both are folded identically; the
    /// flag exists for callers that want to distinguish the two for logging.
    pub fn add(&mut self, blob_id: &str, plaintext: &[u8], is_new: bool) -> Result<()> {
        let _ = is_new;
        if let Some(dir) = &self.local_dir {
            fs::write(dir.join(sanitize(blob_id)), plaintext).map_err(ManagerError::from)?;
        }
        let builder = PackIndexBuilder::parse(plaintext)?;
        self.merge_builder(&builder);
        if !self.source_blob_ids.iter().any(|b| b == blob_id) {
            self.source_blob_ids.push(blob_id.to_string());
        }
        Ok(())
    }

    /// Replace the in-use set with `ids`, rebuilding the merged view
    /// strictly from those blobs' locally-persisted plaintext (every ID in
    /// `ids` must already have been folded in via [`Self::add`] in this
    /// load cycle). Returns whether the in-use set actually changed —
    /// blobs no longer in use are not deleted, only dropped from the view.
    pub fn use_blob_ids(&mut self, ids: &[String]) -> Result<bool> {
        let mut new_sorted = ids.to_vec();
        new_sorted.sort();
        let mut old_sorted = self.source_blob_ids.clone();
        old_sorted.sort();
        if new_sorted == old_sorted {
            return Ok(false);
        }

        let mut entries: HashMap<ContentId, Info> = HashMap::new();
        for id in ids {
            let plaintext = self.read_local(id)?;
            let builder = PackIndexBuilder::parse(&plaintext)?;
            for info in builder.iter() {
                match entries.get(&info.id) {
                    Some(existing) if !info.supersedes(existing) => {}
                    _ => {
                        entries.insert(info.id.clone(), info.clone());
                    }
                }
            }
        }
        self.entries = entries;
        self.source_blob_ids = ids.to_vec();
        Ok(true)
    }

    /// Fold results already fetched and parsed elsewhere (used by the
    /// bounded-parallel-fetch path in the manager).
    pub fn merge_builders(&mut self, builders: &[PackIndexBuilder], blob_ids: &[String]) {
        for builder in builders {
            self.merge_builder(builder);
        }
        self.source_blob_ids.extend(blob_ids.iter().cloned());
    }
}

fn sanitize(blob_id: &str) -> String {
    blob_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

/// Fetch, decrypt and parse a single index blob. Exposed so the manager can
/// drive this per-blob step across a worker pool.
pub fn load_one_index_blob(
    store: &dyn BlobStore,
    encryptor: &dyn Encryptor,
    blob_id: &str,
) -> Result<PackIndexBuilder> {
    let ciphertext = store.get(blob_id)?;
    let iv = index_blob_iv(blob_id)?;
    let plaintext = encryptor.decrypt(&ciphertext, &iv)?;
    PackIndexBuilder::parse(&plaintext)
}

/// Serialize, encrypt and store an index blob for `builder`'s contents,
/// returning the blob ID it was written under (the IV used to encrypt it is
/// derived from the blob's own content hash, consistent with pack blobs and
/// packed contents).
pub fn write_index_blob(
    store: &dyn BlobStore,
    hash_func: &dyn HashFunc,
    encryptor: &dyn Encryptor,
    builder: &PackIndexBuilder,
) -> Result<String> {
    let plaintext = builder.build()?;
    let digest = hash_func.hash(&plaintext);
    let id = ContentId::new(None, &digest);
    let iv = id.trailing_iv()?;
    let ciphertext = encryptor.encrypt(&plaintext, &iv)?;
    let blob_id = format!("{}{}", crate::index::INDEX_BLOB_PREFIX, id.as_str());
    store.put(&blob_id, &ciphertext)?;
    Ok(blob_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobstore::MemoryBlobStore;
    use crate::crypto::{Aes256GcmEncryptor, Blake3Hash};
    use crate::info::CURRENT_FORMAT_VERSION;

    fn sample(id: &str, ts: i64, deleted: bool) -> Info {
        Info {
            id: ContentId::parse(id),
            deleted,
            format_version: CURRENT_FORMAT_VERSION,
            pack_blob_id: if deleted { String::new() } else { "p0001".into() },
            pack_offset: 0,
            length: 4,
            timestamp_seconds: ts,
            payload: None,
        }
    }

    #[test]
    fn write_then_load_round_trips() {
        let store = MemoryBlobStore::new();
        let hash = Blake3Hash;
        let enc = Aes256GcmEncryptor::new([3u8; 32]);

        let mut builder = PackIndexBuilder::new();
        builder.add(sample("aaaa", 1, false));
        let blob_id = write_index_blob(&store, &hash, &enc, &builder).unwrap();

        let index = CommittedContentIndex::load(&store, &enc, &[blob_id]).unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.get(&ContentId::parse("aaaa")).is_some());
    }

    #[test]
    fn merge_prefers_newest_timestamp_across_blobs() {
        let mut older = PackIndexBuilder::new();
        older.add(sample("aaaa", 1, false));
        let mut newer = PackIndexBuilder::new();
        newer.add(sample("aaaa", 2, true));

        let mut index = CommittedContentIndex::empty();
        index.merge_builder(&older);
        index.merge_builder(&newer);

        let merged = index.get(&ContentId::parse("aaaa")).unwrap();
        assert!(merged.deleted, "the newer, deleted entry should win");
    }

    #[test]
    fn merge_is_order_independent() {
        let mut older = PackIndexBuilder::new();
        older.add(sample("aaaa", 1, false));
        let mut newer = PackIndexBuilder::new();
        newer.add(sample("aaaa", 2, true));

        let mut forward = CommittedContentIndex::empty();
        forward.merge_builder(&older);
        forward.merge_builder(&newer);

        let mut backward = CommittedContentIndex::empty();
        backward.merge_builder(&newer);
        backward.merge_builder(&older);

        assert_eq!(
            forward.get(&ContentId::parse("aaaa")),
            backward.get(&ContentId::parse("aaaa"))
        );
    }

    #[test]
    fn add_persists_locally_and_has_index_blob_id_reflects_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = CommittedContentIndex::with_local_dir(dir.path()).unwrap();
        assert!(!index.has_index_blob_id("n0001"));

        let mut builder = PackIndexBuilder::new();
        builder.add(sample("aaaa", 1, false));
        index.add("n0001", &builder.build().unwrap(), true).unwrap();

        assert!(index.has_index_blob_id("n0001"));
        let reloaded = CommittedContentIndex::with_local_dir(dir.path()).unwrap();
        assert!(
            reloaded.has_index_blob_id("n0001"),
            "local persistence must survive across instances (cold start)"
        );
    }

    #[test]
    fn use_blob_ids_drops_entries_from_blobs_no_longer_in_use() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = CommittedContentIndex::with_local_dir(dir.path()).unwrap();

        let mut b1 = PackIndexBuilder::new();
        b1.add(sample("aaaa", 1, false));
        index.add("n0001", &b1.build().unwrap(), true).unwrap();

        let mut b2 = PackIndexBuilder::new();
        b2.add(sample("bbbb", 1, false));
        index.add("n0002", &b2.build().unwrap(), true).unwrap();

        assert_eq!(index.len(), 2);

        let changed = index.use_blob_ids(&["n0002".to_string()]).unwrap();
        assert!(changed);
        assert_eq!(index.len(), 1);
        assert!(index.get(&ContentId::parse("aaaa")).is_none());
        assert!(index.get(&ContentId::parse("bbbb")).is_some());

        let unchanged = index.use_blob_ids(&["n0002".to_string()]).unwrap();
        assert!(!unchanged);
    }
}
