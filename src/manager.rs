//! The content manager: the single lock-guarded orchestrator tying together
//! hashing, encryption, pending packs, the index builder, the committed
//! index, and the two caches.
//!
//! Lock discipline (spec §5): one mutex protects `pending`, `builder`,
//! `flush_after` and `disable_index_flush_count`. Blob-store I/O and
//! encryption never happen while that mutex is held — `*_locked` helpers
//! require the caller to already hold it and touch only that state;
//! everything else takes the lock briefly, clones what it needs, and
//! releases it before doing I/O. The committed index has its own lock
//! (`RwLock`), since it is append-only and a read against it should never
//! block a concurrent writer building the next pack.
//!
//! A write is mirrored into `builder` the moment it lands in `pending`, not
//! only once its pack is sealed (spec §4.12's explicit carve-out: a builder
//! entry also present in a pending pack is exempt from the usual
//! non-deleted-implies-real-pack-blob rule). The mirror carries the
//! plaintext in `Info::payload` and an empty `pack_blob_id`; sealing
//! overwrites it in place with the real, payload-less entry once the pack
//! blob is durably written. Keeping the mirror alive (rather than dropping
//! it from `builder` the instant `pending` hands its entries off for
//! sealing) closes the window where a concurrent reader would otherwise see
//! neither the pending write nor the sealed one. A tombstone carries no
//! bytes to seal, so it bypasses `pending` entirely and goes straight into
//! `builder`.

use std::sync::{mpsc, Mutex, RwLock};

use log::{debug, info, warn};

use crate::blobstore::BlobStore;
use crate::cache::list_cache::ListCache;
use crate::cache::DiskLruCache;
use crate::cancel::CancellationToken;
use crate::config::{CachingOptions, FormattingOptions};
use crate::crypto::{self, Encryptor, HashFunc};
use crate::error::{ManagerError, Result};
use crate::id::{self, ContentId};
use crate::index::{CommittedContentIndex, PackIndexBuilder};
use crate::info::{Info, CURRENT_FORMAT_VERSION};
use crate::pack::{self, SealedPack};
use crate::pending::PendingPacks;
use crate::recovery::RecoveryReport;
use crate::stats::{Stats, StatsSnapshot};

/// Inner state guarded by the manager's single mutex (spec §5 "Lock
/// discipline"). Nothing in here is ever touched without the lock held.
struct LockedState {
    pending: PendingPacks,
    builder: PackIndexBuilder,
    flush_after: i64,
    disable_index_flush_count: u32,
}

impl LockedState {
    /// Record a not-yet-sealed write in both `pending` (so its prefix's
    /// total length is tracked for sealing) and `builder` (spec §4.12's
    /// pending-mirror carve-out), overwriting any tombstone or stale mirror
    /// already at this ID.
    fn add_to_pending(&mut self, id: ContentId, data: Vec<u8>, timestamp: i64, prefix: char) {
        let mirror = Info {
            id: id.clone(),
            deleted: false,
            format_version: CURRENT_FORMAT_VERSION,
            pack_blob_id: String::new(),
            pack_offset: 0,
            length: data.len() as u32,
            timestamp_seconds: timestamp,
            payload: Some(data.clone()),
        };
        self.pending.for_prefix(prefix).add(id, data);
        self.builder.add(mirror);
    }
}

/// Selects which contents `iterate_contents`/`iterate_packs` visit.
#[derive(Debug, Clone, Copy)]
pub struct IterateOptions<'a> {
    pub prefix: &'a str,
    pub include_deleted: bool,
}

impl<'a> Default for IterateOptions<'a> {
    fn default() -> Self {
        Self {
            prefix: "",
            include_deleted: false,
        }
    }
}

/// One pack blob's contents, grouped by `iterate_packs`.
#[derive(Debug, Clone)]
pub struct PackInfo {
    pub pack_id: String,
    pub content_count: usize,
    pub total_size: u64,
    pub infos: Vec<Info>,
}

pub struct Manager {
    store: Box<dyn BlobStore>,
    hash_func: Box<dyn HashFunc>,
    encryptor: Box<dyn Encryptor>,
    formatting: FormattingOptions,
    caching: CachingOptions,

    content_cache: DiskLruCache,
    metadata_cache: DiskLruCache,
    list_cache: ListCache,

    stats: Stats,
    now: Box<dyn Fn() -> i64 + Send + Sync>,

    locked: Mutex<LockedState>,
    committed: RwLock<CommittedContentIndex>,

    verify_invariants: bool,
}

impl Manager {
    /// Construct a manager over `store`, persisting caches and the local
    /// index-blob mirror under `state_dir`. `now` supplies wall-clock
    /// seconds as a plain injected function (spec §9 "Time injection") so
    /// tests can drive a deterministic clock.
    pub fn new(
        store: Box<dyn BlobStore>,
        state_dir: impl Into<std::path::PathBuf>,
        formatting: FormattingOptions,
        caching: CachingOptions,
        now: impl Fn() -> i64 + Send + Sync + 'static,
    ) -> Result<Self> {
        if formatting.format_version < crate::info::MIN_SUPPORTED_FORMAT_VERSION
            || formatting.format_version > crate::info::MAX_SUPPORTED_FORMAT_VERSION
        {
            return Err(ManagerError::invalid_argument(format!(
                "unsupported format_version {}",
                formatting.format_version
            )));
        }

        let hash_func = crypto::hash_func_by_name(&formatting.hash)?;
        // A missing password derives a zero key; callers wiring up a real
        // repository always set one. Tests that don't care about secrecy
        // rely on this to avoid every call site threading a password through.
        let key = match &formatting.password {
            Some(password) => crypto::derive_key(password, &formatting.key_derivation_salt)?,
            None => [0u8; 32],
        };
        let encryptor = crypto::encryptor_by_name(&formatting.encryption, key)?;

        // Validate the encryptor at construction (spec §4.1): an empty test
        // payload must round-trip before the manager accepts any real writes.
        let test_iv = [0u8; crypto::IV_LEN];
        let ciphertext = encryptor.encrypt(&[], &test_iv)?;
        let roundtrip = encryptor.decrypt(&ciphertext, &test_iv)?;
        if roundtrip != Vec::<u8>::new() {
            return Err(ManagerError::invalid_argument(
                "encryptor failed to round-trip an empty test payload",
            ));
        }

        let state_dir = state_dir.into();
        let content_cache = DiskLruCache::new(
            state_dir.join("cache-content"),
            caching.max_cache_size_bytes,
        )?;
        let metadata_cache = DiskLruCache::new(
            state_dir.join("cache-metadata"),
            caching.max_metadata_cache_size_bytes,
        )?;
        let list_cache =
            ListCache::new(state_dir.join("cache-list"), caching.list_cache_ttl_secs)?;
        let committed = CommittedContentIndex::with_local_dir(state_dir.join("index-local"))?;

        let now0 = (now)();
        Ok(Self {
            store,
            hash_func,
            encryptor,
            formatting,
            caching,
            content_cache,
            metadata_cache,
            list_cache,
            stats: Stats::default(),
            now: Box::new(now),
            locked: Mutex::new(LockedState {
                pending: PendingPacks::new(),
                builder: PackIndexBuilder::new(),
                flush_after: now0 + crate::config::DEFAULT_FLUSH_INTERVAL_SECS,
                disable_index_flush_count: 0,
            }),
            committed: RwLock::new(committed),
            verify_invariants: crate::config::verify_invariants_enabled(),
        })
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn cache_for(&self, id: &ContentId) -> &DiskLruCache {
        if id.has_prefix() {
            &self.metadata_cache
        } else {
            &self.content_cache
        }
    }

    // ── Write path (spec §4.6) ──────────────────────────────────────────

    pub fn write_content(&self, data: &[u8], prefix: &str) -> Result<ContentId> {
        id::validate_prefix(prefix)?;
        self.stats.add_hashed(data.len());

        let digest = self.hash_func.hash(data);
        let prefix_char = prefix.chars().next();
        let content_id = ContentId::new(prefix_char, &digest);

        if self.exists_and_not_deleted(&content_id) {
            debug!(target: "content_manager::manager", "dedup hit for {content_id}");
            return Ok(content_id);
        }

        let pack_prefix = content_id.pack_prefix_char();
        let timestamp = (self.now)();
        let needs_seal = {
            let mut state = self.locked.lock().unwrap();
            state.add_to_pending(content_id.clone(), data.to_vec(), timestamp, pack_prefix);
            state.pending.for_prefix(pack_prefix).total_len() >= self.formatting.max_pack_size
        };
        self.assert_invariants();

        if needs_seal {
            self.seal_pack_unlocked(pack_prefix)?;
        }

        self.stats.add_written(data.len());
        Ok(content_id)
    }

    fn exists_and_not_deleted(&self, id: &ContentId) -> bool {
        {
            let state = self.locked.lock().unwrap();
            if state.pending.find(id).is_some() {
                return true;
            }
            if let Some(info) = state.builder.get(id) {
                return !info.deleted;
            }
        }
        self.committed
            .read()
            .unwrap()
            .get(id)
            .map(|info| !info.deleted)
            .unwrap_or(false)
    }

    // ── Delete (spec §3 "Lifecycle", §7 "idempotent") ───────────────────

    fn tombstone(&self, id: &ContentId) -> Info {
        Info {
            id: id.clone(),
            deleted: true,
            format_version: CURRENT_FORMAT_VERSION,
            pack_blob_id: String::new(),
            pack_offset: 0,
            length: 0,
            timestamp_seconds: (self.now)(),
            payload: None,
        }
    }

    pub fn delete_content(&self, id: &ContentId) -> Result<()> {
        {
            let mut state = self.locked.lock().unwrap();

            // Still unsealed: nothing has touched the blob store yet, so
            // forget it outright rather than tombstoning it (mirrors the Go
            // source's `DeleteContent` discarding a live `currentPackItems`
            // entry instead of writing a delete marker for it).
            if state.pending.remove(id) {
                state.builder.remove(id);
                drop(state);
                self.assert_invariants();
                return Ok(());
            }

            // Sealed into a pack but its index hasn't flushed yet.
            if let Some(existing) = state.builder.get(id) {
                if existing.deleted {
                    return Ok(());
                }
                let tombstone = self.tombstone(id);
                state.builder.add(tombstone);
                drop(state);
                self.assert_invariants();
                return Ok(());
            }
        }

        // Visible only via the committed index (or never written at all —
        // deleting an unknown ID is a harmless no-op tombstone, same as the
        // committed-index case).
        if let Some(existing) = self.committed.read().unwrap().get(id) {
            if existing.deleted {
                return Ok(());
            }
        }

        let tombstone = self.tombstone(id);
        self.locked.lock().unwrap().builder.add(tombstone);
        self.assert_invariants();
        Ok(())
    }

    // ── Read path (spec §4.9) ────────────────────────────────────────────

    /// Metadata lookup: pending (unsealed) writes synthesize an `Info` on the
    /// fly, then the builder (sealed-but-unflushed entries and tombstones),
    /// then the committed index. Each lookup takes the lock only briefly.
    pub fn get_info(&self, id: &ContentId) -> Result<Info> {
        {
            let state = self.locked.lock().unwrap();
            if let Some(payload) = state.pending.find(id) {
                return Ok(Info {
                    id: id.clone(),
                    deleted: false,
                    format_version: CURRENT_FORMAT_VERSION,
                    pack_blob_id: String::new(),
                    pack_offset: 0,
                    length: payload.len() as u32,
                    timestamp_seconds: (self.now)(),
                    payload: Some(payload.to_vec()),
                });
            }
            if let Some(info) = state.builder.get(id) {
                return Ok(info.clone());
            }
        }
        self.committed
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or(ManagerError::NotFound)
    }

    /// Mirrors the Go source's `Manager.ContentInfo` (spec Appendix B): the
    /// same lookup `get_content` performs internally, exposed so callers can
    /// inspect metadata without paying for the payload fetch.
    pub fn content_info(&self, id: &ContentId) -> Result<Info> {
        self.get_info(id)
    }

    pub fn get_content(&self, id: &ContentId) -> Result<Vec<u8>> {
        let sealed_info = {
            let state = self.locked.lock().unwrap();
            if let Some(payload) = state.pending.find(id) {
                let data = payload.to_vec();
                drop(state);
                self.stats.add_read(data.len());
                return Ok(data);
            }
            state.builder.get(id).cloned()
        };

        let info = match sealed_info {
            Some(info) => info,
            None => self
                .committed
                .read()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or(ManagerError::NotFound)?,
        };

        if info.deleted {
            return Err(ManagerError::NotFound);
        }

        // A builder entry still carrying its plaintext is a pending write
        // (or one caught mid-seal, between `pending.take_entries()` and the
        // pack blob landing in `builder`) — serve it directly rather than
        // trying to fetch a pack blob that may not exist yet.
        if let Some(payload) = &info.payload {
            let data = payload.clone();
            self.stats.add_read(data.len());
            return Ok(data);
        }

        let cache = self.cache_for(id);
        let ciphertext = cache.get_or_fetch(
            id.as_str(),
            self.store.as_ref(),
            &info.pack_blob_id,
            info.pack_offset as u64,
            info.length as i64,
        )?;

        let iv = id.trailing_iv()?;
        let plaintext = self.encryptor.decrypt(&ciphertext, &iv)?;
        self.stats.add_decrypted(plaintext.len());

        if !self.encryptor.is_authenticated() {
            let digest = self.hash_func.hash(&plaintext);
            let expected = id.trailing_iv()?;
            let actual_tail = &digest[digest.len() - expected.len()..];
            if actual_tail != expected {
                self.stats.add_invalid();
                return Err(ManagerError::InvalidChecksum {
                    blob_id: id.as_str().to_string(),
                    expected: hex::encode(expected),
                    actual: hex::encode(actual_tail),
                });
            }
        }
        self.stats.add_valid();
        self.stats.add_read(plaintext.len());
        Ok(plaintext)
    }

    // ── Sealing (spec §4.7) ─────────────────────────────────────────────

    /// Must be called without the lock held — it performs blob-store I/O and
    /// encryption. Takes the lock only to snapshot-and-clear the pending
    /// pack for `prefix`, and again afterward to fold the new `Info`s in.
    fn seal_pack_unlocked(&self, prefix: char) -> Result<()> {
        let (entries, timestamp) = {
            let mut state = self.locked.lock().unwrap();
            let pack = state.pending.for_prefix(prefix);
            if pack.is_empty() {
                return Ok(());
            }
            (pack.take_entries(), (self.now)())
        };
        if entries.is_empty() {
            return Ok(());
        }

        let sealed: SealedPack = pack::seal_pack(
            prefix,
            &entries,
            &self.formatting,
            self.hash_func.as_ref(),
            self.encryptor.as_ref(),
            timestamp,
        )?;
        self.stats.add_encrypted(sealed.data.len());

        for info in &sealed.infos {
            if info.id.has_prefix() {
                let start = info.pack_offset as usize;
                let end = start + info.length as usize;
                if let Some(ciphertext) = sealed.data.get(start..end) {
                    self.metadata_cache.put(info.id.as_str(), ciphertext);
                }
            }
        }

        self.store.put(&sealed.blob_id, &sealed.data)?;
        info!(
            target: "content_manager::pack",
            "sealed pack {} with {} contents ({} bytes)",
            sealed.blob_id,
            sealed.infos.len(),
            sealed.data.len()
        );

        let should_flush = {
            let mut state = self.locked.lock().unwrap();
            for info in sealed.infos {
                state.builder.add(info);
            }
            (self.now)() >= state.flush_after
        };

        self.assert_invariants();

        if should_flush {
            self.flush()?;
        }

        Ok(())
    }

    // ── Flushing (spec §4.8) ─────────────────────────────────────────────

    /// Seals every pending pack, then flushes the index builder.
    pub fn flush(&self) -> Result<()> {
        for prefix in ['p', 'q'] {
            self.seal_pack_unlocked(prefix)?;
        }
        self.flush_indexes_unlocked()
    }

    fn flush_indexes_unlocked(&self) -> Result<()> {
        let plaintext = {
            let state = self.locked.lock().unwrap();
            if state.disable_index_flush_count > 0 {
                return Ok(());
            }
            // Only sealed entries (no `payload`) are durable enough to
            // commit. A concurrent write that landed its pending-mirror
            // after this flush's own seal step hasn't been written to any
            // pack blob yet and must wait for the next flush.
            let mut to_flush = PackIndexBuilder::new();
            for info in state.builder.iter() {
                if info.payload.is_none() {
                    to_flush.add(info.clone());
                }
            }
            if to_flush.is_empty() {
                return Ok(());
            }
            to_flush.build()?
        };

        let digest = self.hash_func.hash(&plaintext);
        let blob_id_suffix = ContentId::new(None, &digest);
        let iv = blob_id_suffix.trailing_iv()?;
        let ciphertext = self.encryptor.encrypt(&plaintext, &iv)?;
        let blob_id = format!(
            "{}{}",
            crate::index::INDEX_BLOB_PREFIX,
            blob_id_suffix.as_str()
        );
        self.store.put(&blob_id, &ciphertext)?;
        self.list_cache.invalidate();

        self.committed
            .write()
            .unwrap()
            .add(&blob_id, &plaintext, true)?;

        let mut state = self.locked.lock().unwrap();
        let still_pending: Vec<Info> = state
            .builder
            .iter()
            .filter(|info| info.payload.is_some())
            .cloned()
            .collect();
        state.builder = PackIndexBuilder::new();
        for info in still_pending {
            state.builder.add(info);
        }
        state.flush_after = (self.now)() + crate::config::DEFAULT_FLUSH_INTERVAL_SECS;
        drop(state);
        info!(target: "content_manager::manager", "flushed index blob {blob_id}");
        self.assert_invariants();
        Ok(())
    }

    pub fn disable_index_flush(&self) {
        self.locked.lock().unwrap().disable_index_flush_count += 1;
    }

    pub fn enable_index_flush(&self) {
        let mut state = self.locked.lock().unwrap();
        if state.disable_index_flush_count > 0 {
            state.disable_index_flush_count -= 1;
        }
    }

    // ── Loading / refreshing (spec §4.10) ───────────────────────────────

    /// Lists index blobs, fetches+decrypts any not already cached locally,
    /// and declares the resulting set in use. Retried with exponential
    /// backoff on `BlobNotFound` (handles eventual list consistency).
    pub fn load_pack_indexes(&self, cancel: &CancellationToken) -> Result<bool> {
        let max_attempts = crate::config::DEFAULT_INDEX_LOAD_ATTEMPTS;
        let mut backoff_ms = 100u64;

        for attempt in 0..max_attempts {
            cancel.check()?;
            let ids = self.list_cache.list(
                self.store.as_ref(),
                &crate::index::INDEX_BLOB_PREFIX.to_string(),
            )?;

            match self.load_listed_blobs(&ids, cancel) {
                Ok(()) => {
                    return self.committed.write().unwrap().use_blob_ids(&ids);
                }
                Err(ManagerError::NotFound) => {
                    warn!(
                        target: "content_manager::manager",
                        "index blob vanished mid-load (attempt {}/{max_attempts}), retrying",
                        attempt + 1
                    );
                    self.list_cache.invalidate();
                    std::thread::sleep(std::time::Duration::from_millis(backoff_ms));
                    backoff_ms = (backoff_ms * 2).min(5_000);
                }
                Err(other) => return Err(other),
            }
        }
        Err(ManagerError::BlobStore(format!(
            "failed to load index blobs after {max_attempts} attempts"
        )))
    }

    /// Bounded worker pool: fetch+decrypt every listed index blob not already
    /// cached locally, in parallel up to `caching.parallel_fetches`. The
    /// first error wins and aborts the remaining work.
    fn load_listed_blobs(&self, ids: &[String], cancel: &CancellationToken) -> Result<()> {
        let to_fetch: Vec<String> = {
            let committed = self.committed.read().unwrap();
            ids.iter()
                .filter(|id| !committed.has_index_blob_id(id))
                .cloned()
                .collect()
        };

        for id in ids {
            if !to_fetch.contains(id) {
                let plaintext = self.committed.read().unwrap().read_local(id)?;
                self.committed.write().unwrap().add(id, &plaintext, false)?;
            }
        }
        if to_fetch.is_empty() {
            return Ok(());
        }

        let workers = self.caching.parallel_fetches.max(1).min(to_fetch.len());
        let (tx, rx) = mpsc::channel::<String>();
        for id in &to_fetch {
            tx.send(id.clone()).unwrap();
        }
        drop(tx);

        let rx = Mutex::new(rx);
        let first_error: Mutex<Option<ManagerError>> = Mutex::new(None);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    if cancel.is_cancelled() {
                        let mut slot = first_error.lock().unwrap();
                        if slot.is_none() {
                            *slot = Some(ManagerError::Cancelled);
                        }
                        return;
                    }
                    if first_error.lock().unwrap().is_some() {
                        return;
                    }
                    let blob_id = {
                        let rx = rx.lock().unwrap();
                        rx.recv()
                    };
                    let Ok(blob_id) = blob_id else { return };

                    let result = self
                        .store
                        .get(&blob_id)
                        .and_then(|ciphertext| {
                            let iv = crate::id::index_blob_iv(&blob_id)?;
                            self.encryptor
                                .decrypt(&ciphertext, &iv)
                                .map_err(ManagerError::from)
                        })
                        .and_then(|plaintext| {
                            self.committed
                                .write()
                                .unwrap()
                                .add(&blob_id, &plaintext, false)
                        });

                    if let Err(e) = result {
                        let mut slot = first_error.lock().unwrap();
                        if slot.is_none() {
                            *slot = Some(e);
                        }
                    }
                });
            }
        });

        match first_error.into_inner().unwrap() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Re-load the committed index set, returning whether it changed.
    pub fn refresh(&self) -> Result<bool> {
        self.load_pack_indexes(&CancellationToken::new())
    }

    pub fn close(&self) {
        // Caches and the blob store own their own resources; nothing to
        // release explicitly beyond letting `self` drop.
    }

    // ── Iteration (spec §4.11) ───────────────────────────────────────────

    pub fn iterate_contents(
        &self,
        opts: IterateOptions<'_>,
        cancel: &CancellationToken,
        mut callback: impl FnMut(&Info) -> Result<()>,
    ) -> Result<()> {
        // `builder` already mirrors every still-pending write (spec §4.12),
        // so it alone covers both unsealed and sealed-but-unflushed content —
        // no separate pass over `pending` is needed.
        let builder_infos: Vec<Info> = {
            let state = self.locked.lock().unwrap();
            state.builder.iter().cloned().collect()
        };

        let mut seen = std::collections::HashSet::new();
        for info in builder_infos.iter() {
            cancel.check()?;
            if !info.id.as_str().starts_with(opts.prefix) {
                continue;
            }
            if info.deleted && !opts.include_deleted {
                continue;
            }
            seen.insert(info.id.clone());
            callback(info)?;
        }

        let committed = self.committed.read().unwrap();
        for info in committed.iter() {
            cancel.check()?;
            if seen.contains(&info.id) {
                continue;
            }
            if !info.id.as_str().starts_with(opts.prefix) {
                continue;
            }
            if info.deleted && !opts.include_deleted {
                continue;
            }
            callback(info)?;
        }
        Ok(())
    }

    pub fn iterate_packs(
        &self,
        opts: IterateOptions<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<PackInfo>> {
        let mut by_pack: std::collections::BTreeMap<String, Vec<Info>> =
            std::collections::BTreeMap::new();
        self.iterate_contents(opts, cancel, |info| {
            if !info.pack_blob_id.is_empty() {
                by_pack
                    .entry(info.pack_blob_id.clone())
                    .or_default()
                    .push(info.clone());
            }
            Ok(())
        })?;

        Ok(by_pack
            .into_iter()
            .map(|(pack_id, infos)| PackInfo {
                pack_id,
                content_count: infos.len(),
                total_size: infos.iter().map(|i| i.length as u64).sum(),
                infos,
            })
            .collect())
    }

    /// Contents sitting in a pack smaller than `threshold` bytes (0 defaults
    /// to 80% of `max_pack_size`) — candidates for a compaction rewrite.
    pub fn iterate_content_in_short_packs(
        &self,
        threshold: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Info>> {
        let threshold = if threshold == 0 {
            self.formatting.max_pack_size * 4 / 5
        } else {
            threshold
        };
        let packs = self.iterate_packs(IterateOptions::default(), cancel)?;
        Ok(packs
            .into_iter()
            .filter(|p| (p.total_size as usize) < threshold)
            .flat_map(|p| p.infos)
            .collect())
    }

    /// Pack blobs (`p`/`q` prefixed) present in the store but referenced by no
    /// live `Info` — candidates for external garbage collection. Never
    /// deletes anything itself.
    pub fn iterate_unreferenced_blobs(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let mut referenced = std::collections::HashSet::new();
        self.iterate_contents(
            IterateOptions {
                prefix: "",
                include_deleted: true,
            },
            cancel,
            |info| {
                if !info.pack_blob_id.is_empty() {
                    referenced.insert(info.pack_blob_id.clone());
                }
                Ok(())
            },
        )?;

        let mut unreferenced = Vec::new();
        for prefix in ["p", "q"] {
            for blob_id in self.store.list(prefix)? {
                cancel.check()?;
                if !referenced.contains(&blob_id) {
                    unreferenced.push(blob_id);
                }
            }
        }
        Ok(unreferenced)
    }

    /// Re-write a content through the normal write path, e.g. to migrate it
    /// to a newer format version or out of a short pack (spec Appendix B).
    pub fn rewrite_content(&self, id: &ContentId) -> Result<()> {
        let data = self.get_content(id)?;
        self.delete_content(id)?;
        let prefix = id.pack_prefix_char();
        let timestamp = (self.now)();
        {
            let mut state = self.locked.lock().unwrap();
            state.add_to_pending(id.clone(), data, timestamp, prefix);
        }
        self.assert_invariants();
        Ok(())
    }

    // ── Invariants (spec §4.12) ──────────────────────────────────────────

    /// No-op unless `CONTENT_MANAGER_VERIFY_INVARIANTS=1` (spec §6). Checked
    /// after every operation that mutates `pending` or `builder`.
    pub fn assert_invariants(&self) {
        if !self.verify_invariants {
            return;
        }
        let state = self.locked.lock().unwrap();

        // Every still-pending item must be mirrored in the builder.
        for entry in state.pending.all_entries() {
            assert!(
                state.builder.get(&entry.id).is_some(),
                "pending entry {} is not mirrored in the builder",
                entry.id
            );
        }

        for info in state.builder.iter() {
            if info.payload.is_some() {
                // Carve-out for a builder entry also in a pending pack (or
                // mid-seal): not yet a real pack blob, so the usual
                // non-deleted-implies-non-empty-pack_blob_id rule doesn't
                // apply to it yet.
                assert!(
                    !info.deleted && info.pack_blob_id.is_empty(),
                    "pending-mirrored entry {} should be a live, blob-less placeholder",
                    info.id
                );
                assert!(
                    info.timestamp_seconds != 0,
                    "pending-mirrored entry {} has no timestamp",
                    info.id
                );
                continue;
            }
            info.assert_well_formed();
        }
    }

    // ── Recovery (spec §8 scenario 5) ───────────────────────────────────

    /// Scan every pack blob's recovery block and reconstruct an index purely
    /// from what survived, bypassing index blobs entirely.
    pub fn recover_scan(&self, cancel: &CancellationToken) -> Result<RecoveryReport> {
        crate::recovery::scan(self.store.as_ref(), self.encryptor.as_ref(), cancel)
    }

    /// Commit a recovery scan's reconstructed index: write it out as a real
    /// index blob and fold it into the committed index, so that a
    /// subsequent `list()` sees exactly what recovery found. Returns the new
    /// blob's ID, or an empty string if there was nothing to commit.
    pub fn commit_recovery(&self, report: &RecoveryReport) -> Result<String> {
        if report.index.is_empty() {
            return Ok(String::new());
        }
        let plaintext = report.index.build()?;
        let blob_id = crate::index::committed::write_index_blob(
            self.store.as_ref(),
            self.hash_func.as_ref(),
            self.encryptor.as_ref(),
            &report.index,
        )?;
        self.list_cache.invalidate();
        self.committed
            .write()
            .unwrap()
            .add(&blob_id, &plaintext, true)?;
        info!(
            target: "content_manager::manager",
            "committed recovery index blob {blob_id} ({} content(s))",
            report.index.len()
        );
        Ok(blob_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobstore::MemoryBlobStore;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    fn manager_with_clock(dir: &std::path::Path, clock: Arc<AtomicI64>) -> Manager {
        let store = Box::new(MemoryBlobStore::new());
        let formatting = FormattingOptions {
            max_pack_size: 50,
            ..FormattingOptions::default()
        };
        let caching = CachingOptions {
            max_cache_size_bytes: 0,
            max_metadata_cache_size_bytes: 0,
            list_cache_ttl_secs: 0,
            ..CachingOptions::default()
        };
        let clock2 = clock.clone();
        Manager::new(store, dir, formatting, caching, move || {
            clock2.load(Ordering::SeqCst)
        })
        .unwrap()
    }

    #[test]
    fn write_is_idempotent_and_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(AtomicI64::new(1_000));
        let mgr = manager_with_clock(dir.path(), clock);

        let id1 = mgr.write_content(b"hello world", "").unwrap();
        let id2 = mgr.write_content(b"hello world", "").unwrap();
        assert_eq!(id1, id2);
        assert_eq!(mgr.stats().written_contents, 1);
    }

    #[test]
    fn read_after_write_returns_same_bytes_before_any_seal() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(AtomicI64::new(1_000));
        let mgr = manager_with_clock(dir.path(), clock);

        let id = mgr.write_content(b"some payload", "").unwrap();
        let data = mgr.get_content(&id).unwrap();
        assert_eq!(data, b"some payload");
    }

    #[test]
    fn delete_then_read_is_not_found_until_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(AtomicI64::new(1_000));
        let mgr = manager_with_clock(dir.path(), clock.clone());

        let id = mgr.write_content(b"to be deleted", "").unwrap();
        mgr.delete_content(&id).unwrap();
        assert!(matches!(mgr.get_content(&id), Err(ManagerError::NotFound)));

        // Double delete is a no-op.
        mgr.delete_content(&id).unwrap();

        clock.fetch_add(10, Ordering::SeqCst);
        let id2 = mgr.write_content(b"to be deleted", "").unwrap();
        assert_eq!(id, id2);
        assert_eq!(mgr.get_content(&id).unwrap(), b"to be deleted");
    }

    #[test]
    fn delete_before_seal_drops_pending_write_instead_of_reviving_it() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(AtomicI64::new(1_000));
        let mgr = manager_with_clock(dir.path(), clock.clone());

        let id = mgr.write_content(b"short lived", "").unwrap();
        mgr.delete_content(&id).unwrap();
        mgr.flush().unwrap();

        assert!(matches!(mgr.get_content(&id), Err(ManagerError::NotFound)));
        // Nothing was ever sealed, so no pack blob should exist.
        assert!(mgr.store.list("p").unwrap().is_empty());
    }

    #[test]
    fn sealing_happens_once_max_pack_size_is_reached() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(AtomicI64::new(1_000));
        let mgr = manager_with_clock(dir.path(), clock);

        mgr.write_content(&[0u8; 30], "").unwrap();
        mgr.write_content(&[1u8; 30], "").unwrap();
        mgr.write_content(&[2u8; 5], "").unwrap();

        let packs = mgr.store.list("p").unwrap();
        assert_eq!(packs.len(), 1, "one pack should have been sealed");
    }

    #[test]
    fn flush_makes_contents_survive_reload_from_committed_index() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(AtomicI64::new(1_000));
        let mgr = manager_with_clock(dir.path(), clock);

        let id = mgr.write_content(b"durable content", "").unwrap();
        mgr.flush().unwrap();

        let index_blobs = mgr.store.list("n").unwrap();
        assert_eq!(index_blobs.len(), 1);

        // Force the lookup through the committed index alone, bypassing the
        // builder, by clearing it directly.
        mgr.locked.lock().unwrap().builder = PackIndexBuilder::new();
        let info = mgr.content_info(&id).unwrap();
        assert!(!info.deleted);
        assert!(!info.pack_blob_id.is_empty());
        assert_eq!(mgr.get_content(&id).unwrap(), b"durable content");
    }

    #[test]
    fn load_pack_indexes_reconstructs_committed_view_on_a_fresh_manager() {
        let blob_dir = tempfile::tempdir().unwrap();
        let state_dir_a = tempfile::tempdir().unwrap();
        let clock = Arc::new(AtomicI64::new(1_000));

        let store = crate::blobstore::FilesystemBlobStore::new(blob_dir.path()).unwrap();
        let formatting = FormattingOptions {
            max_pack_size: 50,
            ..FormattingOptions::default()
        };
        let caching = CachingOptions {
            max_cache_size_bytes: 0,
            max_metadata_cache_size_bytes: 0,
            list_cache_ttl_secs: 0,
            ..CachingOptions::default()
        };
        let clock2 = clock.clone();
        let mgr_a = Manager::new(
            Box::new(store),
            state_dir_a.path(),
            formatting.clone(),
            caching,
            move || clock2.load(Ordering::SeqCst),
        )
        .unwrap();
        let id = mgr_a.write_content(b"reload me", "").unwrap();
        mgr_a.flush().unwrap();

        let state_dir_b = tempfile::tempdir().unwrap();
        let store_b = crate::blobstore::FilesystemBlobStore::new(blob_dir.path()).unwrap();
        let caching_b = CachingOptions {
            max_cache_size_bytes: 0,
            max_metadata_cache_size_bytes: 0,
            list_cache_ttl_secs: 0,
            ..CachingOptions::default()
        };
        let clock3 = clock.clone();
        let mgr_b = Manager::new(
            Box::new(store_b),
            state_dir_b.path(),
            formatting,
            caching_b,
            move || clock3.load(Ordering::SeqCst),
        )
        .unwrap();

        let changed = mgr_b.load_pack_indexes(&CancellationToken::new()).unwrap();
        assert!(changed);
        assert_eq!(mgr_b.get_content(&id).unwrap(), b"reload me");
    }
}
