//! Index-bypass recovery scanner — reconstruct the content index without any
//! index blob.
//!
//! # How it works
//!
//! Every pack blob carries its own recovery block (see [`crate::pack`]):
//! an encrypted, self-describing list of the `Info` entries for the
//! contents it holds. `scan()` lists every pack blob in the store and pulls
//! that block back out of each one with [`crate::pack::recover_pack_index`].
//! It does not need a single index blob, a committed index, or any prior
//! state — a pack blob is sufficient on its own.
//!
//! ## Recovery quality
//!
//! | Quality | Meaning |
//! |---------|---------|
//! | `Full` | Every pack blob's recovery block was readable |
//! | `Partial` | Some pack blobs unreadable, most recovered |
//! | `Catastrophic` | Fewer than half of pack blobs yielded a recovery block |
//!
//! ## Pack health
//!
//! Each scanned pack blob receives a [`BlobHealth`] verdict:
//! - `Healthy` — recovery block decrypted and parsed
//! - `Unreadable` — blob fetch, decrypt or parse failed; the reason is kept
//!   for diagnostics

use std::collections::HashSet;

use crate::blobstore::BlobStore;
use crate::cancel::CancellationToken;
use crate::crypto::Encryptor;
use crate::error::Result;
use crate::index::PackIndexBuilder;

/// The health verdict for one scanned pack blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobHealth {
    /// Recovery block fetched, decrypted and parsed successfully.
    Healthy,
    /// Fetch, decrypt or parse failed — the blob cannot be trusted.
    Unreadable { reason: String },
}

impl BlobHealth {
    pub fn is_usable(&self) -> bool {
        matches!(self, BlobHealth::Healthy)
    }
}

/// Diagnostic record for one scanned pack blob.
#[derive(Debug, Clone)]
pub struct ScannedBlob {
    pub blob_id: String,
    pub health: BlobHealth,
    /// Number of content entries recovered from this blob's recovery block
    /// (0 when unreadable).
    pub content_count: usize,
}

/// Overall quality of a recovery scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryQuality {
    /// Every pack blob's recovery block was readable.
    Full,
    /// Some pack blobs unreadable; the rest recovered.
    Partial,
    /// Fewer than 50% of pack blobs yielded a recovery block.
    Catastrophic,
}

/// Complete report produced by [`scan`].
#[derive(Debug)]
pub struct RecoveryReport {
    /// Total pack blobs scanned (healthy + unreadable).
    pub total_scanned: usize,
    /// Pack blobs whose recovery block was readable.
    pub healthy_blobs: usize,
    /// Pack blobs whose recovery block could not be recovered.
    pub unreadable_blobs: usize,
    /// Per-blob diagnostic records.
    pub blob_log: Vec<ScannedBlob>,
    /// Reconstructed index, merged across every healthy pack blob.
    pub index: PackIndexBuilder,
    /// Overall quality rating.
    pub quality: RecoveryQuality,
}

impl RecoveryReport {
    /// Percentage of pack blobs that are healthy (0.0-100.0).
    pub fn health_pct(&self) -> f64 {
        if self.total_scanned == 0 {
            return 100.0;
        }
        self.healthy_blobs as f64 / self.total_scanned as f64 * 100.0
    }

    /// Summary line for display.
    pub fn summary(&self) -> String {
        format!(
            "{:?} recovery: {}/{} pack blobs healthy ({:.1}%), {} content(s) recovered",
            self.quality,
            self.healthy_blobs,
            self.total_scanned,
            self.health_pct(),
            self.index.len(),
        )
    }
}

/// Scan every pack blob (`p` and `q` prefixed) in `store` and rebuild a
/// [`PackIndexBuilder`] purely from their appended recovery blocks, bypassing
/// index blobs entirely. Used when every index blob referencing a pack has
/// been lost.
///
/// This function does not return `Err` because of a single unreadable pack
/// blob — that is recorded as `BlobHealth::Unreadable` in the report. Only a
/// listing failure or cancellation propagates as `Err`.
pub fn scan(
    store: &dyn BlobStore,
    encryptor: &dyn Encryptor,
    cancel: &CancellationToken,
) -> Result<RecoveryReport> {
    let mut blob_ids: Vec<String> = Vec::new();
    for prefix in ["p", "q"] {
        blob_ids.extend(store.list_all_consistent(prefix, 3)?);
    }
    // Guard against a backend that lists overlapping prefixes twice.
    let mut seen_ids = HashSet::new();
    blob_ids.retain(|id| seen_ids.insert(id.clone()));

    let mut index = PackIndexBuilder::new();
    let mut blob_log = Vec::with_capacity(blob_ids.len());
    let mut healthy_blobs = 0usize;

    for blob_id in &blob_ids {
        cancel.check()?;
        let scanned = match recover_one(store, encryptor, blob_id, &mut index) {
            Ok(content_count) => {
                healthy_blobs += 1;
                ScannedBlob {
                    blob_id: blob_id.clone(),
                    health: BlobHealth::Healthy,
                    content_count,
                }
            }
            Err(e) => ScannedBlob {
                blob_id: blob_id.clone(),
                health: BlobHealth::Unreadable { reason: e.to_string() },
                content_count: 0,
            },
        };
        blob_log.push(scanned);
    }

    let total_scanned = blob_log.len();
    let quality = if total_scanned == 0 {
        RecoveryQuality::Full
    } else {
        let pct = healthy_blobs as f64 / total_scanned as f64;
        if pct >= 0.999 {
            RecoveryQuality::Full
        } else if pct >= 0.50 {
            RecoveryQuality::Partial
        } else {
            RecoveryQuality::Catastrophic
        }
    };

    Ok(RecoveryReport {
        total_scanned,
        healthy_blobs,
        unreadable_blobs: total_scanned - healthy_blobs,
        blob_log,
        index,
        quality,
    })
}

/// Folds one pack blob's recovered entries into `index` via
/// [`PackIndexBuilder::merge`], not `add`: pack blobs are listed in whatever
/// order the store returns (random blob IDs, no correlation with write
/// order), so the same content ID can appear with an older `Info` in one
/// pack and a newer one in another — e.g. after `Manager::rewrite_content`
/// re-seals a content into a fresh pack while its original, stale pack (and
/// recovery block) still physically exists. Only the newest-timestamp entry
/// may survive the fold.
fn recover_one(
    store: &dyn BlobStore,
    encryptor: &dyn Encryptor,
    blob_id: &str,
    index: &mut PackIndexBuilder,
) -> Result<usize> {
    let data = store.get(blob_id)?;
    let recovered = crate::pack::recover_pack_index(&data, blob_id, encryptor)?;
    let count = recovered.len();
    for info in recovered.iter() {
        index.merge(info.clone());
    }
    Ok(count)
}
