//! In-memory, mutable index under construction: one entry per content known
//! to the current pending generation, serialized to a sorted index blob when
//! the manager flushes.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::id::ContentId;
use crate::info::Info;

/// Accumulates `Info` records and serializes them sorted by content ID, the
/// same sort key a [`super::committed::CommittedContentIndex`] expects when
/// it parses a blob back.
#[derive(Debug, Default)]
pub struct PackIndexBuilder {
    entries: BTreeMap<ContentId, Info>,
}

impl PackIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Insert or overwrite an entry unconditionally. This is the manager's
    /// own sequential-accumulation primitive: the manager is the single
    /// owner of its builder and only ever calls `add` with an `Info` that is
    /// already known to be the right one to keep — e.g. upgrading a
    /// pending-write mirror in place with the sealed, pack-backed `Info` for
    /// the same write, where both carry the same timestamp and neither is a
    /// tombstone, so [`Info::supersedes`]'s tie-break (non-deleted beats
    /// deleted) would not otherwise let the upgrade win.
    ///
    /// Folding entries from multiple independent sources — several pack
    /// blobs' recovery blocks, several index blobs — must use [`Self::merge`]
    /// instead, which is the supersedes-aware operation spec §4.5 describes.
    ///
    /// Deliberately does not call [`Info::assert_well_formed`]: the manager
    /// mirrors still-pending writes into the builder with an empty
    /// `pack_blob_id` (spec §4.12's carve-out for "entries also in a
    /// pending pack"), so well-formedness here is contextual, not a
    /// per-entry property. `Manager::assert_invariants` is where that
    /// carve-out is actually applied.
    pub fn add(&mut self, info: Info) {
        self.entries.insert(info.id.clone(), info);
    }

    /// Insert `info`, but only if it [`Info::supersedes`] whatever is
    /// already at that ID (or nothing is). Spec §4.5's "newest-timestamp-
    /// wins" merge rule, for folding entries whose relative write order
    /// isn't otherwise known — e.g. recovery scanning pack blobs in
    /// whatever order `BlobStore::list` happens to return them, where an
    /// older, superseded pack can easily be visited after a newer one.
    pub fn merge(&mut self, info: Info) {
        match self.entries.get(&info.id) {
            Some(existing) if !info.supersedes(existing) => {}
            _ => {
                self.entries.insert(info.id.clone(), info);
            }
        }
    }

    /// Drop an entry outright, e.g. when a still-pending write is deleted
    /// before ever being sealed (nothing was durably written, so there is
    /// nothing to tombstone).
    pub fn remove(&mut self, id: &ContentId) -> Option<Info> {
        self.entries.remove(id)
    }

    pub fn get(&self, id: &ContentId) -> Option<&Info> {
        self.entries.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Info> {
        self.entries.values()
    }

    /// Serialize to the binary index blob format: entries in ascending ID
    /// order, each written via [`Info::write`].
    pub fn build(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for info in self.entries.values() {
            info.write(&mut out)?;
        }
        Ok(out)
    }

    /// Parse a binary index blob produced by [`Self::build`].
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = std::io::Cursor::new(data);
        let mut len_buf = [0u8; 4];
        std::io::Read::read_exact(&mut cursor, &mut len_buf)?;
        let count = u32::from_le_bytes(len_buf);

        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let info = Info::read(&mut cursor)?;
            entries.insert(info.id.clone(), info);
        }
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::CURRENT_FORMAT_VERSION;

    fn sample(id: &str, ts: i64) -> Info {
        Info {
            id: ContentId::parse(id),
            deleted: false,
            format_version: CURRENT_FORMAT_VERSION,
            pack_blob_id: "p0001".into(),
            pack_offset: 0,
            length: 4,
            timestamp_seconds: ts,
            payload: None,
        }
    }

    #[test]
    fn build_then_parse_round_trips() {
        let mut builder = PackIndexBuilder::new();
        builder.add(sample("bbbb", 1));
        builder.add(sample("aaaa", 2));

        let bytes = builder.build().unwrap();
        let parsed = PackIndexBuilder::parse(&bytes).unwrap();

        assert_eq!(parsed.len(), 2);
        assert_eq!(
            parsed.get(&ContentId::parse("aaaa")).unwrap().timestamp_seconds,
            2
        );
    }

    #[test]
    fn entries_serialize_in_id_order() {
        let mut builder = PackIndexBuilder::new();
        builder.add(sample("zzzz", 1));
        builder.add(sample("aaaa", 1));
        builder.add(sample("mmmm", 1));

        let ids: Vec<&str> = builder.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["aaaa", "mmmm", "zzzz"]);
    }

    #[test]
    fn merge_keeps_the_newer_entry_regardless_of_call_order() {
        let older = sample("aaaa", 1);
        let newer = Info {
            pack_blob_id: "p0002".into(),
            ..sample("aaaa", 2)
        };

        let mut forward = PackIndexBuilder::new();
        forward.merge(older.clone());
        forward.merge(newer.clone());

        let mut backward = PackIndexBuilder::new();
        backward.merge(newer.clone());
        backward.merge(older.clone());

        assert_eq!(forward.get(&older.id).unwrap().pack_blob_id, "p0002");
        assert_eq!(backward.get(&older.id).unwrap().pack_blob_id, "p0002");
    }

    #[test]
    fn merge_unlike_add_never_lets_a_stale_entry_win() {
        let mut builder = PackIndexBuilder::new();
        builder.merge(sample("aaaa", 5));
        // A later merge with an older timestamp must not overwrite it, unlike
        // `add`, which would.
        builder.merge(sample("aaaa", 3));
        assert_eq!(
            builder.get(&ContentId::parse("aaaa")).unwrap().timestamp_seconds,
            5
        );
    }
}
