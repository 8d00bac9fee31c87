//! `Info` — the index entry for one content: where its bytes live inside a
//! pack blob, and whether it has been deleted.
//!
//! Binary layout of one record, little-endian throughout (matches the
//! teacher's manual field-packing style in `block.rs`/`superblock.rs`):
//!
//! ```text
//!   u16   id_len
//!   [u8]  id bytes (utf8)
//!   u8    deleted (0/1)
//!   u8    format_version
//!   u16   pack_blob_id_len
//!   [u8]  pack_blob_id bytes (utf8)
//!   u32   pack_offset
//!   u32   length
//!   i64   timestamp_seconds
//! ```
//!
//! Records are sorted by the byte order of `id` before being written; this is
//! the sort key used both for index blob storage and for merge iteration.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::id::ContentId;

/// The current write-format epoch. Stored per-`Info` as a single byte.
pub const CURRENT_FORMAT_VERSION: u8 = 1;
pub const MIN_SUPPORTED_FORMAT_VERSION: u8 = 1;
pub const MAX_SUPPORTED_FORMAT_VERSION: u8 = CURRENT_FORMAT_VERSION;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    pub id: ContentId,
    pub deleted: bool,
    pub format_version: u8,
    /// Empty if inline/pending (mirrors the Go source's `blob.ID("")`).
    pub pack_blob_id: String,
    pub pack_offset: u32,
    pub length: u32,
    pub timestamp_seconds: i64,
    /// Plaintext payload while still pending; never serialized to an index
    /// blob (cleared once the owning pack is sealed).
    pub payload: Option<Vec<u8>>,
}

impl Info {
    /// A non-deleted `Info` must carry a pack location and a format version
    /// we recognise; a deleted one must not reference a pack blob.
    pub fn assert_well_formed(&self) {
        if self.deleted {
            assert!(
                self.pack_blob_id.is_empty(),
                "deleted content {} must not reference a pack blob",
                self.id
            );
        } else {
            assert!(
                !self.pack_blob_id.is_empty(),
                "non-deleted content {} must reference a pack blob",
                self.id
            );
            assert!(
                self.format_version >= MIN_SUPPORTED_FORMAT_VERSION
                    && self.format_version <= MAX_SUPPORTED_FORMAT_VERSION,
                "content {} has unsupported format version {}",
                self.id,
                self.format_version
            );
        }
        assert!(
            self.timestamp_seconds != 0,
            "content {} has no timestamp",
            self.id
        );
    }

    pub fn write<W: Write>(&self, mut w: W) -> io::Result<()> {
        let id_bytes = self.id.as_str().as_bytes();
        w.write_u16::<LittleEndian>(id_bytes.len() as u16)?;
        w.write_all(id_bytes)?;
        w.write_u8(self.deleted as u8)?;
        w.write_u8(self.format_version)?;
        let pack_bytes = self.pack_blob_id.as_bytes();
        w.write_u16::<LittleEndian>(pack_bytes.len() as u16)?;
        w.write_all(pack_bytes)?;
        w.write_u32::<LittleEndian>(self.pack_offset)?;
        w.write_u32::<LittleEndian>(self.length)?;
        w.write_i64::<LittleEndian>(self.timestamp_seconds)?;
        Ok(())
    }

    pub fn read<R: Read>(mut r: R) -> io::Result<Self> {
        let id_len = r.read_u16::<LittleEndian>()? as usize;
        let mut id_buf = vec![0u8; id_len];
        r.read_exact(&mut id_buf)?;
        let id = ContentId::parse(String::from_utf8_lossy(&id_buf).into_owned());

        let deleted = r.read_u8()? != 0;
        let format_version = r.read_u8()?;

        let pack_len = r.read_u16::<LittleEndian>()? as usize;
        let mut pack_buf = vec![0u8; pack_len];
        r.read_exact(&mut pack_buf)?;
        let pack_blob_id = String::from_utf8_lossy(&pack_buf).into_owned();

        let pack_offset = r.read_u32::<LittleEndian>()?;
        let length = r.read_u32::<LittleEndian>()?;
        let timestamp_seconds = r.read_i64::<LittleEndian>()?;

        Ok(Info {
            id,
            deleted,
            format_version,
            pack_blob_id,
            pack_offset,
            length,
            timestamp_seconds,
            payload: None,
        })
    }

    /// Newest-timestamp-wins comparison used by both the builder and the
    /// committed index merge: larger `timestamp_seconds` wins; on ties, a
    /// non-deleted entry wins over a deleted one.
    pub fn supersedes(&self, other: &Info) -> bool {
        match self.timestamp_seconds.cmp(&other.timestamp_seconds) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => !self.deleted && other.deleted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str, ts: i64, deleted: bool) -> Info {
        Info {
            id: ContentId::parse(id),
            deleted,
            format_version: CURRENT_FORMAT_VERSION,
            pack_blob_id: if deleted { String::new() } else { "p1234".into() },
            pack_offset: 0,
            length: 10,
            timestamp_seconds: ts,
            payload: None,
        }
    }

    #[test]
    fn round_trips_through_binary_encoding() {
        let info = sample("abcd1234", 100, false);
        let mut buf = Vec::new();
        info.write(&mut buf).unwrap();
        let parsed = Info::read(&buf[..]).unwrap();
        assert_eq!(info, parsed);
    }

    #[test]
    fn newer_timestamp_wins() {
        let old = sample("abcd", 100, false);
        let new = sample("abcd", 200, false);
        assert!(new.supersedes(&old));
        assert!(!old.supersedes(&new));
    }

    #[test]
    fn tie_break_prefers_non_deleted() {
        let tombstone = sample("abcd", 100, true);
        let live = sample("abcd", 100, false);
        assert!(live.supersedes(&tombstone));
        assert!(!tombstone.supersedes(&live));
    }
}
