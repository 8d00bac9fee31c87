//! Content ID: the name a content is stored and looked up under.
//!
//! Rendered as a lowercase hex string, optionally preceded by a single
//! metadata-prefix letter in `'g'..='z'`. The trailing hex is the last 16
//! bytes of the content's cryptographic hash (see `crypto::getPackedContentIV`
//! in the Go source, ported as `trailing_iv_bytes` below).

use std::fmt;

use crate::error::{ManagerError, Result};

/// Byte length of the IV carried in the trailing hex of a content ID — the
/// last 16 bytes of the hash, matching `aes.BlockSize` in the Go source.
pub const TRAILING_IV_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentId(String);

impl ContentId {
    /// Build a content ID from an optional prefix letter and a hash digest.
    /// `prefix` must already be validated via [`validate_prefix`].
    pub fn new(prefix: Option<char>, digest: &[u8]) -> Self {
        let mut s = String::with_capacity(1 + digest.len() * 2);
        if let Some(p) = prefix {
            s.push(p);
        }
        s.push_str(&hex::encode(digest));
        ContentId(s)
    }

    pub fn parse(s: impl Into<String>) -> Self {
        ContentId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if this ID carries a single-letter metadata prefix (`'g'..='z'`).
    pub fn has_prefix(&self) -> bool {
        self.0
            .chars()
            .next()
            .map(|c| c.is_ascii_alphabetic() && ('g'..='z').contains(&c))
            .unwrap_or(false)
    }

    /// The pack blob prefix this content should be routed to: `q` for
    /// metadata contents, `p` otherwise.
    pub fn pack_prefix_char(&self) -> char {
        if self.has_prefix() {
            'q'
        } else {
            'p'
        }
    }

    /// Last 16 bytes of the hex digest, hex-decoded — the IV used for both
    /// packed-content encryption and post-decrypt checksum verification.
    pub fn trailing_iv(&self) -> Result<[u8; TRAILING_IV_LEN]> {
        let hex_tail_len = TRAILING_IV_LEN * 2;
        if self.0.len() < hex_tail_len {
            return Err(ManagerError::invalid_format(format!(
                "content id {} shorter than trailing IV",
                self.0
            )));
        }
        let tail = &self.0[self.0.len() - hex_tail_len..];
        let bytes = hex::decode(tail)
            .map_err(|e| ManagerError::invalid_format(format!("bad content id hex: {e}")))?;
        let mut iv = [0u8; TRAILING_IV_LEN];
        iv.copy_from_slice(&bytes);
        Ok(iv)
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Validate a caller-supplied content prefix: empty, or a single letter in
/// `'g'..='z'`.
pub fn validate_prefix(prefix: &str) -> Result<()> {
    match prefix.len() {
        0 => Ok(()),
        1 => {
            let c = prefix.chars().next().unwrap();
            if ('g'..='z').contains(&c) {
                Ok(())
            } else {
                Err(ManagerError::invalid_argument(
                    "invalid prefix, must be empty or a single letter between 'g' and 'z'",
                ))
            }
        }
        _ => Err(ManagerError::invalid_argument(
            "invalid prefix, must be empty or a single letter between 'g' and 'z'",
        )),
    }
}

/// Derive the IV used to encrypt an index blob from its own (post-strip)
/// trailing hex — mirrors `getIndexBlobIV` in the Go source, which strips any
/// `-suffix` compaction marker before taking the trailing bytes.
pub fn index_blob_iv(blob_id: &str) -> Result<[u8; TRAILING_IV_LEN]> {
    let stripped = match blob_id.find('-') {
        Some(p) => &blob_id[..p],
        None => blob_id,
    };
    let hex_tail_len = TRAILING_IV_LEN * 2;
    if stripped.len() < hex_tail_len {
        return Err(ManagerError::invalid_format(format!(
            "index blob id {blob_id} shorter than trailing IV"
        )));
    }
    let tail = &stripped[stripped.len() - hex_tail_len..];
    let bytes = hex::decode(tail)
        .map_err(|e| ManagerError::invalid_format(format!("bad index blob id hex: {e}")))?;
    let mut iv = [0u8; TRAILING_IV_LEN];
    iv.copy_from_slice(&bytes);
    Ok(iv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_validation() {
        assert!(validate_prefix("").is_ok());
        assert!(validate_prefix("g").is_ok());
        assert!(validate_prefix("z").is_ok());
        assert!(validate_prefix("f").is_err());
        assert!(validate_prefix("gz").is_err());
        assert!(validate_prefix("A").is_err());
    }

    #[test]
    fn has_prefix_and_pack_routing() {
        let plain = ContentId::new(None, &[0u8; 32]);
        assert!(!plain.has_prefix());
        assert_eq!(plain.pack_prefix_char(), 'p');

        let meta = ContentId::new(Some('m'), &[1u8; 32]);
        assert!(meta.has_prefix());
        assert_eq!(meta.pack_prefix_char(), 'q');
    }

    #[test]
    fn trailing_iv_matches_hash_tail() {
        let digest = blake3::hash(b"hello").as_bytes().to_vec();
        let id = ContentId::new(None, &digest);
        let iv = id.trailing_iv().unwrap();
        assert_eq!(&iv[..], &digest[digest.len() - 16..]);
    }
}
