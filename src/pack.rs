//! Pack sealing: turns a batch of pending contents into one pack blob's
//! bytes, and the inverse — extracting one content back out of a fetched
//! pack blob.
//!
//! Blob layout, in order:
//!   repository_format_bytes (opaque, caller-supplied)
//!   random preamble, length uniform in [min_preamble_length, max_preamble_length]
//!   per-content ciphertexts, back to back
//!   random postamble, padding the blob up to a multiple of padding_unit
//!   recovery block: an index-blob-formatted, encrypted list of this pack's
//!     own `Info` entries, letting a scan reconstruct the index even if every
//!     index blob referencing this pack has been lost
//!   u32 (LE): length of the recovery block's ciphertext, so a scanner can
//!     find its start by reading from the end of the blob

use byteorder::{LittleEndian, ReadBytesExt};
use rand::RngCore;

use crate::config::FormattingOptions;
use crate::crypto::{Encryptor, HashFunc};
use crate::error::{ManagerError, Result};
use crate::id::{index_blob_iv, ContentId};
use crate::index::builder::PackIndexBuilder;
use crate::info::Info;
use crate::pending::PendingEntry;

pub const RECOVERY_LENGTH_TRAILER_LEN: usize = 4;

pub fn random_blob_id(prefix: char) -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{prefix}{}", hex::encode(bytes))
}

/// Result of sealing one pending pack.
pub struct SealedPack {
    pub blob_id: String,
    pub data: Vec<u8>,
    /// `Info` for every content now located in this pack, ready to be
    /// folded into the in-memory index builder.
    pub infos: Vec<Info>,
}

pub fn seal_pack(
    prefix: char,
    entries: &[PendingEntry],
    format: &FormattingOptions,
    hash_func: &dyn HashFunc,
    encryptor: &dyn Encryptor,
    timestamp_seconds: i64,
) -> Result<SealedPack> {
    let blob_id = random_blob_id(prefix);

    let mut body = Vec::new();
    body.extend_from_slice(&format.repository_format_bytes);

    let preamble_len = random_len_in_range(format.min_preamble_length, format.max_preamble_length);
    append_random_bytes(&mut body, preamble_len);

    let mut infos = Vec::with_capacity(entries.len());
    for entry in entries {
        let iv = entry.id.trailing_iv()?;
        let ciphertext = encryptor.encrypt(&entry.payload, &iv)?;
        let offset = body.len() as u32;
        let length = ciphertext.len() as u32;
        body.extend_from_slice(&ciphertext);

        infos.push(Info {
            id: entry.id.clone(),
            deleted: false,
            format_version: format.format_version,
            pack_blob_id: blob_id.clone(),
            pack_offset: offset,
            length,
            timestamp_seconds,
            payload: None,
        });
    }

    if format.padding_unit > 0 {
        let rem = body.len() % format.padding_unit;
        if rem != 0 {
            append_random_bytes(&mut body, format.padding_unit - rem);
        }
    }

    let mut recovery_builder = PackIndexBuilder::new();
    for info in &infos {
        recovery_builder.add(info.clone());
    }
    let recovery_plaintext = recovery_builder.build()?;
    let recovery_iv = index_blob_iv(&blob_id)?;
    let recovery_ciphertext = encryptor.encrypt(&recovery_plaintext, &recovery_iv)?;
    body.extend_from_slice(&recovery_ciphertext);
    body.extend_from_slice(&(recovery_ciphertext.len() as u32).to_le_bytes());

    Ok(SealedPack {
        blob_id,
        data: body,
        infos,
    })
}

fn random_len_in_range(min: usize, max: usize) -> usize {
    if max <= min {
        return min;
    }
    min + (rand::random::<usize>() % (max - min + 1))
}

fn append_random_bytes(out: &mut Vec<u8>, len: usize) {
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut buf);
    out.extend_from_slice(&buf);
}

/// Extract and decrypt one content's plaintext out of a fetched pack blob.
/// For an unauthenticated cipher, verifies the decrypted plaintext hashes
/// back to `id`'s trailing IV before returning it.
pub fn extract_content(
    pack_data: &[u8],
    info: &Info,
    hash_func: &dyn HashFunc,
    encryptor: &dyn Encryptor,
) -> Result<Vec<u8>> {
    let start = info.pack_offset as usize;
    let end = start + info.length as usize;
    if end > pack_data.len() {
        return Err(ManagerError::invalid_format(format!(
            "content {} extends past end of pack blob {}",
            info.id, info.pack_blob_id
        )));
    }
    let ciphertext = &pack_data[start..end];
    let iv = info.id.trailing_iv()?;
    let plaintext = encryptor.decrypt(ciphertext, &iv)?;

    if !encryptor.is_authenticated() {
        verify_checksum(&plaintext, &info.id, hash_func)?;
    }

    Ok(plaintext)
}

fn verify_checksum(plaintext: &[u8], id: &ContentId, hash_func: &dyn HashFunc) -> Result<()> {
    let digest = hash_func.hash(plaintext);
    let expected = id.trailing_iv()?;
    let actual_tail = &digest[digest.len() - expected.len()..];
    if actual_tail != expected {
        return Err(ManagerError::InvalidChecksum {
            blob_id: id.as_str().to_string(),
            expected: hex::encode(expected),
            actual: hex::encode(actual_tail),
        });
    }
    Ok(())
}

/// Recover this pack's own index entries directly from its bytes, bypassing
/// the committed index entirely. Used when index blobs referencing the pack
/// have been lost.
pub fn recover_pack_index(
    pack_data: &[u8],
    blob_id: &str,
    encryptor: &dyn Encryptor,
) -> Result<PackIndexBuilder> {
    if pack_data.len() < RECOVERY_LENGTH_TRAILER_LEN {
        return Err(ManagerError::invalid_format(format!(
            "pack blob {blob_id} too short to contain a recovery trailer"
        )));
    }
    let trailer_start = pack_data.len() - RECOVERY_LENGTH_TRAILER_LEN;
    let recovery_len = (&pack_data[trailer_start..])
        .read_u32::<LittleEndian>()? as usize;

    if recovery_len > trailer_start {
        return Err(ManagerError::invalid_format(format!(
            "pack blob {blob_id} has an invalid recovery block length"
        )));
    }
    let recovery_start = trailer_start - recovery_len;
    let recovery_ciphertext = &pack_data[recovery_start..trailer_start];

    let iv = index_blob_iv(blob_id)?;
    let plaintext = encryptor.decrypt(recovery_ciphertext, &iv)?;
    PackIndexBuilder::parse(&plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Aes256CtrEncryptor, Aes256GcmEncryptor, Blake3Hash};

    fn entry(data: &[u8]) -> PendingEntry {
        let digest = blake3::hash(data).as_bytes().to_vec();
        PendingEntry {
            id: ContentId::new(None, &digest),
            payload: data.to_vec(),
        }
    }

    #[test]
    fn seal_and_extract_round_trips_with_gcm() {
        let format = FormattingOptions::default();
        let hash = Blake3Hash;
        let enc = Aes256GcmEncryptor::new([1u8; 32]);
        let entries = vec![entry(b"alpha"), entry(b"beta contents")];

        let sealed = seal_pack('p', &entries, &format, &hash, &enc, 1000).unwrap();
        assert_eq!(sealed.infos.len(), 2);

        for info in &sealed.infos {
            let plaintext = extract_content(&sealed.data, info, &hash, &enc).unwrap();
            assert!(entries.iter().any(|e| e.payload == plaintext));
        }
    }

    #[test]
    fn seal_and_extract_round_trips_with_unauthenticated_ctr() {
        let format = FormattingOptions::default();
        let hash = Blake3Hash;
        let enc = Aes256CtrEncryptor::new([2u8; 32]);
        let entries = vec![entry(b"gamma")];

        let sealed = seal_pack('p', &entries, &format, &hash, &enc, 1000).unwrap();
        let plaintext = extract_content(&sealed.data, &sealed.infos[0], &hash, &enc).unwrap();
        assert_eq!(plaintext, b"gamma");
    }

    #[test]
    fn tampered_ciphertext_fails_checksum_under_unauthenticated_cipher() {
        let format = FormattingOptions::default();
        let hash = Blake3Hash;
        let enc = Aes256CtrEncryptor::new([2u8; 32]);
        let entries = vec![entry(b"delta")];

        let mut sealed = seal_pack('p', &entries, &format, &hash, &enc, 1000).unwrap();
        let info = sealed.infos[0].clone();
        let offset = info.pack_offset as usize;
        sealed.data[offset] ^= 0xff;

        let result = extract_content(&sealed.data, &info, &hash, &enc);
        assert!(matches!(result, Err(ManagerError::InvalidChecksum { .. })));
    }

    #[test]
    fn recovery_block_reconstructs_pack_index() {
        let format = FormattingOptions::default();
        let hash = Blake3Hash;
        let enc = Aes256GcmEncryptor::new([5u8; 32]);
        let entries = vec![entry(b"epsilon"), entry(b"zeta")];

        let sealed = seal_pack('p', &entries, &format, &hash, &enc, 1000).unwrap();
        let recovered = recover_pack_index(&sealed.data, &sealed.blob_id, &enc).unwrap();
        assert_eq!(recovered.len(), sealed.infos.len());
        for info in &sealed.infos {
            assert!(recovered.get(&info.id).is_some());
        }
    }
}
