//! Hash functions and encryptors, each selected by name and pluggable the
//! same way the teacher's `codec` module resolves a `CodecId` to a
//! compressor: a small registry keyed by a human-readable string instead of
//! a frozen UUID, since hash/cipher choices are a formatting decision made
//! once per repository rather than a per-block tag.
//!
//! Key derivation: Argon2id(password, salt) -> 32-byte master key, carried
//! over from the teacher's archive encryption unchanged.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::Aes256Gcm;
use argon2::{Algorithm, Argon2, Params, Version};
use ctr::cipher::{KeyIvInit, StreamCipher};
use thiserror::Error;

pub const NONCE_LEN: usize = 12;
pub const IV_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed — wrong key or corrupted data")]
    DecryptionFailed,
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("encrypted payload too short")]
    TooShort,
    #[error("unknown hash function {0:?}")]
    UnknownHash(String),
    #[error("unknown encryptor {0:?}")]
    UnknownEncryptor(String),
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}

/// Derive a 256-bit key from a password and salt using Argon2id.
pub fn derive_key(password: &str, salt: &[u8]) -> Result<[u8; 32], CryptoError> {
    let params = Params::new(64 * 1024, 3, 1, Some(32))
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = [0u8; 32];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(key)
}

/// Maps content bytes to a content ID digest. Implementations are stateless
/// and hold no key material.
pub trait HashFunc: Send + Sync {
    fn name(&self) -> &'static str;
    fn hash(&self, data: &[u8]) -> Vec<u8>;
}

pub struct Blake3Hash;

impl HashFunc for Blake3Hash {
    fn name(&self) -> &'static str {
        "BLAKE3"
    }

    fn hash(&self, data: &[u8]) -> Vec<u8> {
        blake3::hash(data).as_bytes().to_vec()
    }
}

pub struct Sha256Hash;

impl HashFunc for Sha256Hash {
    fn name(&self) -> &'static str {
        "SHA256"
    }

    fn hash(&self, data: &[u8]) -> Vec<u8> {
        use sha2::Digest;
        sha2::Sha256::digest(data).to_vec()
    }
}

pub fn hash_func_by_name(name: &str) -> Result<Box<dyn HashFunc>, CryptoError> {
    match name {
        "BLAKE3" => Ok(Box::new(Blake3Hash)),
        "SHA256" => Ok(Box::new(Sha256Hash)),
        other => Err(CryptoError::UnknownHash(other.to_string())),
    }
}

/// Encrypts/decrypts one content's plaintext, keyed by a 16-byte IV derived
/// from the content's own hash (the trailing bytes of its content ID). An
/// authenticated cipher detects tampering on its own; an unauthenticated one
/// relies on the caller re-hashing the decrypted plaintext and comparing
/// against the trailing IV.
pub trait Encryptor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether `decrypt` alone proves integrity. When false, callers must
    /// additionally verify the decrypted plaintext hashes back to the IV.
    fn is_authenticated(&self) -> bool;

    fn encrypt(&self, plaintext: &[u8], iv: &[u8; IV_LEN]) -> Result<Vec<u8>, CryptoError>;
    fn decrypt(&self, ciphertext: &[u8], iv: &[u8; IV_LEN]) -> Result<Vec<u8>, CryptoError>;
}

pub struct Aes256GcmEncryptor {
    key: [u8; 32],
}

impl Aes256GcmEncryptor {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }
}

impl Encryptor for Aes256GcmEncryptor {
    fn name(&self) -> &'static str {
        "AES256-GCM"
    }

    fn is_authenticated(&self) -> bool {
        true
    }

    fn encrypt(&self, plaintext: &[u8], iv: &[u8; IV_LEN]) -> Result<Vec<u8>, CryptoError> {
        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| CryptoError::EncryptionFailed)?;
        let nonce = aes_gcm::Nonce::from_slice(&iv[..NONCE_LEN]);
        cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    fn decrypt(&self, ciphertext: &[u8], iv: &[u8; IV_LEN]) -> Result<Vec<u8>, CryptoError> {
        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| CryptoError::DecryptionFailed)?;
        let nonce = aes_gcm::Nonce::from_slice(&iv[..NONCE_LEN]);
        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

/// Unauthenticated AES-256-CTR. Decryption always "succeeds" even against
/// corrupted ciphertext or the wrong key, so callers must verify the result
/// by re-hashing it against the content ID.
pub struct Aes256CtrEncryptor {
    key: [u8; 32],
}

impl Aes256CtrEncryptor {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    fn apply_keystream(&self, data: &[u8], iv: &[u8; IV_LEN]) -> Vec<u8> {
        let mut buf = data.to_vec();
        let mut cipher = Aes256Ctr::new_from_slices(&self.key, iv)
            .expect("key and iv are fixed-length arrays matching the cipher's requirements");
        cipher.apply_keystream(&mut buf);
        buf
    }
}

impl Encryptor for Aes256CtrEncryptor {
    fn name(&self) -> &'static str {
        "AES256-CTR"
    }

    fn is_authenticated(&self) -> bool {
        false
    }

    fn encrypt(&self, plaintext: &[u8], iv: &[u8; IV_LEN]) -> Result<Vec<u8>, CryptoError> {
        Ok(self.apply_keystream(plaintext, iv))
    }

    fn decrypt(&self, ciphertext: &[u8], iv: &[u8; IV_LEN]) -> Result<Vec<u8>, CryptoError> {
        Ok(self.apply_keystream(ciphertext, iv))
    }
}

pub fn encryptor_by_name(name: &str, key: [u8; 32]) -> Result<Box<dyn Encryptor>, CryptoError> {
    match name {
        "AES256-GCM" => Ok(Box::new(Aes256GcmEncryptor::new(key))),
        "AES256-CTR" => Ok(Box::new(Aes256CtrEncryptor::new(key))),
        other => Err(CryptoError::UnknownEncryptor(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv_for(data: &[u8]) -> [u8; IV_LEN] {
        let h = blake3::hash(data);
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&h.as_bytes()[16..32]);
        iv
    }

    #[test]
    fn blake3_and_sha256_differ() {
        let data = b"hello world";
        assert_ne!(Blake3Hash.hash(data), Sha256Hash.hash(data));
    }

    #[test]
    fn gcm_round_trips_and_detects_tamper() {
        let key = [7u8; 32];
        let enc = Aes256GcmEncryptor::new(key);
        let plaintext = b"some content bytes";
        let iv = iv_for(plaintext);
        let ciphertext = enc.encrypt(plaintext, &iv).unwrap();
        let decrypted = enc.decrypt(&ciphertext, &iv).unwrap();
        assert_eq!(decrypted, plaintext);

        let mut tampered = ciphertext.clone();
        tampered[0] ^= 0xff;
        assert!(enc.decrypt(&tampered, &iv).is_err());
    }

    #[test]
    fn ctr_round_trips_but_does_not_detect_tamper() {
        let key = [9u8; 32];
        let enc = Aes256CtrEncryptor::new(key);
        let plaintext = b"some content bytes";
        let iv = iv_for(plaintext);
        let ciphertext = enc.encrypt(plaintext, &iv).unwrap();
        let decrypted = enc.decrypt(&ciphertext, &iv).unwrap();
        assert_eq!(decrypted, plaintext);

        let mut tampered = ciphertext.clone();
        tampered[0] ^= 0xff;
        let garbage = enc.decrypt(&tampered, &iv).unwrap();
        assert_ne!(garbage, plaintext);

        let rehash = Blake3Hash.hash(&garbage);
        assert_ne!(&rehash[16..32], &iv[..]);
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert!(hash_func_by_name("MD5").is_err());
        assert!(encryptor_by_name("ROT13", [0u8; 32]).is_err());
    }
}
