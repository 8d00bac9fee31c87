//! Configuration options the manager accepts. Plain serde-serializable
//! structs so a CLI or embedder can load them from JSON, matching the
//! teacher's use of `serde_json` for its on-disk structures (`FileIndex`,
//! `RecoveryMap`).

use serde::{Deserialize, Serialize};

use crate::info::CURRENT_FORMAT_VERSION;

pub const DEFAULT_MIN_PREAMBLE_LENGTH: usize = 32;
pub const DEFAULT_MAX_PREAMBLE_LENGTH: usize = 32;
pub const DEFAULT_PADDING_UNIT: usize = 4096;
pub const DEFAULT_MAX_PACK_SIZE: usize = 20 * 1024 * 1024;
pub const DEFAULT_PARALLEL_FETCHES: usize = 5;
pub const DEFAULT_INDEX_LOAD_ATTEMPTS: u32 = 10;
pub const DEFAULT_FLUSH_INTERVAL_SECS: i64 = 10 * 60;

/// Selects the hash/encryption implementations and the on-disk write format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormattingOptions {
    /// Write-format epoch; must lie within the supported range.
    pub format_version: u8,
    /// Name of a registered [`crate::crypto::HashFunc`] (e.g. `"BLAKE3"`).
    pub hash: String,
    /// Name of a registered [`crate::crypto::Encryptor`] (e.g. `"AES256-GCM"`).
    pub encryption: String,
    /// Threshold (plaintext bytes) at which a pending pack is sealed.
    pub max_pack_size: usize,
    pub min_preamble_length: usize,
    pub max_preamble_length: usize,
    /// Pack ciphertext size is rounded up to a multiple of this; 0 disables.
    pub padding_unit: usize,
    /// Opaque repository-format bytes prepended to every pack blob.
    pub repository_format_bytes: Vec<u8>,
    /// Optional passphrase to derive the master encryption key via Argon2id.
    /// When absent, `Encryptor` implementations that need a key must be
    /// constructed with one directly.
    pub password: Option<String>,
    /// Salt for `password`-based key derivation; typically the repository ID.
    pub key_derivation_salt: Vec<u8>,
}

impl Default for FormattingOptions {
    fn default() -> Self {
        Self {
            format_version: CURRENT_FORMAT_VERSION,
            hash: "BLAKE3".to_string(),
            encryption: "AES256-GCM".to_string(),
            max_pack_size: DEFAULT_MAX_PACK_SIZE,
            min_preamble_length: DEFAULT_MIN_PREAMBLE_LENGTH,
            max_preamble_length: DEFAULT_MAX_PREAMBLE_LENGTH,
            padding_unit: DEFAULT_PADDING_UNIT,
            repository_format_bytes: Vec::new(),
            password: None,
            key_derivation_salt: Vec::new(),
        }
    }
}

/// Cache capacities; 0 disables the corresponding cache (direct pass-through).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CachingOptions {
    pub max_cache_size_bytes: u64,
    pub max_metadata_cache_size_bytes: u64,
    /// TTL, in seconds, of the index-blob listing snapshot.
    pub list_cache_ttl_secs: u64,
    pub parallel_fetches: usize,
}

impl Default for CachingOptions {
    fn default() -> Self {
        Self {
            max_cache_size_bytes: 512 * 1024 * 1024,
            max_metadata_cache_size_bytes: 64 * 1024 * 1024,
            list_cache_ttl_secs: 30,
            parallel_fetches: DEFAULT_PARALLEL_FETCHES,
        }
    }
}

/// Reads `CONTENT_MANAGER_VERIFY_INVARIANTS` the way the Go source reads
/// `KOPIA_VERIFY_INVARIANTS` — any non-empty value turns verification on.
pub fn verify_invariants_enabled() -> bool {
    std::env::var("CONTENT_MANAGER_VERIFY_INVARIANTS")
        .map(|v| !v.is_empty())
        .unwrap_or(false)
}
