//! # content-manager — content-addressable, encrypted, deduplicated blob storage
//!
//! Guarantees:
//! - A content's ID is derived from its own plaintext hash, never assigned by
//!   the caller — identical bytes always produce the same ID, so writes
//!   dedupe automatically.
//! - Every content is authenticated or checksum-verified on read; a tampered
//!   ciphertext is reported as [`error::ManagerError::InvalidChecksum`], never
//!   returned as plaintext.
//! - A write is readable immediately, even before the pack holding it has
//!   been sealed or any index has been flushed.
//! - Every pack blob carries its own recovery block, so the index can be
//!   rebuilt from pack blobs alone (see [`recovery`]) if every index blob is
//!   lost.
//! - Blob-store I/O and encryption never happen while the manager's pending/
//!   builder lock is held (see [`manager`]).

pub mod error;
pub mod id;
pub mod info;
pub mod config;
pub mod cancel;
pub mod stats;
pub mod pending;
pub mod blobstore;
pub mod cache;
pub mod crypto;
pub mod index;
pub mod pack;
pub mod recovery;
pub mod manager;

// Flat re-exports for the most common types.
pub use blobstore::{BlobStore, FilesystemBlobStore, MemoryBlobStore};
pub use cancel::CancellationToken;
pub use config::{CachingOptions, FormattingOptions};
pub use crypto::{derive_key, CryptoError};
pub use error::{ManagerError, Result};
pub use id::ContentId;
pub use info::Info;
pub use manager::{IterateOptions, Manager, PackInfo};
pub use recovery::{scan, BlobHealth, RecoveryQuality, RecoveryReport};
pub use stats::{Stats, StatsSnapshot};
