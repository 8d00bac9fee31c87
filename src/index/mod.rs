//! Index blobs: the durable, sorted record of every content ever written,
//! merged from many index blobs into one lookup surface.

pub mod builder;
pub mod committed;

/// Blob ID prefix used for every index blob.
pub const INDEX_BLOB_PREFIX: char = 'n';

pub use builder::PackIndexBuilder;
pub use committed::CommittedContentIndex;
