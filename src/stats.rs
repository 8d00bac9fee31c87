//! Atomic operation counters, updated without holding the manager lock
//! (spec §5 "Shared resources"). Mirrors the Go source's `Stats` struct and
//! its `atomic.AddInt32`/`AddInt64` update sites.

use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug, Default)]
pub struct Stats {
    pub hashed_contents: AtomicI64,
    pub hashed_bytes: AtomicI64,
    pub read_contents: AtomicI64,
    pub read_bytes: AtomicI64,
    pub written_contents: AtomicI64,
    pub written_bytes: AtomicI64,
    pub encrypted_bytes: AtomicI64,
    pub decrypted_bytes: AtomicI64,
    pub valid_contents: AtomicI64,
    pub invalid_contents: AtomicI64,
}

impl Stats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hashed_contents: self.hashed_contents.load(Ordering::Relaxed),
            hashed_bytes: self.hashed_bytes.load(Ordering::Relaxed),
            read_contents: self.read_contents.load(Ordering::Relaxed),
            read_bytes: self.read_bytes.load(Ordering::Relaxed),
            written_contents: self.written_contents.load(Ordering::Relaxed),
            written_bytes: self.written_bytes.load(Ordering::Relaxed),
            encrypted_bytes: self.encrypted_bytes.load(Ordering::Relaxed),
            decrypted_bytes: self.decrypted_bytes.load(Ordering::Relaxed),
            valid_contents: self.valid_contents.load(Ordering::Relaxed),
            invalid_contents: self.invalid_contents.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.hashed_contents.store(0, Ordering::Relaxed);
        self.hashed_bytes.store(0, Ordering::Relaxed);
        self.read_contents.store(0, Ordering::Relaxed);
        self.read_bytes.store(0, Ordering::Relaxed);
        self.written_contents.store(0, Ordering::Relaxed);
        self.written_bytes.store(0, Ordering::Relaxed);
        self.encrypted_bytes.store(0, Ordering::Relaxed);
        self.decrypted_bytes.store(0, Ordering::Relaxed);
        self.valid_contents.store(0, Ordering::Relaxed);
        self.invalid_contents.store(0, Ordering::Relaxed);
    }

    pub(crate) fn add_hashed(&self, bytes: usize) {
        self.hashed_contents.fetch_add(1, Ordering::Relaxed);
        self.hashed_bytes.fetch_add(bytes as i64, Ordering::Relaxed);
    }

    pub(crate) fn add_read(&self, bytes: usize) {
        self.read_contents.fetch_add(1, Ordering::Relaxed);
        self.read_bytes.fetch_add(bytes as i64, Ordering::Relaxed);
    }

    pub(crate) fn add_written(&self, bytes: usize) {
        self.written_contents.fetch_add(1, Ordering::Relaxed);
        self.written_bytes.fetch_add(bytes as i64, Ordering::Relaxed);
    }

    pub(crate) fn add_encrypted(&self, bytes: usize) {
        self.encrypted_bytes.fetch_add(bytes as i64, Ordering::Relaxed);
    }

    pub(crate) fn add_decrypted(&self, bytes: usize) {
        self.decrypted_bytes.fetch_add(bytes as i64, Ordering::Relaxed);
    }

    pub(crate) fn add_valid(&self) {
        self.valid_contents.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_invalid(&self) {
        self.invalid_contents.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`Stats`], cheap to print/serialize.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub hashed_contents: i64,
    pub hashed_bytes: i64,
    pub read_contents: i64,
    pub read_bytes: i64,
    pub written_contents: i64,
    pub written_bytes: i64,
    pub encrypted_bytes: i64,
    pub decrypted_bytes: i64,
    pub valid_contents: i64,
    pub invalid_contents: i64,
}
