//! Pipeline Statistics
//!
//! Monotonic counters updated with atomic fetch-and-add from the hot paths;
//! no locks. `snapshot()` captures a plain copy for callers.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct Stats {
    pub hashed_blocks: AtomicU32,
    pub hashed_bytes: AtomicU64,
    pub checked_blocks: AtomicU32,
    pub present_blocks: AtomicU32,
    pub encrypted_bytes: AtomicU64,
    pub written_blocks: AtomicU32,
    pub written_bytes: AtomicU64,
    pub read_blocks: AtomicU32,
    pub read_bytes: AtomicU64,
    pub decrypted_bytes: AtomicU64,
    pub valid_blocks: AtomicU32,
    pub invalid_blocks: AtomicU32,
}

impl Stats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hashed_blocks: self.hashed_blocks.load(Ordering::Relaxed),
            hashed_bytes: self.hashed_bytes.load(Ordering::Relaxed),
            checked_blocks: self.checked_blocks.load(Ordering::Relaxed),
            present_blocks: self.present_blocks.load(Ordering::Relaxed),
            encrypted_bytes: self.encrypted_bytes.load(Ordering::Relaxed),
            written_blocks: self.written_blocks.load(Ordering::Relaxed),
            written_bytes: self.written_bytes.load(Ordering::Relaxed),
            read_blocks: self.read_blocks.load(Ordering::Relaxed),
            read_bytes: self.read_bytes.load(Ordering::Relaxed),
            decrypted_bytes: self.decrypted_bytes.load(Ordering::Relaxed),
            valid_blocks: self.valid_blocks.load(Ordering::Relaxed),
            invalid_blocks: self.invalid_blocks.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the manager's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Blocks hashed by the write pipeline.
    pub hashed_blocks: u32,
    /// Bytes hashed by the write pipeline.
    pub hashed_bytes: u64,
    /// Existence checks issued against storage.
    pub checked_blocks: u32,
    /// Dedupe hits: blocks already present with the right size.
    pub present_blocks: u32,
    /// Bytes run through the cipher on the write path.
    pub encrypted_bytes: u64,
    /// Blocks uploaded to storage.
    pub written_blocks: u32,
    /// Bytes uploaded to storage.
    pub written_bytes: u64,
    /// Blocks fetched from storage.
    pub read_blocks: u32,
    /// Bytes fetched from storage.
    pub read_bytes: u64,
    /// Bytes run through the cipher on the read path.
    pub decrypted_bytes: u64,
    /// Blocks whose post-decrypt checksum matched.
    pub valid_blocks: u32,
    /// Blocks whose post-decrypt checksum did not match.
    pub invalid_blocks: u32,
}
