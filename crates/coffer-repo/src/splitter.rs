//! Object Splitters
//!
//! A splitter watches the byte stream flowing through a writer and declares
//! chunk boundaries. Two strategies:
//!
//! - `fixed`: a boundary every `max_block_size` bytes. Cheap, but an insert
//!   near the front of an object shifts every later boundary.
//! - `dynamic`: content-defined chunking with a buzhash rolling over a
//!   64-byte window. A boundary is declared when the window hash matches a
//!   mask sized for the target average, clamped to `[min, max]`. Boundaries
//!   follow content, so shared regions of similar objects chunk identically
//!   and dedupe against each other.
//!
//! Identical byte streams produce identical boundaries regardless of how
//! the bytes are batched into `write` calls.

use std::sync::OnceLock;

use coffer_core::RepositoryObjectFormat;

use crate::error::{Error, Result};

/// Streaming boundary detector. `add_byte` returns true when the chunk ends
/// after the byte just fed.
pub(crate) trait ObjectSplitter: Send {
    fn add_byte(&mut self, b: u8) -> bool;
}

/// Factory handed to the manager; each writer gets a fresh splitter.
pub(crate) type SplitterFactory = Box<dyn Fn() -> Box<dyn ObjectSplitter> + Send + Sync>;

/// Builds the splitter factory named by `format.splitter`, validating its
/// block-size parameters.
pub(crate) fn create_splitter_factory(format: &RepositoryObjectFormat) -> Result<SplitterFactory> {
    match format.splitter.as_str() {
        "fixed" => {
            if format.max_block_size == 0 {
                return Err(Error::ConfigInvalid(
                    "fixed splitter requires a non-zero max block size".to_string(),
                ));
            }
            let chunk_length = format.max_block_size as usize;
            Ok(Box::new(move || Box::new(FixedSplitter::new(chunk_length))))
        }
        "dynamic" => {
            let (min, avg, max) = (
                format.min_block_size,
                format.avg_block_size,
                format.max_block_size,
            );
            if min == 0 || min > avg || avg > max {
                return Err(Error::ConfigInvalid(format!(
                    "dynamic splitter requires 0 < min <= avg <= max, got {}/{}/{}",
                    min, avg, max
                )));
            }
            Ok(Box::new(move || {
                Box::new(RollingHashSplitter::new(
                    min as usize,
                    avg as usize,
                    max as usize,
                ))
            }))
        }
        other => Err(Error::ConfigInvalid(format!(
            "unsupported splitter {:?}",
            other
        ))),
    }
}

/// Boundary every `chunk_length` bytes.
struct FixedSplitter {
    chunk_length: usize,
    position: usize,
}

impl FixedSplitter {
    fn new(chunk_length: usize) -> Self {
        Self {
            chunk_length,
            position: 0,
        }
    }
}

impl ObjectSplitter for FixedSplitter {
    fn add_byte(&mut self, _b: u8) -> bool {
        self.position += 1;
        if self.position >= self.chunk_length {
            self.position = 0;
            return true;
        }
        false
    }
}

const WINDOW_SIZE: usize = 64;

/// Substitution table for the rolling hash, derived once from a fixed seed.
/// The table is part of the chunking format: changing it changes every
/// dynamic boundary.
fn hash_table() -> &'static [u64; 256] {
    static TABLE: OnceLock<[u64; 256]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut state: u64 = 0x6b6f_6666_6572_2d31;
        let mut table = [0u64; 256];
        for slot in table.iter_mut() {
            // splitmix64
            state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
            let mut z = state;
            z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
            *slot = z ^ (z >> 31);
        }
        table
    })
}

/// Content-defined splitter: buzhash over a 64-byte window.
struct RollingHashSplitter {
    min: usize,
    max: usize,
    mask: u64,

    hash: u64,
    window: [u8; WINDOW_SIZE],
    window_pos: usize,
    chunk_length: usize,
}

impl RollingHashSplitter {
    fn new(min: usize, avg: usize, max: usize) -> Self {
        Self {
            min,
            max,
            mask: (avg.next_power_of_two() as u64) - 1,
            hash: 0,
            window: [0u8; WINDOW_SIZE],
            window_pos: 0,
            chunk_length: 0,
        }
    }

    fn start_new_chunk(&mut self) {
        self.hash = 0;
        self.window = [0u8; WINDOW_SIZE];
        self.window_pos = 0;
        self.chunk_length = 0;
    }
}

impl ObjectSplitter for RollingHashSplitter {
    fn add_byte(&mut self, b: u8) -> bool {
        let table = hash_table();

        // With a 64-byte window and a 64-bit hash, the contribution of the
        // outgoing byte has been rotated a full word width, so it cancels
        // with a plain XOR.
        let outgoing = self.window[self.window_pos];
        self.window[self.window_pos] = b;
        self.window_pos = (self.window_pos + 1) & (WINDOW_SIZE - 1);
        self.hash = self.hash.rotate_left(1) ^ table[outgoing as usize] ^ table[b as usize];

        self.chunk_length += 1;

        if self.chunk_length < self.min {
            return false;
        }
        if self.chunk_length >= self.max || self.hash & self.mask == self.mask {
            self.start_new_chunk();
            return true;
        }
        false
    }
}
