//! Pack Bookkeeping
//!
//! Small objects are coalesced into pack blobs to amortize per-blob overhead
//! in the underlying store. This module holds the pack state and wire types;
//! the operations that move bytes (appending, finalizing, resolving against
//! storage) live on the manager, which owns the collaborators they need.
//!
//! Per pack-group state machine:
//!
//! ```text
//! idle ──begin()──▶ open(pack blob name, ciphertext buffer, index entries)
//!                      │ buffer would exceed max pack file length
//!                      ▼
//!                  finalize: upload pack blob, write index object, merge
//!                  entries into the resolution map, open a fresh pack
//! ```
//!
//! A pack blob is a plain concatenation of already-encrypted chunk bytes;
//! its companion index object records where each block landed. A block name
//! appears in at most one finalized pack index.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use coffer_core::recordstream::{RecordReader, RecordWriter, PACK_INDEX_STREAM_TYPE};

use crate::error::Result;

/// Class prefix of pack blobs.
pub(crate) const PACK_BLOB_PREFIX: &str = "p/";

/// Class prefix of pack-index objects. Pack indexes are themselves
/// content-addressed objects, but never packed, which keeps index loading
/// from recursing into itself.
pub(crate) const PACK_INDEX_PREFIX: &str = "k/";

/// Contents of one pack-index object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PackIndex {
    /// Name of the pack blob the entries point into.
    pub pack: String,
    pub items: Vec<PackIndexEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PackIndexEntry {
    pub block: String,
    pub start: u64,
    pub length: u64,
}

/// Resolved location of a packed block inside its pack blob.
#[derive(Debug, Clone)]
pub(crate) struct PackSection {
    pub base: String,
    pub start: u64,
    pub length: u64,
}

/// A pack being filled for one pack group.
pub(crate) struct OpenPack {
    pub pack_name: String,
    pub buffer: BytesMut,
    pub items: Vec<PackIndexEntry>,
}

impl OpenPack {
    pub fn new() -> Self {
        Self {
            pack_name: new_pack_name(),
            buffer: BytesMut::new(),
            items: Vec::new(),
        }
    }

    pub fn contains(&self, block: &str) -> bool {
        self.items.iter().any(|item| item.block == block)
    }

    pub fn into_index(self) -> (Bytes, PackIndex) {
        let index = PackIndex {
            pack: self.pack_name,
            items: self.items,
        };
        (self.buffer.freeze(), index)
    }
}

#[derive(Default)]
pub(crate) struct PackState {
    /// Set by `begin_packing`, cleared by `finish_packing`.
    pub enabled: bool,
    /// Open packs, keyed by pack group.
    pub groups: HashMap<String, OpenPack>,
    /// Union of all known finalized index entries, keyed by block name.
    pub resolved: HashMap<String, PackSection>,
    /// Whether stored pack-index objects have been loaded already.
    pub indexes_loaded: bool,
}

impl PackState {
    pub fn resolve(&self, block: &str) -> Option<PackSection> {
        self.resolved.get(block).cloned()
    }

    pub fn merge_index(&mut self, index: &PackIndex) {
        for item in &index.items {
            self.resolved.insert(
                item.block.clone(),
                PackSection {
                    base: index.pack.clone(),
                    start: item.start,
                    length: item.length,
                },
            );
        }
    }
}

pub(crate) struct PackManager {
    pub state: Mutex<PackState>,
}

impl PackManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PackState::default()),
        }
    }
}

fn new_pack_name() -> String {
    let mut id = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut id);
    format!("{}{}", PACK_BLOB_PREFIX, hex::encode(id))
}

/// Serializes a pack index as a framed record stream.
pub(crate) fn encode_pack_index(index: &PackIndex) -> Result<Bytes> {
    let mut writer = RecordWriter::new(PACK_INDEX_STREAM_TYPE);
    writer.write(index)?;
    Ok(writer.finish())
}

/// Parses the records of a pack-index object.
pub(crate) fn decode_pack_indexes(data: Bytes) -> Result<Vec<PackIndex>> {
    let mut reader = RecordReader::new(data, PACK_INDEX_STREAM_TYPE)?;
    let mut indexes = Vec::new();
    while let Some(index) = reader.read::<PackIndex>()? {
        indexes.push(index);
    }
    Ok(indexes)
}
