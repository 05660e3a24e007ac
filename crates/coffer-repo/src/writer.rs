//! Object Writer
//!
//! The streaming sink of the write path. Bytes fed to `write` accumulate in
//! the active chunk buffer while the splitter watches for boundaries; each
//! completed chunk goes through the manager's hash → dedupe/pack → encrypt →
//! store pipeline and comes back as a child id.
//!
//! `result()` finishes the object:
//!
//! ```text
//! no chunk flushed, tail ≤ inline threshold  →  inline id (no storage I/O)
//! exactly one chunk                          →  that chunk's id
//! many chunks                                →  indirect list written
//!                                               through a second writer;
//!                                               result is Indirect(list id)
//! ```
//!
//! A zero-byte writer flushes one empty chunk, so the empty object has a
//! stable content-derived id like any other. `result()` is idempotent; the
//! first call settles the id and later calls return it unchanged.

use coffer_core::recordstream::{RecordWriter, INDIRECT_STREAM_TYPE};
use coffer_core::{IndirectEntry, ObjectId};

use crate::error::Result;
use crate::manager::ObjectManager;
use crate::splitter::ObjectSplitter;

/// Options for a single writer, propagated into every chunk write it makes.
#[derive(Default)]
pub struct WriterOptions {
    /// Human-readable description, used in trace output only.
    pub description: String,
    /// Prepended to every storage block name written by this writer.
    pub prefix: String,
    /// Pack group for chunks small enough to pack.
    pub pack_group: String,
    /// Bypass packing for this writer even when packing is active.
    pub disable_packing: bool,
    /// Objects at or below this total size become inline ids; 0 disables
    /// inlining.
    pub inline_threshold: usize,
}

/// Streaming sink producing a single `ObjectId` for everything written.
pub struct ObjectWriter {
    manager: ObjectManager,
    splitter: Box<dyn ObjectSplitter>,

    buffer: Vec<u8>,
    chunk_start: u64,
    entries: Vec<IndirectEntry>,

    description: String,
    prefix: String,
    pack_group: String,
    disable_packing: bool,
    inline_threshold: usize,

    result: Option<ObjectId>,
}

impl ObjectWriter {
    pub(crate) fn new(
        manager: ObjectManager,
        splitter: Box<dyn ObjectSplitter>,
        options: WriterOptions,
    ) -> Self {
        Self {
            manager,
            splitter,
            buffer: Vec::new(),
            chunk_start: 0,
            entries: Vec::new(),
            description: options.description,
            prefix: options.prefix,
            pack_group: options.pack_group,
            disable_packing: options.disable_packing,
            inline_threshold: options.inline_threshold,
            result: None,
        }
    }

    /// Appends `data` to the object. May be called repeatedly.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        for &b in data {
            self.buffer.push(b);
            if self.splitter.add_byte(b) {
                self.flush_chunk().await?;
            }
        }
        Ok(())
    }

    async fn flush_chunk(&mut self) -> Result<()> {
        let chunk = std::mem::take(&mut self.buffer);
        let start = self.chunk_start;
        let length = chunk.len() as u64;
        self.chunk_start += length;

        let object = self
            .manager
            .hash_encrypt_and_write(&self.pack_group, chunk, &self.prefix, self.disable_packing)
            .await?;
        self.entries.push(IndirectEntry {
            start,
            length,
            object,
        });
        Ok(())
    }

    /// Finishes the object and returns its id. Idempotent after the first
    /// call.
    pub fn result(&mut self) -> futures::future::BoxFuture<'_, Result<ObjectId>> {
        Box::pin(self.result_inner())
    }

    async fn result_inner(&mut self) -> Result<ObjectId> {
        if let Some(id) = &self.result {
            return Ok(id.clone());
        }

        if self.entries.is_empty()
            && self.inline_threshold > 0
            && self.buffer.len() <= self.inline_threshold
        {
            let id = ObjectId::inline(&self.buffer);
            self.buffer.clear();
            self.result = Some(id.clone());
            return Ok(id);
        }

        // Flush the tail chunk. An empty writer still flushes once so the
        // empty object gets a content-derived id.
        if !self.buffer.is_empty() || self.entries.is_empty() {
            self.flush_chunk().await?;
        }

        let id = if self.entries.len() == 1 {
            self.entries[0].object.clone()
        } else {
            self.write_indirect_list().await?
        };

        self.result = Some(id.clone());
        Ok(id)
    }

    async fn write_indirect_list(&mut self) -> Result<ObjectId> {
        let mut stream = RecordWriter::new(INDIRECT_STREAM_TYPE);
        for entry in &self.entries {
            stream.write(entry)?;
        }

        let mut list_writer = self.manager.new_writer(WriterOptions {
            description: format!("LIST({})", self.description),
            prefix: self.prefix.clone(),
            pack_group: self.pack_group.clone(),
            disable_packing: self.disable_packing,
            inline_threshold: 0,
        });
        list_writer.write(&stream.finish()).await?;

        let list_id = list_writer.result().await?;
        Ok(ObjectId::Indirect(Box::new(list_id)))
    }

    /// Releases the writer without producing an id. Anything already flushed
    /// stays in storage; the active chunk buffer is discarded.
    pub fn close(self) {}
}
