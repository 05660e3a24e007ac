//! Object Manager
//!
//! This module implements the top-level coordinator of the content-addressed
//! engine: the component that owns the formatter, splitter factory, pack
//! state, block-size cache, write-back pool and statistics, and hands out
//! writers and readers.
//!
//! ## Write path
//!
//! ```text
//! ObjectWriter::write(bytes)
//!     │ splitter declares a boundary
//!     ▼
//! hash_encrypt_and_write(chunk)
//!     ├─ compute block name (content hash, plus class prefix)
//!     ├─ small enough & packing active? ──▶ append to open pack
//!     ├─ already stored at the right size? ──▶ dedupe hit, done
//!     ├─ encrypt with the content-derived key
//!     └─ upload (synchronously, or via the write-back pool)
//! ```
//!
//! ## Read path
//!
//! ```text
//! open(id)
//!     ├─ wait for pending write-backs (reads never race unflushed writes)
//!     ├─ inline/text ──▶ in-memory reader
//!     ├─ section ──▶ window over a recursively opened base
//!     ├─ indirect ──▶ parse the list object into a seek table
//!     └─ raw/packed ──▶ fetch (pack slice or whole blob), decrypt,
//!                       re-hash and compare against the block name
//! ```
//!
//! ## Concurrency
//!
//! The manager is a cheap-to-clone handle (`Arc` inside) and safe for
//! concurrent use. Statistics are plain atomics. The write-back pool is a
//! semaphore holding one permit per in-flight upload; waiting for quiescence
//! acquires every permit, which doubles as the barrier taken by `open` and
//! `close`. Pack state sits behind one async mutex with short critical
//! sections; bulk finalization uploads outside of it.
//!
//! The first write-back failure is captured and surfaced by the next `open`
//! or `close`; the failed block is considered indeterminate.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use object_store::ObjectStore;
use tokio::sync::Semaphore;

use coffer_core::recordstream::{RecordReader, INDIRECT_STREAM_TYPE};
use coffer_core::{IndirectEntry, ObjectId, RepositoryObjectFormat};

use crate::blob::BlobStore;
use crate::block_cache::BlockSizeCache;
use crate::error::{Error, Result};
use crate::formatter::{create_formatter, ObjectFormatter};
use crate::pack::{
    decode_pack_indexes, encode_pack_index, OpenPack, PackIndex, PackIndexEntry, PackManager,
    PackSection, PACK_INDEX_PREFIX,
};
use crate::reader::{DataReader, IndirectReader, ObjectReader, SectionReader};
use crate::splitter::{create_splitter_factory, SplitterFactory};
use crate::stats::{Stats, StatsSnapshot};
use crate::writer::{ObjectWriter, WriterOptions};

/// Per-manager trace callback, invoked with formatted pipeline events.
pub type TraceFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Runtime options of the manager. Everything else is tuned through the
/// repository object format and immutable after initialization.
#[derive(Default)]
pub struct Options {
    /// Maximum number of concurrently pending uploads; 0 writes
    /// synchronously.
    pub write_back: usize,
    /// Optional trace hook observing pipeline events.
    pub trace: Option<TraceFn>,
}

struct WriteBackPool {
    permits: u32,
    semaphore: Arc<Semaphore>,
    /// First upload failure, surfaced at the next open or close.
    failed: std::sync::Mutex<Option<Error>>,
}

struct Inner {
    blob: BlobStore,
    format: RepositoryObjectFormat,
    formatter: Box<dyn ObjectFormatter>,
    new_splitter: SplitterFactory,
    pack: PackManager,
    block_sizes: BlockSizeCache,
    stats: Stats,
    write_back: Option<WriteBackPool>,
    trace: Option<TraceFn>,
}

/// Content-addressed object store over blob storage. Cloning yields another
/// handle to the same manager.
#[derive(Clone)]
pub struct ObjectManager {
    inner: Arc<Inner>,
}

impl ObjectManager {
    /// Creates a manager over `storage` with the given (validated) format.
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        format: RepositoryObjectFormat,
        options: Options,
    ) -> Result<Self> {
        let formatter = create_formatter(&format)?;
        let new_splitter = create_splitter_factory(&format)?;
        let blob = BlobStore::new(storage);

        let write_back = match options.write_back {
            0 => None,
            permits => Some(WriteBackPool {
                permits: permits as u32,
                semaphore: Arc::new(Semaphore::new(permits)),
                failed: std::sync::Mutex::new(None),
            }),
        };

        Ok(Self {
            inner: Arc::new(Inner {
                block_sizes: BlockSizeCache::new(blob.clone()),
                blob,
                format,
                formatter,
                new_splitter,
                pack: PackManager::new(),
                stats: Stats::default(),
                write_back,
                trace: options.trace,
            }),
        })
    }

    /// The repository object format this manager was created with.
    pub fn format(&self) -> &RepositoryObjectFormat {
        &self.inner.format
    }

    /// Point-in-time copy of the pipeline counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    fn trace(&self, message: impl FnOnce() -> String) {
        if let Some(trace) = &self.inner.trace {
            trace(&message());
        }
    }

    /// Creates a writer; its result id names everything written through it.
    pub fn new_writer(&self, options: WriterOptions) -> ObjectWriter {
        ObjectWriter::new(self.clone(), (self.inner.new_splitter)(), options)
    }

    /// Opens `id` for reading. Waits for pending write-backs first, so a
    /// reader never observes a blob whose upload has not completed.
    pub async fn open(&self, id: &ObjectId) -> Result<ObjectReader> {
        self.wait_for_write_back().await?;
        self.trace(|| format!("open {}", id));
        self.open_object(id).await
    }

    /// Permits packing of small objects until `finish_packing`.
    pub async fn begin_packing(&self) -> Result<()> {
        self.inner.pack.state.lock().await.enabled = true;
        Ok(())
    }

    /// Finalizes all open packs: uploads pack blobs and their index objects.
    pub async fn finish_packing(&self) -> Result<()> {
        let open_packs: Vec<OpenPack> = {
            let mut state = self.inner.pack.state.lock().await;
            state.enabled = false;
            let groups: Vec<String> = state.groups.keys().cloned().collect();
            groups
                .into_iter()
                .filter_map(|g| state.groups.remove(&g))
                .collect()
        };

        for open in open_packs {
            if let Some(index) = self.upload_pack(open).await? {
                self.inner.pack.state.lock().await.merge_index(&index);
            }
        }
        Ok(())
    }

    /// Waits for all pending write-backs and releases the block-size cache.
    /// The underlying storage stays open; the caller owns it.
    pub async fn close(&self) -> Result<()> {
        self.wait_for_write_back().await?;
        self.inner.block_sizes.close().await;
        Ok(())
    }

    async fn wait_for_write_back(&self) -> Result<()> {
        if let Some(pool) = &self.inner.write_back {
            // Holding every permit means no upload is in flight.
            let barrier = pool
                .semaphore
                .acquire_many(pool.permits)
                .await
                .map_err(|_| Error::Cancelled)?;
            drop(barrier);

            if let Some(err) = pool.failed.lock().expect("write-back mutex").take() {
                return Err(err);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Write pipeline
    // ------------------------------------------------------------------

    /// Hashes `data`, then packs, dedupes or encrypts-and-uploads it,
    /// returning the id under which it can be read back.
    pub(crate) fn hash_encrypt_and_write<'a>(
        &'a self,
        pack_group: &'a str,
        data: Vec<u8>,
        prefix: &'a str,
        disable_packing: bool,
    ) -> BoxFuture<'a, Result<ObjectId>> {
        Box::pin(self.hash_encrypt_and_write_inner(pack_group, data, prefix, disable_packing))
    }

    async fn hash_encrypt_and_write_inner(
        &self,
        pack_group: &str,
        data: Vec<u8>,
        prefix: &str,
        disable_packing: bool,
    ) -> Result<ObjectId> {
        let block_name = format!("{}{}", prefix, self.inner.formatter.block_hash(&data));
        self.inner.stats.hashed_blocks.fetch_add(1, Ordering::Relaxed);
        self.inner
            .stats
            .hashed_bytes
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        self.trace(|| format!("hash_encrypt_and_write block={} len={}", block_name, data.len()));

        let max_packed = self.inner.format.max_packed_content_length;
        if !disable_packing
            && max_packed > 0
            && data.len() <= max_packed as usize
            && self.packing_enabled().await
        {
            return self.add_to_pack(pack_group, block_name, data).await;
        }

        // Check for the block before encrypting; a hit skips the upload.
        self.inner.stats.checked_blocks.fetch_add(1, Ordering::Relaxed);
        match self.inner.block_sizes.get_size(&block_name).await {
            Ok(size) if size == data.len() as u64 => {
                self.inner.stats.present_blocks.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(block = %block_name, "dedupe hit, skipping upload");
                return Ok(ObjectId::Raw(block_name));
            }
            Ok(_) => {}
            Err(Error::NotFound { .. }) => {}
            // Unknown whether the block exists; abort the write.
            Err(err) => return Err(err),
        }

        self.inner
            .stats
            .encrypted_bytes
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        let ciphertext = self.inner.formatter.encrypt(data, &block_name, 0)?;
        let ciphertext_len = ciphertext.len() as u64;

        self.inner.stats.written_blocks.fetch_add(1, Ordering::Relaxed);
        self.inner
            .stats
            .written_bytes
            .fetch_add(ciphertext_len, Ordering::Relaxed);

        match &self.inner.write_back {
            None => {
                self.inner
                    .blob
                    .put_block(&block_name, Bytes::from(ciphertext))
                    .await?;
                self.inner.block_sizes.record(&block_name, ciphertext_len).await;
            }
            Some(pool) => {
                let permit = pool
                    .semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::Cancelled)?;
                let inner = Arc::clone(&self.inner);
                let name = block_name.clone();
                let payload = Bytes::from(ciphertext);

                tokio::spawn(async move {
                    match inner.blob.put_block(&name, payload).await {
                        Ok(()) => inner.block_sizes.record(&name, ciphertext_len).await,
                        Err(err) => {
                            tracing::warn!(block = %name, error = %err, "write-back upload failed");
                            if let Some(pool) = &inner.write_back {
                                let mut failed = pool.failed.lock().expect("write-back mutex");
                                if failed.is_none() {
                                    *failed = Some(err);
                                }
                            }
                        }
                    }
                    drop(permit);
                });
            }
        }

        Ok(ObjectId::Raw(block_name))
    }

    async fn packing_enabled(&self) -> bool {
        self.inner.pack.state.lock().await.enabled
    }

    async fn add_to_pack(&self, group: &str, block_name: String, data: Vec<u8>) -> Result<ObjectId> {
        let max_pack = self.inner.format.max_pack_file_length as usize;
        let mut state = self.inner.pack.state.lock().await;

        // A block lives in at most one pack.
        if state.resolved.contains_key(&block_name) {
            return Ok(ObjectId::Packed(block_name));
        }
        let needs_rollover = match state.groups.get(group) {
            Some(open) if open.contains(&block_name) => {
                return Ok(ObjectId::Packed(block_name));
            }
            Some(open) => !open.buffer.is_empty() && open.buffer.len() + data.len() > max_pack,
            None => false,
        };
        if needs_rollover {
            let full = state.groups.remove(group).expect("open pack");
            if let Some(index) = self.upload_pack(full).await? {
                state.merge_index(&index);
            }
        }

        let open = state
            .groups
            .entry(group.to_string())
            .or_insert_with(OpenPack::new);

        // Encrypt with the pack blob's identity at this buffer offset, so
        // the buffer holds ciphertext and finalize uploads it verbatim.
        let offset = open.buffer.len() as u64;
        let ciphertext = self.inner.formatter.encrypt(data, &open.pack_name, offset)?;
        self.inner
            .stats
            .encrypted_bytes
            .fetch_add(ciphertext.len() as u64, Ordering::Relaxed);

        open.items.push(PackIndexEntry {
            block: block_name.clone(),
            start: offset,
            length: ciphertext.len() as u64,
        });
        open.buffer.extend_from_slice(&ciphertext);

        Ok(ObjectId::Packed(block_name))
    }

    /// Uploads one pack blob and writes its index object. Touches neither
    /// the pack state nor the pack lock, so callers may hold the latter.
    async fn upload_pack(&self, open: OpenPack) -> Result<Option<PackIndex>> {
        if open.items.is_empty() {
            return Ok(None);
        }

        let (buffer, index) = open.into_index();
        self.inner.blob.put_block(&index.pack, buffer).await?;

        let stream = encode_pack_index(&index)?;
        self.hash_encrypt_and_write("", stream.to_vec(), PACK_INDEX_PREFIX, true)
            .await?;

        tracing::debug!(pack = %index.pack, blocks = index.items.len(), "finalized pack");
        Ok(Some(index))
    }

    // ------------------------------------------------------------------
    // Read pipeline
    // ------------------------------------------------------------------

    fn open_object<'a>(&'a self, id: &'a ObjectId) -> BoxFuture<'a, Result<ObjectReader>> {
        Box::pin(async move {
            match id {
                ObjectId::Inline(data) => Ok(ObjectReader::Data(DataReader::new(
                    Bytes::copy_from_slice(data),
                ))),
                ObjectId::Text(text) => Ok(ObjectReader::Data(DataReader::new(
                    Bytes::copy_from_slice(text.as_bytes()),
                ))),
                ObjectId::Section {
                    start,
                    length,
                    base,
                } => {
                    let base_reader = self.open_object(base).await?;
                    Ok(ObjectReader::Section(
                        SectionReader::new(*start, *length, base_reader).await?,
                    ))
                }
                ObjectId::Indirect(base) => {
                    let mut list_reader = self.open_object(base).await?;
                    let seek_table = self.flatten_list_chunk(&mut list_reader).await?;
                    Ok(ObjectReader::Indirect(IndirectReader::new(
                        self.clone(),
                        seek_table,
                    )))
                }
                ObjectId::Raw(name) | ObjectId::Packed(name) => self.new_raw_reader(name).await,
            }
        })
    }

    async fn flatten_list_chunk(&self, reader: &mut ObjectReader) -> Result<Vec<IndirectEntry>> {
        let data = reader.read_to_end().await?;
        let mut records = RecordReader::new(Bytes::from(data), INDIRECT_STREAM_TYPE)?;

        let mut seek_table: Vec<IndirectEntry> = Vec::new();
        let mut expected_start = 0u64;
        while let Some(entry) = records.read::<IndirectEntry>()? {
            if entry.start != expected_start {
                return Err(coffer_core::Error::MalformedStream(
                    "indirect entries are not contiguous".to_string(),
                )
                .into());
            }
            expected_start = entry.end_offset();
            seek_table.push(entry);
        }
        Ok(seek_table)
    }

    async fn new_raw_reader(&self, name: &str) -> Result<ObjectReader> {
        let section = self.block_id_to_pack_section(name).await?;
        let (payload, base_name, skip) = match &section {
            Some(s) => (
                self.inner.blob.get_block(&s.base, s.start, s.length as i64).await?,
                s.base.as_str(),
                s.start,
            ),
            None => (self.inner.blob.get_block(name, 0, -1).await?, name, 0),
        };

        self.inner.stats.read_blocks.fetch_add(1, Ordering::Relaxed);
        self.inner
            .stats
            .read_bytes
            .fetch_add(payload.len() as u64, Ordering::Relaxed);

        let plaintext = self.inner.formatter.decrypt(payload.to_vec(), base_name, skip)?;
        self.inner
            .stats
            .decrypted_bytes
            .fetch_add(plaintext.len() as u64, Ordering::Relaxed);

        self.verify_checksum(&plaintext, name)?;
        Ok(ObjectReader::Data(DataReader::new(Bytes::from(plaintext))))
    }

    /// The encryption key is a function of the content, so re-deriving the
    /// hash after decryption must reproduce the block name. This is the
    /// per-block checksum.
    fn verify_checksum(&self, data: &[u8], block_name: &str) -> Result<()> {
        let expected = self.inner.formatter.block_hash(data);
        if !block_name.ends_with(&expected) {
            self.inner.stats.invalid_blocks.fetch_add(1, Ordering::Relaxed);
            return Err(Error::IntegrityMismatch {
                block: block_name.to_string(),
            });
        }
        self.inner.stats.valid_blocks.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn block_id_to_pack_section(&self, block_name: &str) -> Result<Option<PackSection>> {
        // Pack-index objects are never packed; skipping them here also keeps
        // index loading from recursing into itself.
        if block_name.starts_with(PACK_INDEX_PREFIX) {
            return Ok(None);
        }

        {
            let state = self.inner.pack.state.lock().await;
            if let Some(section) = state.resolve(block_name) {
                return Ok(Some(section));
            }
            if state.indexes_loaded {
                return Ok(None);
            }
        }

        let indexes = self.load_pack_indexes().await?;

        let mut state = self.inner.pack.state.lock().await;
        for index in &indexes {
            state.merge_index(index);
        }
        state.indexes_loaded = true;
        Ok(state.resolve(block_name))
    }

    async fn load_pack_indexes(&self) -> Result<Vec<PackIndex>> {
        let names = self.inner.blob.list_blocks(PACK_INDEX_PREFIX).await?;
        let mut indexes = Vec::new();
        for name in names {
            let id = ObjectId::Raw(name);
            let mut reader = self.open_object(&id).await?;
            let data = reader.read_to_end().await?;
            indexes.extend(decode_pack_indexes(Bytes::from(data))?);
        }

        tracing::debug!(count = indexes.len(), "loaded pack indexes");
        Ok(indexes)
    }
}
