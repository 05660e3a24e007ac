//! Object Readers
//!
//! `ObjectManager::open` hands back an `ObjectReader` matching the id
//! variant:
//!
//! - `Data`: the whole (decrypted, checksum-verified) payload in memory:
//!   inline ids, raw blocks, packed slices
//! - `Indirect`: stitches the chunks listed in an indirect list back into
//!   one seekable stream, materializing a single chunk at a time
//! - `Section`: a byte window over another reader, forwarding seeks into
//!   the base
//!
//! All readers expose `read` (returning `Ok(0)` at end of stream), `seek`
//! with the usual three whences, and `length`. Seeking past the end clamps
//! to the end; seeks resolving to a negative offset fail with `InvalidSeek`.
//!
//! Readers nest: a section over an indirect object builds an indirect base
//! reader internally, and chunk opens recurse through the manager. The
//! recursion is broken with boxed futures at the enum layer.

use std::io::SeekFrom;

use bytes::Bytes;
use futures::future::BoxFuture;

use coffer_core::IndirectEntry;

use crate::error::{Error, Result};
use crate::manager::ObjectManager;

/// Seekable reader over one repository object.
pub enum ObjectReader {
    Data(DataReader),
    Indirect(IndirectReader),
    Section(SectionReader),
}

impl std::fmt::Debug for ObjectReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self {
            ObjectReader::Data(_) => "Data",
            ObjectReader::Indirect(_) => "Indirect",
            ObjectReader::Section(_) => "Section",
        };
        write!(f, "ObjectReader::{}", variant)
    }
}

impl ObjectReader {
    /// Reads up to `buf.len()` bytes; returns `Ok(0)` only at end of stream.
    pub fn read<'a>(&'a mut self, buf: &'a mut [u8]) -> BoxFuture<'a, Result<usize>> {
        Box::pin(async move {
            match self {
                ObjectReader::Data(r) => r.read(buf),
                ObjectReader::Indirect(r) => r.read(buf).await,
                ObjectReader::Section(r) => r.read(buf).await,
            }
        })
    }

    /// Moves the cursor; returns the resulting offset from the start.
    pub fn seek(&mut self, pos: SeekFrom) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move {
            match self {
                ObjectReader::Data(r) => r.seek(pos),
                ObjectReader::Indirect(r) => r.seek(pos).await,
                ObjectReader::Section(r) => r.seek(pos).await,
            }
        })
    }

    /// Total length of the object in bytes.
    pub fn length(&self) -> u64 {
        match self {
            ObjectReader::Data(r) => r.length(),
            ObjectReader::Indirect(r) => r.length(),
            ObjectReader::Section(r) => r.length(),
        }
    }

    /// Drains the reader from its current position to the end.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = [0u8; 16 * 1024];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }
}

/// Resolves a seek target against `position`/`length`, clamping past-end
/// targets and rejecting negative ones.
fn resolve_seek(pos: SeekFrom, position: u64, length: u64) -> Result<u64> {
    let target = match pos {
        SeekFrom::Start(offset) => offset as i128,
        SeekFrom::Current(delta) => position as i128 + delta as i128,
        SeekFrom::End(delta) => length as i128 + delta as i128,
    };
    if target < 0 {
        return Err(Error::InvalidSeek);
    }
    Ok((target as u64).min(length))
}

/// In-memory payload reader for inline, raw and packed objects.
pub struct DataReader {
    data: Bytes,
    position: u64,
}

impl DataReader {
    pub(crate) fn new(data: Bytes) -> Self {
        Self { data, position: 0 }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = self.data.len() as u64 - self.position;
        let n = (buf.len() as u64).min(remaining) as usize;
        let start = self.position as usize;
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.position += n as u64;
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.position = resolve_seek(pos, self.position, self.data.len() as u64)?;
        Ok(self.position)
    }

    fn length(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Byte window `[start, start+length)` over a base reader.
pub struct SectionReader {
    base: Box<ObjectReader>,
    start: u64,
    window_length: u64,
    position: u64,
}

impl SectionReader {
    pub(crate) async fn new(
        start: u64,
        length: u64,
        mut base: ObjectReader,
    ) -> Result<SectionReader> {
        base.seek(SeekFrom::Start(start)).await?;
        Ok(SectionReader {
            base: Box::new(base),
            start,
            window_length: length,
            position: 0,
        })
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = self.window_length - self.position;
        let n = (buf.len() as u64).min(remaining) as usize;
        if n == 0 {
            return Ok(0);
        }

        let read = self.base.read(&mut buf[..n]).await?;
        self.position += read as u64;
        Ok(read)
    }

    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.position = resolve_seek(pos, self.position, self.window_length)?;
        self.base
            .seek(SeekFrom::Start(self.start + self.position))
            .await?;
        Ok(self.position)
    }

    fn length(&self) -> u64 {
        self.window_length
    }
}

/// Stitches the chunks of an indirect list into one seekable stream.
///
/// Only one chunk is materialized at a time; switching chunks discards the
/// previous buffer.
pub struct IndirectReader {
    manager: ObjectManager,
    seek_table: Vec<IndirectEntry>,
    total_length: u64,

    position: u64,
    current_chunk: usize,
    chunk_data: Option<Bytes>,
    chunk_position: usize,
}

impl IndirectReader {
    pub(crate) fn new(manager: ObjectManager, seek_table: Vec<IndirectEntry>) -> Self {
        let total_length = seek_table.last().map(|e| e.end_offset()).unwrap_or(0);
        Self {
            manager,
            seek_table,
            total_length,
            position: 0,
            current_chunk: 0,
            chunk_data: None,
            chunk_position: 0,
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut read_bytes = 0;

        while read_bytes < buf.len() {
            if let Some(chunk) = &self.chunk_data {
                let available = chunk.len() - self.chunk_position;
                if available == 0 {
                    // End of current chunk, move to the next one.
                    self.chunk_data = None;
                    self.current_chunk += 1;
                    continue;
                }

                let n = available.min(buf.len() - read_bytes);
                buf[read_bytes..read_bytes + n]
                    .copy_from_slice(&chunk[self.chunk_position..self.chunk_position + n]);
                self.chunk_position += n;
                self.position += n as u64;
                read_bytes += n;
            } else if self.current_chunk < self.seek_table.len() {
                self.open_current_chunk().await?;
            } else {
                break;
            }
        }

        Ok(read_bytes)
    }

    async fn open_current_chunk(&mut self) -> Result<()> {
        let entry = self.seek_table[self.current_chunk].clone();
        let mut reader = self.manager.open(&entry.object).await?;

        let mut data = vec![0u8; entry.length as usize];
        let mut filled = 0;
        while filled < data.len() {
            let n = reader.read(&mut data[filled..]).await?;
            if n == 0 {
                return Err(coffer_core::Error::MalformedStream(format!(
                    "chunk {} shorter than its indirect entry",
                    entry.object
                ))
                .into());
            }
            filled += n;
        }

        self.chunk_data = Some(Bytes::from(data));
        self.chunk_position = 0;
        Ok(())
    }

    /// Binary search for the chunk covering `offset`. The seek table is
    /// contiguous and ascending, so a miss for an in-range offset is an
    /// internal invariant violation.
    fn find_chunk_index(&self, offset: u64) -> usize {
        let mut left = 0usize;
        let mut right = self.seek_table.len();

        while left < right {
            let middle = (left + right) / 2;
            let entry = &self.seek_table[middle];
            if offset < entry.start {
                right = middle;
            } else if offset >= entry.end_offset() {
                left = middle + 1;
            } else {
                return middle;
            }
        }

        panic!("offset {} not covered by the seek table", offset);
    }

    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let offset = resolve_seek(pos, self.position, self.total_length)?;

        if offset == self.total_length {
            // Park past the last chunk; subsequent reads return EOF.
            self.chunk_data = None;
            self.current_chunk = self.seek_table.len();
            self.chunk_position = 0;
            self.position = offset;
            return Ok(offset);
        }

        let index = self.find_chunk_index(offset);
        if index != self.current_chunk {
            self.chunk_data = None;
            self.current_chunk = index;
        }
        if self.chunk_data.is_none() {
            self.open_current_chunk().await?;
        }

        self.chunk_position = (offset - self.seek_table[index].start) as usize;
        self.position = offset;
        Ok(offset)
    }

    fn length(&self) -> u64 {
        self.total_length
    }
}
