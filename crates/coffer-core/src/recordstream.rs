//! Framed Record Streams
//!
//! Structured blobs (indirect lists, pack indexes) are stored as a stream of
//! length-delimited JSON records behind a 4-byte stream-type tag:
//!
//! ```text
//! ┌──────────┬───────────────┬─────────┬───────────────┬─────────┬──
//! │ tag (4B) │ varint length │ record  │ varint length │ record  │ …
//! └──────────┴───────────────┴─────────┴───────────────┴─────────┴──
//! ```
//!
//! The tag distinguishes stream kinds so a reader handed the wrong blob kind
//! fails early instead of misinterpreting records. Readers reject unknown
//! tags and truncated frames with `MalformedStream`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::varint;

/// Stream tag for indirect object lists.
pub const INDIRECT_STREAM_TYPE: [u8; 4] = *b"IDIR";

/// Stream tag for pack indexes.
pub const PACK_INDEX_STREAM_TYPE: [u8; 4] = *b"PIXD";

/// Serializes records into a framed stream.
pub struct RecordWriter {
    buf: BytesMut,
}

impl RecordWriter {
    pub fn new(stream_type: [u8; 4]) -> Self {
        let mut buf = BytesMut::new();
        buf.put_slice(&stream_type);
        Self { buf }
    }

    pub fn write<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let payload = serde_json::to_vec(record)
            .map_err(|e| Error::MalformedStream(e.to_string()))?;
        varint::encode_u64(&mut self.buf, payload.len() as u64);
        self.buf.put_slice(&payload);
        Ok(())
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Reads records back out of a framed stream.
pub struct RecordReader {
    data: Bytes,
}

impl RecordReader {
    /// Validates the stream tag and positions the reader at the first record.
    pub fn new(data: Bytes, expected_type: [u8; 4]) -> Result<Self> {
        if data.len() < expected_type.len() {
            return Err(Error::MalformedStream("missing stream type tag".to_string()));
        }
        if data[..4] != expected_type {
            return Err(Error::MalformedStream(format!(
                "unexpected stream type {:?}",
                &data[..4]
            )));
        }
        Ok(Self {
            data: data.slice(4..),
        })
    }

    /// Returns the next record, or `None` at end of stream.
    pub fn read<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        if self.data.is_empty() {
            return Ok(None);
        }

        let length = varint::decode_u64(&mut self.data)
            .ok_or_else(|| Error::MalformedStream("truncated record length".to_string()))?;
        if (self.data.remaining() as u64) < length {
            return Err(Error::MalformedStream("truncated record".to_string()));
        }

        let payload = self.data.split_to(length as usize);
        let record = serde_json::from_slice(&payload)
            .map_err(|e| Error::MalformedStream(e.to_string()))?;
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{IndirectEntry, ObjectId};

    #[test]
    fn test_empty_stream() {
        let writer = RecordWriter::new(INDIRECT_STREAM_TYPE);
        let data = writer.finish();
        assert_eq!(data.len(), 4);

        let mut reader = RecordReader::new(data, INDIRECT_STREAM_TYPE).unwrap();
        let record: Option<IndirectEntry> = reader.read().unwrap();
        assert!(record.is_none());
    }

    #[test]
    fn test_roundtrip_entries() {
        let entries = vec![
            IndirectEntry {
                start: 0,
                length: 100,
                object: ObjectId::Raw("aa11".to_string()),
            },
            IndirectEntry {
                start: 100,
                length: 250,
                object: ObjectId::Raw("bb22".to_string()),
            },
        ];

        let mut writer = RecordWriter::new(INDIRECT_STREAM_TYPE);
        for entry in &entries {
            writer.write(entry).unwrap();
        }
        let data = writer.finish();

        let mut reader = RecordReader::new(data, INDIRECT_STREAM_TYPE).unwrap();
        let mut decoded = Vec::new();
        while let Some(entry) = reader.read::<IndirectEntry>().unwrap() {
            decoded.push(entry);
        }
        assert_eq!(decoded, entries);
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let mut writer = RecordWriter::new(INDIRECT_STREAM_TYPE);
        writer
            .write(&IndirectEntry {
                start: 0,
                length: 1,
                object: ObjectId::Raw("aa".to_string()),
            })
            .unwrap();
        let data = writer.finish();

        assert!(RecordReader::new(data, PACK_INDEX_STREAM_TYPE).is_err());
    }

    #[test]
    fn test_missing_tag_rejected() {
        assert!(RecordReader::new(Bytes::from_static(b"ID"), INDIRECT_STREAM_TYPE).is_err());
    }

    #[test]
    fn test_truncated_record_rejected() {
        let mut writer = RecordWriter::new(INDIRECT_STREAM_TYPE);
        writer
            .write(&IndirectEntry {
                start: 0,
                length: 1,
                object: ObjectId::Raw("aa".to_string()),
            })
            .unwrap();
        let data = writer.finish();

        // Chop off the record's tail.
        let truncated = data.slice(..data.len() - 3);
        let mut reader = RecordReader::new(truncated, INDIRECT_STREAM_TYPE).unwrap();
        assert!(reader.read::<IndirectEntry>().is_err());
    }

    #[test]
    fn test_garbage_record_rejected() {
        let mut data = BytesMut::new();
        data.put_slice(&INDIRECT_STREAM_TYPE);
        crate::varint::encode_u64(&mut data, 4);
        data.put_slice(b"!!!!");

        let mut reader = RecordReader::new(data.freeze(), INDIRECT_STREAM_TYPE).unwrap();
        assert!(reader.read::<IndirectEntry>().is_err());
    }
}
