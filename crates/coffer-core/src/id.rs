//! Object Identifiers
//!
//! An `ObjectId` names an immutable object by its content. Exactly one
//! variant applies:
//!
//! - `Raw`: a storage block name derived from the content hash, optionally
//!   carrying a class prefix (`k/` pack indexes, `m/` metadata, ...)
//! - `Packed`: a storage block name that resolves through the pack index to
//!   a slice of a pack blob
//! - `Inline`: the object's bytes carried directly in the id (tiny objects)
//! - `Text`: a short textual payload carried directly in the id
//! - `Indirect`: points at a list object describing the chunks of a larger
//!   logical object
//! - `Section`: a byte window over another object, without copying
//!
//! ## Textual form
//!
//! ```text
//! T<text>                    inline text
//! B<hex>                     inline binary
//! I<base>                    indirect (base is the list object's id)
//! S<start>,<length>,<base>   section window over base
//! <block name>               raw / packed, verbatim
//! ```
//!
//! Block names are lowercase hex, optionally behind a slash-delimited class
//! prefix, so they never collide with the `T`/`B`/`I`/`S` sigils. `Packed`
//! prints as its block name and re-parses as `Raw`; the read path resolves
//! raw names through the pack index first, so the distinction is an
//! in-memory optimization, not a wire one.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Identifier of a repository object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectId {
    /// Storage block name, stored as its own blob.
    Raw(String),
    /// Storage block name that lives inside a pack blob.
    Packed(String),
    /// Object bytes carried inline in the id.
    Inline(Vec<u8>),
    /// Short textual payload carried inline in the id.
    Text(String),
    /// Points at the list object enumerating the chunks of this object.
    Indirect(Box<ObjectId>),
    /// Byte window `[start, start+length)` over another object.
    Section {
        start: u64,
        length: u64,
        base: Box<ObjectId>,
    },
}

impl ObjectId {
    /// The storage block name, for variants that have one.
    pub fn block_name(&self) -> Option<&str> {
        match self {
            ObjectId::Raw(name) | ObjectId::Packed(name) => Some(name),
            _ => None,
        }
    }

    /// Builds an inline id for `data`: printable UTF-8 becomes a text id,
    /// anything else an inline-binary id.
    pub fn inline(data: &[u8]) -> ObjectId {
        match std::str::from_utf8(data) {
            Ok(text) if text.chars().all(|c| !c.is_control()) => {
                ObjectId::Text(text.to_string())
            }
            _ => ObjectId::Inline(data.to_vec()),
        }
    }

    pub fn parse(s: &str) -> Result<ObjectId> {
        let mut chars = s.chars();
        match chars.next() {
            None => Err(Error::MalformedObjectId("empty".to_string())),
            Some('T') => Ok(ObjectId::Text(chars.as_str().to_string())),
            Some('B') => {
                let payload = hex::decode(chars.as_str())
                    .map_err(|_| Error::MalformedObjectId(s.to_string()))?;
                Ok(ObjectId::Inline(payload))
            }
            Some('I') => {
                let base = ObjectId::parse(chars.as_str())?;
                Ok(ObjectId::Indirect(Box::new(base)))
            }
            Some('S') => {
                let mut parts = chars.as_str().splitn(3, ',');
                let start = parts
                    .next()
                    .and_then(|p| p.parse::<u64>().ok())
                    .ok_or_else(|| Error::MalformedObjectId(s.to_string()))?;
                let length = parts
                    .next()
                    .and_then(|p| p.parse::<u64>().ok())
                    .ok_or_else(|| Error::MalformedObjectId(s.to_string()))?;
                let base = parts
                    .next()
                    .ok_or_else(|| Error::MalformedObjectId(s.to_string()))?;
                Ok(ObjectId::Section {
                    start,
                    length,
                    base: Box::new(ObjectId::parse(base)?),
                })
            }
            Some(_) => {
                if s.chars().all(|c| c.is_ascii_alphanumeric() || c == '/') {
                    Ok(ObjectId::Raw(s.to_string()))
                } else {
                    Err(Error::MalformedObjectId(s.to_string()))
                }
            }
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectId::Raw(name) | ObjectId::Packed(name) => f.write_str(name),
            ObjectId::Inline(data) => write!(f, "B{}", hex::encode(data)),
            ObjectId::Text(text) => write!(f, "T{}", text),
            ObjectId::Indirect(base) => write!(f, "I{}", base),
            ObjectId::Section {
                start,
                length,
                base,
            } => write!(f, "S{},{},{}", start, length, base),
        }
    }
}

impl FromStr for ObjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<ObjectId> {
        ObjectId::parse(s)
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        ObjectId::parse(&text).map_err(D::Error::custom)
    }
}

/// One chunk of a larger logical object, as recorded in an indirect list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndirectEntry {
    /// Logical offset of the chunk within the object.
    pub start: u64,
    /// Chunk length in bytes.
    pub length: u64,
    /// Identifier of the chunk's own object.
    pub object: ObjectId,
}

impl IndirectEntry {
    pub fn end_offset(&self) -> u64 {
        self.start + self.length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(id: &ObjectId) {
        let text = id.to_string();
        let parsed = ObjectId::parse(&text).unwrap();
        assert_eq!(parsed.to_string(), text, "textual form must round-trip");
    }

    #[test]
    fn test_raw_roundtrip() {
        let id = ObjectId::Raw("05c3f2a9b1".to_string());
        roundtrip(&id);
        assert_eq!(ObjectId::parse("05c3f2a9b1").unwrap(), id);
    }

    #[test]
    fn test_prefixed_raw_roundtrip() {
        for name in ["k/deadbeef", "m/format", "p/00ff00ff", "x/aabb"] {
            assert_eq!(
                ObjectId::parse(name).unwrap(),
                ObjectId::Raw(name.to_string())
            );
        }
    }

    #[test]
    fn test_packed_prints_as_block_name() {
        let id = ObjectId::Packed("deadbeef".to_string());
        assert_eq!(id.to_string(), "deadbeef");
        // Re-parses as Raw; the read path resolves it via the pack index.
        assert_eq!(
            ObjectId::parse("deadbeef").unwrap(),
            ObjectId::Raw("deadbeef".to_string())
        );
    }

    #[test]
    fn test_text_roundtrip() {
        let id = ObjectId::Text("hello world".to_string());
        assert_eq!(id.to_string(), "Thello world");
        assert_eq!(ObjectId::parse("Thello world").unwrap(), id);
    }

    #[test]
    fn test_empty_text() {
        assert_eq!(
            ObjectId::parse("T").unwrap(),
            ObjectId::Text(String::new())
        );
    }

    #[test]
    fn test_inline_binary_roundtrip() {
        let id = ObjectId::Inline(vec![0x00, 0xFF, 0x7F]);
        assert_eq!(id.to_string(), "B00ff7f");
        assert_eq!(ObjectId::parse("B00ff7f").unwrap(), id);
    }

    #[test]
    fn test_indirect_roundtrip() {
        let id = ObjectId::Indirect(Box::new(ObjectId::Raw("aabbcc".to_string())));
        assert_eq!(id.to_string(), "Iaabbcc");
        roundtrip(&id);
    }

    #[test]
    fn test_section_roundtrip() {
        let id = ObjectId::Section {
            start: 10,
            length: 20,
            base: Box::new(ObjectId::Raw("aabbcc".to_string())),
        };
        assert_eq!(id.to_string(), "S10,20,aabbcc");
        roundtrip(&id);
    }

    #[test]
    fn test_nested_section_over_indirect() {
        let id = ObjectId::Section {
            start: 5,
            length: 7,
            base: Box::new(ObjectId::Indirect(Box::new(ObjectId::Raw(
                "0123abcd".to_string(),
            )))),
        };
        assert_eq!(id.to_string(), "S5,7,I0123abcd");
        roundtrip(&id);
    }

    #[test]
    fn test_section_over_section() {
        // The base of a section may itself contain commas.
        let id = ObjectId::parse("S1,2,S3,4,aabb").unwrap();
        match id {
            ObjectId::Section {
                start: 1,
                length: 2,
                base,
            } => match *base {
                ObjectId::Section {
                    start: 3,
                    length: 4,
                    ..
                } => {}
                other => panic!("unexpected inner id: {:?}", other),
            },
            other => panic!("unexpected id: {:?}", other),
        }
    }

    #[test]
    fn test_parse_failures() {
        for text in ["", "Bzz", "S1,aabb", "S1,2", "Sx,2,aabb", "aa bb", "a_b"] {
            assert!(
                ObjectId::parse(text).is_err(),
                "{:?} should not parse",
                text
            );
        }
    }

    #[test]
    fn test_inline_constructor_prefers_text() {
        assert_eq!(
            ObjectId::inline(b"config"),
            ObjectId::Text("config".to_string())
        );
        assert_eq!(
            ObjectId::inline(&[0x00, 0x01]),
            ObjectId::Inline(vec![0x00, 0x01])
        );
    }

    #[test]
    fn test_serde_as_string() {
        let entry = IndirectEntry {
            start: 0,
            length: 16,
            object: ObjectId::Raw("cafe".to_string()),
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"start":0,"length":16,"object":"cafe"}"#);
        let back: IndirectEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
