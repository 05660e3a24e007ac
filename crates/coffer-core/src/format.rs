//! Persisted Repository Format Documents
//!
//! Two JSON documents describe a repository and are written once at
//! initialization:
//!
//! - `MetadataFormat`: stored as plaintext; everything needed to re-derive
//!   the master key and decrypt the rest of the metadata.
//! - `RepositoryObjectFormat`: stored encrypted; tuning and secrets of the
//!   object pipeline (splitter, object format, block sizes, pack limits).
//!
//! Both are immutable after initialization. Fields carry serde defaults so
//! documents written by older versions keep parsing.

use serde::{Deserialize, Serialize};

/// Plaintext format descriptor, stored at `m/format`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFormat {
    pub version: String,
    pub key_derivation_algorithm: String,
    pub unique_id: Vec<u8>,
    pub encryption_algorithm: String,
}

/// Object pipeline configuration, stored encrypted at `m/repository`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryObjectFormat {
    pub version: u32,

    /// Splitter used to break objects into storage blocks.
    #[serde(default = "default_splitter")]
    pub splitter: String,

    /// Identifier of the object format (hash + cipher pair).
    #[serde(default = "default_object_format")]
    pub object_format: String,

    /// Keys object identity; `None` means unkeyed hashing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac_secret: Option<Vec<u8>>,

    /// Keys per-block encryption for encrypted object formats.
    #[serde(default)]
    pub master_key: Vec<u8>,

    /// Minimum block size used with the dynamic splitter.
    #[serde(default = "default_min_block_size")]
    pub min_block_size: u32,

    /// Approximate block size targeted by the dynamic splitter.
    #[serde(default = "default_avg_block_size")]
    pub avg_block_size: u32,

    /// Maximum size of a storage block.
    #[serde(default = "default_max_block_size")]
    pub max_block_size: u32,

    /// Maximum size of an object to be considered for storage in a pack.
    #[serde(default = "default_max_packed_content_length")]
    pub max_packed_content_length: u32,

    /// Maximum length of a single pack file.
    #[serde(default = "default_max_pack_file_length")]
    pub max_pack_file_length: u32,
}

impl Default for RepositoryObjectFormat {
    fn default() -> Self {
        Self {
            version: 1,
            splitter: default_splitter(),
            object_format: default_object_format(),
            hmac_secret: None,
            master_key: Vec::new(),
            min_block_size: default_min_block_size(),
            avg_block_size: default_avg_block_size(),
            max_block_size: default_max_block_size(),
            max_packed_content_length: default_max_packed_content_length(),
            max_pack_file_length: default_max_pack_file_length(),
        }
    }
}

fn default_splitter() -> String {
    "fixed".to_string()
}

fn default_object_format() -> String {
    "encrypted-hmac-sha256-aes256-ctr".to_string()
}

fn default_min_block_size() -> u32 {
    10 << 20 // 10 MiB
}

fn default_avg_block_size() -> u32 {
    16 << 20 // 16 MiB
}

fn default_max_block_size() -> u32 {
    20 << 20 // 20 MiB
}

fn default_max_packed_content_length() -> u32 {
    4 << 20 // 4 MiB
}

fn default_max_pack_file_length() -> u32 {
    20 << 20 // 20 MiB
}
