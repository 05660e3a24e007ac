//! Repository Initialization
//!
//! One-shot creation of the on-store format descriptors, and the matching
//! open path:
//!
//! 1. Build the metadata format (key derivation algorithm, unique id,
//!    metadata encryption algorithm), filling unset fields with defaults.
//! 2. Ask the credentials for the master key.
//! 3. Persist the descriptor as plaintext at `m/format`.
//! 4. Build the repository object format (splitter, object format, secrets,
//!    block sizes, pack limits), again defaulting unset fields.
//! 5. Encrypt and persist it at `m/repository`.
//!
//! Re-initializing a store that already carries a format descriptor fails
//! with `AlreadyInitialized`; nothing is overwritten.

use std::sync::Arc;

use bytes::Bytes;
use object_store::ObjectStore;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use coffer_core::{MetadataFormat, RepositoryObjectFormat};

use crate::blob::BlobStore;
use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::manager::{ObjectManager, Options};
use crate::metadata::{
    MetadataManager, FORMAT_BLOCK_ID, METADATA_BLOCK_PREFIX, REPOSITORY_CONFIG_BLOCK_ID,
};

/// Options for newly created repositories. All fields are optional; unset
/// fields get reasonable defaults.
#[derive(Default)]
pub struct NewRepositoryOptions {
    /// Force a particular unique id for the metadata manager.
    pub unique_id: Option<Vec<u8>>,
    pub metadata_encryption_algorithm: Option<String>,
    pub key_derivation_algorithm: Option<String>,

    /// Identifier of the object format.
    pub object_format: Option<String>,
    /// Force a particular object HMAC secret.
    pub object_hmac_secret: Option<Vec<u8>>,
    /// Force a particular object encryption key.
    pub object_encryption_key: Option<Vec<u8>>,

    /// Splitter used to break objects into storage blocks.
    pub splitter: Option<String>,
    /// Block sizes for the dynamic splitter; 0 means default.
    pub min_block_size: u32,
    pub avg_block_size: u32,
    pub max_block_size: u32,
    /// Maximum size of an object considered for packing; 0 means default.
    pub max_packed_content_length: u32,
    /// Maximum length of a single pack file; 0 means default.
    pub max_pack_file_length: u32,

    /// Disable keyed hashing; object ids become plain content hashes.
    pub no_hmac: bool,
}

/// Envelope for the encrypted repository configuration document.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct EncryptedRepositoryConfig {
    pub format: RepositoryObjectFormat,
}

/// An opened repository: the object manager plus its metadata manager.
pub struct Repository {
    pub objects: ObjectManager,
    metadata: MetadataManager,
}

impl Repository {
    pub fn metadata(&self) -> &MetadataManager {
        &self.metadata
    }

    /// Waits for pending writes and releases caches. The underlying storage
    /// stays open; the caller owns it.
    pub async fn close(&self) -> Result<()> {
        self.objects.close().await
    }
}

/// Creates initial repository data structures in `storage` with the given
/// credentials.
pub async fn initialize(
    storage: Arc<dyn ObjectStore>,
    options: &NewRepositoryOptions,
    credentials: &dyn Credentials,
) -> Result<()> {
    let blob = BlobStore::new(storage);

    let format_block = format!("{}{}", METADATA_BLOCK_PREFIX, FORMAT_BLOCK_ID);
    match blob.block_size(&format_block).await {
        Ok(_) => return Err(Error::AlreadyInitialized),
        Err(Error::NotFound { .. }) => {}
        Err(err) => return Err(err),
    }

    let metadata_format = metadata_format_from_options(options);
    let master_key = credentials.master_key(&metadata_format)?;

    let descriptor = serde_json::to_vec_pretty(&metadata_format)
        .map_err(|e| Error::Crypto(e.to_string()))?;
    blob.put_block(&format_block, Bytes::from(descriptor)).await?;

    let metadata = MetadataManager::new(blob, metadata_format, master_key);
    metadata
        .put_json(
            REPOSITORY_CONFIG_BLOCK_ID,
            &EncryptedRepositoryConfig {
                format: repository_format_from_options(options),
            },
        )
        .await?;

    Ok(())
}

/// Opens an initialized repository: reads the format descriptor, re-derives
/// the master key, decrypts the repository configuration and builds the
/// object manager.
pub async fn open_repository(
    storage: Arc<dyn ObjectStore>,
    credentials: &dyn Credentials,
    options: Options,
) -> Result<Repository> {
    let blob = BlobStore::new(Arc::clone(&storage));

    let format_block = format!("{}{}", METADATA_BLOCK_PREFIX, FORMAT_BLOCK_ID);
    let descriptor = blob.get_block(&format_block, 0, -1).await?;
    let metadata_format: MetadataFormat = serde_json::from_slice(&descriptor)
        .map_err(|e| coffer_core::Error::MalformedStream(e.to_string()))?;

    let master_key = credentials.master_key(&metadata_format)?;
    let metadata = MetadataManager::new(blob, metadata_format, master_key);

    let config: EncryptedRepositoryConfig = metadata.get_json(REPOSITORY_CONFIG_BLOCK_ID).await?;

    tracing::debug!(
        splitter = %config.format.splitter,
        object_format = %config.format.object_format,
        "opened repository"
    );

    Ok(Repository {
        objects: ObjectManager::new(storage, config.format, options)?,
        metadata,
    })
}

fn metadata_format_from_options(options: &NewRepositoryOptions) -> MetadataFormat {
    MetadataFormat {
        version: "1".to_string(),
        key_derivation_algorithm: options
            .key_derivation_algorithm
            .clone()
            .unwrap_or_else(|| "argon2id".to_string()),
        unique_id: options
            .unique_id
            .clone()
            .unwrap_or_else(|| random_bytes(32)),
        encryption_algorithm: options
            .metadata_encryption_algorithm
            .clone()
            .unwrap_or_else(|| "aes256-gcm".to_string()),
    }
}

fn repository_format_from_options(options: &NewRepositoryOptions) -> RepositoryObjectFormat {
    let defaults = RepositoryObjectFormat::default();
    RepositoryObjectFormat {
        version: 1,
        splitter: options.splitter.clone().unwrap_or(defaults.splitter),
        object_format: options
            .object_format
            .clone()
            .unwrap_or(defaults.object_format),
        hmac_secret: if options.no_hmac {
            None
        } else {
            Some(
                options
                    .object_hmac_secret
                    .clone()
                    .unwrap_or_else(|| random_bytes(32)),
            )
        },
        master_key: options
            .object_encryption_key
            .clone()
            .unwrap_or_else(|| random_bytes(32)),
        min_block_size: apply_default(options.min_block_size, defaults.min_block_size),
        avg_block_size: apply_default(options.avg_block_size, defaults.avg_block_size),
        max_block_size: apply_default(options.max_block_size, defaults.max_block_size),
        max_packed_content_length: apply_default(
            options.max_packed_content_length,
            defaults.max_packed_content_length,
        ),
        max_pack_file_length: apply_default(
            options.max_pack_file_length,
            defaults.max_pack_file_length,
        ),
    }
}

fn apply_default(value: u32, default: u32) -> u32 {
    if value == 0 {
        default
    } else {
        value
    }
}

fn random_bytes(n: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; n];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}
