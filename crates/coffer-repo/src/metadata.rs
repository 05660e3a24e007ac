//! Metadata Manager
//!
//! Repository metadata lives under the `m/` class as small JSON documents:
//!
//! - `m/format`: the plaintext format descriptor (everything needed to
//!   re-derive the master key)
//! - `m/repository`: the encrypted repository object format
//!
//! Encrypted documents are AES-256-GCM envelopes keyed by the master key,
//! with the random 12-byte nonce prepended to the ciphertext. A wrong master
//! key fails authentication at decrypt time, which is how a bad password
//! surfaces.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use serde::de::DeserializeOwned;
use serde::Serialize;

use bytes::Bytes;

use coffer_core::MetadataFormat;

use crate::blob::BlobStore;
use crate::error::{Error, Result};

/// Class prefix of metadata blobs.
pub const METADATA_BLOCK_PREFIX: &str = "m/";

/// Block id of the plaintext format descriptor.
pub const FORMAT_BLOCK_ID: &str = "format";

/// Block id of the encrypted repository configuration.
pub const REPOSITORY_CONFIG_BLOCK_ID: &str = "repository";

/// Byte length of the AES-GCM nonce prepended to every encrypted document.
const NONCE_LEN: usize = 12;

/// Reads and writes (optionally encrypted) metadata documents.
pub struct MetadataManager {
    blob: BlobStore,
    format: MetadataFormat,
    master_key: [u8; 32],
}

impl MetadataManager {
    pub fn new(blob: BlobStore, format: MetadataFormat, master_key: [u8; 32]) -> Self {
        Self {
            blob,
            format,
            master_key,
        }
    }

    pub fn format(&self) -> &MetadataFormat {
        &self.format
    }

    fn block_name(block_id: &str) -> String {
        format!("{}{}", METADATA_BLOCK_PREFIX, block_id)
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.master_key)
            .map_err(|e| Error::Crypto(e.to_string()))
    }

    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        match self.format.encryption_algorithm.as_str() {
            "none" => Ok(plaintext.to_vec()),
            "aes256-gcm" => {
                let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
                let ciphertext = self
                    .cipher()?
                    .encrypt(&nonce, plaintext)
                    .map_err(|_| Error::Crypto("metadata encryption failed".to_string()))?;

                let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
                out.extend_from_slice(nonce.as_slice());
                out.extend_from_slice(&ciphertext);
                Ok(out)
            }
            other => Err(Error::ConfigInvalid(format!(
                "unsupported metadata encryption algorithm {:?}",
                other
            ))),
        }
    }

    fn unseal(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self.format.encryption_algorithm.as_str() {
            "none" => Ok(data.to_vec()),
            "aes256-gcm" => {
                if data.len() < NONCE_LEN {
                    return Err(Error::Crypto("metadata envelope too short".to_string()));
                }
                let nonce = Nonce::from_slice(&data[..NONCE_LEN]);
                self.cipher()?
                    .decrypt(nonce, &data[NONCE_LEN..])
                    .map_err(|_| Error::Crypto("metadata decryption failed".to_string()))
            }
            other => Err(Error::ConfigInvalid(format!(
                "unsupported metadata encryption algorithm {:?}",
                other
            ))),
        }
    }

    /// Encrypts and stores `value` as the metadata document `block_id`.
    pub async fn put_json<T: Serialize>(&self, block_id: &str, value: &T) -> Result<()> {
        let plaintext =
            serde_json::to_vec(value).map_err(|e| Error::Crypto(e.to_string()))?;
        let sealed = self.seal(&plaintext)?;
        self.blob
            .put_block(&Self::block_name(block_id), Bytes::from(sealed))
            .await
    }

    /// Fetches and decrypts the metadata document `block_id`.
    pub async fn get_json<T: DeserializeOwned>(&self, block_id: &str) -> Result<T> {
        let sealed = self
            .blob
            .get_block(&Self::block_name(block_id), 0, -1)
            .await?;
        let plaintext = self.unseal(&sealed)?;
        serde_json::from_slice(&plaintext).map_err(|e| Error::Crypto(e.to_string()))
    }
}
