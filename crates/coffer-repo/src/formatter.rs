//! Object Formats
//!
//! A formatter maps plaintext to identity and, for encrypted formats, to a
//! cipher keyed by that identity (convergent encryption):
//!
//! - the block hash is (HMAC-)SHA-256 of the plaintext; the HMAC secret,
//!   when present, makes identical plaintext hash differently across
//!   repositories
//! - the per-block AES-256 key is HMAC-SHA256(master_key, hash bytes), so it
//!   is re-derivable from the block name alone at decrypt time
//! - the cipher is AES-256-CTR with the first half of the hash as IV; the
//!   keystream is seekable, so a suffix of a block (a pack slice) can be
//!   decrypted starting at any byte offset
//!
//! Because the key is a function of the content, re-deriving the hash after
//! decryption doubles as the integrity checksum (see the read path in the
//! manager).
//!
//! Formats are selected by name at initialization and immutable afterwards.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use coffer_core::RepositoryObjectFormat;

use crate::error::{Error, Result};

type Aes256Ctr = ctr::Ctr128BE<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Strategy mapping plaintext to block identity and bytes to ciphertext.
pub(crate) trait ObjectFormatter: Send + Sync + std::fmt::Debug {
    /// Lowercase-hex content hash of `data`; the hash part of the block name.
    fn block_hash(&self, data: &[u8]) -> String;

    /// Encrypts `data` for storage under `block_name`, with the keystream
    /// positioned at byte `skip`.
    fn encrypt(&self, data: Vec<u8>, block_name: &str, skip: u64) -> Result<Vec<u8>>;

    /// Inverse of [`encrypt`](Self::encrypt).
    fn decrypt(&self, data: Vec<u8>, block_name: &str, skip: u64) -> Result<Vec<u8>>;
}

fn digest(secret: Option<&[u8]>, data: &[u8]) -> [u8; 32] {
    match secret {
        Some(secret) => {
            // HMAC accepts keys of any length.
            let mut mac = HmacSha256::new_from_slice(secret).expect("hmac key");
            mac.update(data);
            mac.finalize().into_bytes().into()
        }
        None => Sha256::digest(data).into(),
    }
}

/// The hash component of a block name: everything after the last class
/// prefix segment.
fn hash_hex(block_name: &str) -> &str {
    match block_name.rfind('/') {
        Some(idx) => &block_name[idx + 1..],
        None => block_name,
    }
}

/// Identity is the (keyed) hash; encrypt/decrypt are the identity function.
#[derive(Debug)]
struct UnencryptedFormatter {
    secret: Option<Vec<u8>>,
    hash_length: usize,
}

impl ObjectFormatter for UnencryptedFormatter {
    fn block_hash(&self, data: &[u8]) -> String {
        let digest = digest(self.secret.as_deref(), data);
        hex::encode(&digest[..self.hash_length])
    }

    fn encrypt(&self, data: Vec<u8>, _block_name: &str, _skip: u64) -> Result<Vec<u8>> {
        Ok(data)
    }

    fn decrypt(&self, data: Vec<u8>, _block_name: &str, _skip: u64) -> Result<Vec<u8>> {
        Ok(data)
    }
}

/// Identity is the keyed hash; the cipher key is derived from the identity.
#[derive(Debug)]
struct EncryptedCtrFormatter {
    secret: Option<Vec<u8>>,
    master_key: Vec<u8>,
}

impl EncryptedCtrFormatter {
    fn apply_keystream(&self, mut data: Vec<u8>, block_name: &str, skip: u64) -> Result<Vec<u8>> {
        let id_bytes = hex::decode(hash_hex(block_name))
            .map_err(|_| Error::Crypto(format!("block name {:?} is not hex", block_name)))?;
        if id_bytes.len() < 16 {
            return Err(Error::Crypto(format!(
                "block name {:?} is too short to derive an IV",
                block_name
            )));
        }

        let mut mac = HmacSha256::new_from_slice(&self.master_key).expect("hmac key");
        mac.update(&id_bytes);
        let key: [u8; 32] = mac.finalize().into_bytes().into();

        let mut cipher = Aes256Ctr::new_from_slices(&key, &id_bytes[..16])
            .map_err(|e| Error::Crypto(e.to_string()))?;
        cipher
            .try_seek(skip)
            .map_err(|e| Error::Crypto(e.to_string()))?;
        cipher.apply_keystream(&mut data);
        Ok(data)
    }
}

impl ObjectFormatter for EncryptedCtrFormatter {
    fn block_hash(&self, data: &[u8]) -> String {
        hex::encode(digest(self.secret.as_deref(), data))
    }

    fn encrypt(&self, data: Vec<u8>, block_name: &str, skip: u64) -> Result<Vec<u8>> {
        self.apply_keystream(data, block_name, skip)
    }

    fn decrypt(&self, data: Vec<u8>, block_name: &str, skip: u64) -> Result<Vec<u8>> {
        self.apply_keystream(data, block_name, skip)
    }
}

/// Builds the formatter named by `format.object_format`.
pub(crate) fn create_formatter(
    format: &RepositoryObjectFormat,
) -> Result<Box<dyn ObjectFormatter>> {
    match format.object_format.as_str() {
        "unencrypted-hmac-sha256" => Ok(Box::new(UnencryptedFormatter {
            secret: format.hmac_secret.clone(),
            hash_length: 32,
        })),
        "unencrypted-hmac-sha256-128" => Ok(Box::new(UnencryptedFormatter {
            secret: format.hmac_secret.clone(),
            hash_length: 16,
        })),
        "encrypted-hmac-sha256-aes256-ctr" => {
            if format.master_key.is_empty() {
                return Err(Error::ConfigInvalid(
                    "encrypted object format requires a master key".to_string(),
                ));
            }
            Ok(Box::new(EncryptedCtrFormatter {
                secret: format.hmac_secret.clone(),
                master_key: format.master_key.clone(),
            }))
        }
        other => Err(Error::ConfigInvalid(format!(
            "unsupported object format {:?}",
            other
        ))),
    }
}
