//! Credentials
//!
//! The engine does not manage user secrets itself; it asks a `Credentials`
//! implementation for the repository master key, handing it the stored
//! metadata format (which carries the key-derivation algorithm and the
//! per-repository unique id used as salt).
//!
//! Two implementations are provided: a password (Argon2id) and a raw master
//! key for callers that manage key material externally.

use argon2::{Algorithm, Argon2, Params, Version};

use coffer_core::MetadataFormat;

use crate::error::{Error, Result};

/// Yields the repository master key for the given security parameters.
pub trait Credentials: Send + Sync {
    fn master_key(&self, format: &MetadataFormat) -> Result<[u8; 32]>;
}

/// Password-based credentials; the key is derived with the algorithm named
/// in the metadata format, salted by the repository unique id so the same
/// password yields different keys in different repositories.
pub struct Password {
    password: String,
}

impl Password {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }
}

impl Credentials for Password {
    fn master_key(&self, format: &MetadataFormat) -> Result<[u8; 32]> {
        match format.key_derivation_algorithm.as_str() {
            "argon2id" => {
                let params = Params::new(64 * 1024, 3, 1, Some(32))
                    .map_err(|e| Error::Crypto(e.to_string()))?;
                let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

                let mut key = [0u8; 32];
                argon2
                    .hash_password_into(self.password.as_bytes(), &format.unique_id, &mut key)
                    .map_err(|e| Error::Crypto(e.to_string()))?;
                Ok(key)
            }
            other => Err(Error::Crypto(format!(
                "unsupported key derivation algorithm {:?}",
                other
            ))),
        }
    }
}

/// Raw master key, for callers that hold key material themselves.
pub struct MasterKey {
    key: [u8; 32],
}

impl MasterKey {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }
}

impl Credentials for MasterKey {
    fn master_key(&self, _format: &MetadataFormat) -> Result<[u8; 32]> {
        Ok(self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format_with(unique_id: Vec<u8>, kdf: &str) -> MetadataFormat {
        MetadataFormat {
            version: "1".to_string(),
            key_derivation_algorithm: kdf.to_string(),
            unique_id,
            encryption_algorithm: "aes256-gcm".to_string(),
        }
    }

    #[test]
    fn test_password_derivation_is_deterministic() {
        let format = format_with(vec![5u8; 32], "argon2id");
        let creds = Password::new("hunter2");

        let a = creds.master_key(&format).unwrap();
        let b = creds.master_key(&format).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unique_id_salts_the_key() {
        let creds = Password::new("hunter2");
        let a = creds
            .master_key(&format_with(vec![5u8; 32], "argon2id"))
            .unwrap();
        let b = creds
            .master_key(&format_with(vec![6u8; 32], "argon2id"))
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_unknown_kdf_fails() {
        let creds = Password::new("hunter2");
        let result = creds.master_key(&format_with(vec![0u8; 32], "pbkdf1"));
        assert!(matches!(result, Err(Error::Crypto(_))));
    }

    #[test]
    fn test_raw_master_key() {
        let creds = MasterKey::new([9u8; 32]);
        let key = creds
            .master_key(&format_with(vec![0u8; 32], "argon2id"))
            .unwrap();
        assert_eq!(key, [9u8; 32]);
    }
}
