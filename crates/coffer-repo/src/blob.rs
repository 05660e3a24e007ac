//! Blob Storage Interface
//!
//! The engine stores everything as named byte blobs in an
//! `object_store::ObjectStore` (S3, local filesystem, in-memory for tests).
//! This module is the one place that talks to it: block names map to object
//! paths, ranged reads map to `get_range`, and the store's NotFound error is
//! peeled into the engine's distinguished `NotFound` variant.
//!
//! Block names are flat strings; class prefixes are slash-delimited path
//! segments (`p/` pack blobs, `k/` pack indexes, `m/` metadata) so that
//! `list` with a prefix enumerates exactly one class.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use object_store::path::Path;
use object_store::ObjectStore;

use crate::error::{Error, Result};

/// Shared handle to the underlying blob store.
#[derive(Clone)]
pub struct BlobStore {
    store: Arc<dyn ObjectStore>,
}

impl BlobStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Stores `data` under `name`, replacing any previous contents.
    pub async fn put_block(&self, name: &str, data: Bytes) -> Result<()> {
        let path = Path::from(name);
        self.store
            .put(&path, data)
            .await
            .map_err(|e| Error::from_store(name, e))?;
        Ok(())
    }

    /// Fetches `length` bytes of the block starting at `offset`;
    /// `length < 0` means "to the end of the block".
    pub async fn get_block(&self, name: &str, offset: u64, length: i64) -> Result<Bytes> {
        let path = Path::from(name);

        if offset == 0 && length < 0 {
            let result = self
                .store
                .get(&path)
                .await
                .map_err(|e| Error::from_store(name, e))?;
            return result.bytes().await.map_err(|e| Error::from_store(name, e));
        }

        let end = if length < 0 {
            self.block_size(name).await?
        } else {
            offset + length as u64
        };

        self.store
            .get_range(&path, offset as usize..end as usize)
            .await
            .map_err(|e| Error::from_store(name, e))
    }

    /// Size of the stored block; `NotFound` if it does not exist.
    pub async fn block_size(&self, name: &str) -> Result<u64> {
        let path = Path::from(name);
        let meta = self
            .store
            .head(&path)
            .await
            .map_err(|e| Error::from_store(name, e))?;
        Ok(meta.size as u64)
    }

    pub async fn delete_block(&self, name: &str) -> Result<()> {
        let path = Path::from(name);
        self.store
            .delete(&path)
            .await
            .map_err(|e| Error::from_store(name, e))?;
        Ok(())
    }

    /// Lists the names of all blocks in a class, e.g. `list_blocks("k/")`.
    pub async fn list_blocks(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix_path = Path::from(prefix.trim_end_matches('/'));
        let mut entries = self.store.list(Some(&prefix_path));

        let mut names = Vec::new();
        while let Some(meta) = entries.next().await {
            let meta = meta.map_err(|e| Error::from_store(prefix, e))?;
            names.push(meta.location.to_string());
        }
        Ok(names)
    }
}
