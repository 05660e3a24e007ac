//! Block-Size Cache
//!
//! The dedupe check needs "does this block exist, and at what size" for every
//! chunk written. Those answers rarely change (blocks are immutable), so
//! they are memoized here: populated on first query, refreshed when one of
//! our own uploads for the block completes.
//!
//! Only positive answers are cached. A NotFound must be re-checked each time
//! because a concurrent writer may upload the block at any moment.

use std::num::NonZeroUsize;

use lru::LruCache;
use tokio::sync::Mutex;

use crate::blob::BlobStore;
use crate::error::Result;

/// Number of block sizes tracked before LRU eviction kicks in.
const CACHE_CAPACITY: usize = 4096;

pub(crate) struct BlockSizeCache {
    blob: BlobStore,
    sizes: Mutex<LruCache<String, u64>>,
}

impl BlockSizeCache {
    pub fn new(blob: BlobStore) -> Self {
        Self {
            blob,
            sizes: Mutex::new(LruCache::new(NonZeroUsize::new(CACHE_CAPACITY).unwrap())),
        }
    }

    /// Returns the stored size of `name`, `NotFound` if absent.
    pub async fn get_size(&self, name: &str) -> Result<u64> {
        if let Some(size) = self.sizes.lock().await.get(name) {
            return Ok(*size);
        }

        let size = self.blob.block_size(name).await?;
        self.sizes.lock().await.put(name.to_string(), size);
        Ok(size)
    }

    /// Records the size of `name` after an upload for it completed.
    pub async fn record(&self, name: &str, size: u64) {
        self.sizes.lock().await.put(name.to_string(), size);
    }

    /// Drops all cached entries.
    pub async fn close(&self) {
        self.sizes.lock().await.clear();
    }
}
