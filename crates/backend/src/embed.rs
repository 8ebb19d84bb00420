use crate::error::Result;
use async_trait::async_trait;
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

/// Text → fixed-length float vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Bounded LRU cache of query embeddings, keyed by content hash.
///
/// Entries are immutable once inserted; the mutex only covers recency
/// bookkeeping. The lock is never held across the embedder call, so two
/// concurrent misses on the same text may both embed; the second insert
/// is a harmless overwrite with an identical vector.
pub struct EmbeddingCache {
    inner: Mutex<LruCache<[u8; 32], Arc<Vec<f32>>>>,
}

impl EmbeddingCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Embed `text` through `embedder`, consulting the cache first.
    pub async fn embed(&self, embedder: &dyn Embedder, text: &str) -> Result<Arc<Vec<f32>>> {
        let key = content_hash(text);
        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }
        let vector = Arc::new(embedder.embed(text).await?);
        self.put(key, Arc::clone(&vector));
        Ok(vector)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("embedding cache poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, key: &[u8; 32]) -> Option<Arc<Vec<f32>>> {
        self.inner
            .lock()
            .expect("embedding cache poisoned")
            .get(key)
            .cloned()
    }

    fn put(&self, key: [u8; 32], vector: Arc<Vec<f32>>) {
        self.inner
            .lock()
            .expect("embedding cache poisoned")
            .put(key, vector);
    }
}

fn content_hash(text: &str) -> [u8; 32] {
    let digest = Sha256::digest(text.as_bytes());
    digest.into()
}
