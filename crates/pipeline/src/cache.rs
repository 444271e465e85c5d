use async_trait::async_trait;
use dashmap::DashMap;
use index::Embedder;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Memoises embeddings by text so re-ingested chunks and repeated queries
/// skip the embedding service.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    embeddings: DashMap<String, Vec<f32>>,
    max_entries: usize,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, max_entries: usize) -> Self {
        Self {
            inner,
            embeddings: DashMap::new(),
            max_entries: max_entries.max(1),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    fn insert(&self, key: String, embedding: Vec<f32>) {
        if self.embeddings.len() >= self.max_entries {
            // Simple eviction: clear 25% when full
            let to_remove: Vec<_> = self
                .embeddings
                .iter()
                .take((self.max_entries / 4).max(1))
                .map(|r| r.key().clone())
                .collect();
            for key in to_remove {
                self.embeddings.remove(&key);
            }
            debug!(remaining = self.embeddings.len(), "Evicted cached embeddings");
        }
        self.embeddings.insert(key, embedding);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.embeddings.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let key = hash_text(text);
        if let Some(hit) = self.embeddings.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit.value().clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let embedding = self.inner.embed(text).await?;
        self.insert(key, embedding.clone());
        Ok(embedding)
    }
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: usize,
    pub misses: usize,
}
