use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{DimensionMismatchError, IndexError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    #[default]
    Cosine,
    DotProduct,
}

impl SimilarityMetric {
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        match self {
            SimilarityMetric::DotProduct => dot,
            SimilarityMetric::Cosine => {
                let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

                if mag_a == 0.0 || mag_b == 0.0 {
                    0.0
                } else {
                    dot / (mag_a * mag_b)
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub score: f32,
}

/// Nearest-neighbour index over chunk embeddings.
///
/// `query` returns at most `k` hits ordered by non-increasing score; equal
/// scores keep insertion order.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn dimension(&self) -> usize;

    fn metric(&self) -> SimilarityMetric;

    async fn insert(&self, chunk_id: &str, vector: Vec<f32>) -> Result<(), IndexError>;

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError>;

    async fn len(&self) -> Result<usize, IndexError>;

    async fn contains(&self, chunk_id: &str) -> Result<bool, IndexError>;

    fn check_dimension(&self, vector: &[f32]) -> Result<(), DimensionMismatchError> {
        if vector.len() == self.dimension() {
            Ok(())
        } else {
            Err(DimensionMismatchError {
                expected: self.dimension(),
                actual: vector.len(),
            })
        }
    }
}

#[derive(Default)]
struct Entries {
    /// Insertion order.
    vectors: Vec<(String, Vec<f32>)>,
    positions: HashMap<String, usize>,
}

/// Exact (brute-force) in-process index.
pub struct MemoryVectorIndex {
    dimension: usize,
    metric: SimilarityMetric,
    entries: RwLock<Entries>,
}

impl MemoryVectorIndex {
    pub fn new(dimension: usize, metric: SimilarityMetric) -> Self {
        Self {
            dimension,
            metric,
            entries: RwLock::new(Entries::default()),
        }
    }
}

#[async_trait]
impl VectorStore for MemoryVectorIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    /// Re-inserting an id replaces its vector and keeps its original position.
    async fn insert(&self, chunk_id: &str, vector: Vec<f32>) -> Result<(), IndexError> {
        self.check_dimension(&vector)?;

        let mut entries = self.entries.write().await;
        match entries.positions.get(chunk_id).copied() {
            Some(pos) => entries.vectors[pos].1 = vector,
            None => {
                let pos = entries.vectors.len();
                entries.vectors.push((chunk_id.to_string(), vector));
                entries.positions.insert(chunk_id.to_string(), pos);
            }
        }

        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        self.check_dimension(vector)?;

        if k == 0 {
            return Ok(Vec::new());
        }

        let entries = self.entries.read().await;
        let mut scored: Vec<ScoredChunk> = entries
            .vectors
            .iter()
            .map(|(chunk_id, stored)| ScoredChunk {
                chunk_id: chunk_id.clone(),
                score: self.metric.score(vector, stored),
            })
            .collect();

        // stable sort: ties stay in insertion order
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);

        Ok(scored)
    }

    async fn len(&self) -> Result<usize, IndexError> {
        Ok(self.entries.read().await.vectors.len())
    }

    async fn contains(&self, chunk_id: &str) -> Result<bool, IndexError> {
        Ok(self.entries.read().await.positions.contains_key(chunk_id))
    }
}
