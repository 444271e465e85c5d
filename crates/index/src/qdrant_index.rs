use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

use crate::error::IndexError;
use crate::vector::{ScoredChunk, SimilarityMetric, VectorStore};

/// [`VectorStore`] backed by a Qdrant collection over its REST API.
///
/// Qdrant does not promise an order for equal scores, so every point carries
/// an insertion sequence in its payload and results are re-sorted locally.
/// Re-inserting a point keeps its original sequence.
pub struct QdrantVectorStore {
    base_url: String,
    client: reqwest::Client,
    collection_name: String,
    dimension: usize,
    metric: SimilarityMetric,
    sequence: AtomicU64,
}

#[derive(Serialize)]
struct CreateCollection {
    vectors: VectorParams,
}

#[derive(Serialize)]
struct VectorParams {
    size: usize,
    distance: &'static str,
}

#[derive(Serialize)]
struct UpsertPoints {
    points: Vec<Point>,
}

#[derive(Serialize)]
struct Point {
    id: u64,
    vector: Vec<f32>,
    payload: PointPayload,
}

#[derive(Serialize, Deserialize)]
struct PointPayload {
    chunk_id: String,
    seq: u64,
}

#[derive(Deserialize)]
struct CollectionList {
    result: CollectionListResult,
}

#[derive(Deserialize)]
struct CollectionListResult {
    collections: Vec<Collection>,
}

#[derive(Deserialize)]
struct Collection {
    name: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    score: f32,
    payload: PointPayload,
}

#[derive(Deserialize)]
struct PointResponse {
    result: StoredPoint,
}

#[derive(Deserialize)]
struct StoredPoint {
    payload: Option<PointPayload>,
}

#[derive(Deserialize)]
struct CollectionInfo {
    result: CollectionInfoResult,
}

#[derive(Deserialize)]
struct CollectionInfoResult {
    #[serde(default)]
    points_count: Option<u64>,
}

impl QdrantVectorStore {
    pub fn new(
        base_url: String,
        collection_name: String,
        dimension: usize,
        metric: SimilarityMetric,
    ) -> Self {
        // seed from wall clock so sequences keep increasing across restarts
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);

        Self {
            base_url,
            client: reqwest::Client::new(),
            collection_name,
            dimension,
            metric,
            sequence: AtomicU64::new(seed),
        }
    }

    /// Create the collection if it does not exist yet.
    pub async fn init_collection(&self) -> Result<()> {
        let url = format!("{}/collections", self.base_url);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            anyhow::bail!("Failed to list collections: {}", response.status());
        }

        let list: CollectionList = response.json().await?;
        let exists = list.result.collections.iter()
            .any(|c| c.name == self.collection_name);

        if exists {
            info!(collection = %self.collection_name, "Collection already exists");
            return Ok(());
        }

        let url = format!("{}/collections/{}", self.base_url, self.collection_name);
        let create_req = CreateCollection {
            vectors: VectorParams {
                size: self.dimension,
                distance: match self.metric {
                    SimilarityMetric::Cosine => "Cosine",
                    SimilarityMetric::DotProduct => "Dot",
                },
            },
        };

        let response = self.client
            .put(&url)
            .json(&create_req)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            anyhow::bail!("Failed to create collection: {}", error_text);
        }

        info!(collection = %self.collection_name, dimension = self.dimension, "Collection created");
        Ok(())
    }

    /// Stable mapping from chunk id to Qdrant's numeric point id.
    fn point_id(chunk_id: &str) -> u64 {
        let digest = Sha256::digest(chunk_id.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(bytes)
    }

    /// Payload of the stored point for `chunk_id`, if any.
    async fn fetch_payload(&self, chunk_id: &str) -> Result<Option<PointPayload>> {
        let url = format!(
            "{}/collections/{}/points/{}",
            self.base_url,
            self.collection_name,
            Self::point_id(chunk_id)
        );

        let response = self.client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch point from Qdrant")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let error_text = response.text().await?;
            anyhow::bail!("Failed to fetch point: {}", error_text);
        }

        let point: PointResponse = response.json().await
            .context("Failed to parse Qdrant point")?;
        Ok(point.result.payload)
    }

    async fn upsert(&self, chunk_id: &str, vector: Vec<f32>) -> Result<()> {
        let url = format!(
            "{}/collections/{}/points?wait=true",
            self.base_url, self.collection_name
        );

        let seq = match self.fetch_payload(chunk_id).await? {
            Some(existing) => existing.seq,
            None => self.sequence.fetch_add(1, Ordering::SeqCst),
        };

        let upsert_req = UpsertPoints {
            points: vec![Point {
                id: Self::point_id(chunk_id),
                vector,
                payload: PointPayload {
                    chunk_id: chunk_id.to_string(),
                    seq,
                },
            }],
        };

        let response = self.client
            .put(&url)
            .json(&upsert_req)
            .send()
            .await
            .context("Failed to send upsert to Qdrant")?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            anyhow::bail!("Failed to upsert point: {}", error_text);
        }

        Ok(())
    }

    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
        let url = format!(
            "{}/collections/{}/points/search",
            self.base_url, self.collection_name
        );

        let body = serde_json::json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true
        });

        let response = self.client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("Failed to send search request to Qdrant")?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            anyhow::bail!("Qdrant search failed: {}", error_text);
        }

        let parsed: SearchResponse = response.json().await
            .context("Failed to parse Qdrant response")?;

        Ok(parsed.result)
    }
}

/// Score descending, then insertion sequence, cut to `k`.
fn rank_hits(mut hits: Vec<SearchHit>, k: usize) -> Vec<SearchHit> {
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.payload.seq.cmp(&b.payload.seq))
    });
    hits.truncate(k);
    hits
}

/// Whether a page fetched with `limit` holds every point tied with the k-th
/// best score. Otherwise an earlier-inserted tie may sit past the page.
fn ties_settled(hits: &[SearchHit], k: usize, limit: usize) -> bool {
    if hits.len() < limit || hits.len() <= k {
        return true;
    }

    let mut scores: Vec<f32> = hits.iter().map(|h| h.score).collect();
    scores.sort_by(|a, b| b.total_cmp(a));
    scores[scores.len() - 1] < scores[k - 1]
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    async fn insert(&self, chunk_id: &str, vector: Vec<f32>) -> Result<(), IndexError> {
        self.check_dimension(&vector)?;
        self.upsert(chunk_id, vector).await.map_err(IndexError::VectorStore)
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        self.check_dimension(vector)?;

        if k == 0 {
            return Ok(Vec::new());
        }

        let mut limit = k.saturating_mul(2).max(k + 16);
        let hits = loop {
            let hits = self.search(vector, limit).await.map_err(IndexError::VectorStore)?;
            if ties_settled(&hits, k, limit) {
                break hits;
            }
            limit = limit.saturating_mul(2);
        };

        Ok(rank_hits(hits, k)
            .into_iter()
            .map(|hit| ScoredChunk {
                chunk_id: hit.payload.chunk_id,
                score: hit.score,
            })
            .collect())
    }

    async fn len(&self) -> Result<usize, IndexError> {
        let url = format!("{}/collections/{}", self.base_url, self.collection_name);

        let info: CollectionInfo = async {
            let response = self.client.get(&url).send().await?;
            if !response.status().is_success() {
                anyhow::bail!("Failed to get collection info: {}", response.status());
            }
            Ok::<CollectionInfo, anyhow::Error>(response.json().await?)
        }
        .await
        .map_err(IndexError::VectorStore)?;

        Ok(info.result.points_count.unwrap_or(0) as usize)
    }

    async fn contains(&self, chunk_id: &str) -> Result<bool, IndexError> {
        let payload = self.fetch_payload(chunk_id).await.map_err(IndexError::VectorStore)?;
        Ok(payload.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_ids_are_stable() {
        let a = QdrantVectorStore::point_id("chunk-1");
        assert_eq!(a, QdrantVectorStore::point_id("chunk-1"));
        assert_ne!(a, QdrantVectorStore::point_id("chunk-2"));
    }

    fn hit(chunk_id: &str, score: f32, seq: u64) -> SearchHit {
        SearchHit {
            score,
            payload: PointPayload { chunk_id: chunk_id.to_string(), seq },
        }
    }

    #[test]
    fn test_equal_scores_rank_by_insertion_sequence() {
        let hits = vec![
            hit("late", 0.9, 30),
            hit("low", 0.5, 1),
            hit("early", 0.9, 10),
            hit("middle", 0.9, 20),
        ];

        let ids: Vec<String> = rank_hits(hits, 2)
            .into_iter()
            .map(|h| h.payload.chunk_id)
            .collect();
        assert_eq!(ids, vec!["early", "middle"]);
    }

    #[test]
    fn test_full_page_of_ties_needs_a_larger_page() {
        // every hit shares the k-th score, so older ties may be cut off
        let tied: Vec<SearchHit> = (0..4).map(|i| hit(&format!("c{i}"), 0.7, 100 - i)).collect();
        assert!(!ties_settled(&tied, 2, 4));

        // the page ends below the k-th score
        let mut mixed: Vec<SearchHit> = (0..3).map(|i| hit(&format!("c{i}"), 0.7, i)).collect();
        mixed.push(hit("tail", 0.2, 9));
        assert!(ties_settled(&mixed, 2, 4));

        // a short page means the collection is exhausted
        assert!(ties_settled(&tied[..3], 2, 4));
    }

    #[tokio::test]
    async fn test_dimension_checked_before_network() {
        let store = QdrantVectorStore::new(
            "http://127.0.0.1:9".to_string(),
            "chunks".to_string(),
            4,
            SimilarityMetric::Cosine,
        );

        let err = store.insert("c", vec![0.0; 3]).await.unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch(_)));
    }
}
