pub mod embeddings;
pub mod error;
pub mod graph;
pub mod memory_graph;
pub mod neo4j_index;
pub mod qdrant_index;
pub mod vector;
pub mod writer;

pub use embeddings::{Embedder, EmbeddingClient};
pub use error::{DimensionMismatchError, IndexError};
pub use graph::{
    ChunkRecord, ChunkWrite, FROM_CHUNK, GraphStats, GraphStore, RelationshipTriple, WriteOutcome,
};
pub use memory_graph::MemoryGraphStore;
pub use neo4j_index::Neo4jGraphStore;
pub use qdrant_index::QdrantVectorStore;
pub use vector::{MemoryVectorIndex, ScoredChunk, SimilarityMetric, VectorStore};
pub use writer::GraphWriter;

use extract::ExtractionResult;
use serde::Serialize;
use std::sync::Arc;

/// Unified indexer that handles both the vector index and the graph store
pub struct Indexer {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    writer: GraphWriter,
}

impl Indexer {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
    ) -> Self {
        Self {
            embedder,
            vectors,
            writer: GraphWriter::new(graph),
        }
    }

    pub fn graph(&self) -> &Arc<dyn GraphStore> {
        self.writer.store()
    }

    /// Index a single extracted chunk.
    ///
    /// The embedding is computed and checked before anything is written, so
    /// a dimension mismatch leaves both stores untouched. A chunk position
    /// already stored with other text is rejected the same way. The vector
    /// is only written when the index does not hold one for the chunk yet.
    pub async fn index_extracted_chunk(
        &self,
        chunk: &ingest::Chunk,
        extraction: &ExtractionResult,
    ) -> Result<WriteOutcome, IndexError> {
        let stored = self.graph().fetch_chunks(&[chunk.chunk_id.clone()]).await?;
        if stored.iter().any(|existing| existing.text != chunk.text) {
            return Err(IndexError::ChunkConflict {
                chunk_id: chunk.chunk_id.clone(),
            });
        }

        let embedding = self
            .embedder
            .embed(&chunk.text)
            .await
            .map_err(IndexError::Embedding)?;
        self.vectors.check_dimension(&embedding)?;

        let outcome = self.writer.write(chunk, extraction).await?;
        if outcome.chunk_created || !self.vectors.contains(&chunk.chunk_id).await? {
            self.vectors.insert(&chunk.chunk_id, embedding).await?;
        }

        Ok(outcome)
    }

    /// Get overall stats
    pub async fn get_stats(&self) -> Result<IndexStats, IndexError> {
        let graph_stats = self.graph().get_stats().await?;

        Ok(IndexStats {
            chunks: graph_stats.chunk_count,
            entities: graph_stats.entity_count,
            relations: graph_stats.relation_count,
            vectors: self.vectors.len().await?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub chunks: usize,
    pub entities: usize,
    pub relations: usize,
    pub vectors: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use extract::{Node, Relationship};

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    fn lupus_chunk() -> (ingest::Chunk, ExtractionResult) {
        let chunk = ingest::Chunk::new(
            "doc".to_string(),
            "Lupus affects the kidneys.".to_string(),
            "doc.txt".to_string(),
            (0, 26),
        );
        let extraction = ExtractionResult {
            nodes: vec![Node::new("Lupus", "Disease"), Node::new("kidneys", "Anatomy")],
            relationships: vec![Relationship::new("Lupus", "AFFECTS", "kidneys")],
        };
        (chunk, extraction)
    }

    #[tokio::test]
    async fn test_indexes_graph_and_vector_together() {
        let indexer = Indexer::new(
            Arc::new(FixedEmbedder(vec![1.0, 0.0])),
            Arc::new(MemoryVectorIndex::new(2, SimilarityMetric::Cosine)),
            Arc::new(MemoryGraphStore::new()),
        );
        let (chunk, extraction) = lupus_chunk();

        indexer.index_extracted_chunk(&chunk, &extraction).await.unwrap();
        indexer.index_extracted_chunk(&chunk, &extraction).await.unwrap();

        let stats = indexer.get_stats().await.unwrap();
        assert_eq!(
            stats,
            IndexStats { chunks: 1, entities: 2, relations: 1, vectors: 1 }
        );
    }

    #[tokio::test]
    async fn test_dimension_mismatch_writes_nothing() {
        let indexer = Indexer::new(
            Arc::new(FixedEmbedder(vec![1.0, 0.0, 0.0])),
            Arc::new(MemoryVectorIndex::new(2, SimilarityMetric::Cosine)),
            Arc::new(MemoryGraphStore::new()),
        );
        let (chunk, extraction) = lupus_chunk();

        let err = indexer.index_extracted_chunk(&chunk, &extraction).await.unwrap_err();

        assert!(matches!(
            err,
            IndexError::DimensionMismatch(DimensionMismatchError { expected: 2, actual: 3 })
        ));
        let stats = indexer.get_stats().await.unwrap();
        assert_eq!(stats.chunks, 0);
        assert_eq!(stats.vectors, 0);
    }

    #[tokio::test]
    async fn test_changed_text_at_same_position_is_rejected() {
        let vectors = Arc::new(MemoryVectorIndex::new(2, SimilarityMetric::Cosine));
        let graph = Arc::new(MemoryGraphStore::new());
        let (chunk, extraction) = lupus_chunk();
        Indexer::new(Arc::new(FixedEmbedder(vec![1.0, 0.0])), vectors.clone(), graph.clone())
            .index_extracted_chunk(&chunk, &extraction)
            .await
            .unwrap();

        let edited = ingest::Chunk::new(
            "doc".to_string(),
            "Heart pumps blood quickly.".to_string(),
            "doc.txt".to_string(),
            (0, 26),
        );
        assert_eq!(edited.chunk_id, chunk.chunk_id);
        let err = Indexer::new(Arc::new(FixedEmbedder(vec![0.0, 1.0])), vectors.clone(), graph.clone())
            .index_extracted_chunk(&edited, &ExtractionResult::default())
            .await
            .unwrap_err();

        assert!(matches!(err, IndexError::ChunkConflict { ref chunk_id } if *chunk_id == chunk.chunk_id));
        let stored = graph.fetch_chunks(&[chunk.chunk_id.clone()]).await.unwrap();
        assert_eq!(stored[0].text, "Lupus affects the kidneys.");
        let hits = vectors.query(&[1.0, 0.0], 1).await.unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_missing_vector_is_restored_for_existing_chunk() {
        let vectors = Arc::new(MemoryVectorIndex::new(2, SimilarityMetric::Cosine));
        let graph = Arc::new(MemoryGraphStore::new());
        let (chunk, extraction) = lupus_chunk();
        GraphWriter::new(graph.clone()).write(&chunk, &extraction).await.unwrap();

        let indexer = Indexer::new(Arc::new(FixedEmbedder(vec![1.0, 0.0])), vectors.clone(), graph);
        let outcome = indexer.index_extracted_chunk(&chunk, &extraction).await.unwrap();

        assert!(!outcome.chunk_created);
        assert!(vectors.contains(&chunk.chunk_id).await.unwrap());
    }
}
