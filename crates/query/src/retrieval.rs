use index::{Embedder, GraphStore, RelationshipTriple, VectorStore};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::QueryError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    /// Similarity search only.
    #[default]
    Vector,
    /// Similarity search, then bounded traversal from the matched chunks.
    #[serde(alias = "graph")]
    GraphAugmented,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub source: String,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub strategy: RetrievalStrategy,
    pub chunks: Vec<RetrievedChunk>,
    /// Rendered `source - TYPE (details) -> target` lines, without duplicates.
    pub relationships: Vec<String>,
    pub context: String,
    /// Ids that matched in the vector index but have no chunk in the graph.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_chunks: Vec<String>,
}

/// Similarity hits resolved against the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSearch {
    pub chunks: Vec<RetrievedChunk>,
    pub missing_chunks: Vec<String>,
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    hop_bound: usize,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
        hop_bound: usize,
    ) -> Self {
        Self {
            embedder,
            vectors,
            graph,
            hop_bound,
        }
    }

    /// Top `top_k` chunks by similarity to `query_text`, best first.
    ///
    /// Hits whose chunk is gone from the graph are listed in
    /// `missing_chunks` instead of being returned.
    pub async fn vector_search(
        &self,
        query_text: &str,
        top_k: usize,
    ) -> Result<VectorSearch, QueryError> {
        let query_embedding = self
            .embedder
            .embed(query_text)
            .await
            .map_err(QueryError::Embedding)?;

        let hits = self.vectors.query(&query_embedding, top_k).await?;
        let ids: Vec<String> = hits.iter().map(|h| h.chunk_id.clone()).collect();

        let mut records: HashMap<String, _> = self
            .graph
            .fetch_chunks(&ids)
            .await?
            .into_iter()
            .map(|record| (record.chunk_id.clone(), record))
            .collect();

        let mut chunks = Vec::with_capacity(hits.len());
        let mut missing_chunks = Vec::new();
        for hit in hits {
            match records.remove(&hit.chunk_id) {
                Some(record) => chunks.push(RetrievedChunk {
                    chunk_id: record.chunk_id,
                    doc_id: record.doc_id,
                    source: record.source,
                    text: record.text,
                    score: hit.score,
                }),
                None => {
                    warn!(chunk_id = %hit.chunk_id, "Indexed vector has no chunk in the graph");
                    missing_chunks.push(hit.chunk_id);
                }
            }
        }

        Ok(VectorSearch {
            chunks,
            missing_chunks,
        })
    }

    pub async fn retrieve(
        &self,
        query_text: &str,
        strategy: RetrievalStrategy,
        top_k: usize,
    ) -> Result<RetrievalResult, QueryError> {
        let VectorSearch {
            chunks,
            missing_chunks,
        } = self.vector_search(query_text, top_k).await?;

        let (relationships, context) = match strategy {
            RetrievalStrategy::Vector => (Vec::new(), build_vector_context(&chunks)),
            RetrievalStrategy::GraphAugmented => {
                let anchors: Vec<String> = chunks.iter().map(|c| c.chunk_id.clone()).collect();
                let triples = self
                    .graph
                    .expand_from_chunks(&anchors, self.hop_bound)
                    .await?;
                let relationships = dedupe_relationships(&triples);
                let context = build_graph_context(&chunks, &relationships);
                (relationships, context)
            }
        };

        debug!(
            strategy = ?strategy,
            chunks = chunks.len(),
            relationships = relationships.len(),
            missing = missing_chunks.len(),
            context_size = context.len(),
            "Retrieval finished"
        );

        Ok(RetrievalResult {
            strategy,
            chunks,
            relationships,
            context,
            missing_chunks,
        })
    }
}

/// Renders triples, keeping the first occurrence of each line.
pub fn dedupe_relationships(triples: &[RelationshipTriple]) -> Vec<String> {
    let mut seen = HashSet::new();
    triples
        .iter()
        .map(|t| t.to_string())
        .filter(|line| seen.insert(line.clone()))
        .collect()
}

fn build_vector_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn build_graph_context(chunks: &[RetrievedChunk], relationships: &[String]) -> String {
    let mut context = String::new();

    context.push_str("RELEVANT TEXT CHUNKS:\n");
    for (i, chunk) in chunks.iter().enumerate() {
        context.push_str(&format!("[Chunk {}] {}\n\n", i + 1, chunk.text));
    }

    if !relationships.is_empty() {
        context.push_str("KEY RELATIONSHIPS:\n");
        for line in relationships {
            context.push_str(&format!("- {}\n", line));
        }
    }

    context
}
