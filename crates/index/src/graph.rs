use async_trait::async_trait;
use extract::{Node, Relationship};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::IndexError;

/// Relationship type linking an extracted node to the chunk it came from.
pub const FROM_CHUNK: &str = "FROM_CHUNK";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub doc_id: String,
    pub source: String,
    pub text: String,
    pub offset: (usize, usize),
}

impl From<&ingest::Chunk> for ChunkRecord {
    fn from(chunk: &ingest::Chunk) -> Self {
        Self {
            chunk_id: chunk.chunk_id.clone(),
            doc_id: chunk.doc_id.clone(),
            source: chunk.source.clone(),
            text: chunk.text.clone(),
            offset: chunk.offset,
        }
    }
}

/// Everything derived from one chunk; applied by a store as a single unit.
#[derive(Debug, Clone)]
pub struct ChunkWrite {
    pub chunk: ChunkRecord,
    pub nodes: Vec<Node>,
    pub relationships: Vec<Relationship>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOutcome {
    /// False when a chunk with the same document and offset already existed.
    pub chunk_created: bool,
    pub nodes_written: usize,
    pub relationships_written: usize,
    pub relationships_rejected: usize,
}

/// A relationship found during traversal, rendered for prompt context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationshipTriple {
    pub source: String,
    pub rel_type: String,
    pub target: String,
    /// `key: value` pairs, sorted by key.
    pub details: Vec<String>,
}

impl fmt::Display for RelationshipTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.details.is_empty() {
            write!(f, "{} - {} -> {}", self.source, self.rel_type, self.target)
        } else {
            write!(
                f,
                "{} - {} ({}) -> {}",
                self.source,
                self.rel_type,
                self.details.join(", "),
                self.target
            )
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub chunk_count: usize,
    pub entity_count: usize,
    pub relation_count: usize,
}

/// Property graph holding chunks, entities and their relationships.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Upserts the chunk (matched by document and offset), its nodes (by id),
    /// relationships (by start, type, end) and one FROM_CHUNK edge per node.
    /// Either all of it becomes visible or none of it does.
    async fn write_chunk(&self, write: &ChunkWrite) -> Result<WriteOutcome, IndexError>;

    /// Chunks in the order requested; unknown ids are skipped.
    async fn fetch_chunks(&self, chunk_ids: &[String]) -> Result<Vec<ChunkRecord>, IndexError>;

    /// Distinct non-FROM_CHUNK relationships within `max_hops` of the nodes
    /// extracted from `chunk_ids`, following edges in both directions.
    async fn expand_from_chunks(
        &self,
        chunk_ids: &[String],
        max_hops: usize,
    ) -> Result<Vec<RelationshipTriple>, IndexError>;

    async fn get_stats(&self) -> Result<GraphStats, IndexError>;
}

pub(crate) fn render_details(properties: &extract::Properties) -> Vec<String> {
    properties
        .iter()
        .map(|(key, value)| format!("{}: {}", key, value))
        .collect()
}
