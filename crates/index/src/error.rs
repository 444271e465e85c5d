use thiserror::Error;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("embedding has dimension {actual}, index expects {expected}")]
pub struct DimensionMismatchError {
    pub expected: usize,
    pub actual: usize,
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    DimensionMismatch(#[from] DimensionMismatchError),

    /// The chunk position is already indexed with different text.
    #[error("chunk {chunk_id} is already indexed with different text")]
    ChunkConflict { chunk_id: String },

    #[error("embedding failed: {0:#}")]
    Embedding(#[source] anyhow::Error),

    #[error("vector store error: {0:#}")]
    VectorStore(#[source] anyhow::Error),

    #[error("graph store error: {0:#}")]
    GraphStore(#[source] anyhow::Error),
}

impl From<neo4rs::Error> for IndexError {
    fn from(err: neo4rs::Error) -> Self {
        IndexError::GraphStore(err.into())
    }
}
