use extract::{ExtractionResult, ReferentialIntegrityError};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::IndexError;
use crate::graph::{ChunkRecord, ChunkWrite, GraphStore, WriteOutcome};

/// Turns one chunk plus its extraction into a single graph store write.
#[derive(Clone)]
pub struct GraphWriter {
    store: Arc<dyn GraphStore>,
}

impl GraphWriter {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    pub async fn write(
        &self,
        chunk: &ingest::Chunk,
        extraction: &ExtractionResult,
    ) -> Result<WriteOutcome, IndexError> {
        let mut node_ids = HashSet::new();
        let nodes: Vec<_> = extraction
            .nodes
            .iter()
            .filter(|node| node_ids.insert(node.id.as_str()))
            .cloned()
            .collect();

        let mut rejected = 0;
        let relationships: Vec<_> = extraction
            .relationships
            .iter()
            .filter(|rel| {
                let missing = [&rel.start_node_id, &rel.end_node_id]
                    .into_iter()
                    .find(|id| !node_ids.contains(id.as_str()));

                match missing {
                    Some(missing_id) => {
                        let err = ReferentialIntegrityError {
                            rel_type: rel.rel_type.clone(),
                            missing_id: missing_id.clone(),
                        };
                        warn!(chunk_id = %chunk.chunk_id, error = %err, "Skipping relationship");
                        rejected += 1;
                        false
                    }
                    None => true,
                }
            })
            .cloned()
            .collect();

        let write = ChunkWrite {
            chunk: ChunkRecord::from(chunk),
            nodes,
            relationships,
        };

        let mut outcome = self.store.write_chunk(&write).await?;
        outcome.relationships_rejected = rejected;

        debug!(
            chunk_id = %chunk.chunk_id,
            created = outcome.chunk_created,
            nodes = outcome.nodes_written,
            relationships = outcome.relationships_written,
            "Chunk written to graph"
        );

        Ok(outcome)
    }
}
