use async_trait::async_trait;
use extract::{Node, Relationship};
use std::collections::{BTreeSet, HashMap, HashSet};
use tokio::sync::RwLock;

use crate::error::IndexError;
use crate::graph::{
    ChunkRecord, ChunkWrite, GraphStats, GraphStore, RelationshipTriple, WriteOutcome,
    render_details,
};

type ChunkKey = (String, usize, usize);
type RelationshipKey = (String, String, String);

#[derive(Default)]
struct GraphState {
    chunks: HashMap<String, ChunkRecord>,
    chunk_keys: HashMap<ChunkKey, String>,
    nodes: HashMap<String, Node>,
    relationships: Vec<Relationship>,
    relationship_index: HashMap<RelationshipKey, usize>,
    /// node id -> indices into `relationships`, both directions
    adjacency: HashMap<String, Vec<usize>>,
    /// FROM_CHUNK edges, keyed by chunk id
    chunk_nodes: HashMap<String, BTreeSet<String>>,
}

/// In-process [`GraphStore`]. Each write holds the lock for the whole chunk,
/// so concurrent writers never observe a half-applied chunk.
#[derive(Default)]
pub struct MemoryGraphStore {
    state: RwLock<GraphState>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Node ids linked to `chunk_id` through FROM_CHUNK.
    pub async fn chunk_nodes(&self, chunk_id: &str) -> Vec<String> {
        self.state
            .read()
            .await
            .chunk_nodes
            .get(chunk_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn node(&self, id: &str) -> Option<Node> {
        self.state.read().await.nodes.get(id).cloned()
    }
}

impl GraphState {
    fn upsert_node(&mut self, node: &Node) {
        match self.nodes.get_mut(&node.id) {
            Some(existing) => {
                existing.label = node.label.clone();
                existing
                    .properties
                    .extend(node.properties.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            None => {
                self.nodes.insert(node.id.clone(), node.clone());
            }
        }
    }

    fn upsert_relationship(&mut self, rel: &Relationship) {
        let key = (
            rel.start_node_id.clone(),
            rel.rel_type.clone(),
            rel.end_node_id.clone(),
        );

        if let Some(&idx) = self.relationship_index.get(&key) {
            self.relationships[idx]
                .properties
                .extend(rel.properties.iter().map(|(k, v)| (k.clone(), v.clone())));
            return;
        }

        let idx = self.relationships.len();
        self.relationships.push(rel.clone());
        self.relationship_index.insert(key, idx);
        self.adjacency
            .entry(rel.start_node_id.clone())
            .or_default()
            .push(idx);
        if rel.end_node_id != rel.start_node_id {
            self.adjacency
                .entry(rel.end_node_id.clone())
                .or_default()
                .push(idx);
        }
    }

    fn display_name(&self, id: &str) -> String {
        self.nodes
            .get(id)
            .map(|n| n.name().to_string())
            .unwrap_or_else(|| id.to_string())
    }

    fn triple(&self, rel: &Relationship) -> RelationshipTriple {
        RelationshipTriple {
            source: self.display_name(&rel.start_node_id),
            rel_type: rel.rel_type.clone(),
            target: self.display_name(&rel.end_node_id),
            details: render_details(&rel.properties),
        }
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn write_chunk(&self, write: &ChunkWrite) -> Result<WriteOutcome, IndexError> {
        let mut state = self.state.write().await;
        let record = &write.chunk;
        let key = (record.doc_id.clone(), record.offset.0, record.offset.1);

        let existing = state.chunk_keys.get(&key).cloned();
        let (chunk_id, chunk_created) = match existing {
            Some(existing) => (existing, false),
            None => {
                state.chunk_keys.insert(key, record.chunk_id.clone());
                state.chunks.insert(record.chunk_id.clone(), record.clone());
                (record.chunk_id.clone(), true)
            }
        };

        for node in &write.nodes {
            state.upsert_node(node);
            state
                .chunk_nodes
                .entry(chunk_id.clone())
                .or_default()
                .insert(node.id.clone());
        }

        for rel in &write.relationships {
            state.upsert_relationship(rel);
        }

        Ok(WriteOutcome {
            chunk_created,
            nodes_written: write.nodes.len(),
            relationships_written: write.relationships.len(),
            relationships_rejected: 0,
        })
    }

    async fn fetch_chunks(&self, chunk_ids: &[String]) -> Result<Vec<ChunkRecord>, IndexError> {
        let state = self.state.read().await;
        Ok(chunk_ids
            .iter()
            .filter_map(|id| state.chunks.get(id).cloned())
            .collect())
    }

    async fn expand_from_chunks(
        &self,
        chunk_ids: &[String],
        max_hops: usize,
    ) -> Result<Vec<RelationshipTriple>, IndexError> {
        let state = self.state.read().await;

        let mut visited = HashSet::new();
        let mut frontier = Vec::new();
        for chunk_id in chunk_ids {
            for node_id in state.chunk_nodes.get(chunk_id).into_iter().flatten() {
                if visited.insert(node_id.clone()) {
                    frontier.push(node_id.clone());
                }
            }
        }

        let mut seen = HashSet::new();
        let mut found = Vec::new();

        for _ in 0..max_hops {
            let mut next = Vec::new();
            for node_id in &frontier {
                for &idx in state.adjacency.get(node_id).into_iter().flatten() {
                    if !seen.insert(idx) {
                        continue;
                    }
                    found.push(idx);

                    let rel = &state.relationships[idx];
                    let other = if &rel.start_node_id == node_id {
                        &rel.end_node_id
                    } else {
                        &rel.start_node_id
                    };
                    if visited.insert(other.clone()) {
                        next.push(other.clone());
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        Ok(found
            .into_iter()
            .map(|idx| state.triple(&state.relationships[idx]))
            .collect())
    }

    async fn get_stats(&self) -> Result<GraphStats, IndexError> {
        let state = self.state.read().await;
        Ok(GraphStats {
            chunk_count: state.chunks.len(),
            entity_count: state.nodes.len(),
            relation_count: state.relationships.len(),
        })
    }
}
