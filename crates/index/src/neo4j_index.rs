use async_trait::async_trait;
use neo4rs::{Graph, Query};
use std::collections::HashMap;
use tracing::info;

use crate::error::IndexError;
use crate::graph::{
    ChunkRecord, ChunkWrite, FROM_CHUNK, GraphStats, GraphStore, RelationshipTriple, WriteOutcome,
};

/// [`GraphStore`] on Neo4j. Chunks are `:Chunk` nodes, extracted nodes are
/// `:Entity` nodes carrying their vocabulary label as a second label. A node
/// re-extracted under another label loses the old one.
pub struct Neo4jGraphStore {
    graph: Graph,
}

fn graph_err<E: Into<anyhow::Error>>(err: E) -> IndexError {
    IndexError::GraphStore(err.into())
}

/// Labels and relationship types cannot be query parameters; only plain
/// identifiers are spliced into Cypher.
fn identifier(value: &str) -> Result<&str, IndexError> {
    let valid = !value.is_empty()
        && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !value.starts_with(|c: char| c.is_ascii_digit());

    if valid {
        Ok(value)
    } else {
        Err(IndexError::GraphStore(anyhow::anyhow!(
            "refusing to use '{}' as a label or relationship type",
            value
        )))
    }
}

impl Neo4jGraphStore {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self, IndexError> {
        let graph = Graph::new(uri, user, password).await?;
        Ok(Self::new(graph))
    }

    /// Initialize schema: constraints and indexes
    pub async fn init_schema(&self) -> Result<(), IndexError> {
        info!("Creating Neo4j constraints and indexes");

        let statements = [
            "CREATE CONSTRAINT chunk_id_unique IF NOT EXISTS FOR (c:Chunk) REQUIRE c.id IS UNIQUE",
            "CREATE CONSTRAINT entity_id_unique IF NOT EXISTS FOR (e:Entity) REQUIRE e.id IS UNIQUE",
            "CREATE INDEX chunk_position_index IF NOT EXISTS FOR (c:Chunk) ON (c.doc_id, c.offset_start, c.offset_end)",
        ];

        for statement in statements {
            self.graph.run(Query::new(statement.to_string())).await?;
        }

        Ok(())
    }

    async fn existing_chunk_id(&self, chunk: &ChunkRecord) -> Result<Option<String>, IndexError> {
        let query = Query::new(
            r#"
            MATCH (c:Chunk {doc_id: $doc_id, offset_start: $start, offset_end: $end})
            RETURN c.id AS id
            LIMIT 1
            "#.to_string()
        )
        .param("doc_id", chunk.doc_id.clone())
        .param("start", chunk.offset.0 as i64)
        .param("end", chunk.offset.1 as i64);

        let mut result = self.graph.execute(query).await?;
        match result.next().await? {
            Some(row) => Ok(Some(row.get::<String>("id").map_err(graph_err)?)),
            None => Ok(None),
        }
    }

    fn chunk_query(chunk: &ChunkRecord) -> Query {
        Query::new(
            r#"
            MERGE (c:Chunk {doc_id: $doc_id, offset_start: $start, offset_end: $end})
            ON CREATE SET c.id = $id, c.text = $text, c.source = $source
            "#.to_string()
        )
        .param("doc_id", chunk.doc_id.clone())
        .param("start", chunk.offset.0 as i64)
        .param("end", chunk.offset.1 as i64)
        .param("id", chunk.chunk_id.clone())
        .param("text", chunk.text.clone())
        .param("source", chunk.source.clone())
    }

    /// Current vocabulary label of each stored entity among `ids`.
    async fn stored_labels(&self, ids: Vec<String>) -> Result<HashMap<String, String>, IndexError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let query = Query::new(
            r#"
            MATCH (n:Entity)
            WHERE n.id IN $ids AND n.label IS NOT NULL
            RETURN n.id AS id, n.label AS label
            "#.to_string()
        )
        .param("ids", ids);

        let mut result = self.graph.execute(query).await?;
        let mut labels = HashMap::new();
        while let Some(row) = result.next().await? {
            labels.insert(
                row.get::<String>("id").map_err(graph_err)?,
                row.get::<String>("label").map_err(graph_err)?,
            );
        }
        Ok(labels)
    }

    fn node_cypher(label: &str, previous: Option<&str>) -> Result<String, IndexError> {
        let label = identifier(label)?;
        let remove = match previous {
            Some(old) if old != label => format!("REMOVE n:`{}`\n            ", identifier(old)?),
            _ => String::new(),
        };

        Ok(format!(
            r#"
            MERGE (n:Entity {{id: $id}})
            {remove}SET n:`{label}`, n.label = $label, n += $properties
            WITH n
            MATCH (c:Chunk {{doc_id: $doc_id, offset_start: $start, offset_end: $end}})
            MERGE (n)-[:{from_chunk}]->(c)
            "#,
            remove = remove,
            label = label,
            from_chunk = FROM_CHUNK,
        ))
    }

    fn node_query(
        chunk: &ChunkRecord,
        node: &extract::Node,
        previous: Option<&str>,
    ) -> Result<Query, IndexError> {
        let properties: HashMap<String, String> = node.properties.clone().into_iter().collect();

        Ok(Query::new(Self::node_cypher(&node.label, previous)?)
        .param("id", node.id.clone())
        .param("label", node.label.clone())
        .param("properties", properties)
        .param("doc_id", chunk.doc_id.clone())
        .param("start", chunk.offset.0 as i64)
        .param("end", chunk.offset.1 as i64))
    }

    fn relationship_query(rel: &extract::Relationship) -> Result<Query, IndexError> {
        let rel_type = identifier(&rel.rel_type)?;
        let properties: HashMap<String, String> = rel.properties.clone().into_iter().collect();

        Ok(Query::new(format!(
            r#"
            MATCH (source:Entity {{id: $source_id}})
            MATCH (target:Entity {{id: $target_id}})
            MERGE (source)-[r:`{rel_type}`]->(target)
            SET r += $properties
            "#,
            rel_type = rel_type,
        ))
        .param("source_id", rel.start_node_id.clone())
        .param("target_id", rel.end_node_id.clone())
        .param("properties", properties))
    }

    async fn count(&self, cypher: &str) -> Result<usize, IndexError> {
        let mut result = self.graph.execute(Query::new(cypher.to_string())).await?;
        let count = match result.next().await? {
            Some(row) => row.get::<i64>("count").unwrap_or(0) as usize,
            None => 0,
        };
        Ok(count)
    }
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn write_chunk(&self, write: &ChunkWrite) -> Result<WriteOutcome, IndexError> {
        let chunk_created = self.existing_chunk_id(&write.chunk).await?.is_none();
        let previous_labels = self
            .stored_labels(write.nodes.iter().map(|n| n.id.clone()).collect())
            .await?;

        let mut queries = vec![Self::chunk_query(&write.chunk)];
        for node in &write.nodes {
            let previous = previous_labels.get(&node.id).map(String::as_str);
            queries.push(Self::node_query(&write.chunk, node, previous)?);
        }
        for rel in &write.relationships {
            queries.push(Self::relationship_query(rel)?);
        }

        // one transaction per chunk: dropped (uncommitted) transactions roll back
        let mut txn = self.graph.start_txn().await?;
        txn.run_queries(queries).await?;
        txn.commit().await?;

        Ok(WriteOutcome {
            chunk_created,
            nodes_written: write.nodes.len(),
            relationships_written: write.relationships.len(),
            relationships_rejected: 0,
        })
    }

    async fn fetch_chunks(&self, chunk_ids: &[String]) -> Result<Vec<ChunkRecord>, IndexError> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }

        let query = Query::new(
            r#"
            MATCH (c:Chunk)
            WHERE c.id IN $chunk_ids
            RETURN c.id AS id, c.doc_id AS doc_id, c.source AS source, c.text AS text,
                   c.offset_start AS start, c.offset_end AS end
            "#.to_string()
        )
        .param("chunk_ids", chunk_ids.to_vec());

        let mut result = self.graph.execute(query).await?;
        let mut by_id = HashMap::new();

        while let Some(row) = result.next().await? {
            let record = ChunkRecord {
                chunk_id: row.get::<String>("id").map_err(graph_err)?,
                doc_id: row.get::<String>("doc_id").map_err(graph_err)?,
                source: row.get::<String>("source").unwrap_or_default(),
                text: row.get::<String>("text").map_err(graph_err)?,
                offset: (
                    row.get::<i64>("start").map_err(graph_err)? as usize,
                    row.get::<i64>("end").map_err(graph_err)? as usize,
                ),
            };
            by_id.insert(record.chunk_id.clone(), record);
        }

        Ok(chunk_ids
            .iter()
            .filter_map(|id| by_id.get(id).cloned())
            .collect())
    }

    async fn expand_from_chunks(
        &self,
        chunk_ids: &[String],
        max_hops: usize,
    ) -> Result<Vec<RelationshipTriple>, IndexError> {
        if chunk_ids.is_empty() || max_hops == 0 {
            return Ok(Vec::new());
        }

        let query = Query::new(format!(
            r#"
            MATCH (c:Chunk)<-[:{from_chunk}]-(seed:Entity)
            WHERE c.id IN $chunk_ids
            MATCH (seed)-[rels*1..{hops}]-(:Entity)
            WHERE none(r IN rels WHERE type(r) = '{from_chunk}')
            UNWIND rels AS r
            WITH DISTINCT r
            RETURN coalesce(startNode(r).name, startNode(r).id) AS source,
                   type(r) AS rel_type,
                   coalesce(endNode(r).name, endNode(r).id) AS target,
                   [k IN keys(r) | k + ': ' + toString(r[k])] AS details
            ORDER BY source, rel_type, target
            "#,
            from_chunk = FROM_CHUNK,
            hops = max_hops,
        ))
        .param("chunk_ids", chunk_ids.to_vec());

        let mut result = self.graph.execute(query).await?;
        let mut triples = Vec::new();

        while let Some(row) = result.next().await? {
            let mut details = row.get::<Vec<String>>("details").unwrap_or_default();
            details.sort();

            triples.push(RelationshipTriple {
                source: row.get::<String>("source").map_err(graph_err)?,
                rel_type: row.get::<String>("rel_type").map_err(graph_err)?,
                target: row.get::<String>("target").map_err(graph_err)?,
                details,
            });
        }

        Ok(triples)
    }

    async fn get_stats(&self) -> Result<GraphStats, IndexError> {
        let chunk_count = self.count("MATCH (c:Chunk) RETURN count(c) AS count").await?;
        let entity_count = self.count("MATCH (e:Entity) RETURN count(e) AS count").await?;
        let relation_count = self
            .count(&format!(
                "MATCH (:Entity)-[r]->(:Entity) WHERE type(r) <> '{}' RETURN count(r) AS count",
                FROM_CHUNK
            ))
            .await?;

        Ok(GraphStats {
            chunk_count,
            entity_count,
            relation_count,
        })
    }
}
