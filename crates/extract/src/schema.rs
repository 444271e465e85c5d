use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ReferentialIntegrityError;

pub type Properties = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub properties: Properties,
}

impl Node {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        let id = id.into();
        let mut properties = Properties::new();
        properties.insert("name".to_string(), id.clone());
        Self {
            id,
            label: label.into(),
            properties,
        }
    }

    pub fn name(&self) -> &str {
        self.properties
            .get("name")
            .map(String::as_str)
            .unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(rename = "type")]
    pub rel_type: String,
    pub start_node_id: String,
    pub end_node_id: String,
    #[serde(default)]
    pub properties: Properties,
}

impl Relationship {
    pub fn new(
        start_node_id: impl Into<String>,
        rel_type: impl Into<String>,
        end_node_id: impl Into<String>,
    ) -> Self {
        Self {
            rel_type: rel_type.into(),
            start_node_id: start_node_id.into(),
            end_node_id: end_node_id.into(),
            properties: Properties::new(),
        }
    }

    /// Identity used when merging relationships in a graph store.
    pub fn key(&self) -> (&str, &str, &str) {
        (&self.start_node_id, &self.rel_type, &self.end_node_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub nodes: Vec<Node>,
    pub relationships: Vec<Relationship>,
}

impl ExtractionResult {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.relationships.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DropReason {
    UnknownLabel { label: String },
    UnknownRelationshipType { rel_type: String },
    DuplicateNode,
    DuplicateRelationship,
    DanglingReference { missing_id: String },
    Malformed { detail: String },
}

impl From<ReferentialIntegrityError> for DropReason {
    fn from(err: ReferentialIntegrityError) -> Self {
        DropReason::DanglingReference {
            missing_id: err.missing_id,
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::UnknownLabel { label } => write!(f, "label '{}' not in vocabulary", label),
            DropReason::UnknownRelationshipType { rel_type } => {
                write!(f, "relationship type '{}' not in vocabulary", rel_type)
            }
            DropReason::DuplicateNode => write!(f, "duplicate node id"),
            DropReason::DuplicateRelationship => write!(f, "duplicate relationship"),
            DropReason::DanglingReference { missing_id } => {
                write!(f, "references unknown node id '{}'", missing_id)
            }
            DropReason::Malformed { detail } => write!(f, "malformed entry: {}", detail),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedEntry {
    /// Compact rendering of what was dropped, e.g. `Lupus:Virus`.
    pub entry: String,
    pub reason: DropReason,
}

/// Everything validation threw away, so callers can count it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub dropped_nodes: Vec<DroppedEntry>,
    pub dropped_relationships: Vec<DroppedEntry>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.dropped_nodes.is_empty() && self.dropped_relationships.is_empty()
    }

    pub fn extend(&mut self, other: ValidationReport) {
        self.dropped_nodes.extend(other.dropped_nodes);
        self.dropped_relationships.extend(other.dropped_relationships);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedChunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub extraction: ExtractionResult,
    pub report: ValidationReport,
}

/// A worked example shown to the model ahead of the real input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FewShotExample {
    pub text: String,
    pub output: ExtractionResult,
}
