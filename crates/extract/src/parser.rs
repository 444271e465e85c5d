//! Strict parsing of model output into the extraction schema.
//!
//! Model output is untrusted: the document shape is checked first (failure
//! is an [`ExtractionParseError`]), then every entry is checked on its own
//! and dropped with a recorded reason if it does not fit the vocabulary or
//! points at a node that is not there.

use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::warn;

use crate::error::{ExtractionParseError, ReferentialIntegrityError};
use crate::schema::{
    DropReason, DroppedEntry, ExtractionResult, Node, Properties, Relationship, ValidationReport,
};
use crate::vocabulary::Vocabulary;

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*```[A-Za-z]*\s*(.*?)\s*```\s*$").expect("valid fence pattern")
});

const ENTRY_PREVIEW_CHARS: usize = 120;

#[derive(Deserialize)]
struct RawOutput {
    #[serde(default)]
    nodes: Option<Vec<Value>>,
    #[serde(default)]
    relationships: Option<Vec<Value>>,
}

#[derive(Deserialize)]
struct RawNode {
    id: Scalar,
    #[serde(alias = "type")]
    label: String,
    #[serde(default)]
    properties: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
struct RawRelationship {
    #[serde(rename = "type", alias = "rel_type")]
    rel_type: String,
    #[serde(alias = "source")]
    start_node_id: Scalar,
    #[serde(alias = "target")]
    end_node_id: Scalar,
    #[serde(default)]
    properties: Option<Map<String, Value>>,
}

/// Models sometimes emit numeric ids.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Number(serde_json::Number),
}

impl Scalar {
    fn into_id(self) -> String {
        match self {
            Scalar::Text(s) => s.trim().to_string(),
            Scalar::Number(n) => n.to_string(),
        }
    }
}

pub fn parse_extraction(
    raw: &str,
    vocabulary: &Vocabulary,
) -> Result<(ExtractionResult, ValidationReport), ExtractionParseError> {
    let body = strip_code_fence(raw);

    let value: Value = serde_json::from_str(body)
        .map_err(|e| ExtractionParseError::new(format!("invalid JSON: {}", e), raw))?;

    if !value.is_object() {
        return Err(ExtractionParseError::new("expected a JSON object", raw));
    }

    let output: RawOutput = serde_json::from_value(value).map_err(|e| {
        ExtractionParseError::new(format!("unexpected document shape: {}", e), raw)
    })?;

    if output.nodes.is_none() && output.relationships.is_none() {
        return Err(ExtractionParseError::new(
            "missing \"nodes\" and \"relationships\"",
            raw,
        ));
    }

    Ok(validate(
        output.nodes.unwrap_or_default(),
        output.relationships.unwrap_or_default(),
        vocabulary,
    ))
}

fn strip_code_fence(raw: &str) -> &str {
    match CODE_FENCE.captures(raw).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => raw.trim(),
    }
}

fn validate(
    raw_nodes: Vec<Value>,
    raw_relationships: Vec<Value>,
    vocabulary: &Vocabulary,
) -> (ExtractionResult, ValidationReport) {
    let mut result = ExtractionResult::default();
    let mut report = ValidationReport::default();
    let mut node_ids = HashSet::new();

    for value in raw_nodes {
        let preview = preview(&value);
        match validate_node(value, vocabulary, &node_ids) {
            Ok(node) => {
                node_ids.insert(node.id.clone());
                result.nodes.push(node);
            }
            Err(reason) => {
                warn!(entry = %preview, reason = %reason, "Dropping extracted node");
                report.dropped_nodes.push(DroppedEntry { entry: preview, reason });
            }
        }
    }

    let mut seen_relationships = HashSet::new();

    for value in raw_relationships {
        let preview = preview(&value);
        let checked = validate_relationship(value, vocabulary, &node_ids).and_then(|rel| {
            let key = (
                rel.start_node_id.clone(),
                rel.rel_type.clone(),
                rel.end_node_id.clone(),
            );
            if seen_relationships.insert(key) {
                Ok(rel)
            } else {
                Err(DropReason::DuplicateRelationship)
            }
        });

        match checked {
            Ok(rel) => result.relationships.push(rel),
            Err(reason) => {
                warn!(entry = %preview, reason = %reason, "Dropping extracted relationship");
                report
                    .dropped_relationships
                    .push(DroppedEntry { entry: preview, reason });
            }
        }
    }

    (result, report)
}

fn validate_node(
    value: Value,
    vocabulary: &Vocabulary,
    known_ids: &HashSet<String>,
) -> Result<Node, DropReason> {
    let raw: RawNode = serde_json::from_value(value).map_err(|e| DropReason::Malformed {
        detail: e.to_string(),
    })?;

    let id = raw.id.into_id();
    if id.is_empty() {
        return Err(DropReason::Malformed {
            detail: "empty node id".to_string(),
        });
    }

    let label = vocabulary
        .canonical_label(&raw.label)
        .ok_or_else(|| DropReason::UnknownLabel {
            label: raw.label.clone(),
        })?;

    if known_ids.contains(&id) {
        return Err(DropReason::DuplicateNode);
    }

    let mut properties = render_properties(raw.properties);
    properties
        .entry("name".to_string())
        .or_insert_with(|| id.clone());

    Ok(Node {
        id,
        label: label.to_string(),
        properties,
    })
}

fn validate_relationship(
    value: Value,
    vocabulary: &Vocabulary,
    known_ids: &HashSet<String>,
) -> Result<Relationship, DropReason> {
    let raw: RawRelationship = serde_json::from_value(value).map_err(|e| DropReason::Malformed {
        detail: e.to_string(),
    })?;

    let rel_type = vocabulary
        .canonical_relationship_type(&raw.rel_type)
        .ok_or_else(|| DropReason::UnknownRelationshipType {
            rel_type: raw.rel_type.clone(),
        })?
        .to_string();

    let start_node_id = raw.start_node_id.into_id();
    let end_node_id = raw.end_node_id.into_id();

    for endpoint in [&start_node_id, &end_node_id] {
        if !known_ids.contains(endpoint) {
            return Err(ReferentialIntegrityError {
                rel_type: rel_type.clone(),
                missing_id: endpoint.clone(),
            }
            .into());
        }
    }

    Ok(Relationship {
        rel_type,
        start_node_id,
        end_node_id,
        properties: render_properties(raw.properties),
    })
}

fn render_properties(raw: Option<Map<String, Value>>) -> Properties {
    raw.unwrap_or_default()
        .into_iter()
        .filter_map(|(key, value)| {
            let rendered = match value {
                Value::Null => return None,
                Value::String(s) => s,
                other => other.to_string(),
            };
            Some((key, rendered))
        })
        .collect()
}

fn preview(value: &Value) -> String {
    let mut text = value.to_string();
    if text.chars().count() > ENTRY_PREVIEW_CHARS {
        text = text.chars().take(ENTRY_PREVIEW_CHARS).collect();
        text.push_str("...");
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> Vocabulary {
        Vocabulary::new(["Disease", "Anatomy", "Drug"], ["AFFECTS", "TREATS"]).unwrap()
    }

    #[test]
    fn test_parses_valid_output() {
        let raw = r#"{
            "nodes": [
                {"id": "Lupus", "label": "Disease"},
                {"id": "kidneys", "label": "anatomy", "properties": {"name": "kidneys", "organ": true}}
            ],
            "relationships": [
                {"type": "affects", "start_node_id": "Lupus", "end_node_id": "kidneys",
                 "properties": {"details": "renal involvement"}}
            ]
        }"#;

        let (result, report) = parse_extraction(raw, &vocab()).unwrap();

        assert!(report.is_clean());
        assert_eq!(result.nodes.len(), 2);
        assert_eq!(result.nodes[0].name(), "Lupus");
        assert_eq!(result.nodes[1].label, "Anatomy");
        assert_eq!(result.nodes[1].properties["organ"], "true");
        assert_eq!(result.relationships[0].rel_type, "AFFECTS");
        assert_eq!(result.relationships[0].properties["details"], "renal involvement");
    }

    #[test]
    fn test_strips_markdown_fence() {
        let raw = "```json\n{\"nodes\": [{\"id\": \"Lupus\", \"label\": \"Disease\"}]}\n```";
        let (result, _) = parse_extraction(raw, &vocab()).unwrap();
        assert_eq!(result.nodes.len(), 1);
    }

    #[test]
    fn test_malformed_documents_are_parse_errors() {
        for raw in [
            "Sure! Here are the entities: Lupus",
            "[]",
            r#"{"entities": []}"#,
            r#"{"nodes": "Lupus"}"#,
            "",
        ] {
            assert!(parse_extraction(raw, &vocab()).is_err(), "accepted {:?}", raw);
        }
    }

    #[test]
    fn test_drops_labels_and_types_outside_vocabulary() {
        let raw = r#"{
            "nodes": [
                {"id": "Lupus", "label": "Disease"},
                {"id": "Dr. House", "label": "Person"},
                {"id": "steroids", "label": "Drug"}
            ],
            "relationships": [
                {"type": "TREATS", "start_node_id": "steroids", "end_node_id": "Lupus"},
                {"type": "CURES", "start_node_id": "steroids", "end_node_id": "Lupus"}
            ]
        }"#;

        let (result, report) = parse_extraction(raw, &vocab()).unwrap();

        let labels: Vec<&str> = result.nodes.iter().map(|n| n.label.as_str()).collect();
        assert_eq!(labels, vec!["Disease", "Drug"]);
        assert_eq!(result.relationships.len(), 1);
        assert_eq!(
            report.dropped_nodes[0].reason,
            DropReason::UnknownLabel { label: "Person".to_string() }
        );
        assert_eq!(
            report.dropped_relationships[0].reason,
            DropReason::UnknownRelationshipType { rel_type: "CURES".to_string() }
        );
    }

    #[test]
    fn test_no_dangling_references_survive() {
        let raw = r#"{
            "nodes": [
                {"id": "Lupus", "label": "Disease"},
                {"id": "Dr. House", "label": "Person"},
                {"id": "Lupus", "label": "Disease"}
            ],
            "relationships": [
                {"type": "TREATS", "start_node_id": "Dr. House", "end_node_id": "Lupus"},
                {"type": "AFFECTS", "start_node_id": "Lupus", "end_node_id": "liver"},
                {"type": "AFFECTS", "start_node_id": "Lupus", "end_node_id": "Lupus"},
                {"type": "AFFECTS", "start_node_id": "Lupus", "end_node_id": "Lupus"},
                {"start_node_id": "Lupus", "end_node_id": "Lupus"}
            ]
        }"#;

        let (result, report) = parse_extraction(raw, &vocab()).unwrap();

        let ids: HashSet<&str> = result.nodes.iter().map(|n| n.id.as_str()).collect();
        for rel in &result.relationships {
            assert!(ids.contains(rel.start_node_id.as_str()));
            assert!(ids.contains(rel.end_node_id.as_str()));
        }
        assert_eq!(result.relationships.len(), 1);

        let reasons: Vec<&DropReason> =
            report.dropped_relationships.iter().map(|d| &d.reason).collect();
        assert_eq!(
            reasons[0],
            &DropReason::DanglingReference { missing_id: "Dr. House".to_string() }
        );
        assert_eq!(
            reasons[1],
            &DropReason::DanglingReference { missing_id: "liver".to_string() }
        );
        assert_eq!(reasons[2], &DropReason::DuplicateRelationship);
        assert!(matches!(reasons[3], DropReason::Malformed { .. }));
        assert_eq!(report.dropped_nodes.len(), 2);
        assert_eq!(report.dropped_nodes[1].reason, DropReason::DuplicateNode);
    }

    #[test]
    fn test_numeric_ids_are_accepted() {
        let raw = r#"{"nodes": [{"id": 1, "label": "Drug"}, {"id": "2", "label": "Disease"}],
                      "relationships": [{"type": "TREATS", "start_node_id": 1, "end_node_id": 2}]}"#;

        let (result, report) = parse_extraction(raw, &vocab()).unwrap();

        assert!(report.is_clean());
        assert_eq!(result.relationships[0].start_node_id, "1");
    }
}
