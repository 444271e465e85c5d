use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use crate::error::ExtractError;
use crate::schema::FewShotExample;

static SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s\-]+").expect("valid separator pattern"));

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier pattern"));

/// Controlled vocabulary for node labels and relationship types.
///
/// Entries must be plain identifiers; graph stores splice them into queries
/// as labels and relationship types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawVocabulary", into = "RawVocabulary")]
pub struct Vocabulary {
    node_labels: Vec<String>,
    relationship_types: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct RawVocabulary {
    node_labels: Vec<String>,
    relationship_types: Vec<String>,
}

impl TryFrom<RawVocabulary> for Vocabulary {
    type Error = ExtractError;

    fn try_from(raw: RawVocabulary) -> Result<Self, Self::Error> {
        Vocabulary::new(raw.node_labels, raw.relationship_types)
    }
}

impl From<Vocabulary> for RawVocabulary {
    fn from(vocab: Vocabulary) -> Self {
        Self {
            node_labels: vocab.node_labels,
            relationship_types: vocab.relationship_types,
        }
    }
}

impl Vocabulary {
    pub fn new<L, T>(node_labels: L, relationship_types: T) -> Result<Self, ExtractError>
    where
        L: IntoIterator,
        L::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        let node_labels = Self::validate_entries("node label", node_labels)?;
        let relationship_types = Self::validate_entries("relationship type", relationship_types)?;

        Ok(Self {
            node_labels,
            relationship_types,
        })
    }

    fn validate_entries<I>(kind: &str, entries: I) -> Result<Vec<String>, ExtractError>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        for entry in entries {
            let entry: String = entry.into().trim().to_string();
            if !IDENTIFIER.is_match(&entry) {
                return Err(ExtractError::InvalidVocabulary(format!(
                    "{} '{}' is not a plain identifier",
                    kind, entry
                )));
            }
            if !seen.insert(normalize_key(&entry)) {
                return Err(ExtractError::InvalidVocabulary(format!(
                    "{} '{}' listed twice",
                    kind, entry
                )));
            }
            out.push(entry);
        }

        if out.is_empty() {
            return Err(ExtractError::InvalidVocabulary(format!(
                "at least one {} is required",
                kind
            )));
        }

        Ok(out)
    }

    pub fn node_labels(&self) -> &[String] {
        &self.node_labels
    }

    pub fn relationship_types(&self) -> &[String] {
        &self.relationship_types
    }

    /// Maps a model-produced label onto its vocabulary spelling.
    pub fn canonical_label(&self, raw: &str) -> Option<&str> {
        Self::lookup(&self.node_labels, raw)
    }

    /// Maps a model-produced relationship type onto its vocabulary spelling.
    /// `treats`, `Treats` and `TREATS` all resolve to the same entry.
    pub fn canonical_relationship_type(&self, raw: &str) -> Option<&str> {
        Self::lookup(&self.relationship_types, raw)
    }

    fn lookup<'a>(entries: &'a [String], raw: &str) -> Option<&'a str> {
        let key = normalize_key(raw);
        entries
            .iter()
            .find(|entry| normalize_key(entry) == key)
            .map(String::as_str)
    }
}

/// Medical vocabulary used when none is configured.
impl Default for Vocabulary {
    fn default() -> Self {
        fn owned(entries: &[&str]) -> Vec<String> {
            entries.iter().map(|e| e.to_string()).collect()
        }

        Self {
            node_labels: owned(&["Disease", "Symptom", "Anatomy", "Drug", "Treatment", "Patient"]),
            relationship_types: owned(&["AFFECTS", "TREATS", "HAS_SYMPTOM", "CAUSES", "DIAGNOSED_WITH"]),
        }
    }
}

fn normalize_key(value: &str) -> String {
    SEPARATORS
        .replace_all(value.trim(), "_")
        .to_lowercase()
}

/// Immutable settings shared by every extraction call.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub vocabulary: Vocabulary,
    pub examples: Vec<FewShotExample>,
    /// Budget for a single model call.
    pub call_timeout: Duration,
    /// How many times the model is asked to fix output that does not parse.
    pub repair_attempts: usize,
}

impl ExtractionConfig {
    pub fn new(vocabulary: Vocabulary) -> Self {
        Self {
            vocabulary,
            examples: Vec::new(),
            call_timeout: Duration::from_secs(60),
            repair_attempts: 1,
        }
    }

    pub fn with_examples(mut self, examples: Vec<FewShotExample>) -> Self {
        self.examples = examples;
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_repair_attempts(mut self, repair_attempts: usize) -> Self {
        self.repair_attempts = repair_attempts;
        self
    }
}
