use std::time::Duration;
use thiserror::Error;

/// The model answered, but not with something the extraction schema accepts.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed extraction output: {reason}")]
pub struct ExtractionParseError {
    pub reason: String,
    /// Leading part of the offending output, for logs.
    pub excerpt: String,
}

impl ExtractionParseError {
    const EXCERPT_CHARS: usize = 200;

    pub fn new(reason: impl Into<String>, raw: &str) -> Self {
        Self {
            reason: reason.into(),
            excerpt: raw.chars().take(Self::EXCERPT_CHARS).collect(),
        }
    }
}

/// A relationship pointed at a node id that was not extracted alongside it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("relationship {rel_type} references unknown node id '{missing_id}'")]
pub struct ReferentialIntegrityError {
    pub rel_type: String,
    pub missing_id: String,
}

/// An external call exceeded its time budget.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("{operation} timed out after {budget:?}")]
pub struct TimeoutError {
    pub operation: &'static str,
    pub budget: Duration,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Parse(#[from] ExtractionParseError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    #[error("language model call failed: {0:#}")]
    Model(#[source] anyhow::Error),

    #[error("invalid vocabulary: {0}")]
    InvalidVocabulary(String),
}

impl ExtractError {
    /// Configuration problems never heal by retrying; everything coming back
    /// from the model might.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ExtractError::InvalidVocabulary(_))
    }
}
