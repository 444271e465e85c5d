use extract::TimeoutError;
use index::IndexError;
use thiserror::Error;

/// Answer generation failed and the retry policy gave up.
#[derive(Debug, Error)]
#[error("answer generation failed after {attempts} attempt(s): {source:#}")]
pub struct GenerationError {
    pub attempts: usize,
    pub source: anyhow::Error,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("prompt template is missing the {{{0}}} placeholder")]
    MissingPlaceholder(&'static str),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("failed to embed query: {0:#}")]
    Embedding(#[source] anyhow::Error),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),
}
