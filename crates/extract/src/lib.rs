pub mod error;
pub mod llm;
pub mod parser;
pub mod prompt;
pub mod retry;
pub mod schema;
pub mod vocabulary;

pub use error::{ExtractError, ExtractionParseError, ReferentialIntegrityError, TimeoutError};
pub use llm::{LanguageModel, OllamaClient};
pub use parser::parse_extraction;
pub use retry::{RetryError, RetryPolicy};
pub use schema::{
    DropReason, DroppedEntry, ExtractedChunk, ExtractionResult, FewShotExample, Node, Properties,
    Relationship, ValidationReport,
};
pub use vocabulary::{ExtractionConfig, Vocabulary};

use std::sync::Arc;
use tracing::{debug, warn};

/// Validated model output for one piece of text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatedExtraction {
    pub extraction: ExtractionResult,
    pub report: ValidationReport,
}

pub struct Extractor {
    llm: Arc<dyn LanguageModel>,
    config: Arc<ExtractionConfig>,
}

impl Extractor {
    pub fn new(llm: Arc<dyn LanguageModel>, config: ExtractionConfig) -> Self {
        Self {
            llm,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Extract nodes and relationships from a chunk of text.
    ///
    /// Whitespace-only input short-circuits to an empty result without
    /// calling the model.
    pub async fn extract_from_text(&self, text: &str) -> Result<ValidatedExtraction, ExtractError> {
        if text.trim().is_empty() {
            return Ok(ValidatedExtraction::default());
        }

        let prompt = prompt::build_extraction_prompt(text, &self.config);
        let mut raw = self.call_model(&prompt).await?;
        let mut repairs_left = self.config.repair_attempts;

        loop {
            match parse_extraction(&raw, &self.config.vocabulary) {
                Ok((extraction, report)) => {
                    return Ok(ValidatedExtraction { extraction, report });
                }
                Err(err) if repairs_left > 0 => {
                    repairs_left -= 1;
                    debug!(error = %err, "Model output did not parse, asking for a repair");
                    raw = self.call_model(&prompt::build_retry_prompt(&raw)).await?;
                }
                Err(err) => {
                    warn!(error = %err, excerpt = %err.excerpt, "Giving up on model output");
                    return Err(err.into());
                }
            }
        }
    }

    /// Extract from a chunk with metadata
    pub async fn extract_chunk(
        &self,
        chunk_id: String,
        doc_id: String,
        text: &str,
    ) -> Result<ExtractedChunk, ExtractError> {
        let ValidatedExtraction { extraction, report } = self.extract_from_text(text).await?;

        Ok(ExtractedChunk {
            chunk_id,
            doc_id,
            extraction,
            report,
        })
    }

    async fn call_model(&self, prompt: &str) -> Result<String, ExtractError> {
        let budget = self.config.call_timeout;

        tokio::time::timeout(budget, self.llm.generate(prompt))
            .await
            .map_err(|_| TimeoutError {
                operation: "extraction model call",
                budget,
            })?
            .map_err(ExtractError::Model)
    }
}
