use anyhow::{Context, Result, bail};
use extract::{ExtractionConfig, FewShotExample, RetryPolicy, Vocabulary};
use index::SimilarityMetric;
use ingest::ChunkerConfig;
use query::{PromptTemplate, RetrievalStrategy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Everything a [`crate::Pipeline`] needs besides its services.
///
/// Missing sections and fields fall back to their defaults when loaded from
/// JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub chunking: ChunkerConfig,
    pub vocabulary: Vocabulary,
    pub examples: Vec<FewShotExample>,
    pub prompts: PromptConfig,
    pub retrieval: RetrievalConfig,
    pub index: IndexConfig,
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub answer_template: PromptTemplate,
    /// Return the retrieval context alongside each answer.
    pub include_context: bool,
    /// Times the model is asked to fix extraction output that is not JSON.
    pub repair_attempts: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub hop_bound: usize,
    pub strategy: RetrievalStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub dimension: usize,
    pub metric: SimilarityMetric,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_concurrent_extractions: usize,
    pub max_concurrent_documents: usize,
    /// Budget for a single model call.
    pub request_timeout_secs: u64,
    /// Budget for a whole retrieve or answer request.
    pub query_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            answer_template: PromptTemplate::default(),
            include_context: false,
            repair_attempts: 1,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            hop_bound: 2,
            strategy: RetrievalStrategy::GraphAugmented,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimension: 768,
            metric: SimilarityMetric::Cosine,
        }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_extractions: 5,
            max_concurrent_documents: 2,
            request_timeout_secs: 60,
            query_timeout_secs: 120,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 10000,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 10000,
        }
    }
}

impl ConcurrencyConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.initial_backoff_ms, self.max_backoff_ms)
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the constraints serde cannot express. Vocabulary entries and
    /// template placeholders are already checked while deserializing.
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate().context("Invalid chunking config")?;

        if self.retrieval.top_k == 0 {
            bail!("retrieval.top_k must be greater than zero");
        }
        if self.index.dimension == 0 {
            bail!("index.dimension must be greater than zero");
        }
        if self.concurrency.max_concurrent_extractions == 0
            || self.concurrency.max_concurrent_documents == 0
        {
            bail!("concurrency limits must be greater than zero");
        }
        if self.concurrency.request_timeout_secs == 0 || self.concurrency.query_timeout_secs == 0 {
            bail!("timeouts must be greater than zero");
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            bail!("cache.max_entries must be greater than zero when the cache is enabled");
        }

        Ok(())
    }

    pub fn extraction_config(&self) -> ExtractionConfig {
        ExtractionConfig::new(self.vocabulary.clone())
            .with_examples(self.examples.clone())
            .with_call_timeout(self.concurrency.request_timeout())
            .with_repair_attempts(self.prompts.repair_attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.chunking, ChunkerConfig { chunk_size: 500, overlap: 100 });
        assert_eq!(config.retrieval.strategy, RetrievalStrategy::GraphAugmented);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{
                "chunking": {"chunk_size": 200, "overlap": 20},
                "vocabulary": {"node_labels": ["Disease", "Anatomy", "Drug"], "relationship_types": ["AFFECTS", "TREATS"]},
                "retrieval": {"strategy": "vector"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.chunking.chunk_size, 200);
        assert_eq!(config.vocabulary.node_labels().len(), 3);
        assert_eq!(config.retrieval.strategy, RetrievalStrategy::Vector);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.concurrency.max_concurrent_extractions, 5);
    }

    #[test]
    fn test_overlap_not_smaller_than_chunk_size_rejected() {
        let mut config = PipelineConfig::default();
        config.chunking = ChunkerConfig { chunk_size: 100, overlap: 100 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_template_without_placeholder_rejected() {
        let result = serde_json::from_str::<PipelineConfig>(
            r#"{"prompts": {"answer_template": "Answer {query_text}"}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"index": {{"dimension": 384, "metric": "dot_product"}}}}"#).unwrap();

        let config = PipelineConfig::from_json_file(file.path()).unwrap();

        assert_eq!(config.index.dimension, 384);
        assert_eq!(config.index.metric, SimilarityMetric::DotProduct);
    }

    #[test]
    fn test_from_json_file_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"retrieval": {{"top_k": 0}}}}"#).unwrap();

        assert!(PipelineConfig::from_json_file(file.path()).is_err());
    }
}
