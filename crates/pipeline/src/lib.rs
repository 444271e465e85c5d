pub mod cache;
pub mod config;
pub mod metrics;
pub mod pipeline;

pub use cache::{CacheStats, CachedEmbedder};
pub use config::{
    CacheConfig, ConcurrencyConfig, IndexConfig, PipelineConfig, PromptConfig, RetrievalConfig,
    RetryConfig,
};
pub use metrics::{Metrics, MetricsSnapshot, TimedOperation};
pub use pipeline::{IngestReport, Pipeline, QueryOutcome, Services, SkipStage, SkippedChunk};
