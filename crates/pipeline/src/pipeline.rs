use anyhow::{Context, Result, bail};
use extract::{
    ExtractError, ExtractedChunk, Extractor, LanguageModel, RetryError, RetryPolicy,
    TimeoutError, ValidationReport,
};
use futures::stream::{self, StreamExt};
use index::{Embedder, GraphStore, IndexError, IndexStats, Indexer, VectorStore};
use ingest::{Chunk, Chunker, Document};
use query::{
    Answer, AnswerGenerator, QueryError, RetrievalResult, RetrievalStrategy, Retriever,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::cache::{CacheStats, CachedEmbedder};
use crate::config::PipelineConfig;
use crate::metrics::{Metrics, TimedOperation};

/// External services the pipeline talks to.
#[derive(Clone)]
pub struct Services {
    pub llm: Arc<dyn LanguageModel>,
    pub embedder: Arc<dyn Embedder>,
    pub graph: Arc<dyn GraphStore>,
    pub vectors: Arc<dyn VectorStore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipStage {
    Extraction,
    Indexing,
}

/// A chunk that was left out of the index, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedChunk {
    pub chunk_id: String,
    pub offset: (usize, usize),
    pub stage: SkipStage,
    pub attempts: usize,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub doc_id: String,
    pub source: String,
    pub chunks_total: usize,
    pub chunks_indexed: usize,
    /// Chunks that were not already in the graph.
    pub chunks_new: usize,
    pub nodes_written: usize,
    pub relationships_written: usize,
    /// Relationships whose endpoints were missing at write time.
    pub relationships_rejected: usize,
    /// Entries the extraction validator dropped.
    pub validation: ValidationReport,
    pub skipped: Vec<SkippedChunk>,
}

/// Answer plus the retrieval it was generated from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutcome {
    pub answer: Answer,
    pub retrieval: RetrievalResult,
}

pub struct Pipeline {
    config: Arc<PipelineConfig>,
    chunker: Chunker,
    extractor: Extractor,
    indexer: Indexer,
    retriever: Retriever,
    generator: AnswerGenerator,
    retry: RetryPolicy,
    metrics: Arc<Metrics>,
    cache: Option<Arc<CachedEmbedder>>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, services: Services) -> Result<Self> {
        config.validate()?;

        if services.vectors.dimension() != config.index.dimension {
            bail!(
                "vector store dimension {} does not match configured dimension {}",
                services.vectors.dimension(),
                config.index.dimension
            );
        }

        let chunker = Chunker::new(config.chunking).context("Invalid chunking config")?;

        let (embedder, cache) = if config.cache.enabled {
            let cache = Arc::new(CachedEmbedder::new(
                services.embedder,
                config.cache.max_entries,
            ));
            (cache.clone() as Arc<dyn Embedder>, Some(cache))
        } else {
            (services.embedder, None)
        };

        let extractor = Extractor::new(services.llm.clone(), config.extraction_config());
        let indexer = Indexer::new(
            embedder.clone(),
            services.vectors.clone(),
            services.graph.clone(),
        );
        let retriever = Retriever::new(
            embedder,
            services.vectors,
            services.graph,
            config.retrieval.hop_bound,
        );
        let generator = AnswerGenerator::new(services.llm, config.prompts.answer_template.clone())
            .with_retry(config.retry.policy())
            .with_call_timeout(config.concurrency.request_timeout())
            .with_include_context(config.prompts.include_context);

        Ok(Self {
            retry: config.retry.policy(),
            config: Arc::new(config),
            chunker,
            extractor,
            indexer,
            retriever,
            generator,
            metrics: Metrics::new(),
            cache,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|c| c.stats())
    }

    pub async fn stats(&self) -> Result<IndexStats, IndexError> {
        self.indexer.get_stats().await
    }

    /// Chunk, extract and index one document.
    ///
    /// Chunks whose extraction or embedding fails are skipped and listed in
    /// the report. A failing graph store aborts the document; chunks written
    /// before the failure stay in place.
    pub async fn ingest_document(&self, document: &Document) -> Result<IngestReport> {
        let timer = TimedOperation::start();
        let chunks = self
            .chunker
            .chunk_text(&document.doc_id, &document.text, &document.source);

        info!(
            doc_id = %document.doc_id,
            source = %document.source,
            chunks = chunks.len(),
            "Ingesting document"
        );

        let mut report = IngestReport {
            doc_id: document.doc_id.clone(),
            source: document.source.clone(),
            chunks_total: chunks.len(),
            ..IngestReport::default()
        };

        let extraction_futures: Vec<_> = chunks
            .iter()
            .map(|chunk| async move { (chunk, self.extract_with_retry(chunk).await) })
            .collect();
        let mut extractions = stream::iter(extraction_futures)
            .buffered(self.config.concurrency.max_concurrent_extractions);

        while let Some((chunk, extracted)) = extractions.next().await {
            let extracted = match extracted {
                Ok(extracted) => extracted,
                Err(e) => {
                    warn!(
                        doc_id = %chunk.doc_id,
                        chunk_id = %chunk.chunk_id,
                        attempts = e.attempts,
                        error = %e.error,
                        "Skipping chunk, extraction failed"
                    );
                    report.skipped.push(SkippedChunk {
                        chunk_id: chunk.chunk_id.clone(),
                        offset: chunk.offset,
                        stage: SkipStage::Extraction,
                        attempts: e.attempts,
                        error: e.error.to_string(),
                    });
                    continue;
                }
            };

            // validation drops count even when indexing fails
            report.validation.extend(extracted.report);

            match self
                .indexer
                .index_extracted_chunk(chunk, &extracted.extraction)
                .await
            {
                Ok(outcome) => {
                    report.chunks_indexed += 1;
                    if outcome.chunk_created {
                        report.chunks_new += 1;
                    }
                    report.nodes_written += outcome.nodes_written;
                    report.relationships_written += outcome.relationships_written;
                    report.relationships_rejected += outcome.relationships_rejected;
                }
                Err(e @ IndexError::GraphStore(_)) => {
                    error!(
                        doc_id = %chunk.doc_id,
                        chunk_id = %chunk.chunk_id,
                        error = %e,
                        "Graph write failed, aborting document"
                    );
                    self.metrics.record_document_failure();
                    return Err(anyhow::Error::new(e)).with_context(|| {
                        format!("Failed to ingest document {}", document.source)
                    });
                }
                Err(e) => {
                    warn!(
                        doc_id = %chunk.doc_id,
                        chunk_id = %chunk.chunk_id,
                        error = %e,
                        "Skipping chunk, indexing failed"
                    );
                    report.skipped.push(SkippedChunk {
                        chunk_id: chunk.chunk_id.clone(),
                        offset: chunk.offset,
                        stage: SkipStage::Indexing,
                        attempts: 1,
                        error: e.to_string(),
                    });
                }
            }
        }

        let elapsed = timer.elapsed();
        self.metrics.record_ingest(elapsed, &report);

        info!(
            doc_id = %report.doc_id,
            chunks_indexed = report.chunks_indexed,
            chunks_skipped = report.skipped.len(),
            nodes = report.nodes_written,
            relationships = report.relationships_written,
            elapsed_ms = elapsed.as_millis() as u64,
            "Document ingested"
        );

        Ok(report)
    }

    /// Ingests documents in parallel. Results come back in input order, one
    /// per document.
    pub async fn ingest_documents(&self, documents: Vec<Document>) -> Vec<Result<IngestReport>> {
        stream::iter(documents)
            .map(|document| async move { self.ingest_document(&document).await })
            .buffered(self.config.concurrency.max_concurrent_documents)
            .collect()
            .await
    }

    pub async fn retrieve(
        &self,
        query_text: &str,
        strategy: RetrievalStrategy,
        top_k: usize,
    ) -> Result<RetrievalResult, QueryError> {
        self.with_query_timeout(
            "retrieve",
            self.retriever.retrieve(query_text, strategy, top_k),
        )
        .await
    }

    pub async fn answer(
        &self,
        question: &str,
        strategy: RetrievalStrategy,
        top_k: usize,
    ) -> Result<QueryOutcome, QueryError> {
        self.with_query_timeout("answer", async {
            let retrieval = self.retriever.retrieve(question, strategy, top_k).await?;
            let answer = self.generator.generate(question, &retrieval.context).await?;
            Ok(QueryOutcome { answer, retrieval })
        })
        .await
    }

    async fn extract_with_retry(
        &self,
        chunk: &Chunk,
    ) -> Result<ExtractedChunk, RetryError<ExtractError>> {
        let extractor = &self.extractor;
        self.retry
            .retry_if(
                "extract_chunk",
                || async move {
                    extractor
                        .extract_chunk(chunk.chunk_id.clone(), chunk.doc_id.clone(), &chunk.text)
                        .await
                },
                ExtractError::is_retryable,
            )
            .await
    }

    async fn with_query_timeout<T>(
        &self,
        operation: &'static str,
        future: impl Future<Output = Result<T, QueryError>>,
    ) -> Result<T, QueryError> {
        let budget = self.config.concurrency.query_timeout();
        let timer = TimedOperation::start();

        let result = match tokio::time::timeout(budget, future).await {
            Ok(result) => result,
            Err(_) => Err(TimeoutError { operation, budget }.into()),
        };

        self.metrics.record_query(timer.elapsed(), result.is_ok());
        if let Err(e) = &result {
            warn!(operation, error = %e, "Query failed");
        }
        result
    }
}
