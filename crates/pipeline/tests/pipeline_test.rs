use async_trait::async_trait;
use extract::{LanguageModel, Vocabulary};
use index::{
    Embedder, GraphStore, MemoryGraphStore, MemoryVectorIndex, SimilarityMetric, VectorStore,
};
use ingest::{Document, FileReader};
use pipeline::{Pipeline, PipelineConfig, Services, SkipStage};
use query::{QueryError, RetrievalStrategy};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const LUPUS: &str = "Lupus affects the kidneys. Patients are treated with steroids.";

/// Extracts a fixed set of medical entities by keyword and answers every
/// other prompt with a canned sentence.
#[derive(Default)]
struct KeywordModel {
    extraction_calls: AtomicUsize,
}

impl KeywordModel {
    fn extract(text: &str) -> String {
        if text.contains("POISON") {
            return "I cannot help with that.".to_string();
        }

        let mut nodes = Vec::new();
        let mut relationships = Vec::new();
        let has = |word: &str| text.contains(word);

        if has("Lupus") {
            nodes.push(json!({"id": "Lupus", "label": "Disease"}));
        }
        if has("kidneys") {
            nodes.push(json!({"id": "kidneys", "label": "Anatomy"}));
        }
        if has("steroids") {
            nodes.push(json!({"id": "steroids", "label": "Drug"}));
        }
        if has("COVID") {
            nodes.push(json!({"id": "COVID", "label": "Virus"}));
        }
        if has("Lupus") && has("kidneys") {
            relationships.push(json!({"type": "AFFECTS", "start_node_id": "Lupus", "end_node_id": "kidneys"}));
        }
        if has("Lupus") && has("steroids") {
            relationships.push(json!({"type": "TREATS", "start_node_id": "steroids", "end_node_id": "Lupus"}));
        }

        json!({"nodes": nodes, "relationships": relationships}).to_string()
    }
}

#[async_trait]
impl LanguageModel for KeywordModel {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        if prompt.starts_with("Extract a knowledge graph") {
            self.extraction_calls.fetch_add(1, Ordering::SeqCst);
            let text = prompt
                .rsplit_once("TEXT:\n")
                .map(|(_, rest)| rest.trim_end_matches("\n\nJSON OUTPUT:"))
                .unwrap_or_default();
            return Ok(Self::extract(text));
        }
        if prompt.starts_with("The following JSON is invalid") {
            return Ok("still not JSON".to_string());
        }
        if prompt.contains("STALL") {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        Ok("Lupus can damage the kidneys.".to_string())
    }
}

const KEYWORDS: [&str; 4] = ["lupus", "kidney", "steroid", "heart"];

struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        if text.contains("UNEMBEDDABLE") {
            anyhow::bail!("embedding service rejected the text");
        }
        let lower = text.to_lowercase();
        let mut vector: Vec<f32> = KEYWORDS
            .iter()
            .map(|k| lower.matches(k).count() as f32)
            .collect();
        // keeps texts without keywords away from the zero vector
        vector.push(0.1);
        Ok(vector)
    }
}

fn config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.vocabulary = Vocabulary::new(["Disease", "Anatomy", "Drug"], ["AFFECTS", "TREATS"]).unwrap();
    config.index.dimension = KEYWORDS.len() + 1;
    config.retry.max_retries = 1;
    config.retry.initial_backoff_ms = 0;
    config.retry.max_backoff_ms = 0;
    config.concurrency.query_timeout_secs = 1;
    config
}

fn pipeline_with(config: PipelineConfig) -> (Pipeline, Arc<KeywordModel>) {
    let llm = Arc::new(KeywordModel::default());
    let graph: Arc<dyn GraphStore> = Arc::new(MemoryGraphStore::new());
    let vectors: Arc<dyn VectorStore> = Arc::new(MemoryVectorIndex::new(
        config.index.dimension,
        SimilarityMetric::Cosine,
    ));
    let services = Services {
        llm: llm.clone(),
        embedder: Arc::new(KeywordEmbedder),
        graph,
        vectors,
    };
    (Pipeline::new(config, services).unwrap(), llm)
}

#[tokio::test]
async fn test_lupus_document_end_to_end() {
    let (pipeline, _) = pipeline_with(config());

    let report = pipeline
        .ingest_document(&Document::from_text("lupus.txt", LUPUS))
        .await
        .unwrap();

    assert_eq!(report.chunks_total, 1);
    assert_eq!(report.chunks_indexed, 1);
    assert_eq!(report.nodes_written, 3);
    assert_eq!(report.relationships_written, 2);
    assert!(report.validation.is_clean());
    assert!(report.skipped.is_empty());

    let stats = pipeline.stats().await.unwrap();
    assert_eq!((stats.chunks, stats.entities, stats.relations, stats.vectors), (1, 3, 2, 1));

    let retrieval = pipeline
        .retrieve("How does lupus affect the kidneys?", RetrievalStrategy::GraphAugmented, 3)
        .await
        .unwrap();
    assert_eq!(retrieval.chunks[0].text, LUPUS);
    assert_eq!(
        retrieval.relationships,
        vec!["Lupus - AFFECTS -> kidneys", "steroids - TREATS -> Lupus"]
    );
    assert!(retrieval.context.contains("KEY RELATIONSHIPS:"));

    let outcome = pipeline
        .answer("How does lupus affect the kidneys?", RetrievalStrategy::Vector, 3)
        .await
        .unwrap();
    assert_eq!(outcome.answer.text, "Lupus can damage the kidneys.");
    assert_eq!(outcome.retrieval.context, LUPUS);
}

#[tokio::test]
async fn test_reingesting_is_idempotent() {
    let (pipeline, _) = pipeline_with(config());
    let document = Document::from_text("lupus.txt", LUPUS);

    let first = pipeline.ingest_document(&document).await.unwrap();
    let before = pipeline.stats().await.unwrap();
    let second = pipeline.ingest_document(&document).await.unwrap();
    let after = pipeline.stats().await.unwrap();

    assert_eq!(first.chunks_new, 1);
    assert_eq!(second.chunks_new, 0);
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_unparseable_chunk_is_skipped_after_retries() {
    let (pipeline, llm) = pipeline_with(config());

    let report = pipeline
        .ingest_document(&Document::from_text("bad.txt", "POISON in the heart"))
        .await
        .unwrap();

    assert_eq!(report.chunks_indexed, 0);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].stage, SkipStage::Extraction);
    assert_eq!(report.skipped[0].attempts, 2);
    assert_eq!(llm.extraction_calls.load(Ordering::SeqCst), 2);

    let snapshot = pipeline.metrics().snapshot();
    assert_eq!(snapshot.chunks_skipped, 1);
    assert_eq!(pipeline.stats().await.unwrap().chunks, 0);
}

#[tokio::test]
async fn test_labels_outside_vocabulary_are_dropped() {
    let (pipeline, _) = pipeline_with(config());

    let report = pipeline
        .ingest_document(&Document::from_text("covid.txt", "COVID can trigger Lupus flares."))
        .await
        .unwrap();

    assert_eq!(report.nodes_written, 1);
    assert_eq!(report.validation.dropped_nodes.len(), 1);
    assert_eq!(pipeline.stats().await.unwrap().entities, 1);
}

#[tokio::test]
async fn test_dropped_labels_are_reported_when_indexing_fails() {
    let (pipeline, _) = pipeline_with(config());

    let report = pipeline
        .ingest_document(&Document::from_text(
            "covid.txt",
            "COVID can trigger Lupus flares. UNEMBEDDABLE",
        ))
        .await
        .unwrap();

    assert_eq!(report.chunks_indexed, 0);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].stage, SkipStage::Indexing);
    assert_eq!(report.validation.dropped_nodes.len(), 1);
    assert_eq!(pipeline.metrics().snapshot().nodes_dropped, 1);
    assert_eq!(pipeline.stats().await.unwrap().entities, 0);
}

#[tokio::test]
async fn test_edited_document_keeps_indexed_text() {
    let (pipeline, _) = pipeline_with(config());
    let edited = LUPUS.replace("kidneys", "livers!");
    assert_eq!(edited.len(), LUPUS.len());

    pipeline
        .ingest_document(&Document::from_text("notes.txt", LUPUS))
        .await
        .unwrap();
    let report = pipeline
        .ingest_document(&Document::from_text("notes.txt", edited))
        .await
        .unwrap();

    assert_eq!(report.chunks_indexed, 0);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].stage, SkipStage::Indexing);

    let stats = pipeline.stats().await.unwrap();
    assert_eq!((stats.chunks, stats.vectors), (1, 1));
    let retrieval = pipeline
        .retrieve("lupus kidney", RetrievalStrategy::Vector, 1)
        .await
        .unwrap();
    assert_eq!(retrieval.chunks[0].text, LUPUS);
    assert!(retrieval.chunks[0].score > 0.6);
}

#[tokio::test]
async fn test_documents_ingest_in_parallel_and_independently() {
    let (pipeline, _) = pipeline_with(config());
    let documents = vec![
        Document::from_text("a.txt", LUPUS),
        Document::from_text("b.txt", "POISON"),
        Document::from_text("c.txt", "The heart pumps blood."),
        Document::from_text("d.txt", "Steroids are used when lupus affects the kidneys."),
    ];
    let ids: Vec<String> = documents.iter().map(|d| d.doc_id.clone()).collect();

    let results = pipeline.ingest_documents(documents).await;

    assert_eq!(results.len(), 4);
    let reports: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();
    let report_ids: Vec<String> = reports.iter().map(|r| r.doc_id.clone()).collect();
    assert_eq!(report_ids, ids);
    assert_eq!(reports[1].skipped.len(), 1);
    assert_eq!(reports[2].chunks_indexed, 1);

    let chunks = pipeline
        .retrieve("lupus", RetrievalStrategy::Vector, 5)
        .await
        .unwrap()
        .chunks;
    assert_eq!(chunks.len(), 3);
    assert!(chunks.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn test_long_document_is_chunked_with_overlap() {
    let mut config = config();
    config.chunking.chunk_size = 40;
    config.chunking.overlap = 10;
    let (pipeline, llm) = pipeline_with(config);
    let text = format!("{} {}", LUPUS, "The heart pumps blood through the body every day.");

    let report = pipeline
        .ingest_document(&Document::from_text("long.txt", text))
        .await
        .unwrap();

    assert_eq!(report.chunks_total, 4);
    assert_eq!(report.chunks_indexed, 4);
    assert_eq!(llm.extraction_calls.load(Ordering::SeqCst), 4);
    assert_eq!(pipeline.stats().await.unwrap().chunks, 4);
}

#[tokio::test]
async fn test_stalled_answer_times_out() {
    let (pipeline, _) = pipeline_with(config());
    pipeline
        .ingest_document(&Document::from_text("lupus.txt", LUPUS))
        .await
        .unwrap();

    let err = pipeline
        .answer("STALL on lupus", RetrievalStrategy::Vector, 3)
        .await
        .unwrap_err();

    assert!(matches!(err, QueryError::Timeout(_)));
    assert_eq!(pipeline.metrics().snapshot().failed_queries, 1);
}

#[tokio::test]
async fn test_ingests_files_from_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("lupus.txt"), LUPUS).unwrap();
    std::fs::write(dir.path().join("notes.md"), "# Heart\nThe heart pumps blood.").unwrap();
    std::fs::write(dir.path().join("scan.pdf"), "ignored").unwrap();

    let (pipeline, _) = pipeline_with(config());
    let documents = FileReader::read_directory(dir.path()).await.unwrap();
    assert_eq!(documents.len(), 2);

    for result in pipeline.ingest_documents(documents).await {
        result.unwrap();
    }

    let stats = pipeline.stats().await.unwrap();
    assert_eq!(stats.chunks, 2);
    assert_eq!(stats.vectors, 2);
}
