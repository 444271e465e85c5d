use anyhow::{Context, Result, bail};
use extract::OllamaClient;
use index::{
    EmbeddingClient, GraphStore, MemoryGraphStore, MemoryVectorIndex, Neo4jGraphStore,
    QdrantVectorStore, VectorStore,
};
use pipeline::{PipelineConfig, Services};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphBackend {
    Memory,
    Neo4j,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorBackend {
    Memory,
    Qdrant,
}

/// Service endpoints, read from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: String,
    pub config_path: Option<String>,
    pub ollama_url: String,
    pub llm_model: String,
    pub embedding_model: String,
    pub graph_backend: GraphBackend,
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub vector_backend: VectorBackend,
    pub qdrant_url: String,
    pub qdrant_collection: String,
}

/// Qdrant outlives the process, so it needs a graph store that does too.
fn check_backends(graph: GraphBackend, vectors: VectorBackend) -> Result<()> {
    if graph == GraphBackend::Memory && vectors == VectorBackend::Qdrant {
        bail!("VECTOR_BACKEND=qdrant requires GRAPH_BACKEND=neo4j");
    }
    Ok(())
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let graph_backend = match env_or("GRAPH_BACKEND", "memory").as_str() {
            "memory" => GraphBackend::Memory,
            "neo4j" => GraphBackend::Neo4j,
            other => bail!("Unknown GRAPH_BACKEND '{}', expected memory or neo4j", other),
        };
        let vector_backend = match env_or("VECTOR_BACKEND", "memory").as_str() {
            "memory" => VectorBackend::Memory,
            "qdrant" => VectorBackend::Qdrant,
            other => bail!("Unknown VECTOR_BACKEND '{}', expected memory or qdrant", other),
        };
        check_backends(graph_backend, vector_backend)?;

        Ok(Self {
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:3000"),
            config_path: std::env::var("PIPELINE_CONFIG").ok(),
            ollama_url: env_or("OLLAMA_URL", "http://localhost:11434"),
            llm_model: env_or("LLM_MODEL", "llama3"),
            embedding_model: env_or("EMBEDDING_MODEL", "nomic-embed-text"),
            graph_backend,
            neo4j_uri: env_or("NEO4J_URI", "bolt://localhost:7687"),
            neo4j_user: env_or("NEO4J_USER", "neo4j"),
            neo4j_password: env_or("NEO4J_PASSWORD", "neo4j"),
            vector_backend,
            qdrant_url: env_or("QDRANT_URL", "http://localhost:6333"),
            qdrant_collection: env_or("QDRANT_COLLECTION", "graphrag_chunks"),
        })
    }

    pub fn load_pipeline_config(&self) -> Result<PipelineConfig> {
        match &self.config_path {
            Some(path) => PipelineConfig::from_json_file(path),
            None => {
                info!("PIPELINE_CONFIG not set, using defaults");
                Ok(PipelineConfig::default())
            }
        }
    }

    /// Connects the configured backends and prepares their schemas.
    pub async fn connect(&self, config: &PipelineConfig) -> Result<Services> {
        let llm = Arc::new(OllamaClient::new(self.ollama_url.clone(), self.llm_model.clone()));
        let embedder = Arc::new(EmbeddingClient::new(
            self.ollama_url.clone(),
            self.embedding_model.clone(),
        ));

        match embedder.get_dimension().await {
            Ok(dimension) if dimension != config.index.dimension => bail!(
                "Embedding model {} produces {}-dimensional vectors but index.dimension is {}",
                self.embedding_model,
                dimension,
                config.index.dimension
            ),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Could not probe embedding dimension"),
        }

        let graph: Arc<dyn GraphStore> = match self.graph_backend {
            GraphBackend::Memory => Arc::new(MemoryGraphStore::new()),
            GraphBackend::Neo4j => {
                let store = Neo4jGraphStore::connect(
                    &self.neo4j_uri,
                    &self.neo4j_user,
                    &self.neo4j_password,
                )
                .await
                .context("Failed to connect to Neo4j")?;
                store
                    .init_schema()
                    .await
                    .context("Failed to initialize Neo4j schema")?;
                Arc::new(store)
            }
        };

        let vectors: Arc<dyn VectorStore> = match self.vector_backend {
            VectorBackend::Memory => Arc::new(MemoryVectorIndex::new(
                config.index.dimension,
                config.index.metric,
            )),
            VectorBackend::Qdrant => {
                let store = QdrantVectorStore::new(
                    self.qdrant_url.clone(),
                    self.qdrant_collection.clone(),
                    config.index.dimension,
                    config.index.metric,
                );
                store
                    .init_collection()
                    .await
                    .context("Failed to initialize Qdrant collection")?;
                Arc::new(store)
            }
        };

        info!(
            graph = ?self.graph_backend,
            vectors = ?self.vector_backend,
            llm = %llm.model(),
            embedding_model = %self.embedding_model,
            "Services connected"
        );

        Ok(Services {
            llm,
            embedder,
            graph,
            vectors,
        })
    }
}
