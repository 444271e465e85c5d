pub mod chunk;
pub mod chunker;
pub mod reader;

pub use chunk::Chunk;
pub use chunker::{Chunker, ChunkerConfig, ChunkerError, Chunks};
pub use reader::FileReader;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Plain text of one source document plus its identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub source: String,
    pub text: String,
}

impl Document {
    /// Builds a document whose id is derived from `source`.
    pub fn from_text(source: impl Into<String>, text: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            doc_id: generate_doc_id(&source),
            source,
            text: text.into(),
        }
    }
}

/// Generate a stable document ID from file path
pub fn generate_doc_id(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}
