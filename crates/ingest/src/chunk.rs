use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub doc_id: String,
    pub chunk_id: String,
    pub text: String,
    pub source: String,
    pub offset: (usize, usize), // [start, end) character positions
}

impl Chunk {
    pub fn new(
        doc_id: String,
        text: String,
        source: String,
        offset: (usize, usize),
    ) -> Self {
        let chunk_id = Self::generate_chunk_id(&doc_id, offset);

        Self {
            doc_id,
            chunk_id,
            text,
            source,
            offset,
        }
    }

    /// The id depends only on the document and the window position, so
    /// re-chunking a document reproduces the same ids.
    pub fn generate_chunk_id(doc_id: &str, offset: (usize, usize)) -> String {
        let mut hasher = Sha256::new();
        hasher.update(doc_id.as_bytes());
        hasher.update(b":");
        hasher.update(offset.0.to_string().as_bytes());
        hasher.update(b":");
        hasher.update(offset.1.to_string().as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16]) // Use first 16 bytes (32 hex chars)
    }

    pub fn char_len(&self) -> usize {
        self.offset.1 - self.offset.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_depends_on_document_and_offset() {
        let a = Chunk::new("doc".into(), "hello".into(), "a.txt".into(), (0, 5));
        let b = Chunk::new("doc".into(), "HELLO".into(), "b.txt".into(), (0, 5));
        let c = Chunk::new("doc".into(), "hello".into(), "a.txt".into(), (5, 10));
        let d = Chunk::new("other".into(), "hello".into(), "a.txt".into(), (0, 5));

        assert_eq!(a.chunk_id, b.chunk_id);
        assert_ne!(a.chunk_id, c.chunk_id);
        assert_ne!(a.chunk_id, d.chunk_id);
        assert_eq!(a.chunk_id.len(), 32);
    }
}
