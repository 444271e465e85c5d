use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;

use crate::{Document, generate_doc_id};

const SUPPORTED_EXTENSIONS: [&str; 2] = ["txt", "md"];

/// Reads plain-text documents. Binary formats (PDF etc.) are converted to
/// text upstream and handed in as [`Document`]s directly.
pub struct FileReader;

impl FileReader {
    pub async fn read_file(path: &Path) -> Result<Document> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        if !SUPPORTED_EXTENSIONS.contains(&extension) {
            anyhow::bail!("Unsupported file format: {}", extension);
        }

        let text = fs::read_to_string(path)
            .await
            .context(format!("Failed to read file: {:?}", path))?;
        let source = path.to_string_lossy().to_string();

        Ok(Document {
            doc_id: generate_doc_id(&source),
            source,
            text,
        })
    }

    /// Reads every supported file directly under `dir`, sorted by path.
    pub async fn read_directory(dir: &Path) -> Result<Vec<Document>> {
        let mut paths = Vec::new();

        let mut entries = fs::read_dir(dir)
            .await
            .context(format!("Failed to read directory: {:?}", dir))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let supported = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext));

            if path.is_file() && supported {
                paths.push(path);
            }
        }

        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            documents.push(Self::read_file(&path).await?);
        }

        Ok(documents)
    }
}
