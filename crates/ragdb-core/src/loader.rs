use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::Result;
use crate::types::Document;

const EXTENSIONS: &[&str] = &["txt", "md"];

/// Builds documents from a directory tree of plain-text files.
///
/// The doc id is the path relative to the root, so editing a file and loading
/// again re-ingests it in place. The parent directory becomes `category`
/// (`misc` for files at the root).
#[derive(Debug, Clone, Default)]
pub struct DocumentLoader {
    limit: Option<usize>,
}

impl DocumentLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn load_dir(&self, root: &Path) -> Result<Vec<Document>> {
        let mut files = list_text_files(root);
        if files.is_empty() {
            info!(root = %root.display(), "no text files found");
            return Ok(Vec::new());
        }
        if let Some(limit) = self.limit {
            if files.len() > limit {
                files.truncate(limit);
                info!(limit, "limited to first files");
            }
        }
        let mut docs = Vec::with_capacity(files.len());
        for path in &files {
            docs.push(load_file(root, path)?);
        }
        info!(count = docs.len(), root = %root.display(), "loaded documents");
        Ok(docs)
    }
}

fn load_file(root: &Path, path: &Path) -> Result<Document> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(_) => String::from_utf8_lossy(&fs::read(path)?).into_owned(),
    };
    let relative = path.strip_prefix(root).unwrap_or(path);
    let doc_id = relative.to_string_lossy().replace('\\', "/");
    let category = relative
        .parent()
        .and_then(|p| p.to_str())
        .filter(|p| !p.is_empty())
        .unwrap_or("misc")
        .to_string();
    let title = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let ext = path.extension().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    debug!(doc_id, bytes = text.len(), "read file");
    Ok(Document::new(doc_id, path.to_string_lossy(), text)
        .with_metadata("category", category)
        .with_metadata("title", title)
        .with_metadata("ext", ext))
}

fn list_text_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().and_then(|s| s.to_str()).is_some_and(|ext| EXTENSIONS.contains(&ext)))
        .collect();
    files.sort();
    files
}
