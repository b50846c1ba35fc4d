use anyhow::Result;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

const EXTENSIONS: &[&str] = &["md", "markdown", "txt"];

/// A converted document ready for chunking
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Path relative to the corpus root, `/`-separated
    pub id: String,
    pub content: String,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
        }
    }

    /// True for `.md` and `.markdown` files
    pub fn is_markdown(&self) -> bool {
        Path::new(&self.id)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("markdown"))
            .unwrap_or(false)
    }
}

/// Load every markdown and text file under `dir`, sorted by id.
///
/// Unreadable files are logged and skipped.
pub fn load_corpus(dir: &Path) -> Result<Vec<Document>> {
    if !dir.is_dir() {
        anyhow::bail!("Corpus directory {} does not exist", dir.display());
    }

    let mut documents = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        if !EXTENSIONS.contains(&extension.as_str()) {
            continue;
        }

        let relative = path.strip_prefix(dir).unwrap_or(path);
        let id = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        match fs::read_to_string(path) {
            Ok(content) => {
                debug!("Loaded {}", id);
                documents.push(Document::new(id, content));
            }
            Err(e) => warn!("Skipping unreadable file {}: {}", path.display(), e),
        }
    }

    documents.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(documents)
}
