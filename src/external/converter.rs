use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::external::error::ExternalError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Executable invoked as `<command> <pdf> --to md --output <dir>`
    pub command: String,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            command: "docling".to_string(),
        }
    }
}

/// Turns a PDF into a markdown file
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    async fn convert(&self, pdf: &Path, output: &Path) -> Result<(), ExternalError>;
}

/// Converter backed by an external command line tool
pub struct CommandConverter {
    config: ConverterConfig,
}

impl CommandConverter {
    pub fn new(config: ConverterConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl DocumentConverter for CommandConverter {
    async fn convert(&self, pdf: &Path, output: &Path) -> Result<(), ExternalError> {
        let output_dir = output.parent().unwrap_or_else(|| Path::new("."));
        let result = Command::new(&self.config.command)
            .arg(pdf)
            .args(["--to", "md", "--output"])
            .arg(output_dir)
            .output()
            .await
            .map_err(|e| {
                ExternalError::ConversionError(format!(
                    "failed to run {}: {}",
                    self.config.command, e
                ))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(ExternalError::ConversionError(format!(
                "{} exited with {}: {}",
                self.config.command,
                result.status,
                stderr.trim()
            )));
        }

        if !output.exists() {
            return Err(ExternalError::ConversionError(format!(
                "{} produced no {}",
                self.config.command,
                output.display()
            )));
        }
        Ok(())
    }
}

/// Outcome of a conversion pass over a directory
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ConversionReport {
    pub converted: Vec<PathBuf>,
    /// PDFs skipped because a markdown file already sits next to them
    pub existing: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Convert every PDF in `dir` that has no markdown sibling yet.
///
/// Failures are collected in the report; the pass continues with the next file.
pub async fn convert_new_pdfs(
    dir: &Path,
    converter: &dyn DocumentConverter,
) -> Result<ConversionReport> {
    if !dir.is_dir() {
        anyhow::bail!("Directory {} does not exist", dir.display());
    }

    let mut pdfs: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("pdf"))
                .unwrap_or(false)
        })
        .collect();
    pdfs.sort();

    let mut report = ConversionReport::default();
    for pdf in pdfs {
        let markdown = pdf.with_extension("md");
        if markdown.exists() {
            report.existing.push(pdf);
            continue;
        }

        info!("Converting {}", pdf.display());
        match converter.convert(&pdf, &markdown).await {
            Ok(()) => report.converted.push(markdown),
            Err(e) => {
                warn!("Conversion of {} failed: {}", pdf.display(), e);
                report.failed.push((pdf, e.to_string()));
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use predicates::prelude::*;
    use std::sync::Mutex;

    /// Writes a stub markdown file, or fails for names containing "broken"
    #[derive(Default)]
    struct FakeConverter {
        calls: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl DocumentConverter for FakeConverter {
        async fn convert(&self, pdf: &Path, output: &Path) -> Result<(), ExternalError> {
            self.calls.lock().unwrap().push(pdf.to_path_buf());
            if pdf.to_string_lossy().contains("broken") {
                return Err(ExternalError::ConversionError("unreadable pdf".to_string()));
            }
            std::fs::write(output, "# Converted\n\nBody.").unwrap();
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_converts_only_new_pdfs() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("lecture1.pdf").write_binary(b"%PDF-1.4").unwrap();
        temp.child("lecture2.pdf").write_binary(b"%PDF-1.4").unwrap();
        temp.child("lecture2.md").write_str("# Already converted").unwrap();
        temp.child("broken.pdf").write_binary(b"garbage").unwrap();
        temp.child("notes.txt").write_str("not a pdf").unwrap();

        let converter = FakeConverter::default();
        let report = convert_new_pdfs(temp.path(), &converter).await.unwrap();

        assert_eq!(report.converted, vec![temp.path().join("lecture1.md")]);
        assert_eq!(report.existing, vec![temp.path().join("lecture2.pdf")]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, temp.path().join("broken.pdf"));
        assert_eq!(converter.calls.lock().unwrap().len(), 2);

        temp.child("lecture1.md")
            .assert(predicate::str::contains("Converted"));
        temp.child("lecture2.md")
            .assert(predicate::str::contains("Already converted"));
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let temp = assert_fs::TempDir::new().unwrap();
        let converter = FakeConverter::default();

        let result = convert_new_pdfs(&temp.path().join("missing"), &converter).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_command_converter_reports_missing_tool() {
        let temp = assert_fs::TempDir::new().unwrap();
        let pdf = temp.child("doc.pdf");
        pdf.write_binary(b"%PDF-1.4").unwrap();

        let converter = CommandConverter::new(ConverterConfig {
            command: "definitely-not-an-installed-converter".to_string(),
        });
        let err = converter
            .convert(pdf.path(), &temp.path().join("doc.md"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExternalError::ConversionError(_)));
    }
}
