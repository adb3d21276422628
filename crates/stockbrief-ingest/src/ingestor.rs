use std::panic::{self, AssertUnwindSafe};

use stockbrief_models::artifact::{
    ArtifactKind, ArtifactWarning, ExtractedContent, ImageData, UploadedArtifact, XLSX_MIME,
    XLS_MIME,
};
use stockbrief_models::config::IngestConfig;
use tracing::{debug, warn};

use crate::budget::{truncate_text, CHARS_PER_TOKEN};
use crate::error::IngestError;
use crate::tabular::{summarize_csv, summarize_workbook};

const PDF_NO_TEXT: &str = "[PDF contained no extractable text. It may be image-based.]";

/// Result of ingesting a batch: usable content plus the artifacts that were dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestOutcome {
    pub contents: Vec<ExtractedContent>,
    pub warnings: Vec<ArtifactWarning>,
}

/// Turns uploaded files into bounded, prompt-ready text. Performs no I/O.
#[derive(Debug, Clone, Default)]
pub struct ArtifactIngestor {
    config: IngestConfig,
}

impl ArtifactIngestor {
    pub fn new(config: IngestConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Extract one artifact.
    pub fn ingest(&self, artifact: &UploadedArtifact) -> Result<ExtractedContent, IngestError> {
        let size = artifact.payload.len();
        if size > self.config.max_artifact_bytes {
            return Err(IngestError::Oversized {
                size,
                limit: self.config.max_artifact_bytes,
            });
        }
        if size == 0 {
            return Err(IngestError::Unsupported("empty payload".to_string()));
        }

        let content = match artifact.kind {
            ArtifactKind::Document => self.extract_document(artifact)?,
            ArtifactKind::Image => extract_image(artifact)?,
            ArtifactKind::Tabular => self.extract_tabular(artifact)?,
            ArtifactKind::Text => self.extract_text(artifact)?,
        };

        debug!(
            artifact = %artifact.name,
            kind = artifact.kind.as_str(),
            chars = content.text.len(),
            truncated = content.truncated,
            "Artifact ingested"
        );
        Ok(content)
    }

    /// Extract every artifact. Failures never abort the batch: the artifact is dropped
    /// and a warning recorded.
    pub fn ingest_all(&self, artifacts: &[UploadedArtifact]) -> IngestOutcome {
        let mut outcome = IngestOutcome::default();
        for artifact in artifacts {
            match self.ingest(artifact) {
                Ok(content) => outcome.contents.push(content),
                Err(e) => {
                    warn!(artifact = %artifact.name, error = %e, "Dropping artifact");
                    outcome.warnings.push(ArtifactWarning {
                        name: artifact.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        outcome
    }

    fn max_chars(&self) -> usize {
        self.config.max_document_tokens * CHARS_PER_TOKEN
    }

    fn bounded(&self, artifact: &UploadedArtifact, text: &str) -> ExtractedContent {
        let (text, truncated) = truncate_text(text, self.max_chars());
        ExtractedContent {
            name: artifact.name.clone(),
            kind: artifact.kind,
            text,
            truncated,
            image: None,
        }
    }

    fn extract_document(
        &self,
        artifact: &UploadedArtifact,
    ) -> Result<ExtractedContent, IngestError> {
        if artifact.mime_type != "application/pdf" {
            return Err(IngestError::Unsupported(format!(
                "document type {} is not supported",
                artifact.mime_type
            )));
        }
        if !artifact.payload.starts_with(b"%PDF-") {
            return Err(IngestError::Unsupported("payload is not a PDF".to_string()));
        }

        // pdf-extract panics on some malformed inputs instead of returning an error.
        let pages = panic::catch_unwind(AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem_by_pages(&artifact.payload)
        }))
        .map_err(|_| IngestError::Unsupported("PDF could not be parsed".to_string()))?
        .map_err(|e| IngestError::Unsupported(format!("PDF could not be parsed: {e}")))?;

        match join_pages(&pages) {
            Some(text) => Ok(self.bounded(artifact, &text)),
            None => Ok(self.bounded(artifact, PDF_NO_TEXT)),
        }
    }

    fn extract_tabular(
        &self,
        artifact: &UploadedArtifact,
    ) -> Result<ExtractedContent, IngestError> {
        let preview_rows = self.config.tabular_preview_rows;
        let summary = match artifact.mime_type.as_str() {
            "text/csv" | "application/csv" => summarize_csv(&artifact.payload, preview_rows)?,
            XLSX_MIME | XLS_MIME => summarize_workbook(&artifact.payload, preview_rows)?,
            other => {
                return Err(IngestError::Unsupported(format!(
                    "tabular type {other} is not supported"
                )))
            }
        };
        Ok(self.bounded(artifact, &summary))
    }

    fn extract_text(
        &self,
        artifact: &UploadedArtifact,
    ) -> Result<ExtractedContent, IngestError> {
        let text = std::str::from_utf8(&artifact.payload)
            .map_err(|e| IngestError::Unsupported(format!("text is not valid UTF-8: {e}")))?;
        Ok(self.bounded(artifact, text))
    }
}

/// Join per-page text under `--- Page N ---` headers, skipping blank pages.
/// Returns `None` when no page has text.
fn join_pages(pages: &[String]) -> Option<String> {
    let parts: Vec<String> = pages
        .iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(i, text)| format!("--- Page {} ---\n{}", i + 1, text.trim()))
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

fn extract_image(artifact: &UploadedArtifact) -> Result<ExtractedContent, IngestError> {
    let bytes = &artifact.payload;
    let signature_ok = match artifact.mime_type.as_str() {
        "image/png" => bytes.starts_with(b"\x89PNG\r\n\x1a\n"),
        "image/jpeg" => bytes.starts_with(&[0xFF, 0xD8, 0xFF]),
        "image/gif" => bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a"),
        "image/webp" => bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP",
        other => {
            return Err(IngestError::Unsupported(format!(
                "image type {other} is not supported"
            )))
        }
    };
    if !signature_ok {
        return Err(IngestError::Unsupported(format!(
            "payload is not a valid {}",
            artifact.mime_type
        )));
    }

    Ok(ExtractedContent {
        name: artifact.name.clone(),
        kind: ArtifactKind::Image,
        text: format!(
            "[image: {} ({}, {} bytes)]",
            artifact.name,
            artifact.mime_type,
            bytes.len()
        ),
        truncated: false,
        image: Some(ImageData {
            media_type: artifact.mime_type.clone(),
            data: bytes.clone(),
        }),
    })
}
