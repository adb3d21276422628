use std::path::Path;

use serde::{Deserialize, Serialize};

/// Broad category of an uploaded file. Decides how the ingestor extracts it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Document,
    Image,
    Tabular,
    Text,
}

impl ArtifactKind {
    /// Infer the kind from a file extension (case-insensitive, without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Document),
            "png" | "jpg" | "jpeg" | "gif" | "webp" => Some(Self::Image),
            "csv" | "xlsx" | "xls" => Some(Self::Tabular),
            "txt" | "md" => Some(Self::Text),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Image => "image",
            Self::Tabular => "tabular",
            Self::Text => "text",
        }
    }
}

pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const XLS_MIME: &str = "application/vnd.ms-excel";

/// Declared mime type for a file extension, falling back to `application/octet-stream`.
pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "csv" => "text/csv",
        "xlsx" => XLSX_MIME,
        "xls" => XLS_MIME,
        "txt" => "text/plain",
        "md" => "text/markdown",
        _ => "application/octet-stream",
    }
}

/// A user-supplied file. Lives for one request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadedArtifact {
    pub name: String,
    pub kind: ArtifactKind,
    pub mime_type: String,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

impl UploadedArtifact {
    pub fn new(
        name: impl Into<String>,
        kind: ArtifactKind,
        mime_type: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            mime_type: mime_type.into(),
            payload,
        }
    }

    /// Build an artifact from a file name, inferring kind and mime type from its extension.
    /// Returns `None` for extensions that have no supported kind.
    pub fn from_file_name(name: &str, payload: Vec<u8>) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?;
        let kind = ArtifactKind::from_extension(ext)?;
        Some(Self::new(name, kind, mime_for_extension(ext), payload))
    }
}

/// Raw image bytes kept alongside the placeholder text so the model can see the image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageData {
    pub media_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Bounded prompt-ready content produced from one artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedContent {
    pub name: String,
    pub kind: ArtifactKind,
    pub text: String,
    /// True when `text` was cut to fit the token budget.
    pub truncated: bool,
    pub image: Option<ImageData>,
}

/// Why an artifact was left out of the report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactWarning {
    pub name: String,
    pub reason: String,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
