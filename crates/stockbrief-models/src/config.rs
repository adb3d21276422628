use serde::{Deserialize, Serialize};

use crate::section::SectionKind;

/// Top-level configuration for stockbrief.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StockbriefConfig {
    pub gateway: GatewayConfig,
    pub ingest: IngestConfig,
    pub pipeline: PipelineConfig,
}

/// Configuration for the model gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL of the Messages API (without the `/messages` suffix).
    pub api_base: String,
    /// Environment variable holding the provider API key.
    pub api_key_env: String,
    /// Default model for every section.
    pub model: String,
    pub temperature: f32,
    /// Per-attempt request timeout in seconds.
    pub request_timeout_seconds: u64,
    /// Maximum number of model requests in flight at once. Extra requests queue.
    pub max_in_flight: usize,
    /// Request starts allowed per minute. `None` disables pacing.
    pub requests_per_minute: Option<u32>,
    pub retry: RetryConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.anthropic.com/v1".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            temperature: 0.3,
            request_timeout_seconds: 90,
            max_in_flight: 3,
            requests_per_minute: Some(20),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry policy for transient model failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Jitter added to each delay as a fraction of it, in `[0.0, 1.0]`.
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter_ratio: 0.25,
        }
    }
}

/// Limits applied to uploaded artifacts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    pub max_artifact_bytes: usize,
    /// Token budget for extracted document and text content (4 chars per token).
    pub max_document_tokens: usize,
    /// Rows shown from each end of a tabular artifact.
    pub tabular_preview_rows: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_artifact_bytes: 20 * 1024 * 1024,
            max_document_tokens: 4_000,
            tabular_preview_rows: 5,
        }
    }
}

/// Configuration for the section pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Deadline for the whole report in seconds.
    pub total_timeout_seconds: u64,
    /// Per-section overrides.
    pub sections: Vec<SectionConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            total_timeout_seconds: 600,
            sections: Vec::new(),
        }
    }
}

impl PipelineConfig {
    pub fn section(&self, kind: SectionKind) -> Option<&SectionConfig> {
        self.sections.iter().find(|s| s.kind == kind)
    }
}

/// Override for a single section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SectionConfig {
    pub kind: SectionKind,
    /// Falls back to `GatewayConfig::model`.
    pub model: Option<String>,
    /// Falls back to the template's own output target.
    pub max_tokens: Option<u32>,
}
