use std::ops::AddAssign;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifact::ArtifactWarning;
use crate::report_request::ChartConfig;
use crate::section::{Grade, SectionKind, SectionResult};

pub const REPORT_SCHEMA_VERSION: u32 = 1;

/// The finished report handed to the export step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub id: Uuid,
    pub schema_version: u32,
    pub ticker: String,
    pub company_name: String,
    pub chart: ChartConfig,
    /// Always seven entries, in canonical section order.
    pub sections: Vec<SectionResult>,
    pub status: ReportStatus,
    /// Letter grade of the technical section, if it produced one.
    pub grade: Option<Grade>,
    /// Artifacts that were dropped during ingestion.
    pub artifact_warnings: Vec<ArtifactWarning>,
    pub metadata: GenerationMetadata,
}

impl Report {
    pub fn section(&self, kind: SectionKind) -> Option<&SectionResult> {
        self.sections.iter().find(|s| s.kind == kind)
    }

    pub fn failed_sections(&self) -> impl Iterator<Item = &SectionResult> {
        self.sections.iter().filter(|s| s.is_failed())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Complete,
    /// At least one section failed.
    Partial,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationMetadata {
    pub generated_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Model calls beyond the first, summed over all sections.
    pub retry_count: u32,
    pub usage: TokenUsage,
}

/// Token counts reported by the model provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
    }
}
