use std::fmt;

use serde::{Deserialize, Serialize};

use crate::report::TokenUsage;

/// The seven fixed report sections. Declaration order is the canonical report order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Overview,
    Financials,
    Competitive,
    Sentiment,
    Technical,
    Supplemental,
    Synthesis,
}

impl SectionKind {
    /// All sections in canonical order.
    pub const ALL: [SectionKind; 7] = [
        SectionKind::Overview,
        SectionKind::Financials,
        SectionKind::Competitive,
        SectionKind::Sentiment,
        SectionKind::Technical,
        SectionKind::Supplemental,
        SectionKind::Synthesis,
    ];

    /// The sections synthesis waits on.
    pub const INDEPENDENT: [SectionKind; 6] = [
        SectionKind::Overview,
        SectionKind::Financials,
        SectionKind::Competitive,
        SectionKind::Sentiment,
        SectionKind::Technical,
        SectionKind::Supplemental,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Overview => "overview",
            Self::Financials => "financials",
            Self::Competitive => "competitive",
            Self::Sentiment => "sentiment",
            Self::Technical => "technical",
            Self::Supplemental => "supplemental",
            Self::Synthesis => "synthesis",
        }
    }

    /// Human-readable section heading.
    pub fn title(&self) -> &'static str {
        match self {
            Self::Overview => "Company Overview",
            Self::Financials => "Financial Health",
            Self::Competitive => "Competitive Positioning",
            Self::Sentiment => "Sentiment & News",
            Self::Technical => "Technical Analysis",
            Self::Supplemental => "Supplemental Analysis",
            Self::Synthesis => "Summary & Key Considerations",
        }
    }

    /// Position in the canonical order.
    pub fn position(&self) -> usize {
        *self as usize
    }

    pub fn dependencies(&self) -> &'static [SectionKind] {
        match self {
            Self::Synthesis => &Self::INDEPENDENT,
            _ => &[],
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling description of one section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SectionSpec {
    pub kind: SectionKind,
    pub depends_on: Vec<SectionKind>,
    /// Identifier of the prompt template used to build this section's request.
    pub template: String,
}

impl SectionSpec {
    pub fn for_kind(kind: SectionKind) -> Self {
        Self {
            kind,
            depends_on: kind.dependencies().to_vec(),
            template: format!("{}.v1", kind.as_str()),
        }
    }

    /// Specs for every section, in canonical order.
    pub fn all() -> Vec<SectionSpec> {
        SectionKind::ALL.iter().copied().map(Self::for_kind).collect()
    }
}

/// Technical-analysis letter grade.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn from_letter(letter: char) -> Option<Self> {
        match letter.to_ascii_uppercase() {
            'A' => Some(Self::A),
            'B' => Some(Self::B),
            'C' => Some(Self::C),
            'D' => Some(Self::D),
            'F' => Some(Self::F),
            _ => None,
        }
    }

    pub fn letter(&self) -> char {
        match self {
            Self::A => 'A',
            Self::B => 'B',
            Self::C => 'C',
            Self::D => 'D',
            Self::F => 'F',
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    Success,
    /// Content was produced but is known to be incomplete (e.g. cut at the token limit).
    Partial,
    Failed,
}

/// Terminal outcome of one section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SectionResult {
    pub kind: SectionKind,
    pub status: SectionStatus,
    pub content: String,
    pub grade: Option<Grade>,
    pub error: Option<String>,
    /// Model calls made for this section, including retries.
    pub attempts: u32,
    pub usage: TokenUsage,
    pub elapsed_ms: u64,
}

impl SectionResult {
    pub fn success(kind: SectionKind, content: String) -> Self {
        Self {
            kind,
            status: SectionStatus::Success,
            content,
            grade: None,
            error: None,
            attempts: 0,
            usage: TokenUsage::default(),
            elapsed_ms: 0,
        }
    }

    pub fn failed(kind: SectionKind, error: impl Into<String>) -> Self {
        Self {
            kind,
            status: SectionStatus::Failed,
            content: String::new(),
            grade: None,
            error: Some(error.into()),
            attempts: 0,
            usage: TokenUsage::default(),
            elapsed_ms: 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == SectionStatus::Failed
    }

    /// Text handed to dependent sections: the content, or a placeholder naming the failure.
    pub fn dependency_text(&self) -> String {
        match self.status {
            SectionStatus::Failed => format!(
                "[{} unavailable: {}]",
                self.kind.title(),
                self.error.as_deref().unwrap_or("unknown error")
            ),
            _ => self.content.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_positions_follow_declaration() {
        for (i, kind) in SectionKind::ALL.iter().enumerate() {
            assert_eq!(kind.position(), i);
        }
        assert_eq!(SectionKind::ALL.last(), Some(&SectionKind::Synthesis));
    }

    #[test]
    fn synthesis_depends_on_the_other_six() {
        let deps = SectionKind::Synthesis.dependencies();
        assert_eq!(deps.len(), 6);
        assert!(!deps.contains(&SectionKind::Synthesis));
        for kind in SectionKind::INDEPENDENT {
            assert!(kind.dependencies().is_empty());
            assert!(deps.contains(&kind));
        }
    }

    #[test]
    fn specs_cover_all_sections() {
        let specs = SectionSpec::all();
        assert_eq!(specs.len(), 7);
        assert_eq!(specs[4].template, "technical.v1");
        assert_eq!(specs[6].depends_on.len(), 6);
    }

    #[test]
    fn grade_letters() {
        assert_eq!(Grade::from_letter('b'), Some(Grade::B));
        assert_eq!(Grade::from_letter('E'), None);
        assert_eq!(Grade::F.to_string(), "F");
    }

    #[test]
    fn failed_dependency_text_is_placeholder() {
        let failed = SectionResult::failed(SectionKind::Sentiment, "rate limited after 3 attempts");
        assert_eq!(
            failed.dependency_text(),
            "[Sentiment & News unavailable: rate limited after 3 attempts]"
        );
        let ok = SectionResult::success(SectionKind::Overview, "Acme makes anvils.".to_string());
        assert_eq!(ok.dependency_text(), "Acme makes anvils.");
    }
}
