use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use stockbrief_models::artifact::ArtifactWarning;
use stockbrief_models::report::{
    GenerationMetadata, Report, ReportStatus, TokenUsage, REPORT_SCHEMA_VERSION,
};
use stockbrief_models::report_request::ReportRequest;
use stockbrief_models::section::{SectionKind, SectionResult};
use tracing::warn;
use uuid::Uuid;

pub const NOT_EXECUTED: &str = "section was not executed";

/// Merge section results into a report. Results may arrive in any order; the report
/// always lists all seven sections in canonical order.
pub fn assemble(
    request: &ReportRequest,
    results: Vec<SectionResult>,
    artifact_warnings: Vec<ArtifactWarning>,
    generated_at: DateTime<Utc>,
    duration: Duration,
) -> Report {
    let mut by_kind: BTreeMap<SectionKind, SectionResult> = BTreeMap::new();
    for result in results {
        if by_kind.contains_key(&result.kind) {
            warn!(section = %result.kind, "Duplicate section result ignored");
            continue;
        }
        by_kind.insert(result.kind, result);
    }

    let sections: Vec<SectionResult> = SectionKind::ALL
        .iter()
        .map(|kind| {
            by_kind
                .remove(kind)
                .unwrap_or_else(|| SectionResult::failed(*kind, NOT_EXECUTED))
        })
        .collect();

    let status = if sections.iter().any(SectionResult::is_failed) {
        ReportStatus::Partial
    } else {
        ReportStatus::Complete
    };

    let mut usage = TokenUsage::default();
    let mut retry_count = 0;
    for section in &sections {
        usage += section.usage;
        retry_count += section.attempts.saturating_sub(1);
    }

    let grade = sections
        .iter()
        .find(|s| s.kind == SectionKind::Technical && !s.is_failed())
        .and_then(|s| s.grade);

    Report {
        id: Uuid::new_v4(),
        schema_version: REPORT_SCHEMA_VERSION,
        ticker: request.ticker().to_string(),
        company_name: request.company_name().to_string(),
        chart: request.chart().clone(),
        sections,
        status,
        grade,
        artifact_warnings,
        metadata: GenerationMetadata {
            generated_at,
            duration_ms: duration.as_millis() as u64,
            retry_count,
            usage,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_request;
    use stockbrief_models::section::{Grade, SectionStatus};

    fn ok(kind: SectionKind, attempts: u32) -> SectionResult {
        let mut result = SectionResult::success(kind, format!("{kind} text"));
        result.attempts = attempts;
        result.usage = TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
        };
        result
    }

    #[test]
    fn reorders_into_canonical_order() {
        let mut results: Vec<SectionResult> =
            SectionKind::ALL.iter().map(|k| ok(*k, 1)).collect();
        results.reverse();

        let report = assemble(
            &sample_request("ACME"),
            results,
            vec![],
            Utc::now(),
            Duration::from_millis(1500),
        );
        let kinds: Vec<SectionKind> = report.sections.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, SectionKind::ALL.to_vec());
        assert_eq!(report.status, ReportStatus::Complete);
        assert_eq!(report.metadata.duration_ms, 1500);
        assert_eq!(report.metadata.usage.total(), 105);
        assert_eq!(report.ticker, "ACME");
    }

    #[test]
    fn missing_section_becomes_failed() {
        let results = vec![ok(SectionKind::Overview, 1), ok(SectionKind::Synthesis, 1)];
        let report = assemble(&sample_request("ACME"), results, vec![], Utc::now(), Duration::ZERO);
        assert_eq!(report.sections.len(), 7);
        assert_eq!(report.status, ReportStatus::Partial);
        let technical = report.section(SectionKind::Technical).unwrap();
        assert_eq!(technical.status, SectionStatus::Failed);
        assert_eq!(technical.error.as_deref(), Some(NOT_EXECUTED));
    }

    #[test]
    fn retry_count_sums_extra_attempts() {
        let mut results: Vec<SectionResult> =
            SectionKind::ALL.iter().map(|k| ok(*k, 1)).collect();
        results[1].attempts = 3;
        results[3].attempts = 2;
        // sections that never called the model
        results[5].attempts = 0;
        let report = assemble(&sample_request("ACME"), results, vec![], Utc::now(), Duration::ZERO);
        assert_eq!(report.metadata.retry_count, 3);
    }

    #[test]
    fn partial_section_keeps_report_complete() {
        let mut results: Vec<SectionResult> =
            SectionKind::ALL.iter().map(|k| ok(*k, 1)).collect();
        results[0].status = SectionStatus::Partial;
        let report = assemble(&sample_request("ACME"), results, vec![], Utc::now(), Duration::ZERO);
        assert_eq!(report.status, ReportStatus::Complete);
    }

    #[test]
    fn grade_taken_from_technical_section() {
        let mut results: Vec<SectionResult> =
            SectionKind::ALL.iter().map(|k| ok(*k, 1)).collect();
        results[4].grade = Some(Grade::B);
        let report = assemble(&sample_request("ACME"), results, vec![], Utc::now(), Duration::ZERO);
        assert_eq!(report.grade, Some(Grade::B));
    }

    #[test]
    fn duplicate_results_keep_first() {
        let mut results: Vec<SectionResult> =
            SectionKind::ALL.iter().map(|k| ok(*k, 1)).collect();
        results.push(SectionResult::failed(SectionKind::Overview, "late duplicate"));
        let report = assemble(&sample_request("ACME"), results, vec![], Utc::now(), Duration::ZERO);
        assert_eq!(report.sections.len(), 7);
        assert!(!report.section(SectionKind::Overview).unwrap().is_failed());
    }
}
