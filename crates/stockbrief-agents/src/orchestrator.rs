use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use stockbrief_ingest::ArtifactIngestor;
use stockbrief_models::config::PipelineConfig;
use stockbrief_models::report::Report;
use stockbrief_models::report_request::ReportRequest;
use stockbrief_models::section::{Grade, SectionKind, SectionResult, SectionSpec, SectionStatus};
use stockbrief_models::snapshot::FinancialSnapshot;
use tokio::task::{self, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::assembler::assemble;
use crate::error::{DataUnavailable, GatewayError, PipelineError};
use crate::gateway::{LlmGateway, StopReason};
use crate::parser::extract_grade;
use crate::prompts::{PromptCatalog, PromptContext, NO_SUPPLEMENTAL};
use crate::rubric::{self, TechnicalIndicators};
use crate::source::SnapshotSource;

pub const DEADLINE_EXCEEDED: &str = "report deadline exceeded";
pub const RUN_CANCELLED: &str = "report run cancelled";

/// Everything a section task needs. Cloned into each spawned task.
#[derive(Clone)]
struct SectionRunner {
    catalog: Arc<PromptCatalog>,
    gateway: Arc<LlmGateway>,
    cancel: CancellationToken,
    deadline: Instant,
    request_timeout: Duration,
}

/// Schedules sections by dependency and hands their results to the assembler.
pub struct Orchestrator {
    specs: Vec<SectionSpec>,
    catalog: Arc<PromptCatalog>,
    gateway: Arc<LlmGateway>,
    ingestor: ArtifactIngestor,
    config: PipelineConfig,
    request_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        catalog: PromptCatalog,
        gateway: Arc<LlmGateway>,
        ingestor: ArtifactIngestor,
        config: PipelineConfig,
        request_timeout: Duration,
    ) -> Self {
        Self {
            specs: SectionSpec::all(),
            catalog: Arc::new(catalog),
            gateway,
            ingestor,
            config,
            request_timeout,
        }
    }

    /// Replace the section plan. Sections whose dependencies never complete are
    /// reported as not executed.
    pub fn with_specs(mut self, specs: Vec<SectionSpec>) -> Self {
        self.specs = specs;
        self
    }

    /// Deadline for a run starting now, from `total_timeout_seconds`.
    pub fn default_deadline(&self) -> Instant {
        Instant::now() + Duration::from_secs(self.config.total_timeout_seconds)
    }

    /// Fetch the snapshot for `request` and run the pipeline with the configured deadline.
    pub async fn generate(
        &self,
        request: &ReportRequest,
        source: &dyn SnapshotSource,
    ) -> Result<Report, PipelineError> {
        let deadline = self.default_deadline();
        let snapshot = source.fetch(request.ticker()).await?;
        self.run(request, snapshot, deadline).await
    }

    /// Produce a report. Section failures degrade the report to partial; only a bad
    /// snapshot or rejected credentials fail the run.
    pub async fn run(
        &self,
        request: &ReportRequest,
        snapshot: FinancialSnapshot,
        deadline: Instant,
    ) -> Result<Report, PipelineError> {
        let start = Instant::now();
        let generated_at = Utc::now();
        info!(ticker = %request.ticker(), artifacts = request.artifacts().len(), "Starting report");

        if !snapshot.ticker.eq_ignore_ascii_case(request.ticker()) {
            return Err(DataUnavailable {
                ticker: request.ticker().to_string(),
                reason: format!("snapshot is for {}", snapshot.ticker),
            }
            .into());
        }

        // 1. Ingest artifacts; failures only produce warnings
        let ingested = self.ingestor.ingest_all(request.artifacts());
        let ctx = PromptContext::new(
            request,
            Arc::new(snapshot),
            Arc::new(ingested.contents),
        );

        let runner = SectionRunner {
            catalog: Arc::clone(&self.catalog),
            gateway: Arc::clone(&self.gateway),
            cancel: CancellationToken::new(),
            deadline,
            request_timeout: self.request_timeout,
        };

        // 2. Schedule by dependency: a section starts once every section it depends
        //    on is terminal. Dropping the set aborts whatever is still running.
        let mut pending = self.specs.clone();
        let mut finished: BTreeMap<SectionKind, SectionResult> = BTreeMap::new();
        let mut tasks = JoinSet::new();
        let mut running: HashMap<task::Id, SectionKind> = HashMap::new();

        loop {
            let (ready, blocked): (Vec<SectionSpec>, Vec<SectionSpec>) = pending
                .into_iter()
                .partition(|spec| {
                    spec.depends_on.iter().all(|dep| finished.contains_key(dep))
                });
            pending = blocked;

            for spec in ready {
                let section_ctx = if spec.depends_on.is_empty() {
                    ctx.clone()
                } else {
                    ctx.clone().with_predecessors(predecessor_texts(&spec, &finished))
                };
                let runner = runner.clone();
                let kind = spec.kind;
                let handle =
                    tasks.spawn(async move { runner.run(&spec, &section_ctx).await });
                running.insert(handle.id(), kind);
            }

            // 3. Collect results (graceful degradation)
            let Some(joined) = tasks.join_next().await else {
                break;
            };
            match joined {
                Ok(Ok(result)) => {
                    finished.insert(result.kind, result);
                }
                Ok(Err(SectionAbort::Auth(message))) => {
                    error!(
                        ticker = %request.ticker(),
                        "Model provider rejected credentials, aborting run"
                    );
                    return Err(PipelineError::Auth(message));
                }
                Err(e) => {
                    let Some(kind) = running.get(&e.id()).copied() else {
                        error!(error = %e, "Unknown section task failed");
                        continue;
                    };
                    error!(section = %kind, error = %e, "Section task panicked");
                    let result = SectionResult::failed(kind, format!("section task failed: {e}"));
                    finished.insert(kind, result);
                }
            }
        }

        for spec in &pending {
            warn!(
                section = %spec.kind,
                depends_on = ?spec.depends_on,
                "Section dependencies never completed"
            );
        }

        let report = assemble(
            request,
            finished.into_values().collect(),
            ingested.warnings,
            generated_at,
            start.elapsed(),
        );
        info!(
            ticker = %report.ticker,
            status = ?report.status,
            failed = report.failed_sections().count(),
            retries = report.metadata.retry_count,
            elapsed_ms = report.metadata.duration_ms,
            "Report complete"
        );
        Ok(report)
    }
}

/// Predecessor text for each dependency of `spec`, placeholders for failed ones.
fn predecessor_texts(
    spec: &SectionSpec,
    finished: &BTreeMap<SectionKind, SectionResult>,
) -> BTreeMap<SectionKind, String> {
    spec.depends_on
        .iter()
        .filter_map(|dep| finished.get(dep).map(|r| (*dep, r.dependency_text())))
        .collect()
}

/// Failure that stops the whole run rather than one section.
enum SectionAbort {
    Auth(String),
}

impl SectionRunner {
    async fn run(
        &self,
        spec: &SectionSpec,
        ctx: &PromptContext,
    ) -> Result<SectionResult, SectionAbort> {
        let kind = spec.kind;
        let start = Instant::now();
        let mut result = self.execute(spec, ctx).await?;
        result.elapsed_ms = start.elapsed().as_millis() as u64;

        if result.is_failed() {
            warn!(
                section = %kind,
                error = result.error.as_deref().unwrap_or_default(),
                attempts = result.attempts,
                elapsed_ms = result.elapsed_ms,
                "Section failed"
            );
        } else {
            info!(
                section = %kind,
                attempts = result.attempts,
                elapsed_ms = result.elapsed_ms,
                "Section succeeded"
            );
        }
        Ok(result)
    }

    async fn execute(
        &self,
        spec: &SectionSpec,
        ctx: &PromptContext,
    ) -> Result<SectionResult, SectionAbort> {
        let kind = spec.kind;
        if kind == SectionKind::Supplemental && ctx.artifacts.is_empty() {
            return Ok(SectionResult::success(kind, NO_SUPPLEMENTAL.to_string()));
        }
        if self.cancel.is_cancelled() {
            return Ok(SectionResult::failed(kind, RUN_CANCELLED));
        }
        if Instant::now() >= self.deadline {
            return Ok(SectionResult::failed(kind, DEADLINE_EXCEEDED));
        }

        let payload = match self.catalog.build(spec, ctx) {
            Ok(payload) => payload,
            Err(e) => return Ok(SectionResult::failed(kind, e.to_string())),
        };

        let call = tokio::time::timeout_at(
            self.deadline,
            self.gateway.invoke(&payload, self.request_timeout),
        );
        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => None,
            outcome = call => Some(outcome),
        };

        let response = match outcome {
            None => return Ok(SectionResult::failed(kind, RUN_CANCELLED)),
            Some(Err(_elapsed)) => return Ok(SectionResult::failed(kind, DEADLINE_EXCEEDED)),
            Some(Ok(Err(GatewayError::Auth(message)))) => {
                self.cancel.cancel();
                return Err(SectionAbort::Auth(message));
            }
            Some(Ok(Err(e))) => {
                let mut result = SectionResult::failed(kind, e.to_string());
                result.attempts = e.attempts();
                return Ok(result);
            }
            Some(Ok(Ok(response))) => response,
        };

        let mut result = SectionResult::success(kind, response.text);
        result.attempts = response.attempts;
        result.usage = response.usage;
        if response.stop_reason == StopReason::MaxTokens {
            result.status = SectionStatus::Partial;
        }
        if kind == SectionKind::Technical {
            result.grade = technical_grade(ctx, &result.content);
        }
        Ok(result)
    }
}

/// The rubric grade. A different grade stated by the model is logged and ignored.
fn technical_grade(ctx: &PromptContext, content: &str) -> Option<Grade> {
    let computed = ctx
        .snapshot
        .price
        .as_ref()
        .map(|price| rubric::assess(&TechnicalIndicators::from_summary(price)).grade)?;
    if let Some(stated) = extract_grade(content) {
        if stated != computed {
            warn!(%computed, %stated, "Model stated a different TA grade, keeping computed grade");
        }
    }
    Some(computed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        sample_request, sample_snapshot, test_gateway_config, RecordingClock, ScriptedTransport,
    };
    use stockbrief_models::report::ReportStatus;

    fn orchestrator(transport: Arc<ScriptedTransport>) -> Orchestrator {
        let clock = Arc::new(RecordingClock::default());
        let gateway = LlmGateway::with_clock(transport, clock, &test_gateway_config(3));
        Orchestrator::new(
            PromptCatalog::new("claude-test", 0.3),
            Arc::new(gateway),
            ArtifactIngestor::default(),
            PipelineConfig::default(),
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn all_sections_succeed() {
        let transport = Arc::new(ScriptedTransport::new());
        let report = orchestrator(transport.clone())
            .run(
                &sample_request("ACME"),
                sample_snapshot("ACME"),
                Instant::now() + Duration::from_secs(60),
            )
            .await
            .unwrap();

        assert_eq!(report.status, ReportStatus::Complete);
        assert_eq!(report.sections.len(), 7);
        assert_eq!(report.grade, Some(Grade::A));
        // supplemental short-circuits without a model call
        assert_eq!(transport.calls(SectionKind::Supplemental), 0);
        assert_eq!(
            report.section(SectionKind::Supplemental).unwrap().content,
            NO_SUPPLEMENTAL
        );
        assert_eq!(transport.total_calls(), 6);
    }

    #[tokio::test]
    async fn mismatched_snapshot_is_unavailable() {
        let transport = Arc::new(ScriptedTransport::new());
        let err = orchestrator(transport.clone())
            .run(
                &sample_request("ACME"),
                sample_snapshot("OTHER"),
                Instant::now() + Duration::from_secs(60),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::DataUnavailable(_)));
        assert_eq!(transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn max_tokens_marks_section_partial() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.truncate_output(SectionKind::Financials);
        let report = orchestrator(transport)
            .run(
                &sample_request("ACME"),
                sample_snapshot("ACME"),
                Instant::now() + Duration::from_secs(60),
            )
            .await
            .unwrap();
        assert_eq!(
            report.section(SectionKind::Financials).unwrap().status,
            SectionStatus::Partial
        );
        assert_eq!(report.status, ReportStatus::Complete);
    }

    #[tokio::test]
    async fn disagreeing_model_grade_ignored() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond_with(SectionKind::Technical, "Weak chart.\n\n**TA Grade: D**");
        let report = orchestrator(transport)
            .run(
                &sample_request("ACME"),
                sample_snapshot("ACME"),
                Instant::now() + Duration::from_secs(60),
            )
            .await
            .unwrap();
        assert_eq!(report.grade, Some(Grade::A));
        assert_eq!(
            report.section(SectionKind::Technical).unwrap().grade,
            Some(Grade::A)
        );
    }
}
