//! stockbrief - equity research report synthesis
//!
//! Turns a ticker, a market-data snapshot and optional uploaded files into a
//! seven-section research report written by a language model.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use stockbrief::models::{ReportRequest, Report, FinancialSnapshot};
//! use stockbrief::agents::{Orchestrator, LlmGateway, PromptCatalog, SnapshotSource};
//! use stockbrief::ingest::ArtifactIngestor;
//! use stockbrief::models::config::StockbriefConfig;
//! ```

pub use stockbrief_agents as agents;
pub use stockbrief_ingest as ingest;
pub use stockbrief_models as models;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use stockbrief_agents::{
    AnthropicTransport, DataUnavailable, LlmGateway, Orchestrator, PipelineError, PromptCatalog,
    SnapshotSource,
};
use stockbrief_ingest::ArtifactIngestor;
use stockbrief_models::config::StockbriefConfig;
use stockbrief_models::report::Report;
use stockbrief_models::report_request::ReportRequest;
use stockbrief_models::snapshot::FinancialSnapshot;

/// Build an Orchestrator backed by the Anthropic Messages API.
pub fn build_orchestrator(config: &StockbriefConfig) -> Result<Orchestrator, PipelineError> {
    let transport = Arc::new(AnthropicTransport::from_config(&config.gateway)?);
    let gateway = Arc::new(LlmGateway::new(transport, &config.gateway));
    let catalog = PromptCatalog::from_config(&config.gateway, &config.pipeline);

    Ok(Orchestrator::new(
        catalog,
        gateway,
        ArtifactIngestor::new(config.ingest.clone()),
        config.pipeline.clone(),
        Duration::from_secs(config.gateway.request_timeout_seconds),
    ))
}

/// Generate a report for `request` using snapshots from `source`.
pub async fn generate(
    orchestrator: &Orchestrator,
    request: &ReportRequest,
    source: &dyn SnapshotSource,
) -> Result<Report, PipelineError> {
    orchestrator.generate(request, source).await
}

/// Snapshot source reading a single `FinancialSnapshot` JSON document from disk.
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SnapshotSource for JsonFileSource {
    async fn fetch(&self, ticker: &str) -> Result<FinancialSnapshot, DataUnavailable> {
        let unavailable = |reason: String| DataUnavailable {
            ticker: ticker.to_string(),
            reason,
        };
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| unavailable(format!("{}: {e}", self.path.display())))?;
        let snapshot: FinancialSnapshot = serde_json::from_str(&raw)
            .map_err(|e| unavailable(format!("invalid snapshot JSON: {e}")))?;
        if !snapshot.ticker.eq_ignore_ascii_case(ticker) {
            return Err(unavailable(format!("snapshot file is for {}", snapshot.ticker)));
        }
        Ok(snapshot)
    }
}
