use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Parser;
use stockbrief::JsonFileSource;
use stockbrief_models::artifact::UploadedArtifact;
use stockbrief_models::config::StockbriefConfig;
use stockbrief_models::report_request::ReportRequest;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "stockbrief", about = "Equity research report synthesis")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/stockbrief.toml")]
    config: String,

    /// Read ReportRequest JSON from a file instead of stdin
    #[arg(short, long)]
    request: Option<String>,

    /// FinancialSnapshot JSON for the requested ticker
    #[arg(short, long)]
    snapshot: String,

    /// Attach a supplemental file (pdf, txt, md, csv, xlsx, png, jpg). Repeatable.
    #[arg(short, long = "file")]
    files: Vec<String>,

    /// Override the total report deadline in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Pretty-print the output JSON
    #[arg(long)]
    pretty: bool,
}

fn read_artifact(path: &str) -> Result<UploadedArtifact> {
    let name = Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("Invalid file path: {path}"))?;
    let payload = std::fs::read(path).with_context(|| format!("Failed to read file: {path}"))?;
    match UploadedArtifact::from_file_name(name, payload) {
        Some(artifact) => Ok(artifact),
        None => bail!("Unsupported file type: {name}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing (respects RUST_LOG env var)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Load config
    let config_str = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("Failed to read config: {}", cli.config))?;
    let mut config: StockbriefConfig =
        toml::from_str(&config_str).with_context(|| "Failed to parse config")?;
    if let Some(timeout) = cli.timeout {
        config.pipeline.total_timeout_seconds = timeout;
    }

    // Read request
    let request_json = if let Some(request_path) = &cli.request {
        std::fs::read_to_string(request_path)
            .with_context(|| format!("Failed to read request: {request_path}"))?
    } else {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read from stdin")?;
        buf
    };
    let parsed: ReportRequest =
        serde_json::from_str(&request_json).context("Failed to parse ReportRequest JSON")?;

    let mut artifacts = parsed.artifacts().to_vec();
    for path in &cli.files {
        artifacts.push(read_artifact(path)?);
    }
    let request = ReportRequest::new(
        parsed.ticker(),
        parsed.company_name(),
        parsed.chart().clone(),
        artifacts,
    )?;
    info!(ticker = %request.ticker(), artifacts = request.artifacts().len(), "Request loaded");

    // Build orchestrator and generate
    let orchestrator =
        stockbrief::build_orchestrator(&config).context("Failed to build orchestrator")?;
    let source = JsonFileSource::new(&cli.snapshot);

    let report = stockbrief::generate(&orchestrator, &request, &source)
        .await
        .map_err(|e| anyhow::anyhow!("Report generation failed: {e}"))?;

    // Output report as JSON to stdout
    let output = if cli.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{output}");

    Ok(())
}
