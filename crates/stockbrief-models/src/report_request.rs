use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::UploadedArtifact;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Ticker must not be empty")]
    EmptyTicker,

    #[error("Company name must not be empty")]
    EmptyCompanyName,
}

/// Historical window shown on the price chart.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ChartPeriod {
    #[serde(rename = "6mo")]
    SixMonths,
    #[default]
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "2y")]
    TwoYears,
    #[serde(rename = "5y")]
    FiveYears,
}

impl ChartPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SixMonths => "6mo",
            Self::OneYear => "1y",
            Self::TwoYears => "2y",
            Self::FiveYears => "5y",
        }
    }
}

/// Chart options chosen by the caller. Carried through to the export step untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChartConfig {
    pub period: ChartPeriod,
    pub show_ma50: bool,
    pub show_ma200: bool,
    pub show_volume: bool,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            period: ChartPeriod::OneYear,
            show_ma50: true,
            show_ma200: true,
            show_volume: true,
        }
    }
}

/// A request for one report. Built through [`ReportRequest::new`] so the ticker is
/// always trimmed and uppercase.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReportRequest {
    ticker: String,
    company_name: String,
    chart: ChartConfig,
    artifacts: Vec<UploadedArtifact>,
}

impl ReportRequest {
    pub fn new(
        ticker: &str,
        company_name: &str,
        chart: ChartConfig,
        artifacts: Vec<UploadedArtifact>,
    ) -> Result<Self, RequestError> {
        let ticker = ticker.trim().to_uppercase();
        if ticker.is_empty() {
            return Err(RequestError::EmptyTicker);
        }
        let company_name = company_name.trim().to_string();
        if company_name.is_empty() {
            return Err(RequestError::EmptyCompanyName);
        }
        Ok(Self {
            ticker,
            company_name,
            chart,
            artifacts,
        })
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn company_name(&self) -> &str {
        &self.company_name
    }

    pub fn chart(&self) -> &ChartConfig {
        &self.chart
    }

    pub fn artifacts(&self) -> &[UploadedArtifact] {
        &self.artifacts
    }
}

/// Wire shape accepted from callers; validated into a [`ReportRequest`].
#[derive(Deserialize)]
struct RawReportRequest {
    ticker: String,
    company_name: String,
    #[serde(default)]
    chart: ChartConfig,
    #[serde(default)]
    artifacts: Vec<UploadedArtifact>,
}

impl<'de> Deserialize<'de> for ReportRequest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawReportRequest::deserialize(deserializer)?;
        ReportRequest::new(&raw.ticker, &raw.company_name, raw.chart, raw.artifacts)
            .map_err(serde::de::Error::custom)
    }
}
