//! Test support: a scripted model transport, a recording clock and sample data.
//!
//! `ScriptedTransport` never touches the network. Per section it can add latency,
//! fail a queue of attempts, fail forever, or return fixed text, and it records every
//! payload and the peak number of concurrent requests it saw.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use stockbrief_models::config::{GatewayConfig, RetryConfig};
use stockbrief_models::report::TokenUsage;
use stockbrief_models::report_request::{ChartConfig, ReportRequest};
use stockbrief_models::section::SectionKind;
use stockbrief_models::snapshot::{
    CompanyProfile, DailyBar, FinancialSnapshot, Fundamentals, NewsItem, PriceSummary,
};

use crate::error::TransportError;
use crate::gateway::{Completion, ModelTransport, StopReason};
use crate::prompts::{ContentPart, PromptPayload};
use crate::retry::Clock;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct ScriptedTransport {
    latency: Mutex<HashMap<SectionKind, Duration>>,
    queued_failures: Mutex<HashMap<SectionKind, VecDeque<TransportError>>>,
    permanent_failures: Mutex<HashMap<SectionKind, TransportError>>,
    responses: Mutex<HashMap<SectionKind, String>>,
    truncated: Mutex<Vec<SectionKind>>,
    calls: Mutex<HashMap<SectionKind, u32>>,
    payloads: Mutex<Vec<PromptPayload>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_latency(&self, section: SectionKind, latency: Duration) {
        lock(&self.latency).insert(section, latency);
    }

    /// Fail the next attempts for `section` with these errors, in order.
    pub fn fail_next(&self, section: SectionKind, errors: Vec<TransportError>) {
        lock(&self.queued_failures)
            .entry(section)
            .or_default()
            .extend(errors);
    }

    /// Fail every attempt for `section`.
    pub fn always_fail(&self, section: SectionKind, error: TransportError) {
        lock(&self.permanent_failures).insert(section, error);
    }

    pub fn respond_with(&self, section: SectionKind, text: &str) {
        lock(&self.responses).insert(section, text.to_string());
    }

    /// Report `max_tokens` as the stop reason for `section`.
    pub fn truncate_output(&self, section: SectionKind) {
        lock(&self.truncated).push(section);
    }

    pub fn calls(&self, section: SectionKind) -> u32 {
        lock(&self.calls).get(&section).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        lock(&self.calls).values().sum()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn payloads(&self) -> Vec<PromptPayload> {
        lock(&self.payloads).clone()
    }

    /// Payloads sent for one section.
    pub fn payloads_for(&self, section: SectionKind) -> Vec<PromptPayload> {
        lock(&self.payloads)
            .iter()
            .filter(|p| p.section == section)
            .cloned()
            .collect()
    }
}

/// Decrements the in-flight counter even when the request future is dropped.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ModelTransport for ScriptedTransport {
    async fn send(
        &self,
        payload: &PromptPayload,
        _timeout: Duration,
    ) -> Result<Completion, TransportError> {
        let section = payload.section;
        *lock(&self.calls).entry(section).or_insert(0) += 1;
        lock(&self.payloads).push(payload.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        let latency = lock(&self.latency).get(&section).copied();
        match latency {
            Some(latency) if !latency.is_zero() => tokio::time::sleep(latency).await,
            _ => tokio::task::yield_now().await,
        }

        if let Some(error) = lock(&self.permanent_failures).get(&section) {
            return Err(error.clone());
        }
        if let Some(error) = lock(&self.queued_failures)
            .get_mut(&section)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        let text = lock(&self.responses)
            .get(&section)
            .cloned()
            .unwrap_or_else(|| default_response(section));
        let stop_reason = if lock(&self.truncated).contains(&section) {
            StopReason::MaxTokens
        } else {
            StopReason::EndTurn
        };

        Ok(Completion {
            text,
            stop_reason,
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: payload.model.clone(),
        })
    }
}

fn default_response(section: SectionKind) -> String {
    match section {
        SectionKind::Technical => {
            "technical analysis: uptrend above both moving averages.\n\n**TA Grade: A**"
                .to_string()
        }
        other => format!("{other} analysis: scripted response."),
    }
}

/// Records requested delays and returns immediately.
#[derive(Default)]
pub struct RecordingClock {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    pub fn delays(&self) -> Vec<Duration> {
        lock(&self.delays).clone()
    }
}

#[async_trait]
impl Clock for RecordingClock {
    async fn sleep(&self, duration: Duration) {
        lock(&self.delays).push(duration);
        tokio::task::yield_now().await;
    }
}

/// Gateway config for tests: no pacing, short backoff, three in flight.
pub fn test_gateway_config(max_attempts: u32) -> GatewayConfig {
    GatewayConfig {
        max_in_flight: 3,
        requests_per_minute: None,
        retry: RetryConfig {
            max_attempts,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
            jitter_ratio: 0.5,
        },
        ..GatewayConfig::default()
    }
}

pub fn sample_request(ticker: &str) -> ReportRequest {
    ReportRequest::new(ticker, "Acme Corp", ChartConfig::default(), Vec::new())
        .expect("sample ticker must not be empty")
}

pub fn sample_payload(section: SectionKind) -> PromptPayload {
    PromptPayload {
        section,
        template: format!("{}.v1", section.as_str()),
        model: "claude-test".to_string(),
        system: "system".to_string(),
        content: vec![ContentPart::Text {
            text: format!("Write the {section} section."),
        }],
        max_tokens: 500,
        temperature: 0.3,
        web_search: false,
    }
}

/// 250 rising daily closes with volume doubling over the last 20 days. Grades A.
pub fn bullish_bars() -> Vec<DailyBar> {
    let start = NaiveDate::from_ymd_opt(2023, 6, 1).unwrap_or_default();
    (0..250)
        .map(|i| {
            let close = 100.0 + f64::from(i);
            DailyBar {
                date: start + chrono::Duration::days(i64::from(i)),
                open: close - 0.5,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: if i >= 230 { 2_000_000.0 } else { 1_000_000.0 },
            }
        })
        .collect()
}

pub fn bullish_summary() -> Option<PriceSummary> {
    PriceSummary::from_bars(&bullish_bars(), 60)
}

pub fn sample_snapshot(ticker: &str) -> FinancialSnapshot {
    let as_of = DateTime::<Utc>::from_timestamp(1_717_444_800, 0).unwrap_or_default();
    FinancialSnapshot {
        ticker: ticker.to_string(),
        as_of,
        profile: CompanyProfile {
            sector: Some("Industrials".to_string()),
            industry: Some("Tools & Accessories".to_string()),
            summary: Some("Acme Corp makes anvils and rocket skates.".to_string()),
        },
        fundamentals: Fundamentals {
            market_cap: Some(Decimal::new(52_000_000_000, 0)),
            total_revenue: Some(Decimal::new(8_400_000_000, 0)),
            revenue_growth: Some(Decimal::new(12, 2)),
            gross_margin: Some(Decimal::new(41, 2)),
            operating_margin: Some(Decimal::new(18, 2)),
            net_margin: Some(Decimal::new(11, 2)),
            return_on_equity: Some(Decimal::new(21, 2)),
            trailing_pe: Some(Decimal::new(245, 1)),
            forward_pe: Some(Decimal::new(212, 1)),
            total_cash: Some(Decimal::new(3_100_000_000, 0)),
            total_debt: Some(Decimal::new(2_200_000_000, 0)),
            debt_to_equity: Some(Decimal::new(45, 2)),
            current_ratio: Some(Decimal::new(18, 1)),
            operating_cash_flow: Some(Decimal::new(1_500_000_000, 0)),
            free_cash_flow: Some(Decimal::new(1_100_000_000, 0)),
            beta: Some(Decimal::new(110, 2)),
            ..Fundamentals::default()
        },
        price: bullish_summary(),
        news: vec![NewsItem {
            headline: "Acme raises full-year guidance".to_string(),
            source: "Newswire".to_string(),
            published_at: as_of,
            summary: Some("Orders for rocket skates beat expectations.".to_string()),
        }],
    }
}
