use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Revenue below this (in dollars) marks a company as pre-revenue.
pub const PRE_REVENUE_THRESHOLD: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

/// Number of trailing days used for the short-term trend statistics.
pub const TREND_WINDOW_DAYS: usize = 20;

/// Point-in-time bundle of fundamentals, price and news for one ticker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinancialSnapshot {
    pub ticker: String,
    pub as_of: DateTime<Utc>,
    #[serde(default)]
    pub profile: CompanyProfile,
    #[serde(default)]
    pub fundamentals: Fundamentals,
    /// None when the provider returned no price history.
    pub price: Option<PriceSummary>,
    #[serde(default)]
    pub news: Vec<NewsItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CompanyProfile {
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub summary: Option<String>,
}

/// Fundamentals as reported by the data provider. Ratios and margins are fractions
/// (0.25 = 25%), money is in dollars.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Fundamentals {
    pub market_cap: Option<Decimal>,
    pub total_revenue: Option<Decimal>,
    pub revenue_growth: Option<Decimal>,
    pub gross_margin: Option<Decimal>,
    pub operating_margin: Option<Decimal>,
    pub net_margin: Option<Decimal>,
    pub return_on_equity: Option<Decimal>,
    pub trailing_pe: Option<Decimal>,
    pub forward_pe: Option<Decimal>,
    pub price_to_book: Option<Decimal>,
    pub total_cash: Option<Decimal>,
    pub total_debt: Option<Decimal>,
    pub debt_to_equity: Option<Decimal>,
    pub current_ratio: Option<Decimal>,
    pub operating_cash_flow: Option<Decimal>,
    pub free_cash_flow: Option<Decimal>,
    pub beta: Option<Decimal>,
    pub week52_high: Option<Decimal>,
    pub week52_low: Option<Decimal>,
}

impl Fundamentals {
    /// Unknown revenue counts as pre-revenue.
    pub fn is_pre_revenue(&self) -> bool {
        match self.total_revenue {
            Some(revenue) => revenue < PRE_REVENUE_THRESHOLD,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewsItem {
    pub headline: String,
    pub source: String,
    pub published_at: DateTime<Utc>,
    pub summary: Option<String>,
}

/// One daily OHLCV bar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Summary statistics of the recent price history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceSummary {
    /// Number of trading days the period statistics cover.
    pub trading_days: usize,
    pub current_price: f64,
    pub previous_close: Option<f64>,
    pub ma50: Option<f64>,
    pub ma200: Option<f64>,
    pub period_high: f64,
    pub period_low: f64,
    pub average_volume: f64,
    /// Average volume over the last 20 days.
    pub recent_average_volume: Option<f64>,
    /// Percent return over the last 20 days.
    pub return_20d_pct: Option<f64>,
    pub up_days_20d: Option<u32>,
    pub down_days_20d: Option<u32>,
}

impl PriceSummary {
    /// Summarize daily bars (oldest first). Moving averages use the full history with
    /// a minimum of one observation; period statistics use the last `window_days` bars.
    pub fn from_bars(bars: &[DailyBar], window_days: usize) -> Option<Self> {
        let last = bars.last()?;
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

        let recent = &bars[bars.len().saturating_sub(window_days.max(1))..];
        let period_high = recent.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let period_low = recent.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        let average_volume = mean(recent.iter().map(|b| b.volume));

        let previous_close = (recent.len() > 1).then(|| recent[recent.len() - 2].close);

        let (recent_average_volume, return_20d_pct, up_days_20d, down_days_20d) =
            if recent.len() >= TREND_WINDOW_DAYS {
                let window = &recent[recent.len() - TREND_WINDOW_DAYS..];
                let start = window[0].close;
                let end = window[window.len() - 1].close;
                let ret = if start != 0.0 {
                    (end - start) / start * 100.0
                } else {
                    0.0
                };
                let mut up = 0;
                let mut down = 0;
                for pair in window.windows(2) {
                    if pair[1].close > pair[0].close {
                        up += 1;
                    } else if pair[1].close < pair[0].close {
                        down += 1;
                    }
                }
                (
                    Some(mean(window.iter().map(|b| b.volume))),
                    Some(ret),
                    Some(up),
                    Some(down),
                )
            } else {
                (None, None, None, None)
            };

        Some(Self {
            trading_days: recent.len(),
            current_price: last.close,
            previous_close,
            ma50: trailing_mean(&closes, 50),
            ma200: trailing_mean(&closes, 200),
            period_high,
            period_low,
            average_volume,
            recent_average_volume,
            return_20d_pct,
            up_days_20d,
            down_days_20d,
        })
    }

    /// Ratio of the last-20-day average volume to the period average volume.
    pub fn volume_ratio(&self) -> Option<f64> {
        let recent = self.recent_average_volume?;
        (self.average_volume > 0.0).then(|| recent / self.average_volume)
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn trailing_mean(values: &[f64], window: usize) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let tail = &values[values.len().saturating_sub(window)..];
    Some(mean(tail.iter().copied()))
}
