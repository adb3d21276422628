//! Deterministic letter-grade rubric for the technical section.
//!
//! Five signals each score -1, 0 or +1 and the sum maps to a grade. Missing
//! indicators score 0, so a short price history drifts toward C.

use serde::Serialize;
use stockbrief_models::section::Grade;
use stockbrief_models::snapshot::PriceSummary;

/// 20-day return (percent) that counts as a trend.
pub const TREND_RETURN_PCT: f64 = 2.0;

/// Recent-to-period volume ratio that counts as expanding participation.
pub const VOLUME_EXPANSION_RATIO: f64 = 1.10;

/// Indicator values the rubric reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TechnicalIndicators {
    pub price: f64,
    pub ma50: Option<f64>,
    pub ma200: Option<f64>,
    pub return_20d_pct: Option<f64>,
    pub volume_ratio: Option<f64>,
}

impl TechnicalIndicators {
    pub fn from_summary(summary: &PriceSummary) -> Self {
        Self {
            price: summary.current_price,
            ma50: summary.ma50,
            ma200: summary.ma200,
            return_20d_pct: summary.return_20d_pct,
            volume_ratio: summary.volume_ratio(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub name: &'static str,
    pub score: i32,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assessment {
    pub grade: Grade,
    pub score: i32,
    pub signals: Vec<Signal>,
}

impl Assessment {
    /// One line per signal, for embedding in the technical prompt.
    pub fn describe(&self) -> String {
        let mut lines: Vec<String> = self
            .signals
            .iter()
            .map(|s| format!("- {} ({:+}): {}", s.name, s.score, s.detail))
            .collect();
        lines.push(format!("Total score: {:+} => Grade {}", self.score, self.grade));
        lines.join("\n")
    }
}

pub fn grade_for_score(score: i32) -> Grade {
    match score {
        s if s >= 4 => Grade::A,
        s if s >= 2 => Grade::B,
        s if s >= -1 => Grade::C,
        s if s >= -3 => Grade::D,
        _ => Grade::F,
    }
}

fn above_below(name: &'static str, lhs: f64, rhs: Option<f64>, label: &str) -> Signal {
    match rhs {
        Some(rhs) if lhs > rhs => Signal {
            name,
            score: 1,
            detail: format!("{lhs:.2} above {label} {rhs:.2}"),
        },
        Some(rhs) if lhs < rhs => Signal {
            name,
            score: -1,
            detail: format!("{lhs:.2} below {label} {rhs:.2}"),
        },
        Some(rhs) => Signal {
            name,
            score: 0,
            detail: format!("{lhs:.2} at {label} {rhs:.2}"),
        },
        None => Signal {
            name,
            score: 0,
            detail: format!("{label} unavailable"),
        },
    }
}

/// Grade a set of indicators.
pub fn assess(indicators: &TechnicalIndicators) -> Assessment {
    let mut signals = vec![
        above_below("price_vs_ma50", indicators.price, indicators.ma50, "50-day MA"),
        above_below("price_vs_ma200", indicators.price, indicators.ma200, "200-day MA"),
    ];

    signals.push(match (indicators.ma50, indicators.ma200) {
        (Some(ma50), ma200) => above_below("ma50_vs_ma200", ma50, ma200, "200-day MA"),
        (None, _) => Signal {
            name: "ma50_vs_ma200",
            score: 0,
            detail: "50-day MA unavailable".to_string(),
        },
    });

    signals.push(match indicators.return_20d_pct {
        Some(ret) if ret >= TREND_RETURN_PCT => Signal {
            name: "return_20d",
            score: 1,
            detail: format!("{ret:+.2}% over 20 days"),
        },
        Some(ret) if ret <= -TREND_RETURN_PCT => Signal {
            name: "return_20d",
            score: -1,
            detail: format!("{ret:+.2}% over 20 days"),
        },
        Some(ret) => Signal {
            name: "return_20d",
            score: 0,
            detail: format!("{ret:+.2}% over 20 days (flat)"),
        },
        None => Signal {
            name: "return_20d",
            score: 0,
            detail: "fewer than 20 trading days".to_string(),
        },
    });

    signals.push(match (indicators.volume_ratio, indicators.return_20d_pct) {
        (Some(ratio), Some(ret)) if ratio >= VOLUME_EXPANSION_RATIO && ret != 0.0 => {
            let score = if ret > 0.0 { 1 } else { -1 };
            let direction = if score > 0 { "advance" } else { "decline" };
            Signal {
                name: "volume",
                score,
                detail: format!("volume {ratio:.2}x average confirms the {direction}"),
            }
        }
        (Some(ratio), _) => Signal {
            name: "volume",
            score: 0,
            detail: format!("volume {ratio:.2}x average, no confirmation"),
        },
        (None, _) => Signal {
            name: "volume",
            score: 0,
            detail: "recent volume unavailable".to_string(),
        },
    });

    let score = signals.iter().map(|s| s.score).sum();
    Assessment {
        grade: grade_for_score(score),
        score,
        signals,
    }
}

/// Rubric text shown to the model alongside the computed grade.
pub fn rubric_table() -> String {
    format!(
        "\
Scoring (each signal -1, 0 or +1; missing data scores 0):
- Price vs 50-day MA: above +1, below -1
- Price vs 200-day MA: above +1, below -1
- 50-day MA vs 200-day MA: above +1, below -1
- 20-day return: >= +{trend:.0}% scores +1, <= -{trend:.0}% scores -1
- Volume: last-20-day average >= {vol:.2}x the period average scores +1 on a \
positive 20-day return and -1 on a negative one

| Grade | Score | Criteria |
|-------|-------|----------|
| A | +4 to +5 | Clear uptrend, above key MAs, rising volume on the advance |
| B | +2 to +3 | Generally positive with minor concerns |
| C | -1 to +1 | Mixed signals, range-bound, no clear trend |
| D | -3 to -2 | Downtrend, losing support, weak bounces |
| F | -5 to -4 | Breakdown below all major MAs, heavy selling volume |",
        trend = TREND_RETURN_PCT,
        vol = VOLUME_EXPANSION_RATIO,
    )
}
