//! Prompt templates for the seven report sections.
//!
//! Building a prompt is pure: the same context always yields a byte-identical
//! payload. Each section reads a validated [`SectionInput`] so missing context is
//! caught before any request is sent.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rust_decimal::Decimal;
use serde::Serialize;
use stockbrief_ingest::truncate_text;
use stockbrief_models::artifact::ExtractedContent;
use stockbrief_models::config::{GatewayConfig, PipelineConfig, SectionConfig};
use stockbrief_models::report_request::ReportRequest;
use stockbrief_models::section::{SectionKind, SectionSpec};
use stockbrief_models::snapshot::{FinancialSnapshot, NewsItem, PriceSummary};

use crate::error::PromptError;
use crate::rubric::{self, Assessment, TechnicalIndicators};

pub const FINANCIAL_DATA_CHARS: usize = 6_000;
pub const PRICE_DATA_CHARS: usize = 4_000;
pub const SUPPLEMENTAL_CHARS: usize = 5_000;

/// Placeholder used when the caller supplied no usable artifacts.
pub const NO_SUPPLEMENTAL: &str = "No supplemental materials provided.";

const SYSTEM_PROMPT: &str = "You are an equity research analyst writing one section of a \
stock research report. Be factual and balanced, state uncertainty plainly, and avoid \
promotional language. Do not give personalized investment advice.";

/// One block of user content.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    /// Base64-encoded image bytes.
    Image { media_type: String, data: String },
}

/// A fully rendered request for one section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptPayload {
    pub section: SectionKind,
    pub template: String,
    pub model: String,
    pub system: String,
    pub content: Vec<ContentPart>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Enable the provider's web-search tool.
    pub web_search: bool,
}

impl PromptPayload {
    /// Concatenated text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                ContentPart::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Everything a section prompt may read. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub ticker: String,
    pub company_name: String,
    pub snapshot: Arc<FinancialSnapshot>,
    pub artifacts: Arc<Vec<ExtractedContent>>,
    /// Text of already-finished sections, for dependent sections.
    pub predecessors: BTreeMap<SectionKind, String>,
}

impl PromptContext {
    pub fn new(
        request: &ReportRequest,
        snapshot: Arc<FinancialSnapshot>,
        artifacts: Arc<Vec<ExtractedContent>>,
    ) -> Self {
        Self {
            ticker: request.ticker().to_string(),
            company_name: request.company_name().to_string(),
            snapshot,
            artifacts,
            predecessors: BTreeMap::new(),
        }
    }

    pub fn with_predecessors(mut self, predecessors: BTreeMap<SectionKind, String>) -> Self {
        self.predecessors = predecessors;
        self
    }
}

/// Validated per-section input.
#[derive(Debug, Clone)]
pub enum SectionInput<'a> {
    Overview {
        profile_text: String,
        pre_revenue: bool,
    },
    Financials {
        financial_data: String,
        pre_revenue: bool,
    },
    Competitive,
    Sentiment {
        news: &'a [NewsItem],
    },
    Technical {
        price: &'a PriceSummary,
        assessment: Assessment,
    },
    Supplemental {
        artifacts: &'a [ExtractedContent],
    },
    Synthesis {
        sections: Vec<(SectionKind, &'a str)>,
    },
}

impl<'a> SectionInput<'a> {
    /// Validate `ctx` against what `spec` needs. Synthesis reads one predecessor per
    /// entry of `spec.depends_on`.
    pub fn from_context(spec: &SectionSpec, ctx: &'a PromptContext) -> Result<Self, PromptError> {
        let kind = spec.kind;
        let snapshot = ctx.snapshot.as_ref();
        let input = match kind {
            SectionKind::Overview => Self::Overview {
                profile_text: format_profile(snapshot),
                pre_revenue: snapshot.fundamentals.is_pre_revenue(),
            },
            SectionKind::Financials => Self::Financials {
                financial_data: format_financial_data(&ctx.company_name, snapshot),
                pre_revenue: snapshot.fundamentals.is_pre_revenue(),
            },
            SectionKind::Competitive => Self::Competitive,
            SectionKind::Sentiment => Self::Sentiment {
                news: &snapshot.news,
            },
            SectionKind::Technical => {
                let price = snapshot.price.as_ref().ok_or(PromptError::MissingContext {
                    section: kind,
                    field: "price",
                })?;
                Self::Technical {
                    price,
                    assessment: rubric::assess(&TechnicalIndicators::from_summary(price)),
                }
            }
            SectionKind::Supplemental => {
                if ctx.artifacts.is_empty() {
                    return Err(PromptError::MissingContext {
                        section: kind,
                        field: "artifacts",
                    });
                }
                Self::Supplemental {
                    artifacts: ctx.artifacts.as_slice(),
                }
            }
            SectionKind::Synthesis => {
                let mut sections = Vec::with_capacity(spec.depends_on.len());
                for dep in &spec.depends_on {
                    let text = ctx.predecessors.get(dep).ok_or(PromptError::MissingContext {
                        section: kind,
                        field: dep.as_str(),
                    })?;
                    sections.push((*dep, text.as_str()));
                }
                Self::Synthesis { sections }
            }
        };
        Ok(input)
    }

    pub fn kind(&self) -> SectionKind {
        match self {
            Self::Overview { .. } => SectionKind::Overview,
            Self::Financials { .. } => SectionKind::Financials,
            Self::Competitive => SectionKind::Competitive,
            Self::Sentiment { .. } => SectionKind::Sentiment,
            Self::Technical { .. } => SectionKind::Technical,
            Self::Supplemental { .. } => SectionKind::Supplemental,
            Self::Synthesis { .. } => SectionKind::Synthesis,
        }
    }
}

/// Output budget and tool use of a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateSettings {
    pub max_tokens: u32,
    pub web_search: bool,
}

impl TemplateSettings {
    pub fn for_kind(kind: SectionKind) -> Self {
        let (max_tokens, web_search) = match kind {
            SectionKind::Overview | SectionKind::Competitive | SectionKind::Sentiment => {
                (1_500, true)
            }
            SectionKind::Financials | SectionKind::Technical => (1_500, false),
            SectionKind::Supplemental => (2_000, false),
            SectionKind::Synthesis => (4_000, false),
        };
        Self {
            max_tokens,
            web_search,
        }
    }
}

/// Character budget for each predecessor section embedded in the synthesis prompt.
pub fn synthesis_budget(kind: SectionKind) -> usize {
    match kind {
        SectionKind::Overview | SectionKind::Financials => 3_000,
        SectionKind::Supplemental => 2_000,
        _ => 2_500,
    }
}

pub fn template_id(kind: SectionKind) -> String {
    format!("{}.v1", kind.as_str())
}

/// Renders section prompts. Holds only configuration.
#[derive(Debug, Clone)]
pub struct PromptCatalog {
    model: String,
    temperature: f32,
    overrides: Vec<SectionConfig>,
}

impl PromptCatalog {
    pub fn new(model: impl Into<String>, temperature: f32) -> Self {
        Self {
            model: model.into(),
            temperature,
            overrides: Vec::new(),
        }
    }

    pub fn from_config(gateway: &GatewayConfig, pipeline: &PipelineConfig) -> Self {
        Self {
            model: gateway.model.clone(),
            temperature: gateway.temperature,
            overrides: pipeline.sections.clone(),
        }
    }

    pub fn with_overrides(mut self, overrides: Vec<SectionConfig>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn build(
        &self,
        spec: &SectionSpec,
        ctx: &PromptContext,
    ) -> Result<PromptPayload, PromptError> {
        if spec.template != template_id(spec.kind) {
            return Err(PromptError::UnknownTemplate {
                section: spec.kind,
                template: spec.template.clone(),
            });
        }

        let input = SectionInput::from_context(spec, ctx)?;
        let content = render(&input, &ctx.ticker, &ctx.company_name);

        let settings = TemplateSettings::for_kind(spec.kind);
        let section_override = self.overrides.iter().find(|o| o.kind == spec.kind);

        Ok(PromptPayload {
            section: spec.kind,
            template: spec.template.clone(),
            model: section_override
                .and_then(|o| o.model.clone())
                .unwrap_or_else(|| self.model.clone()),
            system: SYSTEM_PROMPT.to_string(),
            content,
            max_tokens: section_override
                .and_then(|o| o.max_tokens)
                .unwrap_or(settings.max_tokens),
            temperature: self.temperature,
            web_search: settings.web_search,
        })
    }
}

fn render(input: &SectionInput<'_>, ticker: &str, company: &str) -> Vec<ContentPart> {
    match input {
        SectionInput::Overview {
            profile_text,
            pre_revenue,
        } => text(overview_prompt(ticker, company, profile_text, *pre_revenue)),
        SectionInput::Financials {
            financial_data,
            pre_revenue,
        } => {
            let (data, _) = truncate_text(financial_data, FINANCIAL_DATA_CHARS);
            text(financial_prompt(ticker, company, &data, *pre_revenue))
        }
        SectionInput::Competitive => text(competitive_prompt(ticker, company)),
        SectionInput::Sentiment { news } => text(sentiment_prompt(ticker, company, news)),
        SectionInput::Technical { price, assessment } => {
            let (data, _) = truncate_text(&format_price_data(ticker, price), PRICE_DATA_CHARS);
            text(technical_prompt(ticker, company, &data, assessment))
        }
        SectionInput::Supplemental { artifacts } => {
            supplemental_content(ticker, company, artifacts)
        }
        SectionInput::Synthesis { sections } => text(synthesis_prompt(ticker, company, sections)),
    }
}

fn text(body: String) -> Vec<ContentPart> {
    vec![ContentPart::Text { text: body }]
}

fn overview_prompt(ticker: &str, company: &str, profile: &str, pre_revenue: bool) -> String {
    let mut prompt = format!(
        "You are analyzing {company} ({ticker}) for an investment research report.

Profile from the data provider:
{profile}

Using web search, gather current information about this company and provide:

1. **Business Description** (2-3 paragraphs)
   - What the company does and its primary products or services
   - How it makes money
   - The markets and geographies it operates in

2. **Company Stage**
   - Pre-revenue, early-stage, growth, or mature
   - When it was founded and when it went public (if applicable)

3. **Key Facts**
   - Headquarters location
   - Approximate number of employees
   - Current CEO
"
    );
    if pre_revenue {
        prompt.push_str(
            "
This company reports little or no revenue. Also address:
- The specific problem it is trying to solve
- Potential applications of its technology or product
- The estimated total addressable market (TAM)
- Its stage of development (R&D, clinical trials, pilot customers, etc.)
",
        );
    }
    prompt.push_str(
        "
Write in a neutral, informative tone. Do not include investment recommendations in this \
section.",
    );
    prompt
}

fn financial_prompt(ticker: &str, company: &str, data: &str, pre_revenue: bool) -> String {
    let mut prompt = format!(
        "You are a financial analyst reviewing {company} ({ticker}).

Here is the financial data:

<financial_data>
{data}
</financial_data>

Analyze this data and provide:

1. **Revenue Analysis**: current revenue, growth rate, and concentration risks if \
discernible
2. **Profitability**: gross, operating and net margin, and their direction
3. **Balance Sheet Health**: debt vs. equity, current ratio, cash, and whether the \
balance sheet is strong, adequate, or concerning
4. **Cash Flow**: operating cash flow, free cash flow, and quality of earnings
5. **Key Metrics Table**

   | Metric | Value | Assessment |
   |--------|-------|------------|
   | Revenue (TTM) | $X | - |
   | Revenue Growth (YoY) | X% | Strong/Moderate/Weak |
   | Gross Margin | X% | - |
   | Net Margin | X% | - |
   | Debt/Equity | X.X | Low/Moderate/High |
   | Current Ratio | X.X | Healthy/Adequate/Tight |
   | Free Cash Flow | $X | Positive/Negative |
"
    );
    if pre_revenue {
        prompt.push_str(
            "
The company is pre-revenue. Note what is unavailable and focus on:
- Cash runway at the current burn rate
- Funding history and the last raise
- Any stated path to profitability
",
        );
    }
    prompt.push_str(
        "
Be precise with numbers. If a figure is missing or uncertain, say so rather than \
guessing.",
    );
    prompt
}

fn competitive_prompt(ticker: &str, company: &str) -> String {
    format!(
        "You are researching the competitive landscape for {company} ({ticker}).

Using web search, analyze:

1. **Direct Competitors**: the 3-7 main competitors, each with name, ticker if public, \
and how they compete
2. **Competitive Differentiation**: what sets {company} apart and whether it has a \
durable moat (brand, network effects, switching costs, IP, cost or regulatory \
advantages). If no clear moat exists, state that plainly.
3. **Market Position**: estimated market share and whether it is a leader, challenger, \
or niche player
4. **Competitive Risks**: threats from incumbents and emerging or disruptive entrants

Be honest about uncertainty and avoid cheerleading language. Write flowing paragraphs \
except for the competitor list."
    )
}

fn sentiment_prompt(ticker: &str, company: &str, news: &[NewsItem]) -> String {
    let headlines = if news.is_empty() {
        "No headlines were supplied by the data provider.".to_string()
    } else {
        news.iter()
            .map(|item| {
                let mut line = format!(
                    "- {} ({}, {})",
                    item.headline,
                    item.source,
                    item.published_at.format("%Y-%m-%d")
                );
                if let Some(summary) = &item.summary {
                    line.push_str(&format!(": {summary}"));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "You are conducting a sentiment analysis for {company} ({ticker}).

Recent headlines from the data provider:
{headlines}

Using web search, find news from the past 30 days and provide:

1. **Recent News Summary**: the 3-5 most significant items, each with what happened and \
why it matters
2. **Sentiment Assessment**: state \"Overall Sentiment: [Bullish/Neutral/Bearish]\" and \
explain it in 2-3 sentences
3. **Key Catalysts**: upcoming events that could move the stock and known risks
4. **Notable Analyst Activity**: upgrades, downgrades, and price target changes, if found

If news is sparse, say so and work with what is available."
    )
}

fn technical_prompt(ticker: &str, company: &str, data: &str, assessment: &Assessment) -> String {
    format!(
        "You are a technical analyst reviewing {company} ({ticker}).

Here is the recent price and volume data:

<price_data>
{data}
</price_data>

Analyze this data and provide:

1. **Trend Assessment**: primary trend, how long it has held, and position relative to \
the 50-day and 200-day moving averages
2. **Key Levels**: support and resistance and where price sits between them
3. **Volume Analysis**: whether volume confirms or diverges from price action
4. **Chart Structure**: consolidation, breakout or breakdown, and whether price action \
is constructive or deteriorating
5. **TA Grade**

The grade is computed from the data with this rubric:

{table}

Computed signals:
{signals}

Report the computed grade exactly as **TA Grade: {grade}** followed by \
**Grade Rationale:** in 2-3 sentences that explain it from the signals above.

Stay grounded in the data provided. If the history is short, say so.",
        table = rubric::rubric_table(),
        signals = assessment.describe(),
        grade = assessment.grade,
    )
}

fn supplemental_content(
    ticker: &str,
    company: &str,
    artifacts: &[ExtractedContent],
) -> Vec<ContentPart> {
    let mut sources = String::new();
    for artifact in artifacts {
        let (body, _) = truncate_text(&artifact.text, SUPPLEMENTAL_CHARS);
        sources.push_str(&format!(
            "Source: {} ({})\n<content>\n{}\n</content>\n\n",
            artifact.name,
            artifact.kind.as_str(),
            body
        ));
    }

    let mut parts = text(format!(
        "You are analyzing supplemental research material for {company} ({ticker}).

{sources}\
This material was provided as additional context for an investment analysis. Images \
referenced above are attached after this text. Review everything and provide:

1. **Source Type & Credibility**: what each item is and how authoritative it is
2. **Key Takeaways**: the 3-5 most important points for an investment thesis, including \
specific numbers or forecasts
3. **Thesis Impact**: whether the material supports a bullish, bearish or neutral case
4. **Caveats**: outdated, biased or unverified information, and what is missing

Be concise and focus on what is actionable."
    ));

    parts.extend(artifacts.iter().filter_map(|artifact| {
        artifact.image.as_ref().map(|image| ContentPart::Image {
            media_type: image.media_type.clone(),
            data: STANDARD.encode(&image.data),
        })
    }));
    parts
}

fn synthesis_prompt(ticker: &str, company: &str, sections: &[(SectionKind, &str)]) -> String {
    let mut analyses = String::new();
    for (kind, body) in sections {
        let (body, _) = truncate_text(body, synthesis_budget(*kind));
        analyses.push_str(&format!("<{kind}>\n{body}\n</{kind}>\n\n"));
    }

    format!(
        "You are writing the closing section of an investment research report on \
{company} ({ticker}).

The other sections of the report are:

{analyses}\
Write the \"Summary & Key Considerations\" section using this structure:

**Bull Case:**
- three points

**Bear Case:**
- three points

**What to Watch:**
- two key catalysts or decision points

Work only with the analyses above and add no new research. If sections conflict, name \
the discrepancy. If a section is marked unavailable, say which evidence is missing \
instead of guessing. Keep it factual and balanced."
    )
}

fn format_profile(snapshot: &FinancialSnapshot) -> String {
    let profile = &snapshot.profile;
    let mut lines = vec![
        format!("Sector: {}", profile.sector.as_deref().unwrap_or("N/A")),
        format!("Industry: {}", profile.industry.as_deref().unwrap_or("N/A")),
    ];
    if let Some(summary) = &profile.summary {
        lines.push(format!("Summary: {summary}"));
    }
    lines.join("\n")
}

/// Render fundamentals as labelled lines. Missing values print as `N/A`.
pub fn format_financial_data(company: &str, snapshot: &FinancialSnapshot) -> String {
    let f = &snapshot.fundamentals;
    let profile = &snapshot.profile;
    [
        format!("Financial Data for {}", snapshot.ticker),
        format!("Company: {company}"),
        format!("Sector: {}", profile.sector.as_deref().unwrap_or("N/A")),
        format!("Industry: {}", profile.industry.as_deref().unwrap_or("N/A")),
        format!("As of: {}", snapshot.as_of.format("%Y-%m-%d")),
        String::new(),
        "=== VALUATION ===".to_string(),
        format!("Market Cap: {}", fmt_money(f.market_cap)),
        format!("P/E (Trailing): {}", fmt_ratio(f.trailing_pe)),
        format!("P/E (Forward): {}", fmt_ratio(f.forward_pe)),
        format!("Price/Book: {}", fmt_ratio(f.price_to_book)),
        String::new(),
        "=== REVENUE & PROFITABILITY ===".to_string(),
        format!("Revenue (TTM): {}", fmt_money(f.total_revenue)),
        format!("Revenue Growth: {}", fmt_pct(f.revenue_growth)),
        format!("Gross Margin: {}", fmt_pct(f.gross_margin)),
        format!("Operating Margin: {}", fmt_pct(f.operating_margin)),
        format!("Net Margin: {}", fmt_pct(f.net_margin)),
        format!("ROE: {}", fmt_pct(f.return_on_equity)),
        String::new(),
        "=== BALANCE SHEET ===".to_string(),
        format!("Total Cash: {}", fmt_money(f.total_cash)),
        format!("Total Debt: {}", fmt_money(f.total_debt)),
        format!("Debt/Equity: {}", fmt_ratio(f.debt_to_equity)),
        format!("Current Ratio: {}", fmt_ratio(f.current_ratio)),
        String::new(),
        "=== CASH FLOW ===".to_string(),
        format!("Operating Cash Flow: {}", fmt_money(f.operating_cash_flow)),
        format!("Free Cash Flow: {}", fmt_money(f.free_cash_flow)),
        String::new(),
        "=== PRICE CONTEXT ===".to_string(),
        format!("52-Week High: {}", fmt_money(f.week52_high)),
        format!("52-Week Low: {}", fmt_money(f.week52_low)),
        format!("Beta: {}", fmt_ratio(f.beta)),
    ]
    .join("\n")
}

/// Render a price summary as labelled lines.
pub fn format_price_data(ticker: &str, price: &PriceSummary) -> String {
    let mut lines = vec![
        format!("Price Data for {ticker}"),
        format!("Period: Last {} trading days", price.trading_days),
        String::new(),
        format!("Current Price: ${:.2}", price.current_price),
    ];
    if let Some(prev) = price.previous_close {
        let change = price.current_price - prev;
        let pct = if prev != 0.0 { change / prev * 100.0 } else { 0.0 };
        lines.push(format!("Previous Close: ${prev:.2}"));
        lines.push(format!("Change: ${change:.2} ({pct:+.2}%)"));
    }

    lines.push(String::new());
    lines.push("=== MOVING AVERAGES ===".to_string());
    for (label, ma) in [("50", price.ma50), ("200", price.ma200)] {
        match ma {
            Some(ma) => {
                lines.push(format!("{label}-Day MA: ${ma:.2}"));
                if ma != 0.0 {
                    let from = (price.current_price - ma) / ma * 100.0;
                    lines.push(format!("Price vs {label}-MA: {from:+.2}%"));
                }
            }
            None => lines.push(format!("{label}-Day MA: N/A")),
        }
    }

    lines.push(String::new());
    lines.push("=== PERIOD STATISTICS ===".to_string());
    lines.push(format!("Period High: ${:.2}", price.period_high));
    lines.push(format!("Period Low: ${:.2}", price.period_low));
    lines.push(format!("Average Volume: {}", fmt_volume(price.average_volume)));

    if let (Some(ret), Some(up), Some(down)) =
        (price.return_20d_pct, price.up_days_20d, price.down_days_20d)
    {
        lines.push(String::new());
        lines.push("=== LAST 20 DAYS ===".to_string());
        lines.push(format!("Return: {ret:+.2}%"));
        lines.push(format!("Up Days: {up}"));
        lines.push(format!("Down Days: {down}"));
        if let Some(recent) = price.recent_average_volume {
            lines.push(format!("Average Volume: {}", fmt_volume(recent)));
        }
        if let Some(ratio) = price.volume_ratio() {
            lines.push(format!("Volume vs Period Average: {ratio:.2}x"));
        }
    }

    lines.join("\n")
}

fn fmt_money(value: Option<Decimal>) -> String {
    let Some(value) = value else {
        return "N/A".to_string();
    };
    let billion = Decimal::from(1_000_000_000u64);
    let million = Decimal::from(1_000_000u64);
    let sign = if value.is_sign_negative() { "-" } else { "" };
    let abs = value.abs();
    if abs >= billion {
        format!("{sign}${:.2}B", (abs / billion).round_dp(2))
    } else if abs >= million {
        format!("{sign}${:.2}M", (abs / million).round_dp(2))
    } else {
        format!("{sign}${:.2}", abs.round_dp(2))
    }
}

fn fmt_pct(value: Option<Decimal>) -> String {
    match value {
        Some(v) => format!("{:.2}%", (v * Decimal::ONE_HUNDRED).round_dp(2)),
        None => "N/A".to_string(),
    }
}

fn fmt_ratio(value: Option<Decimal>) -> String {
    match value {
        Some(v) => format!("{:.2}", v.round_dp(2)),
        None => "N/A".to_string(),
    }
}

/// Whole-number volume with thousands separators.
fn fmt_volume(volume: f64) -> String {
    let digits = format!("{:.0}", volume.max(0.0));
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
