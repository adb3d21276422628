pub mod artifact;
pub mod config;
pub mod report;
pub mod report_request;
pub mod section;
pub mod snapshot;

pub use artifact::{ArtifactKind, ArtifactWarning, ExtractedContent, ImageData, UploadedArtifact};
pub use config::{
    GatewayConfig, IngestConfig, PipelineConfig, RetryConfig, SectionConfig, StockbriefConfig,
};
pub use report::{GenerationMetadata, Report, ReportStatus, TokenUsage};
pub use report_request::{ChartConfig, ChartPeriod, ReportRequest, RequestError};
pub use section::{Grade, SectionKind, SectionResult, SectionSpec, SectionStatus};
pub use snapshot::{
    CompanyProfile, DailyBar, FinancialSnapshot, Fundamentals, NewsItem, PriceSummary,
};
