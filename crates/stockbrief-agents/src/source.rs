use async_trait::async_trait;
use stockbrief_models::snapshot::FinancialSnapshot;

use crate::error::DataUnavailable;

/// Supplies the market-data snapshot a report is written from.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self, ticker: &str) -> Result<FinancialSnapshot, DataUnavailable>;
}

/// Serves snapshots held in memory, keyed by ticker.
#[derive(Debug, Clone, Default)]
pub struct StaticSnapshotSource {
    snapshots: Vec<FinancialSnapshot>,
}

impl StaticSnapshotSource {
    pub fn new(snapshots: Vec<FinancialSnapshot>) -> Self {
        Self { snapshots }
    }
}

#[async_trait]
impl SnapshotSource for StaticSnapshotSource {
    async fn fetch(&self, ticker: &str) -> Result<FinancialSnapshot, DataUnavailable> {
        self.snapshots
            .iter()
            .find(|s| s.ticker.eq_ignore_ascii_case(ticker))
            .cloned()
            .ok_or_else(|| DataUnavailable {
                ticker: ticker.to_string(),
                reason: "no snapshot loaded for this ticker".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_snapshot;

    #[tokio::test]
    async fn finds_snapshot_case_insensitively() {
        let source = StaticSnapshotSource::new(vec![sample_snapshot("ACME")]);
        let snapshot = source.fetch("acme").await.unwrap();
        assert_eq!(snapshot.ticker, "ACME");
    }

    #[tokio::test]
    async fn unknown_ticker_unavailable() {
        let source = StaticSnapshotSource::default();
        let err = source.fetch("NOPE").await.unwrap_err();
        assert_eq!(err.ticker, "NOPE");
    }
}
