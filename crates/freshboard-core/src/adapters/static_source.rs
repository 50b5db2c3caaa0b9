use crate::data_source::{
    AdapterCapabilities, AdapterFuture, FetchRequest, FetchedData, SourceAdapter, SourceCheck,
};
use crate::{DataSourceConfig, UtcDateTime};

/// Adapter for immutable historical datasets.
///
/// Always available and never refreshed: `fetch` returns no records and
/// reports no progress.
#[derive(Debug, Clone, Copy)]
pub struct StaticAdapter {
    started_at: UtcDateTime,
}

impl Default for StaticAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticAdapter {
    pub fn new() -> Self {
        Self {
            started_at: UtcDateTime::now(),
        }
    }

    /// Timestamp reported for datasets without `createdAt`.
    pub fn with_started_at(started_at: UtcDateTime) -> Self {
        Self { started_at }
    }

    fn created_at(&self, source: &DataSourceConfig) -> UtcDateTime {
        source.created_at.unwrap_or(self.started_at)
    }
}

impl SourceAdapter for StaticAdapter {
    fn name(&self) -> &'static str {
        "static"
    }

    fn check<'a>(&'a self, source: &'a DataSourceConfig) -> AdapterFuture<'a, SourceCheck> {
        let check = SourceCheck::available_at(self.created_at(source), None);
        Box::pin(async move { Ok(check) })
    }

    fn fetch<'a>(&'a self, request: FetchRequest<'a>) -> AdapterFuture<'a, FetchedData> {
        let last_updated_at = self.created_at(request.source);
        Box::pin(async move {
            Ok(FetchedData {
                records: Vec::new(),
                last_updated_at,
            })
        })
    }

    fn capabilities(&self, _source: &DataSourceConfig) -> AdapterCapabilities {
        AdapterCapabilities {
            available_methods: Vec::new(),
            requires_auth: false,
            estimated_duration_ms: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refresh::ProgressReporter;
    use crate::validation::ValidatorSet;
    use crate::ChartType;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    #[tokio::test]
    async fn reports_created_at_and_fetches_nothing() {
        let created = UtcDateTime::parse("2023-01-01T00:00:00Z").expect("timestamp");
        let source = DataSourceConfig::static_dataset("history.json", created);
        let adapter = StaticAdapter::new();

        let check = adapter.check(&source).await.expect("check");
        assert!(check.available);
        assert_eq!(check.last_updated_at, Some(created));

        let chart = ChartType::parse("history").expect("chart type");
        let reporter = ProgressReporter::new(Uuid::new_v4(), chart.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        reporter.attach(tx);
        let validators = ValidatorSet::new();
        let fetched = adapter
            .fetch(FetchRequest {
                chart_type: &chart,
                source: &source,
                validation: None,
                validators: &validators,
                progress: &reporter,
            })
            .await
            .expect("fetch");

        assert!(fetched.records.is_empty());
        assert_eq!(fetched.last_updated_at, created);
        assert!(rx.try_recv().is_err(), "static fetch emits no progress");
    }

    #[tokio::test]
    async fn falls_back_to_construction_time() {
        let started = UtcDateTime::parse("2024-05-01T12:00:00Z").expect("timestamp");
        let mut source = DataSourceConfig::static_dataset("history.json", started);
        source.created_at = None;

        let check = StaticAdapter::with_started_at(started)
            .check(&source)
            .await
            .expect("check");
        assert_eq!(check.last_updated_at, Some(started));
    }
}
