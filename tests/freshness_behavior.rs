//! Behavior tests for freshness evaluation
//!
//! Pure evaluation is checked directly; probe-driven status is checked
//! through an engine with fixed-timestamp adapters.

use std::sync::Arc;

use freshboard_core::{
    evaluate, AdapterCapabilities, AdapterFuture, ChartDataDependency, ChartType,
    DataFreshnessConfig, DataSourceConfig, EngineConfig, FetchRequest, FetchedData,
    FreshnessEngine, RefreshPolicy, RegistrySettings, SourceAdapter, SourceCheck, SourceError,
    SourceType, StatusKind, UtcDateTime,
};

struct ProbeAdapter {
    last_updated_at: Option<UtcDateTime>,
}

impl SourceAdapter for ProbeAdapter {
    fn name(&self) -> &'static str {
        "probe"
    }

    fn check<'a>(&'a self, _source: &'a DataSourceConfig) -> AdapterFuture<'a, SourceCheck> {
        Box::pin(async move {
            Ok(match self.last_updated_at {
                Some(at) => SourceCheck::available_at(at, None),
                None => SourceCheck::unavailable(),
            })
        })
    }

    fn fetch<'a>(&'a self, _request: FetchRequest<'a>) -> AdapterFuture<'a, FetchedData> {
        Box::pin(async { Err(SourceError::unavailable("probe only")) })
    }

    fn capabilities(&self, _source: &DataSourceConfig) -> AdapterCapabilities {
        AdapterCapabilities {
            available_methods: Vec::new(),
            requires_auth: false,
            estimated_duration_ms: None,
        }
    }
}

fn chart(name: &str) -> ChartType {
    ChartType::parse(name).expect("chart type")
}

fn now() -> UtcDateTime {
    UtcDateTime::parse("2024-06-01T12:00:00Z").expect("timestamp")
}

fn engine_probing(
    last_updated_at: Option<UtcDateTime>,
    dependencies: Vec<ChartDataDependency>,
) -> (FreshnessEngine, freshboard_core::LoadReport) {
    let probe = Arc::new(ProbeAdapter { last_updated_at });
    FreshnessEngine::builder()
        .with_adapter(SourceType::Manual, Arc::clone(&probe) as Arc<dyn SourceAdapter>)
        .with_adapter(SourceType::CliApi, probe)
        .build(
            EngineConfig::new(dependencies)
                .with_settings(RegistrySettings::default().with_file_watching(false)),
        )
        .expect("engine builds")
}

// =============================================================================
// Pure evaluation
// =============================================================================

#[test]
fn grace_period_applies_to_manual_sources_only() {
    // Given: thresholds of 4h/24h with an 8h grace and data 10h old
    let config = DataFreshnessConfig::new(4.0, 24.0).with_grace_period(8.0);
    let last_updated_at = Some(now().minus_hours(10.0));

    // Then: manual data is still within 4h + 8h, polled data is not
    let manual = evaluate(&config, SourceType::Manual, last_updated_at, now());
    let polled = evaluate(&config, SourceType::CliApi, last_updated_at, now());
    assert_eq!(manual.status, StatusKind::Available);
    assert_eq!(polled.status, StatusKind::Stale);
    assert!((manual.age_hours - 10.0).abs() < 1e-6);
}

#[test]
fn thresholds_are_inclusive_upper_bounds() {
    let config = DataFreshnessConfig::new(4.0, 24.0);

    let at_warning = evaluate(&config, SourceType::CliApi, Some(now().minus_hours(4.0)), now());
    let at_error = evaluate(&config, SourceType::CliApi, Some(now().minus_hours(24.0)), now());
    let past_error = evaluate(&config, SourceType::CliApi, Some(now().minus_hours(24.5)), now());

    assert_eq!(at_warning.status, StatusKind::Available);
    assert_eq!(at_error.status, StatusKind::Stale);
    assert_eq!(past_error.status, StatusKind::Error);
}

#[test]
fn severity_never_improves_as_data_ages() {
    let config = DataFreshnessConfig::new(2.0, 12.0).with_grace_period(1.0);

    for source_type in [SourceType::Manual, SourceType::CliApi, SourceType::Hybrid] {
        let mut previous = 0_u8;
        for quarter_hours in 0..=80 {
            let age = f64::from(quarter_hours) / 4.0;
            let verdict = evaluate(&config, source_type, Some(now().minus_hours(age)), now());
            let severity = verdict.status.severity().expect("on the degradation axis");
            assert!(
                severity >= previous,
                "{source_type}: age {age}h improved from {previous} to {severity}"
            );
            previous = severity;
        }
        assert_eq!(previous, 2, "{source_type}: oldest data should be an error");
    }
}

#[test]
fn identical_inputs_give_identical_verdicts() {
    let config = DataFreshnessConfig::new(4.0, 24.0).with_grace_period(2.0);
    let last_updated_at = Some(now().minus_hours(5.5));

    let first = evaluate(&config, SourceType::Manual, last_updated_at, now());
    let second = evaluate(&config, SourceType::Manual, last_updated_at, now());
    assert_eq!(first, second);
}

#[test]
fn static_data_never_ages_and_absent_data_is_missing() {
    let config = DataFreshnessConfig::new(1.0, 2.0);

    let ancient = evaluate(
        &config,
        SourceType::Static,
        Some(now().minus_hours(24.0 * 365.0)),
        now(),
    );
    let absent = evaluate(&config, SourceType::CliApi, None, now());

    assert_eq!(ancient.status, StatusKind::Available);
    assert_eq!(absent.status, StatusKind::Missing);
    assert_eq!(absent.age_hours, 0.0);
}

// =============================================================================
// Probe-driven status
// =============================================================================

#[tokio::test]
async fn status_check_applies_source_specific_thresholds() {
    // Given: a manual and a polled chart whose data is 10h old
    let freshness = DataFreshnessConfig::new(4.0, 24.0).with_grace_period(8.0);
    let (engine, report) = engine_probing(
        Some(UtcDateTime::now().minus_hours(10.0)),
        vec![
            ChartDataDependency::new(
                chart("uploads"),
                DataSourceConfig::manual_file("/data/uploads.csv"),
                freshness,
            ),
            ChartDataDependency::new(
                chart("billing"),
                DataSourceConfig::cli_api("billing", "https://billing.example.test/usage"),
                freshness,
            ),
        ],
    );
    assert!(report.is_clean());

    // When: both are checked
    let uploads = engine.check_status(&chart("uploads")).await.expect("status");
    let billing = engine.check_status(&chart("billing")).await.expect("status");

    // Then: only the manual one benefits from the grace period
    assert_eq!(uploads.status, StatusKind::Available);
    assert_eq!(billing.status, StatusKind::Stale);
    assert!(billing.age_hours >= 10.0);
}

#[tokio::test]
async fn unavailable_source_without_prior_data_is_missing() {
    let (engine, _) = engine_probing(
        None,
        vec![ChartDataDependency::new(
            chart("uploads"),
            DataSourceConfig::manual_file("/data/uploads.csv"),
            DataFreshnessConfig::new(4.0, 24.0).blocking(),
        )],
    );

    let status = engine.check_status(&chart("uploads")).await.expect("status");
    assert_eq!(status.status, StatusKind::Missing);
    assert!(status.last_updated_at.is_none());
    assert!(engine.should_block_render(&chart("uploads")).await);
}

#[tokio::test]
async fn passive_ageing_degrades_status_over_time() {
    // Given: a chart checked while its data is 3h old
    let (engine, _) = engine_probing(
        Some(UtcDateTime::now().minus_hours(3.0)),
        vec![ChartDataDependency::new(
            chart("billing"),
            DataSourceConfig::cli_api("billing", "https://billing.example.test/usage"),
            DataFreshnessConfig::new(4.0, 24.0),
        )],
    );
    let checked = engine.check_status(&chart("billing")).await.expect("status");
    assert_eq!(checked.status, StatusKind::Available);

    // When: the registry is re-evaluated two hours later
    let later = UtcDateTime::now().plus_millis(2 * 60 * 60 * 1_000);
    let changes = engine.registry().evaluate_all(later);

    // Then: the chart turned stale without any I/O
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].chart_type, chart("billing"));
    assert_eq!(changes[0].current.status, StatusKind::Stale);
    assert_eq!(
        engine.status(&chart("billing")).expect("status").status,
        StatusKind::Stale
    );
}

// =============================================================================
// Static datasets
// =============================================================================

#[tokio::test]
async fn static_dataset_is_always_available_and_never_refreshes() {
    // Given: a static dataset that was configured with auto refresh
    let created_at = UtcDateTime::parse("2023-01-01T00:00:00Z").expect("timestamp");
    let dependency = ChartDataDependency::new(
        chart("archive"),
        DataSourceConfig::static_dataset("archive/2023.json", created_at),
        DataFreshnessConfig::new(1.0, 2.0),
    )
    .with_policy(RefreshPolicy::auto(60_000));

    let (engine, report) = FreshnessEngine::builder()
        .build(
            EngineConfig::new(vec![dependency])
                .with_settings(RegistrySettings::default().with_file_watching(false)),
        )
        .expect("engine builds");

    // Then: the conflicting setting was overridden, not rejected
    assert!(report.rejected.is_empty());
    assert_eq!(report.overridden, vec![(chart("archive"), vec!["autoRefresh"])]);

    engine.start().await;
    assert!(engine.scheduler().scheduled_charts().is_empty());

    let status = engine.status(&chart("archive")).expect("status");
    assert_eq!(status.status, StatusKind::Available);
    assert_eq!(status.last_updated_at, Some(created_at));

    let capability = engine.capabilities(&chart("archive")).expect("capability");
    assert!(!capability.can_refresh);
    assert_eq!(capability.reason, "static dataset never refreshes");
    assert!(capability.available_methods.is_empty());

    let result = engine.refresh(&chart("archive")).await;
    assert_eq!(result.error.expect("error").code, "refresh.not_allowed");

    engine.shutdown();
}

#[tokio::test]
async fn static_dataset_with_auto_refresh_and_no_interval_loads_as_never() {
    // Given: a config document asking a static dataset to auto refresh
    let input = r#"{
        "settings": { "enableFileWatching": false },
        "dependencies": [
            {
                "chartType": "history",
                "primarySource": {
                    "type": "static",
                    "location": "archive/history.json",
                    "refreshMethod": "never",
                    "createdAt": "2023-01-01T00:00:00Z"
                },
                "freshness": { "warningThresholdHours": 1, "errorThresholdHours": 2 },
                "refreshPolicy": { "autoRefresh": true }
            }
        ]
    }"#;

    // When: the engine is built from it
    let config = EngineConfig::from_json_str(input).expect("document parses");
    let (engine, report) = FreshnessEngine::from_config(config).expect("engine builds");

    // Then: the entry is loaded with auto refresh coerced off
    assert!(report.rejected.is_empty(), "{:?}", report.rejected);
    assert_eq!(report.loaded, vec![chart("history")]);
    assert_eq!(report.overridden, vec![(chart("history"), vec!["autoRefresh"])]);

    engine.start().await;
    assert!(engine.scheduler().scheduled_charts().is_empty());
    assert_eq!(
        engine.status(&chart("history")).expect("status").status,
        StatusKind::Available
    );
    engine.shutdown();
}
