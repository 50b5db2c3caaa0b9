//! Behavior tests for file-backed charts
//!
//! Real files in a temp directory, read through the engine's default
//! file adapter.

use std::path::{Path, PathBuf};
use std::time::Duration;

use freshboard_core::{
    ChartDataDependency, ChartType, DataFreshnessConfig, DataSourceConfig, EngineConfig,
    FreshnessEngine, RegistrySettings, SourceType, StatusKind, UpdateSource, UtcDateTime,
    ValidationRules,
};
use serde_json::json;
use tempfile::TempDir;

fn chart(name: &str) -> ChartType {
    ChartType::parse(name).expect("chart type")
}

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).expect("write fixture");
    path
}

fn location(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn file_chart(name: &str, path: &Path) -> ChartDataDependency {
    ChartDataDependency::new(
        chart(name),
        DataSourceConfig::manual_file(location(path)),
        DataFreshnessConfig::new(4.0, 24.0),
    )
}

fn engine(dependencies: Vec<ChartDataDependency>, watching: bool) -> FreshnessEngine {
    let (engine, report) = FreshnessEngine::builder()
        .build(
            EngineConfig::new(dependencies)
                .with_settings(RegistrySettings::default().with_file_watching(watching)),
        )
        .expect("engine builds");
    assert!(report.is_clean(), "{report:?}");
    engine
}

const USAGE_JSON: &str = r#"[{ "day": "mon", "cost": 1.5 }, { "day": "tue", "cost": 2.0 }]"#;

#[tokio::test]
async fn recently_written_file_checks_available() {
    let dir = TempDir::new().expect("temp dir");
    let path = write(&dir, "usage.json", USAGE_JSON);
    let engine = engine(vec![file_chart("usage", &path)], false);

    let status = engine.check_status(&chart("usage")).await.expect("status");

    assert_eq!(status.status, StatusKind::Available);
    let last_updated_at = status.last_updated_at.expect("modification time");
    assert!(last_updated_at <= UtcDateTime::now());
    assert!(status.age_hours < 1.0);
}

#[tokio::test]
async fn json_file_refresh_caches_its_records() {
    let dir = TempDir::new().expect("temp dir");
    let path = write(&dir, "usage.json", USAGE_JSON);
    let engine = engine(vec![file_chart("usage", &path)], false);

    let result = engine.refresh(&chart("usage")).await;

    assert!(result.success, "{result:?}");
    assert_eq!(result.record_count, 2);
    assert_eq!(result.source.expect("origin").location, location(&path));

    let cached = engine.cached_data(&chart("usage")).await.expect("cached");
    assert!(!cached.expired);
    assert_eq!(cached.data.records[1].get("cost"), Some(&json!(2.0)));

    let status = engine.status(&chart("usage")).expect("status");
    assert_eq!(status.status, StatusKind::Available);
    assert_eq!(status.last_update_source, Some(UpdateSource::Manual));
}

#[tokio::test]
async fn csv_files_are_typed_and_concatenated_across_locations() {
    // Given: a chart reading two CSV exports
    let dir = TempDir::new().expect("temp dir");
    let january = write(&dir, "january.csv", "day,cost,billed\n1,1.5,true\n2,\"2.25\",false\n");
    let february = write(&dir, "february.csv", "day,cost,billed\n1,3,true\n");
    let dependency = ChartDataDependency::new(
        chart("costs"),
        DataSourceConfig::manual_file(location(&january))
            .with_locations(vec![location(&january), location(&february)]),
        DataFreshnessConfig::new(4.0, 24.0),
    );
    let engine = engine(vec![dependency], false);

    // When: it is refreshed
    let result = engine.refresh(&chart("costs")).await;

    // Then: rows of both files are cached with typed cells
    assert!(result.success, "{result:?}");
    assert_eq!(result.record_count, 3);
    let cached = engine.cached_data(&chart("costs")).await.expect("cached");
    let first = &cached.data.records[0];
    assert_eq!(first.get("cost"), Some(&json!(1.5)));
    assert_eq!(first.get("billed"), Some(&json!(true)));
    assert_eq!(cached.data.records[2].get("cost"), Some(&json!(3)));
}

#[tokio::test]
async fn csv_cells_with_quoted_commas_refresh_successfully() {
    let dir = TempDir::new().expect("temp dir");
    let path = write(
        &dir,
        "vendors.csv",
        "vendor,cost\n\"Acme, Inc\",3\n\"Globex \"\"West\"\"\",4.5\n",
    );
    let engine = engine(vec![file_chart("vendors", &path)], false);

    let result = engine.refresh(&chart("vendors")).await;

    assert!(result.success, "{result:?}");
    assert_eq!(result.record_count, 2);
    let cached = engine.cached_data(&chart("vendors")).await.expect("cached");
    assert_eq!(cached.data.records[0].get("vendor"), Some(&json!("Acme, Inc")));
    assert_eq!(cached.data.records[1].get("vendor"), Some(&json!("Globex \"West\"")));
    assert_eq!(cached.data.records[1].get("cost"), Some(&json!(4.5)));
}

#[tokio::test]
async fn too_few_rows_fail_validation_and_mark_the_chart_in_error() {
    let dir = TempDir::new().expect("temp dir");
    let path = write(&dir, "usage.json", USAGE_JSON);
    let rules = ValidationRules {
        min_rows: Some(10),
        ..ValidationRules::default()
    };
    let engine = engine(vec![file_chart("usage", &path).with_validation(rules)], false);

    let result = engine.refresh(&chart("usage")).await;

    let error = result.error.expect("error");
    assert_eq!(error.code, "source.validation");
    assert!(!error.retryable);
    assert_eq!(result.attempts, 1);
    let status = engine.status(&chart("usage")).expect("status");
    assert_eq!(status.status, StatusKind::Error);
    assert!(status.error.is_some());
    assert!(engine.cached_data(&chart("usage")).await.is_none());
}

#[tokio::test]
async fn unparseable_file_is_a_validation_failure() {
    let dir = TempDir::new().expect("temp dir");
    let path = write(&dir, "usage.json", "{ not json");
    let engine = engine(vec![file_chart("usage", &path)], false);

    let result = engine.refresh(&chart("usage")).await;

    assert_eq!(result.error.expect("error").code, "source.validation");
}

#[tokio::test]
async fn missing_file_is_missing_and_refresh_reports_not_found() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("absent.json");
    let engine = engine(vec![file_chart("usage", &path)], false);

    let status = engine.check_status(&chart("usage")).await.expect("status");
    assert_eq!(status.status, StatusKind::Missing);

    let result = engine.refresh(&chart("usage")).await;
    let error = result.error.expect("error");
    assert_eq!(error.code, "source.not_found");
    assert!(!error.retryable);
}

#[tokio::test]
async fn hybrid_source_with_a_file_location_reads_the_file() {
    let dir = TempDir::new().expect("temp dir");
    let path = write(&dir, "usage.json", USAGE_JSON);
    let mut source = DataSourceConfig::manual_file(location(&path));
    source.source_type = SourceType::Hybrid;
    let dependency = ChartDataDependency::new(
        chart("usage"),
        source,
        DataFreshnessConfig::new(4.0, 24.0),
    );
    let engine = engine(vec![dependency], false);

    let result = engine.refresh(&chart("usage")).await;

    assert!(result.success, "{result:?}");
    assert_eq!(result.record_count, 2);
}

#[tokio::test]
async fn reported_file_change_refreshes_file_watch_charts() {
    // Given: a started engine over a file nobody has refreshed yet
    let dir = TempDir::new().expect("temp dir");
    let path = write(&dir, "usage.json", USAGE_JSON);
    let engine = engine(vec![file_chart("usage", &path)], false);
    engine.start().await;
    assert!(engine.cached_data(&chart("usage")).await.is_none());

    // When: the host reports that the file changed
    std::fs::write(&path, r#"[{ "day": "wed", "cost": 4.0 }]"#).expect("rewrite");
    engine
        .file_adapter()
        .on_file_changed(&path, UtcDateTime::now());

    // Then: a background refresh picks up the new content
    let mut cached = None;
    for _ in 0..200 {
        cached = engine.cached_data(&chart("usage")).await;
        if cached.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let cached = cached.expect("file change triggered a refresh");
    assert_eq!(cached.data.records.len(), 1);
    assert_eq!(cached.data.records[0].get("day"), Some(&json!("wed")));

    engine.shutdown();
}

#[tokio::test]
async fn starting_with_watching_enabled_watches_configured_files() {
    let dir = TempDir::new().expect("temp dir");
    let path = write(&dir, "usage.json", USAGE_JSON);
    let engine = engine(vec![file_chart("usage", &path)], true);

    engine.start().await;
    assert!(engine.file_adapter().is_watched(&location(&path)));
    assert_eq!(
        engine.status(&chart("usage")).expect("status").status,
        StatusKind::Available
    );

    engine.shutdown();
    assert!(engine.file_adapter().watched_paths().is_empty());
    assert!(!engine.is_running());
}
