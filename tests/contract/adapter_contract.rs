use std::io::Write as _;
use std::sync::Arc;

use freshboard_core::{
    refresh::ProgressReporter, ChartType, CredentialStore, DataSourceConfig, FetchRequest,
    FileWatchAdapter, PollingServiceAdapter, RefreshMethod, ServiceClient, ServiceRequest,
    ServiceResponse, SourceAdapter, StaticAdapter, UtcDateTime, ValidatorSet,
};
use serde_json::json;
use tempfile::TempDir;
use uuid::Uuid;

struct EchoClient;

impl ServiceClient for EchoClient {
    fn call<'a>(&'a self, request: ServiceRequest) -> freshboard_core::service_client::ServiceFuture<'a> {
        Box::pin(async move {
            Ok(ServiceResponse::ok(json!({
                "data": [{ "endpoint": request.endpoint, "value": 1 }]
            })))
        })
    }
}

struct AdapterCase {
    name: &'static str,
    adapter: Arc<dyn SourceAdapter>,
    source: DataSourceConfig,
    expects_records: bool,
}

fn adapter_cases(dir: &TempDir) -> Vec<AdapterCase> {
    let path = dir.path().join("usage.json");
    let mut file = std::fs::File::create(&path).expect("create fixture");
    file.write_all(br#"[{ "day": "mon", "cost": 1.5 }, { "day": "tue", "cost": 2.0 }]"#)
        .expect("write fixture");

    vec![
        AdapterCase {
            name: "file-watch",
            adapter: Arc::new(FileWatchAdapter::new(false)),
            source: DataSourceConfig::manual_file(path.to_string_lossy().into_owned()),
            expects_records: true,
        },
        AdapterCase {
            name: "polling",
            adapter: Arc::new(
                PollingServiceAdapter::new(Arc::new(EchoClient))
                    .with_credentials(CredentialStore::isolated()),
            ),
            source: DataSourceConfig::cli_api("billing", "https://billing.example.test/usage"),
            expects_records: true,
        },
        AdapterCase {
            name: "static",
            adapter: Arc::new(StaticAdapter::new()),
            source: DataSourceConfig::static_dataset(
                "archive/2023.json",
                UtcDateTime::parse("2024-01-01T00:00:00Z").expect("timestamp"),
            ),
            expects_records: false,
        },
    ]
}

fn chart() -> ChartType {
    ChartType::parse("usage-trend").expect("chart type")
}

#[tokio::test]
async fn fetch_returns_records_with_a_past_timestamp_for_all_adapters() {
    let dir = TempDir::new().expect("temp dir");
    let validators = ValidatorSet::new();
    let chart_type = chart();
    let progress = ProgressReporter::new(Uuid::new_v4(), chart_type.clone());

    for case in adapter_cases(&dir) {
        let request = FetchRequest {
            chart_type: &chart_type,
            source: &case.source,
            validation: None,
            validators: &validators,
            progress: &progress,
        };
        let fetched = case
            .adapter
            .fetch(request)
            .await
            .unwrap_or_else(|error| panic!("adapter '{}' fetch failed: {error}", case.name));

        assert_eq!(
            !fetched.records.is_empty(),
            case.expects_records,
            "adapter '{}': record presence",
            case.name
        );
        assert!(
            fetched.last_updated_at <= UtcDateTime::now(),
            "adapter '{}': timestamp in the future",
            case.name
        );
    }
}

#[tokio::test]
async fn check_reports_availability_after_a_successful_fetch() {
    let dir = TempDir::new().expect("temp dir");
    let validators = ValidatorSet::new();
    let chart_type = chart();
    let progress = ProgressReporter::new(Uuid::new_v4(), chart_type.clone());

    for case in adapter_cases(&dir) {
        let request = FetchRequest {
            chart_type: &chart_type,
            source: &case.source,
            validation: None,
            validators: &validators,
            progress: &progress,
        };
        case.adapter.fetch(request).await.expect("fetch");

        let check = case
            .adapter
            .check(&case.source)
            .await
            .unwrap_or_else(|error| panic!("adapter '{}' check failed: {error}", case.name));
        assert!(check.available, "adapter '{}': available", case.name);
        assert!(
            check.last_updated_at.is_some(),
            "adapter '{}': timestamp present",
            case.name
        );
    }
}

#[test]
fn never_refresh_method_offers_no_methods_for_all_adapters() {
    let dir = TempDir::new().expect("temp dir");

    for case in adapter_cases(&dir) {
        let source = case.source.clone().with_refresh_method(RefreshMethod::Never);
        let capabilities = case.adapter.capabilities(&source);
        assert!(
            capabilities.available_methods.is_empty(),
            "adapter '{}': methods for a never source",
            case.name
        );
        assert!(!capabilities.requires_auth, "adapter '{}': auth", case.name);
    }
}

#[test]
fn user_trigger_is_offered_by_every_refreshable_adapter() {
    let dir = TempDir::new().expect("temp dir");

    for case in adapter_cases(&dir)
        .into_iter()
        .filter(|case| case.source.refresh_method != RefreshMethod::Never)
    {
        let capabilities = case.adapter.capabilities(&case.source);
        assert!(
            capabilities
                .available_methods
                .contains(&RefreshMethod::UserTrigger),
            "adapter '{}': user trigger",
            case.name
        );
    }
}

#[tokio::test]
async fn adapter_names_are_distinct() {
    let dir = TempDir::new().expect("temp dir");
    let mut names = adapter_cases(&dir)
        .iter()
        .map(|case| case.adapter.name())
        .collect::<Vec<_>>();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), 3);
}
