//! Composition root: builds the registry, adapters and scheduler from an
//! [`EngineConfig`] and owns their lifecycle.
//!
//! ```text
//! EngineConfig ──▶ EngineBuilder::build ──▶ FreshnessEngine
//!                                              │
//!            ┌─────────────────┬───────────────┼────────────────┐
//!            ▼                 ▼               ▼                ▼
//!   DependencyRegistry  RefreshScheduler   StatusBoard   FileWatchAdapter
//!                         │                                    │
//!                         ▼                                    ▼
//!                     AdapterSet ◀──── change listener ◀── notify events
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::adapters::{
    is_file_backed, AdapterSet, FileChangeEvent, FileWatchAdapter, PollingServiceAdapter,
    StaticAdapter,
};
use crate::cache::{CacheStore, CachedData};
use crate::config::EngineConfig;
use crate::data_source::SourceAdapter;
use crate::refresh::{DataRefreshRequest, DataRefreshResult, RefreshPriority, RefreshTrigger};
use crate::registry::{DependencyRegistry, LoadReport};
use crate::scheduler::{RefreshScheduler, DEFAULT_ADAPTER_TIMEOUT};
use crate::service_client::{ReqwestServiceClient, ServiceClient};
use crate::service_policy::CredentialStore;
use crate::status_board::StatusBoard;
use crate::throttling::ServiceRateLimiters;
use crate::validation::ValidatorSet;
use crate::{
    ChartRefreshCapability, ChartType, CoreError, DataSourceStatus, RefreshMethod, SourceType,
    StatusKind, UtcDateTime,
};

/// How often passive ageing re-evaluates every chart once started.
pub const AGEING_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Builder for [`FreshnessEngine`].
///
/// The polling adapter is wired from, in order:
///
/// | Input | Adapter |
/// |-------|---------|
/// | [`with_service_client`](Self::with_service_client) | polling over the injected client |
/// | `settings.enableCLIDiscovery = true` | polling over [`ReqwestServiceClient`] |
/// | neither | no `cli-api` adapter; such sources fail with `source.adapter_not_registered` |
///
/// Adapters passed to [`with_adapter`](Self::with_adapter) replace the
/// built-in adapter for their source type.
pub struct EngineBuilder {
    service_client: Option<Arc<dyn ServiceClient>>,
    credentials: Option<CredentialStore>,
    rate_limiters: ServiceRateLimiters,
    validators: ValidatorSet,
    adapters: Vec<(SourceType, Arc<dyn SourceAdapter>)>,
    adapter_timeout: Duration,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            service_client: None,
            credentials: None,
            rate_limiters: ServiceRateLimiters::new(),
            validators: ValidatorSet::new(),
            adapters: Vec::new(),
            adapter_timeout: DEFAULT_ADAPTER_TIMEOUT,
        }
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service_client(mut self, client: Arc<dyn ServiceClient>) -> Self {
        self.service_client = Some(client);
        self
    }

    /// Credentials for polled services. Defaults to the process environment.
    pub fn with_credentials(mut self, credentials: CredentialStore) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_rate_limiters(mut self, limiters: ServiceRateLimiters) -> Self {
        self.rate_limiters = limiters;
        self
    }

    /// Registers a named validator referenced by `validation.customValidator`.
    pub fn with_validator<F>(mut self, name: impl Into<String>, validator: F) -> Self
    where
        F: Fn(&[crate::data_source::Record]) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validators.register(name, validator);
        self
    }

    pub fn with_adapter(mut self, source_type: SourceType, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.push((source_type, adapter));
        self
    }

    pub fn with_adapter_timeout(mut self, timeout: Duration) -> Self {
        self.adapter_timeout = timeout;
        self
    }

    /// Builds the engine and loads `config` into its registry.
    ///
    /// # Errors
    ///
    /// Fails only on invalid registry settings. Invalid dependency entries
    /// are rejected individually and listed in the returned [`LoadReport`].
    pub fn build(self, config: EngineConfig) -> Result<(FreshnessEngine, LoadReport), CoreError> {
        let EngineConfig {
            version,
            settings,
            services,
            dependencies,
            rejected,
        } = config;
        settings.validate()?;

        let registry = Arc::new(DependencyRegistry::new(settings, version));
        let report = with_decode_rejections(registry.load(dependencies), rejected);

        let files = Arc::new(FileWatchAdapter::new(settings.enable_file_watching));
        let mut adapters = AdapterSet::new()
            .with_adapter(SourceType::Manual, Arc::clone(&files) as Arc<dyn SourceAdapter>)
            .with_adapter(SourceType::Static, Arc::new(StaticAdapter::new()));

        let client = match self.service_client {
            Some(client) => Some(client),
            None if settings.enable_cli_discovery => {
                Some(Arc::new(ReqwestServiceClient::new()) as Arc<dyn ServiceClient>)
            }
            None => None,
        };
        if let Some(client) = client {
            let polling = PollingServiceAdapter::new(client)
                .with_policies(services)
                .with_credentials(self.credentials.unwrap_or_else(CredentialStore::from_env))
                .with_rate_limiters(self.rate_limiters);
            adapters.insert(SourceType::CliApi, Arc::new(polling));
        }

        for (source_type, adapter) in self.adapters {
            adapters.insert(source_type, adapter);
        }

        let cache = CacheStore::from_millis(settings.default_cache_duration_ms);
        let scheduler = RefreshScheduler::new(
            Arc::clone(&registry),
            adapters.clone(),
            Arc::new(self.validators),
            cache,
        )
        .with_adapter_timeout(self.adapter_timeout);
        let board = StatusBoard::new(Arc::clone(&registry), adapters);

        tracing::info!(
            event = "core.engine.built",
            loaded = report.loaded.len(),
            rejected = report.rejected.len(),
            overridden = report.overridden.len()
        );

        let engine = FreshnessEngine {
            registry,
            scheduler,
            board,
            files,
            lifecycle: CancellationToken::new(),
            started: AtomicBool::new(false),
        };
        Ok((engine, report))
    }
}

/// Owns every component of one dashboard session.
pub struct FreshnessEngine {
    registry: Arc<DependencyRegistry>,
    scheduler: RefreshScheduler,
    board: StatusBoard,
    files: Arc<FileWatchAdapter>,
    lifecycle: CancellationToken,
    started: AtomicBool,
}

impl FreshnessEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Builds an engine with the default adapters.
    pub fn from_config(config: EngineConfig) -> Result<(Self, LoadReport), CoreError> {
        EngineBuilder::new().build(config)
    }

    /// Registers file watches, starts interval timers and background
    /// listeners, then checks every chart once. Calling it again is a no-op.
    ///
    /// Must be called within a tokio runtime.
    pub async fn start(&self) {
        if self.lifecycle.is_cancelled() || self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let watches = self.register_watches();
        self.scheduler.sync_timers();
        self.spawn_change_listener();
        self.spawn_ageing_sweep();

        for chart_type in self.active_charts() {
            self.scheduler.check_status(&chart_type).await;
        }
        tracing::info!(
            event = "core.engine.started",
            charts = self.registry.len(),
            watches,
            timers = self.scheduler.scheduled_charts().len()
        );
    }

    /// Cancels timers, listeners and in-flight operations and drops file
    /// watches. Later refresh requests are rejected.
    pub fn shutdown(&self) {
        if self.lifecycle.is_cancelled() {
            return;
        }
        self.lifecycle.cancel();
        self.scheduler.shutdown();
        self.files.unwatch_all();
        tracing::info!(event = "core.engine.shutdown");
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.lifecycle.is_cancelled()
    }

    pub async fn request_refresh(&self, request: DataRefreshRequest) -> DataRefreshResult {
        self.scheduler.request_refresh(request).await
    }

    /// Manual high-priority refresh of one chart.
    pub async fn refresh(&self, chart_type: &ChartType) -> DataRefreshResult {
        let request = DataRefreshRequest::new(chart_type.clone())
            .with_priority(RefreshPriority::High)
            .with_trigger(RefreshTrigger::Manual);
        self.scheduler.request_refresh(request).await
    }

    /// Adapter `check` folded through the freshness evaluator.
    pub async fn check_status(&self, chart_type: &ChartType) -> Option<DataSourceStatus> {
        self.scheduler.check_status(chart_type).await
    }

    /// Visibility regain. `None` when the chart's policy ignores it.
    pub async fn notify_visible(&self, chart_type: &ChartType) -> Option<DataRefreshResult> {
        self.scheduler.notify_visible(chart_type).await
    }

    /// Applies a new configuration in place.
    ///
    /// Charts keep their status across reloads; charts no longer configured
    /// are retired. Interval timers and file watches follow the new
    /// dependencies once the engine is started.
    ///
    /// # Errors
    ///
    /// Fails on invalid settings, leaving the current configuration intact.
    pub fn reconfigure(&self, config: EngineConfig) -> Result<LoadReport, CoreError> {
        let EngineConfig {
            version,
            settings,
            services: _,
            dependencies,
            rejected,
        } = config;
        settings.validate()?;

        self.registry.set_settings(settings, version);
        let report = with_decode_rejections(self.registry.load(dependencies), rejected);
        self.scheduler
            .set_max_concurrent(settings.max_concurrent_refresh);

        if self.is_running() {
            self.register_watches();
            self.scheduler.sync_timers();
        }
        tracing::info!(
            event = "core.engine.reconfigured",
            loaded = report.loaded.len(),
            rejected = report.rejected.len(),
            retired = report.retired.len()
        );
        Ok(report)
    }

    /// True only when the chart opted into blocking, nothing was ever
    /// fetched for it, and its status is `missing` or `error`.
    pub async fn should_block_render(&self, chart_type: &ChartType) -> bool {
        let Some(entry) = self.registry.get(chart_type) else {
            return false;
        };
        if !entry.config.freshness.block_on_stale {
            return false;
        }
        if !matches!(entry.status.status, StatusKind::Missing | StatusKind::Error) {
            return false;
        }
        entry.status.last_updated_at.is_none() && !self.scheduler.cache().contains(chart_type).await
    }

    pub fn status(&self, chart_type: &ChartType) -> Option<DataSourceStatus> {
        self.board.status(chart_type)
    }

    pub fn capabilities(&self, chart_type: &ChartType) -> Option<ChartRefreshCapability> {
        self.board.capabilities(chart_type)
    }

    /// Last fetched records of the chart, expired or not.
    pub async fn cached_data(&self, chart_type: &ChartType) -> Option<CachedData> {
        self.scheduler.cache().get(chart_type).await
    }

    pub fn status_board(&self) -> StatusBoard {
        self.board.clone()
    }

    pub fn registry(&self) -> &Arc<DependencyRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &RefreshScheduler {
        &self.scheduler
    }

    pub fn file_adapter(&self) -> &Arc<FileWatchAdapter> {
        &self.files
    }

    fn active_charts(&self) -> Vec<ChartType> {
        self.registry
            .entries()
            .into_iter()
            .filter(|entry| !entry.retired)
            .map(|entry| entry.config.chart_type)
            .collect()
    }

    fn register_watches(&self) -> usize {
        if !self.files.watching_enabled() {
            return 0;
        }
        self.registry
            .entries()
            .iter()
            .filter(|entry| !entry.retired)
            .flat_map(|entry| entry.config.sources())
            .filter(|source| is_file_backed(source))
            .map(|source| self.files.watch_source(source))
            .sum()
    }

    fn spawn_change_listener(&self) {
        let mut changes = self.files.subscribe_changes();
        let registry = Arc::clone(&self.registry);
        let scheduler = self.scheduler.clone();
        let lifecycle = self.lifecycle.clone();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    () = lifecycle.cancelled() => break,
                    received = changes.recv() => match received {
                        Ok(event) => event,
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(event = "core.engine.file_events_lagged", skipped);
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    },
                };
                on_file_change(&registry, &scheduler, &event).await;
            }
        });
    }

    fn spawn_ageing_sweep(&self) {
        let registry = Arc::clone(&self.registry);
        let lifecycle = self.lifecycle.clone();

        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + AGEING_SWEEP_INTERVAL;
            let mut ticker = tokio::time::interval_at(start, AGEING_SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = lifecycle.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let changes = registry.evaluate_all(UtcDateTime::now());
                if !changes.is_empty() {
                    tracing::debug!(event = "core.engine.aged", charts = changes.len());
                }
            }
        });
    }
}

impl Drop for FreshnessEngine {
    fn drop(&mut self) {
        self.lifecycle.cancel();
        self.scheduler.shutdown();
    }
}

/// Decode failures from the config document come first in the report.
fn with_decode_rejections(
    mut report: LoadReport,
    mut rejected: Vec<crate::ConfigError>,
) -> LoadReport {
    rejected.append(&mut report.rejected);
    report.rejected = rejected;
    report
}

/// Re-checks every chart reading the changed path. Charts that refresh on
/// file changes also get a low-priority refresh.
async fn on_file_change(
    registry: &DependencyRegistry,
    scheduler: &RefreshScheduler,
    event: &FileChangeEvent,
) {
    let affected = registry
        .entries()
        .into_iter()
        .filter(|entry| !entry.retired)
        .filter(|entry| {
            entry
                .config
                .sources()
                .any(|source| is_file_backed(source) && FileWatchAdapter::affects(source, event))
        })
        .collect::<Vec<_>>();

    for entry in affected {
        let chart_type = entry.config.chart_type.clone();
        tracing::debug!(
            event = "core.engine.file_changed",
            chart_type = %chart_type,
            path = %event.path.display()
        );
        scheduler.check_status(&chart_type).await;

        if matches!(
            entry.config.effective_refresh_method(),
            RefreshMethod::FileWatch | RefreshMethod::HybridSync
        ) {
            let scheduler = scheduler.clone();
            let request = DataRefreshRequest::new(chart_type)
                .with_priority(RefreshPriority::Low)
                .with_trigger(RefreshTrigger::FileChange);
            tokio::spawn(async move {
                scheduler.request_refresh(request).await;
            });
        }
    }
}
