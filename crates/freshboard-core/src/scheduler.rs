//! Refresh orchestration.
//!
//! ```text
//! request_refresh ──▶ permission ──▶ dedup ──▶ admission ──▶ sources
//!                        │             │           │          │
//!                        ▼             ▼           ▼          ▼
//!                   not_allowed   attach to    priority   primary, then
//!                                 in-flight     queue     fallbacks in
//!                                                         order, each with
//!                                                         its retry budget
//! ```
//!
//! One operation runs per chart at a time; later requests for the same chart
//! attach to it and receive the same [`DataRefreshResult`]. Operations run on
//! spawned tasks, so a caller dropping its future never leaves the registry
//! in `refreshing`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::adapters::AdapterSet;
use crate::admission::{Admission, SharedPriority};
use crate::cache::CacheStore;
use crate::data_source::{FetchRequest, SourceCheck, SourceError};
use crate::domain::update_source_for;
use crate::refresh::{
    DataRefreshRequest, DataRefreshResult, ProgressReporter, ProgressStage, RefreshError,
    RefreshPriority, RefreshTrigger, SourceOrigin, SourcePosition,
};
use crate::registry::{DependencyRegistry, RegistryEntry};
use crate::retry::RetryPlan;
use crate::validation::ValidatorSet;
use crate::{ChartType, DataSourceStatus, RefreshMethod, SourceType, UpdateSource, UtcDateTime};

/// Engine-enforced ceiling on a single adapter call.
pub const DEFAULT_ADAPTER_TIMEOUT: Duration = Duration::from_secs(30);

struct InFlight {
    operation_id: Uuid,
    priority: SharedPriority,
    reporter: ProgressReporter,
    waiters: Vec<oneshot::Sender<DataRefreshResult>>,
}

struct Timer {
    interval_ms: u64,
    cancel: CancellationToken,
}

/// Cancellation of one operation: the originating request's token or
/// engine shutdown.
#[derive(Clone)]
struct OperationCancel {
    request: CancellationToken,
    shutdown: CancellationToken,
}

impl OperationCancel {
    fn is_cancelled(&self) -> bool {
        self.request.is_cancelled() || self.shutdown.is_cancelled()
    }

    async fn cancelled(&self) {
        tokio::select! {
            () = self.request.cancelled() => {}
            () = self.shutdown.cancelled() => {}
        }
    }
}

struct SchedulerInner {
    registry: Arc<DependencyRegistry>,
    adapters: AdapterSet,
    validators: Arc<ValidatorSet>,
    cache: CacheStore,
    admission: Arc<Admission>,
    flights: Mutex<HashMap<ChartType, InFlight>>,
    timers: Mutex<HashMap<ChartType, Timer>>,
    adapter_timeout: Duration,
    shutdown: CancellationToken,
}

/// Admission control, dedup, retry, fallback and trigger handling.
///
/// Cloning shares the scheduler.
#[derive(Clone)]
pub struct RefreshScheduler {
    inner: Arc<SchedulerInner>,
}

impl RefreshScheduler {
    pub fn new(
        registry: Arc<DependencyRegistry>,
        adapters: AdapterSet,
        validators: Arc<ValidatorSet>,
        cache: CacheStore,
    ) -> Self {
        let limit = registry.settings().max_concurrent_refresh;
        Self {
            inner: Arc::new(SchedulerInner {
                registry,
                adapters,
                validators,
                cache,
                admission: Admission::new(limit),
                flights: Mutex::new(HashMap::new()),
                timers: Mutex::new(HashMap::new()),
                adapter_timeout: DEFAULT_ADAPTER_TIMEOUT,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Overrides the per-call adapter timeout. Only valid before the
    /// scheduler is shared.
    pub fn with_adapter_timeout(mut self, timeout: Duration) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.adapter_timeout = timeout;
        }
        self
    }

    /// Runs (or joins) a refresh of `request.chart_type`.
    pub async fn request_refresh(&self, request: DataRefreshRequest) -> DataRefreshResult {
        self.inner.request(request).await
    }

    /// Low-priority refresh on visibility regain, when the chart's policy
    /// asks for it. `None` when the policy does not.
    pub async fn notify_visible(&self, chart_type: &ChartType) -> Option<DataRefreshResult> {
        let entry = self.inner.registry.get(chart_type)?;
        if !entry.config.refresh_policy.refresh_on_visible {
            return None;
        }
        let request = DataRefreshRequest::new(chart_type.clone())
            .with_priority(RefreshPriority::Low)
            .with_trigger(RefreshTrigger::Visibility);
        Some(self.inner.request(request).await)
    }

    /// Passive re-check: adapter `check` folded into the registry status.
    pub async fn check_status(&self, chart_type: &ChartType) -> Option<DataSourceStatus> {
        self.inner.check_status(chart_type).await
    }

    /// Starts, restarts or stops interval timers to match the registry.
    pub fn sync_timers(&self) {
        SchedulerInner::sync_timers(&self.inner);
    }

    /// Charts with a running interval timer, with their interval.
    pub fn scheduled_charts(&self) -> Vec<(ChartType, u64)> {
        let mut charts = self
            .inner
            .lock_timers()
            .iter()
            .map(|(chart_type, timer)| (chart_type.clone(), timer.interval_ms))
            .collect::<Vec<_>>();
        charts.sort();
        charts
    }

    /// Operations holding an admission slot.
    pub fn in_flight(&self) -> usize {
        self.inner.admission.in_flight()
    }

    /// Operations waiting for a slot.
    pub fn queued(&self) -> usize {
        self.inner.admission.queued()
    }

    /// Distinct charts with a running or queued operation.
    pub fn active_operations(&self) -> usize {
        self.inner.lock_flights().len()
    }

    pub fn set_max_concurrent(&self, limit: usize) {
        self.inner.admission.set_limit(limit);
    }

    pub fn cache(&self) -> &CacheStore {
        &self.inner.cache
    }

    pub fn adapters(&self) -> &AdapterSet {
        &self.inner.adapters
    }

    /// Cancels every timer and in-flight operation. Cancelled operations
    /// restore their pre-refresh status.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        for (_, timer) in self.inner.lock_timers().drain() {
            timer.cancel.cancel();
        }
        tracing::info!(event = "core.scheduler.shutdown");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

impl SchedulerInner {
    async fn request(self: &Arc<Self>, request: DataRefreshRequest) -> DataRefreshResult {
        let chart_type = request.chart_type.clone();

        if let Err(error) = self.authorize(&request) {
            tracing::info!(
                event = "core.scheduler.rejected",
                chart_type = %chart_type,
                trigger = ?request.trigger,
                code = %error.code,
                reason = %error.message
            );
            let result = DataRefreshResult::rejected(chart_type, Uuid::new_v4(), error);
            if let Some(callback) = &request.on_complete {
                callback(&result);
            }
            return result;
        }

        let (operation_id, receiver, originating) = {
            let mut flights = self.lock_flights();
            let (sender, receiver) = oneshot::channel();
            match flights.get_mut(&chart_type) {
                Some(flight) => {
                    if let Some(progress) = &request.progress {
                        flight.reporter.attach(progress.clone());
                    }
                    flight.waiters.push(sender);
                    if flight.priority.raise(request.priority) {
                        self.admission.promote(&flight.priority);
                        tracing::debug!(
                            event = "core.scheduler.priority_raised",
                            chart_type = %chart_type,
                            priority = ?request.priority
                        );
                    }
                    tracing::debug!(
                        event = "core.scheduler.deduplicated",
                        chart_type = %chart_type,
                        operation_id = %flight.operation_id
                    );
                    (flight.operation_id, receiver, false)
                }
                None => {
                    let operation_id = Uuid::new_v4();
                    let reporter = ProgressReporter::new(operation_id, chart_type.clone());
                    if let Some(progress) = &request.progress {
                        reporter.attach(progress.clone());
                    }
                    let priority = SharedPriority::new(request.priority);
                    flights.insert(
                        chart_type.clone(),
                        InFlight {
                            operation_id,
                            priority: priority.clone(),
                            reporter: reporter.clone(),
                            waiters: vec![sender],
                        },
                    );

                    let inner = Arc::clone(self);
                    let operation = Operation {
                        chart_type: chart_type.clone(),
                        operation_id,
                        priority,
                        trigger: request.trigger,
                        cancel: OperationCancel {
                            request: request.cancel.clone(),
                            shutdown: self.shutdown.clone(),
                        },
                        reporter,
                    };
                    tokio::spawn(async move {
                        let result = inner.run(&operation).await;
                        inner.finish(&operation.chart_type, result);
                    });
                    (operation_id, receiver, true)
                }
            }
        };

        let result = if originating {
            // The operation observes this request's token itself and
            // answers once the status is restored.
            receiver.await.ok()
        } else {
            tokio::select! {
                result = receiver => result.ok(),
                () = request.cancel.cancelled() => {
                    Some(DataRefreshResult::cancelled(chart_type.clone(), operation_id, 0))
                }
            }
        };
        let result = result.unwrap_or_else(|| {
            DataRefreshResult::rejected(
                chart_type,
                operation_id,
                RefreshError::new("refresh.aborted", "refresh task ended without a result"),
            )
        });

        if let Some(callback) = &request.on_complete {
            callback(&result);
        }
        result
    }

    fn authorize(&self, request: &DataRefreshRequest) -> Result<(), RefreshError> {
        if self.shutdown.is_cancelled() {
            return Err(RefreshError::new("refresh.shutting_down", "engine is shutting down"));
        }

        let Some(entry) = self.registry.get(&request.chart_type) else {
            return Err(RefreshError::new(
                "refresh.unknown_chart",
                format!("chart '{}' is not configured", request.chart_type),
            ));
        };

        let not_allowed = |message: &str| Err(RefreshError::new("refresh.not_allowed", message));
        if entry.retired {
            return not_allowed("chart is no longer configured");
        }
        if entry.config.effective_refresh_method() == RefreshMethod::Never {
            return not_allowed("refresh method is never");
        }

        let policy = &entry.config.refresh_policy;
        match request.trigger {
            RefreshTrigger::Manual if !policy.allow_manual_refresh => {
                not_allowed("manual refresh is disabled by policy")
            }
            RefreshTrigger::Visibility if !policy.refresh_on_visible => {
                not_allowed("refresh on visibility is disabled by policy")
            }
            _ => Ok(()),
        }
    }

    async fn run(&self, operation: &Operation) -> DataRefreshResult {
        let started = Instant::now();
        let chart_type = &operation.chart_type;

        tracing::debug!(
            event = "core.scheduler.admission_requested",
            chart_type = %chart_type,
            priority = ?operation.priority.get(),
            in_flight = self.admission.in_flight()
        );
        let Some(_permit) = self
            .admission
            .acquire(operation.priority.clone(), operation.cancel.cancelled())
            .await
        else {
            tracing::info!(
                event = "core.scheduler.cancelled",
                chart_type = %chart_type,
                stage = "queued"
            );
            return DataRefreshResult::cancelled(chart_type.clone(), operation.operation_id, 0);
        };

        let Some(entry) = self.registry.get(chart_type) else {
            return DataRefreshResult::rejected(
                chart_type.clone(),
                operation.operation_id,
                RefreshError::new("refresh.unknown_chart", "chart disappeared while queued"),
            );
        };
        let Some(snapshot) = self.registry.begin_refresh(chart_type) else {
            return DataRefreshResult::rejected(
                chart_type.clone(),
                operation.operation_id,
                RefreshError::new("refresh.unknown_chart", "chart disappeared while queued"),
            );
        };
        tracing::info!(
            event = "core.scheduler.dispatched",
            chart_type = %chart_type,
            operation_id = %operation.operation_id,
            trigger = ?operation.trigger
        );

        let mut run = SourceRun {
            attempts: 0,
            last_failure: None,
        };
        match self.try_sources(operation, &entry, &mut run).await {
            Dispatch::Served(mut result) => {
                result.attempts = run.attempts;
                result.duration_ms = elapsed_ms(started);
                tracing::info!(
                    event = "core.scheduler.completed",
                    chart_type = %chart_type,
                    attempts = run.attempts,
                    records = result.record_count,
                    duration_ms = result.duration_ms
                );
                result
            }
            Dispatch::Cancelled => {
                self.registry.restore(chart_type, snapshot);
                tracing::info!(
                    event = "core.scheduler.cancelled",
                    chart_type = %chart_type,
                    attempts = run.attempts,
                    stage = "running"
                );
                let mut result =
                    DataRefreshResult::cancelled(chart_type.clone(), operation.operation_id, run.attempts);
                result.duration_ms = elapsed_ms(started);
                result
            }
            Dispatch::Exhausted => {
                let (origin, error) = run.last_failure.unwrap_or_else(|| {
                    (
                        None,
                        SourceError::internal("dependency has no usable source"),
                    )
                });
                self.registry.complete_failure(chart_type, &error.to_string());
                tracing::warn!(
                    event = "core.scheduler.failed",
                    chart_type = %chart_type,
                    attempts = run.attempts,
                    code = error.code(),
                    error = %error
                );
                DataRefreshResult {
                    success: false,
                    chart_type: chart_type.clone(),
                    operation_id: operation.operation_id,
                    source: origin,
                    record_count: 0,
                    attempts: run.attempts,
                    duration_ms: elapsed_ms(started),
                    cancelled: false,
                    error: Some(RefreshError::from(&error)),
                }
            }
        }
    }

    async fn try_sources(
        &self,
        operation: &Operation,
        entry: &RegistryEntry,
        run: &mut SourceRun,
    ) -> Dispatch {
        let chart_type = &operation.chart_type;
        let plan = RetryPlan::from_policy(&entry.config.refresh_policy);

        for (index, source) in entry.config.sources().enumerate() {
            let origin = SourceOrigin {
                position: match index {
                    0 => SourcePosition::Primary,
                    n => SourcePosition::Fallback(n - 1),
                },
                source_type: source.source_type,
                location: source.location.to_string(),
            };
            if index > 0 {
                tracing::info!(
                    event = "core.scheduler.fallback",
                    chart_type = %chart_type,
                    fallback = index - 1,
                    source_type = %source.source_type
                );
            }

            let Some(adapter) = self.adapters.resolve(source) else {
                run.last_failure = Some((Some(origin), SourceError::adapter_not_registered(source)));
                continue;
            };

            let mut failures = 0_u32;
            loop {
                if operation.cancel.is_cancelled() {
                    return Dispatch::Cancelled;
                }
                run.attempts += 1;

                let request = FetchRequest {
                    chart_type,
                    source,
                    validation: entry.config.validation.as_ref(),
                    validators: self.validators.as_ref(),
                    progress: &operation.reporter,
                };
                let fetched = tokio::select! {
                    biased;
                    () = operation.cancel.cancelled() => return Dispatch::Cancelled,
                    outcome = tokio::time::timeout(self.adapter_timeout, adapter.fetch(request)) => {
                        outcome.unwrap_or_else(|_| {
                            Err(SourceError::timeout(format!(
                                "adapter '{}' did not answer within {}ms",
                                adapter.name(),
                                self.adapter_timeout.as_millis()
                            )))
                        })
                    }
                };

                let error = match fetched {
                    Ok(data) => {
                        let record_count = data.records.len();
                        let last_updated_at = data.last_updated_at;
                        if source.source_type != SourceType::Static {
                            operation
                                .reporter
                                .report(ProgressStage::Caching, format!("{record_count} records"));
                            self.cache.put(chart_type.clone(), data).await;
                        }

                        let update_source = if operation.trigger == RefreshTrigger::Scheduled {
                            UpdateSource::Scheduled
                        } else {
                            update_source_for(source.source_type)
                        };
                        self.registry.complete_success(
                            chart_type,
                            last_updated_at,
                            source.source_type,
                            update_source,
                            UtcDateTime::now(),
                        );

                        return Dispatch::Served(DataRefreshResult {
                            success: true,
                            chart_type: chart_type.clone(),
                            operation_id: operation.operation_id,
                            source: Some(origin),
                            record_count,
                            attempts: 0,
                            duration_ms: 0,
                            cancelled: false,
                            error: None,
                        });
                    }
                    Err(error) => error,
                };

                failures += 1;
                if error.retryable() && plan.allows_retry(failures) {
                    let delay = plan.delay_for_retry(failures);
                    self.registry.mark_retrying(chart_type, &error.to_string());
                    tracing::info!(
                        event = "core.scheduler.retry_scheduled",
                        chart_type = %chart_type,
                        retry = failures,
                        delay_ms = delay.as_millis() as u64,
                        code = error.code()
                    );
                    tokio::select! {
                        biased;
                        () = operation.cancel.cancelled() => return Dispatch::Cancelled,
                        () = tokio::time::sleep(delay) => {}
                    }
                    self.registry.mark_refreshing(chart_type);
                    continue;
                }

                tracing::warn!(
                    event = "core.scheduler.source_failed",
                    chart_type = %chart_type,
                    adapter = adapter.name(),
                    attempts = failures,
                    retryable = error.retryable(),
                    error = %error
                );
                run.last_failure = Some((Some(origin), error));
                break;
            }
        }

        Dispatch::Exhausted
    }

    /// Removes the in-flight entry and answers every attached caller.
    fn finish(&self, chart_type: &ChartType, result: DataRefreshResult) {
        let waiters = self
            .lock_flights()
            .remove(chart_type)
            .map(|flight| flight.waiters)
            .unwrap_or_default();
        for waiter in waiters {
            // A caller that stopped waiting is fine.
            let _ = waiter.send(result.clone());
        }
    }

    async fn check_status(&self, chart_type: &ChartType) -> Option<DataSourceStatus> {
        let entry = self.registry.get(chart_type)?;
        let source = &entry.config.primary_source;
        let check = match self.adapters.resolve(source) {
            Some(adapter) => {
                match tokio::time::timeout(self.adapter_timeout, adapter.check(source)).await {
                    Ok(Ok(check)) => check,
                    Ok(Err(error)) => {
                        tracing::debug!(
                            event = "core.scheduler.check_failed",
                            chart_type = %chart_type,
                            error = %error
                        );
                        SourceCheck::unavailable()
                    }
                    Err(_) => SourceCheck::unavailable(),
                }
            }
            None => SourceCheck::unavailable(),
        };

        self.registry
            .record_check(chart_type, check, source.source_type, UtcDateTime::now())
    }

    fn sync_timers(this: &Arc<Self>) {
        if this.shutdown.is_cancelled() {
            return;
        }

        let wanted = this
            .registry
            .entries()
            .into_iter()
            .filter(|entry| {
                !entry.retired && entry.config.effective_refresh_method() != RefreshMethod::Never
            })
            .filter_map(|entry| {
                entry
                    .config
                    .refresh_policy
                    .auto_interval_ms()
                    .map(|interval_ms| (entry.config.chart_type, interval_ms))
            })
            .collect::<HashMap<_, _>>();

        let mut timers = this.lock_timers();
        timers.retain(|chart_type, timer| {
            let keep = wanted.get(chart_type) == Some(&timer.interval_ms);
            if !keep {
                timer.cancel.cancel();
                tracing::debug!(
                    event = "core.scheduler.timer_stopped",
                    chart_type = %chart_type
                );
            }
            keep
        });

        for (chart_type, interval_ms) in wanted {
            if timers.contains_key(&chart_type) {
                continue;
            }
            let cancel = this.shutdown.child_token();
            spawn_timer(Arc::downgrade(this), chart_type.clone(), interval_ms, cancel.clone());
            tracing::debug!(
                event = "core.scheduler.timer_started",
                chart_type = %chart_type,
                interval_ms
            );
            timers.insert(chart_type, Timer { interval_ms, cancel });
        }
    }

    fn lock_flights(&self) -> MutexGuard<'_, HashMap<ChartType, InFlight>> {
        self.flights
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_timers(&self) -> MutexGuard<'_, HashMap<ChartType, Timer>> {
        self.timers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct Operation {
    chart_type: ChartType,
    operation_id: Uuid,
    priority: SharedPriority,
    trigger: RefreshTrigger,
    cancel: OperationCancel,
    reporter: ProgressReporter,
}

struct SourceRun {
    attempts: u32,
    last_failure: Option<(Option<SourceOrigin>, SourceError)>,
}

enum Dispatch {
    Served(DataRefreshResult),
    Cancelled,
    Exhausted,
}

/// Recurring low-priority refresh. Holds only a weak handle so a dropped
/// scheduler ends the loop.
fn spawn_timer(
    scheduler: Weak<SchedulerInner>,
    chart_type: ChartType,
    interval_ms: u64,
    cancel: CancellationToken,
) {
    let period = Duration::from_millis(interval_ms);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(inner) = scheduler.upgrade() else {
                break;
            };
            let request = DataRefreshRequest::new(chart_type.clone())
                .with_priority(RefreshPriority::Low)
                .with_trigger(RefreshTrigger::Scheduled)
                .with_cancellation(cancel.child_token());
            inner.request(request).await;
        }
    });
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistrySettings;
    use crate::data_source::{
        AdapterCapabilities, AdapterFuture, FetchedData, SourceAdapter,
    };
    use crate::{ChartDataDependency, DataFreshnessConfig, DataSourceConfig, RefreshPolicy, StatusKind};

    struct FixedAdapter;

    impl SourceAdapter for FixedAdapter {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn check<'a>(&'a self, _source: &'a DataSourceConfig) -> AdapterFuture<'a, SourceCheck> {
            Box::pin(async { Ok(SourceCheck::available_at(UtcDateTime::now(), None)) })
        }

        fn fetch<'a>(&'a self, _request: FetchRequest<'a>) -> AdapterFuture<'a, FetchedData> {
            Box::pin(async {
                Ok(FetchedData {
                    records: vec![serde_json::Map::new()],
                    last_updated_at: UtcDateTime::now(),
                })
            })
        }

        fn capabilities(&self, _source: &DataSourceConfig) -> AdapterCapabilities {
            AdapterCapabilities {
                available_methods: vec![RefreshMethod::UserTrigger],
                requires_auth: false,
                estimated_duration_ms: None,
            }
        }
    }

    fn chart(name: &str) -> ChartType {
        ChartType::parse(name).expect("chart type")
    }

    fn scheduler(dependencies: Vec<ChartDataDependency>) -> RefreshScheduler {
        let registry = Arc::new(DependencyRegistry::new(RegistrySettings::default(), "test"));
        registry.load(dependencies);
        let adapters = AdapterSet::new().with_adapter(SourceType::Manual, Arc::new(FixedAdapter));
        RefreshScheduler::new(
            registry,
            adapters,
            Arc::new(ValidatorSet::new()),
            CacheStore::from_millis(60_000),
        )
    }

    fn manual(name: &str) -> ChartDataDependency {
        ChartDataDependency::new(
            chart(name),
            DataSourceConfig::manual_file(format!("{name}.json")),
            DataFreshnessConfig::new(4.0, 24.0),
        )
    }

    #[tokio::test]
    async fn manual_refresh_populates_cache_and_status() {
        let scheduler = scheduler(vec![manual("usage")]);

        let result = scheduler
            .request_refresh(DataRefreshRequest::new(chart("usage")))
            .await;

        assert!(result.success, "{result:?}");
        assert_eq!(result.attempts, 1);
        assert_eq!(result.source.expect("origin").position, SourcePosition::Primary);
        assert!(scheduler.cache().contains(&chart("usage")).await);
        let status = scheduler.inner.registry.status(&chart("usage")).expect("status");
        assert_eq!(status.status, StatusKind::Available);
        assert_eq!(status.last_update_source, Some(UpdateSource::Manual));
        assert_eq!(scheduler.active_operations(), 0);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test]
    async fn disallowed_manual_refresh_is_rejected_without_status_change() {
        let mut policy = RefreshPolicy::default();
        policy.allow_manual_refresh = false;
        let scheduler = scheduler(vec![manual("usage").with_policy(policy)]);

        let result = scheduler
            .request_refresh(DataRefreshRequest::new(chart("usage")))
            .await;

        assert!(!result.success);
        assert_eq!(result.error.expect("error").code, "refresh.not_allowed");
        let status = scheduler.inner.registry.status(&chart("usage")).expect("status");
        assert_eq!(status.status, StatusKind::Missing);
    }

    #[tokio::test]
    async fn unknown_chart_is_rejected() {
        let scheduler = scheduler(Vec::new());
        let result = scheduler
            .request_refresh(DataRefreshRequest::new(chart("ghost")))
            .await;
        assert_eq!(result.error.expect("error").code, "refresh.unknown_chart");
    }

    #[tokio::test(start_paused = true)]
    async fn interval_timers_follow_policy_changes() {
        let scheduler = scheduler(vec![manual("usage").with_policy(RefreshPolicy::auto(60_000))]);

        scheduler.sync_timers();
        assert_eq!(scheduler.scheduled_charts(), vec![(chart("usage"), 60_000)]);

        tokio::time::sleep(Duration::from_millis(60_500)).await;
        let status = scheduler.inner.registry.status(&chart("usage")).expect("status");
        assert_eq!(status.last_update_source, Some(UpdateSource::Scheduled));

        scheduler
            .inner
            .registry
            .upsert(manual("usage").with_policy(RefreshPolicy::auto(120_000)))
            .expect("upsert");
        scheduler.sync_timers();
        assert_eq!(scheduler.scheduled_charts(), vec![(chart("usage"), 120_000)]);

        scheduler.shutdown();
        assert!(scheduler.scheduled_charts().is_empty());
    }
}
