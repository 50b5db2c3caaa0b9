//! In-memory store of chart dependencies and their live status.
//!
//! Entries are never deleted during a session. Charts that disappear from a
//! newer configuration are retired: their status becomes `missing` and they
//! can no longer be refreshed.
//!
//! Status mutation is crate-internal and reserved for the scheduler; every
//! notable change is published as a [`StatusChange`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::adapters::AdapterSet;
use crate::config::RegistrySettings;
use crate::data_source::SourceCheck;
use crate::freshness::evaluate;
use crate::{
    ChartDataDependency, ChartRefreshCapability, ChartType, ConfigError, DataSourceStatus,
    RefreshMethod, SourceType, StatusKind, UpdateSource, UtcDateTime,
};

const STATUS_CHANNEL_CAPACITY: usize = 1_024;

/// One configured chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub id: Uuid,
    pub config: ChartDataDependency,
    pub status: DataSourceStatus,
    pub configured_at: UtcDateTime,
    pub last_checked_at: Option<UtcDateTime>,
    /// Set when the chart disappeared from the configuration.
    pub retired: bool,
    /// Source type of the source that last served data.
    #[serde(skip)]
    served_by: Option<SourceType>,
}

impl RegistryEntry {
    fn new(config: ChartDataDependency, now: UtcDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            status: DataSourceStatus::missing(),
            configured_at: now,
            last_checked_at: None,
            retired: false,
            served_by: None,
        }
    }

    /// Source type whose thresholds apply to the current data.
    pub fn freshness_source_type(&self) -> SourceType {
        self.served_by
            .unwrap_or(self.config.primary_source.source_type)
    }
}

/// A status transition published to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub chart_type: ChartType,
    pub previous: DataSourceStatus,
    pub current: DataSourceStatus,
}

/// Outcome of [`DependencyRegistry::load`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub loaded: Vec<ChartType>,
    pub rejected: Vec<ConfigError>,
    /// Static dependencies whose refresh settings were coerced.
    pub overridden: Vec<(ChartType, Vec<&'static str>)>,
    pub retired: Vec<ChartType>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    entries: BTreeMap<ChartType, RegistryEntry>,
    settings: RegistrySettings,
    version: String,
}

/// Keyed dependency entries plus registry settings.
#[derive(Debug)]
pub struct DependencyRegistry {
    state: Mutex<RegistryState>,
    changes: broadcast::Sender<StatusChange>,
}

impl DependencyRegistry {
    pub fn new(settings: RegistrySettings, version: impl Into<String>) -> Self {
        let (changes, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(RegistryState {
                entries: BTreeMap::new(),
                settings,
                version: version.into(),
            }),
            changes,
        }
    }

    /// Validates and installs a full dependency list.
    ///
    /// Only offending entries are rejected. Entries already present keep
    /// their status; entries absent from `dependencies` are retired.
    pub fn load(&self, dependencies: Vec<ChartDataDependency>) -> LoadReport {
        let mut report = LoadReport::default();
        let accepted = admit(dependencies, &mut report.rejected);

        let now = UtcDateTime::now();
        let keep = accepted
            .iter()
            .map(|dependency| dependency.chart_type.clone())
            .collect::<Vec<_>>();
        for mut dependency in accepted {
            let overridden = dependency.apply_static_override();
            if !overridden.is_empty() {
                log_override(&dependency.chart_type, &overridden);
                report
                    .overridden
                    .push((dependency.chart_type.clone(), overridden));
            }
            report.loaded.push(dependency.chart_type.clone());
            self.install(dependency, now);
        }

        for error in &report.rejected {
            tracing::warn!(
                event = "core.registry.entry_rejected",
                chart_type = error.chart_type().unwrap_or("-"),
                error = %error
            );
        }

        report.retired = self.reconcile(&keep);
        tracing::info!(
            event = "core.registry.loaded",
            loaded = report.loaded.len(),
            rejected = report.rejected.len(),
            retired = report.retired.len()
        );
        report
    }

    /// Adds or replaces one dependency. A new entry starts `missing`; a
    /// replaced entry keeps its status.
    ///
    /// Returns the static-override conflicts that were coerced.
    ///
    /// # Errors
    ///
    /// Rejects invalid entries, references to unknown charts and updates
    /// that would close a dependency cycle.
    pub fn upsert(&self, mut dependency: ChartDataDependency) -> Result<Vec<&'static str>, ConfigError> {
        dependency.validate()?;

        {
            let state = self.lock();
            for required in &dependency.dependencies {
                let known = *required == dependency.chart_type
                    || state
                        .entries
                        .get(required)
                        .is_some_and(|entry| !entry.retired);
                if !known {
                    return Err(ConfigError::UnknownDependency {
                        chart_type: dependency.chart_type.to_string(),
                        dependency: required.to_string(),
                    });
                }
            }

            let mut graph = state
                .entries
                .values()
                .filter(|entry| !entry.retired)
                .map(|entry| (entry.config.chart_type.clone(), entry.config.dependencies.clone()))
                .collect::<BTreeMap<_, _>>();
            graph.insert(dependency.chart_type.clone(), dependency.dependencies.clone());
            if let Some(cycle) = find_cycles(&graph).into_iter().next() {
                return Err(ConfigError::CyclicDependency {
                    cycle: cycle.iter().map(ToString::to_string).collect(),
                });
            }
        }

        let overridden = dependency.apply_static_override();
        if !overridden.is_empty() {
            log_override(&dependency.chart_type, &overridden);
        }
        self.install(dependency, UtcDateTime::now());
        Ok(overridden)
    }

    /// Retires every active entry not named in `keep`. Returns the retired
    /// chart types.
    pub fn reconcile(&self, keep: &[ChartType]) -> Vec<ChartType> {
        let keep = keep.iter().collect::<BTreeSet<_>>();
        let mut retired = Vec::new();
        let mut changes = Vec::new();
        {
            let mut state = self.lock();
            for (chart_type, entry) in state.entries.iter_mut() {
                if entry.retired || keep.contains(chart_type) {
                    continue;
                }
                let previous = entry.status.clone();
                entry.retired = true;
                entry.status = DataSourceStatus::missing();
                retired.push(chart_type.clone());
                changes.push(StatusChange {
                    chart_type: chart_type.clone(),
                    previous,
                    current: entry.status.clone(),
                });
            }
        }

        for change in changes {
            tracing::info!(
                event = "core.registry.retired",
                chart_type = %change.chart_type
            );
            self.publish(change);
        }
        retired
    }

    pub fn get(&self, chart_type: &ChartType) -> Option<RegistryEntry> {
        self.lock().entries.get(chart_type).cloned()
    }

    pub fn status(&self, chart_type: &ChartType) -> Option<DataSourceStatus> {
        self.lock()
            .entries
            .get(chart_type)
            .map(|entry| entry.status.clone())
    }

    /// All entries, ordered by chart type.
    pub fn entries(&self) -> Vec<RegistryEntry> {
        self.lock().entries.values().cloned().collect()
    }

    pub fn statuses(&self) -> BTreeMap<ChartType, DataSourceStatus> {
        self.lock()
            .entries
            .iter()
            .map(|(chart_type, entry)| (chart_type.clone(), entry.status.clone()))
            .collect()
    }

    pub fn chart_types(&self) -> Vec<ChartType> {
        self.lock().entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn settings(&self) -> RegistrySettings {
        self.lock().settings
    }

    pub fn version(&self) -> String {
        self.lock().version.clone()
    }

    pub(crate) fn set_settings(&self, settings: RegistrySettings, version: String) {
        let mut state = self.lock();
        state.settings = settings;
        state.version = version;
    }

    /// Derives how `chart_type` can be refreshed right now.
    pub fn capabilities(
        &self,
        chart_type: &ChartType,
        adapters: &AdapterSet,
    ) -> Option<ChartRefreshCapability> {
        let entry = self.get(chart_type)?;
        Some(derive_capability(&entry, adapters))
    }

    /// Passive re-evaluation of every active entry at `now`.
    ///
    /// Entries whose last refresh failed are never promoted by ageing alone;
    /// only a successful refresh clears the error.
    pub fn evaluate_all(&self, now: UtcDateTime) -> Vec<StatusChange> {
        let mut changes = Vec::new();
        {
            let mut state = self.lock();
            for (chart_type, entry) in state.entries.iter_mut() {
                if entry.retired || entry.status.is_refreshing() {
                    continue;
                }
                let previous = entry.status.clone();
                reevaluate(entry, now);
                if is_notable(&previous, &entry.status) {
                    changes.push(StatusChange {
                        chart_type: chart_type.clone(),
                        previous,
                        current: entry.status.clone(),
                    });
                }
            }
        }

        for change in &changes {
            self.publish(change.clone());
        }
        changes
    }

    /// Receives every notable status change of every chart.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.changes.subscribe()
    }

    /// Folds an adapter availability probe into the entry.
    pub(crate) fn record_check(
        &self,
        chart_type: &ChartType,
        check: SourceCheck,
        source_type: SourceType,
        now: UtcDateTime,
    ) -> Option<DataSourceStatus> {
        self.mutate(chart_type, |entry| {
            entry.last_checked_at = Some(now);
            if entry.retired || entry.status.is_refreshing() {
                return;
            }

            match (check.available, check.last_updated_at) {
                (true, Some(last_updated_at)) => {
                    let newer = entry
                        .status
                        .last_updated_at
                        .map_or(true, |known| last_updated_at >= known);
                    if newer {
                        entry.status.last_updated_at = Some(last_updated_at);
                        entry.served_by = Some(source_type);
                    }
                    reevaluate(entry, now);
                }
                _ if entry.status.has_data() => reevaluate(entry, now),
                // A failed refresh stays an error until a refresh succeeds.
                _ if entry.status.error.is_some() => entry.status.status = StatusKind::Error,
                _ => {
                    entry.status.status = StatusKind::Missing;
                    entry.status.age_hours = 0.0;
                }
            }
        })
    }

    /// Marks a refresh dispatch. Returns the status before the change so a
    /// cancelled refresh can restore it.
    pub(crate) fn begin_refresh(&self, chart_type: &ChartType) -> Option<DataSourceStatus> {
        let mut snapshot = None;
        self.mutate(chart_type, |entry| {
            snapshot = Some(entry.status.clone());
            entry.status.status = StatusKind::Refreshing;
        });
        snapshot
    }

    /// A retryable failure with retries left: previous data stays shown.
    pub(crate) fn mark_retrying(&self, chart_type: &ChartType, error: &str) {
        self.mutate(chart_type, |entry| {
            entry.status.status = StatusKind::Stale;
            entry.status.retry_count = entry.status.retry_count.saturating_add(1);
            entry.status.error = Some(error.to_owned());
        });
    }

    /// Re-enters `refreshing` before the next attempt.
    pub(crate) fn mark_refreshing(&self, chart_type: &ChartType) {
        self.mutate(chart_type, |entry| {
            entry.status.status = StatusKind::Refreshing;
        });
    }

    pub(crate) fn complete_success(
        &self,
        chart_type: &ChartType,
        last_updated_at: UtcDateTime,
        source_type: SourceType,
        update_source: UpdateSource,
        now: UtcDateTime,
    ) -> Option<DataSourceStatus> {
        self.mutate(chart_type, |entry| {
            entry.served_by = Some(source_type);
            entry.last_checked_at = Some(now);
            entry.status.last_updated_at = Some(last_updated_at);
            entry.status.error = None;
            entry.status.retry_count = 0;
            entry.status.last_update_source = Some(update_source);
            let verdict = evaluate(&entry.config.freshness, source_type, Some(last_updated_at), now);
            entry.status.status = verdict.status;
            entry.status.age_hours = verdict.age_hours;
        })
    }

    pub(crate) fn complete_failure(&self, chart_type: &ChartType, error: &str) {
        self.mutate(chart_type, |entry| {
            entry.status.status = StatusKind::Error;
            entry.status.error = Some(error.to_owned());
        });
    }

    pub(crate) fn restore(&self, chart_type: &ChartType, snapshot: DataSourceStatus) {
        self.mutate(chart_type, |entry| {
            entry.status = snapshot;
        });
    }

    fn install(&self, dependency: ChartDataDependency, now: UtcDateTime) {
        let chart_type = dependency.chart_type.clone();
        let mut state = self.lock();
        match state.entries.get_mut(&chart_type) {
            Some(entry) => {
                entry.config = dependency;
                entry.retired = false;
                entry.configured_at = now;
            }
            None => {
                tracing::debug!(
                    event = "core.registry.entry_added",
                    chart_type = %chart_type
                );
                state
                    .entries
                    .insert(chart_type, RegistryEntry::new(dependency, now));
            }
        }
    }

    fn mutate<F>(&self, chart_type: &ChartType, apply: F) -> Option<DataSourceStatus>
    where
        F: FnOnce(&mut RegistryEntry),
    {
        let change = {
            let mut state = self.lock();
            let entry = state.entries.get_mut(chart_type)?;
            let previous = entry.status.clone();
            apply(entry);
            StatusChange {
                chart_type: chart_type.clone(),
                previous,
                current: entry.status.clone(),
            }
        };

        let current = change.current.clone();
        if is_notable(&change.previous, &change.current) {
            tracing::debug!(
                event = "core.registry.status_changed",
                chart_type = %chart_type,
                from = %change.previous.status,
                to = %change.current.status
            );
            self.publish(change);
        }
        Some(current)
    }

    fn publish(&self, change: StatusChange) {
        // Nobody listening is fine.
        let _ = self.changes.send(change);
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Age-only drift is not worth a notification.
fn is_notable(previous: &DataSourceStatus, current: &DataSourceStatus) -> bool {
    previous.status != current.status
        || previous.last_updated_at != current.last_updated_at
        || previous.error != current.error
        || previous.retry_count != current.retry_count
        || previous.last_update_source != current.last_update_source
}

fn reevaluate(entry: &mut RegistryEntry, now: UtcDateTime) {
    let verdict = evaluate(
        &entry.config.freshness,
        entry.freshness_source_type(),
        entry.status.last_updated_at,
        now,
    );
    entry.status.age_hours = verdict.age_hours;

    let failed = entry.status.error.is_some();
    let improves = match (verdict.status.severity(), entry.status.status.severity()) {
        (Some(next), Some(current)) => next < current,
        _ => false,
    };
    if failed && improves {
        return;
    }
    entry.status.status = verdict.status;
}

fn derive_capability(entry: &RegistryEntry, adapters: &AdapterSet) -> ChartRefreshCapability {
    if entry.retired {
        return ChartRefreshCapability::denied("chart is no longer configured");
    }
    if entry.config.effective_refresh_method() == RefreshMethod::Never {
        let reason = if entry.config.is_static() {
            "static dataset never refreshes"
        } else {
            "refresh method is never"
        };
        return ChartRefreshCapability::denied(reason);
    }

    let source = &entry.config.primary_source;
    let Some(adapter) = adapters.resolve(source) else {
        return ChartRefreshCapability::denied(format!(
            "no adapter registered for '{}' sources",
            source.source_type
        ));
    };
    let adapter_caps = adapter.capabilities(source);

    let mut available_methods = adapter_caps.available_methods;
    if !entry.config.refresh_policy.allow_manual_refresh {
        available_methods.retain(|method| *method != RefreshMethod::UserTrigger);
    }

    let blocked = if adapter_caps.requires_auth {
        Some("credentials required")
    } else if entry.status.is_refreshing() {
        Some("refresh already in progress")
    } else if !entry.config.refresh_policy.allow_manual_refresh {
        Some("manual refresh disabled by policy")
    } else {
        None
    };

    ChartRefreshCapability {
        can_refresh: blocked.is_none(),
        reason: blocked.map_or_else(
            || format!("data is {}", entry.status.status),
            str::to_owned,
        ),
        available_methods,
        estimated_duration_ms: adapter_caps.estimated_duration_ms,
        requires_auth: adapter_caps.requires_auth,
    }
}

fn log_override(chart_type: &ChartType, overridden: &[&'static str]) {
    tracing::warn!(
        event = "core.registry.static_override",
        chart_type = %chart_type,
        overridden = %overridden.join(", "),
        "static source forces refreshMethod=never"
    );
}

/// Filters a raw dependency list down to entries that can coexist.
fn admit(
    dependencies: Vec<ChartDataDependency>,
    rejected: &mut Vec<ConfigError>,
) -> Vec<ChartDataDependency> {
    let mut accepted: Vec<ChartDataDependency> = Vec::new();
    for dependency in dependencies {
        if let Err(error) = dependency.validate() {
            rejected.push(error);
            continue;
        }
        if accepted
            .iter()
            .any(|existing| existing.chart_type == dependency.chart_type)
        {
            rejected.push(ConfigError::DuplicateChartType {
                chart_type: dependency.chart_type.to_string(),
            });
            continue;
        }
        accepted.push(dependency);
    }

    // Rejecting one entry can orphan another, so iterate to a fixpoint.
    loop {
        let known = accepted
            .iter()
            .map(|dependency| dependency.chart_type.clone())
            .collect::<BTreeSet<_>>();

        let mut dropped = BTreeSet::new();
        for dependency in &accepted {
            if let Some(unknown) = dependency
                .dependencies
                .iter()
                .find(|required| !known.contains(*required))
            {
                rejected.push(ConfigError::UnknownDependency {
                    chart_type: dependency.chart_type.to_string(),
                    dependency: unknown.to_string(),
                });
                dropped.insert(dependency.chart_type.clone());
            }
        }

        let graph = accepted
            .iter()
            .filter(|dependency| !dropped.contains(&dependency.chart_type))
            .map(|dependency| (dependency.chart_type.clone(), dependency.dependencies.clone()))
            .collect::<BTreeMap<_, _>>();
        for cycle in find_cycles(&graph) {
            dropped.extend(cycle.iter().cloned());
            rejected.push(ConfigError::CyclicDependency {
                cycle: cycle.iter().map(ToString::to_string).collect(),
            });
        }

        if dropped.is_empty() {
            return accepted;
        }
        accepted.retain(|dependency| !dropped.contains(&dependency.chart_type));
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

/// Every cycle reachable in `graph`, each listed from its first node back
/// to that node.
fn find_cycles(graph: &BTreeMap<ChartType, Vec<ChartType>>) -> Vec<Vec<ChartType>> {
    fn visit(
        node: &ChartType,
        graph: &BTreeMap<ChartType, Vec<ChartType>>,
        marks: &mut HashMap<ChartType, Visit>,
        path: &mut Vec<ChartType>,
        cycles: &mut Vec<Vec<ChartType>>,
    ) {
        match marks.get(node) {
            Some(Visit::Done) => return,
            Some(Visit::InProgress) => {
                if let Some(start) = path.iter().position(|step| step == node) {
                    let mut cycle = path[start..].to_vec();
                    cycle.push(node.clone());
                    cycles.push(cycle);
                }
                return;
            }
            None => {}
        }

        marks.insert(node.clone(), Visit::InProgress);
        path.push(node.clone());
        for next in graph.get(node).into_iter().flatten() {
            if graph.contains_key(next) {
                visit(next, graph, marks, path, cycles);
            }
        }
        path.pop();
        marks.insert(node.clone(), Visit::Done);
    }

    let mut marks = HashMap::new();
    let mut cycles = Vec::new();
    for node in graph.keys() {
        visit(node, graph, &mut marks, &mut Vec::new(), &mut cycles);
    }
    cycles
}
