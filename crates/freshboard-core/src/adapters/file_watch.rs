use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::broadcast;

use crate::adapters::{records_from_csv, records_from_json};
use crate::data_source::{
    AdapterCapabilities, AdapterFuture, FetchRequest, FetchedData, SourceAdapter, SourceCheck,
    SourceError,
};
use crate::refresh::ProgressStage;
use crate::validation::validate_records;
use crate::{DataFormat, DataSourceConfig, RefreshMethod, UtcDateTime};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// A watched file was created, modified or removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChangeEvent {
    pub path: PathBuf,
    pub changed_at: UtcDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathProbe {
    Present { modified: UtcDateTime, size: u64 },
    Absent,
}

/// Probes of watched paths. `generations` counts change events per path; a
/// probe that started before the latest change is never stored.
#[derive(Default)]
struct ProbeCache {
    probes: HashMap<PathBuf, PathProbe>,
    generations: HashMap<PathBuf, u64>,
}

impl ProbeCache {
    fn generation(&self, path: &Path) -> u64 {
        self.generations.get(path).copied().unwrap_or(0)
    }
}

/// State shared with the notify callback thread.
struct WatchState {
    probes: Mutex<ProbeCache>,
    watched: Mutex<HashSet<PathBuf>>,
    changes: broadcast::Sender<FileChangeEvent>,
}

impl WatchState {
    fn probes(&self) -> MutexGuard<'_, ProbeCache> {
        self.probes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn watched(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.watched
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn generation(&self, path: &Path) -> u64 {
        self.probes().generation(path)
    }

    /// Cached probe of `path` and the generation a fresh probe starts from.
    fn lookup(&self, path: &Path) -> (Option<PathProbe>, u64) {
        let cache = self.probes();
        (cache.probes.get(path).copied(), cache.generation(path))
    }

    /// Probes are only cached for watched paths; nothing else would ever
    /// invalidate them. `generation` is the value seen when the probe began.
    fn remember(&self, path: &Path, probe: PathProbe, generation: u64) {
        if !self.watched().contains(path) {
            return;
        }
        let mut cache = self.probes();
        if cache.generation(path) == generation {
            cache.probes.insert(path.to_path_buf(), probe);
        }
    }

    fn changed(&self, path: PathBuf, changed_at: UtcDateTime) {
        {
            let mut cache = self.probes();
            cache.probes.remove(&path);
            *cache.generations.entry(path.clone()).or_default() += 1;
        }
        tracing::debug!(
            event = "core.adapter.file_watch.changed",
            path = %path.display()
        );
        // No receivers is fine.
        let _ = self.changes.send(FileChangeEvent { path, changed_at });
    }

    fn on_watch_event(&self, result: notify::Result<Event>) {
        let event = match result {
            Ok(event) => event,
            Err(error) => {
                tracing::warn!(
                    event = "core.adapter.file_watch.watch_error",
                    error = %error
                );
                return;
            }
        };
        if !matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        ) {
            return;
        }

        let changed_at = UtcDateTime::now();
        for path in event.paths {
            let path = normalize(&path);
            let is_watched = self.watched().contains(&path);
            if is_watched {
                self.changed(path, changed_at);
            }
        }
    }
}

/// Adapter for files updated in place by people or external jobs.
///
/// With watching enabled, one notify watch is registered per parent
/// directory of the configured paths. Change events for watched paths drop
/// the cached probe and are re-published on [`subscribe_changes`].
///
/// [`subscribe_changes`]: FileWatchAdapter::subscribe_changes
pub struct FileWatchAdapter {
    state: Arc<WatchState>,
    watching_enabled: bool,
    watcher: Mutex<Option<RecommendedWatcher>>,
    watched_dirs: Mutex<HashSet<PathBuf>>,
    /// Configured location to normalized path.
    resolved: Mutex<HashMap<String, PathBuf>>,
}

impl FileWatchAdapter {
    pub fn new(watching_enabled: bool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(WatchState {
                probes: Mutex::new(ProbeCache::default()),
                watched: Mutex::new(HashSet::new()),
                changes,
            }),
            watching_enabled,
            watcher: Mutex::new(None),
            watched_dirs: Mutex::new(HashSet::new()),
            resolved: Mutex::new(HashMap::new()),
        }
    }

    pub fn watching_enabled(&self) -> bool {
        self.watching_enabled
    }

    /// Registers a watch for `location`. Returns `false` when watching is
    /// disabled or the path is already watched.
    ///
    /// # Errors
    ///
    /// Returns the notify error when the watcher cannot be created or the
    /// parent directory cannot be watched (e.g. it does not exist).
    pub fn watch(&self, location: &str) -> Result<bool, notify::Error> {
        if !self.watching_enabled {
            return Ok(false);
        }

        let path = normalize(Path::new(location));
        self.lock_resolved().insert(location.to_owned(), path.clone());
        if self.state.watched().contains(&path) {
            return Ok(false);
        }
        let dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        let mut watcher = self.lock_watcher();
        let mut dirs = self.lock_dirs();
        if !dirs.contains(&dir) {
            if watcher.is_none() {
                let state = Arc::clone(&self.state);
                *watcher = Some(notify::recommended_watcher(
                    move |result: notify::Result<Event>| state.on_watch_event(result),
                )?);
            }
            if let Some(active) = watcher.as_mut() {
                active.watch(&dir, RecursiveMode::NonRecursive)?;
            }
            dirs.insert(dir);
        }

        self.state.watched().insert(path.clone());
        tracing::info!(
            event = "core.adapter.file_watch.registered",
            path = %path.display()
        );
        Ok(true)
    }

    /// Watches every location of `source`. Failures are logged and skipped.
    /// Returns how many new watches were registered.
    pub fn watch_source(&self, source: &DataSourceConfig) -> usize {
        let mut registered = 0;
        for location in source.location.iter() {
            match self.watch(location) {
                Ok(true) => registered += 1,
                Ok(false) => {}
                Err(error) => tracing::warn!(
                    event = "core.adapter.file_watch.register_failed",
                    location,
                    error = %error
                ),
            }
        }
        registered
    }

    /// Drops the watcher and every cached probe.
    pub fn unwatch_all(&self) {
        *self.lock_watcher() = None;
        self.lock_dirs().clear();
        self.state.watched().clear();
        self.state.probes().probes.clear();
        tracing::info!(event = "core.adapter.file_watch.stopped");
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths = self.state.watched().iter().cloned().collect::<Vec<_>>();
        paths.sort();
        paths
    }

    pub fn is_watched(&self, location: &str) -> bool {
        self.state.watched().contains(&normalize(Path::new(location)))
    }

    /// Change stream of watched paths and external notifications.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<FileChangeEvent> {
        self.state.changes.subscribe()
    }

    /// External change notification, for hosts that observe the filesystem
    /// themselves.
    pub fn on_file_changed(&self, path: impl AsRef<Path>, changed_at: UtcDateTime) {
        self.state.changed(normalize(path.as_ref()), changed_at);
    }

    /// True when `event` concerns one of `source`'s locations.
    pub fn affects(source: &DataSourceConfig, event: &FileChangeEvent) -> bool {
        source
            .location
            .iter()
            .any(|location| normalize(Path::new(location)) == event.path)
    }

    fn lock_watcher(&self) -> MutexGuard<'_, Option<RecommendedWatcher>> {
        self.watcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_resolved(&self) -> MutexGuard<'_, HashMap<String, PathBuf>> {
        self.resolved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Async counterpart of [`normalize`]. Successful resolutions are
    /// cached per configured location.
    async fn resolve(&self, location: &str) -> PathBuf {
        let cached = self.lock_resolved().get(location).cloned();
        if let Some(path) = cached {
            return path;
        }

        let absolute =
            std::path::absolute(location).unwrap_or_else(|_| PathBuf::from(location));
        let (parent, name) = match (absolute.parent(), absolute.file_name()) {
            (Some(parent), Some(name)) => (parent.to_path_buf(), name.to_owned()),
            _ => return absolute,
        };
        match tokio::fs::canonicalize(&parent).await {
            Ok(parent) => {
                let path = parent.join(name);
                self.lock_resolved().insert(location.to_owned(), path.clone());
                path
            }
            Err(_) => absolute,
        }
    }

    fn lock_dirs(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.watched_dirs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn probe(&self, path: &Path) -> Result<PathProbe, SourceError> {
        let (cached, generation) = self.state.lookup(path);
        if let Some(probe) = cached {
            return Ok(probe);
        }

        let probe = match tokio::fs::metadata(path).await {
            Ok(metadata) => PathProbe::Present {
                modified: metadata
                    .modified()
                    .map(UtcDateTime::from_system_time)
                    .map_err(|error| io_error(path, &error))?,
                size: metadata.len(),
            },
            Err(error) if error.kind() == io::ErrorKind::NotFound => PathProbe::Absent,
            Err(error) => return Err(io_error(path, &error)),
        };
        self.state.remember(path, probe, generation);
        Ok(probe)
    }
}

impl SourceAdapter for FileWatchAdapter {
    fn name(&self) -> &'static str {
        "file-watch"
    }

    fn check<'a>(&'a self, source: &'a DataSourceConfig) -> AdapterFuture<'a, SourceCheck> {
        Box::pin(async move {
            let mut oldest: Option<UtcDateTime> = None;
            let mut total_size = 0_u64;
            for location in source.location.iter() {
                let path = self.resolve(location).await;
                match self.probe(&path).await? {
                    PathProbe::Present { modified, size } => {
                        oldest = Some(oldest.map_or(modified, |current| current.min(modified)));
                        total_size = total_size.saturating_add(size);
                    }
                    PathProbe::Absent => return Ok(SourceCheck::unavailable()),
                }
            }

            Ok(match oldest {
                Some(oldest) => SourceCheck::available_at(oldest, Some(total_size)),
                None => SourceCheck::unavailable(),
            })
        })
    }

    fn fetch<'a>(&'a self, request: FetchRequest<'a>) -> AdapterFuture<'a, FetchedData> {
        Box::pin(async move {
            let mut records = Vec::new();
            let mut oldest: Option<UtcDateTime> = None;

            for location in request.source.location.iter() {
                let path = self.resolve(location).await;
                let generation = self.state.generation(&path);
                request
                    .progress
                    .report(ProgressStage::Connecting, format!("stat {}", path.display()));
                let metadata = tokio::fs::metadata(&path)
                    .await
                    .map_err(|error| io_error(&path, &error))?;
                let modified = metadata
                    .modified()
                    .map(UtcDateTime::from_system_time)
                    .map_err(|error| io_error(&path, &error))?;

                request.progress.report(
                    ProgressStage::Downloading,
                    format!("reading {} bytes", metadata.len()),
                );
                let content = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|error| io_error(&path, &error))?;

                let format = request.source.format_for(location);
                let parsed = match format {
                    DataFormat::Json => {
                        request.progress.report(ProgressStage::Parsing, "json");
                        serde_json::from_str(&content)
                            .map_err(|error| error.to_string())
                            .and_then(records_from_json)
                    }
                    DataFormat::Csv => {
                        request.progress.report(ProgressStage::Parsing, "csv");
                        records_from_csv(&content)
                    }
                }
                .map_err(|message| {
                    SourceError::validation(format!(
                        "failed to parse {}: {message}",
                        path.display()
                    ))
                })?;

                records.extend(parsed);
                oldest = Some(oldest.map_or(modified, |current| current.min(modified)));
                self.state.remember(
                    &path,
                    PathProbe::Present {
                        modified,
                        size: metadata.len(),
                    },
                    generation,
                );
            }

            request.progress.report(
                ProgressStage::Validating,
                format!("{} records", records.len()),
            );
            validate_records(request.validation, &records, request.validators)?;

            let last_updated_at = oldest
                .ok_or_else(|| SourceError::invalid_request("source has no file location"))?;
            Ok(FetchedData {
                records,
                last_updated_at,
            })
        })
    }

    fn capabilities(&self, source: &DataSourceConfig) -> AdapterCapabilities {
        let available_methods = match source.refresh_method {
            RefreshMethod::Never => Vec::new(),
            _ if self.watching_enabled => vec![RefreshMethod::FileWatch, RefreshMethod::UserTrigger],
            _ => vec![RefreshMethod::UserTrigger],
        };

        AdapterCapabilities {
            available_methods,
            requires_auth: false,
            estimated_duration_ms: None,
        }
    }
}

/// Absolute form of `path` with the parent directory canonicalized, so that
/// configured locations and watcher event paths compare equal.
fn normalize(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => std::fs::canonicalize(parent)
            .map(|parent| parent.join(name))
            .unwrap_or_else(|_| absolute.clone()),
        _ => absolute,
    }
}

fn io_error(path: &Path, error: &io::Error) -> SourceError {
    let message = format!("{}: {error}", path.display());
    match error.kind() {
        io::ErrorKind::NotFound => SourceError::not_found(message),
        io::ErrorKind::PermissionDenied => SourceError::unauthorized(message),
        _ => SourceError::unavailable(message),
    }
}
