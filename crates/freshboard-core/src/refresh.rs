//! Request, result and progress value objects of a refresh operation.
//!
//! None of these are stored in the registry. They are correlated by chart
//! type and a per-operation UUID.

use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::data_source::SourceError;
use crate::{ChartType, SourceType};

/// Queue tier used by admission control.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshPriority {
    Low,
    #[default]
    Normal,
    High,
}

/// What asked for the refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RefreshTrigger {
    #[default]
    Manual,
    Scheduled,
    Visibility,
    FileChange,
}

/// Completion callback attached to a request.
pub type CompletionCallback = Arc<dyn Fn(&DataRefreshResult) + Send + Sync>;

/// Request to refresh one chart's data.
#[derive(Clone)]
pub struct DataRefreshRequest {
    pub chart_type: ChartType,
    pub priority: RefreshPriority,
    pub trigger: RefreshTrigger,
    pub cancel: CancellationToken,
    pub progress: Option<mpsc::UnboundedSender<DataRefreshProgress>>,
    pub on_complete: Option<CompletionCallback>,
}

impl DataRefreshRequest {
    pub fn new(chart_type: ChartType) -> Self {
        Self {
            chart_type,
            priority: RefreshPriority::default(),
            trigger: RefreshTrigger::default(),
            cancel: CancellationToken::new(),
            progress: None,
            on_complete: None,
        }
    }

    pub fn with_priority(mut self, priority: RefreshPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_trigger(mut self, trigger: RefreshTrigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Streams progress events of the operation into `sender`.
    pub fn with_progress(mut self, sender: mpsc::UnboundedSender<DataRefreshProgress>) -> Self {
        self.progress = Some(sender);
        self
    }

    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(&DataRefreshResult) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(callback));
        self
    }
}

impl Debug for DataRefreshRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataRefreshRequest")
            .field("chart_type", &self.chart_type)
            .field("priority", &self.priority)
            .field("trigger", &self.trigger)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("progress", &self.progress.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

/// Where a source sits in a dependency's trial order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "index")]
pub enum SourcePosition {
    Primary,
    Fallback(usize),
}

/// The source that served (or last failed) a refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceOrigin {
    pub position: SourcePosition,
    pub source_type: SourceType,
    pub location: String,
}

/// Normalized failure surfaced to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshError {
    pub message: String,
    pub code: String,
    pub retryable: bool,
}

impl RefreshError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
            retryable: false,
        }
    }
}

impl From<&SourceError> for RefreshError {
    fn from(error: &SourceError) -> Self {
        Self {
            message: error.message().to_owned(),
            code: error.code().to_owned(),
            retryable: error.retryable(),
        }
    }
}

/// Outcome of one refresh operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRefreshResult {
    pub success: bool,
    pub chart_type: ChartType,
    pub operation_id: Uuid,
    pub source: Option<SourceOrigin>,
    pub record_count: usize,
    /// Adapter fetch attempts across every source tried.
    pub attempts: u32,
    pub duration_ms: u64,
    pub cancelled: bool,
    pub error: Option<RefreshError>,
}

impl DataRefreshResult {
    pub(crate) fn rejected(chart_type: ChartType, operation_id: Uuid, error: RefreshError) -> Self {
        Self {
            success: false,
            chart_type,
            operation_id,
            source: None,
            record_count: 0,
            attempts: 0,
            duration_ms: 0,
            cancelled: false,
            error: Some(error),
        }
    }

    pub(crate) fn cancelled(chart_type: ChartType, operation_id: Uuid, attempts: u32) -> Self {
        Self {
            success: false,
            chart_type,
            operation_id,
            source: None,
            record_count: 0,
            attempts,
            duration_ms: 0,
            cancelled: true,
            error: None,
        }
    }
}

/// Advisory stage of an in-flight refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStage {
    Connecting,
    Downloading,
    Parsing,
    Validating,
    Caching,
}

impl ProgressStage {
    pub const fn percent(self) -> u8 {
        match self {
            Self::Connecting => 10,
            Self::Downloading => 30,
            Self::Parsing => 60,
            Self::Validating => 80,
            Self::Caching => 95,
        }
    }
}

/// Progress event emitted at stage boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataRefreshProgress {
    pub operation_id: Uuid,
    pub chart_type: ChartType,
    pub stage: ProgressStage,
    pub percent: u8,
    pub message: String,
}

/// Fan-out of progress events to every request attached to an operation.
///
/// Closed receivers are pruned on the next report.
#[derive(Clone)]
pub struct ProgressReporter {
    operation_id: Uuid,
    chart_type: ChartType,
    listeners: Arc<Mutex<Vec<mpsc::UnboundedSender<DataRefreshProgress>>>>,
}

impl ProgressReporter {
    pub fn new(operation_id: Uuid, chart_type: ChartType) -> Self {
        Self {
            operation_id,
            chart_type,
            listeners: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    pub fn attach(&self, sender: mpsc::UnboundedSender<DataRefreshProgress>) {
        self.lock().push(sender);
    }

    pub fn report(&self, stage: ProgressStage, message: impl Into<String>) {
        let mut listeners = self.lock();
        if listeners.is_empty() {
            return;
        }

        let event = DataRefreshProgress {
            operation_id: self.operation_id,
            chart_type: self.chart_type.clone(),
            stage,
            percent: stage.percent(),
            message: message.into(),
        };
        listeners.retain(|listener| listener.send(event.clone()).is_ok());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<DataRefreshProgress>>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
