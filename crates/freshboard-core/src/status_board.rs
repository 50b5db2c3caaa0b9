//! Read-only status queries and change subscriptions for UI consumers.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::task::JoinHandle;

use crate::adapters::AdapterSet;
use crate::registry::{DependencyRegistry, StatusChange};
use crate::{ChartRefreshCapability, ChartType, DataSourceStatus};

/// Query surface over the registry. Never accepts writes.
#[derive(Clone)]
pub struct StatusBoard {
    registry: Arc<DependencyRegistry>,
    adapters: AdapterSet,
}

impl StatusBoard {
    pub fn new(registry: Arc<DependencyRegistry>, adapters: AdapterSet) -> Self {
        Self { registry, adapters }
    }

    pub fn status(&self, chart_type: &ChartType) -> Option<DataSourceStatus> {
        self.registry.status(chart_type)
    }

    /// Recomputed on every call from config, status and adapter state.
    pub fn capabilities(&self, chart_type: &ChartType) -> Option<ChartRefreshCapability> {
        self.registry.capabilities(chart_type, &self.adapters)
    }

    pub fn all_statuses(&self) -> BTreeMap<ChartType, DataSourceStatus> {
        self.registry.statuses()
    }

    /// Changes of one chart.
    pub fn subscribe(&self, chart_type: &ChartType) -> StatusSubscription {
        StatusSubscription {
            chart_type: Some(chart_type.clone()),
            receiver: self.registry.subscribe(),
        }
    }

    /// Changes of every chart.
    pub fn subscribe_all(&self) -> StatusSubscription {
        StatusSubscription {
            chart_type: None,
            receiver: self.registry.subscribe(),
        }
    }

    /// Invokes `callback` on a background task for each change of
    /// `chart_type`. Dropping the handle unsubscribes.
    ///
    /// Must be called within a tokio runtime.
    pub fn on_status_changed<F>(&self, chart_type: &ChartType, callback: F) -> SubscriptionHandle
    where
        F: Fn(&StatusChange) + Send + Sync + 'static,
    {
        let mut subscription = self.subscribe(chart_type);
        let task = tokio::spawn(async move {
            while let Some(change) = subscription.recv().await {
                callback(&change);
            }
        });
        SubscriptionHandle { task }
    }
}

/// Stream of status changes. Dropping it (or calling
/// [`unsubscribe`](Self::unsubscribe)) ends the subscription.
pub struct StatusSubscription {
    chart_type: Option<ChartType>,
    receiver: broadcast::Receiver<StatusChange>,
}

impl StatusSubscription {
    /// Next matching change; `None` once the registry is gone.
    ///
    /// A subscriber that falls behind skips the overwritten changes and
    /// keeps going; the current status is always available from
    /// [`StatusBoard::status`].
    pub async fn recv(&mut self) -> Option<StatusChange> {
        loop {
            match self.receiver.recv().await {
                Ok(change) if self.matches(&change) => return Some(change),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        event = "core.status_board.subscriber_lagged",
                        skipped
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching change already delivered, without waiting.
    pub fn try_recv(&mut self) -> Option<StatusChange> {
        loop {
            match self.receiver.try_recv() {
                Ok(change) if self.matches(&change) => return Some(change),
                Ok(_) | Err(TryRecvError::Lagged(_)) => {}
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}

    fn matches(&self, change: &StatusChange) -> bool {
        self.chart_type
            .as_ref()
            .map_or(true, |chart_type| *chart_type == change.chart_type)
    }
}

/// Background callback subscription; aborts on drop.
#[derive(Debug)]
pub struct SubscriptionHandle {
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn unsubscribe(self) {}

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
