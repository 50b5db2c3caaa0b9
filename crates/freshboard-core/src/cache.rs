//! In-memory cache of the last good records per chart.
//!
//! Expiry does not evict: expired data is still served as stale data, and is
//! only reported as expired. Stale data is preferred over no data.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::data_source::FetchedData;
use crate::ChartType;

/// Cached payload of one chart.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedData {
    pub data: FetchedData,
    pub expired: bool,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    data: FetchedData,
    expires_at: Instant,
}

#[derive(Debug)]
struct CacheInner {
    map: HashMap<ChartType, CacheEntry>,
    ttl: Duration,
}

/// Thread-safe store of fetched records keyed by chart type.
#[derive(Debug, Clone)]
pub struct CacheStore {
    inner: Arc<tokio::sync::RwLock<CacheInner>>,
}

impl CacheStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(tokio::sync::RwLock::new(CacheInner {
                map: HashMap::new(),
                ttl,
            })),
        }
    }

    pub fn from_millis(ttl_ms: u64) -> Self {
        Self::new(Duration::from_millis(ttl_ms))
    }

    /// Last cached data for the chart, expired or not.
    pub async fn get(&self, chart_type: &ChartType) -> Option<CachedData> {
        let store = self.inner.read().await;
        let now = Instant::now();
        store.map.get(chart_type).map(|entry| CachedData {
            data: entry.data.clone(),
            expired: now > entry.expires_at,
        })
    }

    /// Cached data only while it is within the TTL.
    pub async fn get_fresh(&self, chart_type: &ChartType) -> Option<FetchedData> {
        self.get(chart_type)
            .await
            .filter(|cached| !cached.expired)
            .map(|cached| cached.data)
    }

    /// Replaces the chart's cached data in one write.
    pub async fn put(&self, chart_type: ChartType, data: FetchedData) {
        let mut store = self.inner.write().await;
        let expires_at = Instant::now() + store.ttl;
        store.map.insert(chart_type, CacheEntry { data, expires_at });
    }

    pub async fn contains(&self, chart_type: &ChartType) -> bool {
        self.inner.read().await.map.contains_key(chart_type)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        self.inner.write().await.map.clear();
    }
}
