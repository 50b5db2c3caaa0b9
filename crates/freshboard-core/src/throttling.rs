use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

use crate::service_policy::ServicePolicy;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Token-bucket limiters keyed by service name.
///
/// Cloning shares the buckets, so every adapter handle and every dependency
/// pulling from the same service draws from one budget. The first policy seen
/// for a service sizes its bucket.
#[derive(Clone)]
pub struct ServiceRateLimiters {
    limiters: Arc<Mutex<HashMap<String, Arc<DirectRateLimiter>>>>,
    clock: DefaultClock,
}

impl Default for ServiceRateLimiters {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceRateLimiters {
    pub fn new() -> Self {
        Self {
            limiters: Arc::new(Mutex::new(HashMap::new())),
            clock: DefaultClock::default(),
        }
    }

    /// Takes one token from the service's bucket. When the bucket is empty,
    /// returns how long until the next token is available.
    ///
    /// The check and the decrement happen in one governor operation, so two
    /// concurrent callers cannot both spend the last token.
    pub fn acquire(&self, policy: &ServicePolicy) -> Result<(), Duration> {
        let limiter = self.limiter_for(policy);
        limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }

    pub fn tracked_services(&self) -> usize {
        self.lock().len()
    }

    fn limiter_for(&self, policy: &ServicePolicy) -> Arc<DirectRateLimiter> {
        let mut limiters = self.lock();
        limiters
            .entry(policy.service_name.clone())
            .or_insert_with(|| {
                tracing::debug!(
                    event = "core.throttling.bucket_created",
                    service = %policy.service_name,
                    quota_limit = policy.quota_limit,
                    quota_window_ms = policy.quota_window_ms
                );
                Arc::new(RateLimiter::direct(quota_from_window(
                    policy.quota_window(),
                    policy.quota_limit,
                )))
            })
            .clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<DirectRateLimiter>>> {
        self.limiters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn quota_from_window(quota_window: Duration, quota_limit: u32) -> Quota {
    let burst = NonZeroU32::new(quota_limit.max(1)).unwrap_or(NonZeroU32::MIN);

    let seconds_per_cell = (quota_window.as_secs_f64() / f64::from(burst.get())).max(0.001);
    let period = Duration::from_secs_f64(seconds_per_cell);

    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
        .allow_burst(burst)
}
