//! Bounded admission of refresh operations.
//!
//! At most `limit` operations hold a slot. Excess operations wait in one FIFO
//! queue per priority tier; a released slot is handed directly to the
//! highest-priority waiter so no later arrival can overtake it. A waiter
//! whose [`SharedPriority`] is raised moves to the back of the higher tier.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;

use crate::refresh::RefreshPriority;

const TIERS: usize = 3;

/// Priority of one operation; callers attaching later may raise it.
#[derive(Debug, Clone)]
pub(crate) struct SharedPriority(Arc<AtomicUsize>);

impl SharedPriority {
    pub(crate) fn new(priority: RefreshPriority) -> Self {
        Self(Arc::new(AtomicUsize::new(tier(priority))))
    }

    pub(crate) fn get(&self) -> RefreshPriority {
        match self.tier() {
            0 => RefreshPriority::High,
            1 => RefreshPriority::Normal,
            _ => RefreshPriority::Low,
        }
    }

    /// Raises the priority to `priority`; never lowers it. True when it
    /// changed.
    pub(crate) fn raise(&self, priority: RefreshPriority) -> bool {
        let target = tier(priority);
        self.0.fetch_min(target, Ordering::SeqCst) > target
    }

    fn tier(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn is(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<RefreshPriority> for SharedPriority {
    fn from(priority: RefreshPriority) -> Self {
        Self::new(priority)
    }
}

struct Waiter {
    ticket: u64,
    priority: SharedPriority,
    grant: oneshot::Sender<()>,
}

struct AdmissionState {
    in_flight: usize,
    limit: usize,
    queues: [VecDeque<Waiter>; TIERS],
    next_ticket: u64,
}

/// Slot counter plus priority wait queues.
pub(crate) struct Admission {
    state: Mutex<AdmissionState>,
}

/// A held slot; released on drop.
pub(crate) struct Permit {
    admission: Arc<Admission>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.admission.release();
    }
}

fn tier(priority: RefreshPriority) -> usize {
    match priority {
        RefreshPriority::High => 0,
        RefreshPriority::Normal => 1,
        RefreshPriority::Low => 2,
    }
}

impl Admission {
    pub(crate) fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(AdmissionState {
                in_flight: 0,
                limit: limit.max(1),
                queues: Default::default(),
                next_ticket: 0,
            }),
        })
    }

    /// Waits for a slot. Returns `None` when `cancelled` resolves first; a
    /// slot granted concurrently with the cancellation is given back.
    pub(crate) async fn acquire<C>(
        self: &Arc<Self>,
        priority: SharedPriority,
        cancelled: C,
    ) -> Option<Permit>
    where
        C: Future<Output = ()>,
    {
        let (ticket, granted) = {
            let mut state = self.lock();
            if state.in_flight < state.limit {
                state.in_flight += 1;
                return Some(self.permit());
            }

            let ticket = state.next_ticket;
            state.next_ticket += 1;
            let (grant, granted) = oneshot::channel();
            // Read under the lock so a concurrent `promote` cannot miss it.
            state.queues[priority.tier()].push_back(Waiter {
                ticket,
                priority,
                grant,
            });
            (ticket, granted)
        };

        tokio::select! {
            biased;
            result = granted => match result {
                Ok(()) => Some(self.permit()),
                Err(_) => None,
            },
            () = cancelled => {
                if !self.withdraw(ticket) {
                    // Granted between the wakeup and the withdrawal.
                    self.release();
                }
                None
            }
        }
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    pub(crate) fn queued(&self) -> usize {
        self.lock().queues.iter().map(VecDeque::len).sum()
    }

    /// Changes the slot limit. Raising it admits waiters immediately;
    /// lowering it takes effect as slots are released.
    pub(crate) fn set_limit(&self, limit: usize) {
        let mut state = self.lock();
        state.limit = limit.max(1);
        while state.in_flight < state.limit {
            if !hand_over(&mut state) {
                break;
            }
            state.in_flight += 1;
        }
    }

    fn permit(self: &Arc<Self>) -> Permit {
        Permit {
            admission: Arc::clone(self),
        }
    }

    fn release(&self) {
        let mut state = self.lock();
        if state.in_flight > state.limit || !hand_over(&mut state) {
            state.in_flight = state.in_flight.saturating_sub(1);
        }
    }

    /// Moves the waiter holding `priority` up to its current tier. No-op
    /// when it is not queued below that tier.
    pub(crate) fn promote(&self, priority: &SharedPriority) {
        let mut state = self.lock();
        let target = priority.tier();
        for current in target + 1..TIERS {
            let queue = &mut state.queues[current];
            if let Some(index) = queue.iter().position(|waiter| waiter.priority.is(priority)) {
                if let Some(waiter) = queue.remove(index) {
                    state.queues[target].push_back(waiter);
                }
                return;
            }
        }
    }

    /// Removes a queued waiter. False when it was already granted.
    fn withdraw(&self, ticket: u64) -> bool {
        let mut state = self.lock();
        for queue in &mut state.queues {
            if let Some(index) = queue.iter().position(|waiter| waiter.ticket == ticket) {
                queue.remove(index);
                return true;
            }
        }
        false
    }

    fn lock(&self) -> MutexGuard<'_, AdmissionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Passes a slot to the next live waiter, highest tier first.
fn hand_over(state: &mut AdmissionState) -> bool {
    for queue in &mut state.queues {
        while let Some(waiter) = queue.pop_front() {
            if waiter.grant.send(()).is_ok() {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use std::future::pending;

    use tokio_util::sync::CancellationToken;

    use super::*;

    #[tokio::test]
    async fn slots_are_bounded_and_handed_over() {
        let admission = Admission::new(1);
        let first = admission
            .acquire(RefreshPriority::Normal.into(), pending())
            .await
            .expect("free slot");
        assert_eq!(admission.in_flight(), 1);

        let waiter = {
            let admission = Arc::clone(&admission);
            tokio::spawn(async move { admission.acquire(RefreshPriority::Low.into(), pending()).await.is_some() })
        };
        tokio::task::yield_now().await;
        assert_eq!(admission.queued(), 1);

        drop(first);
        assert!(waiter.await.expect("join"));
        assert_eq!(admission.in_flight(), 0);
    }

    #[tokio::test]
    async fn high_priority_waiters_go_first() {
        let admission = Admission::new(1);
        let held = admission
            .acquire(RefreshPriority::Normal.into(), pending())
            .await
            .expect("free slot");

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut tasks = Vec::new();
        for (label, priority) in [
            ("low", RefreshPriority::Low),
            ("normal", RefreshPriority::Normal),
            ("high", RefreshPriority::High),
        ] {
            let admission = Arc::clone(&admission);
            let order = Arc::clone(&order);
            tasks.push(tokio::spawn(async move {
                let _permit = admission.acquire(priority.into(), pending()).await;
                order.lock().expect("order").push(label);
            }));
            tokio::task::yield_now().await;
        }

        drop(held);
        for task in tasks {
            task.await.expect("join");
        }
        assert_eq!(*order.lock().expect("order"), vec!["high", "normal", "low"]);
    }

    #[tokio::test]
    async fn raised_waiter_moves_ahead_of_lower_tiers() {
        let admission = Admission::new(1);
        let held = admission
            .acquire(RefreshPriority::Normal.into(), pending())
            .await
            .expect("free slot");

        let order = Arc::new(Mutex::new(Vec::new()));
        let boosted = SharedPriority::new(RefreshPriority::Low);
        let mut tasks = Vec::new();
        for (label, priority) in [
            ("boosted", boosted.clone()),
            ("normal", SharedPriority::new(RefreshPriority::Normal)),
        ] {
            let admission = Arc::clone(&admission);
            let order = Arc::clone(&order);
            tasks.push(tokio::spawn(async move {
                let _permit = admission.acquire(priority, pending()).await;
                order.lock().expect("order").push(label);
            }));
            tokio::task::yield_now().await;
        }
        assert_eq!(admission.queued(), 2);

        assert!(boosted.raise(RefreshPriority::High));
        assert!(!boosted.raise(RefreshPriority::Low), "never lowered");
        admission.promote(&boosted);
        assert_eq!(boosted.get(), RefreshPriority::High);

        drop(held);
        for task in tasks {
            task.await.expect("join");
        }
        assert_eq!(*order.lock().expect("order"), vec!["boosted", "normal"]);
    }

    #[tokio::test]
    async fn cancelled_waiter_leaves_the_queue() {
        let admission = Admission::new(1);
        let held = admission
            .acquire(RefreshPriority::Normal.into(), pending())
            .await
            .expect("free slot");

        let cancel = CancellationToken::new();
        let waiter = {
            let admission = Arc::clone(&admission);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                admission
                    .acquire(RefreshPriority::High.into(), cancel.cancelled_owned())
                    .await
                    .is_some()
            })
        };
        tokio::task::yield_now().await;
        cancel.cancel();

        assert!(!waiter.await.expect("join"));
        assert_eq!(admission.queued(), 0);
        drop(held);
        assert_eq!(admission.in_flight(), 0);
    }

    #[tokio::test]
    async fn raising_the_limit_admits_waiters() {
        let admission = Admission::new(1);
        let _held = admission
            .acquire(RefreshPriority::Normal.into(), pending())
            .await
            .expect("free slot");
        let waiter = {
            let admission = Arc::clone(&admission);
            tokio::spawn(async move { admission.acquire(RefreshPriority::Normal.into(), pending()).await.is_some() })
        };
        tokio::task::yield_now().await;

        admission.set_limit(2);
        assert!(waiter.await.expect("join"));
    }
}
