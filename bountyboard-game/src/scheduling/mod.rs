//! Deferred-expiry tasks.
//!
//! The [`Scheduler`] is the only component that understands time. Callers
//! register an effect to run after a delay and get back a [`TaskHandle`]; the
//! handle can cancel the task or force it to expire early. Every task runs its
//! effect at most once: whichever of natural firing, [`Scheduler::cancel`] or
//! [`Scheduler::force_expire`] removes the pending entry first wins, and only
//! the winner ever sees the effect.
//!
//! Natural firing happens in [`Scheduler::run_due`]. Game code calls it from
//! its own loop, or the `async` feature's [`SchedulerDriver`] calls it from a
//! tokio task that sleeps until the next deadline.

mod clock;
#[cfg(feature = "async")]
mod driver;

pub use clock::{Clock, ManualClock, SystemClock};
#[cfg(feature = "async")]
pub use clock::TokioClock;
#[cfg(feature = "async")]
pub use driver::SchedulerDriver;

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::constants::LOG_SCHEDULER;

/// Zero-argument action run when a task expires.
pub type Effect = Box<dyn FnOnce() + Send + 'static>;

/// Unique identity of a scheduled task. Never reused by a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(u64);

impl TaskId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Counters describing everything a scheduler has done since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub scheduled: u64,
    pub fired: u64,
    pub forced: u64,
    pub cancelled: u64,
    pub discarded: u64,
    pub pending: usize,
}

struct PendingTask {
    deadline: Instant,
    effect: Effect,
}

/// Ordering: (deadline ASC, id ASC). Wrapped in `Reverse` so the heap pops
/// the earliest entry first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueEntry {
    deadline: Instant,
    id: TaskId,
}

#[derive(Default)]
struct SchedulerState {
    next_id: u64,
    queue: BinaryHeap<Reverse<QueueEntry>>,
    pending: HashMap<TaskId, PendingTask>,
    stats: SchedulerStats,
}

impl SchedulerState {
    /// Drop queue entries whose task already went terminal once they
    /// dominate the heap.
    fn compact(&mut self) {
        if self.queue.len() <= self.pending.len() * 2 + 64 {
            return;
        }
        let pending = &self.pending;
        self.queue.retain(|Reverse(entry)| pending.contains_key(&entry.id));
    }

    fn pop_due(&mut self, now: Instant) -> Option<(TaskId, Effect)> {
        while let Some(Reverse(entry)) = self.queue.peek().copied() {
            if entry.deadline > now {
                return None;
            }
            self.queue.pop();
            if let Some(task) = self.pending.remove(&entry.id) {
                self.stats.fired += 1;
                return Some((entry.id, task.effect));
            }
        }
        None
    }
}

pub(crate) struct SchedulerInner {
    clock: Arc<dyn Clock>,
    state: Mutex<SchedulerState>,
    #[cfg(feature = "async")]
    wake: tokio::sync::Notify,
}

impl SchedulerInner {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared handle to the single scheduling authority.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("clock", &self.inner.clock)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl Scheduler {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                clock,
                state: Mutex::new(SchedulerState::default()),
                #[cfg(feature = "async")]
                wake: tokio::sync::Notify::new(),
            }),
        }
    }

    /// The clock deadlines are measured against.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    /// Register `effect` to run once, no earlier than `delay` from now.
    ///
    /// The effect is never run synchronously, even for a zero delay.
    pub fn schedule<F>(&self, delay: Duration, effect: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let deadline = self.inner.clock.now() + delay;
        self.schedule_at(deadline, effect)
    }

    /// Register `effect` to run once the clock reaches `deadline`.
    pub fn schedule_at<F>(&self, deadline: Instant, effect: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let id = {
            let mut state = self.inner.lock();
            state.next_id += 1;
            let id = TaskId(state.next_id);
            state.pending.insert(
                id,
                PendingTask {
                    deadline,
                    effect: Box::new(effect),
                },
            );
            state.queue.push(Reverse(QueueEntry { deadline, id }));
            state.stats.scheduled += 1;
            id
        };
        log::trace!(target: LOG_SCHEDULER, "scheduled {id}");
        #[cfg(feature = "async")]
        self.inner.wake.notify_one();
        TaskHandle {
            id,
            scheduler: Arc::downgrade(&self.inner),
        }
    }

    /// Mark the task terminal without running its effect.
    ///
    /// Returns `true` when this call performed the transition; unknown,
    /// foreign and already-terminal handles are a no-op.
    pub fn cancel(&self, handle: &TaskHandle) -> bool {
        if !self.owns(handle) {
            return false;
        }
        let removed = {
            let mut state = self.inner.lock();
            let removed = state.pending.remove(&handle.id).is_some();
            if removed {
                state.stats.cancelled += 1;
                state.compact();
            }
            removed
        };
        if removed {
            log::trace!(target: LOG_SCHEDULER, "cancelled {}", handle.id);
        }
        removed
    }

    /// Expire the task now.
    ///
    /// With `run_effect` the effect runs synchronously in the caller before
    /// this returns; otherwise it is dropped unrun. Returns `true` when this
    /// call performed the transition.
    pub fn force_expire(&self, handle: &TaskHandle, run_effect: bool) -> bool {
        if !self.owns(handle) {
            return false;
        }
        let task = {
            let mut state = self.inner.lock();
            let task = state.pending.remove(&handle.id);
            if task.is_some() {
                if run_effect {
                    state.stats.forced += 1;
                } else {
                    state.stats.discarded += 1;
                }
                state.compact();
            }
            task
        };
        let Some(task) = task else {
            return false;
        };
        log::debug!(
            target: LOG_SCHEDULER,
            "force-expired {} (run effect: {run_effect})",
            handle.id
        );
        if run_effect {
            (task.effect)();
        }
        true
    }

    /// Whether the task has neither fired nor been cancelled.
    #[must_use]
    pub fn is_pending(&self, handle: &TaskHandle) -> bool {
        self.owns(handle) && self.inner.lock().pending.contains_key(&handle.id)
    }

    /// Deadline of a pending task.
    #[must_use]
    pub fn deadline(&self, handle: &TaskHandle) -> Option<Instant> {
        if !self.owns(handle) {
            return None;
        }
        self.inner.lock().pending.get(&handle.id).map(|task| task.deadline)
    }

    /// Earliest deadline among pending tasks.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        let mut state = self.inner.lock();
        loop {
            let Reverse(entry) = state.queue.peek().copied()?;
            if state.pending.contains_key(&entry.id) {
                return Some(entry.deadline);
            }
            state.queue.pop();
        }
    }

    /// Time left until the earliest pending deadline.
    #[must_use]
    pub fn time_until_next(&self) -> Option<Duration> {
        let deadline = self.next_deadline()?;
        Some(deadline.saturating_duration_since(self.inner.clock.now()))
    }

    /// Fire every task whose deadline has elapsed, earliest first.
    ///
    /// Each effect runs after the scheduler lock is released, so effects may
    /// schedule or cancel other tasks. Returns the number of effects run.
    pub fn run_due(&self) -> usize {
        let mut fired = 0;
        loop {
            let now = self.inner.clock.now();
            let Some((id, effect)) = self.inner.lock().pop_due(now) else {
                break;
            };
            log::trace!(target: LOG_SCHEDULER, "firing {id}");
            effect();
            fired += 1;
        }
        fired
    }

    /// Cancel every pending task without running any effect.
    pub fn cancel_all(&self) -> usize {
        let dropped: Vec<PendingTask> = {
            let mut state = self.inner.lock();
            let dropped: Vec<_> = state.pending.drain().map(|(_, task)| task).collect();
            state.queue.clear();
            state.stats.cancelled += dropped.len() as u64;
            dropped
        };
        if !dropped.is_empty() {
            log::debug!(target: LOG_SCHEDULER, "cancelled {} pending tasks", dropped.len());
        }
        dropped.len()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        let state = self.inner.lock();
        SchedulerStats {
            pending: state.pending.len(),
            ..state.stats
        }
    }

    fn owns(&self, handle: &TaskHandle) -> bool {
        std::ptr::eq(handle.scheduler.as_ptr(), Arc::as_ptr(&self.inner))
    }

    #[cfg(feature = "async")]
    pub(crate) fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.inner.wake.notified()
    }
}

/// Reference to one scheduled task.
///
/// Holds only a weak link back to its scheduler: a handle never keeps the
/// scheduler alive, and a scheduler never owns whatever holds the handle.
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    scheduler: Weak<SchedulerInner>,
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskHandle").field(&self.id).finish()
    }
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Weak::ptr_eq(&self.scheduler, &other.scheduler)
    }
}

impl Eq for TaskHandle {}

impl TaskHandle {
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    fn scheduler(&self) -> Option<Scheduler> {
        self.scheduler.upgrade().map(|inner| Scheduler { inner })
    }

    /// See [`Scheduler::cancel`]. A no-op once the scheduler is gone.
    pub fn cancel(&self) -> bool {
        self.scheduler()
            .is_some_and(|scheduler| scheduler.cancel(self))
    }

    /// See [`Scheduler::force_expire`]. A no-op once the scheduler is gone.
    pub fn force_expire(&self, run_effect: bool) -> bool {
        self.scheduler()
            .is_some_and(|scheduler| scheduler.force_expire(self, run_effect))
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.scheduler()
            .is_some_and(|scheduler| scheduler.is_pending(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn manual() -> (Arc<ManualClock>, Scheduler) {
        let origin = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let clock = Arc::new(ManualClock::new(origin));
        let scheduler = Scheduler::new(clock.clone());
        (clock, scheduler)
    }

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let effect_hits = Arc::clone(&hits);
        (hits, move || {
            effect_hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn effect_waits_for_deadline_then_fires_once() {
        let (clock, scheduler) = manual();
        let (hits, effect) = counter();
        let handle = scheduler.schedule(Duration::from_secs(10), effect);

        assert_eq!(scheduler.run_due(), 0);
        clock.advance(Duration::from_secs(9));
        assert_eq!(scheduler.run_due(), 0);
        assert!(handle.is_pending());

        clock.advance(Duration::from_secs(1));
        assert_eq!(scheduler.run_due(), 1);
        assert_eq!(scheduler.run_due(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!handle.is_pending());
    }

    #[test]
    fn zero_delay_is_not_synchronous() {
        let (_clock, scheduler) = manual();
        let (hits, effect) = counter();
        let _handle = scheduler.schedule(Duration::ZERO, effect);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        scheduler.run_due();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancelled_task_never_runs_even_after_deadline() {
        let (clock, scheduler) = manual();
        let (hits, effect) = counter();
        let handle = scheduler.schedule(Duration::from_secs(5), effect);

        assert!(scheduler.cancel(&handle));
        clock.advance(Duration::from_secs(60));
        assert_eq!(scheduler.run_due(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(!scheduler.cancel(&handle), "second cancel is a no-op");
        assert!(!handle.force_expire(true), "terminal tasks cannot be forced");
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn force_expire_runs_effect_immediately_and_once() {
        let (clock, scheduler) = manual();
        let (hits, effect) = counter();
        let handle = scheduler.schedule(Duration::from_secs(3600), effect);

        assert!(scheduler.force_expire(&handle, true));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        clock.advance(Duration::from_secs(3600));
        assert_eq!(scheduler.run_due(), 0);
        assert!(!scheduler.force_expire(&handle, true));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn force_expire_without_effect_discards_silently() {
        let (_clock, scheduler) = manual();
        let (hits, effect) = counter();
        let handle = scheduler.schedule(Duration::from_secs(1), effect);

        assert!(handle.force_expire(false));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.stats().discarded, 1);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn due_tasks_fire_in_deadline_order() {
        let (clock, scheduler) = manual();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (label, secs) in [("c", 30), ("a", 10), ("b", 20), ("a2", 10)] {
            let order = Arc::clone(&order);
            scheduler.schedule(Duration::from_secs(secs), move || {
                order.lock().unwrap().push(label);
            });
        }
        clock.advance(Duration::from_secs(30));
        assert_eq!(scheduler.run_due(), 4);
        assert_eq!(*order.lock().unwrap(), vec!["a", "a2", "b", "c"]);
    }

    #[test]
    fn effects_may_schedule_follow_up_tasks() {
        let (clock, scheduler) = manual();
        let (hits, effect) = counter();
        let chained = scheduler.clone();
        scheduler.schedule(Duration::from_secs(1), move || {
            chained.schedule(Duration::from_secs(1), effect);
        });

        clock.advance(Duration::from_secs(1));
        assert_eq!(scheduler.run_due(), 1);
        assert_eq!(scheduler.pending_count(), 1);
        clock.advance(Duration::from_secs(1));
        assert_eq!(scheduler.run_due(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn foreign_handles_are_ignored() {
        let (_clock, scheduler) = manual();
        let (_other_clock, other) = manual();
        let (hits, effect) = counter();
        let handle = other.schedule(Duration::ZERO, effect);

        assert!(!scheduler.cancel(&handle));
        assert!(!scheduler.force_expire(&handle, true));
        assert!(other.is_pending(&handle));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handle_outliving_scheduler_is_inert() {
        let (_clock, scheduler) = manual();
        let handle = scheduler.schedule(Duration::from_secs(1), || {});
        drop(scheduler);
        assert!(!handle.cancel());
        assert!(!handle.force_expire(true));
        assert!(!handle.is_pending());
    }

    #[test]
    fn next_deadline_skips_cancelled_entries() {
        let (clock, scheduler) = manual();
        let first = scheduler.schedule(Duration::from_secs(5), || {});
        let second = scheduler.schedule(Duration::from_secs(8), || {});
        scheduler.cancel(&first);

        assert_eq!(scheduler.next_deadline(), scheduler.deadline(&second));
        assert_eq!(scheduler.time_until_next(), Some(Duration::from_secs(8)));
        clock.advance(Duration::from_secs(10));
        assert_eq!(scheduler.time_until_next(), Some(Duration::ZERO));
    }

    #[test]
    fn racing_fire_and_cancel_runs_effect_at_most_once() {
        for _ in 0..64 {
            let (clock, scheduler) = manual();
            let (hits, effect) = counter();
            let handle = scheduler.schedule(Duration::from_millis(1), effect);
            clock.advance(Duration::from_millis(1));

            let firing = {
                let scheduler = scheduler.clone();
                thread::spawn(move || scheduler.run_due())
            };
            let cancelling = {
                let handle = handle.clone();
                thread::spawn(move || handle.cancel())
            };
            let forcing = thread::spawn(move || handle.force_expire(true));

            let fired = firing.join().unwrap();
            let cancelled = cancelling.join().unwrap();
            let forced = forcing.join().unwrap();

            let winners = usize::from(cancelled) + usize::from(forced) + fired;
            assert_eq!(winners, 1);
            assert!(hits.load(Ordering::SeqCst) <= 1);
            assert_eq!(hits.load(Ordering::SeqCst), fired + usize::from(forced));
        }
    }

    #[test]
    fn cancel_all_clears_queue_and_counts() {
        let (clock, scheduler) = manual();
        let (hits, effect) = counter();
        scheduler.schedule(Duration::from_secs(1), effect);
        scheduler.schedule(Duration::from_secs(2), || {});

        assert_eq!(scheduler.cancel_all(), 2);
        clock.advance(Duration::from_secs(5));
        assert_eq!(scheduler.run_due(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let stats = scheduler.stats();
        assert_eq!(stats.scheduled, 2);
        assert_eq!(stats.cancelled, 2);
        assert_eq!(stats.pending, 0);
    }
}
