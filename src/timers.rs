//! Deferred-callback tracking and cooperative cancellation.
//!
//! Scripts register timeouts and intervals here instead of against any host
//! scheduler, so the runtime always knows whether a run still has pending
//! work. [`settle`] drains the store after the script body returns: it polls
//! at a fixed interval, fires due callbacks (each one caught individually),
//! and resolves once nothing remains or the cancel signal flips.

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Poll interval used by [`settle`] and [`sleep`]. Cancellation is observed
/// within one interval regardless of how many timers are pending.
pub const SETTLE_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Shared cancellation flag for one run. Written by the cancel command
/// (possibly from another thread), read by `sleep`, `settle`, and the
/// script's own `is_cancelled` polls.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle to a registered timer. Ids are never reused within a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

impl TimerId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn from_u64(id: u64) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerState {
    /// Waiting for its deadline.
    Armed(Instant),
    /// Resolved but not yet reaped by the settle loop.
    Fired,
}

#[derive(Debug)]
struct Timer<C> {
    id: TimerId,
    state: TimerState,
    /// `Some` for repeating timers; they re-arm on firing until cleared.
    period: Option<Duration>,
    callback: C,
}

/// Outstanding deferred callbacks for one run.
///
/// Generic over the callback handle so the store can be exercised without a
/// script runtime attached.
#[derive(Debug, Default)]
pub struct TimerStore<C> {
    next_id: u64,
    pending: Vec<Timer<C>>,
}

impl<C: Clone> TimerStore<C> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            pending: Vec::new(),
        }
    }

    /// Register a one-shot timer.
    pub fn set_timeout(&mut self, callback: C, milliseconds: u64) -> TimerId {
        self.register(callback, milliseconds, None)
    }

    /// Register a repeating timer. It stays pending until cleared.
    pub fn set_interval(&mut self, callback: C, milliseconds: u64) -> TimerId {
        self.register(callback, milliseconds, Some(Duration::from_millis(milliseconds)))
    }

    fn register(&mut self, callback: C, milliseconds: u64, period: Option<Duration>) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.pending.push(Timer {
            id,
            state: TimerState::Armed(Instant::now() + Duration::from_millis(milliseconds)),
            period,
            callback,
        });
        id
    }

    /// Remove a timer. Returns false if it was not pending.
    pub fn clear(&mut self, id: TimerId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|t| t.id != id);
        self.pending.len() != before
    }

    pub fn clear_all(&mut self) {
        self.pending.clear();
    }

    /// Pending entries, including fired-but-unreaped ones.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Collect callbacks whose deadline has passed. One-shots flip to the
    /// fired state until [`reap`](Self::reap)ed; intervals re-arm.
    pub fn take_due(&mut self, now: Instant) -> Vec<(TimerId, C)> {
        let mut due = Vec::new();
        for timer in &mut self.pending {
            let TimerState::Armed(deadline) = timer.state else {
                continue;
            };
            if deadline > now {
                continue;
            }
            match timer.period {
                Some(period) => timer.state = TimerState::Armed(now + period),
                None => timer.state = TimerState::Fired,
            }
            due.push((timer.id, timer.callback.clone()));
        }
        due
    }

    /// Remove a fired one-shot. No-op for intervals and cleared timers.
    pub fn reap(&mut self, id: TimerId) {
        self.pending
            .retain(|t| t.id != id || t.state != TimerState::Fired);
    }
}

/// Drain the store: poll at [`SETTLE_POLL_INTERVAL`], firing due callbacks,
/// until no entries remain or `cancel` is set. Cancellation forces immediate
/// settlement and discards whatever is left.
///
/// A callback error goes through `report` and never aborts sibling timers.
/// Callbacks may re-enter the store (registering or clearing timers), which
/// is why the store is behind a `RefCell` and never borrowed across a fire.
pub fn settle<C, E, F, R>(
    store: &RefCell<TimerStore<C>>,
    cancel: &CancelSignal,
    mut fire: F,
    mut report: R,
) where
    C: Clone,
    F: FnMut(C) -> Result<(), E>,
    R: FnMut(E),
{
    loop {
        if cancel.is_cancelled() {
            store.borrow_mut().clear_all();
            return;
        }
        if store.borrow().is_empty() {
            return;
        }

        let due = store.borrow_mut().take_due(Instant::now());
        for (id, callback) in due {
            if let Err(err) = fire(callback) {
                report(err);
            }
            store.borrow_mut().reap(id);
        }

        if store.borrow().is_empty() {
            return;
        }
        if cancel.is_cancelled() {
            store.borrow_mut().clear_all();
            return;
        }
        thread::sleep(SETTLE_POLL_INTERVAL);
    }
}

/// Suspend the calling script for `milliseconds`, waking early the moment
/// the cancel signal flips. Only the script's own control flow blocks here.
pub fn sleep(cancel: &CancelSignal, milliseconds: u64) {
    let deadline = Instant::now() + Duration::from_millis(milliseconds);
    while !cancel.is_cancelled() {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep((deadline - now).min(SETTLE_POLL_INTERVAL));
    }
}
