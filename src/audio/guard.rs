//! Callback lifecycle guard.
//!
//! Every externally observable callback runs inside a [`CallbackTicket`]. Once
//! [`CallbackGuard::begin_destroy`] has been called no new ticket is handed
//! out, and [`CallbackGuard::wait_drained`] lets the owner block (bounded)
//! until the tickets already out have been dropped.
//!
//! The same guard protects the render callback against session teardown and
//! the client callbacks against `destroy()`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Re-check interval for waiters when no destroy is in progress, since exits
/// only signal once destroying is set.
const DRAIN_POLL: Duration = Duration::from_millis(5);

#[derive(Clone, Default)]
pub struct CallbackGuard {
    inner: Arc<GuardInner>,
}

#[derive(Default)]
struct GuardInner {
    in_flight: AtomicUsize,
    destroying: AtomicBool,
    drained_lock: Mutex<()>,
    drained: Condvar,
}

/// Proof that a callback invocation is in flight. Dropping it ends the
/// invocation, including on early return or unwind.
#[must_use = "the callback is only tracked while the ticket is alive"]
pub struct CallbackTicket<'a> {
    inner: &'a GuardInner,
}

impl CallbackGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to begin a callback invocation. Returns `None` once destruction
    /// has begun. Lock-free.
    pub fn enter(&self) -> Option<CallbackTicket<'_>> {
        let inner = &*self.inner;
        if inner.destroying.load(Ordering::SeqCst) {
            return None;
        }
        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        // Increment-then-recheck: a destroy that started while we were
        // incrementing must not see us run.
        if inner.destroying.load(Ordering::SeqCst) {
            inner.exit();
            return None;
        }
        Some(CallbackTicket { inner })
    }

    /// Stop admitting callbacks. Idempotent, never blocks.
    pub fn begin_destroy(&self) {
        self.inner.destroying.store(true, Ordering::SeqCst);
    }

    pub fn is_destroying(&self) -> bool {
        self.inner.destroying.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Block until no callback is in flight or `timeout` elapses. Returns
    /// whether the guard drained.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let inner = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut lock = inner.drained_lock.lock();
        loop {
            if inner.in_flight.load(Ordering::SeqCst) == 0 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let mut slice = deadline - now;
            if !inner.destroying.load(Ordering::SeqCst) {
                slice = slice.min(DRAIN_POLL);
            }
            inner.drained.wait_for(&mut lock, slice);
        }
    }
}

impl GuardInner {
    fn exit(&self) {
        let previous = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        // Only a destroyer ever waits, so the signal (and its lock) is skipped
        // on the hot path.
        if previous == 1 && self.destroying.load(Ordering::SeqCst) {
            let _lock = self.drained_lock.lock();
            self.drained.notify_all();
        }
    }
}

impl Drop for CallbackTicket<'_> {
    fn drop(&mut self) {
        self.inner.exit();
    }
}
