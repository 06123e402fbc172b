use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

/// Upper bound on how long `run` sleeps before re-checking its exit
/// condition on its own.
const LOOP_TICK: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEvent {
    Wake,
    PauseChanged,
}

/// The render worker's run loop. Owned by the worker thread; other threads
/// interact with it only through an [`EventLoopHandle`].
pub struct EventLoop {
    tx: Sender<LoopEvent>,
    rx: Receiver<LoopEvent>,
    stopped: Arc<AtomicBool>,
}

/// Cross-thread control of an [`EventLoop`]. Every method is non-blocking
/// and safe to call from the real-time callback.
#[derive(Clone)]
pub struct EventLoopHandle {
    tx: Sender<LoopEvent>,
    stopped: Arc<AtomicBool>,
}

impl EventLoop {
    pub fn new() -> Self {
        let (tx, rx) = bounded(32);
        Self {
            tx,
            rx,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn handle(&self) -> EventLoopHandle {
        EventLoopHandle {
            tx: self.tx.clone(),
            stopped: self.stopped.clone(),
        }
    }

    /// Re-arm after a previous `run` was stopped. Pending events are dropped.
    pub fn reset(&self) {
        self.stopped.store(false, Ordering::SeqCst);
        while self.rx.try_recv().is_ok() {}
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Block until stopped or `should_exit` turns true, dispatching events.
    pub fn run(&self, should_exit: impl Fn() -> bool, mut on_event: impl FnMut(LoopEvent)) {
        while !self.is_stopped() && !should_exit() {
            match self.rx.recv_timeout(LOOP_TICK) {
                Ok(LoopEvent::Wake) | Err(RecvTimeoutError::Timeout) => {}
                Ok(event) => on_event(event),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    /// Sleep for `timeout`, returning early on any event or stop.
    pub fn idle(&self, timeout: Duration) {
        if self.is_stopped() {
            return;
        }
        let _ = self.rx.recv_timeout(timeout);
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoopHandle {
    /// Make the loop's `run` return.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let _ = self.tx.try_send(LoopEvent::Wake);
    }

    /// Deliver an event. Dropped when the queue is full; events only say
    /// "something changed", the receiver re-reads the actual state.
    pub fn notify(&self, event: LoopEvent) {
        let _ = self.tx.try_send(event);
    }
}
