//! Headless output device. Plays buffers into nothing on a clocked thread,
//! for CI and hosts without audio hardware.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};

use super::device::{
    BufferLayout, OpenQueue, OutputBackend, OutputBuffer, OutputQueue, PcmDevice, QueueHandle,
    RenderFn, Timeline,
};
use super::format::SampleFormat;
use crate::error::DeviceError;

const PAUSED_POLL: Duration = Duration::from_millis(1);

pub struct NullBackend {
    /// Playback runs this many times faster than real time.
    speedup: u32,
    fail_open: AtomicBool,
    fail_start: Arc<AtomicBool>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::accelerated(1)
    }

    pub fn accelerated(speedup: u32) -> Self {
        Self {
            speedup: speedup.max(1),
            fail_open: AtomicBool::new(false),
            fail_start: Arc::new(AtomicBool::new(false)),
            opened: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make every following `open` fail with a retryable error.
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make `start` of every queue fail, including queues already open.
    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn opened_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputBackend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn devices(&self) -> Vec<PcmDevice> {
        vec![PcmDevice {
            idx: 0,
            name: "Null Output".into(),
        }]
    }

    fn open(
        &self,
        format: &SampleFormat,
        layout: &BufferLayout,
        render: RenderFn,
    ) -> Result<OpenQueue, DeviceError> {
        format.validate()?;
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(DeviceError::BuildStream("null output refused to open".into()));
        }

        let (tx, rx) = bounded(layout.num_buffers);
        let timeline = Timeline::new();
        let handle = QueueHandle::new(tx, Some(timeline.clone()));
        let period = Duration::from_micros(
            (layout.buffer_ms * 1000 / self.speedup as u64).max(1000),
        );

        let state = Arc::new(NullState {
            alive: AtomicBool::new(true),
            playing: AtomicBool::new(false),
        });
        let thread = {
            let state = state.clone();
            let handle = handle.clone();
            let frames = layout.frames_per_buffer as u64;
            thread::Builder::new()
                .name("null-output".into())
                .spawn(move || play(state, rx, handle, timeline, render, period, frames))
                .map_err(|e| DeviceError::Spawn(e.to_string()))?
        };

        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(OpenQueue {
            queue: Box::new(NullQueue {
                state,
                thread: Some(thread),
                fail_start: self.fail_start.clone(),
                closed: self.closed.clone(),
            }),
            handle,
        })
    }
}

struct NullState {
    alive: AtomicBool,
    playing: AtomicBool,
}

/// Device thread: take the next queued buffer, "play" it for one period,
/// then hand it back to the render callback.
fn play(
    state: Arc<NullState>,
    pending: Receiver<OutputBuffer>,
    handle: QueueHandle,
    timeline: Timeline,
    render: RenderFn,
    period: Duration,
    frames: u64,
) {
    while state.alive.load(Ordering::SeqCst) {
        if !state.playing.load(Ordering::SeqCst) {
            thread::sleep(PAUSED_POLL);
            continue;
        }
        let buffer = match pending.recv_timeout(period) {
            Ok(buffer) => buffer,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        thread::sleep(period);
        if !state.alive.load(Ordering::SeqCst) {
            break;
        }
        timeline.advance(frames);
        render(&handle, buffer);
    }
}

struct NullQueue {
    state: Arc<NullState>,
    thread: Option<JoinHandle<()>>,
    fail_start: Arc<AtomicBool>,
    closed: Arc<AtomicUsize>,
}

impl OutputQueue for NullQueue {
    fn start(&mut self) -> Result<(), DeviceError> {
        if !self.state.alive.load(Ordering::SeqCst) {
            return Err(DeviceError::Start("queue stopped".into()));
        }
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(DeviceError::Start("null output refused to start".into()));
        }
        self.state.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&mut self) -> Result<(), DeviceError> {
        self.state.playing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.state.playing.store(false, Ordering::SeqCst);
        self.state.alive.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Null output thread panicked");
            }
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for NullQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    fn counting_render(calls: Arc<AtomicU64>) -> RenderFn {
        Arc::new(move |queue: &QueueHandle, buffer: OutputBuffer| {
            calls.fetch_add(1, Ordering::SeqCst);
            queue.enqueue(buffer);
        })
    }

    #[test]
    fn buffers_come_back_in_submission_order() {
        let backend = NullBackend::accelerated(10);
        let format = SampleFormat::default();
        let layout = BufferLayout::new(&format, 20, 4);
        let (seen_tx, seen_rx) = bounded(16);
        let render: RenderFn = Arc::new(move |_: &QueueHandle, buffer: OutputBuffer| {
            let _ = seen_tx.try_send(buffer.id());
        });
        let mut opened = backend.open(&format, &layout, render).unwrap();
        for id in 0..layout.num_buffers {
            assert!(opened
                .handle
                .enqueue(OutputBuffer::new(id, layout.samples_per_buffer())));
        }
        opened.queue.start().unwrap();

        let ids: Vec<usize> = (0..layout.num_buffers)
            .map(|_| seen_rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        opened.queue.stop();
    }

    #[test]
    fn fail_start_is_retryable_and_closes_cleanly() {
        let backend = NullBackend::new();
        backend.set_fail_start(true);
        let format = SampleFormat::default();
        let layout = BufferLayout::new(&format, 100, 4);
        let mut opened = backend
            .open(&format, &layout, counting_render(Arc::new(AtomicU64::new(0))))
            .unwrap();
        let err = opened.queue.start().unwrap_err();
        assert!(!err.is_fatal());

        backend.set_fail_start(false);
        assert!(opened.queue.start().is_ok());
        drop(opened);
        assert_eq!(backend.opened_count(), 1);
        assert_eq!(backend.closed_count(), 1);
    }

    #[test]
    fn plays_queued_buffers_until_stopped() {
        let backend = NullBackend::accelerated(10);
        let format = SampleFormat::default();
        let layout = BufferLayout::new(&format, 20, 4);
        let calls = Arc::new(AtomicU64::new(0));
        let mut opened = backend
            .open(&format, &layout, counting_render(calls.clone()))
            .unwrap();
        for id in 0..layout.num_buffers {
            assert!(opened
                .handle
                .enqueue(OutputBuffer::new(id, layout.samples_per_buffer())));
        }

        thread::sleep(Duration::from_millis(30));
        assert_eq!(calls.load(Ordering::SeqCst), 0, "not started yet");

        opened.queue.start().unwrap();
        thread::sleep(Duration::from_millis(50));
        opened.queue.stop();
        let after_stop = calls.load(Ordering::SeqCst);
        assert!(after_stop > 0);
        assert!(opened.handle.sample_time().unwrap() >= after_stop * layout.frames_per_buffer as u64);

        thread::sleep(Duration::from_millis(20));
        assert_eq!(calls.load(Ordering::SeqCst), after_stop);
        assert_eq!(backend.opened_count(), 1);
        assert_eq!(backend.closed_count(), 1);

        drop(opened);
        assert_eq!(backend.closed_count(), 1);
    }

    #[test]
    fn fail_open_is_retryable() {
        let backend = NullBackend::new();
        backend.set_fail_open(true);
        let format = SampleFormat::default();
        let layout = BufferLayout::new(&format, 100, 4);
        let err = backend
            .open(&format, &layout, counting_render(Arc::new(AtomicU64::new(0))))
            .err()
            .unwrap();
        assert!(!err.is_fatal());
        assert_eq!(backend.opened_count(), 0);
    }
}
