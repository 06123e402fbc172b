//! One output-device instantiation and the real-time render callback that
//! feeds it.
//!
//! The session owns the device queue; the callback only holds the session's
//! generation and validates it against the live generation on every call.
//! Teardown bumps the live generation first, so any callback racing it turns
//! into a no-op before the device is released.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use super::control::PlaybackControl;
use super::device::{BufferLayout, OutputBackend, OutputBuffer, OutputQueue, QueueHandle, RenderFn};
use super::event_loop::EventLoopHandle;
use super::format::SampleFormat;
use super::guard::CallbackGuard;
use super::source::PcmSource;
use crate::config::PlayerSettings;
use crate::error::DeviceError;

/// Worker state shared with the render callback. Atomics only.
pub struct RenderShared {
    active: AtomicBool,
    shutdown_requested: AtomicBool,
    needs_reinit: AtomicBool,
    stalled: AtomicBool,
    generation: AtomicU64,
    last_chunk_ms: AtomicU64,
    epoch: Instant,
    sessions_started: AtomicU64,
    rendered_buffers: AtomicU64,
    silent_buffers: AtomicU64,
    stalls: AtomicU64,
    last_delay_ms: AtomicU64,
}

/// Snapshot of the render counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RenderStats {
    pub generation: u64,
    pub sessions_started: u64,
    pub rendered_buffers: u64,
    pub silent_buffers: u64,
    pub stalls: u64,
    pub last_delay_ms: u64,
}

impl RenderShared {
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
            shutdown_requested: AtomicBool::new(false),
            needs_reinit: AtomicBool::new(false),
            stalled: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            last_chunk_ms: AtomicU64::new(0),
            epoch: Instant::now(),
            sessions_started: AtomicU64::new(0),
            rendered_buffers: AtomicU64::new(0),
            silent_buffers: AtomicU64::new(0),
            stalls: AtomicU64::new(0),
            last_delay_ms: AtomicU64::new(0),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Terminal: the worker leaves its loop and never comes back.
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn needs_reinit(&self) -> bool {
        self.needs_reinit.load(Ordering::SeqCst)
    }

    pub fn clear_reinit(&self) {
        self.needs_reinit.store(false, Ordering::SeqCst);
    }

    fn request_reinit(&self) {
        self.needs_reinit.store(true, Ordering::SeqCst);
    }

    /// Returns whether the last session ended on a stall, clearing the flag.
    pub fn take_stall(&self) -> bool {
        self.stalled.swap(false, Ordering::SeqCst)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Invalidate the current generation and return the new one.
    pub fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn mark_chunk(&self, now_ms: u64) {
        self.last_chunk_ms.store(now_ms, Ordering::Relaxed);
    }

    fn last_chunk_ms(&self) -> u64 {
        self.last_chunk_ms.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> RenderStats {
        RenderStats {
            generation: self.generation(),
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            rendered_buffers: self.rendered_buffers.load(Ordering::Relaxed),
            silent_buffers: self.silent_buffers.load(Ordering::Relaxed),
            stalls: self.stalls.load(Ordering::Relaxed),
            last_delay_ms: self.last_delay_ms.load(Ordering::Relaxed),
        }
    }
}

impl Default for RenderShared {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one render invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Teardown already started; nothing touched.
    Rejected,
    /// Session superseded; nothing touched.
    Stale,
    /// Zero-filled and re-submitted.
    Paused,
    /// Shutdown requested; buffer not re-submitted.
    ShuttingDown,
    /// No data for longer than the stall timeout; buffer not re-submitted.
    Stalled,
    /// No data yet; silence re-submitted.
    Silence,
    /// Real audio re-submitted.
    Rendered,
}

impl RenderOutcome {
    pub fn resubmitted(self) -> bool {
        matches!(
            self,
            RenderOutcome::Paused | RenderOutcome::Silence | RenderOutcome::Rendered
        )
    }
}

/// Playout delay of the buffer being filled.
///
/// With a timeline the frames still queued in the current buffer are taken
/// from the device position, otherwise a full pool minus one buffer is
/// assumed. `dac_delay_ms` covers the fixed latency of the device chain.
pub fn estimate_playout_delay(
    sample_time: Option<u64>,
    layout: &BufferLayout,
    rate: u32,
    dac_delay_ms: u64,
) -> Duration {
    let queued_ms = layout.buffer_ms * (layout.num_buffers as u64 - 1);
    let mut delay_ms = match sample_time {
        Some(sample_time) if rate > 0 => {
            let frames = layout.frames_per_buffer as u64;
            let remaining = (frames - sample_time % frames) % frames;
            remaining * 1000 / rate as u64 + queued_ms
        }
        _ => queued_ms,
    };
    delay_ms += dac_delay_ms;
    Duration::from_millis(delay_ms)
}

/// State the render callback runs against. Shared with the device's
/// real-time thread; holds references only, never the device itself.
pub struct Renderer {
    generation: u64,
    shared: Arc<RenderShared>,
    control: PlaybackControl,
    source: Arc<dyn PcmSource>,
    wake: EventLoopHandle,
    guard: CallbackGuard,
    layout: BufferLayout,
    rate: u32,
    dac_delay_ms: u64,
    stall_timeout_ms: u64,
}

impl Renderer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        generation: u64,
        shared: Arc<RenderShared>,
        control: PlaybackControl,
        source: Arc<dyn PcmSource>,
        wake: EventLoopHandle,
        layout: BufferLayout,
        settings: &PlayerSettings,
    ) -> Self {
        let rate = source.format().rate;
        Self {
            generation,
            shared,
            control,
            source,
            wake,
            guard: CallbackGuard::new(),
            layout,
            rate,
            dac_delay_ms: settings.dac_delay_ms,
            stall_timeout_ms: settings.stall_timeout_ms,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn guard(&self) -> &CallbackGuard {
        &self.guard
    }

    /// Fill one drained buffer and hand it back to the device.
    ///
    /// Rules: no locks, no blocking, no logging. Atomics, the lock-free
    /// source and a non-blocking re-submit only.
    pub fn render(&self, queue: &QueueHandle, mut buffer: OutputBuffer) -> RenderOutcome {
        let Some(_ticket) = self.guard.enter() else {
            return RenderOutcome::Rejected;
        };
        let live = self.shared.generation();

        if self.control.is_paused() {
            if live != self.generation {
                return RenderOutcome::Stale;
            }
            buffer.silence();
            queue.enqueue(buffer);
            return RenderOutcome::Paused;
        }

        // Signal and leave; teardown happens on the worker thread.
        if !self.shared.is_active() || self.shared.shutdown_requested() {
            self.shared.request_reinit();
            self.wake.stop();
            return RenderOutcome::ShuttingDown;
        }

        if live != self.generation {
            return RenderOutcome::Stale;
        }

        let delay = estimate_playout_delay(
            queue.sample_time(),
            &self.layout,
            self.rate,
            self.dac_delay_ms,
        );
        self.shared
            .last_delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);

        let frames = self.layout.frames_per_buffer;
        let got_chunk = self
            .source
            .chunk_or_silence(buffer.samples_mut(), delay, frames);
        let now = self.shared.now_ms();

        if got_chunk {
            self.shared.mark_chunk(now);
            self.control.apply_gain(buffer.samples_mut());
        } else if now.saturating_sub(self.shared.last_chunk_ms()) > self.stall_timeout_ms {
            self.shared.stalled.store(true, Ordering::SeqCst);
            self.shared.stalls.fetch_add(1, Ordering::Relaxed);
            self.shared.request_reinit();
            self.wake.stop();
            return RenderOutcome::Stalled;
        }

        // The pull may have taken a while; the session may be gone by now.
        if self.shared.generation() != self.generation {
            return RenderOutcome::Stale;
        }

        queue.enqueue(buffer);
        if got_chunk {
            self.shared.rendered_buffers.fetch_add(1, Ordering::Relaxed);
            RenderOutcome::Rendered
        } else {
            self.shared.silent_buffers.fetch_add(1, Ordering::Relaxed);
            RenderOutcome::Silence
        }
    }
}

/// A live output device plus the renderer feeding it. Built and torn down on
/// the render worker thread only.
pub struct RenderSession {
    queue: Box<dyn OutputQueue>,
    handle: QueueHandle,
    renderer: Arc<Renderer>,
    layout: BufferLayout,
    started: bool,
}

impl RenderSession {
    /// Open the device, pre-fill every buffer and start playback unless
    /// paused.
    pub fn open(
        backend: &dyn OutputBackend,
        source: Arc<dyn PcmSource>,
        control: PlaybackControl,
        shared: Arc<RenderShared>,
        wake: EventLoopHandle,
        settings: &PlayerSettings,
    ) -> Result<Self, DeviceError> {
        let format: SampleFormat = source.format();
        format.validate()?;
        let layout = BufferLayout::new(&format, settings.buffer_ms, settings.num_buffers);
        info!(
            "frames: {}, ms: {}, buffer size: {}, buffers: {}",
            layout.frames_per_buffer, layout.buffer_ms, layout.buffer_bytes, layout.num_buffers
        );

        let generation = shared.next_generation();
        shared.mark_chunk(shared.now_ms());

        let renderer = Arc::new(Renderer::new(
            generation,
            shared.clone(),
            control.clone(),
            source,
            wake,
            layout,
            settings,
        ));
        let render: RenderFn = {
            let renderer = renderer.clone();
            Arc::new(move |queue: &QueueHandle, buffer: OutputBuffer| {
                renderer.render(queue, buffer);
            })
        };

        let opened = backend.open(&format, &layout, render)?;
        if !opened.handle.has_timeline() {
            warn!("Output device has no timeline, using fixed playout delay (non-fatal)");
        }

        let mut session = Self {
            queue: opened.queue,
            handle: opened.handle,
            renderer,
            layout,
            started: false,
        };

        for id in 0..layout.num_buffers {
            let buffer = OutputBuffer::new(id, layout.samples_per_buffer());
            session.renderer.render(&session.handle, buffer);
        }

        if control.is_paused() {
            info!("Audio queue created but paused");
        } else if let Err(e) = session.queue.start() {
            error!("Output start failed: {}", e);
            session.close(&shared, Duration::ZERO);
            return Err(e);
        } else {
            session.started = true;
        }

        shared.sessions_started.fetch_add(1, Ordering::Relaxed);
        Ok(session)
    }

    pub fn generation(&self) -> u64 {
        self.renderer.generation()
    }

    pub fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Bring the device in line with the pause flag.
    pub fn sync_pause(&mut self, paused: bool) {
        if paused && self.started {
            match self.queue.pause() {
                Ok(()) => self.started = false,
                Err(e) => warn!("Output pause failed: {}", e),
            }
        } else if !paused && !self.started {
            match self.queue.start() {
                Ok(()) => self.started = true,
                Err(e) => warn!("Output start failed: {}", e),
            }
        }
    }

    /// Tear the device down. Worker thread only, never from the callback.
    ///
    /// Returns `false` if callbacks were still in flight after
    /// `drain_timeout`; the device is released regardless.
    pub fn close(mut self, shared: &RenderShared, drain_timeout: Duration) -> bool {
        shared.next_generation();
        let guard = self.renderer.guard().clone();
        guard.begin_destroy();

        self.queue.stop();

        let drained = guard.wait_drained(drain_timeout);
        if !drained {
            error!(
                "{} render callback(s) still in flight after {:?}, releasing device anyway",
                guard.in_flight(),
                drain_timeout
            );
        }

        drop(self.queue);
        drop(self.handle);
        debug!("Audio queue cleaned up on worker thread");
        drained
    }
}
