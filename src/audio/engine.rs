use parking_lot::Mutex;
use std::sync::Arc;

use log::info;

use super::control::PlaybackControl;
use super::device::{OutputBackend, PcmDevice};
use super::event_loop::{EventLoop, EventLoopHandle, LoopEvent};
use super::player::Player;
use super::session::{RenderSession, RenderShared, RenderStats};
use super::source::PcmSource;
use crate::config::PlayerSettings;
use crate::error::DeviceError;
use crate::logging::LogLevel;

// ─── Engine Events ───

/// Lifecycle notifications from the render worker thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A device session is up and being fed.
    SessionStarted,
    /// The session was torn down and the worker is looking for data again.
    /// Not sent on shutdown.
    SessionStopped,
    /// The worker left its loop. Carries the error if it gave up.
    Exited(Option<DeviceError>),
    Diagnostic(LogLevel, String),
}

pub type EngineListener = Arc<dyn Fn(EngineEvent) + Send + Sync>;

// ─── Render Engine ───

/// Buffer-queue playback engine. Brings a [`RenderSession`] up whenever the
/// source has data and tears it down when the render callback asks for it.
pub struct RenderEngine {
    source: Arc<dyn PcmSource>,
    backend: Arc<dyn OutputBackend>,
    control: PlaybackControl,
    settings: PlayerSettings,
    shared: Arc<RenderShared>,
    /// Set while `worker` runs. Never touched by the render callback.
    event_loop: Mutex<Option<EventLoopHandle>>,
    listener: Option<EngineListener>,
}

impl RenderEngine {
    pub fn new(
        source: Arc<dyn PcmSource>,
        backend: Arc<dyn OutputBackend>,
        control: PlaybackControl,
        settings: PlayerSettings,
    ) -> Self {
        Self {
            source,
            backend,
            control,
            settings,
            shared: Arc::new(RenderShared::new()),
            event_loop: Mutex::new(None),
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: EngineListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn control(&self) -> &PlaybackControl {
        &self.control
    }

    pub fn is_active(&self) -> bool {
        self.shared.is_active()
    }

    pub fn stats(&self) -> RenderStats {
        self.shared.stats()
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(listener) = &self.listener {
            listener(event);
        }
    }

    fn report(&self, level: LogLevel, message: String) {
        log::log!(log::Level::from(level), "{}", message);
        self.emit(EngineEvent::Diagnostic(level, message));
    }

    fn should_exit(&self) -> bool {
        !self.shared.is_active() || self.shared.shutdown_requested()
    }

    fn notify(&self, event: LoopEvent) {
        if let Some(handle) = self.event_loop.lock().as_ref() {
            handle.notify(event);
        }
    }

    /// One session from open to teardown. Returns after the session is gone.
    fn run_session(&self, event_loop: &EventLoop) -> Result<(), DeviceError> {
        let mut session = RenderSession::open(
            self.backend.as_ref(),
            self.source.clone(),
            self.control.clone(),
            self.shared.clone(),
            event_loop.handle(),
            &self.settings,
        )?;
        self.emit(EngineEvent::SessionStarted);

        event_loop.run(
            || self.should_exit(),
            |event| {
                if event == LoopEvent::PauseChanged {
                    session.sync_pause(self.control.is_paused());
                }
            },
        );

        let generation = session.generation();
        if !session.close(&self.shared, self.settings.drain_timeout()) {
            self.report(
                LogLevel::Error,
                format!(
                    "Render callbacks of session {} did not drain within {} ms",
                    generation, self.settings.drain_timeout_ms
                ),
            );
        }
        self.source.discard();

        if self.shared.take_stall() {
            self.report(
                LogLevel::Warning,
                format!(
                    "No chunk received for {} ms, reinitializing audio",
                    self.settings.stall_timeout_ms
                ),
            );
        }
        if !self.shared.shutdown_requested() {
            self.emit(EngineEvent::SessionStopped);
        }
        Ok(())
    }
}

// ─── Worker Loop ───

impl Player for RenderEngine {
    fn worker(&self) {
        let event_loop = EventLoop::new();
        *self.event_loop.lock() = Some(event_loop.handle());
        info!(
            "Render worker started (backend: {}, format: {})",
            self.backend.name(),
            self.source.format()
        );

        let mut exit_error = None;
        while !self.should_exit() {
            self.shared.clear_reinit();
            event_loop.reset();

            if !self.source.wait_for_chunk(self.settings.idle_wait()) || self.should_exit() {
                continue;
            }

            match self.run_session(&event_loop) {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    self.report(LogLevel::Error, format!("Audio output unavailable: {}", e));
                    exit_error = Some(e);
                    break;
                }
                Err(e) => {
                    self.report(
                        LogLevel::Warning,
                        format!("Failed to initialize audio: {}, retrying", e),
                    );
                }
            }

            if !self.shared.needs_reinit() {
                event_loop.idle(self.settings.init_backoff());
            }
        }

        *self.event_loop.lock() = None;
        self.shared.deactivate();
        info!("Render worker stopped");
        self.emit(EngineEvent::Exited(exit_error));
    }

    fn pcm_list(&self) -> Vec<PcmDevice> {
        self.backend.devices()
    }

    fn request_shutdown(&self) {
        self.shared.request_shutdown();
        if let Some(handle) = self.event_loop.lock().as_ref() {
            handle.stop();
        }
    }

    fn pause(&self) {
        if !self.control.set_paused(true) {
            self.notify(LoopEvent::PauseChanged);
        }
    }

    fn resume(&self) {
        if self.control.set_paused(false) {
            self.notify(LoopEvent::PauseChanged);
        }
    }

    fn is_paused(&self) -> bool {
        self.control.is_paused()
    }
}
