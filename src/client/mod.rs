//! The externally visible client object.
//!
//! A [`ClientHandle`] aggregates connection state, cached settings and the
//! host's callbacks, and drives one render worker plus one network
//! connection at a time. Destruction first stops callbacks from starting,
//! waits (bounded) for running ones, and only then tears the worker down.

mod callbacks;
mod network;
mod state;

pub use callbacks::{CallbackRegistry, LogCallback, SettingsCallback, StateCallback};
pub use network::{ClientEvents, ConnectRequest, Connection, Connector, PushConnector};
pub use state::{ConnectionState, Identity, Settings};

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use parking_lot::{Mutex, ReentrantMutex};

use crate::audio::{
    EngineEvent, OutputBackend, PcmProducer, Player, PlaybackControl, RenderEngine, RenderStats,
    RenderWorker,
};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::logging::LogLevel;

const REPORT_POLL: Duration = Duration::from_millis(1);

/// Worker and connection of the current `start`, released together.
struct ActiveConnection {
    worker: RenderWorker,
    connection: Box<dyn Connection>,
}

impl ActiveConnection {
    fn shutdown(mut self) {
        self.worker.stop();
        self.connection.stop();
    }
}

/// Connection state plus a counter bumped on every change.
#[derive(Default)]
struct StateCell {
    current: ConnectionState,
    seq: u64,
}

impl StateCell {
    fn advance(&mut self, next: ConnectionState) -> Option<StateChange> {
        if self.current == next {
            return None;
        }
        self.current = next;
        self.seq += 1;
        Some(StateChange {
            seq: self.seq,
            state: next,
        })
    }
}

/// A state change the host has not been told about yet.
#[derive(Debug, Clone, Copy)]
struct StateChange {
    seq: u64,
    state: ConnectionState,
}

pub(crate) struct ClientInner {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    backend: Arc<dyn OutputBackend>,
    control: PlaybackControl,
    state: Mutex<StateCell>,
    /// Held while a state callback runs, so the host sees changes in order.
    /// Reentrant: a callback may start the client again.
    notify_order: ReentrantMutex<()>,
    identity: Mutex<Identity>,
    latency_ms: AtomicI32,
    callbacks: CallbackRegistry,
    /// Bumped per connection; events carrying an older value are dropped.
    epoch: AtomicU64,
    /// Held across start/stop, including the worker join.
    active: Mutex<Option<ActiveConnection>>,
    /// Short lock for pause/resume to reach the running engine.
    engine: Mutex<Option<Arc<RenderEngine>>>,
}

impl ClientInner {
    pub(crate) fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    pub(crate) fn log(&self, level: LogLevel, message: &str) {
        log::log!(log::Level::from(level), "{}", message);
        self.callbacks.notify_log(level, message);
    }

    fn state(&self) -> ConnectionState {
        self.state.lock().current
    }

    fn update_state(&self, next: ConnectionState) -> Option<StateChange> {
        self.state.lock().advance(next)
    }

    /// Move to `next` only if currently in `from`.
    fn transition_state(&self, from: ConnectionState, next: ConnectionState) -> Option<StateChange> {
        let mut cell = self.state.lock();
        if cell.current != from {
            return None;
        }
        cell.advance(next)
    }

    fn is_latest(&self, change: &StateChange) -> bool {
        self.state.lock().seq == change.seq
    }

    /// Tell the host about `change` unless a newer change superseded it.
    fn report_state(&self, change: Option<StateChange>) {
        let Some(change) = change else {
            return;
        };
        // A superseded change stops waiting for the lock.
        let _order = loop {
            if !self.is_latest(&change) {
                return;
            }
            if let Some(order) = self.notify_order.try_lock_for(REPORT_POLL) {
                break order;
            }
        };
        if self.is_latest(&change) {
            self.callbacks.notify_state(change.state);
        }
    }

    fn set_state(&self, next: ConnectionState) {
        self.report_state(self.update_state(next));
    }

    fn transition(&self, from: ConnectionState, next: ConnectionState) {
        self.report_state(self.transition_state(from, next));
    }

    pub(crate) fn apply_server_settings(&self, volume: i32, muted: bool, latency_ms: i32) {
        let volume = self.control.set_volume(volume);
        self.control.set_muted(muted);
        self.latency_ms.store(latency_ms, Ordering::SeqCst);
        self.callbacks.notify_settings(volume, muted, latency_ms);
    }

    pub(crate) fn connection_lost(&self, reason: &str) {
        self.log(LogLevel::Warning, &format!("Connection lost: {}", reason));
        self.set_state(ConnectionState::Disconnected);
    }

    pub(crate) fn engine_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::SessionStarted => {
                self.transition(ConnectionState::Connected, ConnectionState::Playing);
            }
            EngineEvent::SessionStopped => {
                self.transition(ConnectionState::Playing, ConnectionState::Connected);
            }
            EngineEvent::Exited(Some(e)) => {
                self.log(LogLevel::Error, &format!("Audio worker exited: {}", e));
                self.set_state(ConnectionState::Disconnected);
            }
            EngineEvent::Exited(None) => {}
            // Already written to the log by the engine.
            EngineEvent::Diagnostic(level, message) => self.callbacks.notify_log(level, &message),
        }
    }
}

/// Client object owned by the host. Not `Clone`; dropping it destroys it.
pub struct ClientHandle {
    inner: Arc<ClientInner>,
}

impl ClientHandle {
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        backend: Arc<dyn OutputBackend>,
    ) -> Self {
        let identity = Identity {
            name: config.name.clone(),
            instance: config.instance,
        };
        Self {
            inner: Arc::new(ClientInner {
                config,
                connector,
                backend,
                control: PlaybackControl::new(),
                state: Mutex::new(StateCell::default()),
                notify_order: ReentrantMutex::new(()),
                identity: Mutex::new(identity),
                latency_ms: AtomicI32::new(0),
                callbacks: CallbackRegistry::new(),
                epoch: AtomicU64::new(0),
                active: Mutex::new(None),
                engine: Mutex::new(None),
            }),
        }
    }

    /// Client playing host-fed PCM on the platform output.
    pub fn create(config: ClientConfig) -> (Self, PcmProducer) {
        let (connector, producer) = PushConnector::new(config.feed_format, config.feed_capacity_ms);
        let client = Self::new(config, Arc::new(connector), default_backend());
        (client, producer)
    }

    // ─── Lifecycle ───

    pub fn start(&self, host: &str, port: u16) -> Result<(), ClientError> {
        let host = host.trim();
        if host.is_empty() {
            return Err(ClientError::InvalidEndpoint("empty host".into()));
        }
        if port == 0 {
            return Err(ClientError::InvalidEndpoint(format!("port {}", port)));
        }
        if self.inner.callbacks.guard().is_destroying() {
            return Err(ClientError::Destroyed);
        }
        // Checked before taking the lifecycle lock too, so a `Connecting`
        // callback that calls back in gets an error instead of blocking.
        let state = self.inner.state();
        if state != ConnectionState::Disconnected {
            return Err(ClientError::NotDisconnected(state));
        }

        let mut active = self.inner.active.lock();
        let state = self.inner.state();
        if state != ConnectionState::Disconnected {
            return Err(ClientError::NotDisconnected(state));
        }

        // Leftovers of a connection that dropped on its own.
        *self.inner.engine.lock() = None;
        if let Some(stale) = active.take() {
            stale.shutdown();
        }

        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let events = ClientEvents::new(Arc::downgrade(&self.inner), epoch);
        self.inner.set_state(ConnectionState::Connecting);

        let request = ConnectRequest {
            host: host.to_string(),
            port,
            identity: self.identity(),
            latency_ms: self.latency(),
        };
        let outcome = self.open_connection(&mut active, &request, events);
        let change = match &outcome {
            Ok(connected) => Some(*connected),
            Err(_) => self.inner.update_state(ConnectionState::Disconnected),
        };
        drop(active);

        self.inner.report_state(change);
        match outcome {
            Ok(_) => {
                self.inner
                    .log(LogLevel::Info, &format!("Connected to {}:{}", host, port));
                Ok(())
            }
            Err(e) => {
                self.inner
                    .log(LogLevel::Error, &format!("Failed to connect to {}:{}: {}", host, port, e));
                Err(e)
            }
        }
    }

    /// Connect and bring up the render worker. Runs under the lifecycle lock;
    /// the `Connected` change is returned for the caller to report.
    fn open_connection(
        &self,
        active: &mut Option<ActiveConnection>,
        request: &ConnectRequest,
        events: ClientEvents,
    ) -> Result<StateChange, ClientError> {
        let mut connection = self.inner.connector.connect(request, events.clone())?;

        let Some(connected) = self
            .inner
            .transition_state(ConnectionState::Connecting, ConnectionState::Connected)
        else {
            connection.stop();
            return Err(ClientError::Connect("connection lost while connecting".into()));
        };

        let engine = Arc::new(
            RenderEngine::new(
                connection.source(),
                self.inner.backend.clone(),
                self.inner.control.clone(),
                self.inner.config.player.clone(),
            )
            .with_listener(events.engine_listener()),
        );
        let worker = match RenderWorker::start(engine.clone()) {
            Ok(worker) => worker,
            Err(e) => {
                connection.stop();
                return Err(e.into());
            }
        };

        *self.inner.engine.lock() = Some(engine);
        *active = Some(ActiveConnection { worker, connection });
        Ok(connected)
    }

    /// Stop playback and close the connection. Blocks until the render worker
    /// has exited. No-op when already disconnected.
    pub fn stop(&self) {
        let change = {
            let mut active = self.inner.active.lock();
            // Anything the old connection still reports is stale from here on.
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            let change = self.inner.update_state(ConnectionState::Disconnected);
            *self.inner.engine.lock() = None;
            if let Some(current) = active.take() {
                current.shutdown();
            }
            change
        };

        if change.is_some() {
            self.inner.report_state(change);
            self.inner.log(LogLevel::Info, "Stopped");
        }
    }

    /// Stop delivering callbacks. Non-blocking; `destroy` finishes the job.
    pub fn begin_destroy(&self) {
        self.inner.callbacks.guard().begin_destroy();
    }

    /// Stop callbacks, wait for in-flight ones (bounded), then stop.
    pub fn destroy(&self) {
        let guard = self.inner.callbacks.guard();
        guard.begin_destroy();
        if !guard.wait_drained(self.inner.config.destroy_timeout()) {
            warn!(
                "{} client callback(s) still running after {} ms, destroying anyway",
                guard.in_flight(),
                self.inner.config.destroy_timeout_ms
            );
        }
        self.stop();
    }

    // ─── Playback ───

    fn engine(&self) -> Option<Arc<RenderEngine>> {
        self.inner.engine.lock().clone()
    }

    pub fn pause(&self) {
        match self.engine() {
            Some(engine) => engine.pause(),
            None => {
                self.inner.control.set_paused(true);
            }
        }
    }

    pub fn resume(&self) {
        match self.engine() {
            Some(engine) => engine.resume(),
            None => {
                self.inner.control.set_paused(false);
            }
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.control.is_paused()
    }

    /// Clamped to `0..=100`; returns the stored value.
    pub fn set_volume(&self, percent: i32) -> u8 {
        self.inner.control.set_volume(percent)
    }

    pub fn volume(&self) -> u8 {
        self.inner.control.volume()
    }

    pub fn set_muted(&self, muted: bool) {
        self.inner.control.set_muted(muted);
    }

    pub fn is_muted(&self) -> bool {
        self.inner.control.is_muted()
    }

    /// Latency is sent at connect time, so it can only change while
    /// disconnected. Returns whether the value was taken.
    pub fn set_latency(&self, latency_ms: i32) -> bool {
        if self.inner.state() != ConnectionState::Disconnected {
            info!("Ignoring latency change while connected");
            return false;
        }
        self.inner.latency_ms.store(latency_ms, Ordering::SeqCst);
        true
    }

    pub fn latency(&self) -> i32 {
        self.inner.latency_ms.load(Ordering::SeqCst)
    }

    // ─── Identity & Status ───

    /// Takes effect on the next `start`.
    pub fn set_name(&self, name: &str) {
        self.inner.identity.lock().name = name.to_string();
    }

    /// Takes effect on the next `start`.
    pub fn set_instance(&self, instance: u32) {
        self.inner.identity.lock().instance = instance;
    }

    pub fn identity(&self) -> Identity {
        self.inner.identity.lock().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn settings(&self) -> Settings {
        Settings {
            volume: self.volume(),
            muted: self.is_muted(),
            latency_ms: self.latency(),
        }
    }

    /// Render counters of the running worker, if any.
    pub fn stats(&self) -> Option<RenderStats> {
        self.engine().map(|engine| engine.stats())
    }

    // ─── Callbacks ───

    /// Called on whichever thread changed the state, the render worker
    /// included. Notifications arrive in order and one superseded before it
    /// could be delivered is dropped, so the last one always matches
    /// [`ClientHandle::state`].
    ///
    /// The callback may `start` the client again once `Disconnected` is
    /// reported. It must not call `stop` or `destroy`: both join the render
    /// worker, which may be the calling thread, and `Connecting` is reported
    /// while `start` holds the lifecycle lock they need.
    pub fn register_state_callback<F>(&self, callback: F)
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.inner.callbacks.set_state(Some(Arc::new(callback)));
    }

    pub fn register_settings_callback<F>(&self, callback: F)
    where
        F: Fn(u8, bool, i32) + Send + Sync + 'static,
    {
        self.inner.callbacks.set_settings(Some(Arc::new(callback)));
    }

    pub fn register_log_callback<F>(&self, callback: F)
    where
        F: Fn(LogLevel, &str) + Send + Sync + 'static,
    {
        self.inner.callbacks.set_log(Some(Arc::new(callback)));
    }

    pub fn clear_state_callback(&self) {
        self.inner.callbacks.set_state(None);
    }

    pub fn clear_settings_callback(&self) {
        self.inner.callbacks.set_settings(None);
    }

    pub fn clear_log_callback(&self) {
        self.inner.callbacks.set_log(None);
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(feature = "native")]
fn default_backend() -> Arc<dyn OutputBackend> {
    Arc::new(crate::audio::CpalBackend::new())
}

#[cfg(not(feature = "native"))]
fn default_backend() -> Arc<dyn OutputBackend> {
    Arc::new(crate::audio::NullBackend::new())
}
