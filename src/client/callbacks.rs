use std::sync::Arc;

use parking_lot::Mutex;

use super::state::ConnectionState;
use crate::audio::CallbackGuard;
use crate::logging::LogLevel;

pub type StateCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;
/// `(volume, muted, latency_ms)`
pub type SettingsCallback = Arc<dyn Fn(u8, bool, i32) + Send + Sync>;
pub type LogCallback = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Host callbacks of one client.
///
/// Every invocation runs inside a [`CallbackGuard`] ticket and outside the
/// slot lock, so a slow callback never blocks registration and destruction
/// can wait for it to finish.
#[derive(Default)]
pub struct CallbackRegistry {
    guard: CallbackGuard,
    state: Mutex<Option<StateCallback>>,
    settings: Mutex<Option<SettingsCallback>>,
    log: Mutex<Option<LogCallback>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guard(&self) -> &CallbackGuard {
        &self.guard
    }

    pub fn set_state(&self, callback: Option<StateCallback>) {
        if !self.guard.is_destroying() {
            *self.state.lock() = callback;
        }
    }

    pub fn set_settings(&self, callback: Option<SettingsCallback>) {
        if !self.guard.is_destroying() {
            *self.settings.lock() = callback;
        }
    }

    pub fn set_log(&self, callback: Option<LogCallback>) {
        if !self.guard.is_destroying() {
            *self.log.lock() = callback;
        }
    }

    pub fn notify_state(&self, state: ConnectionState) {
        let Some(_ticket) = self.guard.enter() else {
            return;
        };
        let callback = self.state.lock().clone();
        if let Some(callback) = callback {
            callback(state);
        }
    }

    pub fn notify_settings(&self, volume: u8, muted: bool, latency_ms: i32) {
        let Some(_ticket) = self.guard.enter() else {
            return;
        };
        let callback = self.settings.lock().clone();
        if let Some(callback) = callback {
            callback(volume, muted, latency_ms);
        }
    }

    pub fn notify_log(&self, level: LogLevel, message: &str) {
        let Some(_ticket) = self.guard.enter() else {
            return;
        };
        let callback = self.log.lock().clone();
        if let Some(callback) = callback {
            callback(level, message);
        }
    }
}
