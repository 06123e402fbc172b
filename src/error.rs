use thiserror::Error;

use crate::client::ConnectionState;

/// Output-device failures. Everything except [`DeviceError::NoDevice`] is
/// retried by the render worker on its next data-availability wakeup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("no output device available")]
    NoDevice,
    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to build output stream: {0}")]
    BuildStream(String),
    #[error("failed to start output: {0}")]
    Start(String),
    #[error("failed to pause output: {0}")]
    Pause(String),
    #[error("failed to spawn thread: {0}")]
    Spawn(String),
}

impl DeviceError {
    /// A fatal error ends the worker instead of being retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DeviceError::NoDevice)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("client is {0:?}, expected Disconnected")]
    NotDisconnected(ConnectionState),
    #[error("client is being destroyed")]
    Destroyed,
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error(transparent)]
    Device(#[from] DeviceError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
