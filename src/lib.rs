pub mod audio;
pub mod client;
pub mod config;
pub mod error;
pub mod ffi;
pub mod logging;

pub use audio::{
    NullBackend, OutputBackend, PcmProducer, PcmSource, PlaybackControl, RenderEngine,
    RenderStats, RenderWorker, SampleFormat,
};
#[cfg(feature = "native")]
pub use audio::CpalBackend;
pub use client::{ClientEvents, ClientHandle, ConnectionState, Connector, PushConnector};
pub use config::{ClientConfig, PlayerSettings};
pub use error::{ClientError, ConfigError, DeviceError};
pub use logging::LogLevel;
