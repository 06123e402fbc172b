//! Seam to the network layer that feeds a client.
//!
//! A [`Connector`] turns a [`ConnectRequest`] into a live [`Connection`]
//! exposing the decoded PCM stream. The network side reports back through
//! [`ClientEvents`], which may be used from any thread and outlives the
//! connection harmlessly: events from an older connection are dropped.

use std::sync::{Arc, Weak};

use super::state::Identity;
use super::ClientInner;
use crate::audio::{EngineEvent, EngineListener, PcmProducer, PcmSource, RingPcmSource, SampleFormat};
use crate::error::ClientError;
use crate::logging::LogLevel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub host: String,
    pub port: u16,
    pub identity: Identity,
    pub latency_ms: i32,
}

pub trait Connection: Send {
    /// Decoded PCM for the render worker.
    fn source(&self) -> Arc<dyn PcmSource>;

    /// Close the connection. Called once, after the render worker is gone.
    fn stop(&mut self);
}

pub trait Connector: Send + Sync {
    fn connect(
        &self,
        request: &ConnectRequest,
        events: ClientEvents,
    ) -> Result<Box<dyn Connection>, ClientError>;
}

/// Event sink handed to the network layer for one connection.
#[derive(Clone)]
pub struct ClientEvents {
    inner: Weak<ClientInner>,
    epoch: u64,
}

impl ClientEvents {
    pub(crate) fn new(inner: Weak<ClientInner>, epoch: u64) -> Self {
        Self { inner, epoch }
    }

    fn current(&self) -> Option<Arc<ClientInner>> {
        self.inner
            .upgrade()
            .filter(|inner| inner.is_current(self.epoch))
    }

    /// Server-side settings change. Volume is clamped to `0..=100`.
    pub fn settings(&self, volume: i32, muted: bool, latency_ms: i32) {
        if let Some(inner) = self.current() {
            inner.apply_server_settings(volume, muted, latency_ms);
        }
    }

    /// The connection is gone. The client reports `Disconnected`; resources
    /// are released on the next `start`, `stop` or destroy.
    pub fn disconnected(&self, reason: &str) {
        if let Some(inner) = self.current() {
            inner.connection_lost(reason);
        }
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        if let Some(inner) = self.current() {
            inner.log(level, message);
        }
    }

    pub(crate) fn engine_listener(&self) -> EngineListener {
        let events = self.clone();
        Arc::new(move |event: EngineEvent| {
            if let Some(inner) = events.current() {
                inner.engine_event(event);
            }
        })
    }
}

/// Connector whose connections play whatever the host writes into the
/// returned [`PcmProducer`]. No network I/O.
pub struct PushConnector {
    source: Arc<RingPcmSource>,
}

impl PushConnector {
    pub fn new(format: SampleFormat, capacity_ms: u64) -> (Self, PcmProducer) {
        let (source, producer) = RingPcmSource::new(format, capacity_ms);
        (Self { source }, producer)
    }
}

impl Connector for PushConnector {
    fn connect(
        &self,
        request: &ConnectRequest,
        _events: ClientEvents,
    ) -> Result<Box<dyn Connection>, ClientError> {
        log::info!(
            "Local feed for {}:{} as {} #{}",
            request.host,
            request.port,
            request.identity.name,
            request.identity.instance
        );
        Ok(Box::new(PushConnection {
            source: self.source.clone(),
        }))
    }
}

struct PushConnection {
    source: Arc<RingPcmSource>,
}

impl Connection for PushConnection {
    fn source(&self) -> Arc<dyn PcmSource> {
        self.source.clone()
    }

    fn stop(&mut self) {
        self.source.discard();
    }
}
