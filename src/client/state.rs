use serde::Serialize;

/// Connection lifecycle as reported to the host. Values are part of the C ABI.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    #[default]
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Playing = 3,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Playing)
    }
}

/// How this client presents itself to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub name: String,
    pub instance: u32,
}

/// Mix settings, either set locally or pushed by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Settings {
    pub volume: u8,
    pub muted: bool,
    pub latency_ms: i32,
}
