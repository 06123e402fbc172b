use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::{BufferLayout, RingPcmSource, SampleFormat, MIN_BUFFERS};
use crate::error::ConfigError;

pub const DEFAULT_NAME: &str = "Snapforge";

/// Render worker tuning. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerSettings {
    /// Target duration of one device buffer.
    pub buffer_ms: u64,
    pub num_buffers: usize,
    /// Fixed output latency added to every playout-delay estimate.
    pub dac_delay_ms: u64,
    /// Starvation longer than this tears the session down.
    pub stall_timeout_ms: u64,
    pub idle_wait_ms: u64,
    pub init_backoff_ms: u64,
    /// Upper bound on waiting for in-flight render callbacks at teardown.
    pub drain_timeout_ms: u64,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            buffer_ms: 100,
            num_buffers: MIN_BUFFERS,
            dac_delay_ms: 15,
            stall_timeout_ms: 5000,
            idle_wait_ms: 100,
            init_backoff_ms: 100,
            drain_timeout_ms: 500,
        }
    }
}

impl PlayerSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_ms == 0 {
            return Err(ConfigError::Invalid("buffer_ms must be > 0".into()));
        }
        if self.num_buffers < MIN_BUFFERS {
            return Err(ConfigError::Invalid(format!(
                "num_buffers must be >= {}, got {}",
                MIN_BUFFERS, self.num_buffers
            )));
        }
        if self.stall_timeout_ms == 0 {
            return Err(ConfigError::Invalid("stall_timeout_ms must be > 0".into()));
        }
        Ok(())
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    pub fn init_backoff(&self) -> Duration {
        Duration::from_millis(self.init_backoff_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub player: PlayerSettings,
    /// Format of PCM written through the host feed.
    pub feed_format: SampleFormat,
    /// How much host-fed audio may be buffered ahead of playback.
    pub feed_capacity_ms: u64,
    pub destroy_timeout_ms: u64,
    pub name: String,
    pub instance: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            player: PlayerSettings::default(),
            feed_format: SampleFormat::default(),
            feed_capacity_ms: 2000,
            destroy_timeout_ms: 1000,
            name: DEFAULT_NAME.to_string(),
            instance: 1,
        }
    }
}

impl ClientConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.player.validate()?;
        self.feed_format
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.feed_capacity_ms == 0 {
            return Err(ConfigError::Invalid("feed_capacity_ms must be > 0".into()));
        }
        // The render callback only takes whole buffers from the feed.
        let layout = BufferLayout::new(
            &self.feed_format,
            self.player.buffer_ms,
            self.player.num_buffers,
        );
        let capacity = RingPcmSource::capacity_samples(&self.feed_format, self.feed_capacity_ms);
        if capacity < layout.samples_per_buffer() {
            return Err(ConfigError::Invalid(format!(
                "feed_capacity_ms {} holds {} samples, one {} ms buffer needs {}",
                self.feed_capacity_ms,
                capacity,
                layout.buffer_ms,
                layout.samples_per_buffer()
            )));
        }
        Ok(())
    }

    pub fn destroy_timeout(&self) -> Duration {
        Duration::from_millis(self.destroy_timeout_ms)
    }
}
