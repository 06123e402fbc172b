use std::fmt;
use std::str::FromStr;

use crate::error::DeviceError;

/// PCM layout of the stream: sample rate, bits per sample and channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SampleFormat {
    pub rate: u32,
    pub bits: u8,
    pub channels: u8,
}

impl SampleFormat {
    pub fn new(rate: u32, bits: u8, channels: u8) -> Result<Self, DeviceError> {
        let format = Self {
            rate,
            bits,
            channels,
        };
        format.validate()?;
        Ok(format)
    }

    pub fn validate(&self) -> Result<(), DeviceError> {
        if self.rate == 0 || self.channels == 0 {
            return Err(DeviceError::UnsupportedFormat(self.to_string()));
        }
        match self.bits {
            8 | 16 | 24 | 32 => Ok(()),
            _ => Err(DeviceError::UnsupportedFormat(self.to_string())),
        }
    }

    /// Bytes per sample. 24-bit samples are carried in 4 bytes.
    pub fn sample_size(&self) -> usize {
        if self.bits == 24 {
            4
        } else {
            self.bits as usize / 8
        }
    }

    pub fn frame_size(&self) -> usize {
        self.channels as usize * self.sample_size()
    }

    pub fn ms_to_frames(&self, ms: u64) -> u64 {
        self.rate as u64 * ms / 1000
    }

    pub fn frames_to_ms(&self, frames: u64) -> u64 {
        if self.rate == 0 {
            return 0;
        }
        frames * 1000 / self.rate as u64
    }
}

impl Default for SampleFormat {
    fn default() -> Self {
        Self {
            rate: 48_000,
            bits: 16,
            channels: 2,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.rate, self.bits, self.channels)
    }
}

/// Parses the `rate:bits:channels` form, e.g. `48000:16:2`.
impl FromStr for SampleFormat {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DeviceError::UnsupportedFormat(s.to_string());
        let mut parts = s.trim().split(':');
        let rate = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let bits = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        let channels = parts.next().and_then(|p| p.parse().ok()).ok_or_else(invalid)?;
        if parts.next().is_some() {
            return Err(invalid());
        }
        Self::new(rate, bits, channels)
    }
}
