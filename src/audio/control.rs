use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Hard limiter ceiling, applied only when a gain other than unity is active.
const HARD_LIMIT_CEILING: f32 = 0.99;

pub const MAX_VOLUME: u8 = 100;

/// Pause flag and local mix settings shared between the control surface and
/// the render callback.
///
/// Single writer (the control surface), many readers (render callback,
/// worker). All accesses are plain atomics so the callback never waits.
#[derive(Clone)]
pub struct PlaybackControl {
    inner: Arc<ControlInner>,
}

struct ControlInner {
    paused: AtomicBool,
    volume: AtomicU8,
    muted: AtomicBool,
}

impl PlaybackControl {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ControlInner {
                paused: AtomicBool::new(false),
                volume: AtomicU8::new(MAX_VOLUME),
                muted: AtomicBool::new(false),
            }),
        }
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Relaxed)
    }

    /// Returns the previous value.
    pub fn set_paused(&self, paused: bool) -> bool {
        self.inner.paused.swap(paused, Ordering::SeqCst)
    }

    pub fn volume(&self) -> u8 {
        self.inner.volume.load(Ordering::Relaxed)
    }

    /// Clamps to `0..=100` and returns the stored value.
    pub fn set_volume(&self, percent: i32) -> u8 {
        let volume = clamp_volume(percent);
        self.inner.volume.store(volume, Ordering::Relaxed);
        volume
    }

    pub fn is_muted(&self) -> bool {
        self.inner.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.inner.muted.store(muted, Ordering::Relaxed);
    }

    /// Linear gain for the current volume/mute settings.
    #[inline]
    pub fn gain(&self) -> f32 {
        if self.is_muted() {
            0.0
        } else {
            self.volume() as f32 / MAX_VOLUME as f32
        }
    }

    /// Scale interleaved samples in place. Unity gain leaves the data
    /// untouched.
    #[inline]
    pub fn apply_gain(&self, samples: &mut [f32]) {
        let gain = self.gain();
        if (gain - 1.0).abs() < f32::EPSILON {
            return;
        }
        for s in samples.iter_mut() {
            *s = hard_limit(*s * gain);
        }
    }
}

impl Default for PlaybackControl {
    fn default() -> Self {
        Self::new()
    }
}

pub fn clamp_volume(percent: i32) -> u8 {
    percent.clamp(0, MAX_VOLUME as i32) as u8
}

/// Catches NaN, Inf and any sample beyond the ceiling.
#[inline(always)]
fn hard_limit(s: f32) -> f32 {
    if s.is_finite() {
        s.clamp(-HARD_LIMIT_CEILING, HARD_LIMIT_CEILING)
    } else {
        0.0
    }
}
