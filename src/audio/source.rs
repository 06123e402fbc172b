use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::format::SampleFormat;
use super::ring_buffer::RingBuffer;

/// Pull side of the decoded-audio stream.
///
/// `chunk_or_silence` runs on the real-time thread and must not block beyond
/// what it needs to copy samples. `wait_for_chunk` and `discard` are only
/// called from the render worker.
pub trait PcmSource: Send + Sync {
    fn format(&self) -> SampleFormat;

    /// Block until data is available or `timeout` elapses.
    fn wait_for_chunk(&self, timeout: Duration) -> bool;

    /// Fill `out` with `frames` interleaved frames meant to be heard `delay`
    /// from now. Returns `false` and writes silence when no data is ready.
    fn chunk_or_silence(&self, out: &mut [f32], delay: Duration, frames: usize) -> bool;

    /// Drop everything buffered.
    fn discard(&self);
}

/// Built-in [`PcmSource`] backed by the lock-free [`RingBuffer`], fed through
/// a single [`PcmProducer`].
pub struct RingPcmSource {
    format: SampleFormat,
    ring: RingBuffer,
    ready_lock: Mutex<()>,
    ready: Condvar,
    last_delay_us: AtomicU64,
}

/// Write side of a [`RingPcmSource`]. There is exactly one per source.
pub struct PcmProducer {
    source: Arc<RingPcmSource>,
}

impl RingPcmSource {
    /// Create a source holding up to `capacity_ms` of audio.
    pub fn new(format: SampleFormat, capacity_ms: u64) -> (Arc<Self>, PcmProducer) {
        let source = Arc::new(Self {
            format,
            ring: RingBuffer::with_min_capacity(requested_samples(&format, capacity_ms)),
            ready_lock: Mutex::new(()),
            ready: Condvar::new(),
            last_delay_us: AtomicU64::new(0),
        });
        let producer = PcmProducer {
            source: source.clone(),
        };
        (source, producer)
    }

    /// Samples a source created with `capacity_ms` holds at most.
    pub fn capacity_samples(format: &SampleFormat, capacity_ms: u64) -> usize {
        RingBuffer::usable_for(requested_samples(format, capacity_ms))
    }

    /// Buffered audio in whole frames.
    pub fn buffered_frames(&self) -> usize {
        self.ring.available_read() / self.format.channels as usize
    }

    /// Playout delay requested by the most recent pull.
    pub fn last_delay(&self) -> Duration {
        Duration::from_micros(self.last_delay_us.load(Ordering::Relaxed))
    }
}

fn requested_samples(format: &SampleFormat, capacity_ms: u64) -> usize {
    format.ms_to_frames(capacity_ms.max(1)) as usize * format.channels as usize
}

impl PcmSource for RingPcmSource {
    fn format(&self) -> SampleFormat {
        self.format
    }

    fn wait_for_chunk(&self, timeout: Duration) -> bool {
        if self.ring.available_read() > 0 {
            return true;
        }
        let mut lock = self.ready_lock.lock();
        if self.ring.available_read() > 0 {
            return true;
        }
        self.ready.wait_for(&mut lock, timeout);
        self.ring.available_read() > 0
    }

    fn chunk_or_silence(&self, out: &mut [f32], delay: Duration, frames: usize) -> bool {
        self.last_delay_us
            .store(delay.as_micros() as u64, Ordering::Relaxed);
        let wanted = (frames * self.format.channels as usize).min(out.len());
        if self.ring.available_read() < wanted {
            out.fill(0.0);
            return false;
        }
        let read = self.ring.read(&mut out[..wanted]);
        out[read..].fill(0.0);
        true
    }

    fn discard(&self) {
        let dropped = self.ring.discard();
        if dropped > 0 {
            log::debug!("Discarded {} buffered samples", dropped);
        }
    }
}

impl PcmProducer {
    pub fn format(&self) -> SampleFormat {
        self.source.format
    }

    /// Append interleaved samples. Returns how many were accepted.
    pub fn push(&mut self, samples: &[f32]) -> usize {
        let written = self.source.ring.write(samples);
        if written > 0 {
            let _lock = self.source.ready_lock.lock();
            self.source.ready.notify_all();
        }
        written
    }

    /// Append interleaved signed 16-bit samples.
    pub fn push_s16(&mut self, samples: &[i16]) -> usize {
        let mut scratch = [0.0f32; 512];
        let mut total = 0;
        for chunk in samples.chunks(scratch.len()) {
            for (dst, src) in scratch.iter_mut().zip(chunk) {
                *dst = *src as f32 / 32768.0;
            }
            let written = self.push(&scratch[..chunk.len()]);
            total += written;
            if written < chunk.len() {
                break;
            }
        }
        total
    }

    /// Free space in samples.
    pub fn available(&self) -> usize {
        self.source.ring.available_write()
    }
}
