//! Output-device abstraction.
//!
//! Devices are modelled as buffer queues: the session hands the device a
//! fixed pool of buffers, the device plays them in order and, on its own
//! real-time thread, gives each drained buffer back to the render callback,
//! which refills it and re-submits it through the [`QueueHandle`]. A buffer
//! that is not re-submitted leaves the pool and the device drains.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;

use super::format::SampleFormat;
use crate::error::DeviceError;

/// Smallest buffer pool a session may use.
pub const MIN_BUFFERS: usize = 4;

/// Render entry point the device calls with each drained buffer.
pub type RenderFn = Arc<dyn Fn(&QueueHandle, OutputBuffer) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmDevice {
    pub idx: usize,
    pub name: String,
}

/// Buffer sizing for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct BufferLayout {
    pub frames_per_buffer: usize,
    /// Duration of one buffer, recomputed from the whole-frame count.
    pub buffer_ms: u64,
    pub num_buffers: usize,
    pub buffer_bytes: usize,
    pub channels: usize,
}

impl BufferLayout {
    pub fn new(format: &SampleFormat, target_ms: u64, num_buffers: usize) -> Self {
        let frames_per_buffer = format.ms_to_frames(target_ms).max(1) as usize;
        Self {
            frames_per_buffer,
            buffer_ms: format.frames_to_ms(frames_per_buffer as u64),
            num_buffers: num_buffers.max(MIN_BUFFERS),
            buffer_bytes: frames_per_buffer * format.frame_size(),
            channels: format.channels as usize,
        }
    }

    pub fn samples_per_buffer(&self) -> usize {
        self.frames_per_buffer * self.channels
    }
}

/// One device buffer of interleaved samples.
#[derive(Debug)]
pub struct OutputBuffer {
    id: usize,
    samples: Vec<f32>,
}

impl OutputBuffer {
    pub fn new(id: usize, samples: usize) -> Self {
        Self {
            id,
            samples: vec![0.0; samples],
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn silence(&mut self) {
        self.samples.fill(0.0);
    }
}

/// Played-sample position reported by the device.
#[derive(Clone, Default)]
pub struct Timeline {
    frames: Arc<AtomicU64>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn sample_time(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

/// What the render callback may touch of a live queue: buffer re-submission
/// and the optional timeline. Both are lock-free.
#[derive(Clone)]
pub struct QueueHandle {
    pending: Sender<OutputBuffer>,
    timeline: Option<Timeline>,
}

impl QueueHandle {
    /// `pending` must have room for the whole buffer pool so re-submission
    /// never blocks.
    pub fn new(pending: Sender<OutputBuffer>, timeline: Option<Timeline>) -> Self {
        Self { pending, timeline }
    }

    /// Returns `false` if the queue is gone.
    pub fn enqueue(&self, buffer: OutputBuffer) -> bool {
        self.pending.try_send(buffer).is_ok()
    }

    pub fn sample_time(&self) -> Option<u64> {
        self.timeline.as_ref().map(Timeline::sample_time)
    }

    pub fn has_timeline(&self) -> bool {
        self.timeline.is_some()
    }
}

/// An opened device instance. Owned by the render worker and only driven
/// from its thread.
pub trait OutputQueue {
    fn start(&mut self) -> Result<(), DeviceError>;

    fn pause(&mut self) -> Result<(), DeviceError>;

    /// Stop synchronously. When this returns the device no longer invokes
    /// the render callback.
    fn stop(&mut self);
}

pub struct OpenQueue {
    pub queue: Box<dyn OutputQueue>,
    pub handle: QueueHandle,
}

pub trait OutputBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// The device set is fixed: one system output.
    fn devices(&self) -> Vec<PcmDevice>;

    fn open(
        &self,
        format: &SampleFormat,
        layout: &BufferLayout,
        render: RenderFn,
    ) -> Result<OpenQueue, DeviceError>;
}
