pub mod control;
#[cfg(feature = "native")]
pub mod cpal_backend;
pub mod device;
pub mod engine;
pub mod event_loop;
pub mod format;
pub mod guard;
pub mod null_backend;
pub mod player;
pub mod ring_buffer;
pub mod session;
pub mod source;
pub mod worker;

pub use control::{clamp_volume, PlaybackControl, MAX_VOLUME};
#[cfg(feature = "native")]
pub use cpal_backend::CpalBackend;
pub use device::{
    BufferLayout, OpenQueue, OutputBackend, OutputBuffer, OutputQueue, PcmDevice, QueueHandle,
    RenderFn, Timeline, MIN_BUFFERS,
};
pub use engine::{EngineEvent, EngineListener, RenderEngine};
pub use event_loop::{EventLoop, EventLoopHandle, LoopEvent};
pub use format::SampleFormat;
pub use guard::{CallbackGuard, CallbackTicket};
pub use null_backend::NullBackend;
pub use player::Player;
pub use session::{estimate_playout_delay, RenderOutcome, RenderSession, RenderShared, RenderStats};
pub use source::{PcmProducer, PcmSource, RingPcmSource};
pub use worker::RenderWorker;
