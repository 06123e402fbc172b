use super::device::PcmDevice;

/// A playback engine the [`RenderWorker`](super::worker::RenderWorker) can
/// drive.
///
/// `worker` runs until `request_shutdown` is called (or the engine gives up
/// on its own); the control methods may be called from any thread while it
/// runs.
pub trait Player: Send + Sync {
    fn worker(&self);

    /// Whether `worker` needs a dedicated thread. Engines driven entirely by
    /// device callbacks return `false`.
    fn needs_thread(&self) -> bool {
        true
    }

    fn pcm_list(&self) -> Vec<PcmDevice>;

    fn request_shutdown(&self);

    fn pause(&self);

    fn resume(&self);

    fn is_paused(&self) -> bool;
}
