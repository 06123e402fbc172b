use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::player::Player;
use crate::error::DeviceError;

/// Owns the thread running [`Player::worker`].
pub struct RenderWorker {
    player: Arc<dyn Player>,
    thread: Option<JoinHandle<()>>,
}

impl RenderWorker {
    pub fn start(player: Arc<dyn Player>) -> Result<Self, DeviceError> {
        let thread = if player.needs_thread() {
            let runner = player.clone();
            let handle = thread::Builder::new()
                .name("render-worker".into())
                .spawn(move || runner.worker())
                .map_err(|e| DeviceError::Spawn(e.to_string()))?;
            Some(handle)
        } else {
            None
        };
        Ok(Self { player, thread })
    }

    pub fn player(&self) -> &Arc<dyn Player> {
        &self.player
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Ask the player to shut down and wait for its thread. Idempotent.
    pub fn stop(&mut self) {
        self.player.request_shutdown();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Render worker panicked");
            }
        }
    }
}

impl Drop for RenderWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
