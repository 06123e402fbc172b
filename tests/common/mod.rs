#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError};
use parking_lot::Mutex;

use snapforge_core::audio::{
    BufferLayout, OpenQueue, OutputBackend, OutputQueue, PcmDevice, PcmProducer, PcmSource,
    QueueHandle, RenderFn, RingPcmSource, SampleFormat,
};
use snapforge_core::client::{ClientEvents, ConnectRequest, Connection, Connector};
use snapforge_core::{ClientConfig, ClientError, DeviceError, PlayerSettings};

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

pub fn fast_settings() -> PlayerSettings {
    PlayerSettings {
        buffer_ms: 20,
        idle_wait_ms: 20,
        init_backoff_ms: 20,
        ..PlayerSettings::default()
    }
}

pub fn fast_config() -> ClientConfig {
    ClientConfig {
        player: fast_settings(),
        ..ClientConfig::default()
    }
}

/// Half a second of a quiet tone.
pub fn feed(producer: &mut PcmProducer) {
    let format = producer.format();
    let samples = format.ms_to_frames(500) as usize * format.channels as usize;
    producer.push(&vec![0.1; samples]);
}

/// Connector that hands out one shared ring source and keeps the latest
/// [`ClientEvents`] so tests can play the network side.
pub struct Loopback {
    source: Arc<RingPcmSource>,
    events: Mutex<Option<ClientEvents>>,
    pub connects: AtomicUsize,
    pub stops: Arc<AtomicUsize>,
    pub fail: AtomicBool,
    pub last_request: Mutex<Option<ConnectRequest>>,
}

impl Loopback {
    pub fn new() -> (Arc<Self>, PcmProducer) {
        let (source, producer) = RingPcmSource::new(SampleFormat::default(), 2000);
        let loopback = Arc::new(Self {
            source,
            events: Mutex::new(None),
            connects: AtomicUsize::new(0),
            stops: Arc::new(AtomicUsize::new(0)),
            fail: AtomicBool::new(false),
            last_request: Mutex::new(None),
        });
        (loopback, producer)
    }

    pub fn events(&self) -> ClientEvents {
        self.events
            .lock()
            .clone()
            .expect("connect was never called")
    }
}

impl Connector for Loopback {
    fn connect(
        &self,
        request: &ConnectRequest,
        events: ClientEvents,
    ) -> Result<Box<dyn Connection>, ClientError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ClientError::Connect("refused".into()));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.events.lock() = Some(events);
        *self.last_request.lock() = Some(request.clone());
        Ok(Box::new(LoopbackConnection {
            source: self.source.clone(),
            stops: self.stops.clone(),
        }))
    }
}

struct LoopbackConnection {
    source: Arc<RingPcmSource>,
    stops: Arc<AtomicUsize>,
}

impl Connection for LoopbackConnection {
    fn source(&self) -> Arc<dyn PcmSource> {
        self.source.clone()
    }

    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Backend without any output device.
pub struct NoDeviceBackend;

impl OutputBackend for NoDeviceBackend {
    fn name(&self) -> &'static str {
        "none"
    }

    fn devices(&self) -> Vec<PcmDevice> {
        Vec::new()
    }

    fn open(
        &self,
        _format: &SampleFormat,
        _layout: &BufferLayout,
        _render: RenderFn,
    ) -> Result<OpenQueue, DeviceError> {
        Err(DeviceError::NoDevice)
    }
}

/// Source that always has data, except that a pull blocks while `hold` is
/// set. Lets a test keep a render callback in flight.
pub struct HoldingSource {
    pub hold: AtomicBool,
    pub held: AtomicBool,
}

impl HoldingSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            hold: AtomicBool::new(false),
            held: AtomicBool::new(false),
        })
    }
}

impl PcmSource for HoldingSource {
    fn format(&self) -> SampleFormat {
        SampleFormat::default()
    }

    fn wait_for_chunk(&self, _timeout: Duration) -> bool {
        true
    }

    fn chunk_or_silence(&self, out: &mut [f32], _delay: Duration, _frames: usize) -> bool {
        while self.hold.load(Ordering::SeqCst) {
            self.held.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(1));
        }
        out.fill(0.1);
        true
    }

    fn discard(&self) {}
}

/// Backend whose `stop` only signals its device thread and returns at once,
/// so a callback may still be running when the session is released.
#[derive(Default)]
pub struct DetachedBackend {
    pub opened: AtomicUsize,
    pub closed: Arc<AtomicUsize>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl DetachedBackend {
    /// Wait for every device thread to leave.
    pub fn join(&self) {
        for thread in self.threads.lock().drain(..) {
            thread.join().unwrap();
        }
    }
}

struct DetachedFlags {
    alive: AtomicBool,
    playing: AtomicBool,
}

impl OutputBackend for DetachedBackend {
    fn name(&self) -> &'static str {
        "detached"
    }

    fn devices(&self) -> Vec<PcmDevice> {
        Vec::new()
    }

    fn open(
        &self,
        _format: &SampleFormat,
        layout: &BufferLayout,
        render: RenderFn,
    ) -> Result<OpenQueue, DeviceError> {
        let (tx, rx) = bounded(layout.num_buffers);
        let handle = QueueHandle::new(tx, None);
        let flags = Arc::new(DetachedFlags {
            alive: AtomicBool::new(true),
            playing: AtomicBool::new(false),
        });
        let thread = {
            let flags = flags.clone();
            let handle = handle.clone();
            thread::spawn(move || {
                while flags.alive.load(Ordering::SeqCst) {
                    if !flags.playing.load(Ordering::SeqCst) {
                        thread::sleep(Duration::from_millis(1));
                        continue;
                    }
                    match rx.recv_timeout(Duration::from_millis(5)) {
                        Ok(buffer) => {
                            thread::sleep(Duration::from_millis(2));
                            render(&handle, buffer);
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
        };
        self.threads.lock().push(thread);
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(OpenQueue {
            queue: Box::new(DetachedQueue {
                flags,
                closed: self.closed.clone(),
            }),
            handle,
        })
    }
}

struct DetachedQueue {
    flags: Arc<DetachedFlags>,
    closed: Arc<AtomicUsize>,
}

impl OutputQueue for DetachedQueue {
    fn start(&mut self) -> Result<(), DeviceError> {
        self.flags.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&mut self) -> Result<(), DeviceError> {
        self.flags.playing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.flags.playing.store(false, Ordering::SeqCst);
        self.flags.alive.store(false, Ordering::SeqCst);
    }
}

impl Drop for DetachedQueue {
    fn drop(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
