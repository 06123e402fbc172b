use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use crossbeam_channel::bounded;

use super::device::{
    BufferLayout, OpenQueue, OutputBackend, OutputBuffer, OutputQueue, PcmDevice, QueueHandle,
    RenderFn, Timeline,
};
use super::format::SampleFormat;
use crate::error::DeviceError;

/// System default output through cpal.
///
/// cpal pulls arbitrarily sized slices; the stream callback copies them out
/// of the head of the buffer queue and hands every fully played buffer back
/// to the render callback, so playback timing follows the hardware clock.
#[derive(Default)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl OutputBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn devices(&self) -> Vec<PcmDevice> {
        let name = cpal::default_host()
            .default_output_device()
            .and_then(|d| d.name().ok())
            .unwrap_or_else(|| "Default Output".to_string());
        vec![PcmDevice { idx: 0, name }]
    }

    fn open(
        &self,
        format: &SampleFormat,
        layout: &BufferLayout,
        render: RenderFn,
    ) -> Result<OpenQueue, DeviceError> {
        format.validate()?;
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(DeviceError::NoDevice)?;

        let config = StreamConfig {
            channels: format.channels as u16,
            sample_rate: SampleRate(format.rate),
            buffer_size: BufferSize::Default,
        };

        let (tx, rx) = bounded::<OutputBuffer>(layout.num_buffers);
        let timeline = Timeline::new();
        let handle = QueueHandle::new(tx, Some(timeline.clone()));

        let stream = device
            .build_output_stream(
                &config,
                {
                    let handle = handle.clone();
                    let frames = layout.frames_per_buffer as u64;
                    let mut current: Option<OutputBuffer> = None;
                    let mut pos = 0usize;

                    // ── REAL-TIME CALLBACK ── no locks, no allocation.
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut written = 0;
                        while written < data.len() {
                            if current.is_none() {
                                match rx.try_recv() {
                                    Ok(next) => {
                                        current = Some(next);
                                        pos = 0;
                                    }
                                    Err(_) => break,
                                }
                            }
                            let Some(buffer) = current.as_ref() else {
                                break;
                            };
                            let n = (buffer.len() - pos).min(data.len() - written);
                            data[written..written + n]
                                .copy_from_slice(&buffer.samples()[pos..pos + n]);
                            written += n;
                            pos += n;

                            if pos >= buffer.len() {
                                timeline.advance(frames);
                                if let Some(played) = current.take() {
                                    render(&handle, played);
                                }
                            }
                        }
                        // Underrun: the queue drained.
                        data[written..].fill(0.0);
                    }
                },
                move |err| {
                    log::error!("Stream error: {}", err);
                },
                None,
            )
            .map_err(|e| DeviceError::BuildStream(e.to_string()))?;

        // Some hosts start streams on creation.
        stream
            .pause()
            .map_err(|e| DeviceError::Pause(e.to_string()))?;

        log::info!(
            "Opened {} at {}",
            device.name().unwrap_or_else(|_| "output".into()),
            format
        );

        Ok(OpenQueue {
            queue: Box::new(CpalQueue {
                stream: Some(stream),
            }),
            handle,
        })
    }
}

struct CpalQueue {
    stream: Option<cpal::Stream>,
}

impl OutputQueue for CpalQueue {
    fn start(&mut self) -> Result<(), DeviceError> {
        match &self.stream {
            Some(stream) => stream.play().map_err(|e| DeviceError::Start(e.to_string())),
            None => Err(DeviceError::Start("stream closed".into())),
        }
    }

    fn pause(&mut self) -> Result<(), DeviceError> {
        match &self.stream {
            Some(stream) => stream.pause().map_err(|e| DeviceError::Pause(e.to_string())),
            None => Ok(()),
        }
    }

    /// Dropping the stream joins cpal's callback thread.
    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                log::warn!("Stream pause on stop failed: {}", e);
            }
            drop(stream);
        }
    }
}

impl Drop for CpalQueue {
    fn drop(&mut self) {
        self.stop();
    }
}
