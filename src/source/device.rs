//! CPAL capture of the microphone array.
//!
//! CPAL streams are not `Send`, but the registry that owns the hardware is
//! shared by every node. The stream therefore lives on a dedicated thread and
//! [`CaptureStream`] talks to it over a command channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, Device, SampleFormat, SampleRate, SizedSample, Stream,
    StreamConfig as CpalStreamConfig,
};
use ringbuf::traits::{Observer, Producer, Split};
use ringbuf::HeapRb;

use crate::channel::CHANNEL_COUNT;
use crate::format::{extend_converted, i16_to_f32, u16_to_f32};
use crate::source::{CaptureBackend, CaptureHandle, OpenedCapture};
use crate::{CaptureConfig, MicArrayError};

type Reply = mpsc::Sender<Result<(), MicArrayError>>;

enum StreamCommand {
    Play(Reply),
    Pause(Reply),
}

/// Opens the array through the default CPAL host.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

impl CpalBackend {
    /// Creates the backend.
    pub fn new() -> Self {
        Self
    }
}

impl CaptureBackend for CpalBackend {
    fn open(&self, config: &CaptureConfig) -> Result<OpenedCapture, MicArrayError> {
        let ring_buffer = HeapRb::<f32>::new(config.buffer_samples());
        let (producer, consumer) = ring_buffer.split();
        let overruns = Arc::new(AtomicU64::new(0));

        let stream = CaptureStream::spawn(config.clone(), producer, Arc::clone(&overruns))?;
        let device_name = stream.device_name().to_string();

        Ok(OpenedCapture {
            handle: Box::new(stream),
            frames: consumer,
            overruns,
            device_name,
        })
    }
}

/// A running hardware stream owned by its capture thread.
///
/// Capture continues while this struct is held. Dropping it closes the
/// device and joins the thread.
pub struct CaptureStream {
    commands: Option<mpsc::Sender<StreamCommand>>,
    thread: Option<JoinHandle<()>>,
    device_name: String,
}

impl CaptureStream {
    fn spawn(
        config: CaptureConfig,
        producer: ringbuf::HeapProd<f32>,
        overruns: Arc<AtomicU64>,
    ) -> Result<Self, MicArrayError> {
        let (ready_tx, ready_rx) = mpsc::channel();
        let (command_tx, command_rx) = mpsc::channel::<StreamCommand>();

        let thread = thread::Builder::new()
            .name("mic-array-capture".to_string())
            .spawn(move || {
                let stream = match open_stream(&config, producer, overruns) {
                    Ok((stream, name)) => {
                        let _ = ready_tx.send(Ok(name));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Runs until the owning CaptureStream drops its sender
                while let Ok(command) = command_rx.recv() {
                    match command {
                        StreamCommand::Play(reply) => {
                            let _ = reply.send(
                                stream
                                    .play()
                                    .map_err(|e| MicArrayError::BackendError(e.to_string())),
                            );
                        }
                        StreamCommand::Pause(reply) => {
                            let _ = reply.send(
                                stream
                                    .pause()
                                    .map_err(|e| MicArrayError::BackendError(e.to_string())),
                            );
                        }
                    }
                }

                drop(stream);
                tracing::debug!("capture thread exiting");
            })
            .map_err(|e| MicArrayError::BackendError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(device_name)) => Ok(Self {
                commands: Some(command_tx),
                thread: Some(thread),
                device_name,
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(MicArrayError::BackendError(
                    "capture thread exited during startup".to_string(),
                ))
            }
        }
    }

    /// Name of the opened device.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    fn request(&self, command: fn(Reply) -> StreamCommand) -> Result<(), MicArrayError> {
        let closed = || MicArrayError::BackendError("capture thread has stopped".to_string());
        let commands = self.commands.as_ref().ok_or_else(closed)?;
        let (reply_tx, reply_rx) = mpsc::channel();
        commands.send(command(reply_tx)).map_err(|_| closed())?;
        reply_rx.recv().map_err(|_| closed())?
    }
}

impl CaptureHandle for CaptureStream {
    fn play(&mut self) -> Result<(), MicArrayError> {
        self.request(StreamCommand::Play)
    }

    fn pause(&mut self) -> Result<(), MicArrayError> {
        self.request(StreamCommand::Pause)
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        // Closing the command channel ends the capture thread's loop
        self.commands.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!(device = %self.device_name, "capture thread panicked");
            }
        }
    }
}

/// Finds the array, builds the input stream and starts it.
fn open_stream(
    config: &CaptureConfig,
    producer: ringbuf::HeapProd<f32>,
    overruns: Arc<AtomicU64>,
) -> Result<(Stream, String), MicArrayError> {
    let (device, name) = find_device(&config.device_name)?;

    let rate = config.sample_rate;
    let supported = device
        .supported_input_configs()
        .map_err(|e| MicArrayError::DeviceUnavailable {
            name: name.clone(),
            reason: e.to_string(),
        })?
        .find(|c| {
            c.channels() == config.channels
                && c.min_sample_rate().0 <= rate
                && c.max_sample_rate().0 >= rate
        })
        .ok_or(MicArrayError::UnsupportedConfig {
            requested_rate: rate,
            channels: config.channels,
        })?;

    let stream_config = CpalStreamConfig {
        channels: config.channels,
        sample_rate: SampleRate(rate),
        buffer_size: BufferSize::Fixed(config.block_size),
    };
    let scratch_len = config.block_size as usize * config.channels as usize;

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_stream::<f32>(
            &device,
            &stream_config,
            producer,
            overruns,
            scratch_len,
            |s| s,
        ),
        SampleFormat::I16 => build_stream::<i16>(
            &device,
            &stream_config,
            producer,
            overruns,
            scratch_len,
            i16_to_f32,
        ),
        SampleFormat::U16 => build_stream::<u16>(
            &device,
            &stream_config,
            producer,
            overruns,
            scratch_len,
            u16_to_f32,
        ),
        format => {
            return Err(MicArrayError::UnsupportedFormat {
                format: format!("{format:?}"),
            });
        }
    }
    .map_err(|e| MicArrayError::DeviceUnavailable {
        name: name.clone(),
        reason: e.to_string(),
    })?;

    stream.play().map_err(|e| MicArrayError::DeviceUnavailable {
        name: name.clone(),
        reason: e.to_string(),
    })?;

    tracing::info!(
        device = %name,
        sample_rate = rate,
        block_size = config.block_size,
        "capture stream started"
    );
    Ok((stream, name))
}

/// First input device whose name contains `pattern` and that exposes at
/// least six input channels.
fn find_device(pattern: &str) -> Result<(Device, String), MicArrayError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| MicArrayError::BackendError(e.to_string()))?;

    for device in devices {
        let Ok(name) = device.name() else { continue };
        if !name.contains(pattern) {
            continue;
        }
        let max_channels = device
            .supported_input_configs()
            .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
            .unwrap_or(0);
        if max_channels as usize >= CHANNEL_COUNT {
            return Ok((device, name));
        }
    }

    Err(MicArrayError::DeviceNotFound {
        pattern: pattern.to_string(),
    })
}

fn build_stream<T>(
    device: &Device,
    config: &CpalStreamConfig,
    mut producer: ringbuf::HeapProd<f32>,
    overruns: Arc<AtomicU64>,
    scratch_len: usize,
    convert: fn(T) -> f32,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample + Send + 'static,
{
    let channels = config.channels as usize;
    let mut scratch: Vec<f32> = Vec::with_capacity(scratch_len);

    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            extend_converted(&mut scratch, data, convert);

            // Only whole frames go in, so the ring stays frame-aligned
            let fit = (producer.vacant_len() / channels * channels).min(scratch.len());
            let written = producer.push_slice(&scratch[..fit]);
            let dropped = scratch.len() - written;
            if dropped > 0 {
                overruns.fetch_add(dropped as u64, Ordering::Relaxed);
            }
        },
        |err| {
            tracing::warn!("Audio stream error: {}", err);
        },
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CpalBackend>();
    }

    #[test]
    fn test_capture_stream_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<CaptureStream>();
    }

    // Note: Device tests require actual audio hardware and are skipped in CI
    #[test]
    #[ignore = "requires audio hardware"]
    fn test_open_mic_array() {
        let config = crate::MicArrayConfig::default().capture_config();
        let opened = CpalBackend::new().open(&config).unwrap();
        println!("Opened: {}", opened.device_name);
    }
}
