//! Mock capture for testing without hardware.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use ringbuf::traits::{Observer, Producer, Split};
use ringbuf::HeapRb;

use crate::channel::CHANNEL_COUNT;
use crate::source::{CaptureBackend, CaptureHandle, OpenedCapture};
use crate::{CaptureConfig, MicArrayError};

/// Generates synthetic 6-channel frames.
///
/// Each channel gets a distinct, recognizable signal so tests can tell which
/// channel a node emitted.
///
/// # Example
///
/// ```
/// use mic_array_stream::MockSource;
///
/// let mut mock = MockSource::new(16000);
/// mock.generate_silence(64);
/// mock.generate_channel_ramps(64);
///
/// let samples = mock.take_samples();
/// assert_eq!(samples.len(), 128 * 6);
/// ```
pub struct MockSource {
    sample_rate: u32,
    samples: Vec<f32>,
    frames_generated: u64,
}

impl MockSource {
    /// Creates a new mock source at the given rate.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            samples: Vec::new(),
            frames_generated: 0,
        }
    }

    /// Returns the sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Appends `frames` frames of silence on every channel.
    pub fn generate_silence(&mut self, frames: usize) {
        self.samples
            .extend(std::iter::repeat(0.0f32).take(frames * CHANNEL_COUNT));
        self.frames_generated += frames as u64;
    }

    /// Appends a sine wave of `frequency` Hz, scaled per channel by
    /// `(channel + 1) / 6` so channels differ in amplitude.
    pub fn generate_sine(&mut self, frequency: f64, frames: usize) {
        let sample_rate = f64::from(self.sample_rate);
        for i in 0..frames {
            let t = (self.frames_generated + i as u64) as f64 / sample_rate;
            let value = (2.0 * std::f64::consts::PI * frequency * t).sin();
            for ch in 0..CHANNEL_COUNT {
                let gain = (ch + 1) as f64 / CHANNEL_COUNT as f64;
                self.samples.push((value * gain) as f32);
            }
        }
        self.frames_generated += frames as u64;
    }

    /// Appends frames where channel `ch` of frame `n` (counted from the first
    /// frame ever generated) is `ch / 10 + (n % 1000) / 100_000`.
    ///
    /// Values stay inside [-1.0, 1.0] and identify both channel and position.
    pub fn generate_channel_ramps(&mut self, frames: usize) {
        for i in 0..frames {
            let n = self.frames_generated + i as u64;
            for ch in 0..CHANNEL_COUNT {
                self.samples.push(ramp_value(ch, n));
            }
        }
        self.frames_generated += frames as u64;
    }

    /// Takes all accumulated samples, clearing the internal buffer.
    pub fn take_samples(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.samples)
    }

    /// Returns a reference to the accumulated interleaved samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Number of accumulated frames.
    pub fn frame_count(&self) -> usize {
        self.samples.len() / CHANNEL_COUNT
    }
}

/// Value written by [`MockSource::generate_channel_ramps`].
pub(crate) fn ramp_value(channel: usize, frame: u64) -> f32 {
    channel as f32 / 10.0 + (frame % 1000) as f32 / 100_000.0
}

#[derive(Default)]
struct MockState {
    producer: Mutex<Option<ringbuf::HeapProd<f32>>>,
    overruns: Mutex<Option<Arc<AtomicU64>>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    running: AtomicBool,
    missing: AtomicBool,
}

/// A capture backend that plays the role of the hardware in tests.
///
/// Tests push frames with [`push_frames`](MockBackend::push_frames), which
/// behaves like the hardware callback: frames only land while a stream is
/// open and playing, and frames that don't fit are counted as overruns.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<MockState>,
}

impl MockBackend {
    /// Creates a backend whose device is present.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend whose device is never found.
    pub fn missing() -> Self {
        let backend = Self::default();
        backend.state.missing.store(true, Ordering::SeqCst);
        backend
    }

    /// Simulates plugging or unplugging the device.
    pub fn set_missing(&self, missing: bool) {
        self.state.missing.store(missing, Ordering::SeqCst);
    }

    /// Delivers interleaved samples as one hardware callback would.
    ///
    /// Returns the number of samples accepted. Nothing is accepted while the
    /// stream is closed or paused.
    pub fn push_frames(&self, interleaved: &[f32]) -> usize {
        if !self.is_running() {
            return 0;
        }
        let mut producer = self.state.producer.lock();
        let Some(producer) = producer.as_mut() else {
            return 0;
        };

        let fit = (producer.vacant_len() / CHANNEL_COUNT * CHANNEL_COUNT).min(interleaved.len());
        let written = producer.push_slice(&interleaved[..fit]);
        let dropped = interleaved.len() - written;
        if dropped > 0 {
            if let Some(overruns) = self.state.overruns.lock().as_ref() {
                overruns.fetch_add(dropped as u64, Ordering::Relaxed);
            }
        }
        written
    }

    /// Number of times the device was opened.
    pub fn open_count(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Number of times the device was closed.
    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Returns `true` while a stream is open.
    pub fn is_open(&self) -> bool {
        self.open_count() > self.close_count()
    }

    /// Returns `true` while a stream is open and not paused.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }
}

impl CaptureBackend for MockBackend {
    fn open(&self, config: &CaptureConfig) -> Result<OpenedCapture, MicArrayError> {
        if self.state.missing.load(Ordering::SeqCst) {
            return Err(MicArrayError::DeviceNotFound {
                pattern: config.device_name.clone(),
            });
        }

        let ring_buffer = HeapRb::<f32>::new(config.buffer_samples());
        let (producer, consumer) = ring_buffer.split();
        let overruns = Arc::new(AtomicU64::new(0));

        *self.state.producer.lock() = Some(producer);
        *self.state.overruns.lock() = Some(Arc::clone(&overruns));
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        self.state.running.store(true, Ordering::SeqCst);

        Ok(OpenedCapture {
            handle: Box::new(MockHandle {
                state: Arc::clone(&self.state),
            }),
            frames: consumer,
            overruns,
            device_name: format!("{} Mock Array", config.device_name),
        })
    }
}

struct MockHandle {
    state: Arc<MockState>,
}

impl CaptureHandle for MockHandle {
    fn play(&mut self) -> Result<(), MicArrayError> {
        self.state.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&mut self) -> Result<(), MicArrayError> {
        self.state.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::SeqCst);
        self.state.producer.lock().take();
        self.state.overruns.lock().take();
        self.state.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringbuf::traits::Consumer;

    #[test]
    fn test_mock_source_silence() {
        let mut mock = MockSource::new(16000);
        mock.generate_silence(100);

        assert_eq!(mock.frame_count(), 100);
        let samples = mock.take_samples();
        assert_eq!(samples.len(), 600);
        assert!(samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_mock_source_sine_in_range() {
        let mut mock = MockSource::new(16000);
        mock.generate_sine(440.0, 1600);

        let samples = mock.take_samples();
        assert!(samples.iter().any(|&s| s > 0.0));
        assert!(samples.iter().any(|&s| s < 0.0));
        assert!(samples.iter().all(|&s| (-1.0..=1.0).contains(&s)));
    }

    #[test]
    fn test_mock_source_ramps_identify_channel() {
        let mut mock = MockSource::new(16000);
        mock.generate_channel_ramps(2);
        mock.generate_channel_ramps(1);

        let samples = mock.take_samples();
        assert_eq!(samples[5], ramp_value(5, 0));
        assert_eq!(samples[6 + 3], ramp_value(3, 1));
        assert_eq!(samples[12], ramp_value(0, 2));
    }

    #[test]
    fn test_backend_counts_open_close() {
        let backend = MockBackend::new();
        let config = crate::MicArrayConfig::default().capture_config();

        let opened = backend.open(&config).unwrap();
        assert!(backend.is_open());
        assert!(backend.is_running());
        drop(opened);

        assert_eq!(backend.open_count(), 1);
        assert_eq!(backend.close_count(), 1);
        assert!(!backend.is_open());
    }

    #[test]
    fn test_backend_missing() {
        let backend = MockBackend::missing();
        let config = crate::MicArrayConfig::default().capture_config();
        assert!(matches!(
            backend.open(&config),
            Err(MicArrayError::DeviceNotFound { .. })
        ));
        assert_eq!(backend.open_count(), 0);
    }

    #[test]
    fn test_push_frames_reaches_consumer() {
        let backend = MockBackend::new();
        let config = crate::MicArrayConfig::default().capture_config();
        let mut opened = backend.open(&config).unwrap();

        assert_eq!(backend.push_frames(&[0.5; 12]), 12);
        assert_eq!(opened.frames.occupied_len(), 12);
        assert_eq!(opened.frames.try_pop(), Some(0.5));
    }

    #[test]
    fn test_push_frames_ignored_while_paused() {
        let backend = MockBackend::new();
        let config = crate::MicArrayConfig::default().capture_config();
        let mut opened = backend.open(&config).unwrap();

        opened.handle.pause().unwrap();
        assert_eq!(backend.push_frames(&[0.5; 12]), 0);
        opened.handle.play().unwrap();
        assert_eq!(backend.push_frames(&[0.5; 12]), 12);
    }

    #[test]
    fn test_push_frames_counts_overrun() {
        let backend = MockBackend::new();
        let config = CaptureConfig {
            sample_rate: 16000,
            channels: 6,
            block_size: 4,
            buffer_frames: 4,
            device_name: "ReSpeaker".to_string(),
        };
        let opened = backend.open(&config).unwrap();

        // 5 frames into a 4-frame ring: one whole frame is dropped
        assert_eq!(backend.push_frames(&[0.1; 30]), 24);
        assert_eq!(opened.overruns.load(Ordering::Relaxed), 6);
    }
}
