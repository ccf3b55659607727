//! Configuration types for the shared capture stream.

use std::time::Duration;

use serde::Deserialize;

use crate::channel::CHANNEL_COUNT;
use crate::MicArrayError;

/// Configuration for the shared stream and the nodes that read it.
///
/// Deserializes from the host's settings dictionary, so the field names on the
/// wire follow the host (`default_sampling_rate`, `use_pref_counter`, ...).
/// Unknown keys are ignored and missing keys fall back to the defaults.
///
/// # Example
///
/// ```
/// use mic_array_stream::MicArrayConfig;
///
/// let config = MicArrayConfig::from_settings_json(
///     r#"{ "chunk_size": 512, "use_pref_counter": true }"#,
/// ).unwrap();
/// assert_eq!(config.sample_rate, 16000);
/// assert_eq!(config.chunk_size, 512);
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MicArrayConfig {
    /// Capture sample rate in Hz.
    ///
    /// Default: 16000
    #[serde(rename = "default_sampling_rate")]
    pub sample_rate: u32,

    /// Frames per published chunk; also the hardware block size.
    ///
    /// Default: 1024
    pub chunk_size: usize,

    /// Waveform panel width (display only).
    pub waveform_width: u32,

    /// Waveform panel height (display only).
    pub waveform_height: u32,

    /// Time every tick and expose the elapsed time.
    #[serde(rename = "use_pref_counter")]
    pub use_perf_counter: bool,

    /// Name fragment used to find the array among the input devices.
    ///
    /// Default: "ReSpeaker"
    pub device_name: String,

    /// History kept in each node's rolling display buffer.
    ///
    /// Default: 5 seconds
    #[serde(skip, default = "default_display_duration")]
    pub display_duration: Duration,

    /// Capacity of the lock-free accumulation buffer between the hardware
    /// callback and the extractor. Frames that don't fit are dropped and
    /// reported as an overrun.
    ///
    /// Default: 30 seconds
    #[serde(skip, default = "default_ring_buffer_duration")]
    pub ring_buffer_duration: Duration,

    /// Number of attempts for a failed downstream write.
    ///
    /// Default: 3
    #[serde(skip, default = "default_sink_retry_attempts")]
    pub sink_retry_attempts: u32,

    /// Initial delay between downstream write attempts (doubles each attempt).
    ///
    /// Default: 5ms
    #[serde(skip, default = "default_sink_retry_delay")]
    pub sink_retry_delay: Duration,
}

fn default_display_duration() -> Duration {
    Duration::from_secs(5)
}

fn default_ring_buffer_duration() -> Duration {
    Duration::from_secs(30)
}

fn default_sink_retry_attempts() -> u32 {
    3
}

fn default_sink_retry_delay() -> Duration {
    Duration::from_millis(5)
}

impl Default for MicArrayConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            chunk_size: 1024,
            waveform_width: 200,
            waveform_height: 400,
            use_perf_counter: false,
            device_name: "ReSpeaker".to_string(),
            display_duration: default_display_duration(),
            ring_buffer_duration: default_ring_buffer_duration(),
            sink_retry_attempts: default_sink_retry_attempts(),
            sink_retry_delay: default_sink_retry_delay(),
        }
    }
}

impl MicArrayConfig {
    /// Parses the host settings dictionary and validates the result.
    pub fn from_settings_json(json: &str) -> Result<Self, MicArrayError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), MicArrayError> {
        if self.sample_rate == 0 {
            return Err(invalid("sample rate must be non-zero"));
        }
        if self.chunk_size == 0 {
            return Err(invalid("chunk size must be non-zero"));
        }
        if self.chunk_size > u32::MAX as usize {
            return Err(invalid("chunk size does not fit a hardware block size"));
        }
        if self.display_len() == 0 {
            return Err(invalid("display duration must hold at least one sample"));
        }
        if self.ring_buffer_frames() < self.chunk_size * 2 {
            return Err(invalid("ring buffer must hold at least two chunks"));
        }
        Ok(())
    }

    /// Number of samples in the rolling display window.
    pub fn display_len(&self) -> usize {
        (self.sample_rate as f64 * self.display_duration.as_secs_f64()) as usize
    }

    /// Accumulation buffer capacity in frames.
    pub fn ring_buffer_frames(&self) -> usize {
        (self.sample_rate as f64 * self.ring_buffer_duration.as_secs_f64()) as usize
    }

    /// The subset of settings a capture backend needs.
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            sample_rate: self.sample_rate,
            channels: CHANNEL_COUNT as u16,
            block_size: self.chunk_size as u32,
            buffer_frames: self.ring_buffer_frames(),
            device_name: self.device_name.clone(),
        }
    }
}

fn invalid(reason: &str) -> MicArrayError {
    MicArrayError::InvalidConfig {
        reason: reason.to_string(),
    }
}

/// Parameters for opening the hardware stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count; always 6 for the array.
    pub channels: u16,
    /// Frames per hardware callback.
    pub block_size: u32,
    /// Accumulation buffer capacity in frames.
    pub buffer_frames: usize,
    /// Name fragment identifying the device.
    pub device_name: String,
}

impl CaptureConfig {
    /// Accumulation buffer capacity in interleaved samples.
    pub fn buffer_samples(&self) -> usize {
        self.buffer_frames * self.channels as usize
    }
}
