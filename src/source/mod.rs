//! Hardware capture abstraction and device discovery.
//!
//! A [`CaptureBackend`] opens the array and hands back an [`OpenedCapture`]:
//! a handle that keeps the hardware running, plus the consumer half of the
//! lock-free ring the hardware callback appends to. The registry owns both
//! for as long as at least one node references the stream.

mod device;
mod mock;

pub use device::{CaptureStream, CpalBackend};
pub use mock::{MockBackend, MockSource};

#[cfg(test)]
pub(crate) use mock::ramp_value;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait};

use crate::channel::CHANNEL_COUNT;
use crate::{CaptureConfig, MicArrayError};

/// Control over an open hardware stream.
///
/// Dropping the handle stops the stream and closes the device.
pub trait CaptureHandle: Send {
    /// Starts (or resumes) delivering frames to the accumulation ring.
    fn play(&mut self) -> Result<(), MicArrayError>;

    /// Suspends delivery without closing the device.
    fn pause(&mut self) -> Result<(), MicArrayError>;
}

/// Everything the registry needs from a freshly opened device.
pub struct OpenedCapture {
    /// Keeps the hardware stream alive.
    pub handle: Box<dyn CaptureHandle>,
    /// Consumer half of the ring filled by the hardware callback.
    pub frames: ringbuf::HeapCons<f32>,
    /// Samples the callback could not fit into the ring.
    pub overruns: Arc<AtomicU64>,
    /// Name of the opened device.
    pub device_name: String,
}

/// Opens the capture device. Called once per 0-to-1 reference transition.
pub trait CaptureBackend: Send + Sync {
    /// Opens the device and starts capturing with the given configuration.
    fn open(&self, config: &CaptureConfig) -> Result<OpenedCapture, MicArrayError>;
}

/// An input device as reported by the audio host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDeviceInfo {
    /// Position in the host's device list.
    pub index: usize,
    /// Device name.
    pub name: String,
    /// Largest input channel count among the supported configurations.
    pub max_input_channels: u16,
}

impl InputDeviceInfo {
    /// Returns `true` if this looks like the array: enough input channels and
    /// a name containing `pattern`.
    pub fn is_mic_array(&self, pattern: &str) -> bool {
        self.max_input_channels as usize >= CHANNEL_COUNT && self.name.contains(pattern)
    }
}

/// Lists all input devices of the default host, in host order.
///
/// Devices whose name or configurations cannot be read are skipped.
///
/// # Errors
///
/// Returns an error if the audio host cannot be accessed.
pub fn list_input_devices() -> Result<Vec<InputDeviceInfo>, MicArrayError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| MicArrayError::BackendError(e.to_string()))?;

    Ok(devices
        .enumerate()
        .filter_map(|(index, device)| {
            let name = device.name().ok()?;
            let max_input_channels = device
                .supported_input_configs()
                .ok()?
                .map(|c| c.channels())
                .max()
                .unwrap_or(0);
            Some(InputDeviceInfo {
                index,
                name,
                max_input_channels,
            })
        })
        .collect())
}

/// Picks the first device that looks like the array.
pub fn find_mic_array<'a>(
    devices: &'a [InputDeviceInfo],
    pattern: &str,
) -> Option<&'a InputDeviceInfo> {
    devices.iter().find(|d| d.is_mic_array(pattern))
}
