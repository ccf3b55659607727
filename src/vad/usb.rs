//! Vendor control endpoint over libusb.

use std::time::Duration;

use rusb::{Direction, GlobalContext, Recipient, RequestType};

use super::ControlEndpoint;
use crate::ControlError;

/// USB vendor id of the array.
pub const VENDOR_ID: u16 = 0x2886;

/// USB product id of the array.
pub const PRODUCT_ID: u16 = 0x0018;

/// The array's DSP tuning interface.
pub struct UsbTuning {
    handle: rusb::DeviceHandle<GlobalContext>,
    timeout: Duration,
}

impl UsbTuning {
    /// Opens the first attached array.
    ///
    /// Returns [`ControlError::NotConnected`] when none is attached or it
    /// cannot be opened.
    pub fn open() -> Result<Self, ControlError> {
        let handle =
            rusb::open_device_with_vid_pid(VENDOR_ID, PRODUCT_ID).ok_or(ControlError::NotConnected)?;
        tracing::info!(
            vendor_id = VENDOR_ID,
            product_id = PRODUCT_ID,
            "opened array control endpoint"
        );
        Ok(Self {
            handle,
            timeout: Duration::from_secs(1),
        })
    }

    /// Opens the array, or `None` when it isn't attached.
    pub fn find() -> Option<Box<dyn ControlEndpoint>> {
        match Self::open() {
            Ok(tuning) => Some(Box::new(tuning)),
            Err(e) => {
                tracing::warn!(error = %e, "array control endpoint not found");
                None
            }
        }
    }

    /// Sets the control transfer timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl ControlEndpoint for UsbTuning {
    fn read_raw(&mut self, command: u16, id: u16, buf: &mut [u8]) -> Result<usize, ControlError> {
        let request_type = rusb::request_type(Direction::In, RequestType::Vendor, Recipient::Device);
        self.handle
            .read_control(request_type, 0, command, id, buf, self.timeout)
            .map_err(|e| ControlError::Transfer(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuning_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<UsbTuning>();
    }

    #[test]
    #[ignore = "requires the array on USB"]
    fn test_read_voice_activity() {
        let mut tuning = UsbTuning::open().unwrap();
        let active = tuning.read_voice_activity().unwrap();
        println!("voice activity: {active}");
    }
}
