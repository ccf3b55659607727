//! Sample format conversion utilities.
//!
//! The pipeline works in f32 throughout. Devices that deliver integer
//! samples are converted in the capture callback with these helpers.

mod convert;

pub use convert::{deinterleave, extend_converted, i16_to_f32, u16_to_f32};
