//! # mic-array-stream
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! One 6-channel microphone array, many pipeline nodes.
//!
//! `mic-array-stream` lets any number of nodes on a pipeline canvas read the
//! same ReSpeaker-style array as if each had its own source, while the
//! physical device is opened exactly once. Each node picks one of the six
//! channels (beamformed output, four raw microphones, playback reference)
//! independently of the others.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mic_array_stream::{Canvas, Channel, MicArrayConfig, SharedStreamRegistry, Transport};
//!
//! let config = MicArrayConfig::from_settings_json(r#"{ "chunk_size": 1024 }"#)?;
//! let registry = Arc::new(
//!     SharedStreamRegistry::cpal(config)?
//!         .with_event_callback(mic_array_stream::event_callback(|e| tracing::warn!(?e, "stream event"))),
//! );
//!
//! let mut canvas = Canvas::new(registry);
//! canvas.add_mic_node(1)?;
//! canvas.add_mic_node(2)?.select_channel(Channel::Mic1);
//!
//! // Once per pipeline frame:
//! for output in canvas.tick(Transport::Playing) {
//!     // Feed output.output.samples to the next node
//! }
//! ```
//!
//! ## Architecture
//!
//! The crate maintains a strict thread boundary:
//!
//! - **CPAL Thread**: audio callback that only appends to a lock-free ring
//! - **Registry**: reference-counted owner of the stream; the master node
//!   extracts fixed-size chunks and every node consumes each chunk once
//! - **Scheduler**: ticks every node once per frame and routes outputs to sinks
//!
//! Nothing on the tick path waits for the hardware, and the hardware callback
//! never waits for a tick.

#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod channel;
mod chunk;
mod config;
mod display;
mod error;
mod event;
pub mod format;
mod node;
mod pipeline;
mod registry;
mod sink;
pub mod source;
pub mod vad;

pub use channel::{Channel, CHANNEL_COUNT};
pub use chunk::{ChannelOutput, MultiChannelChunk, NodeOutput};
pub use config::{CaptureConfig, MicArrayConfig};
pub use display::DisplayBuffer;
pub use error::{ControlError, MicArrayError, SinkError};
pub use event::{event_callback, EventCallback, MicArrayEvent};
pub use node::{
    format_elapsed, MicArrayNode, NodeSetting, Transport, NODE_LABEL, NODE_TAG, NODE_VERSION,
};
pub use pipeline::{Canvas, CanvasCommand, OutputRouter};
pub use registry::{ConnectionStatus, InstanceId, SharedStreamRegistry, StreamRef};
pub use sink::{ChannelSink, OutputSink};
pub use source::{
    find_mic_array, list_input_devices, CaptureBackend, CaptureHandle, CpalBackend,
    InputDeviceInfo, MockBackend, MockSource, OpenedCapture,
};
pub use vad::{VoiceActivity, VoiceActivityNode, VoiceActivitySlot};
