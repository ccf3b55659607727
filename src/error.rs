//! Error types for mic-array-stream.
//!
//! Errors are split into three categories:
//! - **Setup errors** ([`MicArrayError`]): bad configuration, unknown nodes, a
//!   device that could not be opened
//! - **Delivery errors** ([`SinkError`]): a downstream sink rejected an output
//! - **Control errors** ([`ControlError`]): a vendor control read failed
//!
//! Hardware failures never escape [`SharedStreamRegistry::acquire`]; they are
//! turned into a disconnected [`StreamRef`] so the canvas keeps running.
//!
//! [`SharedStreamRegistry::acquire`]: crate::SharedStreamRegistry::acquire
//! [`StreamRef`]: crate::StreamRef

/// Errors raised while configuring or opening the shared capture stream.
#[derive(Debug, thiserror::Error)]
pub enum MicArrayError {
    /// No input device matched the configured name with enough channels.
    #[error("no input device matching '{pattern}' with at least 6 input channels")]
    DeviceNotFound {
        /// Name fragment that was searched for.
        pattern: String,
    },

    /// The device exists but could not be opened (busy, unplugged mid-open).
    #[error("device unavailable: {name} - {reason}")]
    DeviceUnavailable {
        /// Name of the device.
        name: String,
        /// Reason reported by the backend.
        reason: String,
    },

    /// The device offers no sample format we can convert to f32.
    #[error("unsupported sample format: {format}")]
    UnsupportedFormat {
        /// The format that wasn't supported.
        format: String,
    },

    /// The device has no configuration for the requested rate and channel count.
    #[error("device does not support {channels} channels at {requested_rate}Hz")]
    UnsupportedConfig {
        /// Requested sample rate in Hz.
        requested_rate: u32,
        /// Requested channel count.
        channels: u16,
    },

    /// An error from the underlying audio library (CPAL).
    #[error("audio backend error: {0}")]
    BackendError(String),

    /// The configuration failed validation.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What was wrong.
        reason: String,
    },

    /// A channel index outside 0..=5 was selected.
    #[error("channel index {index} out of range (0-5)")]
    InvalidChannel {
        /// The rejected index.
        index: usize,
    },

    /// A channel label that does not name any of the array's channels.
    #[error("unknown channel label: {label}")]
    UnknownChannelLabel {
        /// The rejected label.
        label: String,
    },

    /// A single-instance node was instantiated twice.
    #[error("only one '{node}' node may exist at a time")]
    InstanceLimit {
        /// Label of the node type.
        node: &'static str,
    },

    /// A node id that is not on the canvas.
    #[error("unknown node id: {node_id}")]
    UnknownNode {
        /// The node id.
        node_id: u32,
    },

    /// A node id was added to the canvas twice.
    #[error("duplicate node id: {node_id}")]
    DuplicateNode {
        /// The node id.
        node_id: u32,
    },

    /// A sink failed to start before the first tick.
    #[error("sink '{sink_name}' failed to start: {reason}")]
    SinkStartFailed {
        /// Name of the sink.
        sink_name: String,
        /// Why it failed.
        reason: String,
    },

    /// Host settings or a persisted layout could not be parsed.
    #[error("settings error: {0}")]
    Settings(#[from] serde_json::Error),
}

/// Errors that can occur within an [`OutputSink`](crate::OutputSink) implementation.
///
/// Sink errors are recoverable - the router emits a
/// [`MicArrayEvent::SinkError`](crate::MicArrayEvent::SinkError) and retries.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// A write operation failed.
    #[error("write failed: {reason}")]
    WriteFailed {
        /// Description of what went wrong.
        reason: String,
    },

    /// The receiving channel was closed.
    #[error("channel closed")]
    ChannelClosed,

    /// Custom error for user-implemented sinks.
    #[error("{0}")]
    Custom(String),
}

impl SinkError {
    /// Creates a custom sink error with the given message.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Creates a write failed error with the given reason.
    pub fn write_failed(reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            reason: reason.into(),
        }
    }
}

/// Errors reading a parameter from the array's control endpoint.
///
/// These are swallowed by the voice-activity node, which keeps its last value.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// No control device is attached.
    #[error("control endpoint not connected")]
    NotConnected,

    /// The control transfer itself failed.
    #[error("control transfer failed: {0}")]
    Transfer(String),

    /// The device answered with fewer bytes than a parameter response needs.
    #[error("short control response: {len} bytes")]
    ShortResponse {
        /// Number of bytes received.
        len: usize,
    },
}
