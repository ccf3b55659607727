//! Runtime events for monitoring the shared stream.
//!
//! Events are non-fatal notifications. The stream keeps running after any of
//! them - they're for logging and status display, not error handling.

use std::sync::Arc;

/// Runtime events emitted by the registry and the output router.
///
/// # Example
///
/// ```
/// use mic_array_stream::MicArrayEvent;
///
/// fn handle_event(event: MicArrayEvent) {
///     match event {
///         MicArrayEvent::StreamOpened { device } => eprintln!("opened {device}"),
///         MicArrayEvent::StreamClosed => eprintln!("closed"),
///         MicArrayEvent::DeviceUnavailable { reason } => eprintln!("not found: {reason}"),
///         MicArrayEvent::MasterPromoted { previous, current } => {
///             eprintln!("master {previous} -> {current}")
///         }
///         MicArrayEvent::InputOverrun { dropped_samples } => {
///             eprintln!("dropped {dropped_samples} samples")
///         }
///         MicArrayEvent::ReleaseMismatch { instance } => eprintln!("bad release {instance}"),
///         MicArrayEvent::SinkError { sink_name, error } => eprintln!("{sink_name}: {error}"),
///     }
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum MicArrayEvent {
    /// The hardware stream was opened by the first reference.
    StreamOpened {
        /// Name of the opened device.
        device: String,
    },

    /// The hardware stream was closed after the last reference was released.
    StreamClosed,

    /// Opening the device failed; the requesting node is disconnected.
    DeviceUnavailable {
        /// Why the device could not be opened.
        reason: String,
    },

    /// The master was released while other instances remained.
    MasterPromoted {
        /// Instance id of the released master.
        previous: u64,
        /// Instance id of the new master.
        current: u64,
    },

    /// The hardware callback could not fit samples into the accumulation buffer.
    ///
    /// Happens when nothing extracts for longer than the ring buffer
    /// duration, e.g. when every node is paused.
    InputOverrun {
        /// Samples dropped since the last report.
        dropped_samples: u64,
    },

    /// A release did not match a live reference.
    ReleaseMismatch {
        /// Instance id that was released.
        instance: u64,
    },

    /// A downstream sink failed to accept an output.
    SinkError {
        /// Name of the sink.
        sink_name: String,
        /// Description of the error.
        error: String,
    },
}

/// Callback type for receiving runtime events.
pub type EventCallback = Arc<dyn Fn(MicArrayEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use mic_array_stream::{event_callback, MicArrayEvent};
///
/// let callback = event_callback(|event| {
///     println!("Got event: {:?}", event);
/// });
/// callback(MicArrayEvent::StreamClosed);
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(MicArrayEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}
