//! Downstream destinations for node outputs.
//!
//! An [`OutputSink`] receives every [`NodeOutput`] the canvas produces, one
//! per node per tick. [`ChannelSink`] forwards each node's new chunks to a
//! tokio channel;
//! implement the trait for anything else (a network bridge, a recorder, the
//! next node in the host graph).

mod channel;

pub use channel::ChannelSink;

use crate::{NodeOutput, SinkError};
use async_trait::async_trait;

/// A destination for node outputs.
///
/// # Implementation Notes
///
/// - Methods take `&self`; use interior mutability if needed
/// - `on_start` runs before the first tick, `on_stop` after the last one
/// - `write` may be retried by the router after an error
///
/// # Example
///
/// ```
/// use mic_array_stream::{NodeOutput, OutputSink, SinkError};
/// use async_trait::async_trait;
///
/// struct PrintSink;
///
/// #[async_trait]
/// impl OutputSink for PrintSink {
///     fn name(&self) -> &str {
///         "print"
///     }
///
///     async fn write(&self, output: &NodeOutput) -> Result<(), SinkError> {
///         println!("node {} -> {} samples", output.node_id, output.output.samples.len());
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Name used in logs and [`MicArrayEvent::SinkError`](crate::MicArrayEvent::SinkError).
    fn name(&self) -> &str;

    /// Called once before the first output.
    async fn on_start(&self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Delivers one node's output for one tick.
    async fn write(&self, output: &NodeOutput) -> Result<(), SinkError>;

    /// Called once after the last output.
    async fn on_stop(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
