//! Tokio mpsc channel sink for per-node chunk streams.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::sink::OutputSink;
use crate::{NodeOutput, SinkError};

/// Forwards each node's new chunks to a tokio mpsc channel.
///
/// A node repeats its last chunk on ticks where nothing new was published,
/// and outputs nothing before its first chunk. Neither reaches the channel:
/// the receiver sees every `(node_id, chunk_index)` pair exactly once.
///
/// # Example
///
/// ```
/// use mic_array_stream::{ChannelSink, NodeOutput};
/// use tokio::sync::mpsc;
///
/// let (tx, _rx) = mpsc::channel::<NodeOutput>(64);
/// let sink = ChannelSink::new(tx);
/// // Hand the sink to an OutputRouter, then:
/// // while let Some(output) = rx.recv().await { ... }
/// ```
pub struct ChannelSink {
    name: String,
    sender: mpsc::Sender<NodeOutput>,
    delivered: Mutex<HashMap<u32, u64>>,
}

impl ChannelSink {
    /// Creates a sink named "channel".
    ///
    /// Size the channel for one output per node per tick plus headroom for a
    /// slow receiver; a full channel makes the router wait.
    pub fn new(sender: mpsc::Sender<NodeOutput>) -> Self {
        Self::with_name("channel", sender)
    }

    /// Creates a sink with a custom name.
    pub fn with_name(name: impl Into<String>, sender: mpsc::Sender<NodeOutput>) -> Self {
        Self {
            name: name.into(),
            sender,
            delivered: Mutex::new(HashMap::new()),
        }
    }

    /// Index of the last chunk forwarded for `node_id`.
    pub fn last_delivered(&self, node_id: u32) -> Option<u64> {
        self.delivered.lock().get(&node_id).copied()
    }
}

#[async_trait]
impl OutputSink for ChannelSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, output: &NodeOutput) -> Result<(), SinkError> {
        let Some(index) = output.output.chunk_index else {
            return Ok(());
        };
        if self.last_delivered(output.node_id) == Some(index) {
            return Ok(());
        }

        self.sender
            .send(output.clone())
            .await
            .map_err(|_| SinkError::ChannelClosed)?;
        self.delivered.lock().insert(output.node_id, index);
        Ok(())
    }

    async fn on_stop(&self) -> Result<(), SinkError> {
        // A stopped stream restarts its chunk indices on reopen
        self.delivered.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChannelOutput;
    use std::sync::Arc;

    fn output_at(node_id: u32, chunk_index: Option<u64>) -> NodeOutput {
        NodeOutput {
            node_id,
            output: ChannelOutput {
                chunk_index,
                samples: Arc::from(vec![0.25f32, -0.25]),
            },
        }
    }

    fn output(node_id: u32) -> NodeOutput {
        output_at(node_id, Some(4))
    }

    #[tokio::test]
    async fn test_channel_sink_sends_outputs() {
        let (tx, mut rx) = mpsc::channel::<NodeOutput>(10);
        let sink = ChannelSink::new(tx);

        sink.write(&output(7)).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.node_id, 7);
        assert_eq!(received.output.chunk_index, Some(4));
        assert_eq!(&*received.output.samples, &[0.25, -0.25]);
        assert_eq!(sink.last_delivered(7), Some(4));
    }

    #[tokio::test]
    async fn test_channel_sink_skips_empty_and_repeats() {
        let (tx, mut rx) = mpsc::channel::<NodeOutput>(10);
        let sink = ChannelSink::new(tx);

        sink.write(&output_at(1, None)).await.unwrap();
        sink.write(&output_at(1, Some(0))).await.unwrap();
        sink.write(&output_at(2, Some(0))).await.unwrap();
        sink.write(&output_at(1, Some(0))).await.unwrap();
        sink.write(&output_at(1, Some(1))).await.unwrap();
        drop(sink);

        let mut seen = Vec::new();
        while let Some(received) = rx.recv().await {
            seen.push((received.node_id, received.output.chunk_index));
        }
        assert_eq!(seen, vec![(1, Some(0)), (2, Some(0)), (1, Some(1))]);
    }

    #[tokio::test]
    async fn test_channel_sink_forgets_after_stop() {
        let (tx, mut rx) = mpsc::channel::<NodeOutput>(10);
        let sink = ChannelSink::new(tx);

        sink.write(&output_at(3, Some(0))).await.unwrap();
        sink.on_stop().await.unwrap();
        assert_eq!(sink.last_delivered(3), None);
        sink.write(&output_at(3, Some(0))).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().output.chunk_index, Some(0));
        assert_eq!(rx.recv().await.unwrap().output.chunk_index, Some(0));
    }

    #[tokio::test]
    async fn test_channel_sink_closed() {
        let (tx, rx) = mpsc::channel::<NodeOutput>(10);
        let sink = ChannelSink::new(tx);
        drop(rx);

        let result = sink.write(&output(1)).await;
        assert!(matches!(result, Err(SinkError::ChannelClosed)));
        assert_eq!(sink.last_delivered(1), None);
    }

    #[tokio::test]
    async fn test_channel_sink_custom_name() {
        let (tx, _rx) = mpsc::channel::<NodeOutput>(10);
        let sink = ChannelSink::with_name("downstream", tx);
        assert_eq!(sink.name(), "downstream");
    }
}
