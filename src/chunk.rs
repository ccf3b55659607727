//! Published chunks and per-node output.

use std::sync::Arc;

use crate::channel::{Channel, CHANNEL_COUNT};
use crate::format::deinterleave;

/// One fixed-size slice of the capture, split per channel.
///
/// This is what the master publishes and every node consumes. Channel data is
/// stored in `Arc<[f32]>` so handing the same chunk to every node, and then
/// downstream, never copies samples.
///
/// # Example
///
/// ```
/// use mic_array_stream::{Channel, MultiChannelChunk};
///
/// let interleaved: Vec<f32> = (0..12).map(|i| i as f32).collect();
/// let chunk = MultiChannelChunk::from_interleaved(0, &interleaved);
/// assert_eq!(chunk.frame_count(), 2);
/// assert_eq!(&*chunk.channel(Channel::Mic1), &[1.0, 7.0]);
/// ```
#[derive(Debug, Clone)]
pub struct MultiChannelChunk {
    /// Position of this chunk in the stream; increases by one per extraction.
    pub index: u64,
    channels: [Arc<[f32]>; CHANNEL_COUNT],
}

impl MultiChannelChunk {
    /// Splits interleaved frames into per-channel sequences.
    ///
    /// A trailing partial frame is ignored.
    pub fn from_interleaved(index: u64, interleaved: &[f32]) -> Self {
        let mut split = deinterleave(interleaved, CHANNEL_COUNT)
            .into_iter()
            .map(Arc::<[f32]>::from);
        let channels =
            std::array::from_fn(|_| split.next().unwrap_or_else(|| Arc::from(Vec::new())));
        Self { index, channels }
    }

    /// Samples of a single channel. Cheap: clones the `Arc`.
    pub fn channel(&self, channel: Channel) -> Arc<[f32]> {
        Arc::clone(&self.channels[channel.index()])
    }

    /// Number of frames in the chunk.
    pub fn frame_count(&self) -> usize {
        self.channels[0].len()
    }
}

/// The output of one node for one tick: the selected channel of the most
/// recent chunk the node consumed.
#[derive(Debug, Clone)]
pub struct ChannelOutput {
    /// Index of the chunk the samples came from; `None` until the first chunk.
    pub chunk_index: Option<u64>,
    /// Samples of the selected channel; empty until the first chunk.
    pub samples: Arc<[f32]>,
}

impl ChannelOutput {
    /// Output of a node that has not received anything yet.
    pub fn empty() -> Self {
        Self {
            chunk_index: None,
            samples: Arc::from(Vec::new()),
        }
    }

    /// Returns `true` if there are no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Chunk index in the host's encoding, where -1 means "none yet".
    pub fn host_chunk_index(&self) -> i64 {
        self.chunk_index.map_or(-1, |i| i as i64)
    }
}

impl Default for ChannelOutput {
    fn default() -> Self {
        Self::empty()
    }
}

/// A node's output tagged with the node it came from.
#[derive(Debug, Clone)]
pub struct NodeOutput {
    /// Host-assigned node id.
    pub node_id: u32,
    /// The node's output for this tick.
    pub output: ChannelOutput,
}
