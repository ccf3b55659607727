//! Accumulation buffer between the hardware callback and the extractor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ringbuf::traits::{Consumer, Observer};

use crate::channel::CHANNEL_COUNT;
use crate::MultiChannelChunk;

/// Consumer side of the lock-free ring the hardware callback appends to.
///
/// The callback is the only producer and the master's extractor the only
/// consumer, so the callback never waits on a lock. Frames leave the buffer
/// only in whole, chunk-sized slices.
pub struct AccumulationBuffer {
    consumer: ringbuf::HeapCons<f32>,
    overruns: Arc<AtomicU64>,
    overruns_reported: u64,
    chunk_frames: usize,
    scratch: Vec<f32>,
}

impl AccumulationBuffer {
    /// Wraps a ring consumer; `overruns` is the counter the producer bumps
    /// when samples don't fit.
    pub fn new(
        consumer: ringbuf::HeapCons<f32>,
        overruns: Arc<AtomicU64>,
        chunk_frames: usize,
    ) -> Self {
        Self {
            consumer,
            overruns,
            overruns_reported: 0,
            chunk_frames,
            scratch: vec![0.0; chunk_frames * CHANNEL_COUNT],
        }
    }

    /// Frames currently waiting for extraction.
    pub fn available_frames(&self) -> usize {
        self.consumer.occupied_len() / CHANNEL_COUNT
    }

    /// Returns true if enough frames are available for a complete chunk.
    pub fn has_chunk(&self) -> bool {
        self.available_frames() >= self.chunk_frames
    }

    /// Removes the oldest `chunk_frames` frames and splits them per channel.
    ///
    /// Returns `None` (and removes nothing) if fewer frames are available;
    /// partial chunks are never produced.
    pub fn try_extract(&mut self, index: u64) -> Option<MultiChannelChunk> {
        if !self.has_chunk() {
            return None;
        }

        let read = self.consumer.pop_slice(&mut self.scratch);
        debug_assert_eq!(read, self.scratch.len());

        Some(MultiChannelChunk::from_interleaved(
            index,
            &self.scratch[..read],
        ))
    }

    /// Discards everything waiting in the buffer. Returns the frames dropped.
    pub fn clear(&mut self) -> usize {
        self.consumer.clear() / CHANNEL_COUNT
    }

    /// Samples dropped by the producer since the last call.
    pub fn take_overruns(&mut self) -> u64 {
        let total = self.overruns.load(Ordering::Relaxed);
        let new = total.saturating_sub(self.overruns_reported);
        self.overruns_reported = total;
        new
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Channel;
    use ringbuf::traits::{Producer, Split};
    use ringbuf::HeapRb;

    fn create_buffer(
        capacity_frames: usize,
        chunk_frames: usize,
    ) -> (ringbuf::HeapProd<f32>, AccumulationBuffer) {
        let (producer, consumer) = HeapRb::<f32>::new(capacity_frames * CHANNEL_COUNT).split();
        let buffer = AccumulationBuffer::new(consumer, Arc::new(AtomicU64::new(0)), chunk_frames);
        (producer, buffer)
    }

    fn frames(count: usize, start: usize) -> Vec<f32> {
        (start..start + count)
            .flat_map(|f| (0..CHANNEL_COUNT).map(move |ch| (f * 10 + ch) as f32))
            .collect()
    }

    #[test]
    fn test_extract_chunk() {
        let (mut producer, mut buffer) = create_buffer(64, 16);
        producer.push_slice(&frames(16, 0));

        assert!(buffer.has_chunk());
        let chunk = buffer.try_extract(0).unwrap();
        assert_eq!(chunk.index, 0);
        assert_eq!(chunk.frame_count(), 16);
        assert_eq!(chunk.channel(Channel::Mic4)[3], 34.0);
        assert_eq!(buffer.available_frames(), 0);
    }

    #[test]
    fn test_not_enough_frames() {
        let (mut producer, mut buffer) = create_buffer(64, 16);
        producer.push_slice(&frames(15, 0));

        assert!(!buffer.has_chunk());
        assert!(buffer.try_extract(0).is_none());
        // Nothing was consumed by the failed attempt
        assert_eq!(buffer.available_frames(), 15);
    }

    #[test]
    fn test_extract_removes_from_front() {
        let (mut producer, mut buffer) = create_buffer(64, 8);
        producer.push_slice(&frames(20, 0));

        let first = buffer.try_extract(0).unwrap();
        let second = buffer.try_extract(1).unwrap();
        assert_eq!(first.channel(Channel::Processed)[0], 0.0);
        assert_eq!(second.channel(Channel::Processed)[0], 80.0);
        assert!(buffer.try_extract(2).is_none());
        assert_eq!(buffer.available_frames(), 4);
    }

    #[test]
    fn test_clear() {
        let (mut producer, mut buffer) = create_buffer(64, 8);
        producer.push_slice(&frames(12, 0));

        assert_eq!(buffer.clear(), 12);
        assert_eq!(buffer.available_frames(), 0);
    }

    #[test]
    fn test_take_overruns_reports_delta() {
        let (_, consumer) = HeapRb::<f32>::new(60).split();
        let overruns = Arc::new(AtomicU64::new(0));
        let mut buffer = AccumulationBuffer::new(consumer, Arc::clone(&overruns), 4);

        overruns.fetch_add(12, Ordering::Relaxed);
        assert_eq!(buffer.take_overruns(), 12);
        assert_eq!(buffer.take_overruns(), 0);
        overruns.fetch_add(6, Ordering::Relaxed);
        assert_eq!(buffer.take_overruns(), 6);
    }
}
