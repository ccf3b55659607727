//! Rolling waveform window for the node's plot.

/// A fixed-length window of the most recent samples of one channel, paired
/// with a time axis in seconds.
///
/// The window starts zeroed. Each push shifts the contents left by the number
/// of new samples and writes them at the tail, so the window always holds the
/// last `len` samples seen.
///
/// # Example
///
/// ```
/// use mic_array_stream::DisplayBuffer;
///
/// let mut display = DisplayBuffer::new(4, 2);
/// display.push(&[1.0, 2.0]);
/// assert_eq!(display.samples(), &[0.0, 0.0, 1.0, 2.0]);
/// assert_eq!(display.time_axis(), &[0.0, 0.5, 1.0, 1.5]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayBuffer {
    samples: Vec<f32>,
    time_axis: Vec<f64>,
}

impl DisplayBuffer {
    /// Creates a zeroed window of `len` samples at `sample_rate`.
    pub fn new(len: usize, sample_rate: u32) -> Self {
        let rate = f64::from(sample_rate.max(1));
        Self {
            samples: vec![0.0; len],
            time_axis: (0..len).map(|i| i as f64 / rate).collect(),
        }
    }

    /// Appends `chunk` at the tail, discarding as many samples from the head.
    ///
    /// A chunk longer than the window leaves only its last `len` samples.
    pub fn push(&mut self, chunk: &[f32]) {
        let len = self.samples.len();
        if chunk.len() >= len {
            self.samples.copy_from_slice(&chunk[chunk.len() - len..]);
            return;
        }
        self.samples.copy_within(chunk.len().., 0);
        self.samples[len - chunk.len()..].copy_from_slice(chunk);
    }

    /// Zeroes the window.
    pub fn reset(&mut self) {
        self.samples.fill(0.0);
    }

    /// Window contents, oldest first.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Seconds from the start of the window for each sample.
    pub fn time_axis(&self) -> &[f64] {
        &self.time_axis
    }

    /// Window length in samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` for a zero-length window.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
