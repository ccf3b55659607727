//! Sample format and channel layout conversion.

/// Converts an i16 sample to f32.
///
/// Output will be in the range [-1.0, 1.0].
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

/// Converts an unsigned 16-bit sample (midpoint 32768) to f32.
///
/// Output will be in the range [-1.0, 1.0].
#[inline]
pub fn u16_to_f32(sample: u16) -> f32 {
    (f32::from(sample) - 32768.0) / 32768.0
}

/// Converts a block of samples into a reusable scratch buffer.
///
/// The scratch buffer is cleared first and keeps its allocation, so the audio
/// callback does not allocate once it has seen its largest block.
pub fn extend_converted<T: Copy>(scratch: &mut Vec<f32>, data: &[T], convert: fn(T) -> f32) {
    scratch.clear();
    scratch.extend(data.iter().map(|&s| convert(s)));
}

/// Splits interleaved frames into one vector per channel.
///
/// A trailing partial frame is dropped.
pub fn deinterleave(interleaved: &[f32], channels: usize) -> Vec<Vec<f32>> {
    if channels == 0 {
        return Vec::new();
    }
    let frames = interleaved.len() / channels;
    (0..channels)
        .map(|ch| {
            interleaved
                .chunks_exact(channels)
                .take(frames)
                .map(|frame| frame[ch])
                .collect()
        })
        .collect()
}
