//! PCM Buffer Management
//!
//! Provides the decoded clip buffer type and the trim/time-compression
//! transform used to derive modifier variants.

use log::debug;

use crate::error::{Result, VoxError};
use crate::sentence::Modifier;

/// Number of chunks a clip is split into for time compression
pub const COMPRESSION_CHUNKS: usize = 8;

// ============================================================================
// PCM Buffer
// ============================================================================

/// Decoded audio stored as non-interleaved 32-bit float samples
///
/// Buffers are never mutated once they enter the cache; transforms always
/// return a new buffer.
///
/// # Example
/// ```
/// use voxline::engine::PcmBuffer;
///
/// let buffer = PcmBuffer::silent(22050, 1, 22050);
/// assert_eq!(buffer.num_channels(), 1);
/// assert_eq!(buffer.len(), 22050);
/// assert_eq!(buffer.duration_secs(), 1.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    /// Sample data: outer Vec is channels, inner Vec is samples
    pub samples: Vec<Vec<f32>>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl PcmBuffer {
    /// Wrap per-channel sample data
    ///
    /// # Errors
    /// * `DecodeFailure` - If the channels differ in length
    pub fn new(samples: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        if let Some(first) = samples.first() {
            if samples.iter().any(|ch| ch.len() != first.len()) {
                return Err(VoxError::DecodeFailure {
                    key: String::new(),
                    reason: "channels have different lengths".to_string(),
                    source: None,
                });
            }
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Create a mono buffer
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: vec![samples],
            sample_rate,
        }
    }

    /// Create a zeroed buffer
    pub fn silent(num_samples: usize, num_channels: usize, sample_rate: u32) -> Self {
        Self {
            samples: vec![vec![0.0_f32; num_samples]; num_channels],
            sample_rate,
        }
    }

    /// Get the number of channels
    #[inline]
    pub fn num_channels(&self) -> usize {
        self.samples.len()
    }

    /// Get the number of samples per channel
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.first().map(|ch| ch.len()).unwrap_or(0)
    }

    /// Check if the buffer is empty (no samples)
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the duration in seconds
    #[inline]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.len() as f64 / self.sample_rate as f64
    }

    /// Get immutable access to a channel's samples
    ///
    /// # Panics
    /// Panics if the channel index is out of bounds
    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.samples[index]
    }

    /// Read the channel average at a fractional frame position
    ///
    /// Uses linear interpolation between neighbouring frames. Positions past
    /// the end of the buffer read as silence.
    pub fn read_mono_interpolated(&self, position: f64) -> f32 {
        let len = self.len();
        if len == 0 || self.samples.is_empty() || position < 0.0 {
            return 0.0;
        }

        let idx = position.floor() as usize;
        if idx >= len {
            return 0.0;
        }
        let frac = (position - idx as f64) as f32;

        let sum: f32 = self
            .samples
            .iter()
            .map(|ch| {
                if idx + 1 < len {
                    ch[idx] * (1.0 - frac) + ch[idx + 1] * frac
                } else {
                    ch[idx]
                }
            })
            .sum();

        sum / self.samples.len() as f32
    }

    /// Derive the buffer variant a modifier selects
    ///
    /// Only `start`, `end` and `time_compress` shape the samples here; pitch
    /// and volume are applied at playback. Any non-default modifier still
    /// goes through the 8-chunk cut, so its length is a multiple of 8. The
    /// default modifier returns an exact copy of the clip.
    pub fn derive_variant(&self, modifier: &Modifier) -> PcmBuffer {
        if modifier.variant_key().is_empty() {
            return self.clone();
        }
        if !modifier.has_valid_range() {
            debug!("out-of-range modifier ({}), clamping to the clip", modifier);
        }
        self.time_compress(modifier)
    }

    /// Trim and time-compress the buffer
    ///
    /// The trimmed window `[start%, end%]` is cut into 8 chunks. The first
    /// chunk is copied whole; every later chunk loses `time_compress`% of
    /// its samples from the front. Nothing is resampled, so pitch is
    /// unchanged while the word gets shorter.
    ///
    /// Degenerate windows (`start > end`, values above 100) never panic:
    /// slices are clamped to the source and negative lengths yield empty
    /// buffers.
    pub fn time_compress(&self, modifier: &Modifier) -> PcmBuffer {
        let plan = ChunkPlan::new(modifier, self.len());

        let samples = self
            .samples
            .iter()
            .map(|src| plan.apply(src))
            .collect::<Vec<_>>();

        PcmBuffer {
            samples,
            sample_rate: self.sample_rate,
        }
    }
}

// ============================================================================
// Chunk Plan
// ============================================================================

/// Source ranges copied for one time-compressed variant
#[derive(Debug, Clone, PartialEq)]
struct ChunkPlan {
    /// `(offset, length)` of each chunk in source frames
    chunks: Vec<(i64, i64)>,
    /// Length of the output buffer in frames
    target_len: usize,
}

impl ChunkPlan {
    fn new(modifier: &Modifier, source_len: usize) -> Self {
        let n = source_len as f64;
        let start = modifier.start as f64;
        let end = modifier.end as f64;
        let t = modifier.time_compress as f64;

        let chunk_offset = (start / 100.0 * n).round() as i64;
        let chunk_size = ((end - start) / 100.0 / 8.0 * n).floor() as i64;
        let target_len = chunk_size as f64 * (((100.0 - t) / 100.0) * 7.0 + 1.0);

        let chunks = (0..COMPRESSION_CHUNKS as i64)
            .map(|chunk| {
                if chunk == 0 {
                    (chunk_offset, chunk_size)
                } else {
                    let skip = (t / 100.0 * chunk_size as f64).floor() as i64;
                    let length = ((100.0 - t) / 100.0 * chunk_size as f64).floor() as i64;
                    (chunk_offset + chunk * chunk_size + skip, length)
                }
            })
            .collect();

        Self {
            chunks,
            target_len: target_len.ceil().max(0.0) as usize,
        }
    }

    fn apply(&self, src: &[f32]) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.target_len);
        let len = src.len() as i64;

        for &(offset, length) in &self.chunks {
            let from = offset.clamp(0, len);
            let to = (offset + length).clamp(from, len);
            out.extend_from_slice(&src[from as usize..to as usize]);
        }

        out.resize(self.target_len, 0.0);
        out
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn ramp(len: usize) -> PcmBuffer {
        PcmBuffer::mono((0..len).map(|i| i as f32).collect(), 8000)
    }

    fn modifier(text: &str) -> Modifier {
        Modifier::parse(text, &Modifier::DEFAULT)
    }

    #[test]
    fn test_new_rejects_ragged_channels() {
        let result = PcmBuffer::new(vec![vec![0.0; 4], vec![0.0; 3]], 8000);
        assert!(result.is_err());
    }

    #[test]
    fn test_default_variant_is_exact_copy() {
        let buffer = ramp(101);
        let variant = buffer.derive_variant(&Modifier::DEFAULT);
        assert_eq!(variant, buffer);
    }

    #[test]
    fn test_pitch_and_volume_still_chunk_the_clip() {
        // 8 chunks of floor(101 / 8), samples otherwise untouched
        let variant = ramp(101).derive_variant(&modifier("p50 v10"));
        assert_eq!(variant.len(), 96);
        assert_eq!(variant.channel(0)[95], 95.0);
    }

    #[test_case(800, 100 ; "divisible length")]
    #[test_case(803, 100 ; "remainder dropped")]
    fn test_no_compression_keeps_eight_chunks(len: usize, chunk_size: usize) {
        let variant = ramp(len).time_compress(&modifier("t0 e100"));
        assert_eq!(variant.len(), 8 * chunk_size);
        // contiguous copy of the source
        assert_eq!(variant.channel(0)[chunk_size * 5], (chunk_size * 5) as f32);
    }

    #[test]
    fn test_full_compression_keeps_first_chunk_only() {
        let variant = ramp(800).time_compress(&modifier("t100"));
        assert_eq!(variant.len(), 100);
        assert_eq!(variant.channel(0)[99], 99.0);
    }

    #[test]
    fn test_half_compression_skips_front_of_later_chunks() {
        let variant = ramp(800).time_compress(&modifier("t50"));
        // 100 + 7 * 50
        assert_eq!(variant.len(), 450);
        let samples = variant.channel(0);
        assert_eq!(samples[0], 0.0);
        assert_eq!(samples[99], 99.0);
        // chunk 1 starts 50 samples into source chunk 1
        assert_eq!(samples[100], 150.0);
        assert_eq!(samples[149], 199.0);
        assert_eq!(samples[150], 250.0);
    }

    #[test]
    fn test_trim_window() {
        let variant = ramp(800).time_compress(&modifier("s25 e75"));
        // chunk size floor(50/100/8*800) = 50
        assert_eq!(variant.len(), 400);
        assert_eq!(variant.channel(0)[0], 200.0);
        assert_eq!(variant.channel(0)[399], 599.0);
    }

    #[test]
    fn test_fractional_target_is_zero_padded() {
        // chunk size 10, target ceil(10 * (0.75 * 7 + 1)) = 63 frames, 10 + 7 * 7 copied
        let variant = ramp(80).time_compress(&modifier("t25"));
        assert_eq!(variant.len(), 63);
        assert_eq!(variant.channel(0)[58], 78.0);
        assert!(variant.channel(0)[59..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_channels_transformed_identically() {
        let left: Vec<f32> = (0..800).map(|i| i as f32).collect();
        let right: Vec<f32> = (0..800).map(|i| -(i as f32)).collect();
        let buffer = PcmBuffer::new(vec![left, right], 44100).unwrap();

        let variant = buffer.time_compress(&modifier("s10 e90 t20"));
        assert_eq!(variant.num_channels(), 2);
        assert_eq!(variant.sample_rate, 44100);
        for (l, r) in variant.channel(0).iter().zip(variant.channel(1)) {
            assert_eq!(*l, -*r);
        }
    }

    #[test_case("s60 e40" ; "start after end")]
    #[test_case("s100 e100" ; "empty window")]
    #[test_case("s90 e300" ; "end past clip")]
    #[test_case("t250" ; "compression over 100")]
    fn test_degenerate_modifiers_do_not_panic(text: &str) {
        let variant = ramp(800).derive_variant(&modifier(text));
        assert!(variant.len() <= 800 * 3);
    }

    #[test]
    fn test_start_after_end_is_empty() {
        assert!(ramp(800).time_compress(&modifier("s60 e40")).is_empty());
    }

    #[test]
    fn test_read_mono_interpolated() {
        let buffer = PcmBuffer::new(vec![vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]], 8000).unwrap();
        assert!((buffer.read_mono_interpolated(0.5) - 0.25).abs() < 1e-6);
        assert!((buffer.read_mono_interpolated(2.0) - 0.5).abs() < 1e-6);
        assert_eq!(buffer.read_mono_interpolated(3.0), 0.0);
        assert_eq!(buffer.read_mono_interpolated(-1.0), 0.0);
    }
}
