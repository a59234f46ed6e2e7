//! Audio I/O for Voxline
//!
//! Decodes fetched WAV clips into `PcmBuffer`s and encodes rendered buffers
//! into the canonical 16-bit PCM WAV container.
//!
//! Clips keep their native sample rate; resampling happens when a word is
//! rendered.

use std::io::Cursor;

use chrono::{DateTime, Utc};
use hound::{SampleFormat, WavReader};

use crate::engine::buffer::PcmBuffer;
use crate::error::{Result, VoxError};

/// Size of the canonical RIFF/WAVE header
pub const WAV_HEADER_LEN: usize = 44;

/// Decode WAV bytes into a buffer
///
/// # Arguments
/// * `key` - Sound key, used for error reporting
/// * `bytes` - Complete WAV file contents
///
/// # Errors
/// * `DecodeFailure` - If the bytes are not a readable WAV file
pub fn decode_wav(key: &str, bytes: &[u8]) -> Result<PcmBuffer> {
    let reader = WavReader::new(Cursor::new(bytes)).map_err(|e| VoxError::DecodeFailure {
        key: key.to_string(),
        reason: format!("Failed to open WAV data: {}", e),
        source: Some(e),
    })?;

    let spec = reader.spec();
    let channels = spec.channels as usize;
    if channels == 0 {
        return Err(VoxError::DecodeFailure {
            key: key.to_string(),
            reason: "WAV declares zero channels".to_string(),
            source: None,
        });
    }

    let interleaved = read_samples_as_f32(key, reader, spec.bits_per_sample, spec.sample_format)?;
    let buffer = PcmBuffer::new(deinterleave(&interleaved, channels), spec.sample_rate)
        .map_err(|_| VoxError::DecodeFailure {
            key: key.to_string(),
            reason: "truncated sample frame".to_string(),
            source: None,
        })?;

    Ok(buffer)
}

/// Encode a buffer as a 16-bit PCM WAV file
///
/// Samples are clamped to `[-1, 1]`, negative values scaled by 32768 and
/// non-negative values by 32767, then truncated toward zero. The output is
/// always `44 + frames * channels * 2` bytes.
///
/// # Example
/// ```
/// use voxline::engine::{encode_wav, PcmBuffer};
///
/// let wav = encode_wav(&PcmBuffer::silent(22050, 1, 22050));
/// assert_eq!(wav.len(), 44144);
/// assert_eq!(&wav[0..4], b"RIFF");
/// ```
pub fn encode_wav(buffer: &PcmBuffer) -> Vec<u8> {
    let channels = buffer.num_channels() as u16;
    let sample_rate = buffer.sample_rate;
    let bits_per_sample: u16 = 16;
    let byte_rate = sample_rate * 2 * channels as u32;
    let block_align = channels * 2;
    let data_size = (buffer.len() * channels as usize * 2) as u32;

    let mut out = Vec::with_capacity(WAV_HEADER_LEN + data_size as usize);

    // RIFF header
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_size).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    // fmt chunk
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits_per_sample.to_le_bytes());

    // data chunk
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_size.to_le_bytes());
    for sample in interleave(&buffer.samples) {
        out.extend_from_slice(&float_to_i16(sample).to_le_bytes());
    }

    out
}

/// Export file name embedding a UTC timestamp
///
/// # Example
/// ```
/// use chrono::{TimeZone, Utc};
/// use voxline::engine::suggested_filename;
///
/// let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
/// assert_eq!(
///     suggested_filename("sentences recording", at),
///     "sentences recording 2024-03-09_14-05-07.wav"
/// );
/// ```
pub fn suggested_filename(prefix: &str, at: DateTime<Utc>) -> String {
    format!("{} {}.wav", prefix, at.format("%Y-%m-%d_%H-%M-%S"))
}

#[inline]
fn float_to_i16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    if clamped < 0.0 {
        (clamped * 32768.0) as i16
    } else {
        (clamped * 32767.0) as i16
    }
}

// ============================================================================
// Internal helper functions
// ============================================================================

/// Read samples from WAV reader and convert to f32
fn read_samples_as_f32<R: std::io::Read>(
    key: &str,
    mut reader: WavReader<R>,
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> Result<Vec<f32>> {
    let decode_err = |e: hound::Error| VoxError::DecodeFailure {
        key: key.to_string(),
        reason: format!("Failed to read {}-bit samples: {}", bits_per_sample, e),
        source: Some(e),
    };

    match sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(decode_err),
        SampleFormat::Int => match bits_per_sample {
            8 => reader
                .samples::<i8>()
                .map(|s| s.map(|v| v as f32 / 128.0))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(decode_err),
            16 => reader
                .samples::<i16>()
                .map(|s| s.map(|v| v as f32 / 32768.0))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(decode_err),
            // 24-bit stored as i32 in hound
            24 => reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / 8388608.0))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(decode_err),
            32 => reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / 2147483648.0))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(decode_err),
            _ => Err(VoxError::DecodeFailure {
                key: key.to_string(),
                reason: format!("{}-bit integer audio is not supported", bits_per_sample),
                source: None,
            }),
        },
    }
}

/// De-interleave samples from [L,R,L,R,...] to [[L,L,...], [R,R,...]]
fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = samples.len() / channels;
    let mut result = vec![Vec::with_capacity(frames); channels];

    for (i, sample) in samples.iter().enumerate() {
        result[i % channels].push(*sample);
    }

    result
}

/// Interleave channels from [[L,L,...], [R,R,...]] to [L,R,L,R,...]
fn interleave(channels: &[Vec<f32>]) -> Vec<f32> {
    if channels.is_empty() {
        return Vec::new();
    }

    let num_channels = channels.len();
    let frames = channels[0].len();
    let mut result = Vec::with_capacity(frames * num_channels);

    for frame in 0..frames {
        for channel in channels {
            result.push(channel[frame]);
        }
    }

    result
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};
    use test_case::test_case;

    fn wav_bytes(spec: WavSpec, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            for &s in samples {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_encode_one_second_silence() {
        let wav = encode_wav(&PcmBuffer::silent(22050, 1, 22050));

        assert_eq!(wav.len(), 44144);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(&wav[36..40], b"data");
        assert!(wav[44..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_encode_header_fields() {
        let wav = encode_wav(&PcmBuffer::silent(10, 2, 44100));

        let riff_len = u32::from_le_bytes([wav[4], wav[5], wav[6], wav[7]]);
        assert_eq!(riff_len as usize, wav.len() - 8);
        assert_eq!(u16::from_le_bytes([wav[20], wav[21]]), 1);
        assert_eq!(u16::from_le_bytes([wav[22], wav[23]]), 2);
        assert_eq!(u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]), 44100);
        assert_eq!(
            u32::from_le_bytes([wav[28], wav[29], wav[30], wav[31]]),
            44100 * 2 * 2
        );
        assert_eq!(u16::from_le_bytes([wav[32], wav[33]]), 4);
        assert_eq!(u16::from_le_bytes([wav[34], wav[35]]), 16);
        let data_len = u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]);
        assert_eq!(data_len, 40);
        assert_eq!(wav.len(), 44 + 40);
    }

    #[test_case(1.0, 32767 ; "full positive")]
    #[test_case(-1.0, -32768 ; "full negative")]
    #[test_case(2.5, 32767 ; "clamped positive")]
    #[test_case(-7.0, -32768 ; "clamped negative")]
    #[test_case(0.5, 16383 ; "truncated positive")]
    #[test_case(-0.5, -16384 ; "negative scale")]
    #[test_case(-0.00001, 0 ; "truncates toward zero")]
    #[test_case(0.0, 0 ; "zero")]
    fn test_float_to_i16(sample: f32, expected: i16) {
        assert_eq!(float_to_i16(sample), expected);
    }

    #[test]
    fn test_encode_interleaves_channels() {
        let buffer = PcmBuffer::new(vec![vec![1.0, 0.0], vec![-1.0, 0.5]], 8000).unwrap();
        let wav = encode_wav(&buffer);
        let samples: Vec<i16> = wav[44..]
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(samples, vec![32767, -32768, 0, 16383]);
    }

    #[test]
    fn test_encode_is_readable_by_hound() {
        let buffer = PcmBuffer::mono(vec![0.0, 0.25, -0.25, 0.9], 22050);
        let wav = encode_wav(&buffer);

        let mut reader = WavReader::new(Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 22050);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 4);
        assert_eq!(samples[1], 8191);
    }

    #[test]
    fn test_decode_stereo_16bit() {
        let spec = WavSpec {
            channels: 2,
            sample_rate: 11025,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let bytes = wav_bytes(spec, &[16384, -16384, 0, 32767]);

        let buffer = decode_wav("vox/test", &bytes).unwrap();
        assert_eq!(buffer.num_channels(), 2);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.sample_rate, 11025);
        assert_eq!(buffer.channel(0), &[0.5, 0.0]);
        assert_eq!(buffer.channel(1)[0], -0.5);
    }

    #[test]
    fn test_decode_garbage_is_decode_failure() {
        match decode_wav("vox/bad", b"definitely not a wav file") {
            Err(VoxError::DecodeFailure { key, .. }) => assert_eq!(key, "vox/bad"),
            other => panic!("Expected DecodeFailure, got: {:?}", other),
        }
    }

    #[test]
    fn test_interleave_deinterleave_roundtrip() {
        let left = vec![1.0, 2.0, 3.0, 4.0];
        let right = vec![5.0, 6.0, 7.0, 8.0];
        let channels = vec![left.clone(), right.clone()];

        let interleaved = interleave(&channels);
        assert_eq!(interleaved, vec![1.0, 5.0, 2.0, 6.0, 3.0, 7.0, 4.0, 8.0]);

        let deinterleaved = deinterleave(&interleaved, 2);
        assert_eq!(deinterleaved[0], left);
        assert_eq!(deinterleaved[1], right);
    }
}
