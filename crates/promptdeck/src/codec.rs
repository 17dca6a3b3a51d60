//! Stateless conversions between base64 text, PCM16 bytes and float audio.
//!
//! Generated audio arrives as base64 text of interleaved little-endian
//! 16-bit samples. Decoding yields an [`AudioBuffer`] with one sample vector
//! per channel, scaled to `[-1.0, 1.0)`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

/// Scale between i16 sample values and normalized floats.
const PCM16_SCALE: f32 = 32768.0;

/// Mime type attached to encoded capture blobs.
pub const BLOB_MIME_TYPE: &str = "audio/pcm;rate=16000";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("invalid base64: {0}")]
    InvalidBase64(String),

    #[error("malformed audio: {len} bytes is not a whole number of {channels}-channel PCM16 frames")]
    MalformedAudio { len: usize, channels: u16 },
}

/// Decoded multichannel audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub sample_rate: u32,
    /// Channel-major sample vectors, all the same length.
    pub channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    pub fn silent(sample_rate: u32, channels: u16, frames: usize) -> Self {
        Self {
            sample_rate,
            channels: vec![vec![0.0; frames]; channels as usize],
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    /// Duration in seconds at the buffer's sample rate.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Sample at `frame` for `channel`, zero when out of range.
    #[inline]
    pub fn sample(&self, channel: usize, frame: usize) -> f32 {
        self.channels
            .get(channel)
            .and_then(|c| c.get(frame))
            .copied()
            .unwrap_or(0.0)
    }
}

/// Encoded audio payload for transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    pub data: String,
    pub mime_type: String,
}

pub fn text_from_bytes(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn bytes_from_text(text: &str) -> Result<Vec<u8>, CodecError> {
    STANDARD
        .decode(text)
        .map_err(|e| CodecError::InvalidBase64(e.to_string()))
}

/// Convert normalized floats to little-endian PCM16, saturating out-of-range input.
pub fn pcm16_from_float(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        // `as` truncates toward zero and saturates
        let v = (s * PCM16_SCALE) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// De-interleave little-endian PCM16 into a float [`AudioBuffer`].
pub fn float_from_pcm16(
    bytes: &[u8],
    sample_rate: u32,
    channels: u16,
) -> Result<AudioBuffer, CodecError> {
    let frame_bytes = channels as usize * 2;
    if channels == 0 || bytes.len() % frame_bytes != 0 {
        return Err(CodecError::MalformedAudio {
            len: bytes.len(),
            channels,
        });
    }

    let frames = bytes.len() / frame_bytes;
    let mut buffer = AudioBuffer::silent(sample_rate, channels, frames);

    for (i, pair) in bytes.chunks_exact(2).enumerate() {
        let value = i16::from_le_bytes([pair[0], pair[1]]);
        let channel = i % channels as usize;
        let frame = i / channels as usize;
        buffer.channels[channel][frame] = value as f32 / PCM16_SCALE;
    }

    Ok(buffer)
}

/// Decode one base64 chunk of generated audio.
///
/// Any failure, including bad base64, is reported as `MalformedAudio`.
pub fn decode_chunk(text: &str, sample_rate: u32, channels: u16) -> Result<AudioBuffer, CodecError> {
    let bytes = bytes_from_text(text).map_err(|_| CodecError::MalformedAudio {
        len: text.len(),
        channels,
    })?;
    float_from_pcm16(&bytes, sample_rate, channels)
}

/// Encode mono capture samples as a base64 PCM16 blob.
pub fn create_blob(samples: &[f32]) -> Blob {
    Blob {
        data: text_from_bytes(&pcm16_from_float(samples)),
        mime_type: BLOB_MIME_TYPE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interleave(buffer: &AudioBuffer) -> Vec<f32> {
        let mut out = Vec::new();
        for frame in 0..buffer.frames() {
            for ch in 0..buffer.channel_count() {
                out.push(buffer.sample(ch, frame));
            }
        }
        out
    }

    #[test]
    fn test_round_trip_within_one_step() {
        let samples: Vec<f32> = (0..960)
            .map(|i| ((i as f32) * 0.013).sin() * 0.9)
            .collect();

        let bytes = pcm16_from_float(&samples);
        let text = text_from_bytes(&bytes);
        let buffer = decode_chunk(&text, 48000, 2).unwrap();

        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.frames(), 480);
        for (orig, decoded) in samples.iter().zip(interleave(&buffer)) {
            assert!((orig - decoded).abs() <= 1.0 / 32768.0, "{orig} vs {decoded}");
        }
    }

    #[test]
    fn test_deinterleave_order() {
        // L=1, R=-1, L=2, R=-2 (raw i16)
        let bytes: Vec<u8> = [1i16, -1, 2, -2]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let buffer = float_from_pcm16(&bytes, 48000, 2).unwrap();
        assert_eq!(buffer.channels[0], vec![1.0 / 32768.0, 2.0 / 32768.0]);
        assert_eq!(buffer.channels[1], vec![-1.0 / 32768.0, -2.0 / 32768.0]);
    }

    #[test]
    fn test_saturation() {
        let bytes = pcm16_from_float(&[1.5, -1.5, 1.0]);
        let values: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|p| i16::from_le_bytes([p[0], p[1]]))
            .collect();
        assert_eq!(values, vec![i16::MAX, i16::MIN, i16::MAX]);
    }

    #[test]
    fn test_odd_length_is_malformed() {
        let err = float_from_pcm16(&[0, 0, 0], 48000, 2).unwrap_err();
        assert_eq!(err, CodecError::MalformedAudio { len: 3, channels: 2 });
    }

    #[test]
    fn test_bad_base64_is_malformed_audio() {
        let err = decode_chunk("not base64!!", 48000, 2).unwrap_err();
        assert!(matches!(err, CodecError::MalformedAudio { .. }));
        assert!(matches!(
            bytes_from_text("not base64!!"),
            Err(CodecError::InvalidBase64(_))
        ));
    }

    #[test]
    fn test_duration() {
        let buffer = AudioBuffer::silent(48000, 2, 96000);
        assert_eq!(buffer.duration(), 2.0);
        assert_eq!(AudioBuffer::silent(48000, 2, 0).duration(), 0.0);
    }

    #[test]
    fn test_create_blob() {
        let blob = create_blob(&[0.0, 0.5]);
        assert_eq!(blob.mime_type, "audio/pcm;rate=16000");
        let bytes = bytes_from_text(&blob.data).unwrap();
        assert_eq!(bytes, vec![0, 0, 0x00, 0x40]);
    }
}
