//! Decoding of assistant audio segments.
//!
//! EVI delivers each `audio_output` as a complete WAV file. Segments are
//! normalized to interleaved 16-bit PCM so sinks only deal with one format.

use std::io::Cursor;
use std::time::Duration;
use thiserror::Error;

/// A single malformed playback segment.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The payload was not valid base64.
    #[error("Invalid base64 audio payload: {0}")]
    InvalidBase64(String),

    /// The payload was not a readable WAV file.
    #[error("Invalid WAV data: {0}")]
    InvalidWav(String),

    /// The WAV file used a sample format we cannot convert.
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// The WAV file contained no samples.
    #[error("Audio segment is empty")]
    Empty,
}

/// Decoded audio ready for output.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSegment {
    /// Position in receipt order, starting at 1.
    pub sequence: u64,
    /// Interleaved 16-bit samples.
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PlaybackSegment {
    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Playback length at the native sample rate.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }
}

/// Decode one WAV payload into a [`PlaybackSegment`].
pub fn decode_wav(bytes: &[u8], sequence: u64) -> Result<PlaybackSegment, DecodeError> {
    let mut reader =
        hound::WavReader::new(Cursor::new(bytes)).map_err(|e| DecodeError::InvalidWav(e.to_string()))?;
    let spec = reader.spec();

    let samples: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .collect::<Result<_, _>>()
            .map_err(|e| DecodeError::InvalidWav(e.to_string()))?,
        (hound::SampleFormat::Int, bits @ (8 | 24 | 32)) => {
            let shift = bits as i32 - 16;
            reader
                .samples::<i32>()
                .map(|s| {
                    s.map(|v| {
                        if shift >= 0 {
                            (v >> shift) as i16
                        } else {
                            (v << -shift) as i16
                        }
                    })
                })
                .collect::<Result<_, _>>()
                .map_err(|e| DecodeError::InvalidWav(e.to_string()))?
        }
        (hound::SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect::<Result<_, _>>()
            .map_err(|e| DecodeError::InvalidWav(e.to_string()))?,
        (format, bits) => {
            return Err(DecodeError::UnsupportedFormat(format!(
                "{format:?} {bits}-bit"
            )));
        }
    };

    if samples.is_empty() {
        return Err(DecodeError::Empty);
    }

    Ok(PlaybackSegment {
        sequence,
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav(spec: hound::WavSpec, write: impl FnOnce(&mut hound::WavWriter<&mut Cursor<Vec<u8>>>)) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            write(&mut writer);
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn spec(bits: u16, format: hound::SampleFormat) -> hound::WavSpec {
        hound::WavSpec {
            channels: 1,
            sample_rate: 24000,
            bits_per_sample: bits,
            sample_format: format,
        }
    }

    #[test]
    fn test_decode_pcm16() {
        let bytes = wav(spec(16, hound::SampleFormat::Int), |w| {
            for s in [0i16, 100, -100, i16::MAX] {
                w.write_sample(s).unwrap();
            }
        });
        let segment = decode_wav(&bytes, 3).unwrap();
        assert_eq!(segment.sequence, 3);
        assert_eq!(segment.samples, vec![0, 100, -100, i16::MAX]);
        assert_eq!(segment.sample_rate, 24000);
    }

    #[test]
    fn test_decode_float_is_scaled() {
        let bytes = wav(spec(32, hound::SampleFormat::Float), |w| {
            for s in [0.0f32, 1.0, -1.0, 2.0] {
                w.write_sample(s).unwrap();
            }
        });
        let segment = decode_wav(&bytes, 1).unwrap();
        assert_eq!(segment.samples, vec![0, i16::MAX, -i16::MAX, i16::MAX]);
    }

    #[test]
    fn test_decode_24_bit() {
        let bytes = wav(spec(24, hound::SampleFormat::Int), |w| {
            w.write_sample(0x12_3400i32).unwrap();
        });
        let segment = decode_wav(&bytes, 1).unwrap();
        assert_eq!(segment.samples, vec![0x1234]);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode_wav(b"definitely not a wav file", 1).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidWav(_)));
    }

    #[test]
    fn test_decode_rejects_empty() {
        let bytes = wav(spec(16, hound::SampleFormat::Int), |_| {});
        assert_eq!(decode_wav(&bytes, 1).unwrap_err(), DecodeError::Empty);
    }

    #[test]
    fn test_segment_duration() {
        let segment = PlaybackSegment {
            sequence: 1,
            samples: vec![0; 48000],
            sample_rate: 24000,
            channels: 2,
        };
        assert_eq!(segment.frames(), 24000);
        assert_eq!(segment.duration(), Duration::from_secs(1));
    }
}
