//! Per-chunk audio encoding.
//!
//! Every chunk is encoded independently so the receiver can decode any chunk
//! without state from the previous one.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Encoding of an outgoing audio chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkEncoding {
    /// Raw little-endian 16-bit PCM. Most compact, but the receiver has to be
    /// told the sample rate and channel count out of band.
    Linear16,
    /// RIFF/WAVE container around 16-bit PCM. Self-describing.
    Wav,
}

/// Candidates in order of preference, most compact first.
const PREFERENCE: [ChunkEncoding; 2] = [ChunkEncoding::Linear16, ChunkEncoding::Wav];

impl ChunkEncoding {
    /// Default container used when no candidate is supported.
    pub const FALLBACK: ChunkEncoding = ChunkEncoding::Wav;

    /// Pick the most compact encoding the receiver supports.
    pub fn probe(supported: impl Fn(ChunkEncoding) -> bool) -> ChunkEncoding {
        PREFERENCE
            .into_iter()
            .find(|encoding| supported(*encoding))
            .unwrap_or(Self::FALLBACK)
    }

    /// Parse an encoding name as used in configuration.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "linear16" | "pcm" | "pcm16" => Some(ChunkEncoding::Linear16),
            "wav" | "wave" => Some(ChunkEncoding::Wav),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkEncoding::Linear16 => "linear16",
            ChunkEncoding::Wav => "wav",
        }
    }

    /// Encode interleaved samples into one self-contained chunk.
    pub fn encode(
        &self,
        samples: &[i16],
        sample_rate: u32,
        channels: u16,
    ) -> Result<Bytes, hound::Error> {
        match self {
            ChunkEncoding::Linear16 => {
                let mut out = Vec::with_capacity(samples.len() * 2);
                for sample in samples {
                    out.extend_from_slice(&sample.to_le_bytes());
                }
                Ok(Bytes::from(out))
            }
            ChunkEncoding::Wav => {
                let spec = hound::WavSpec {
                    channels,
                    sample_rate,
                    bits_per_sample: 16,
                    sample_format: hound::SampleFormat::Int,
                };
                let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
                {
                    let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
                    for sample in samples {
                        writer.write_sample(*sample)?;
                    }
                    writer.finalize()?;
                }
                Ok(Bytes::from(cursor.into_inner()))
            }
        }
    }
}

impl std::fmt::Display for ChunkEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_prefers_compact() {
        assert_eq!(ChunkEncoding::probe(|_| true), ChunkEncoding::Linear16);
        assert_eq!(
            ChunkEncoding::probe(|e| e == ChunkEncoding::Wav),
            ChunkEncoding::Wav
        );
    }

    #[test]
    fn test_probe_falls_back_to_container() {
        assert_eq!(ChunkEncoding::probe(|_| false), ChunkEncoding::FALLBACK);
    }

    #[test]
    fn test_linear16_is_little_endian() {
        let bytes = ChunkEncoding::Linear16
            .encode(&[1, -2, 0x1234], 16000, 1)
            .unwrap();
        assert_eq!(&bytes[..], &[0x01, 0x00, 0xFE, 0xFF, 0x34, 0x12]);
    }

    #[test]
    fn test_wav_chunk_is_self_describing() {
        let bytes = ChunkEncoding::Wav.encode(&[10, 20, 30, 40], 24000, 2).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");

        let reader = hound::WavReader::new(Cursor::new(bytes.to_vec())).unwrap();
        assert_eq!(reader.spec().sample_rate, 24000);
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.len(), 4);
    }

    #[test]
    fn test_parse() {
        assert_eq!(ChunkEncoding::parse("PCM16"), Some(ChunkEncoding::Linear16));
        assert_eq!(ChunkEncoding::parse("wav"), Some(ChunkEncoding::Wav));
        assert_eq!(ChunkEncoding::parse("webm"), None);
    }

    #[test]
    fn test_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ChunkEncoding::Linear16).unwrap(),
            "\"linear16\""
        );
    }
}
