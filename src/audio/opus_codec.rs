//! Opus encoder/decoder fixed to the bridge geometry.
//!
//! - Encoder: 960 i16 samples (60 ms @ 16 kHz mono) → one Opus packet, VoIP mode
//! - Decoder: one Opus packet → up to 960 i16 samples
//!
//! Both carry codec state between frames, so each session owns exactly one of
//! each and never shares them across directions.

use super::stream_decoder::StreamDecoder;
use super::{FRAME_SIZE, SAMPLE_RATE};
use anyhow::Result;

// Largest packet libopus will produce for one frame is well under this.
const MAX_PACKET_BYTES: usize = 4000;

// ======================== Opus Encoder ========================

pub struct OpusEncoder {
    encoder: opus::Encoder,
}

impl OpusEncoder {
    pub fn new() -> Result<Self> {
        let encoder = opus::Encoder::new(SAMPLE_RATE, opus::Channels::Mono, opus::Application::Voip)?;
        Ok(Self { encoder })
    }

    /// Encode exactly one frame of PCM.
    ///
    /// Input length must equal [`FRAME_SIZE`].
    pub fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>> {
        if pcm.len() != FRAME_SIZE {
            anyhow::bail!("expected {} samples per frame, got {}", FRAME_SIZE, pcm.len());
        }

        let mut opus_buf = vec![0u8; MAX_PACKET_BYTES];
        let encoded_len = self.encoder.encode(pcm, &mut opus_buf)?;

        opus_buf.truncate(encoded_len);
        Ok(opus_buf)
    }
}

// ======================== Opus Decoder ========================

pub struct OpusDecoder {
    decoder: opus::Decoder,
}

impl OpusDecoder {
    pub fn new() -> Result<Self> {
        let decoder = opus::Decoder::new(SAMPLE_RATE, opus::Channels::Mono)?;
        Ok(Self { decoder })
    }

    /// Decode one Opus packet into mono PCM.
    ///
    /// Packets longer than one 60 ms frame are rejected by libopus, which
    /// matches the fixed frame geometry of the upstream protocol.
    pub fn decode(&mut self, opus_data: &[u8]) -> Result<Vec<i16>> {
        let mut pcm_buf = vec![0i16; FRAME_SIZE];
        let decoded = self.decoder.decode(opus_data, &mut pcm_buf, false)?;
        pcm_buf.truncate(decoded);
        Ok(pcm_buf)
    }
}

impl StreamDecoder for OpusDecoder {
    fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>> {
        OpusDecoder::decode(self, data)
    }
}
