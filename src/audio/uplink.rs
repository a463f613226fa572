//! Uplink path: arbitrary-sized float32 PCM chunks from the browser are cut
//! into fixed 960-sample frames and Opus encoded one frame at a time.

use super::FRAME_SIZE;
use super::opus_codec::OpusEncoder;
use anyhow::Result;

const F32_BYTES: usize = 4;

pub struct UplinkEncoder {
    buffer: Vec<f32>,
    encoder: OpusEncoder,
}

impl UplinkEncoder {
    pub fn new() -> Result<Self> {
        Ok(Self {
            buffer: Vec::with_capacity(FRAME_SIZE * 2),
            encoder: OpusEncoder::new()?,
        })
    }

    /// Append a chunk of little-endian f32 samples and encode every complete
    /// frame now available. The remainder stays buffered for the next call.
    ///
    /// A frame that fails to encode is logged and dropped.
    pub fn on_pcm_chunk(&mut self, raw: &[u8]) -> Vec<Vec<u8>> {
        if raw.len() < F32_BYTES {
            log::warn!("Received empty audio chunk ({} bytes)", raw.len());
            return Vec::new();
        }

        let samples = raw.chunks_exact(F32_BYTES);
        if !samples.remainder().is_empty() {
            log::warn!(
                "Dropping {} trailing bytes that do not form a whole f32 sample",
                samples.remainder().len()
            );
        }
        self.buffer.extend(samples.map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])));

        let mut packets = Vec::new();
        let mut consumed = 0;
        while self.buffer.len() - consumed >= FRAME_SIZE {
            let frame = &self.buffer[consumed..consumed + FRAME_SIZE];
            consumed += FRAME_SIZE;

            let pcm = to_i16(frame);
            match self.encoder.encode(&pcm) {
                Ok(packet) => packets.push(packet),
                Err(e) => log::error!("Opus encode error: {}", e),
            }
        }
        self.buffer.drain(..consumed);

        packets
    }

    /// Discard any buffered samples, e.g. after the client interrupts playback.
    pub fn reset(&mut self) {
        if !self.buffer.is_empty() {
            log::debug!("Discarding {} buffered uplink samples", self.buffer.len());
        }
        self.buffer.clear();
    }

    /// Samples waiting for a frame boundary. Always below one frame between calls.
    pub fn pending_samples(&self) -> usize {
        self.buffer.len()
    }
}

// Scale to i16 and truncate toward zero; `as` saturates out-of-range values.
fn to_i16(frame: &[f32]) -> Vec<i16> {
    frame.iter().map(|s| (s * 32767.0) as i16).collect()
}
