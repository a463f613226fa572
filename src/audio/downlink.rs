//! Downlink path: Opus packets from the upstream server are decoded and
//! accumulated into a streaming WAV buffer that is emitted to the client
//! either when it grows past [`FLUSH_THRESHOLD`] or when the server signals a
//! TTS stream boundary.
//!
//! Appending, patching the header and emitting all happen under one ordering
//! lock, so a flush always sends a header that matches the bytes after it.

use super::opus_codec::OpusDecoder;
use super::stream_decoder::StreamDecoder;
use super::wav::{self, WAV_HEADER_LEN};
use super::BYTES_PER_SAMPLE;
use anyhow::Result;
use futures_util::{Sink, SinkExt};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;

/// Header plus 32000 samples (2 s at 16 kHz), roughly one short utterance.
pub const FLUSH_THRESHOLD: usize = WAV_HEADER_LEN + 32000 * BYTES_PER_SAMPLE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamBoundary {
    Start,
    Stop,
}

struct DownlinkState {
    decoder: Box<dyn StreamDecoder>,
    buffer: Vec<u8>,
    is_first_audio: bool,
    total_samples: u32,
}

impl DownlinkState {
    fn append(&mut self, pcm: &[i16]) {
        if self.is_first_audio {
            self.buffer.extend_from_slice(&wav::build_header(0));
            self.is_first_audio = false;
        }
        self.buffer.reserve(pcm.len() * BYTES_PER_SAMPLE);
        for sample in pcm {
            self.buffer.extend_from_slice(&sample.to_le_bytes());
        }
        self.total_samples += pcm.len() as u32;
    }

    /// Patch the header and hand out the finished WAV, leaving the state empty.
    fn take_wav(&mut self) -> Vec<u8> {
        wav::patch_sizes(&mut self.buffer, self.total_samples);
        let wav = std::mem::take(&mut self.buffer);
        self.reset();
        wav
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.is_first_audio = true;
        self.total_samples = 0;
    }
}

pub struct DownlinkTranscoder {
    state: Mutex<DownlinkState>,
}

impl DownlinkTranscoder {
    pub fn new() -> Result<Self> {
        Ok(Self::with_decoder(Box::new(OpusDecoder::new()?)))
    }

    pub fn with_decoder(decoder: Box<dyn StreamDecoder>) -> Self {
        Self {
            state: Mutex::new(DownlinkState {
                decoder,
                buffer: Vec::with_capacity(FLUSH_THRESHOLD + 4096),
                is_first_audio: true,
                total_samples: 0,
            }),
        }
    }

    /// Decode one packet and append it to the pending WAV. Emits the buffer to
    /// `client` once it reaches [`FLUSH_THRESHOLD`].
    ///
    /// Decode failures are logged and the packet dropped; only a failed send
    /// is returned as an error. Returns whether a flush happened.
    pub async fn on_opus_frame<W>(&self, packet: &[u8], client: &mut W) -> Result<bool, W::Error>
    where
        W: Sink<Message> + Unpin,
    {
        let mut state = self.state.lock().await;

        let pcm = match state.decoder.decode(packet) {
            Ok(pcm) => pcm,
            Err(e) => {
                log::error!("Opus decode error: {}, packet length: {}", e, packet.len());
                return Ok(false);
            }
        };
        if pcm.is_empty() {
            return Ok(false);
        }

        state.append(&pcm);

        if state.buffer.len() >= FLUSH_THRESHOLD {
            let wav = state.take_wav();
            log::debug!("Flushing {} bytes of WAV at threshold", wav.len());
            client.send(Message::Binary(wav.into())).await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Flush whatever has accumulated beyond the bare header, then reset.
    ///
    /// On `Start` this delivers the tail of the previous utterance before the
    /// next one begins; on `Stop` it delivers the final partial utterance.
    pub async fn on_stream_boundary<W>(&self, kind: StreamBoundary, client: &mut W) -> Result<bool, W::Error>
    where
        W: Sink<Message> + Unpin,
    {
        let mut state = self.state.lock().await;

        if state.buffer.len() <= WAV_HEADER_LEN {
            state.reset();
            return Ok(false);
        }

        let wav = state.take_wav();
        log::debug!("Flushing {} bytes of WAV on TTS {:?}", wav.len(), kind);
        client.send(Message::Binary(wav.into())).await?;
        Ok(true)
    }

    /// Bytes currently held, header included.
    pub async fn buffered_len(&self) -> usize {
        self.state.lock().await.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::FRAME_SIZE;

    /// Emits a fixed-size block of a constant sample per packet; an empty
    /// packet is treated as corrupt.
    struct FixedDecoder;

    impl StreamDecoder for FixedDecoder {
        fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>> {
            if data.is_empty() {
                anyhow::bail!("corrupt packet");
            }
            Ok(vec![data[0] as i16; FRAME_SIZE])
        }
    }

    fn transcoder() -> DownlinkTranscoder {
        DownlinkTranscoder::with_decoder(Box::new(FixedDecoder))
    }

    fn binary(msg: &Message) -> &[u8] {
        match msg {
            Message::Binary(data) => data,
            other => panic!("expected binary message, got {other:?}"),
        }
    }

    fn le_u32(buf: &[u8], at: usize) -> u32 {
        u32::from_le_bytes(buf[at..at + 4].try_into().unwrap())
    }

    #[tokio::test]
    async fn threshold_triggers_exactly_one_flush() {
        let downlink = transcoder();
        let mut sent: Vec<Message> = Vec::new();

        // 44 + 33 * 1920 = 63404 < 64044 <= 44 + 34 * 1920
        for _ in 0..33 {
            assert!(!downlink.on_opus_frame(&[1], &mut sent).await.unwrap());
        }
        assert!(sent.is_empty());
        assert!(downlink.on_opus_frame(&[1], &mut sent).await.unwrap());

        assert_eq!(sent.len(), 1);
        assert_eq!(downlink.buffered_len().await, 0);

        let wav = binary(&sent[0]);
        let samples = 34 * FRAME_SIZE as u32;
        assert_eq!(wav.len(), WAV_HEADER_LEN + samples as usize * 2);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(le_u32(wav, 4), samples * 2 + 36);
        assert_eq!(le_u32(wav, 40), samples * 2);

        // State is fresh: the next packet starts a new header.
        downlink.on_opus_frame(&[2], &mut sent).await.unwrap();
        assert_eq!(downlink.buffered_len().await, WAV_HEADER_LEN + FRAME_SIZE * 2);
    }

    #[tokio::test]
    async fn boundary_flushes_pending_audio() {
        let downlink = transcoder();
        let mut sent: Vec<Message> = Vec::new();

        downlink.on_opus_frame(&[7], &mut sent).await.unwrap();
        downlink.on_opus_frame(&[7], &mut sent).await.unwrap();
        assert!(sent.is_empty());

        assert!(downlink.on_stream_boundary(StreamBoundary::Start, &mut sent).await.unwrap());
        assert_eq!(sent.len(), 1);
        let wav = binary(&sent[0]);
        assert_eq!(le_u32(wav, 40), 2 * FRAME_SIZE as u32 * 2);
        assert_eq!(i16::from_le_bytes([wav[44], wav[45]]), 7);
        assert_eq!(downlink.buffered_len().await, 0);
    }

    #[tokio::test]
    async fn boundary_on_empty_buffer_emits_nothing() {
        let downlink = transcoder();
        let mut sent: Vec<Message> = Vec::new();

        assert!(!downlink.on_stream_boundary(StreamBoundary::Stop, &mut sent).await.unwrap());
        assert!(!downlink.on_stream_boundary(StreamBoundary::Start, &mut sent).await.unwrap());
        assert!(sent.is_empty());
    }

    #[tokio::test]
    async fn corrupt_packet_is_dropped() {
        let downlink = transcoder();
        let mut sent: Vec<Message> = Vec::new();

        downlink.on_opus_frame(&[3], &mut sent).await.unwrap();
        assert!(!downlink.on_opus_frame(&[], &mut sent).await.unwrap());
        assert_eq!(downlink.buffered_len().await, WAV_HEADER_LEN + FRAME_SIZE * 2);

        downlink.on_stream_boundary(StreamBoundary::Stop, &mut sent).await.unwrap();
        assert_eq!(binary(&sent[0]).len(), WAV_HEADER_LEN + FRAME_SIZE * 2);
    }

    #[tokio::test]
    async fn decodes_real_opus_packets() {
        let downlink = DownlinkTranscoder::new().unwrap();
        let mut encoder = crate::audio::OpusEncoder::new().unwrap();
        let mut sent: Vec<Message> = Vec::new();

        for _ in 0..3 {
            let packet = encoder.encode(&[0i16; FRAME_SIZE]).unwrap();
            downlink.on_opus_frame(&packet, &mut sent).await.unwrap();
        }
        assert_eq!(downlink.buffered_len().await, WAV_HEADER_LEN + 3 * FRAME_SIZE * 2);
    }
}
