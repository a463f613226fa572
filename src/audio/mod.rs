//! audio - Transcoding between the browser's raw PCM and the device protocol's Opus.
//!
//! Uplink: float32 PCM chunks → 960-sample frames → Opus packets.
//! Downlink: Opus packets → i16 PCM → streaming WAV buffers.
//!
//! Sample rate, channel count and frame size are fixed; nothing is negotiated.

pub mod downlink;
mod opus_codec;
pub mod stream_decoder;
pub mod uplink;
pub mod wav;

pub use downlink::{DownlinkTranscoder, StreamBoundary};
pub use opus_codec::{OpusDecoder, OpusEncoder};
pub use stream_decoder::StreamDecoder;
pub use uplink::UplinkEncoder;

pub const SAMPLE_RATE: u32 = 16000;
pub const CHANNELS: u16 = 1;
/// 60 ms at 16 kHz.
pub const FRAME_SIZE: usize = 960;
pub const BYTES_PER_SAMPLE: usize = 2;
