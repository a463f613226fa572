//! Decoder seam for the downlink path.

use anyhow::Result;

/// A stateful decoder turning one compressed packet from the upstream server
/// into mono i16 PCM at the session sample rate.
///
/// One instance lives for the whole session so that codec state carries over
/// from packet to packet.
pub trait StreamDecoder: Send {
    fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>>;
}
