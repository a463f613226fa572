//! Canonical 44-byte WAV header for the fixed downlink format
//! (PCM, mono, 16-bit, 16 kHz).
//!
//! The header is written before the sample count is known, so the two size
//! fields are only correct after `patch_sizes` runs right before a flush.

use super::{BYTES_PER_SAMPLE, CHANNELS, SAMPLE_RATE};

pub const WAV_HEADER_LEN: usize = 44;

const BITS_PER_SAMPLE: u16 = (BYTES_PER_SAMPLE * 8) as u16;
const BLOCK_ALIGN: u16 = CHANNELS * BYTES_PER_SAMPLE as u16;
const BYTE_RATE: u32 = SAMPLE_RATE * BLOCK_ALIGN as u32;

/// Build a header declaring `total_samples` mono samples.
pub fn build_header(total_samples: u32) -> [u8; WAV_HEADER_LEN] {
    let mut header = [0u8; WAV_HEADER_LEN];

    // RIFF chunk descriptor
    header[0..4].copy_from_slice(b"RIFF");
    header[8..12].copy_from_slice(b"WAVE");

    // fmt sub-chunk
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes());
    header[22..24].copy_from_slice(&CHANNELS.to_le_bytes());
    header[24..28].copy_from_slice(&SAMPLE_RATE.to_le_bytes());
    header[28..32].copy_from_slice(&BYTE_RATE.to_le_bytes());
    header[32..34].copy_from_slice(&BLOCK_ALIGN.to_le_bytes());
    header[34..36].copy_from_slice(&BITS_PER_SAMPLE.to_le_bytes());

    // data sub-chunk
    header[36..40].copy_from_slice(b"data");

    patch_sizes(&mut header, total_samples);
    header
}

/// Rewrite the RIFF chunk size and data sub-chunk size in place.
///
/// `buffer` must start with a header produced by [`build_header`].
pub fn patch_sizes(buffer: &mut [u8], total_samples: u32) {
    let data_len = total_samples.wrapping_mul(BYTES_PER_SAMPLE as u32);
    buffer[4..8].copy_from_slice(&data_len.wrapping_add(36).to_le_bytes());
    buffer[40..44].copy_from_slice(&data_len.to_le_bytes());
}
