//! Low-level parsing of Plexon .plx binary structures.
//!
//! All multi-byte fields are little-endian. This module holds the fixed
//! structure sizes and the field extractors shared by the header decoder and
//! the block scanner.

use byteorder::{ByteOrder, LittleEndian};

/// "PLEX" read as a little-endian u32.
pub const MAGIC_NUMBER: u32 = 0x5845_4C50;

/// File versions this decoder has been validated against.
pub const SUPPORTED_VERSIONS: [i32; 2] = [105, 106];

/// Size of the fixed part of the file header, before the count tables.
pub const FIXED_HEADER_SIZE: usize = 256;
/// Number of channel slots in the per-channel count tables.
pub const COUNT_CHANNELS: usize = 130;
/// Number of unit slots per channel in the count tables (unsorted + 4).
pub const COUNT_UNITS: usize = 5;
/// Number of entries in the per-event-number count table.
pub const EVENT_COUNT_SLOTS: usize = 512;
/// First slot of the event count table that holds continuous sample counts.
pub const AD_COUNT_FIRST_SLOT: usize = 300;

/// Total size of the file header.
pub const FILE_HEADER_SIZE: usize =
    FIXED_HEADER_SIZE + 2 * COUNT_CHANNELS * COUNT_UNITS * 4 + EVENT_COUNT_SLOTS * 4;
/// Size of one DSP channel descriptor.
pub const CHANNEL_DESCRIPTOR_SIZE: usize = 1020;
/// Size of one event channel descriptor.
pub const EVENT_DESCRIPTOR_SIZE: usize = 296;
/// Size of one slow (continuous) channel descriptor.
pub const SLOW_CHANNEL_DESCRIPTOR_SIZE: usize = 296;
/// Size of a data block header.
pub const BLOCK_HEADER_SIZE: usize = 16;

/// Zero-to-peak input range of the slow channel ADC, in volts.
pub const AD_FULL_SCALE_VOLTS: f64 = 5.0;
/// Number of ADC codes spanning the zero-to-peak range.
pub const AD_CODE_SPAN: f64 = 2048.0;

// ============================================================================
// Data block header (16 bytes)
// [0] type i16 | [2] timestamp high u16 | [4] timestamp low u32 |
// [8] channel i16 | [10] unit i16 | [12] waveform count i16 |
// [14] samples per waveform i16
// ============================================================================

/// A raw data block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub type_code: i16,
    pub timestamp_high: u16,
    pub timestamp_low: u32,
    pub channel: i16,
    pub unit: i16,
    pub waveform_count: i16,
    pub samples_per_waveform: i16,
}

impl BlockHeader {
    /// Decodes a block header from exactly [`BLOCK_HEADER_SIZE`] bytes.
    #[inline]
    pub fn from_bytes(bytes: &[u8; BLOCK_HEADER_SIZE]) -> Self {
        Self {
            type_code: LittleEndian::read_i16(&bytes[0..2]),
            timestamp_high: LittleEndian::read_u16(&bytes[2..4]),
            timestamp_low: LittleEndian::read_u32(&bytes[4..8]),
            channel: LittleEndian::read_i16(&bytes[8..10]),
            unit: LittleEndian::read_i16(&bytes[10..12]),
            waveform_count: LittleEndian::read_i16(&bytes[12..14]),
            samples_per_waveform: LittleEndian::read_i16(&bytes[14..16]),
        }
    }

    /// Returns the composed 40-bit timestamp in ticks.
    #[inline]
    pub fn timestamp(&self) -> u64 {
        compose_timestamp(self.timestamp_high, self.timestamp_low)
    }

    /// Returns the number of 16-bit samples following the header.
    ///
    /// `None` when either count is negative, which no valid writer produces.
    #[inline]
    pub fn sample_count(&self) -> Option<usize> {
        let waveforms = usize::try_from(self.waveform_count).ok()?;
        let samples = usize::try_from(self.samples_per_waveform).ok()?;
        Some(waveforms * samples)
    }

    /// Returns the payload length in bytes.
    #[inline]
    pub fn payload_len(&self) -> Option<usize> {
        self.sample_count().map(|n| n * 2)
    }
}

/// Outcome of reading a block header at some offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRead {
    /// A complete header was decoded.
    Header(BlockHeader),
    /// Fewer than 16 bytes remain; the data region is finished.
    EndOfData,
}

/// Reads the block header starting at `offset`.
#[inline]
pub fn read_block_header(data: &[u8], offset: usize) -> BlockRead {
    let header = offset
        .checked_add(BLOCK_HEADER_SIZE)
        .and_then(|end| data.get(offset..end))
        .and_then(|bytes| <&[u8; BLOCK_HEADER_SIZE]>::try_from(bytes).ok());

    match header {
        Some(bytes) => BlockRead::Header(BlockHeader::from_bytes(bytes)),
        None => BlockRead::EndOfData,
    }
}

/// Combines the timestamp fragments as `high << 32 | low`.
#[inline]
pub fn compose_timestamp(high: u16, low: u32) -> u64 {
    ((high as u64) << 32) | low as u64
}

// ============================================================================
// Payload samples
// ============================================================================

/// Iterates over the 16-bit signed samples of a payload.
#[inline]
pub fn samples(payload: &[u8]) -> impl Iterator<Item = i16> + '_ {
    payload.chunks_exact(2).map(LittleEndian::read_i16)
}

/// Scales a raw slow-channel ADC code to volts for the given channel gain.
#[inline]
pub fn ad_value(raw: i16, gain: i32) -> f64 {
    raw as f64 * AD_FULL_SCALE_VOLTS / AD_CODE_SPAN / gain as f64
}

/// Decodes a fixed-length, NUL-padded text field.
pub fn fixed_str(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim_end().to_string()
}
