//! Core types for decoded Plexon data.
//!
//! This module defines the record variants produced by the block scanner and
//! the columnar shapes shared by file decoding and live acquisition polls.

/// Channel number carrying strobed 15-bit words.
pub const STROBED_CHANNEL: u16 = 257;
/// Channel number of the recording start marker.
pub const START_CHANNEL: u16 = 258;
/// Channel number of the recording stop marker.
pub const STOP_CHANNEL: u16 = 259;
/// Channel number of the recording pause marker.
pub const PAUSE_CHANNEL: u16 = 260;
/// Channel number of the recording resume marker.
pub const RESUME_CHANNEL: u16 = 261;

/// Data block record types.
///
/// The type code is the first field of every 16-byte block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Single electrode spike waveform (1)
    Spike = 1,
    /// Stereotrode waveform, reserved (2)
    Stereotrode = 2,
    /// Tetrode waveform, reserved (3)
    Tetrode = 3,
    /// External digital event (4)
    ExternalEvent = 4,
    /// Continuous A/D samples (5)
    AdData = 5,
}

impl RecordType {
    /// Attempts to parse a record type from the on-disk type code.
    #[inline]
    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(Self::Spike),
            2 => Some(Self::Stereotrode),
            3 => Some(Self::Tetrode),
            4 => Some(Self::ExternalEvent),
            5 => Some(Self::AdData),
            _ => None,
        }
    }
}

/// A spike waveform record.
///
/// Only the header fields are kept; the waveform payload is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpikeRecord {
    /// DSP channel number, 1-based
    pub channel: u16,
    /// Sorted unit id; 0 means unsorted
    pub unit: u16,
    /// 40-bit timestamp in acquisition clock ticks
    pub timestamp: u64,
    /// Number of 16-bit samples in the payload
    pub sample_count: usize,
}

/// An external digital event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalEventRecord {
    /// Event channel number (bit channel, or one of the special channels)
    pub channel: u16,
    /// Strobe value, or 0 for plain events
    pub value: u16,
    /// 40-bit timestamp in acquisition clock ticks
    pub timestamp: u64,
    /// Number of 16-bit samples in the payload
    pub sample_count: usize,
}

/// One continuous sample scaled to volts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdSample {
    /// Sample time in seconds
    pub timestamp: f64,
    /// Physical value in volts
    pub value: f64,
}

/// A block of continuous A/D samples from one slow channel.
#[derive(Debug, Clone, PartialEq)]
pub struct AdSampleBlock {
    /// Slow channel number, 0-based
    pub channel: u16,
    /// Timestamp of the first sample in acquisition clock ticks
    pub timestamp: u64,
    /// Number of 16-bit samples in the payload
    pub sample_count: usize,
    /// Decoded samples
    pub samples: Vec<AdSample>,
}

/// A classified data block.
#[derive(Debug, Clone, PartialEq)]
pub enum DataBlockRecord {
    Spike(SpikeRecord),
    ExternalEvent(ExternalEventRecord),
    AdSamples(AdSampleBlock),
}

impl DataBlockRecord {
    /// Returns the record type of this block.
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::Spike(_) => RecordType::Spike,
            Self::ExternalEvent(_) => RecordType::ExternalEvent,
            Self::AdSamples(_) => RecordType::AdData,
        }
    }

    /// Returns the block timestamp in acquisition clock ticks.
    pub fn timestamp(&self) -> u64 {
        match self {
            Self::Spike(r) => r.timestamp,
            Self::ExternalEvent(r) => r.timestamp,
            Self::AdSamples(r) => r.timestamp,
        }
    }

    /// Returns the source channel number.
    pub fn channel(&self) -> u16 {
        match self {
            Self::Spike(r) => r.channel,
            Self::ExternalEvent(r) => r.channel,
            Self::AdSamples(r) => r.channel,
        }
    }

    /// Returns the payload sample count declared by the block header.
    pub fn sample_count(&self) -> usize {
        match self {
            Self::Spike(r) => r.sample_count,
            Self::ExternalEvent(r) => r.sample_count,
            Self::AdSamples(r) => r.sample_count,
        }
    }
}

/// Spike and event timestamps in columnar form.
///
/// This is the shape produced both by file decoding and by a live
/// acquisition poll, so every downstream classifier accepts either.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventColumns {
    /// Record type codes (1 = spike, 4 = external event)
    pub types: Vec<u8>,
    /// Channel numbers
    pub channels: Vec<u16>,
    /// Sorted unit ids for spikes, strobe values for events
    pub units: Vec<u16>,
    /// Timestamps in seconds
    pub timestamps: Vec<f64>,
}

impl EventColumns {
    /// Creates an empty column set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates an empty column set with room for `capacity` rows.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            types: Vec::with_capacity(capacity),
            channels: Vec::with_capacity(capacity),
            units: Vec::with_capacity(capacity),
            timestamps: Vec::with_capacity(capacity),
        }
    }

    /// Appends one row.
    #[inline]
    pub fn push(&mut self, record_type: u8, channel: u16, unit: u16, timestamp: f64) {
        self.types.push(record_type);
        self.channels.push(channel);
        self.units.push(unit);
        self.timestamps.push(timestamp);
    }

    /// Appends a spike or external event record, converting ticks to seconds.
    ///
    /// A/D blocks are ignored; they belong in [`AdColumns`].
    pub fn push_record(&mut self, record: &DataBlockRecord, ad_frequency: f64) {
        match record {
            DataBlockRecord::Spike(r) => self.push(
                RecordType::Spike as u8,
                r.channel,
                r.unit,
                r.timestamp as f64 / ad_frequency,
            ),
            DataBlockRecord::ExternalEvent(r) => self.push(
                RecordType::ExternalEvent as u8,
                r.channel,
                r.value,
                r.timestamp as f64 / ad_frequency,
            ),
            DataBlockRecord::AdSamples(_) => {}
        }
    }

    /// Returns a copy of rows `start..end`, clamped to the column length.
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.len());
        let start = start.min(end);
        Self {
            types: self.types[start..end].to_vec(),
            channels: self.channels[start..end].to_vec(),
            units: self.units[start..end].to_vec(),
            timestamps: self.timestamps[start..end].to_vec(),
        }
    }

    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Returns true if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Continuous samples in columnar form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdColumns {
    /// Slow channel numbers
    pub channels: Vec<u16>,
    /// Values in volts
    pub values: Vec<f64>,
    /// Timestamps in seconds
    pub timestamps: Vec<f64>,
}

impl AdColumns {
    /// Creates an empty column set with room for `capacity` samples.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
            timestamps: Vec::with_capacity(capacity),
        }
    }

    /// Appends every sample of an A/D block.
    pub fn push_block(&mut self, block: &AdSampleBlock) {
        for sample in &block.samples {
            self.channels.push(block.channel);
            self.values.push(sample.value);
            self.timestamps.push(sample.timestamp);
        }
    }

    /// Returns the number of samples.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Returns true if there are no samples.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// A reconstructed multi-bit word.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WordEvent {
    /// OR of `1 << bit` for every bit sharing the timestamp
    pub word: u32,
    /// Timestamp in seconds
    pub timestamp: f64,
}

impl WordEvent {
    /// Creates a new word event.
    #[inline]
    pub fn new(word: u32, timestamp: f64) -> Self {
        Self { word, timestamp }
    }
}
