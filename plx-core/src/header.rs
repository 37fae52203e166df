//! File header and descriptor decoding.
//!
//! A .plx file starts with a 7504-byte header followed by three arrays of
//! fixed-size channel descriptors. The data region begins right after the
//! last descriptor.

use crate::decoder::DecodeError;
use crate::parser::{
    self, AD_COUNT_FIRST_SLOT, CHANNEL_DESCRIPTOR_SIZE, COUNT_CHANNELS, COUNT_UNITS,
    EVENT_COUNT_SLOTS, EVENT_DESCRIPTOR_SIZE, FILE_HEADER_SIZE, FIXED_HEADER_SIZE, MAGIC_NUMBER,
    SLOW_CHANNEL_DESCRIPTOR_SIZE, SUPPORTED_VERSIONS,
};
use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{NaiveDate, NaiveDateTime};
use std::io::{Cursor, Read};

/// Decoded file header.
#[derive(Debug, Clone, PartialEq)]
pub struct FileHeader {
    /// File magic, always [`MAGIC_NUMBER`]
    pub magic: u32,
    /// Format version, 105 or 106
    pub version: i32,
    /// Free-text session comment
    pub comment: String,
    /// Timestamp clock frequency in Hz
    pub ad_frequency: i32,
    /// Number of DSP (spike) channel descriptors
    pub num_dsp_channels: i32,
    /// Number of event channel descriptors
    pub num_event_channels: i32,
    /// Number of slow (A/D) channel descriptors
    pub num_slow_channels: i32,
    /// Samples per spike waveform
    pub num_points_wave: i32,
    /// Waveform samples before the threshold crossing
    pub num_points_pre_threshold: i32,
    /// Recording start date and time, as stored
    pub year: i32,
    pub month: i32,
    pub day: i32,
    pub hour: i32,
    pub minute: i32,
    pub second: i32,
    /// Reserved by the recording software
    pub fast_read: i32,
    /// Waveform sampling rate in Hz
    pub waveform_freq: i32,
    /// Session duration in ticks
    pub last_timestamp: f64,
    /// Electrodes per spike channel group: 1, 2 or 4
    pub trodalness: i8,
    /// Electrodes per data block
    pub data_trodalness: i8,
    /// ADC resolution of spike samples
    pub bits_per_spike_sample: i8,
    /// ADC resolution of slow samples
    pub bits_per_slow_sample: i8,
    /// Input range of the spike ADC in millivolts
    pub spike_max_magnitude_mv: u16,
    /// Input range of the slow ADC in millivolts
    pub slow_max_magnitude_mv: u16,
    /// Spike channel preamplifier gain
    pub spike_preamp_gain: u16,
    /// Timestamp counts indexed `[channel][unit]`
    pub ts_counts: Vec<[i32; COUNT_UNITS]>,
    /// Waveform counts indexed `[channel][unit]`
    pub wf_counts: Vec<[i32; COUNT_UNITS]>,
    /// Event counts indexed by event channel; slots from 300 hold
    /// sample counts per slow channel
    pub ev_counts: Vec<i32>,
}

impl FileHeader {
    /// Parses the file header from the start of `bytes`.
    ///
    /// Fails with [`DecodeError::UnsupportedVersion`] before looking at
    /// anything past the version field.
    pub fn parse(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < FILE_HEADER_SIZE {
            return Err(DecodeError::TruncatedHeader {
                expected: FILE_HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let mut cur = Cursor::new(bytes);
        let magic = cur.read_u32::<LittleEndian>()?;
        if magic != MAGIC_NUMBER {
            return Err(DecodeError::InvalidMagic(magic));
        }
        let version = cur.read_i32::<LittleEndian>()?;
        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(DecodeError::UnsupportedVersion(version));
        }

        let comment = read_text(&mut cur, 128)?;
        let ad_frequency = cur.read_i32::<LittleEndian>()?;
        let num_dsp_channels = cur.read_i32::<LittleEndian>()?;
        let num_event_channels = cur.read_i32::<LittleEndian>()?;
        let num_slow_channels = cur.read_i32::<LittleEndian>()?;
        let num_points_wave = cur.read_i32::<LittleEndian>()?;
        let num_points_pre_threshold = cur.read_i32::<LittleEndian>()?;
        let year = cur.read_i32::<LittleEndian>()?;
        let month = cur.read_i32::<LittleEndian>()?;
        let day = cur.read_i32::<LittleEndian>()?;
        let hour = cur.read_i32::<LittleEndian>()?;
        let minute = cur.read_i32::<LittleEndian>()?;
        let second = cur.read_i32::<LittleEndian>()?;
        let fast_read = cur.read_i32::<LittleEndian>()?;
        let waveform_freq = cur.read_i32::<LittleEndian>()?;
        let last_timestamp = cur.read_f64::<LittleEndian>()?;
        let trodalness = cur.read_i8()?;
        let data_trodalness = cur.read_i8()?;
        let bits_per_spike_sample = cur.read_i8()?;
        let bits_per_slow_sample = cur.read_i8()?;
        let spike_max_magnitude_mv = cur.read_u16::<LittleEndian>()?;
        let slow_max_magnitude_mv = cur.read_u16::<LittleEndian>()?;
        let spike_preamp_gain = cur.read_u16::<LittleEndian>()?;

        cur.set_position(FIXED_HEADER_SIZE as u64);
        let ts_counts = read_count_table(&mut cur)?;
        let wf_counts = read_count_table(&mut cur)?;
        let ev_counts = (0..EVENT_COUNT_SLOTS)
            .map(|_| cur.read_i32::<LittleEndian>())
            .collect::<Result<Vec<_>, _>>()?;

        for (name, count) in [
            ("DSP", num_dsp_channels),
            ("event", num_event_channels),
            ("slow", num_slow_channels),
        ] {
            if count < 0 {
                return Err(DecodeError::InvalidFormat(format!(
                    "negative {name} channel count {count}"
                )));
            }
        }
        if ad_frequency <= 0 {
            return Err(DecodeError::InvalidFormat(format!(
                "non-positive timestamp frequency {ad_frequency}"
            )));
        }

        log::debug!(
            "plx v{version}: {ad_frequency} Hz, {num_dsp_channels} DSP / {num_event_channels} event / {num_slow_channels} slow channels"
        );

        Ok(Self {
            magic,
            version,
            comment,
            ad_frequency,
            num_dsp_channels,
            num_event_channels,
            num_slow_channels,
            num_points_wave,
            num_points_pre_threshold,
            year,
            month,
            day,
            hour,
            minute,
            second,
            fast_read,
            waveform_freq,
            last_timestamp,
            trodalness,
            data_trodalness,
            bits_per_spike_sample,
            bits_per_slow_sample,
            spike_max_magnitude_mv,
            slow_max_magnitude_mv,
            spike_preamp_gain,
            ts_counts,
            wf_counts,
            ev_counts,
        })
    }

    /// Byte offset of the first data block.
    pub fn data_region_offset(&self) -> usize {
        FILE_HEADER_SIZE
            + self.num_dsp_channels as usize * CHANNEL_DESCRIPTOR_SIZE
            + self.num_event_channels as usize * EVENT_DESCRIPTOR_SIZE
            + self.num_slow_channels as usize * SLOW_CHANNEL_DESCRIPTOR_SIZE
    }

    /// Session start time, if the stored fields form a valid date.
    pub fn recorded_at(&self) -> Option<NaiveDateTime> {
        let field = |v: i32| u32::try_from(v).ok();
        NaiveDate::from_ymd_opt(self.year, field(self.month)?, field(self.day)?)?.and_hms_opt(
            field(self.hour)?,
            field(self.minute)?,
            field(self.second)?,
        )
    }

    /// Historical timestamp count for a (channel, unit) pair the header tracks.
    pub fn ts_count(&self, channel: usize, unit: usize) -> Option<i32> {
        self.ts_counts.get(channel)?.get(unit).copied()
    }

    /// Total number of spike waveforms recorded in the header tables.
    pub fn single_waveform_count(&self) -> usize {
        saturating_total(self.wf_counts.iter().flatten())
    }

    /// Total number of external events recorded in the header tables.
    pub fn external_event_count(&self) -> usize {
        saturating_total(&self.ev_counts[..AD_COUNT_FIRST_SLOT])
    }

    /// Total number of continuous samples recorded in the header tables.
    pub fn ad_sample_count(&self) -> usize {
        saturating_total(&self.ev_counts[AD_COUNT_FIRST_SLOT..])
    }
}

fn saturating_total<'a>(counts: impl IntoIterator<Item = &'a i32>) -> usize {
    counts
        .into_iter()
        .fold(0usize, |acc, &c| acc.saturating_add(c.max(0) as usize))
}

/// A DSP (spike) channel descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDescriptor {
    pub name: String,
    pub sig_name: String,
    /// DSP channel number, 1-based
    pub channel: i32,
    pub wf_rate: i32,
    pub sig: i32,
    pub reference: i32,
    pub gain: i32,
    pub filter: i32,
    pub threshold: i32,
    pub method: i32,
    pub num_units: i32,
    pub sort_width: i32,
    pub sort_begin: i32,
    pub comment: String,
}

/// An event channel descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDescriptor {
    pub name: String,
    /// Event number, 1-based
    pub channel: i32,
    pub comment: String,
}

/// A slow (continuous) channel descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlowChannelDescriptor {
    pub name: String,
    /// Slow channel number, 0-based
    pub channel: i32,
    /// Digitization frequency in Hz
    pub ad_frequency: i32,
    pub gain: i32,
    pub enabled: bool,
    pub preamp_gain: i32,
    /// Associated spike channel; <= 0 means none
    pub spike_channel: i32,
    pub comment: String,
}

/// The three descriptor arrays that follow the file header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Descriptors {
    pub channels: Vec<ChannelDescriptor>,
    pub events: Vec<EventDescriptor>,
    pub slow_channels: Vec<SlowChannelDescriptor>,
}

/// Reads all descriptor arrays announced by `header`.
pub fn read_descriptors(bytes: &[u8], header: &FileHeader) -> Result<Descriptors, DecodeError> {
    let end = header.data_region_offset();
    if bytes.len() < end {
        return Err(DecodeError::TruncatedHeader {
            expected: end,
            actual: bytes.len(),
        });
    }

    let mut offset = FILE_HEADER_SIZE;
    let mut next = |size: usize| {
        let chunk = &bytes[offset..offset + size];
        offset += size;
        chunk
    };

    let channels = (0..header.num_dsp_channels)
        .map(|_| parse_channel(next(CHANNEL_DESCRIPTOR_SIZE)))
        .collect::<Result<Vec<_>, _>>()?;
    let events = (0..header.num_event_channels)
        .map(|_| parse_event(next(EVENT_DESCRIPTOR_SIZE)))
        .collect::<Result<Vec<_>, _>>()?;
    let slow_channels = (0..header.num_slow_channels)
        .map(|_| parse_slow_channel(next(SLOW_CHANNEL_DESCRIPTOR_SIZE)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Descriptors {
        channels,
        events,
        slow_channels,
    })
}

fn parse_channel(bytes: &[u8]) -> Result<ChannelDescriptor, DecodeError> {
    let mut cur = Cursor::new(bytes);
    let name = read_text(&mut cur, 32)?;
    let sig_name = read_text(&mut cur, 32)?;
    let channel = cur.read_i32::<LittleEndian>()?;
    let wf_rate = cur.read_i32::<LittleEndian>()?;
    let sig = cur.read_i32::<LittleEndian>()?;
    let reference = cur.read_i32::<LittleEndian>()?;
    let gain = cur.read_i32::<LittleEndian>()?;
    let filter = cur.read_i32::<LittleEndian>()?;
    let threshold = cur.read_i32::<LittleEndian>()?;
    let method = cur.read_i32::<LittleEndian>()?;
    let num_units = cur.read_i32::<LittleEndian>()?;
    // templates (5 x 64 i16) and fits (5 x i32)
    cur.set_position(760);
    let sort_width = cur.read_i32::<LittleEndian>()?;
    // sorting boxes (5 x 2 x 4 i16)
    cur.set_position(844);
    let sort_begin = cur.read_i32::<LittleEndian>()?;
    let comment = read_text(&mut cur, 128)?;

    Ok(ChannelDescriptor {
        name,
        sig_name,
        channel,
        wf_rate,
        sig,
        reference,
        gain,
        filter,
        threshold,
        method,
        num_units,
        sort_width,
        sort_begin,
        comment,
    })
}

fn parse_event(bytes: &[u8]) -> Result<EventDescriptor, DecodeError> {
    let mut cur = Cursor::new(bytes);
    let name = read_text(&mut cur, 32)?;
    let channel = cur.read_i32::<LittleEndian>()?;
    let comment = read_text(&mut cur, 128)?;
    Ok(EventDescriptor {
        name,
        channel,
        comment,
    })
}

fn parse_slow_channel(bytes: &[u8]) -> Result<SlowChannelDescriptor, DecodeError> {
    let mut cur = Cursor::new(bytes);
    let name = read_text(&mut cur, 32)?;
    let channel = cur.read_i32::<LittleEndian>()?;
    let ad_frequency = cur.read_i32::<LittleEndian>()?;
    let gain = cur.read_i32::<LittleEndian>()?;
    let enabled = cur.read_i32::<LittleEndian>()? != 0;
    let preamp_gain = cur.read_i32::<LittleEndian>()?;
    let spike_channel = cur.read_i32::<LittleEndian>()?;
    let comment = read_text(&mut cur, 128)?;
    Ok(SlowChannelDescriptor {
        name,
        channel,
        ad_frequency,
        gain,
        enabled,
        preamp_gain,
        spike_channel,
        comment,
    })
}

fn read_text(cur: &mut Cursor<&[u8]>, len: usize) -> Result<String, DecodeError> {
    let mut buf = vec![0u8; len];
    cur.read_exact(&mut buf)?;
    Ok(parser::fixed_str(&buf))
}

fn read_count_table(cur: &mut Cursor<&[u8]>) -> Result<Vec<[i32; COUNT_UNITS]>, DecodeError> {
    let mut table = vec![[0i32; COUNT_UNITS]; COUNT_CHANNELS];
    for row in table.iter_mut() {
        cur.read_i32_into::<LittleEndian>(row)?;
    }
    Ok(table)
}
