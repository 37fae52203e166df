//! Event classification over decoded columns.
//!
//! Every function here takes [`EventColumns`], so the same queries work on a
//! fully decoded file and on a batch polled from a live acquisition server.

use crate::types::{
    EventColumns, RecordType, PAUSE_CHANNEL, RESUME_CHANNEL, START_CHANNEL, STOP_CHANNEL,
    STROBED_CHANNEL,
};
use crate::words::WORD_BITS;
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use thiserror::Error;

/// Flag bit distinguishing a second strobe from a first strobe.
const SECOND_STROBE_FLAG: u16 = 0x8000;
/// Payload mask of a first strobe.
const FIRST_STROBE_MASK: u16 = 0x7FFF;
/// Highest sorted unit id that has a letter label.
const MAX_LABELED_UNIT: u16 = 26;

/// Errors for invalid classifier queries.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("Unstrobed bit {0} out of range (0-31)")]
    BitOutOfRange(u8),

    #[error("Unknown event kind: {0}")]
    UnknownKind(String),
}

/// Returns the letter label of a sorted unit id: 1 is 'a', 26 is 'z'.
///
/// Unit 0 (unsorted) and ids past 26 have no label.
#[inline]
pub fn unit_label(unit: u16) -> Option<char> {
    if (1..=MAX_LABELED_UNIT).contains(&unit) {
        Some(char::from(b'a' + (unit - 1) as u8))
    } else {
        None
    }
}

/// Returns the unit id for a letter label.
#[inline]
pub fn unit_id(label: char) -> Option<u16> {
    if label.is_ascii_lowercase() {
        Some(label as u16 - 'a' as u16 + 1)
    } else {
        None
    }
}

#[inline]
fn is_sorted_spike(columns: &EventColumns, i: usize) -> bool {
    columns.types[i] == RecordType::Spike as u8 && columns.units[i] > 0
}

/// Number of rows in the columns.
pub fn event_count(columns: &EventColumns) -> usize {
    columns.len()
}

/// Maps each channel with at least one sorted spike to its unit labels.
pub fn spike_units_by_channel(columns: &EventColumns) -> BTreeMap<u16, BTreeSet<char>> {
    let mut units: BTreeMap<u16, BTreeSet<char>> = BTreeMap::new();
    for i in 0..columns.len() {
        if !is_sorted_spike(columns, i) {
            continue;
        }
        if let Some(label) = unit_label(columns.units[i]) {
            units.entry(columns.channels[i]).or_default().insert(label);
        }
    }
    units
}

/// Timestamps of one sorted unit on one channel, in scan order.
pub fn spike_train(columns: &EventColumns, channel: u16, unit: char) -> Vec<f64> {
    let Some(unit) = unit_id(unit) else {
        return Vec::new();
    };
    (0..columns.len())
        .filter(|&i| {
            columns.types[i] == RecordType::Spike as u8
                && columns.channels[i] == channel
                && columns.units[i] == unit
        })
        .map(|i| columns.timestamps[i])
        .collect()
}

/// Spike trains of every sorted unit, keyed by channel then unit label.
pub fn spike_trains(columns: &EventColumns) -> BTreeMap<u16, BTreeMap<char, Vec<f64>>> {
    let mut trains: BTreeMap<u16, BTreeMap<char, Vec<f64>>> = BTreeMap::new();
    for i in 0..columns.len() {
        if !is_sorted_spike(columns, i) {
            continue;
        }
        if let Some(label) = unit_label(columns.units[i]) {
            trains
                .entry(columns.channels[i])
                .or_default()
                .entry(label)
                .or_default()
                .push(columns.timestamps[i]);
        }
    }
    trains
}

/// The external event streams that can be extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalEventKind {
    Start,
    Stop,
    Pause,
    Resume,
    /// One of the 32 single-bit lines, 0-based
    UnstrobedBit(u8),
    FirstStrobeWord,
    SecondStrobeWord,
}

impl FromStr for ExternalEventKind {
    type Err = ClassifyError;

    /// Parses names like `start`, `second_strobe_word` or `unstrobed_bit:3`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        match name.as_str() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            "first_strobe_word" => Ok(Self::FirstStrobeWord),
            "second_strobe_word" => Ok(Self::SecondStrobeWord),
            _ => name
                .strip_prefix("unstrobed_bit:")
                .and_then(|bit| bit.parse().ok())
                .map(Self::UnstrobedBit)
                .ok_or_else(|| ClassifyError::UnknownKind(s.to_string())),
        }
    }
}

/// A strobed word value with its timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrobedWord {
    pub value: u16,
    pub timestamp: f64,
}

/// Result of an external event query.
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalEvents {
    Timestamps(Vec<f64>),
    Strobed(Vec<StrobedWord>),
}

impl ExternalEvents {
    /// Timestamps of the events, whatever their kind.
    pub fn timestamps(&self) -> Vec<f64> {
        match self {
            Self::Timestamps(ts) => ts.clone(),
            Self::Strobed(words) => words.iter().map(|w| w.timestamp).collect(),
        }
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        match self {
            Self::Timestamps(ts) => ts.len(),
            Self::Strobed(words) => words.len(),
        }
    }

    /// Returns true if no events matched.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Extracts one kind of external event.
pub fn external_events(
    columns: &EventColumns,
    kind: ExternalEventKind,
) -> Result<ExternalEvents, ClassifyError> {
    let channel = match kind {
        ExternalEventKind::Start => START_CHANNEL,
        ExternalEventKind::Stop => STOP_CHANNEL,
        ExternalEventKind::Pause => PAUSE_CHANNEL,
        ExternalEventKind::Resume => RESUME_CHANNEL,
        ExternalEventKind::UnstrobedBit(bit) => {
            if bit as usize >= WORD_BITS {
                return Err(ClassifyError::BitOutOfRange(bit));
            }
            bit as u16 + 1
        }
        ExternalEventKind::FirstStrobeWord => {
            return Ok(ExternalEvents::Strobed(strobed_words(columns, false)));
        }
        ExternalEventKind::SecondStrobeWord => {
            return Ok(ExternalEvents::Strobed(strobed_words(columns, true)));
        }
    };
    Ok(ExternalEvents::Timestamps(
        external_indices(columns, channel)
            .map(|i| columns.timestamps[i])
            .collect(),
    ))
}

/// The 32 per-bit timestamp streams, indexed by bit.
pub fn unstrobed_bits(columns: &EventColumns) -> Vec<Vec<f64>> {
    let mut bits = vec![Vec::new(); WORD_BITS];
    for i in 0..columns.len() {
        if columns.types[i] != RecordType::ExternalEvent as u8 {
            continue;
        }
        let channel = columns.channels[i] as usize;
        if (1..=WORD_BITS).contains(&channel) {
            bits[channel - 1].push(columns.timestamps[i]);
        }
    }
    bits
}

fn external_indices(columns: &EventColumns, channel: u16) -> impl Iterator<Item = usize> + '_ {
    (0..columns.len()).filter(move |&i| {
        columns.types[i] == RecordType::ExternalEvent as u8 && columns.channels[i] == channel
    })
}

fn strobed_words(columns: &EventColumns, second: bool) -> Vec<StrobedWord> {
    external_indices(columns, STROBED_CHANNEL)
        .filter(|&i| (columns.units[i] & SECOND_STROBE_FLAG != 0) == second)
        .map(|i| {
            let raw = columns.units[i];
            StrobedWord {
                value: if second { raw } else { raw & FIRST_STROBE_MASK },
                timestamp: columns.timestamps[i],
            }
        })
        .collect()
}
