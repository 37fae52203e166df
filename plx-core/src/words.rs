//! Unstrobed word reconstruction.
//!
//! Each of the 32 digital input lines is recorded as its own event channel:
//! a timestamp per rising edge. A word written to the port sets several
//! lines at the same instant, so the word is recovered by grouping the bits
//! whose timestamps are exactly equal.
//!
//! [`reconstruct_words`] does this for a complete set of streams.
//! [`ReconstructionState`] wraps it for polling loops, where the bits of one
//! word may arrive split over two consecutive batches.

use crate::classify;
use crate::types::{EventColumns, WordEvent};

/// Number of unstrobed bit lines.
pub const WORD_BITS: usize = 32;

/// Merges per-bit timestamp streams into words.
///
/// `bits[k]` holds the strictly increasing timestamps of bit `k`; streams
/// past the 32nd are ignored. Bits are grouped by exact timestamp equality
/// and the words come out in increasing timestamp order.
pub fn reconstruct_words<B: AsRef<[f64]>>(bits: &[B]) -> Vec<WordEvent> {
    let streams: Vec<&[f64]> = bits.iter().take(WORD_BITS).map(AsRef::as_ref).collect();
    let total: usize = streams.iter().map(|s| s.len()).sum();

    // Oldest unconsumed timestamp per bit; +inf once a stream is exhausted.
    let mut cursors = [0usize; WORD_BITS];
    let mut oldest = [f64::INFINITY; WORD_BITS];
    for (bit, stream) in streams.iter().enumerate() {
        if let Some(&t) = stream.first() {
            oldest[bit] = t;
        }
    }

    let mut words = Vec::with_capacity(total);
    loop {
        let timestamp = oldest.iter().copied().fold(f64::INFINITY, f64::min);
        if timestamp == f64::INFINITY {
            break;
        }

        let mut word = 0u32;
        for (bit, stream) in streams.iter().enumerate() {
            if oldest[bit] == timestamp {
                word |= 1 << bit;
                cursors[bit] += 1;
                oldest[bit] = stream.get(cursors[bit]).copied().unwrap_or(f64::INFINITY);
            }
        }
        words.push(WordEvent::new(word, timestamp));
    }
    words
}

/// Reconstructs every word in a fully decoded set of columns.
pub fn reconstruct_columns(columns: &EventColumns) -> Vec<WordEvent> {
    reconstruct_words(&classify::unstrobed_bits(columns))
}

/// Carry state for online reconstruction.
///
/// Holds back the most recent word of each batch, since its remaining bits
/// may only show up in the next poll. A word split over more than two
/// batches is not recovered.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReconstructionState {
    pending: Option<WordEvent>,
}

impl ReconstructionState {
    /// Creates an empty state for a new stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// The word currently held back, if any.
    pub fn pending(&self) -> Option<WordEvent> {
        self.pending
    }

    /// Returns true if no word is held back.
    pub fn is_clear(&self) -> bool {
        self.pending.is_none()
    }

    /// Reconstructs one batch of bit streams, returning the words known to
    /// be complete.
    ///
    /// The pending word is merged into the batch's first word when their
    /// timestamps match, and emitted ahead of the batch otherwise. The
    /// batch's last word becomes the new pending word. An empty batch
    /// releases the pending word.
    pub fn reconstruct<B: AsRef<[f64]>>(&mut self, bits: &[B]) -> Vec<WordEvent> {
        let mut words = reconstruct_words(bits);

        if let Some(pending) = self.pending.take() {
            let continues = words
                .first()
                .is_some_and(|first| first.timestamp == pending.timestamp);
            if continues {
                words[0].word |= pending.word;
            } else {
                words.insert(0, pending);
                if words.len() == 1 {
                    return words;
                }
            }
        }

        self.pending = words.pop();
        words
    }

    /// Reconstructs the unstrobed bits of one polled batch.
    pub fn push_columns(&mut self, columns: &EventColumns) -> Vec<WordEvent> {
        self.reconstruct(&classify::unstrobed_bits(columns))
    }

    /// Releases the pending word at the end of the stream.
    pub fn finish(&mut self) -> Option<WordEvent> {
        self.pending.take()
    }
}
