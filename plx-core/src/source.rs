//! Bounded-batch event sources.
//!
//! A live acquisition client delivers the same four columns as file
//! decoding, but in batches of at most `max_count` events per poll.
//! [`EventSource`] is that boundary; [`ReplaySource`] replays decoded
//! columns through it, and [`OnlineWords`] drives online word
//! reconstruction from any source.

use crate::decoder::DecodeError;
use crate::types::{EventColumns, WordEvent};
use crate::words::ReconstructionState;

/// Largest batch a live acquisition server hands out per poll.
pub const MAX_EVENTS_PER_READ: usize = 8000;

/// A source of event batches.
pub trait EventSource {
    /// Returns up to `max_count` events; an empty batch means nothing new.
    fn poll_batch(&mut self, max_count: usize) -> Result<EventColumns, DecodeError>;
}

/// Replays already decoded columns in order, one bounded batch per poll.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    columns: EventColumns,
    cursor: usize,
}

impl ReplaySource {
    /// Creates a source positioned at the first event.
    pub fn new(columns: EventColumns) -> Self {
        Self { columns, cursor: 0 }
    }

    /// Number of events not yet delivered.
    pub fn remaining(&self) -> usize {
        self.columns.len() - self.cursor
    }

    /// Returns true once every event has been delivered.
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }
}

impl EventSource for ReplaySource {
    fn poll_batch(&mut self, max_count: usize) -> Result<EventColumns, DecodeError> {
        let end = self.cursor.saturating_add(max_count).min(self.columns.len());
        let batch = self.columns.slice(self.cursor, end);
        self.cursor = end;
        Ok(batch)
    }
}

/// Online word reconstruction over an event source.
#[derive(Debug)]
pub struct OnlineWords<S> {
    source: S,
    state: ReconstructionState,
    batch_size: usize,
}

impl<S: EventSource> OnlineWords<S> {
    /// Creates a reconstructor polling `batch_size` events at a time.
    pub fn new(source: S, batch_size: usize) -> Self {
        Self {
            source,
            state: ReconstructionState::new(),
            batch_size: batch_size.max(1),
        }
    }

    /// Polls one batch and returns the words completed by it.
    pub fn poll(&mut self) -> Result<Vec<WordEvent>, DecodeError> {
        let batch = self.source.poll_batch(self.batch_size)?;
        Ok(self.state.push_columns(&batch))
    }

    /// Releases the word still held back once the stream has ended.
    pub fn finish(&mut self) -> Option<WordEvent> {
        self.state.finish()
    }

    /// The carry state between polls.
    pub fn state(&self) -> &ReconstructionState {
        &self.state
    }

    /// The underlying source.
    pub fn source(&self) -> &S {
        &self.source
    }
}
