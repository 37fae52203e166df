//! CSV writers for decoded columns.
//!
//! One writer per output shape: event columns, continuous samples and
//! reconstructed words. Timestamps are written in seconds.

use crate::types::{AdColumns, EventColumns, WordEvent};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during output writing.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// CSV writer for spike and external event columns.
pub struct EventCsvWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> EventCsvWriter<W> {
    /// Creates a new event CSV writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    /// Writes the column header line.
    pub fn write_header(&mut self) -> Result<(), OutputError> {
        writeln!(self.writer, "type,channel,unit,timestamp")?;
        Ok(())
    }

    /// Writes every row of the columns.
    pub fn write_columns(&mut self, columns: &EventColumns) -> Result<(), OutputError> {
        for i in 0..columns.len() {
            writeln!(
                self.writer,
                "{},{},{},{}",
                columns.types[i], columns.channels[i], columns.units[i], columns.timestamps[i]
            )?;
        }
        Ok(())
    }

    /// Flushes the writer.
    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// CSV writer for continuous samples.
pub struct AdCsvWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> AdCsvWriter<W> {
    /// Creates a new sample CSV writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    /// Writes the column header line.
    pub fn write_header(&mut self) -> Result<(), OutputError> {
        writeln!(self.writer, "channel,value,timestamp")?;
        Ok(())
    }

    /// Writes every sample.
    pub fn write_columns(&mut self, columns: &AdColumns) -> Result<(), OutputError> {
        for i in 0..columns.len() {
            writeln!(
                self.writer,
                "{},{},{}",
                columns.channels[i], columns.values[i], columns.timestamps[i]
            )?;
        }
        Ok(())
    }

    /// Flushes the writer.
    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// CSV writer for reconstructed words.
///
/// Can be fed incrementally, one poll's worth of words at a time.
pub struct WordCsvWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> WordCsvWriter<W> {
    /// Creates a new word CSV writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    /// Writes the column header line.
    pub fn write_header(&mut self) -> Result<(), OutputError> {
        writeln!(self.writer, "word,timestamp")?;
        Ok(())
    }

    /// Writes a batch of words.
    pub fn write_words(&mut self, words: &[WordEvent]) -> Result<(), OutputError> {
        for word in words {
            writeln!(self.writer, "{},{}", word.word, word.timestamp)?;
        }
        Ok(())
    }

    /// Flushes the writer.
    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes event columns to a CSV file.
pub fn write_events_csv<P: AsRef<Path>>(
    path: P,
    columns: &EventColumns,
) -> Result<(), OutputError> {
    let file = File::create(path)?;
    let mut writer = EventCsvWriter::new(file);
    writer.write_header()?;
    writer.write_columns(columns)?;
    writer.flush()?;
    Ok(())
}

/// Writes continuous samples to a CSV file.
pub fn write_ad_csv<P: AsRef<Path>>(path: P, columns: &AdColumns) -> Result<(), OutputError> {
    let file = File::create(path)?;
    let mut writer = AdCsvWriter::new(file);
    writer.write_header()?;
    writer.write_columns(columns)?;
    writer.flush()?;
    Ok(())
}

/// Writes reconstructed words to a CSV file.
pub fn write_words_csv<P: AsRef<Path>>(path: P, words: &[WordEvent]) -> Result<(), OutputError> {
    let file = File::create(path)?;
    let mut writer = WordCsvWriter::new(file);
    writer.write_header()?;
    writer.write_words(words)?;
    writer.flush()?;
    Ok(())
}
