//! Decoder library for Plexon .plx neurophysiology recordings.
//!
//! This crate reads the binary .plx format written by Plexon acquisition
//! systems: the file header and channel descriptors, the sequential stream of
//! spike, external event and continuous (A/D) data blocks, and the derived
//! views built on top of them such as sorted spike trains, strobed words and
//! words reconstructed from the 32 unstrobed digital input lines.
//!
//! # Example
//!
//! ```no_run
//! use plx_core::{PlxFile, ScanOptions};
//! use plx_core::words;
//!
//! let file = PlxFile::open("session.plx").unwrap();
//! let result = file.decode(ScanOptions::default(), None).unwrap();
//!
//! println!("Decoded {} events", result.events.len());
//! println!("Recorded at {:?}", file.header().recorded_at());
//!
//! let words = words::reconstruct_columns(&result.events);
//! println!("Reconstructed {} unstrobed words", words.len());
//! ```
//!
//! # Features
//!
//! - Header and descriptor parsing for file versions 105 and 106
//! - Forward-only block scanning with throughput-smoothed progress reports
//! - Spike train, strobed word and start/stop/pause/resume extraction
//! - Offline and online (batched) unstrobed word reconstruction
//! - CSV output for events, continuous samples and words

pub mod classify;
pub mod decoder;
pub mod header;
pub mod output;
pub mod parser;
pub mod scanner;
pub mod source;
pub mod types;
pub mod words;

// Re-export commonly used types
pub use classify::{ClassifyError, ExternalEventKind, ExternalEvents, StrobedWord};
pub use decoder::{decode_bytes, DecodeError, DecodeResult, PlxFile};
pub use header::{Descriptors, FileHeader};
pub use output::OutputError;
pub use scanner::{BlockScanner, Progress, ScanEnd, ScanOptions, ScanSummary};
pub use source::{EventSource, OnlineWords, ReplaySource};
pub use types::{AdColumns, DataBlockRecord, EventColumns, RecordType, WordEvent};
pub use words::{reconstruct_words, ReconstructionState};
