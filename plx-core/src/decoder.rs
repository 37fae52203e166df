//! .plx file decoding.
//!
//! [`PlxFile`] memory-maps a recording, validates its header, reads the
//! channel descriptors and hands out [`BlockScanner`]s over the data region.
//! [`decode_bytes`] runs the whole pipeline over an in-memory image and
//! collects the columnar outputs.

use crate::header::{self, Descriptors, FileHeader};
use crate::parser::BLOCK_HEADER_SIZE;
use crate::scanner::{BlockScanner, ProgressCallback, ProgressError, ScanOptions, ScanSummary};
use crate::types::{AdColumns, DataBlockRecord, EventColumns};
use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during .plx decoding.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid magic number {0:#010x}, not a .plx file")]
    InvalidMagic(u32),

    #[error("PLX file version {0} is not supported (supported: 105, 106)")]
    UnsupportedVersion(i32),

    #[error("File header truncated: need {expected} bytes, found {actual}")]
    TruncatedHeader { expected: usize, actual: usize },

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("A/D block references slow channel {channel}, but only {available} are declared")]
    ChannelIndexOutOfRange { channel: i16, available: usize },

    #[error("Progress callback failed: {0}")]
    Progress(ProgressError),
}

/// Columns collected from a full pass over a recording.
#[derive(Debug)]
pub struct DecodeResult {
    /// Spike and external event timestamps
    pub events: EventColumns,
    /// Continuous samples
    pub ad: AdColumns,
    /// Scanner counters
    pub summary: ScanSummary,
}

/// A memory-mapped .plx recording.
pub struct PlxFile {
    path: PathBuf,
    mmap: Mmap,
    header: FileHeader,
    descriptors: Descriptors,
}

impl PlxFile {
    /// Opens a recording and reads its header and descriptors.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DecodeError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        // SAFETY: the mapping is read-only and owned by `PlxFile`; every
        // slice handed out borrows from it. The file must not be modified
        // while it is open.
        let mmap = unsafe { Mmap::map(&file)? };

        let header = FileHeader::parse(&mmap)?;
        let descriptors = header::read_descriptors(&mmap, &header)?;
        log::debug!(
            "opened {:?}: {} bytes, data region at {}",
            path,
            mmap.len(),
            header.data_region_offset()
        );

        Ok(Self {
            path,
            mmap,
            header,
            descriptors,
        })
    }

    /// Path the recording was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The decoded file header.
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// The channel, event and slow channel descriptors.
    pub fn descriptors(&self) -> &Descriptors {
        &self.descriptors
    }

    /// The raw file image.
    pub fn data(&self) -> &[u8] {
        &self.mmap
    }

    /// Returns a scanner over the data region.
    pub fn records(&self) -> BlockScanner<'_> {
        BlockScanner::new(
            &self.mmap,
            self.header.data_region_offset(),
            &self.header,
            &self.descriptors.slow_channels,
        )
    }

    /// Decodes every block into event and A/D columns.
    pub fn decode(
        &self,
        options: ScanOptions,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<DecodeResult, DecodeError> {
        collect(
            self.records().with_options(options).with_progress(progress),
            &self.header,
        )
    }

    /// Spike and external event timestamps, in seconds.
    ///
    /// A/D blocks are stepped over without being decoded.
    pub fn event_columns(
        &self,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<EventColumns, DecodeError> {
        let options = ScanOptions {
            decode_ad: false,
            ..ScanOptions::default()
        };
        Ok(self.decode(options, progress)?.events)
    }

    /// Continuous samples scaled to volts, with timestamps in seconds.
    pub fn ad_columns(
        &self,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<AdColumns, DecodeError> {
        Ok(self.decode(ScanOptions::default(), progress)?.ad)
    }
}

impl std::fmt::Debug for PlxFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlxFile")
            .field("path", &self.path)
            .field("len", &self.mmap.len())
            .field("version", &self.header.version)
            .finish()
    }
}

/// Decodes a complete .plx image held in memory.
pub fn decode_bytes(
    data: &[u8],
    options: ScanOptions,
    progress: Option<ProgressCallback<'_>>,
) -> Result<DecodeResult, DecodeError> {
    let header = FileHeader::parse(data)?;
    let descriptors = header::read_descriptors(data, &header)?;
    let scanner = BlockScanner::new(
        data,
        header.data_region_offset(),
        &header,
        &descriptors.slow_channels,
    )
    .with_options(options)
    .with_progress(progress);
    collect(scanner, &header)
}

fn collect(mut scanner: BlockScanner<'_>, header: &FileHeader) -> Result<DecodeResult, DecodeError> {
    let ad_frequency = header.ad_frequency as f64;

    // The count tables are untrusted; no more blocks or samples can follow
    // than the data region has room for.
    let remaining = scanner.remaining_len();
    let event_capacity = header
        .single_waveform_count()
        .saturating_add(header.external_event_count())
        .min(remaining / BLOCK_HEADER_SIZE);
    let ad_capacity = if scanner.options().decode_ad {
        header
            .ad_sample_count()
            .min(remaining.saturating_sub(BLOCK_HEADER_SIZE) / 2)
    } else {
        0
    };
    let mut events = EventColumns::with_capacity(event_capacity);
    let mut ad = AdColumns::with_capacity(ad_capacity);

    for record in scanner.by_ref() {
        match record? {
            DataBlockRecord::AdSamples(block) => ad.push_block(&block),
            other => events.push_record(&other, ad_frequency),
        }
    }

    Ok(DecodeResult {
        events,
        ad,
        summary: scanner.summary().clone(),
    })
}
