//! Sequential data block scanner.
//!
//! The data region has no index: each block's length is only known after its
//! header has been read, so blocks are decoded strictly in file order.
//! [`BlockScanner`] is a forward-only iterator over the classified records,
//! reporting progress through an optional callback as it goes.

use crate::decoder::DecodeError;
use crate::header::{FileHeader, SlowChannelDescriptor};
use crate::parser::{self, BlockHeader, BlockRead, BLOCK_HEADER_SIZE};
use crate::types::{
    AdSample, AdSampleBlock, DataBlockRecord, ExternalEventRecord, RecordType, SpikeRecord,
};
use std::time::Instant;

/// Default number of records between progress callbacks.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 30_000;
/// Throughput assumed before the first checkpoint, in MB/s.
pub const INITIAL_THROUGHPUT_MB_S: f64 = 20.0;
/// Smoothing factor of the throughput moving average.
const THROUGHPUT_SMOOTHING: f64 = 0.5;
const BYTES_PER_MB: f64 = 1e6;

/// A progress report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// Fraction of the file consumed, in `[0, 1]`
    pub fraction_done: f64,
    /// Megabytes consumed so far
    pub done_mb: f64,
    /// File size in megabytes
    pub total_mb: f64,
    /// Seconds since the scan started
    pub elapsed_secs: f64,
    /// Estimated seconds remaining
    pub eta_secs: f64,
}

/// Error type a progress callback may return to abort the scan.
pub type ProgressError = Box<dyn std::error::Error + Send + Sync>;

/// Boxed progress callback.
pub type ProgressCallback<'a> = Box<dyn FnMut(&Progress) -> Result<(), ProgressError> + 'a>;

/// Scanner tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanOptions {
    /// Records between progress callbacks
    pub progress_interval: u64,
    /// Throughput seed for the first ETA, in MB/s
    pub initial_throughput_mb_s: f64,
    /// Decode A/D payloads; when false, A/D blocks are stepped over by
    /// length like reserved blocks and never emitted
    pub decode_ad: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            initial_throughput_mb_s: INITIAL_THROUGHPUT_MB_S,
            decode_ad: true,
        }
    }
}

/// Why a scan stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEnd {
    /// Fewer than 16 bytes were left where the next header would start.
    Exhausted,
    /// The block at `offset` was malformed or ran past the end of the data.
    Truncated { offset: usize },
}

/// Counters collected while scanning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Blocks whose header and payload were fully consumed
    pub blocks: u64,
    /// Spike blocks (type 1)
    pub spikes: u64,
    /// External event blocks (type 4)
    pub external_events: u64,
    /// A/D blocks (type 5), decoded or not
    pub ad_blocks: u64,
    /// Reserved or unknown block types that were stepped over
    pub skipped: u64,
    /// Offset just past the last consumed block
    pub end_offset: usize,
    /// Set once the scan has finished
    pub end: Option<ScanEnd>,
}

/// Moving-average throughput estimate between checkpoints.
struct ProgressTracker {
    started: Instant,
    last_checkpoint: Instant,
    last_offset: usize,
    throughput: f64,
    total_len: usize,
}

impl ProgressTracker {
    fn new(start_offset: usize, total_len: usize, initial_mb_s: f64) -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last_checkpoint: now,
            last_offset: start_offset,
            throughput: initial_mb_s * BYTES_PER_MB,
            total_len,
        }
    }

    fn checkpoint(&mut self, offset: usize) -> Progress {
        self.checkpoint_at(offset, Instant::now())
    }

    fn checkpoint_at(&mut self, offset: usize, now: Instant) -> Progress {
        let interval = now.duration_since(self.last_checkpoint).as_secs_f64();
        if interval > 0.0 {
            let instant = offset.saturating_sub(self.last_offset) as f64 / interval;
            self.throughput =
                self.throughput * (1.0 - THROUGHPUT_SMOOTHING) + instant * THROUGHPUT_SMOOTHING;
        }
        self.last_checkpoint = now;
        self.last_offset = offset;

        let remaining = self.total_len.saturating_sub(offset) as f64;
        let eta_secs = if self.throughput > 0.0 {
            remaining / self.throughput
        } else {
            f64::INFINITY
        };

        Progress {
            fraction_done: (offset as f64 / self.total_len as f64).min(1.0),
            done_mb: offset as f64 / BYTES_PER_MB,
            total_mb: self.total_mb(),
            elapsed_secs: now.duration_since(self.started).as_secs_f64(),
            eta_secs,
        }
    }

    fn complete(&self) -> Progress {
        Progress {
            fraction_done: 1.0,
            done_mb: self.total_mb(),
            total_mb: self.total_mb(),
            elapsed_secs: self.started.elapsed().as_secs_f64(),
            eta_secs: 0.0,
        }
    }

    fn total_mb(&self) -> f64 {
        self.total_len as f64 / BYTES_PER_MB
    }
}

/// Forward-only iterator over the data blocks of a .plx byte image.
///
/// Reaching the end of the data, or a truncated final block, ends the
/// iteration normally after a final 100% progress report. Errors end it too:
/// after yielding an `Err` the scanner yields nothing more.
pub struct BlockScanner<'a> {
    data: &'a [u8],
    offset: usize,
    ad_frequency: f64,
    slow_channels: &'a [SlowChannelDescriptor],
    options: ScanOptions,
    progress: Option<ProgressCallback<'a>>,
    tracker: ProgressTracker,
    summary: ScanSummary,
    finished: bool,
}

impl<'a> BlockScanner<'a> {
    /// Creates a scanner starting at `start_offset` of `data`.
    ///
    /// `slow_channels` supplies the gain and sampling rate used to scale
    /// A/D blocks; it is indexed by the block's channel number.
    pub fn new(
        data: &'a [u8],
        start_offset: usize,
        header: &FileHeader,
        slow_channels: &'a [SlowChannelDescriptor],
    ) -> Self {
        let options = ScanOptions::default();
        Self {
            data,
            offset: start_offset,
            ad_frequency: header.ad_frequency as f64,
            slow_channels,
            options,
            progress: None,
            tracker: ProgressTracker::new(
                start_offset,
                data.len(),
                options.initial_throughput_mb_s,
            ),
            summary: ScanSummary {
                end_offset: start_offset,
                ..ScanSummary::default()
            },
            finished: false,
        }
    }

    /// Replaces the scan options.
    pub fn with_options(mut self, options: ScanOptions) -> Self {
        self.tracker.throughput = options.initial_throughput_mb_s * BYTES_PER_MB;
        self.options = options;
        self
    }

    /// Installs a progress callback.
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&Progress) -> Result<(), ProgressError> + 'a,
    {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Installs an already boxed progress callback, if any.
    pub fn with_progress(mut self, callback: Option<ProgressCallback<'a>>) -> Self {
        self.progress = callback;
        self
    }

    /// Current cursor position.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes between the cursor and the end of the image.
    pub fn remaining_len(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }

    /// Options in effect for this scan.
    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Counters so far; `end` is set once the iterator is exhausted.
    pub fn summary(&self) -> &ScanSummary {
        &self.summary
    }

    fn classify(
        &self,
        header: &BlockHeader,
        payload: &[u8],
    ) -> Result<Option<DataBlockRecord>, DecodeError> {
        let sample_count = payload.len() / 2;
        let record = match RecordType::from_code(header.type_code) {
            Some(RecordType::Spike) => Some(DataBlockRecord::Spike(SpikeRecord {
                channel: header.channel as u16,
                unit: header.unit as u16,
                timestamp: header.timestamp(),
                sample_count,
            })),
            Some(RecordType::ExternalEvent) => {
                Some(DataBlockRecord::ExternalEvent(ExternalEventRecord {
                    channel: header.channel as u16,
                    value: header.unit as u16,
                    timestamp: header.timestamp(),
                    sample_count,
                }))
            }
            Some(RecordType::AdData) if self.options.decode_ad => Some(
                DataBlockRecord::AdSamples(self.decode_ad_block(header, payload)?),
            ),
            Some(RecordType::AdData) => None,
            Some(RecordType::Stereotrode) | Some(RecordType::Tetrode) | None => {
                log::trace!(
                    "skipping block type {} at offset {}",
                    header.type_code,
                    self.offset
                );
                None
            }
        };
        Ok(record)
    }

    fn decode_ad_block(
        &self,
        header: &BlockHeader,
        payload: &[u8],
    ) -> Result<AdSampleBlock, DecodeError> {
        let slow = usize::try_from(header.channel)
            .ok()
            .and_then(|index| self.slow_channels.get(index))
            .ok_or(DecodeError::ChannelIndexOutOfRange {
                channel: header.channel,
                available: self.slow_channels.len(),
            })?;
        if slow.ad_frequency <= 0 || slow.gain == 0 {
            return Err(DecodeError::InvalidFormat(format!(
                "slow channel {} has sampling frequency {} Hz and gain {}",
                header.channel, slow.ad_frequency, slow.gain
            )));
        }

        let base = header.timestamp();
        let step = self.ad_frequency / slow.ad_frequency as f64;
        let count = (header.samples_per_waveform.max(0) as usize).min(payload.len() / 2);

        let samples = parser::samples(payload)
            .take(count)
            .enumerate()
            .map(|(i, raw)| AdSample {
                timestamp: (base as f64 + i as f64 * step) / self.ad_frequency,
                value: parser::ad_value(raw, slow.gain),
            })
            .collect();

        Ok(AdSampleBlock {
            channel: header.channel as u16,
            timestamp: base,
            sample_count: payload.len() / 2,
            samples,
        })
    }

    fn report_checkpoint(&mut self) -> Result<(), DecodeError> {
        let interval = self.options.progress_interval.max(1);
        if self.summary.blocks % interval != 0 {
            return Ok(());
        }
        if let Some(callback) = self.progress.as_mut() {
            let progress = self.tracker.checkpoint(self.offset);
            callback(&progress).map_err(DecodeError::Progress)?;
        }
        Ok(())
    }

    fn finish(&mut self, end: ScanEnd) -> Option<Result<DataBlockRecord, DecodeError>> {
        self.finished = true;
        self.summary.end = Some(end);

        if let ScanEnd::Truncated { offset } = end {
            log::warn!(
                "truncated data block at offset {offset} of {}, stopping scan",
                self.data.len()
            );
        }
        log::info!(
            "scanned {} blocks ({} spikes, {} events, {} A/D blocks, {} skipped)",
            self.summary.blocks,
            self.summary.spikes,
            self.summary.external_events,
            self.summary.ad_blocks,
            self.summary.skipped
        );

        let callback = self.progress.as_mut()?;
        let progress = self.tracker.complete();
        callback(&progress).err().map(|e| Err(DecodeError::Progress(e)))
    }

    fn fail(&mut self, err: DecodeError) -> Option<Result<DataBlockRecord, DecodeError>> {
        self.finished = true;
        Some(Err(err))
    }
}

impl Iterator for BlockScanner<'_> {
    type Item = Result<DataBlockRecord, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let data = self.data;
        loop {
            let header = match parser::read_block_header(data, self.offset) {
                BlockRead::Header(header) => header,
                BlockRead::EndOfData => return self.finish(ScanEnd::Exhausted),
            };

            let block_start = self.offset;
            let payload_start = block_start + BLOCK_HEADER_SIZE;
            let payload = header
                .payload_len()
                .and_then(|len| payload_start.checked_add(len))
                .and_then(|end| data.get(payload_start..end));
            let Some(payload) = payload else {
                return self.finish(ScanEnd::Truncated {
                    offset: block_start,
                });
            };

            let record = match self.classify(&header, payload) {
                Ok(record) => record,
                Err(err) => return self.fail(err),
            };

            self.offset = payload_start + payload.len();
            self.summary.blocks += 1;
            self.summary.end_offset = self.offset;
            match RecordType::from_code(header.type_code) {
                Some(RecordType::Spike) => self.summary.spikes += 1,
                Some(RecordType::ExternalEvent) => self.summary.external_events += 1,
                Some(RecordType::AdData) => self.summary.ad_blocks += 1,
                _ => self.summary.skipped += 1,
            }

            if let Err(err) = self.report_checkpoint() {
                return self.fail(err);
            }
            if let Some(record) = record {
                return Some(Ok(record));
            }
        }
    }
}
