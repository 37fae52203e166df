//! Integration tests for the .plx decoder.
//!
//! Most tests run over synthetic images from `common::PlxBuilder`. The
//! real-recording test needs `test_data/session.plx` and is skipped when the
//! file is absent.
//! Run with: cargo test --test integration_tests

mod common;

use common::{mixed_session, PlxBuilder, AD_FREQUENCY};
use plx_core::classify::{self, ExternalEventKind, ExternalEvents};
use plx_core::parser::{COUNT_CHANNELS, COUNT_UNITS, FILE_HEADER_SIZE, FIXED_HEADER_SIZE};
use plx_core::scanner::ProgressError;
use plx_core::{
    decode_bytes, output, words, DecodeError, EventSource, OnlineWords, PlxFile, Progress,
    RecordType, ReplaySource, ScanEnd, ScanOptions,
};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

const TEST_FILE: &str = "test_data/session.plx";

fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(bytes).expect("Failed to write temp file");
    file.flush().unwrap();
    file
}

/// Test that a real recording decodes and agrees with its own header.
#[test]
fn test_decode_real_file() {
    let test_path = Path::new(TEST_FILE);
    if !test_path.exists() {
        eprintln!("Skipping test: test file not found at {}", TEST_FILE);
        return;
    }

    let file = PlxFile::open(test_path).expect("Failed to open file");
    let result = file
        .decode(ScanOptions::default(), None)
        .expect("Failed to decode file");

    assert!(matches!(
        result.summary.end,
        Some(ScanEnd::Exhausted) | Some(ScanEnd::Truncated { .. })
    ));
    assert_eq!(
        result.events.len() as u64,
        result.summary.spikes + result.summary.external_events
    );
}

/// Test that per (channel, unit) spike counts match the header tables.
#[test]
fn test_spike_counts_match_header() {
    let data = mixed_session().build();
    let result = decode_bytes(&data, ScanOptions::default(), None).unwrap();
    let file = plx_core::FileHeader::parse(&data).unwrap();

    let mut counts: HashMap<(usize, usize), i32> = HashMap::new();
    let events = &result.events;
    for i in 0..events.len() {
        if events.types[i] == RecordType::Spike as u8 {
            *counts
                .entry((events.channels[i] as usize, events.units[i] as usize))
                .or_default() += 1;
        }
    }

    assert!(!counts.is_empty());
    for channel in 0..COUNT_CHANNELS {
        for unit in 0..COUNT_UNITS {
            let decoded = counts.get(&(channel, unit)).copied().unwrap_or(0);
            assert_eq!(
                file.ts_count(channel, unit),
                Some(decoded),
                "count mismatch for channel {} unit {}",
                channel,
                unit
            );
        }
    }
    assert_eq!(result.summary.spikes, 200);
}

/// Test that event timestamps come out non-decreasing and in seconds.
#[test]
fn test_timestamps_monotonic() {
    let data = mixed_session().build();
    let result = decode_bytes(&data, ScanOptions::default(), None).unwrap();

    let timestamps = &result.events.timestamps;
    for (i, pair) in timestamps.windows(2).enumerate() {
        assert!(
            pair[1] >= pair[0],
            "Timestamp decreased at event {}: {} -> {}",
            i,
            pair[0],
            pair[1]
        );
    }
    assert_eq!(timestamps[0], 0.0);
    assert_eq!(timestamps[1], 100.0 / AD_FREQUENCY as f64);
}

/// Test that a clean file is consumed exactly to its end.
#[test]
fn test_scan_consumes_whole_file() {
    let builder = mixed_session();
    let data = builder.build();
    let result = decode_bytes(&data, ScanOptions::default(), None).unwrap();

    assert_eq!(result.summary.end, Some(ScanEnd::Exhausted));
    assert_eq!(result.summary.end_offset, data.len());
    assert_eq!(
        result.summary.blocks,
        result.summary.spikes + result.summary.external_events + result.summary.ad_blocks
    );
}

/// Test that timestamps above 32 bits are composed from both header words.
#[test]
fn test_wide_timestamps() {
    let mut builder = PlxBuilder::new();
    builder.event(0x0001_0000_0002, 258, 0);
    let data = builder.build();

    let file = write_temp(&data);
    let plx = PlxFile::open(file.path()).unwrap();
    let records: Vec<_> = plx.records().collect::<Result<_, _>>().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].record_type(), RecordType::ExternalEvent);
    assert_eq!(records[0].timestamp(), 4_294_967_298);
}

/// Test that an opened file and its raw image decode identically.
#[test]
fn test_file_and_image_decode_agree() {
    let data = mixed_session().build();
    let file = write_temp(&data);
    let plx = PlxFile::open(file.path()).unwrap();
    assert_eq!(plx.data(), &data[..]);

    let from_file = plx.decode(ScanOptions::default(), None).unwrap();
    let from_image = decode_bytes(plx.data(), ScanOptions::default(), None).unwrap();
    assert_eq!(from_file.events.timestamps, from_image.events.timestamps);
    assert_eq!(from_file.events.channels, from_image.events.channels);
    assert_eq!(from_file.ad.values, from_image.ad.values);
    assert_eq!(from_file.summary.blocks, from_image.summary.blocks);
}

/// Test that absurd header count tables do not drive column allocation.
#[test]
fn test_oversized_header_counts() {
    let data = mixed_session().build();
    let expected = decode_bytes(&data, ScanOptions::default(), None).unwrap();

    let mut corrupt = data.clone();
    for at in (FIXED_HEADER_SIZE..FILE_HEADER_SIZE).step_by(4) {
        corrupt[at..at + 4].copy_from_slice(&i32::MAX.to_le_bytes());
    }
    let header = plx_core::FileHeader::parse(&corrupt).unwrap();
    assert!(header.single_waveform_count() >= i32::MAX as usize);

    let result = decode_bytes(&corrupt, ScanOptions::default(), None).unwrap();
    assert_eq!(result.events.timestamps, expected.events.timestamps);
    assert_eq!(result.events.types, expected.events.types);
    assert_eq!(result.ad.values, expected.ad.values);
    assert_eq!(result.summary.end, Some(ScanEnd::Exhausted));
}

/// Test that a partial final block ends the scan without being emitted.
#[test]
fn test_truncated_tail() {
    let mut builder = PlxBuilder::new();
    builder.spike(10, 1, 1, 32).event(20, 258, 0);
    let cut = builder.next_offset();
    builder.spike(30, 1, 1, 32);
    let mut data = builder.build();
    data.truncate(data.len() - 10);

    let result = decode_bytes(&data, ScanOptions::default(), None).unwrap();
    assert_eq!(result.events.len(), 2);
    assert_eq!(result.summary.end, Some(ScanEnd::Truncated { offset: cut }));
    assert_eq!(result.summary.end_offset, cut);
}

/// Test that a few stray bytes after the last block are ignored.
#[test]
fn test_short_trailer_is_end_of_data() {
    let mut builder = PlxBuilder::new();
    builder.event(20, 258, 0).raw(&[0xAB; 15]);
    let data = builder.build();

    let result = decode_bytes(&data, ScanOptions::default(), None).unwrap();
    assert_eq!(result.events.len(), 1);
    assert_eq!(result.summary.end, Some(ScanEnd::Exhausted));
    assert_eq!(result.summary.end_offset, data.len() - 15);
}

/// Test that stereotrode and tetrode blocks are stepped over.
#[test]
fn test_reserved_blocks_skipped() {
    let mut builder = PlxBuilder::new();
    builder
        .spike(10, 1, 1, 8)
        .block(2, 15, 1, 1, &[1, 2, 3, 4])
        .block(3, 16, 1, 1, &[1, 2])
        .event(20, 259, 0);
    let data = builder.build();

    let result = decode_bytes(&data, ScanOptions::default(), None).unwrap();
    assert_eq!(result.events.types, vec![1, 4]);
    assert_eq!(result.summary.skipped, 2);
    assert_eq!(result.summary.end_offset, data.len());
}

/// Test opening files with bad versions and magic numbers.
#[test]
fn test_open_rejects_bad_files() {
    let data = PlxBuilder::new().version(104).build();
    let file = write_temp(&data);
    assert!(matches!(
        PlxFile::open(file.path()),
        Err(DecodeError::UnsupportedVersion(104))
    ));

    let mut data = PlxBuilder::new().build();
    data[0..4].copy_from_slice(b"RIFF");
    let file = write_temp(&data);
    assert!(matches!(
        PlxFile::open(file.path()),
        Err(DecodeError::InvalidMagic(_))
    ));

    let file = write_temp(&[0u8; 100]);
    assert!(matches!(
        PlxFile::open(file.path()),
        Err(DecodeError::TruncatedHeader { .. })
    ));

    assert!(matches!(
        PlxFile::open("does/not/exist.plx"),
        Err(DecodeError::Io(_))
    ));
}

/// Test that version 106 files decode the same way.
#[test]
fn test_open_version_106() {
    let mut builder = PlxBuilder::new().version(106).slow_channel(2000, 2);
    builder.spike(5, 2, 1, 32).ad(6, 0, &[2048]);
    let file = write_temp(&builder.build());

    let plx = PlxFile::open(file.path()).unwrap();
    assert_eq!(plx.header().version, 106);
    assert_eq!(plx.descriptors().channels.len(), 4);
    assert_eq!(plx.descriptors().events[0].name, "Strobed");
    assert_eq!(plx.descriptors().slow_channels[0].gain, 2);
    assert_eq!(
        plx.header().recorded_at().unwrap().to_string(),
        "2023-11-02 09:15:00"
    );

    let ad = plx.ad_columns(None).unwrap();
    assert_eq!(ad.values, vec![2.5]);
}

/// Test that an A/D block naming an undeclared slow channel fails the decode.
#[test]
fn test_ad_channel_out_of_range() {
    let mut builder = PlxBuilder::new().slow_channel(1000, 1);
    builder.ad(10, 0, &[1]).ad(20, 4, &[1]);
    let data = builder.build();

    let err = decode_bytes(&data, ScanOptions::default(), None).unwrap_err();
    assert!(matches!(
        err,
        DecodeError::ChannelIndexOutOfRange {
            channel: 4,
            available: 1
        }
    ));
}

/// Test that event-only decoding steps over A/D blocks unchecked.
#[test]
fn test_event_columns_skip_ad_blocks() {
    let mut builder = PlxBuilder::new().slow_channel(1000, 1);
    builder
        .spike(10, 1, 1, 32)
        .ad(20, 4, &[1, 2, 3])
        .event(30, 258, 0);
    let data = builder.build();

    let file = write_temp(&data);
    let plx = PlxFile::open(file.path()).unwrap();
    let events = plx.event_columns(None).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(
        events.types,
        vec![RecordType::Spike as u8, RecordType::ExternalEvent as u8]
    );

    assert!(matches!(
        plx.ad_columns(None),
        Err(DecodeError::ChannelIndexOutOfRange { channel: 4, .. })
    ));

    let options = ScanOptions {
        decode_ad: false,
        ..ScanOptions::default()
    };
    let result = plx.decode(options, None).unwrap();
    assert!(result.ad.is_empty());
    assert_eq!(result.summary.ad_blocks, 1);
    assert_eq!(result.summary.end_offset, data.len());
}

/// Test A/D scaling and per-sample timestamps.
#[test]
fn test_ad_columns() {
    let data = mixed_session().build();
    let result = decode_bytes(&data, ScanOptions::default(), None).unwrap();

    // 8 blocks of 4 samples
    assert_eq!(result.ad.len(), 32);
    assert_eq!(result.summary.ad_blocks, 8);
    assert_eq!(&result.ad.values[..4], &[2.5, -1.25, 0.0, 2047.0 * 5.0 / 2048.0]);
    assert!(result.ad.channels.iter().all(|&c| c == 0));

    let step = (AD_FREQUENCY as f64 / 1000.0) / AD_FREQUENCY as f64;
    let first = 103.0 / AD_FREQUENCY as f64;
    assert_eq!(result.ad.timestamps[0], first);
    assert!((result.ad.timestamps[1] - (first + step)).abs() < 1e-12);
}

/// Test progress reporting with a short interval.
#[test]
fn test_progress_monotonic_and_complete() {
    let data = mixed_session().build();
    let mut reports: Vec<Progress> = Vec::new();

    let options = ScanOptions {
        progress_interval: 50,
        ..ScanOptions::default()
    };
    decode_bytes(
        &data,
        options,
        Some(Box::new(|p: &Progress| -> Result<(), ProgressError> {
            reports.push(*p);
            Ok(())
        })),
    )
    .unwrap();

    assert!(reports.len() > 2);
    for pair in reports.windows(2) {
        assert!(pair[1].fraction_done >= pair[0].fraction_done);
        assert!(pair[1].done_mb >= pair[0].done_mb);
    }
    for report in &reports {
        assert!((0.0..=1.0).contains(&report.fraction_done));
        assert!(report.eta_secs >= 0.0);
        assert_eq!(report.total_mb, data.len() as f64 / 1e6);
    }
    let last = reports.last().unwrap();
    assert_eq!(last.fraction_done, 1.0);
    assert_eq!(last.eta_secs, 0.0);
}

/// Test the default interval over more than two intervals' worth of blocks.
#[test]
fn test_progress_default_interval() {
    let mut builder = PlxBuilder::new();
    for i in 0..65_000u64 {
        builder.event(i, 258, 0);
    }
    let data = builder.build();

    let mut count = 0;
    let result = decode_bytes(
        &data,
        ScanOptions::default(),
        Some(Box::new(|_: &Progress| -> Result<(), ProgressError> {
            count += 1;
            Ok(())
        })),
    )
    .unwrap();

    assert_eq!(result.events.len(), 65_000);
    // at 30000 and 60000 blocks, plus the final report
    assert_eq!(count, 3);
}

/// Test that a failing progress callback aborts the decode.
#[test]
fn test_progress_abort() {
    let data = mixed_session().build();
    let options = ScanOptions {
        progress_interval: 10,
        ..ScanOptions::default()
    };

    let err = decode_bytes(
        &data,
        options,
        Some(Box::new(|p: &Progress| -> Result<(), ProgressError> {
            if p.fraction_done > 0.5 {
                Err("cancelled".into())
            } else {
                Ok(())
            }
        })),
    )
    .unwrap_err();
    assert!(matches!(err, DecodeError::Progress(_)));
}

/// Test sorted spike trains and external event extraction end to end.
#[test]
fn test_classification() {
    let data = mixed_session().build();
    let events = decode_bytes(&data, ScanOptions::default(), None)
        .unwrap()
        .events;

    let units = classify::spike_units_by_channel(&events);
    assert_eq!(units.len(), 4);
    assert!(units.values().all(|set| set.iter().all(|&u| u == 'a' || u == 'b')));

    let trains = classify::spike_trains(&events);
    let total: usize = trains
        .values()
        .flat_map(|by_unit| by_unit.values())
        .map(Vec::len)
        .sum();
    // unit 0 spikes (every third) are unsorted
    assert_eq!(total, 200 - 67);

    let start = classify::external_events(&events, ExternalEventKind::Start).unwrap();
    assert_eq!(start, ExternalEvents::Timestamps(vec![0.0]));
    let stop = classify::external_events(&events, ExternalEventKind::Stop).unwrap();
    assert_eq!(stop.len(), 1);

    let first = classify::external_events(&events, ExternalEventKind::FirstStrobeWord).unwrap();
    let second = classify::external_events(&events, ExternalEventKind::SecondStrobeWord).unwrap();
    assert_eq!(first.len(), 20);
    assert_eq!(second.len(), 20);
    assert_eq!(first.timestamps()[0], 102.0 / AD_FREQUENCY as f64);
    assert_eq!(second.timestamps()[0], 101.0 / AD_FREQUENCY as f64);
    assert_eq!(start.timestamps(), vec![0.0]);
    if let ExternalEvents::Strobed(words) = first {
        assert_eq!(words[1].value, 10);
    } else {
        panic!("expected strobed words");
    }
}

/// Test offline word reconstruction over a decoded file.
#[test]
fn test_offline_words() {
    let data = mixed_session().build();
    let events = decode_bytes(&data, ScanOptions::default(), None)
        .unwrap()
        .events;

    let words = words::reconstruct_columns(&events);
    assert_eq!(words.len(), 58);
    assert_eq!(words[0].word, 0b101);
    assert_eq!(words[1].word, 0x8000_0002);
    assert_eq!(words[0].timestamp, 105.0 / AD_FREQUENCY as f64);
    for pair in words.windows(2) {
        assert!(pair[1].timestamp > pair[0].timestamp);
    }
}

/// Test that online reconstruction through bounded polls matches offline.
#[test]
fn test_online_words_match_offline() {
    let data = mixed_session().build();
    let events = decode_bytes(&data, ScanOptions::default(), None)
        .unwrap()
        .events;
    let offline = words::reconstruct_columns(&events);

    // Batch sizes that never release a held word on an empty batch.
    for batch_size in [events.len(), 500, 100] {
        let mut online = OnlineWords::new(ReplaySource::new(events.clone()), batch_size);
        let mut out = Vec::new();
        while !online.source().is_exhausted() {
            out.extend(online.poll().unwrap());
        }
        out.extend(online.finish());
        assert_eq!(out, offline, "batch size {batch_size}");
    }
}

/// Test that a replay source never hands out more than asked for.
#[test]
fn test_replay_source_batches() {
    let data = mixed_session().build();
    let events = decode_bytes(&data, ScanOptions::default(), None)
        .unwrap()
        .events;
    let total = events.len();

    let mut source = ReplaySource::new(events);
    let mut seen = 0;
    loop {
        let batch = source.poll_batch(plx_core::source::MAX_EVENTS_PER_READ / 40).unwrap();
        if batch.is_empty() {
            break;
        }
        assert!(batch.len() <= 200);
        seen += batch.len();
    }
    assert_eq!(seen, total);
}

/// Test CSV output of decoded columns.
#[test]
fn test_csv_output() {
    let data = mixed_session().build();
    let result = decode_bytes(&data, ScanOptions::default(), None).unwrap();
    let words = words::reconstruct_columns(&result.events);

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let events_path = dir.path().join("events.csv");
    let ad_path = dir.path().join("ad.csv");
    let words_path = dir.path().join("words.csv");

    output::write_events_csv(&events_path, &result.events).expect("Failed to write events");
    output::write_ad_csv(&ad_path, &result.ad).expect("Failed to write samples");
    output::write_words_csv(&words_path, &words).expect("Failed to write words");

    let events_csv = std::fs::read_to_string(&events_path).unwrap();
    let mut lines = events_csv.lines();
    assert_eq!(lines.next(), Some("type,channel,unit,timestamp"));
    assert_eq!(lines.next(), Some("4,258,0,0"));
    assert_eq!(events_csv.lines().count(), result.events.len() + 1);

    let ad_csv = std::fs::read_to_string(&ad_path).unwrap();
    assert_eq!(ad_csv.lines().nth(1), Some("0,2.5,0.002575"));

    let words_csv = std::fs::read_to_string(&words_path).unwrap();
    assert_eq!(words_csv.lines().nth(1), Some("5,0.002625"));
    assert_eq!(words_csv.lines().count(), words.len() + 1);
}
