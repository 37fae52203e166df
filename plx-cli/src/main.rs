//! Plexon .plx decoder CLI application.
//!
//! Inspects .plx recordings and exports their events, continuous samples
//! and reconstructed words to CSV.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use plx_core::classify::{self, ExternalEventKind};
use plx_core::output::{self, WordCsvWriter};
use plx_core::scanner::{ProgressCallback, ProgressError};
use plx_core::source::MAX_EVENTS_PER_READ;
use plx_core::{words, OnlineWords, PlxFile, Progress, ReplaySource, ScanOptions};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Resolution of the progress bar.
const PROGRESS_STEPS: u64 = 1000;

/// Decoder for Plexon .plx neurophysiology recordings.
///
/// Reads spike, external event and continuous data blocks and writes them
/// out as CSV.
#[derive(Parser, Debug)]
#[command(name = "plx")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Suppress progress output and all logging below errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log debug details
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the file header, descriptor tables and event counts
    Info {
        /// Input .plx file path
        #[arg(value_name = "INPUT")]
        input: PathBuf,
    },

    /// Export spike and external event timestamps
    ///
    /// Columns: type, channel, unit, timestamp (seconds).
    Events {
        /// Input .plx file path
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output CSV path
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,
    },

    /// Export continuous (A/D) samples in volts
    ///
    /// Columns: channel, value, timestamp (seconds).
    Ad {
        /// Input .plx file path
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output CSV path
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,
    },

    /// List sorted units and spike counts per channel
    Spikes {
        /// Input .plx file path
        #[arg(value_name = "INPUT")]
        input: PathBuf,
    },

    /// Reconstruct words from the 32 unstrobed bit channels
    ///
    /// Columns: word, timestamp (seconds).
    Words {
        /// Input .plx file path
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output CSV path
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        /// Replay the file in bounded polls, as a live acquisition
        /// client would deliver it
        #[arg(long)]
        online: bool,

        /// Events per poll in online mode
        #[arg(long, default_value_t = MAX_EVENTS_PER_READ)]
        batch_size: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.quiet {
        log::LevelFilter::Error
    } else if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_target(false)
        .format_timestamp_secs()
        .init();

    match &cli.command {
        Command::Info { input } => info(input, cli.quiet),
        Command::Events { input, output } => export_events(input, output, cli.quiet),
        Command::Ad { input, output } => export_ad(input, output, cli.quiet),
        Command::Spikes { input } => spikes(input, cli.quiet),
        Command::Words {
            input,
            output,
            online,
            batch_size,
        } => export_words(input, output, *online, *batch_size, cli.quiet),
    }
}

fn open(input: &Path) -> Result<PlxFile> {
    PlxFile::open(input).with_context(|| format!("Failed to open {:?}", input))
}

fn progress_bar(quiet: bool, input: &Path) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(PROGRESS_STEPS);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {msg}")
            .unwrap()
            .progress_chars("=>-"),
    );
    pb.set_message(format!(
        "Decoding {:?}...",
        input.file_name().unwrap_or_default()
    ));
    pb
}

fn progress_callback(pb: &ProgressBar) -> ProgressCallback<'_> {
    Box::new(move |p: &Progress| -> Result<(), ProgressError> {
        pb.set_position((p.fraction_done * PROGRESS_STEPS as f64) as u64);
        pb.set_message(format!(
            "{:.1}/{:.1} MB, ETA {:.0}s",
            p.done_mb, p.total_mb, p.eta_secs
        ));
        Ok(())
    })
}

fn info(input: &Path, quiet: bool) -> Result<()> {
    let file = open(input)?;
    let header = file.header();
    let descriptors = file.descriptors();

    println!("File:           {:?}", file.path());
    println!("Version:        {}", header.version);
    if !header.comment.is_empty() {
        println!("Comment:        {}", header.comment);
    }
    match header.recorded_at() {
        Some(at) => println!("Recorded:       {}", at),
        None => println!("Recorded:       (invalid date)"),
    }
    println!("Timestamp freq: {} Hz", header.ad_frequency);
    println!("Waveform freq:  {} Hz", header.waveform_freq);
    println!(
        "Duration:       {:.3}s",
        header.last_timestamp / header.ad_frequency as f64
    );
    println!(
        "Waveform:       {} points ({} pre-threshold)",
        header.num_points_wave, header.num_points_pre_threshold
    );
    println!(
        "Header counts:  {} waveforms, {} events, {} A/D samples",
        header.single_waveform_count(),
        header.external_event_count(),
        header.ad_sample_count()
    );

    println!();
    println!("DSP channels ({}):", descriptors.channels.len());
    for ch in &descriptors.channels {
        println!(
            "  {:>3}  {:<16} gain {:>5}  threshold {:>6}  units {}",
            ch.channel, ch.name, ch.gain, ch.threshold, ch.num_units
        );
    }
    println!("Event channels ({}):", descriptors.events.len());
    for ev in &descriptors.events {
        println!("  {:>3}  {}", ev.channel, ev.name);
    }
    println!("Slow channels ({}):", descriptors.slow_channels.len());
    for slow in &descriptors.slow_channels {
        println!(
            "  {:>3}  {:<16} {:>6} Hz  gain {:>5}{}",
            slow.channel,
            slow.name,
            slow.ad_frequency,
            slow.gain,
            if slow.enabled { "" } else { "  (disabled)" }
        );
    }

    let pb = progress_bar(quiet, input);
    let events = file
        .event_columns(Some(progress_callback(&pb)))
        .context("Failed to decode data blocks")?;
    pb.finish_and_clear();

    println!();
    println!("Events:         {}", classify::event_count(&events));
    for (label, kind) in [
        ("Start", ExternalEventKind::Start),
        ("Stop", ExternalEventKind::Stop),
        ("Pause", ExternalEventKind::Pause),
        ("Resume", ExternalEventKind::Resume),
        ("First strobes", ExternalEventKind::FirstStrobeWord),
        ("Second strobes", ExternalEventKind::SecondStrobeWord),
    ] {
        let found = classify::external_events(&events, kind)?;
        println!("  {:<14}{}", format!("{}:", label), found.len());
    }
    let unstrobed: usize = classify::unstrobed_bits(&events).iter().map(Vec::len).sum();
    println!("  {:<14}{}", "Unstrobed:", unstrobed);

    Ok(())
}

fn export_events(input: &Path, output_path: &Path, quiet: bool) -> Result<()> {
    let start_time = Instant::now();
    let file = open(input)?;

    let pb = progress_bar(quiet, input);
    let options = ScanOptions {
        decode_ad: false,
        ..ScanOptions::default()
    };
    let result = file
        .decode(options, Some(progress_callback(&pb)))
        .context("Failed to decode data blocks")?;

    pb.set_message(format!(
        "Writing to {:?}...",
        output_path.file_name().unwrap_or_default()
    ));
    output::write_events_csv(output_path, &result.events)
        .context("Failed to write event CSV")?;

    let total_duration = start_time.elapsed();
    pb.finish_with_message(format!(
        "Done! Wrote {} events in {:.2}s",
        result.events.len(),
        total_duration.as_secs_f64()
    ));

    if !quiet {
        eprintln!();
        eprintln!("Summary:");
        eprintln!("  Input:        {:?}", input);
        eprintln!("  Output:       {:?}", output_path);
        eprintln!("  Spikes:       {}", result.summary.spikes);
        eprintln!("  Events:       {}", result.summary.external_events);
        eprintln!("  Skipped:      {}", result.summary.skipped);
        eprintln!("  Duration:     {:.3}s", total_duration.as_secs_f64());
    }

    Ok(())
}

fn export_ad(input: &Path, output_path: &Path, quiet: bool) -> Result<()> {
    let start_time = Instant::now();
    let file = open(input)?;

    let pb = progress_bar(quiet, input);
    let ad = file
        .ad_columns(Some(progress_callback(&pb)))
        .context("Failed to decode data blocks")?;

    output::write_ad_csv(output_path, &ad).context("Failed to write A/D CSV")?;

    pb.finish_with_message(format!(
        "Done! Wrote {} samples in {:.2}s",
        ad.len(),
        start_time.elapsed().as_secs_f64()
    ));

    Ok(())
}

fn spikes(input: &Path, quiet: bool) -> Result<()> {
    let file = open(input)?;

    let pb = progress_bar(quiet, input);
    let events = file
        .event_columns(Some(progress_callback(&pb)))
        .context("Failed to decode data blocks")?;
    pb.finish_and_clear();

    let trains = classify::spike_trains(&events);
    if trains.is_empty() {
        println!("No sorted spikes.");
        return Ok(());
    }

    println!("{:>7}  {:>4}  {:>10}", "Channel", "Unit", "Spikes");
    for (channel, units) in &trains {
        for (unit, train) in units {
            println!("{:>7}  {:>4}  {:>10}", channel, unit, train.len());
        }
    }

    Ok(())
}

fn export_words(
    input: &Path,
    output_path: &Path,
    online: bool,
    batch_size: usize,
    quiet: bool,
) -> Result<()> {
    let start_time = Instant::now();
    let file = open(input)?;

    let pb = progress_bar(quiet, input);
    let events = file
        .event_columns(Some(progress_callback(&pb)))
        .context("Failed to decode data blocks")?;

    let count = if online {
        log::debug!("replaying {} events in polls of {}", events.len(), batch_size);
        let out = File::create(output_path)
            .with_context(|| format!("Failed to create {:?}", output_path))?;
        let mut writer = WordCsvWriter::new(out);
        writer.write_header()?;

        let mut online = OnlineWords::new(ReplaySource::new(events), batch_size);
        let mut count = 0;
        while !online.source().is_exhausted() {
            let words = online.poll()?;
            writer.write_words(&words)?;
            count += words.len();
        }
        if let Some(last) = online.finish() {
            writer.write_words(&[last])?;
            count += 1;
        }
        writer.flush().context("Failed to write word CSV")?;
        count
    } else {
        let words = words::reconstruct_columns(&events);
        output::write_words_csv(output_path, &words).context("Failed to write word CSV")?;
        words.len()
    };

    pb.finish_with_message(format!(
        "Done! Wrote {} words in {:.2}s",
        count,
        start_time.elapsed().as_secs_f64()
    ));

    Ok(())
}
