//! Synthetic .plx image builder shared by the integration tests and benches.

#![allow(dead_code)]

use plx_core::parser::{
    AD_COUNT_FIRST_SLOT, CHANNEL_DESCRIPTOR_SIZE, COUNT_CHANNELS, COUNT_UNITS, EVENT_COUNT_SLOTS,
    EVENT_DESCRIPTOR_SIZE, FILE_HEADER_SIZE, FIXED_HEADER_SIZE, MAGIC_NUMBER,
    SLOW_CHANNEL_DESCRIPTOR_SIZE,
};

pub const AD_FREQUENCY: i32 = 40_000;

/// Builds a complete .plx byte image block by block, keeping the header
/// count tables in step with the blocks written.
pub struct PlxBuilder {
    version: i32,
    ad_frequency: i32,
    dsp_channels: usize,
    event_channels: usize,
    slow_channels: Vec<(i32, i32)>,
    ts_counts: Vec<[i32; COUNT_UNITS]>,
    wf_counts: Vec<[i32; COUNT_UNITS]>,
    ev_counts: Vec<i32>,
    last_timestamp: u64,
    blocks: Vec<u8>,
}

impl PlxBuilder {
    pub fn new() -> Self {
        Self {
            version: 105,
            ad_frequency: AD_FREQUENCY,
            dsp_channels: 4,
            event_channels: 3,
            slow_channels: Vec::new(),
            ts_counts: vec![[0; COUNT_UNITS]; COUNT_CHANNELS],
            wf_counts: vec![[0; COUNT_UNITS]; COUNT_CHANNELS],
            ev_counts: vec![0; EVENT_COUNT_SLOTS],
            last_timestamp: 0,
            blocks: Vec::new(),
        }
    }

    pub fn version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }

    /// Declares a slow channel with the given rate (Hz) and gain.
    pub fn slow_channel(mut self, ad_frequency: i32, gain: i32) -> Self {
        self.slow_channels.push((ad_frequency, gain));
        self
    }

    pub fn spike(&mut self, timestamp: u64, channel: u16, unit: u16, samples: usize) -> &mut Self {
        if (channel as usize) < COUNT_CHANNELS && (unit as usize) < COUNT_UNITS {
            self.ts_counts[channel as usize][unit as usize] += 1;
            self.wf_counts[channel as usize][unit as usize] += 1;
        }
        let waveform: Vec<i16> = (0..samples as i16).collect();
        self.block(1, timestamp, channel as i16, unit as i16, &waveform)
    }

    pub fn event(&mut self, timestamp: u64, channel: u16, value: u16) -> &mut Self {
        if (channel as usize) < AD_COUNT_FIRST_SLOT {
            self.ev_counts[channel as usize] += 1;
        }
        self.block(4, timestamp, channel as i16, value as i16, &[])
    }

    pub fn ad(&mut self, timestamp: u64, channel: u16, samples: &[i16]) -> &mut Self {
        let slot = AD_COUNT_FIRST_SLOT + channel as usize;
        if slot < EVENT_COUNT_SLOTS {
            self.ev_counts[slot] += samples.len() as i32;
        }
        self.block(5, timestamp, channel as i16, 0, samples)
    }

    /// Writes a block of an arbitrary type without touching the counts.
    pub fn block(
        &mut self,
        type_code: i16,
        timestamp: u64,
        channel: i16,
        unit: i16,
        samples: &[i16],
    ) -> &mut Self {
        self.last_timestamp = self.last_timestamp.max(timestamp);
        self.blocks.extend_from_slice(&type_code.to_le_bytes());
        self.blocks
            .extend_from_slice(&((timestamp >> 32) as u16).to_le_bytes());
        self.blocks
            .extend_from_slice(&(timestamp as u32).to_le_bytes());
        self.blocks.extend_from_slice(&channel.to_le_bytes());
        self.blocks.extend_from_slice(&unit.to_le_bytes());
        let waveforms: i16 = if samples.is_empty() { 0 } else { 1 };
        self.blocks.extend_from_slice(&waveforms.to_le_bytes());
        self.blocks
            .extend_from_slice(&(samples.len() as i16).to_le_bytes());
        for s in samples {
            self.blocks.extend_from_slice(&s.to_le_bytes());
        }
        self
    }

    /// Appends raw bytes after the last block.
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.blocks.extend_from_slice(bytes);
        self
    }

    /// Offset the next block would be written at.
    pub fn next_offset(&self) -> usize {
        self.data_region_offset() + self.blocks.len()
    }

    pub fn data_region_offset(&self) -> usize {
        FILE_HEADER_SIZE
            + self.dsp_channels * CHANNEL_DESCRIPTOR_SIZE
            + self.event_channels * EVENT_DESCRIPTOR_SIZE
            + self.slow_channels.len() * SLOW_CHANNEL_DESCRIPTOR_SIZE
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = self.header();
        for i in 0..self.dsp_channels {
            let mut d = vec![0u8; CHANNEL_DESCRIPTOR_SIZE];
            put_text(&mut d, 0, &format!("sig{:03}", i + 1));
            put_i32(&mut d, 64, i as i32 + 1);
            put_i32(&mut d, 80, 32);
            out.extend_from_slice(&d);
        }
        let event_names = ["Strobed", "Start", "Stop"];
        let event_channels = [257, 258, 259];
        for i in 0..self.event_channels {
            let mut d = vec![0u8; EVENT_DESCRIPTOR_SIZE];
            put_text(&mut d, 0, event_names[i % 3]);
            put_i32(&mut d, 32, event_channels[i % 3]);
            out.extend_from_slice(&d);
        }
        for (i, &(freq, gain)) in self.slow_channels.iter().enumerate() {
            let mut d = vec![0u8; SLOW_CHANNEL_DESCRIPTOR_SIZE];
            put_text(&mut d, 0, &format!("AD{:02}", i + 1));
            put_i32(&mut d, 32, i as i32);
            put_i32(&mut d, 36, freq);
            put_i32(&mut d, 40, gain);
            put_i32(&mut d, 44, 1);
            put_i32(&mut d, 48, 1);
            out.extend_from_slice(&d);
        }
        out.extend_from_slice(&self.blocks);
        out
    }

    fn header(&self) -> Vec<u8> {
        let mut h = vec![0u8; FIXED_HEADER_SIZE];
        h[0..4].copy_from_slice(&MAGIC_NUMBER.to_le_bytes());
        put_i32(&mut h, 4, self.version);
        put_text(&mut h, 8, "synthetic session");
        put_i32(&mut h, 136, self.ad_frequency);
        put_i32(&mut h, 140, self.dsp_channels as i32);
        put_i32(&mut h, 144, self.event_channels as i32);
        put_i32(&mut h, 148, self.slow_channels.len() as i32);
        put_i32(&mut h, 152, 32);
        put_i32(&mut h, 156, 8);
        for (i, v) in [2023, 11, 2, 9, 15, 0].iter().enumerate() {
            put_i32(&mut h, 160 + i * 4, *v);
        }
        put_i32(&mut h, 188, self.ad_frequency);
        h[192..200].copy_from_slice(&(self.last_timestamp as f64).to_le_bytes());
        h[200..204].copy_from_slice(&[1, 1, 12, 12]);
        h[204..206].copy_from_slice(&3000u16.to_le_bytes());
        h[206..208].copy_from_slice(&5000u16.to_le_bytes());
        h[208..210].copy_from_slice(&1000u16.to_le_bytes());

        for table in [&self.ts_counts, &self.wf_counts] {
            for row in table.iter() {
                for c in row {
                    h.extend_from_slice(&c.to_le_bytes());
                }
            }
        }
        for c in &self.ev_counts {
            h.extend_from_slice(&c.to_le_bytes());
        }
        assert_eq!(h.len(), FILE_HEADER_SIZE);
        h
    }
}

fn put_i32(buf: &mut [u8], at: usize, value: i32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_text(buf: &mut [u8], at: usize, text: &str) {
    buf[at..at + text.len()].copy_from_slice(text.as_bytes());
}

/// A mixed session: sorted and unsorted spikes on four channels, strobed
/// words, start/stop markers and unstrobed words on bits 0, 1, 2 and 31.
pub fn mixed_session() -> PlxBuilder {
    let mut b = PlxBuilder::new().slow_channel(1000, 1);
    b.event(0, 258, 0);
    for i in 0..200u64 {
        let t = 100 + i * 400;
        b.spike(t, (i % 4) as u16 + 1, (i % 3) as u16, 32);
        if i % 10 == 0 {
            b.event(t + 1, 257, (i as u16) | 0x8000);
            b.event(t + 2, 257, i as u16);
        }
        if i % 25 == 0 {
            b.ad(t + 3, 0, &[1024, -512, 0, 2047]);
        }
        if i % 7 == 0 {
            // word 0b101 at t + 5, word (1 << 31) | 2 at t + 6
            b.event(t + 5, 1, 0);
            b.event(t + 5, 3, 0);
            b.event(t + 6, 2, 0);
            b.event(t + 6, 32, 0);
        }
    }
    b.event(100 + 200 * 400, 259, 0);
    b
}
