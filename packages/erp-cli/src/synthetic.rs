// Synthetic acquisition source for the simulate command
//
// Generates EEG-like channels (background oscillation plus an evoked bump
// after every pulse), one trigger line per stimulus, and a raw digital line
// that mirrors all triggers. Output is fully deterministic.

use erp_rs::config::DEFAULT_RAW_DIGITAL_CHANNEL;
use erp_rs::{Block, ChannelInfo, ChannelKind, Result};
use std::f64::consts::PI;

const BACKGROUND_HZ: f64 = 10.0;
const BACKGROUND_AMPLITUDE: f64 = 2.0;
const EVOKED_AMPLITUDE: f64 = 5.0;
const EVOKED_LATENCY: f64 = 20.0;
const EVOKED_WIDTH: f64 = 6.0;

pub struct SyntheticSource {
    eeg_channels: usize,
    stim_channels: usize,
    block_len: usize,
    period: usize,
    sample_rate: f64,
    position: usize,
    sequence: u64,
}

impl SyntheticSource {
    pub fn new(
        eeg_channels: usize,
        stim_channels: usize,
        block_len: usize,
        period: usize,
        sample_rate: f64,
    ) -> Self {
        Self {
            eeg_channels,
            stim_channels,
            block_len,
            period: period.max(1),
            sample_rate,
            position: 0,
            sequence: 0,
        }
    }

    /// EEG channels, then stimulus channels, then the raw digital channel
    pub fn channels(&self) -> Vec<ChannelInfo> {
        let eeg = (0..self.eeg_channels)
            .map(|i| ChannelInfo::new(format!("EEG {:03}", i + 1), ChannelKind::Eeg));
        let stim = (0..self.stim_channels)
            .map(|i| ChannelInfo::new(format!("STI {:03}", i + 1), ChannelKind::Stimulus));
        let raw = std::iter::once(ChannelInfo::new(
            DEFAULT_RAW_DIGITAL_CHANNEL,
            ChannelKind::Stimulus,
        ));

        eeg.chain(stim).chain(raw).collect()
    }

    /// Global sample index of the first pulse of a stimulus
    pub fn first_pulse(&self, stimulus: usize) -> usize {
        let spacing = self.period / (self.stim_channels + 1);
        self.period / 2 + stimulus * spacing
    }

    pub fn next_block(&mut self) -> Result<Block> {
        let total_channels = self.eeg_channels + self.stim_channels + 1;
        let mut rows = vec![vec![0.0; self.block_len]; total_channels];

        for col in 0..self.block_len {
            let sample = self.position + col;
            let t = sample as f64 / self.sample_rate;
            let mut raw = 0.0;
            let mut evoked = 0.0;

            for stimulus in 0..self.stim_channels {
                if let Some(since) = self.samples_since_pulse(stimulus, sample) {
                    if since == 0 {
                        let code = (stimulus + 1) as f64;
                        rows[self.eeg_channels + stimulus][col] = code;
                        raw += code;
                    }
                    let d = since as f64 - EVOKED_LATENCY;
                    evoked += EVOKED_AMPLITUDE * (-(d * d) / (2.0 * EVOKED_WIDTH * EVOKED_WIDTH)).exp();
                }
            }
            rows[total_channels - 1][col] = raw;

            for (channel, row) in rows.iter_mut().take(self.eeg_channels).enumerate() {
                let phase = channel as f64 * PI / 4.0;
                row[col] = BACKGROUND_AMPLITUDE * (2.0 * PI * BACKGROUND_HZ * t + phase).sin() + evoked;
            }
        }

        let block = Block::from_rows(self.sequence, &rows)?;
        self.position += self.block_len;
        self.sequence += 1;
        Ok(block)
    }

    fn samples_since_pulse(&self, stimulus: usize, sample: usize) -> Option<usize> {
        let first = self.first_pulse(stimulus);
        (sample >= first).then(|| (sample - first) % self.period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_layout() {
        let source = SyntheticSource::new(2, 2, 10, 100, 1000.0);
        let names: Vec<String> = source.channels().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["EEG 001", "EEG 002", "STI 001", "STI 002", "STI 014"]);
    }

    #[test]
    fn test_pulses_on_trigger_and_raw_lines() {
        let mut source = SyntheticSource::new(1, 1, 10, 50, 1000.0);

        // First pulse at sample 25: block 2, column 5
        let blocks: Vec<Block> = (0..3).map(|_| source.next_block().unwrap()).collect();
        assert_eq!(blocks[2].sequence, 2);
        assert_eq!(blocks[2].data[(1, 5)], 1.0);
        assert_eq!(blocks[2].data[(2, 5)], 1.0);
        assert_eq!(blocks[0].data.row(1).sum(), 0.0);
        assert_eq!(blocks[2].data.row(1).sum(), 1.0);
    }

    #[test]
    fn test_stimuli_staggered() {
        let source = SyntheticSource::new(1, 2, 10, 90, 1000.0);
        assert_eq!(source.first_pulse(0), 45);
        assert_eq!(source.first_pulse(1), 75);
    }
}
