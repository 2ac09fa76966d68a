//! Trigger channel selection and stimulus detection.

use crate::types::{Block, ChannelInfo, ChannelKind};
use serde::{Deserialize, Serialize};

/// Ordered set of trigger channels, fixed for a session
///
/// Stimulus ids are positions in this set, not channel indices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StimulusChannelSet {
    channels: Vec<usize>,
    names: Vec<String>,
}

impl StimulusChannelSet {
    /// Select every stimulus channel except the raw digital line
    pub fn from_channels(channels: &[ChannelInfo], raw_digital_channel: &str) -> Self {
        let mut set = Self::default();

        for (idx, info) in channels.iter().enumerate() {
            if info.kind == ChannelKind::Stimulus && info.name != raw_digital_channel {
                set.channels.push(idx);
                set.names.push(info.name.clone());
            }
        }

        set
    }

    /// Build a set from explicit channel indices
    pub fn from_indices(indices: &[usize]) -> Self {
        Self {
            channels: indices.to_vec(),
            names: indices.iter().map(|idx| format!("Channel {}", idx + 1)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Block row of the given stimulus
    pub fn channel(&self, stimulus: usize) -> Option<usize> {
        self.channels.get(stimulus).copied()
    }

    pub fn name(&self, stimulus: usize) -> Option<&str> {
        self.names.get(stimulus).map(String::as_str)
    }

    pub fn channels(&self) -> &[usize] {
        &self.channels
    }

    /// Largest channel index referenced by the set
    pub fn max_channel(&self) -> Option<usize> {
        self.channels.iter().copied().max()
    }
}

/// Stimulus ids whose trigger row holds a positive sample after integer truncation
///
/// Rows outside the block are treated as silent.
pub fn detect_stimuli(block: &Block, set: &StimulusChannelSet) -> Vec<usize> {
    set.channels
        .iter()
        .enumerate()
        .filter(|(_, &row)| row < block.channels())
        .filter(|(_, &row)| block.data.row(row).iter().any(|&x| is_active(x)))
        .map(|(stimulus, _)| stimulus)
        .collect()
}

/// Column of the maximum-magnitude sample, first occurrence on ties
pub fn peak_offset<'a>(samples: impl IntoIterator<Item = &'a f64>) -> usize {
    let mut best = 0;
    let mut best_magnitude = f64::NEG_INFINITY;

    for (col, value) in samples.into_iter().enumerate() {
        let magnitude = value.abs();
        if magnitude > best_magnitude {
            best = col;
            best_magnitude = magnitude;
        }
    }

    best
}

#[inline]
fn is_active(sample: f64) -> bool {
    // Saturating cast: NaN -> 0
    (sample as i64) > 0
}
