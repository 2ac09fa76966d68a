use crate::error::{ErpError, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Channel count × sample count of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockShape {
    pub channels: usize,
    pub samples: usize,
}

impl fmt::Display for BlockShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} channels × {} samples", self.channels, self.samples)
    }
}

/// One arrival unit of multichannel samples [channels × samples]
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub sequence: u64,
    pub data: DMatrix<f64>,
}

impl Block {
    pub fn new(sequence: u64, data: DMatrix<f64>) -> Self {
        Self { sequence, data }
    }

    /// Build a block from per-channel sample rows (samples[channel][sample])
    pub fn from_rows(sequence: u64, rows: &[Vec<f64>]) -> Result<Self> {
        let nrows = rows.len();
        let ncols = rows.first().map(|r| r.len()).unwrap_or(0);

        if let Some(ragged) = rows.iter().find(|r| r.len() != ncols) {
            return Err(ErpError::ShapeMismatch {
                expected: BlockShape {
                    channels: nrows,
                    samples: ncols,
                },
                found: BlockShape {
                    channels: nrows,
                    samples: ragged.len(),
                },
            });
        }

        let data = DMatrix::from_fn(nrows, ncols, |r, c| rows[r][c]);
        Ok(Self { sequence, data })
    }

    pub fn channels(&self) -> usize {
        self.data.nrows()
    }

    pub fn samples(&self) -> usize {
        self.data.ncols()
    }

    pub fn shape(&self) -> BlockShape {
        BlockShape {
            channels: self.channels(),
            samples: self.samples(),
        }
    }
}

/// Channel kind, as reported by the acquisition metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Eeg,
    Meg,
    Eog,
    Ecg,
    Emg,
    Stimulus,
    Misc,
}

/// Per-channel metadata delivered by the acquisition side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub name: String,
    pub kind: ChannelKind,
}

impl ChannelInfo {
    pub fn new(name: impl Into<String>, kind: ChannelKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// A confirmed stimulus occurrence inside the middle window entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRecord {
    /// Index into the stimulus channel set
    pub stimulus: usize,
    /// Row of the trigger channel in the block
    pub channel: usize,
    /// Column of the event sample within the middle block
    pub sample_offset: usize,
    pub block_sequence: u64,
}

/// Stimulus-locked segment split at the event sample
#[derive(Debug, Clone, PartialEq)]
pub struct Epoch {
    pub stimulus: usize,
    /// Creation order across all stimuli
    pub order: u64,
    pub block_sequence: u64,
    /// [channels × pre_stim_samples], last column is the sample before the event
    pub pre: DMatrix<f64>,
    /// [channels × post_stim_samples], first column is the event sample
    pub post: DMatrix<f64>,
}

impl Epoch {
    /// Pre and post segments joined into one [channels × (pre + post)] matrix
    pub fn combined(&self) -> DMatrix<f64> {
        hstack(&self.pre, &self.post)
    }
}

/// Published snapshot of the running mean for one stimulus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AverageUpdate {
    pub stimulus: usize,
    pub channel: usize,
    pub channel_name: String,
    /// Number of epochs in the mean
    pub nave: usize,
    pub pre_stim_samples: usize,
    pub post_stim_samples: usize,
    /// Mean pre-stimulus segment [channels × pre_stim_samples]
    pub pre: Vec<Vec<f64>>,
    /// Mean post-stimulus segment [channels × post_stim_samples]
    pub post: Vec<Vec<f64>>,
    /// Seconds relative to the event sample, only when the sample rate is known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub times: Option<Vec<f64>>,
    pub created_at: String,
}

impl AverageUpdate {
    pub fn new(
        stimulus: usize,
        channel: usize,
        channel_name: String,
        nave: usize,
        pre: &DMatrix<f64>,
        post: &DMatrix<f64>,
        sample_rate: Option<f64>,
    ) -> Self {
        let pre_stim_samples = pre.ncols();
        let post_stim_samples = post.ncols();

        let times = sample_rate.filter(|sfreq| *sfreq > 0.0).map(|sfreq| {
            let first = -(pre_stim_samples as i64);
            (0..pre_stim_samples + post_stim_samples)
                .map(|i| (first + i as i64) as f64 / sfreq)
                .collect()
        });

        Self {
            stimulus,
            channel,
            channel_name,
            nave,
            pre_stim_samples,
            post_stim_samples,
            pre: matrix_to_rows(pre),
            post: matrix_to_rows(post),
            times,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Convert a matrix to row-major nested vectors for serialization
pub fn matrix_to_rows(matrix: &DMatrix<f64>) -> Vec<Vec<f64>> {
    matrix
        .row_iter()
        .map(|row| row.iter().copied().collect())
        .collect()
}

/// Horizontal concatenation of two matrices with equal row counts
pub(crate) fn hstack(left: &DMatrix<f64>, right: &DMatrix<f64>) -> DMatrix<f64> {
    let mut out = DMatrix::zeros(left.nrows(), left.ncols() + right.ncols());
    out.columns_mut(0, left.ncols()).copy_from(left);
    out.columns_mut(left.ncols(), right.ncols()).copy_from(right);
    out
}
