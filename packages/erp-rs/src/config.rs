//! Averaging configuration and the window geometry it implies.
//!
//! The sliding window holds `N = floor((pre + post) / L) + 3` blocks once it is
//! ready and confirms events in entry `N / 2`. Epoch extraction can only read
//! what the window holds, so `pre`, `post` and the block length `L` must be
//! chosen together:
//!
//! * `mid × L ≥ pre` (event at column 0 of the middle block)
//! * `(N − 1 − mid) × L + 1 ≥ post` (event at the last column of the middle block)
//!
//! [`WindowGeometry::validate`] enforces both. When `block_length` is set in the
//! configuration the check runs when the engine is created, otherwise it runs
//! on the first block.

use crate::error::{ErpError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default number of epochs kept per stimulus
pub const DEFAULT_NUM_AVERAGES: usize = 4;

/// Default ingestion buffer capacity in blocks
pub const DEFAULT_BUFFER_CAPACITY: usize = 128;

/// Name of the summed digital trigger line, never treated as its own stimulus
pub const DEFAULT_RAW_DIGITAL_CHANNEL: &str = "STI 014";

/// Averaging engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AveragingConfig {
    pub pre_stim_samples: usize,
    pub post_stim_samples: usize,
    /// Maximum number of epochs averaged per stimulus
    pub num_averages: usize,
    /// Ingestion buffer capacity in blocks
    pub buffer_capacity: usize,
    pub raw_digital_channel: String,
    /// Expected samples per block, enables geometry validation before the first block
    pub block_length: Option<usize>,
    /// Sampling rate in Hz, used for the time axis of published averages
    pub sample_rate: Option<f64>,
}

impl Default for AveragingConfig {
    fn default() -> Self {
        Self {
            pre_stim_samples: 100,
            post_stim_samples: 100,
            num_averages: DEFAULT_NUM_AVERAGES,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            raw_digital_channel: DEFAULT_RAW_DIGITAL_CHANNEL.to_string(),
            block_length: None,
            sample_rate: None,
        }
    }
}

impl AveragingConfig {
    pub fn new(pre_stim_samples: usize, post_stim_samples: usize, num_averages: usize) -> Self {
        Self {
            pre_stim_samples,
            post_stim_samples,
            num_averages,
            ..Self::default()
        }
    }

    /// Load a configuration from a JSON file; missing fields take their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        Ok(config)
    }

    /// Total epoch length in samples
    pub fn epoch_length(&self) -> Result<usize> {
        self.pre_stim_samples
            .checked_add(self.post_stim_samples)
            .ok_or_else(|| {
                ErpError::InvalidConfig(format!(
                    "pre_stim_samples ({}) + post_stim_samples ({}) overflows",
                    self.pre_stim_samples, self.post_stim_samples
                ))
            })
    }

    /// Check everything that can be checked without seeing a block
    pub fn validate(&self) -> Result<()> {
        if self.epoch_length()? == 0 {
            return Err(ErpError::InvalidConfig(
                "pre_stim_samples + post_stim_samples must be greater than 0".to_string(),
            ));
        }

        if self.num_averages == 0 {
            return Err(ErpError::InvalidConfig(
                "num_averages must be at least 1".to_string(),
            ));
        }

        if self.buffer_capacity == 0 {
            return Err(ErpError::InvalidConfig(
                "buffer_capacity must be at least 1".to_string(),
            ));
        }

        if let Some(sfreq) = self.sample_rate {
            if !(sfreq.is_finite() && sfreq > 0.0) {
                return Err(ErpError::InvalidConfig(format!(
                    "sample_rate must be a positive number, got {}",
                    sfreq
                )));
            }
        }

        if let Some(block_length) = self.block_length {
            WindowGeometry::new(self, block_length)?.validate()?;
        }

        Ok(())
    }
}

/// Window layout derived from the epoch lengths and the block length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowGeometry {
    pub block_length: usize,
    pub pre_stim_samples: usize,
    pub post_stim_samples: usize,
    /// History must hold more than this many samples before events are confirmed
    pub threshold_samples: usize,
    /// Number of blocks held once the window is ready
    pub window_blocks: usize,
    /// Index of the entry in which events are confirmed
    pub mid_index: usize,
}

impl WindowGeometry {
    /// Fails with `InvalidConfig` when the window size overflows `usize`
    pub fn new(config: &AveragingConfig, block_length: usize) -> Result<Self> {
        let pre = config.pre_stim_samples;
        let post = config.post_stim_samples;
        let epoch_length = config.epoch_length()?;

        let threshold_samples = block_length
            .checked_mul(2)
            .and_then(|margin| margin.checked_add(epoch_length))
            .ok_or_else(|| {
                ErpError::InvalidConfig(format!(
                    "window for block length {} and epoch length {} overflows",
                    block_length, epoch_length
                ))
            })?;

        let window_blocks = if block_length == 0 {
            0
        } else {
            // Bounded by the threshold above, so this cannot overflow
            epoch_length / block_length + 3
        };

        Ok(Self {
            block_length,
            pre_stim_samples: pre,
            post_stim_samples: post,
            threshold_samples,
            window_blocks,
            mid_index: window_blocks / 2,
        })
    }

    /// Worst-case number of samples available before the event sample
    pub fn pre_capacity(&self) -> usize {
        self.mid_index.saturating_mul(self.block_length)
    }

    /// Worst-case number of samples available from the event sample onward
    pub fn post_capacity(&self) -> usize {
        if self.window_blocks == 0 {
            return 0;
        }
        (self.window_blocks - 1 - self.mid_index)
            .saturating_mul(self.block_length)
            .saturating_add(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_length == 0 {
            return Err(ErpError::InvalidConfig(
                "block length must be greater than 0".to_string(),
            ));
        }

        if self.pre_capacity() < self.pre_stim_samples {
            return Err(ErpError::InvalidConfig(format!(
                "window of {} blocks × {} samples holds at most {} samples before the event, \
                 but pre_stim_samples is {}",
                self.window_blocks,
                self.block_length,
                self.pre_capacity(),
                self.pre_stim_samples
            )));
        }

        if self.post_capacity() < self.post_stim_samples {
            return Err(ErpError::InvalidConfig(format!(
                "window of {} blocks × {} samples holds at most {} samples from the event onward, \
                 but post_stim_samples is {}",
                self.window_blocks,
                self.block_length,
                self.post_capacity(),
                self.post_stim_samples
            )));
        }

        Ok(())
    }
}
