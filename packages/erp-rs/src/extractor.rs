//! Epoch assembly across block boundaries.
//!
//! The post-stimulus segment starts at the event sample and walks forward
//! from the middle entry. The pre-stimulus segment ends at the sample before
//! the event and walks backward, so its last column is always adjacent to the
//! event. Running off either end of the history is an error: it means the
//! window geometry cannot hold the requested epoch.

use crate::error::{ErpError, Result};
use crate::types::{Epoch, EventRecord};
use crate::window::WindowEntry;
use nalgebra::DMatrix;

/// Fixed-length pre/post segment extractor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochExtractor {
    pre_stim_samples: usize,
    post_stim_samples: usize,
}

impl EpochExtractor {
    pub fn new(pre_stim_samples: usize, post_stim_samples: usize) -> Self {
        Self {
            pre_stim_samples,
            post_stim_samples,
        }
    }

    pub fn pre_stim_samples(&self) -> usize {
        self.pre_stim_samples
    }

    pub fn post_stim_samples(&self) -> usize {
        self.post_stim_samples
    }

    /// [channels × pre_stim_samples] ending just before the event sample
    pub fn extract_pre(
        &self,
        history: &[WindowEntry],
        mid_index: usize,
        event: &EventRecord,
    ) -> Result<DMatrix<f64>> {
        let needed = self.pre_stim_samples;
        let channels = channel_count(history, mid_index);
        let mut out = DMatrix::zeros(channels, needed);

        // Columns still to fill, counted from the right edge
        let mut remaining = needed;
        let mut end = event.sample_offset;
        let mut idx = Some(mid_index);

        while remaining > 0 {
            let Some(entry) = idx.and_then(|i| history.get(i)) else {
                return Err(ErpError::InsufficientHistory {
                    direction: "pre",
                    needed,
                    collected: needed - remaining,
                });
            };

            let data = &entry.block.data;
            let end_col = end.min(data.ncols());
            let take = end_col.min(remaining);
            out.columns_mut(remaining - take, take)
                .copy_from(&data.columns(end_col - take, take));
            remaining -= take;

            idx = idx.and_then(|i| i.checked_sub(1));
            end = usize::MAX;
        }

        Ok(out)
    }

    /// [channels × post_stim_samples] starting at the event sample
    pub fn extract_post(
        &self,
        history: &[WindowEntry],
        mid_index: usize,
        event: &EventRecord,
    ) -> Result<DMatrix<f64>> {
        let needed = self.post_stim_samples;
        let channels = channel_count(history, mid_index);
        let mut out = DMatrix::zeros(channels, needed);

        let mut filled = 0;
        let mut start = event.sample_offset;

        for entry in history.iter().skip(mid_index) {
            if filled == needed {
                break;
            }

            let data = &entry.block.data;
            let start_col = start.min(data.ncols());
            let take = (data.ncols() - start_col).min(needed - filled);
            out.columns_mut(filled, take)
                .copy_from(&data.columns(start_col, take));
            filled += take;
            start = 0;
        }

        if filled < needed {
            return Err(ErpError::InsufficientHistory {
                direction: "post",
                needed,
                collected: filled,
            });
        }

        Ok(out)
    }

    /// Both segments of one event, tagged with its creation order
    pub fn extract(
        &self,
        history: &[WindowEntry],
        mid_index: usize,
        event: &EventRecord,
        order: u64,
    ) -> Result<Epoch> {
        let pre = self.extract_pre(history, mid_index, event)?;
        let post = self.extract_post(history, mid_index, event)?;

        Ok(Epoch {
            stimulus: event.stimulus,
            order,
            block_sequence: event.block_sequence,
            pre,
            post,
        })
    }
}

fn channel_count(history: &[WindowEntry], mid_index: usize) -> usize {
    history
        .get(mid_index)
        .or_else(|| history.first())
        .map(|entry| entry.block.channels())
        .unwrap_or(0)
}
