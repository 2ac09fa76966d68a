// Sliding window over recent blocks
//
// Events are confirmed in the middle entry so that both pre- and post-stimulus
// context are already buffered. A trigger pulse spanning a block boundary is
// flagged in two consecutive entries; only the first of them confirms it.

use crate::detector::{detect_stimuli, peak_offset, StimulusChannelSet};
use crate::error::Result;
use crate::types::{Block, EventRecord};
use std::collections::VecDeque;

/// A buffered block and the stimuli active in it
#[derive(Debug, Clone)]
pub struct WindowEntry {
    pub block: Block,
    /// Stimulus ids, ascending
    pub active: Vec<usize>,
}

/// Bounded FIFO history of blocks with event confirmation
pub struct SlidingWindowAssembler {
    stimuli: StimulusChannelSet,
    pre_stim_samples: usize,
    post_stim_samples: usize,
    history: VecDeque<WindowEntry>,
    total_samples: usize,
    block_length: Option<usize>,
}

impl SlidingWindowAssembler {
    pub fn new(stimuli: StimulusChannelSet, pre_stim_samples: usize, post_stim_samples: usize) -> Self {
        Self {
            stimuli,
            pre_stim_samples,
            post_stim_samples,
            history: VecDeque::new(),
            total_samples: 0,
            block_length: None,
        }
    }

    /// Append a block and confirm the events of the middle entry
    ///
    /// Every confirmed event is handed to `on_event` together with the full
    /// history and the middle index. Once the window is ready the oldest entry
    /// is evicted, even when `on_event` fails. Returns the number of confirmed
    /// events.
    pub fn push<F>(&mut self, block: Block, mut on_event: F) -> Result<usize>
    where
        F: FnMut(&[WindowEntry], usize, &EventRecord) -> Result<()>,
    {
        if self.block_length.is_none() {
            self.block_length = Some(block.samples());
        }

        let active = detect_stimuli(&block, &self.stimuli);
        if !active.is_empty() {
            log::trace!("Block {} active stimuli: {:?}", block.sequence, active);
        }

        self.total_samples += block.samples();
        self.history.push_back(WindowEntry { block, active });

        if !self.is_ready() {
            return Ok(0);
        }

        let history = self.history.make_contiguous();
        let mid_index = history.len() / 2;
        let events = confirm_events(history, mid_index, &self.stimuli);

        let mut outcome = Ok(events.len());
        for event in &events {
            log::debug!(
                "Confirmed stimulus {} (channel {}) at sample {} of block {}",
                event.stimulus,
                event.channel,
                event.sample_offset,
                event.block_sequence
            );

            if let Err(e) = on_event(history, mid_index, event) {
                outcome = Err(e);
                break;
            }
        }

        self.evict_head();
        outcome
    }

    /// The window holds more samples than one epoch plus two blocks
    pub fn is_ready(&self) -> bool {
        let block_length = self.block_length.unwrap_or(0);
        let threshold = self
            .pre_stim_samples
            .saturating_add(self.post_stim_samples)
            .saturating_add(block_length.saturating_mul(2));
        self.total_samples > threshold
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn total_samples(&self) -> usize {
        self.total_samples
    }

    /// Sample count of the first block seen
    pub fn block_length(&self) -> Option<usize> {
        self.block_length
    }

    pub fn stimuli(&self) -> &StimulusChannelSet {
        &self.stimuli
    }

    pub fn entries(&self) -> impl Iterator<Item = &WindowEntry> {
        self.history.iter()
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.total_samples = 0;
        self.block_length = None;
    }

    fn evict_head(&mut self) {
        if let Some(evicted) = self.history.pop_front() {
            self.total_samples -= evicted.block.samples();
        }
    }
}

/// Stimuli flagged in `history[mid_index]` but not in the entry before it
pub(crate) fn confirm_events(
    history: &[WindowEntry],
    mid_index: usize,
    stimuli: &StimulusChannelSet,
) -> Vec<EventRecord> {
    let Some(current) = history.get(mid_index) else {
        return Vec::new();
    };
    let previous = mid_index
        .checked_sub(1)
        .and_then(|idx| history.get(idx))
        .map(|entry| entry.active.as_slice());

    current
        .active
        .iter()
        .copied()
        .filter(|stimulus| previous.map_or(true, |prev| !prev.contains(stimulus)))
        .filter_map(|stimulus| {
            let channel = stimuli.channel(stimulus)?;
            Some(EventRecord {
                stimulus,
                channel,
                sample_offset: peak_offset(current.block.data.row(channel).iter()),
                block_sequence: current.block.sequence,
            })
        })
        .collect()
}
