// Per-block averaging pipeline: detect -> assemble -> extract -> store
//
// Owns every piece of window and store state. It has no notion of threads;
// the engine moves it into its worker and feeds it one block at a time.

use crate::config::{AveragingConfig, WindowGeometry};
use crate::detector::StimulusChannelSet;
use crate::error::{ErpError, Result};
use crate::extractor::EpochExtractor;
use crate::profile_scope;
use crate::store::{Average, RollingAverageStore};
use crate::types::{AverageUpdate, Block};
use crate::window::SlidingWindowAssembler;

pub struct AveragingPipeline {
    config: AveragingConfig,
    expected_channels: Option<usize>,
    geometry: Option<WindowGeometry>,
    assembler: SlidingWindowAssembler,
    extractor: EpochExtractor,
    store: RollingAverageStore,
    next_order: u64,
    blocks_processed: u64,
    last_sequence: Option<u64>,
    sequence_regressions: u64,
}

impl AveragingPipeline {
    /// `expected_channels` is the channel count announced by the metadata, if known
    pub fn new(
        config: &AveragingConfig,
        stimuli: StimulusChannelSet,
        expected_channels: Option<usize>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config: config.clone(),
            expected_channels,
            geometry: None,
            assembler: SlidingWindowAssembler::new(
                stimuli,
                config.pre_stim_samples,
                config.post_stim_samples,
            ),
            extractor: EpochExtractor::new(config.pre_stim_samples, config.post_stim_samples),
            store: RollingAverageStore::new(config.num_averages)?,
            next_order: 0,
            blocks_processed: 0,
            last_sequence: None,
            sequence_regressions: 0,
        })
    }

    /// Process one block and return the refreshed averages of every stimulus it confirmed
    pub fn process_block(&mut self, block: Block) -> Result<Vec<AverageUpdate>> {
        profile_scope!("process_block");

        if self.geometry.is_none() {
            self.geometry = Some(self.check_first_block(&block)?);
        }
        self.track_sequence(block.sequence);

        let extractor = self.extractor;
        let store = &mut self.store;
        let next_order = &mut self.next_order;
        let mut touched = Vec::new();

        self.assembler.push(block, |history, mid_index, event| {
            let epoch = extractor.extract(history, mid_index, event, *next_order)?;
            *next_order += 1;
            store.append(epoch);
            touched.push(event.stimulus);
            Ok(())
        })?;
        self.blocks_processed += 1;

        let updates: Vec<AverageUpdate> = touched
            .into_iter()
            .filter_map(|stimulus| self.average_update(stimulus))
            .collect();

        for update in &updates {
            log::debug!(
                "Average for {} updated (nave = {})",
                update.channel_name,
                update.nave
            );
        }

        Ok(updates)
    }

    /// Raw mean of the epochs held for a stimulus
    pub fn current_average(&self, stimulus: usize) -> Option<Average> {
        self.store.current_average(stimulus)
    }

    /// Serializable snapshot of the mean for a stimulus
    pub fn average_update(&self, stimulus: usize) -> Option<AverageUpdate> {
        let average = self.store.current_average(stimulus)?;
        let stimuli = self.assembler.stimuli();

        Some(AverageUpdate::new(
            stimulus,
            stimuli.channel(stimulus)?,
            stimuli.name(stimulus).unwrap_or_default().to_string(),
            average.count,
            &average.pre,
            &average.post,
            self.config.sample_rate,
        ))
    }

    pub fn stimuli(&self) -> &StimulusChannelSet {
        self.assembler.stimuli()
    }

    pub fn store(&self) -> &RollingAverageStore {
        &self.store
    }

    pub fn assembler(&self) -> &SlidingWindowAssembler {
        &self.assembler
    }

    /// Geometry derived from the first block, once seen
    pub fn geometry(&self) -> Option<WindowGeometry> {
        self.geometry
    }

    pub fn blocks_processed(&self) -> u64 {
        self.blocks_processed
    }

    pub fn epochs_extracted(&self) -> u64 {
        self.next_order
    }

    /// Blocks whose sequence number did not increase over the previous block
    pub fn sequence_regressions(&self) -> u64 {
        self.sequence_regressions
    }

    pub fn reset(&mut self) {
        self.assembler.clear();
        self.store.clear();
        self.geometry = None;
        self.next_order = 0;
        self.blocks_processed = 0;
        self.last_sequence = None;
        self.sequence_regressions = 0;
    }

    fn track_sequence(&mut self, sequence: u64) {
        if let Some(last) = self.last_sequence {
            if sequence <= last {
                self.sequence_regressions += 1;
                log::warn!(
                    "Block sequence {} does not follow {}, processing in arrival order",
                    sequence,
                    last
                );
            }
        }
        self.last_sequence = Some(sequence);
    }

    fn check_first_block(&self, block: &Block) -> Result<WindowGeometry> {
        if let Some(expected) = self.expected_channels {
            if block.channels() != expected {
                return Err(ErpError::InvalidConfig(format!(
                    "block {} has {} channels, channel metadata describes {}",
                    block.sequence,
                    block.channels(),
                    expected
                )));
            }
        }

        if let Some(max_channel) = self.stimuli().max_channel() {
            if max_channel >= block.channels() {
                return Err(ErpError::InvalidConfig(format!(
                    "stimulus channel {} out of range for blocks with {} channels",
                    max_channel,
                    block.channels()
                )));
            }
        }

        if let Some(configured) = self.config.block_length {
            if configured != block.samples() {
                return Err(ErpError::InvalidConfig(format!(
                    "configured block length {} but first block has {} samples",
                    configured,
                    block.samples()
                )));
            }
        }

        let geometry = WindowGeometry::new(&self.config, block.samples())?;
        geometry.validate()?;

        log::info!(
            "Window geometry: {} blocks of {} samples, events confirmed in entry {}",
            geometry.window_blocks,
            geometry.block_length,
            geometry.mid_index
        );

        Ok(geometry)
    }
}
