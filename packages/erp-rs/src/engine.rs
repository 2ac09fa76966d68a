// Averaging engine - runs the averaging pipeline on a dedicated worker thread
//
// The engine manages:
// - Stimulus channel selection from the channel metadata
// - The ingestion buffer shared with the producer
// - Worker lifecycle (start, finish, stop)
// - Published averages, counters and state
// - Event emission to an optional callback

use crate::buffer::{BoundedBlockBuffer, BufferMetrics};
use crate::config::AveragingConfig;
use crate::detector::StimulusChannelSet;
use crate::error::{ErpError, Result};
use crate::pipeline::AveragingPipeline;
use crate::types::{AverageUpdate, Block, ChannelInfo};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

pub type EventCallback = Box<dyn Fn(EngineEvent) + Send + Sync>;

/// Lifecycle state of an averaging engine
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum EngineState {
    /// Created, worker not started
    #[default]
    Idle,

    Running { started_at: f64 },

    Stopped,

    /// The worker hit a structural error and exited
    Faulted { message: String },
}

/// Statistics about an averaging session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    pub blocks_processed: u64,
    pub epochs_extracted: u64,
    pub averages_published: u64,
    pub stimuli_with_averages: usize,
    pub buffer: BufferMetrics,
    pub uptime_seconds: Option<f64>,
}

/// Events emitted by the averaging engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    StateChanged {
        engine_id: String,
        state: EngineState,
    },
    AverageUpdated {
        engine_id: String,
        update: AverageUpdate,
    },
    Fault {
        engine_id: String,
        error: String,
    },
}

/// Real-time averaging engine
///
/// Blocks go in through [`append`](Self::append) or a shared [`buffer`](Self::buffer)
/// handle; the worker thread owns the window and store state and publishes a
/// fresh [`AverageUpdate`] whenever a stimulus gains an epoch.
pub struct AveragingEngine {
    pub id: String,
    config: AveragingConfig,
    channels: Vec<ChannelInfo>,
    stimuli: StimulusChannelSet,

    buffer: Arc<BoundedBlockBuffer>,
    worker: Option<JoinHandle<Result<()>>>,

    // State
    state: Arc<RwLock<EngineState>>,
    averages: Arc<RwLock<BTreeMap<usize, AverageUpdate>>>,
    is_running: Arc<AtomicBool>,
    stop_signal: Arc<AtomicBool>,

    // Statistics
    blocks_processed: Arc<AtomicU64>,
    epochs_extracted: Arc<AtomicU64>,
    averages_published: Arc<AtomicU64>,
    start_time: Arc<RwLock<Option<Instant>>>,

    event_callback: Arc<RwLock<Option<EventCallback>>>,
}

impl AveragingEngine {
    /// Create an engine; the configuration is validated here
    pub fn new(config: AveragingConfig, channels: Vec<ChannelInfo>) -> Result<Self> {
        config.validate()?;
        let buffer = Arc::new(BoundedBlockBuffer::new(config.buffer_capacity)?);

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            config,
            channels,
            stimuli: StimulusChannelSet::default(),
            buffer,
            worker: None,
            state: Arc::new(RwLock::new(EngineState::Idle)),
            averages: Arc::new(RwLock::new(BTreeMap::new())),
            is_running: Arc::new(AtomicBool::new(false)),
            stop_signal: Arc::new(AtomicBool::new(false)),
            blocks_processed: Arc::new(AtomicU64::new(0)),
            epochs_extracted: Arc::new(AtomicU64::new(0)),
            averages_published: Arc::new(AtomicU64::new(0)),
            start_time: Arc::new(RwLock::new(None)),
            event_callback: Arc::new(RwLock::new(None)),
        })
    }

    /// Set event callback function
    ///
    /// The callback runs on the worker thread for average and fault events.
    pub fn set_event_callback<F>(&self, callback: F)
    where
        F: Fn(EngineEvent) + Send + Sync + 'static,
    {
        *self.event_callback.write() = Some(Box::new(callback));
    }

    /// Start the worker thread
    ///
    /// A worker that has exited, normally or faulted, must be collected with
    /// [`stop`](Self::stop) or [`finish`](Self::finish) before restarting.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Err(ErpError::AlreadyRunning);
        }

        log::info!("Starting averaging engine: {}", self.id);

        self.stimuli =
            StimulusChannelSet::from_channels(&self.channels, &self.config.raw_digital_channel);
        if self.stimuli.is_empty() {
            log::warn!(
                "No stimulus channels among {} channels, no epochs will be extracted",
                self.channels.len()
            );
        } else {
            log::info!(
                "Averaging {} stimulus channels: {:?}",
                self.stimuli.len(),
                (0..self.stimuli.len())
                    .filter_map(|s| self.stimuli.name(s))
                    .collect::<Vec<_>>()
            );
        }

        let expected_channels = (!self.channels.is_empty()).then_some(self.channels.len());
        let pipeline = AveragingPipeline::new(&self.config, self.stimuli.clone(), expected_channels)?;

        self.buffer.reset();
        self.averages.write().clear();
        self.blocks_processed.store(0, Ordering::Relaxed);
        self.epochs_extracted.store(0, Ordering::Relaxed);
        self.averages_published.store(0, Ordering::Relaxed);
        self.stop_signal.store(false, Ordering::Relaxed);

        let worker = Worker {
            engine_id: self.id.clone(),
            buffer: Arc::clone(&self.buffer),
            state: Arc::clone(&self.state),
            averages: Arc::clone(&self.averages),
            is_running: Arc::clone(&self.is_running),
            stop_signal: Arc::clone(&self.stop_signal),
            blocks_processed: Arc::clone(&self.blocks_processed),
            epochs_extracted: Arc::clone(&self.epochs_extracted),
            averages_published: Arc::clone(&self.averages_published),
            event_callback: Arc::clone(&self.event_callback),
        };

        self.is_running.store(true, Ordering::Relaxed);
        *self.start_time.write() = Some(Instant::now());
        self.set_state(EngineState::Running {
            started_at: chrono::Utc::now().timestamp() as f64,
        });

        let short_id: String = self.id.chars().take(8).collect();
        let spawned = thread::Builder::new()
            .name(format!("erp-averaging-{}", short_id))
            .spawn(move || worker.run(pipeline));

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                log::info!("Averaging engine started successfully");
                Ok(())
            }
            Err(e) => {
                self.is_running.store(false, Ordering::Relaxed);
                self.set_state(EngineState::Faulted {
                    message: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Stop immediately, discarding queued blocks
    ///
    /// Returns the structural error that ended the worker, if any.
    pub fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.worker.take() else {
            return Ok(());
        };

        log::info!("Stopping averaging engine: {}", self.id);

        self.stop_signal.store(true, Ordering::Relaxed);
        self.buffer.cancel();

        self.collect(handle)
    }

    /// Stop accepting blocks, process everything queued, then stop
    pub fn finish(&mut self) -> Result<()> {
        let Some(handle) = self.worker.take() else {
            return Ok(());
        };

        log::info!("Finishing averaging engine: {}", self.id);

        self.buffer.finish();

        self.collect(handle)
    }

    /// Producer-side ingestion; waits while the buffer is full
    pub fn append(&self, block: Block) -> Result<()> {
        self.buffer.push(block)
    }

    /// Shareable producer handle
    pub fn buffer(&self) -> Arc<BoundedBlockBuffer> {
        Arc::clone(&self.buffer)
    }

    /// Latest published average for a stimulus
    pub fn current_average(&self, stimulus: usize) -> Option<AverageUpdate> {
        self.averages.read().get(&stimulus).cloned()
    }

    /// Latest published averages, ordered by stimulus
    pub fn averages(&self) -> Vec<AverageUpdate> {
        self.averages.read().values().cloned().collect()
    }

    /// Get current engine state
    pub fn state(&self) -> EngineState {
        self.state.read().clone()
    }

    /// Get current statistics
    pub fn stats(&self) -> EngineStats {
        let uptime_seconds = self
            .start_time
            .read()
            .as_ref()
            .map(|t| t.elapsed().as_secs_f64());

        EngineStats {
            blocks_processed: self.blocks_processed.load(Ordering::Relaxed),
            epochs_extracted: self.epochs_extracted.load(Ordering::Relaxed),
            averages_published: self.averages_published.load(Ordering::Relaxed),
            stimuli_with_averages: self.averages.read().len(),
            buffer: self.buffer.metrics(),
            uptime_seconds,
        }
    }

    /// Check if the worker is currently running
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    /// Stimulus channels selected by the last `start`
    pub fn stimulus_channels(&self) -> &StimulusChannelSet {
        &self.stimuli
    }

    pub fn config(&self) -> &AveragingConfig {
        &self.config
    }

    fn collect(&mut self, handle: JoinHandle<Result<()>>) -> Result<()> {
        let outcome = handle.join().unwrap_or(Err(ErpError::WorkerPanicked));
        self.is_running.store(false, Ordering::Relaxed);

        match &outcome {
            Ok(()) => {
                self.set_state(EngineState::Stopped);
                log::info!("Averaging engine stopped");
            }
            Err(ErpError::WorkerPanicked) => {
                log::error!("Averaging worker panicked");
                self.set_state(EngineState::Faulted {
                    message: ErpError::WorkerPanicked.to_string(),
                });
            }
            Err(e) => log::warn!("Averaging engine stopped after fault: {}", e),
        }

        outcome
    }

    /// Set state and emit event
    fn set_state(&self, state: EngineState) {
        publish_state(&self.state, &self.event_callback, &self.id, state);
    }
}

impl Drop for AveragingEngine {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.take() {
            self.stop_signal.store(true, Ordering::Relaxed);
            self.buffer.cancel();
            let _ = handle.join();
            log::info!("AveragingEngine {} dropped", self.id);
        }
    }
}

/// Everything the worker thread shares with the engine
struct Worker {
    engine_id: String,
    buffer: Arc<BoundedBlockBuffer>,
    state: Arc<RwLock<EngineState>>,
    averages: Arc<RwLock<BTreeMap<usize, AverageUpdate>>>,
    is_running: Arc<AtomicBool>,
    stop_signal: Arc<AtomicBool>,
    blocks_processed: Arc<AtomicU64>,
    epochs_extracted: Arc<AtomicU64>,
    averages_published: Arc<AtomicU64>,
    event_callback: Arc<RwLock<Option<EventCallback>>>,
}

impl Worker {
    fn run(self, mut pipeline: AveragingPipeline) -> Result<()> {
        let result = self.process(&mut pipeline);

        if let Err(e) = &result {
            log::error!("Averaging worker faulted: {}", e);

            // Release a producer stalled on a full buffer
            self.buffer.cancel();

            publish_state(
                &self.state,
                &self.event_callback,
                &self.engine_id,
                EngineState::Faulted {
                    message: e.to_string(),
                },
            );
            emit(
                &self.event_callback,
                EngineEvent::Fault {
                    engine_id: self.engine_id.clone(),
                    error: e.to_string(),
                },
            );
        }

        self.is_running.store(false, Ordering::Relaxed);
        log::info!(
            "Averaging worker exited after {} blocks",
            pipeline.blocks_processed()
        );

        result
    }

    fn process(&self, pipeline: &mut AveragingPipeline) -> Result<()> {
        while !self.stop_signal.load(Ordering::Relaxed) {
            let Some(block) = self.buffer.pop() else {
                return match self.buffer.fault() {
                    Some(fault) => Err(fault),
                    None => Ok(()),
                };
            };

            let sequence = block.sequence;
            let updates = match pipeline.process_block(block) {
                Ok(updates) => updates,
                Err(e) if !e.is_fatal() => {
                    log::warn!("Skipping block {}: {}", sequence, e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            self.blocks_processed
                .store(pipeline.blocks_processed(), Ordering::Relaxed);
            self.epochs_extracted
                .store(pipeline.epochs_extracted(), Ordering::Relaxed);

            for update in updates {
                self.averages
                    .write()
                    .insert(update.stimulus, update.clone());
                self.averages_published.fetch_add(1, Ordering::Relaxed);

                emit(
                    &self.event_callback,
                    EngineEvent::AverageUpdated {
                        engine_id: self.engine_id.clone(),
                        update,
                    },
                );
            }
        }

        Ok(())
    }
}

fn emit(callback: &RwLock<Option<EventCallback>>, event: EngineEvent) {
    if let Some(callback) = callback.read().as_ref() {
        callback(event);
    }
}

fn publish_state(
    state: &RwLock<EngineState>,
    callback: &RwLock<Option<EventCallback>>,
    engine_id: &str,
    new_state: EngineState,
) {
    *state.write() = new_state.clone();
    emit(
        callback,
        EngineEvent::StateChanged {
            engine_id: engine_id.to_string(),
            state: new_state,
        },
    );
}
