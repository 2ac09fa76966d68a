pub mod buffer;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod pipeline;
pub mod profiling;
pub mod store;
pub mod types;
pub mod window;

pub use buffer::{BoundedBlockBuffer, BufferMetrics};
pub use config::{AveragingConfig, WindowGeometry};
pub use detector::{detect_stimuli, peak_offset, StimulusChannelSet};
pub use engine::{AveragingEngine, EngineEvent, EngineState, EngineStats};
pub use error::{ErpError, Result};
pub use extractor::EpochExtractor;
pub use pipeline::AveragingPipeline;
pub use store::{Average, RollingAverageStore};
pub use types::*;
pub use window::{SlidingWindowAssembler, WindowEntry};
