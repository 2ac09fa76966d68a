use crate::types::BlockShape;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ErpError {
    #[error("Block shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch {
        expected: BlockShape,
        found: BlockShape,
    },

    #[error(
        "Insufficient history for {direction}-stimulus epoch: needed {needed} samples, collected {collected}"
    )]
    InsufficientHistory {
        direction: &'static str,
        needed: usize,
        collected: usize,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Block buffer is closed")]
    BufferClosed,

    #[error("Averaging engine already running")]
    AlreadyRunning,

    #[error("Averaging worker panicked")]
    WorkerPanicked,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl ErpError {
    /// Errors that end the worker loop and fault the engine.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErpError::ShapeMismatch { .. }
                | ErpError::InsufficientHistory { .. }
                | ErpError::InvalidConfig(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ErpError>;
