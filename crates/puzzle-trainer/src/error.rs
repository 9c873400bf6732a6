//! Trainer error types

use thiserror::Error;

/// Failures of the engine adapter. `InitFailed` leaves the adapter in its
/// terminal error state; the others only fail the call that hit them.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine not ready")]
    NotReady,

    #[error("Engine initialization failed: {0}")]
    InitFailed(String),

    #[error("Engine disposed")]
    Disposed,

    #[error("Engine I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Engine closed its output stream")]
    Exited,
}

#[derive(Error, Debug)]
pub enum TrainerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
