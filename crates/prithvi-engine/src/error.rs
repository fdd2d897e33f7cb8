//! Engine error types.

use crate::locate::LocateError;
use crate::travel::TravelTimeError;

/// Failures surfaced by the engine's configuration and file interfaces.
///
/// Intake itself never propagates errors for bad input; those are policy
/// rejections, logged and swallowed.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Model(#[from] prithvi_models::ModelError),

    #[error("grid file line {line}: {reason}")]
    GridFile { line: usize, reason: String },

    #[error(transparent)]
    Locate(#[from] LocateError),

    #[error(transparent)]
    TravelTime(#[from] TravelTimeError),
}
