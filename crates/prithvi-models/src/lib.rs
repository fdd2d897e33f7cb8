//! # Prithvi Models
//!
//! Canonical data model for the Prithvi seismic event locator.
//!
//! This crate defines the value types shared across the pipeline:
//! - `Station` - receiver identity, coordinates and usage policy
//! - `Pick` - a single-station phase onset with amplitude and SNR
//! - `Arrival` - the use of a pick by one origin in one phase
//! - `Origin` - a hypocentre hypothesis with its arrival set
//! - `LocatorConfig` - the complete engine configuration key set
//!
//! plus spherical geometry (`geo`) and seismic phase classification
//! (`phase`) helpers.
//!
//! All timestamps are `chrono::DateTime<Utc>`; second-valued intervals are
//! `f64`. Types are serde-serializable so pick streams and origins can be
//! captured and replayed as JSONL.

pub mod arrival;
pub mod config;
pub mod geo;
pub mod origin;
pub mod phase;
pub mod pick;
pub mod station;
pub mod time;

pub use arrival::{Arrival, Exclusion};
pub use config::LocatorConfig;
pub use geo::{delazi, station_distance, DeltaAzi};
pub use origin::{
    DepthType, Hypocenter, Origin, OriginError, OriginId, OriginQuality, IMPORTED_ORIGIN_ID,
};
pub use phase::{is_p_phase, is_pkp_phase};
pub use pick::{Pick, PickMode, MAX_PLAUSIBLE_SNR};
pub use station::{Station, StationConfig, StationConfigEntry};
pub use time::{add_seconds, seconds_between};

/// Model-level validation and parsing errors.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("station config line {line}: {reason}")]
    StationConfig { line: usize, reason: String },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}
