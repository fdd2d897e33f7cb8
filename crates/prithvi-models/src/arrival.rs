//! Arrivals: the use of a pick by one origin in a specific phase.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::Pick;

/// Why an arrival does not currently contribute to the location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exclusion {
    /// The arrival is defining: it takes part in the location.
    #[default]
    NotExcluded,
    /// Residual outside the acceptance interval.
    LargeResidual,
    /// Station beyond the configured distance limit.
    StationDistance,
    /// Parked during a merge until the residual is re-evaluated.
    TemporarilyExcluded,
    /// Excluded by a trial-exclusion step of the score enhancement.
    ManuallyExcluded,
    /// Loosely associated phase not usable for location (imported origins,
    /// ambiguous P/PKP distance ranges).
    UnusedPhase,
    /// Using this arrival makes the solution worse.
    DeterioratesSolution,
}

/// A pick bound to an origin under a phase identification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Arrival {
    pub pick: Arc<Pick>,
    /// Phase code, e.g. "P", "PKP", "pP".
    pub phase: String,
    /// Epicentral distance in degrees.
    pub distance: f64,
    /// Source-to-station azimuth in degrees.
    pub azimuth: f64,
    /// Observed minus predicted arrival time, seconds.
    pub residual: f64,
    /// Association confidence in [0, 1].
    pub affinity: f64,
    /// Per-arrival contribution to the origin score.
    pub score: f64,
    pub excluded: Exclusion,
}

impl Arrival {
    pub fn new(pick: Arc<Pick>, phase: impl Into<String>, residual: f64) -> Self {
        Self {
            pick,
            phase: phase.into(),
            distance: 0.0,
            azimuth: 0.0,
            residual,
            affinity: 0.0,
            score: 0.0,
            excluded: Exclusion::NotExcluded,
        }
    }

    /// The arrival currently takes part in the location.
    pub fn is_defining(&self) -> bool {
        self.excluded == Exclusion::NotExcluded
    }
}
