//! Origins: hypocentre hypotheses and their arrival sets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Arrival, Exclusion};

/// Monotonic origin identifier, scoped to one engine instance.
pub type OriginId = u64;

/// Imported origins always carry this id and are never relocated.
pub const IMPORTED_ORIGIN_ID: OriginId = 0;

/// Source point of an origin.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Hypocenter {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Depth in kilometers, positive down.
    pub dep: f64,
}

/// Formal errors of the location, one standard deviation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OriginError {
    /// Origin time error, seconds.
    pub stime: f64,
    /// Depth error, kilometers.
    pub sdepth: f64,
    /// Latitude error, kilometers.
    pub slat: f64,
    /// Longitude error, kilometers.
    pub slon: f64,
}

/// Network-geometry quality of the solution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OriginQuality {
    /// Secondary azimuthal gap in degrees (the gap that remains after
    /// removing any single station).
    pub azi_gap_secondary: f64,
    /// Distinct stations with defining arrivals.
    pub used_station_count: usize,
}

impl Default for OriginQuality {
    fn default() -> Self {
        Self {
            azi_gap_secondary: 360.0,
            used_station_count: 0,
        }
    }
}

/// How the focal depth of an origin is constrained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthType {
    /// Depth is a free parameter of the location.
    #[default]
    DepthFree,
    /// Depth pinned to the configured default.
    DepthDefault,
    /// Depth fixed by an analyst or a trial-depth procedure.
    DepthManuallyFixed,
    /// Depth constrained by depth phases (pP/sP).
    DepthPhases,
}

/// A hypocentre hypothesis together with the picks that define it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Origin {
    /// 0 for imported origins, monotonically assigned otherwise.
    pub id: OriginId,
    pub hypocenter: Hypocenter,
    /// Origin time, UTC.
    pub time: DateTime<Utc>,
    /// Arrivals ordered by pick time.
    pub arrivals: Vec<Arrival>,
    pub error: OriginError,
    pub quality: OriginQuality,
    /// Cached score; maintained by the engine.
    pub score: f64,
    pub depth_type: DepthType,
    /// Rapid origin from the XXL path, not yet fully constrained.
    pub preliminary: bool,
    /// Supplied by a trusted external agency; passive association only.
    pub imported: bool,
    /// Fed by an analyst.
    pub manual: bool,
    /// Agency or analyst that produced this origin, for externally fed
    /// origins.
    #[serde(default)]
    pub author: Option<String>,
    /// Logical wall clock of the last update (used for publication pacing).
    pub timestamp: DateTime<Utc>,
}

impl Origin {
    pub fn new(lat: f64, lon: f64, dep: f64, time: DateTime<Utc>) -> Self {
        Self {
            id: IMPORTED_ORIGIN_ID,
            hypocenter: Hypocenter { lat, lon, dep },
            time,
            arrivals: Vec::new(),
            error: OriginError::default(),
            quality: OriginQuality::default(),
            score: 0.0,
            depth_type: DepthType::default(),
            preliminary: false,
            imported: false,
            manual: false,
            author: None,
            timestamp: time,
        }
    }

    /// Number of defining arrivals.
    pub fn defining_phase_count(&self) -> usize {
        self.arrivals.iter().filter(|a| a.is_defining()).count()
    }

    /// Number of defining arrivals within a distance interval (degrees).
    pub fn defining_phase_count_in(&self, dmin: f64, dmax: f64) -> usize {
        self.arrivals
            .iter()
            .filter(|a| a.is_defining() && a.distance >= dmin && a.distance <= dmax)
            .count()
    }

    /// Number of arrivals that are at least location-relevant, i.e. not
    /// merely loose associations.
    pub fn phase_count(&self) -> usize {
        self.arrivals
            .iter()
            .filter(|a| a.excluded != Exclusion::UnusedPhase)
            .count()
    }

    /// Index of the arrival referencing the given pick id, if any.
    pub fn find_arrival(&self, pick_id: &str) -> Option<usize> {
        self.arrivals.iter().position(|a| a.pick.id == pick_id)
    }

    /// Append an arrival unless its pick is already referenced.
    pub fn add(&mut self, arrival: Arrival) -> bool {
        if self.find_arrival(&arrival.pick.id).is_some() {
            return false;
        }
        self.arrivals.push(arrival);
        true
    }

    /// Root-mean-square residual over defining arrivals.
    pub fn rms(&self) -> f64 {
        let mut sum = 0.0;
        let mut n = 0usize;
        for arr in &self.arrivals {
            if arr.is_defining() {
                sum += arr.residual * arr.residual;
                n += 1;
            }
        }
        if n == 0 {
            0.0
        } else {
            (sum / n as f64).sqrt()
        }
    }

    /// Stable sort of the arrivals by pick time.
    pub fn sort_arrivals(&mut self) {
        self.arrivals
            .sort_by(|a, b| a.pick.time.cmp(&b.pick.time).then(a.pick.id.cmp(&b.pick.id)));
    }

    /// Adopt the state of another solution of the same hypothesis, keeping
    /// the identity.
    pub fn update_from(&mut self, other: &Origin) {
        let id = self.id;
        *self = other.clone();
        self.id = id;
    }

    /// Distinct stations among the defining arrivals.
    pub fn count_stations(&self) -> usize {
        let mut keys: Vec<String> = self
            .arrivals
            .iter()
            .filter(|a| a.is_defining())
            .map(|a| a.pick.station_key())
            .collect();
        keys.sort();
        keys.dedup();
        keys.len()
    }
}

impl fmt::Display for Origin {
    /// One-liner used throughout the engine logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "origin {:>5} {} {:7.3} {:8.3} {:5.1}km rms={:4.2} score={:5.1} def={}{}",
            self.id,
            self.time.format("%Y-%m-%d %H:%M:%S%.1f"),
            self.hypocenter.lat,
            self.hypocenter.lon,
            self.hypocenter.dep,
            self.rms(),
            self.score,
            self.defining_phase_count(),
            if self.preliminary { " prelim" } else { "" },
        )
    }
}
