//! Picks: single-station phase onsets with amplitude and SNR.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::Station;

/// Maximum plausible SNR. Anything above this is a sensor glitch.
pub const MAX_PLAUSIBLE_SNR: f64 = 1.0e7;

/// How a pick came into being, and whether the engine still uses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickMode {
    /// Produced by an automatic picker.
    Automatic,
    /// Produced by an analyst.
    Manual,
    /// Automatic pick suppressed by the recent-pick-rate gate.
    IgnoredAutomatic,
}

impl PickMode {
    /// Single-character flag used in the pick log.
    pub fn flag(self) -> char {
        match self {
            PickMode::Automatic => 'A',
            PickMode::Manual => 'M',
            PickMode::IgnoredAutomatic => 'I',
        }
    }
}

/// A detection of a phase onset at one station.
///
/// Owned by the pick pool and shared into arrivals via `Arc`. The station
/// reference is resolved against the registry at store time and therefore
/// not serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pick {
    /// Stable external identifier; the pool deduplicates on it.
    pub id: String,
    /// Onset time, UTC.
    pub time: DateTime<Utc>,
    pub net: String,
    pub sta: String,
    #[serde(default)]
    pub loc: String,
    pub cha: String,
    /// Peak amplitude; 0 means "not yet measured".
    #[serde(default)]
    pub amplitude: f64,
    /// Dominant period in seconds.
    #[serde(default)]
    pub period: f64,
    /// Signal-to-noise ratio of the onset.
    #[serde(default)]
    pub snr: f64,
    pub mode: PickMode,
    /// Very-large-amplitude flag, set during intake.
    #[serde(default)]
    pub xxl: bool,
    /// Amplitude normalized by the XXL threshold (or a fixed reference when
    /// XXL mode is off); set during intake.
    #[serde(default)]
    pub normalized_amplitude: f64,
    /// Resolved receiver; populated from the registry at store time.
    #[serde(skip)]
    pub station: Option<Arc<Station>>,
}

impl Pick {
    pub fn is_automatic(&self) -> bool {
        self.mode == PickMode::Automatic
    }

    pub fn is_manual(&self) -> bool {
        self.mode == PickMode::Manual
    }

    pub fn is_ignored(&self) -> bool {
        self.mode == PickMode::IgnoredAutomatic
    }

    /// An amplitude has been measured for this pick.
    pub fn has_amplitude(&self) -> bool {
        self.amplitude > 0.0
    }

    /// Station resolved, and for automatic picks: a plausible SNR and a
    /// measured amplitude. Manual picks are trusted unconditionally.
    pub fn is_valid(&self) -> bool {
        if self.station.is_none() {
            return false;
        }
        if !self.is_automatic() {
            return true;
        }
        if self.snr <= 0.0 || self.snr > MAX_PLAUSIBLE_SNR {
            return false;
        }
        self.has_amplitude()
    }

    /// "NET.STA" of the generating station.
    pub fn station_key(&self) -> String {
        format!("{}.{}", self.net, self.sta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn pick(mode: PickMode, snr: f64, amplitude: f64) -> Pick {
        Pick {
            id: "p1".into(),
            time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            net: "GE".into(),
            sta: "WLF".into(),
            loc: String::new(),
            cha: "BHZ".into(),
            amplitude,
            period: 0.8,
            snr,
            mode,
            xxl: false,
            normalized_amplitude: 0.0,
            station: Some(Arc::new(Station::new("GE", "WLF", 49.66, 6.15, 295.0))),
        }
    }

    #[test]
    fn automatic_pick_needs_snr_and_amplitude() {
        assert!(pick(PickMode::Automatic, 12.0, 100.0).is_valid());
        assert!(!pick(PickMode::Automatic, 0.0, 100.0).is_valid());
        assert!(!pick(PickMode::Automatic, 12.0, 0.0).is_valid());
        assert!(!pick(PickMode::Automatic, 2.0e7, 100.0).is_valid());
    }

    #[test]
    fn manual_pick_is_trusted() {
        assert!(pick(PickMode::Manual, 0.0, 0.0).is_valid());
    }

    #[test]
    fn unresolved_station_invalidates() {
        let mut p = pick(PickMode::Manual, 5.0, 5.0);
        p.station = None;
        assert!(!p.is_valid());
    }
}
