//! Travel-time capability.
//!
//! The engine never computes travel times itself; it asks an injected
//! `TravelTimeTable`. The contract mirrors a classical tau-p table lookup:
//! given a source and a receiver, return the ordered list of predicted
//! arrivals. A source/receiver pair outside the table's validity range is a
//! normal condition ("no prediction"), not a failure of the engine.

use prithvi_models::{Hypocenter, Station};

/// One predicted arrival at a receiver.
#[derive(Debug, Clone, PartialEq)]
pub struct TravelTime {
    /// Phase code ("P", "PKP", "PP", "pP", "sP", "S", "SKP", "PKKP",
    /// "Pdiff", "Pn", "Pg", "Pb").
    pub phase: String,
    /// Travel time from origin time, seconds.
    pub time: f64,
    /// Horizontal slowness, seconds per degree.
    pub dtdd: f64,
    /// Depth derivative, seconds per kilometer (negative: deeper source
    /// arrives earlier at teleseismic distances).
    pub dtdh: f64,
    /// Takeoff angle at the source, degrees from vertical.
    pub takeoff: f64,
}

/// Errors of the travel-time capability.
#[derive(Debug, thiserror::Error)]
pub enum TravelTimeError {
    /// The source/receiver geometry is outside the table.
    #[error("no travel time for distance {distance:.1} deg, depth {depth:.1} km")]
    OutOfRange { distance: f64, depth: f64 },

    /// The table cannot predict the requested phase at this geometry.
    #[error("phase {0} not predicted at this geometry")]
    UnknownPhase(String),
}

/// Ordered phase arrivals for a source/receiver pair.
///
/// Implementations must be deterministic and re-entrant; they are called
/// many times per pick from a single thread.
pub trait TravelTimeTable {
    /// All predicted arrivals, ordered by increasing time.
    fn compute(
        &self,
        source: &Hypocenter,
        rcv_lat: f64,
        rcv_lon: f64,
        rcv_elev: f64,
    ) -> Result<Vec<TravelTime>, TravelTimeError>;

    /// Convenience: predicted arrivals at a station.
    fn compute_at(
        &self,
        source: &Hypocenter,
        station: &Station,
    ) -> Result<Vec<TravelTime>, TravelTimeError> {
        self.compute(source, station.lat, station.lon, station.elev)
    }
}

/// First entry with the exact phase code.
pub fn phase_entry<'a>(list: &'a [TravelTime], phase: &str) -> Option<&'a TravelTime> {
    list.iter().find(|tt| tt.phase == phase)
}

/// First arrival of the broad P family: direct/regional P, diffracted P, or
/// a core phase when nothing else arrives first.
pub fn first_p(list: &[TravelTime]) -> Option<&TravelTime> {
    list.iter().find(|tt| {
        prithvi_models::is_p_phase(&tt.phase)
            || tt.phase == "Pdiff"
            || prithvi_models::is_pkp_phase(&tt.phase)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tt(phase: &str, time: f64) -> TravelTime {
        TravelTime {
            phase: phase.into(),
            time,
            dtdd: 8.0,
            dtdh: -0.1,
            takeoff: 30.0,
        }
    }

    #[test]
    fn first_p_skips_secondary_phases() {
        let list = vec![tt("Pdiff", 830.0), tt("PKP", 1150.0), tt("PP", 1030.0)];
        assert_eq!(first_p(&list).unwrap().phase, "Pdiff");
    }

    #[test]
    fn phase_entry_is_exact() {
        let list = vec![tt("P", 400.0), tt("pP", 415.0)];
        assert!(phase_entry(&list, "pP").is_some());
        assert!(phase_entry(&list, "sP").is_none());
    }
}
