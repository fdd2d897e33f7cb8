//! Candidate generation: which existing origins could explain a new pick.
//!
//! The associator only proposes; the engine decides. For every current
//! origin whose time window plausibly admits the pick it emits a candidate
//! `(origin, phase, residual, affinity, distance, azimuth)`. The strict
//! residual gate and the relocate-and-verify step live in the engine's
//! attachment logic, not here.

use std::sync::Arc;

use prithvi_models::{delazi, seconds_between, LocatorConfig, Origin, Pick};
use tracing::debug;

use crate::score::affinity;
use crate::travel::{first_p, phase_entry, TravelTimeTable};

/// Earliest a P-family onset may precede the predicted window, seconds.
const P_WINDOW_EARLY: f64 = -10.0;
/// Latest a P-family onset may trail the origin time, seconds.
const P_WINDOW_LATE: f64 = 1300.0;
/// PKP onsets arrive no earlier than this after the origin time, seconds.
const PKP_MIN_DELAY: f64 = 1000.0;

/// One candidate association of a pick to an existing origin.
#[derive(Debug, Clone)]
pub struct Association {
    /// Index into the engine's origin set.
    pub origin_index: usize,
    /// Proposed phase code ("P" or "PKP").
    pub phase: String,
    /// Observed minus predicted, seconds.
    pub residual: f64,
    /// Association confidence in [0, 1].
    pub affinity: f64,
    /// Epicentral distance, degrees.
    pub distance: f64,
    /// Source-to-station azimuth, degrees.
    pub azimuth: f64,
}

/// Evaluates the current origin set against one pick.
pub struct Associator {
    ttt: Arc<dyn TravelTimeTable>,
}

impl Associator {
    pub fn new(ttt: Arc<dyn TravelTimeTable>) -> Self {
        Self { ttt }
    }

    /// All plausible candidates, in origin-set order.
    pub fn candidates(
        &self,
        pick: &Pick,
        origins: &[Origin],
        config: &LocatorConfig,
    ) -> Vec<Association> {
        let Some(station) = pick.station.as_ref() else {
            return Vec::new();
        };

        let mut result = Vec::new();
        // Candidates with residuals far beyond the strict gate are noise;
        // this cap matches the widest factor the gate can ever apply.
        let residual_cap = 2.0 * 1.8 * config.max_residual_use;

        for (index, origin) in origins.iter().enumerate() {
            let dt = seconds_between(pick.time, origin.time);
            if !(P_WINDOW_EARLY..=P_WINDOW_LATE).contains(&dt) {
                continue;
            }

            let da = delazi(
                origin.hypocenter.lat,
                origin.hypocenter.lon,
                station.lat,
                station.lon,
            );
            let list = match self.ttt.compute_at(&origin.hypocenter, station) {
                Ok(list) => list,
                Err(err) => {
                    debug!(origin = origin.id, %err, "no travel time for candidate");
                    continue;
                }
            };

            if let Some(tt) = first_p(&list) {
                let residual = dt - tt.time;
                if residual.abs() <= residual_cap {
                    result.push(Association {
                        origin_index: index,
                        phase: "P".into(),
                        residual,
                        affinity: affinity(
                            residual,
                            da.delta,
                            station.max_nucleation_distance,
                            config,
                        ),
                        distance: da.delta,
                        azimuth: da.azimuth,
                    });
                }
            }

            // A separate PKP candidate where the core phase is predicted
            // and the onset is late enough.
            if dt > PKP_MIN_DELAY {
                if let Some(tt) = phase_entry(&list, "PKP") {
                    let residual = dt - tt.time;
                    if residual.abs() <= residual_cap {
                        result.push(Association {
                            origin_index: index,
                            phase: "PKP".into(),
                            residual,
                            affinity: affinity(
                                residual,
                                da.delta,
                                station.max_nucleation_distance,
                                config,
                            ),
                            distance: da.delta,
                            azimuth: da.azimuth,
                        });
                    }
                }
            }
        }

        result
    }
}
