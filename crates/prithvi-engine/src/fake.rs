//! Fake-origin detection: candidate origins whose picks are really
//! secondary phases of another, genuine event.
//!
//! Misidentified PP/PKP/S arrivals of a large event can conspire into a
//! plausible-looking new hypocentre. For each recent, much larger origin we
//! count how many of the candidate's picks fall into the secondary-phase
//! windows of that origin; the resulting probability gates the candidate in
//! `passed_filter`.

use prithvi_models::{delazi, seconds_between, Exclusion, Origin, Pick};
use tracing::debug;

use crate::engine::Locator;
use crate::travel::phase_entry;

/// Origins scoring above this are never tested; they stand on their own.
const FAKE_TEST_SCORE_BYPASS: f64 = 80.0;

/// Candidate time window relative to the other origin, seconds.
const OTHER_ORIGIN_BEFORE: f64 = 1800.0;
const OTHER_ORIGIN_AFTER: f64 = 600.0;

/// One secondary-phase coincidence window.
struct PhaseWindow {
    phase: &'static str,
    delta_min: f64,
    delta_max: f64,
    /// Minimum source depth of the other origin, km (pP/sP only).
    min_depth: f64,
    dt_min: f64,
    dt_max: f64,
    /// XXL picks are immune to this window.
    skip_xxl: bool,
}

const PHASE_WINDOWS: &[PhaseWindow] = &[
    PhaseWindow { phase: "PP", delta_min: 30.0, delta_max: 180.0, min_depth: 0.0, dt_min: -20.0, dt_max: 30.0, skip_xxl: true },
    PhaseWindow { phase: "PKP", delta_min: 100.0, delta_max: 180.0, min_depth: 0.0, dt_min: -20.0, dt_max: 50.0, skip_xxl: true },
    PhaseWindow { phase: "SKP", delta_min: 120.0, delta_max: 142.0, min_depth: 0.0, dt_min: -20.0, dt_max: 50.0, skip_xxl: true },
    PhaseWindow { phase: "PKKP", delta_min: 100.0, delta_max: 130.0, min_depth: 0.0, dt_min: -20.0, dt_max: 50.0, skip_xxl: true },
    PhaseWindow { phase: "pP", delta_min: 25.0, delta_max: 180.0, min_depth: 60.0, dt_min: -20.0, dt_max: 30.0, skip_xxl: false },
    PhaseWindow { phase: "sP", delta_min: 25.0, delta_max: 180.0, min_depth: 60.0, dt_min: -20.0, dt_max: 30.0, skip_xxl: false },
    PhaseWindow { phase: "S", delta_min: 0.0, delta_max: 110.0, min_depth: 0.0, dt_min: -20.0, dt_max: 30.0, skip_xxl: true },
];

impl Locator {
    /// Probability that the candidate is composed of secondary phases of a
    /// previously known origin. Imported and high-score origins skip the
    /// test entirely.
    pub(crate) fn test_fake(&self, origin: &mut Origin) -> f64 {
        if origin.imported {
            return 0.0;
        }
        if origin.score > FAKE_TEST_SCORE_BYPASS {
            return 0.0;
        }

        let defining_count = origin.defining_phase_count();
        if defining_count == 0 {
            return 0.0;
        }

        let mut max_probability: f64 = 0.0;

        for other_index in 0..self.origins.len() {
            let other = &self.origins[other_index];

            // Only previous (or barely later) origins are plausible donors
            // of secondary phases.
            let dt_origin = seconds_between(other.time, origin.time);
            if dt_origin < -OTHER_ORIGIN_BEFORE || dt_origin > OTHER_ORIGIN_AFTER {
                continue;
            }

            // Small origins cannot shower us with secondaries.
            if other.defining_phase_count() < 2 * defining_count {
                continue;
            }

            let other_hypo = other.hypocenter;
            let other_time = other.time;
            let other_depth = other.hypocenter.dep;

            let mut count = 0usize;
            for arr in &mut origin.arrivals {
                // Picks the other origin already references count directly.
                if self.origins[other_index].find_arrival(&arr.pick.id).is_some() {
                    arr.excluded = Exclusion::DeterioratesSolution;
                    debug!("fake test: doubly associated pick {}", arr.pick.id);
                    count += 1;
                    continue;
                }

                let Some(station) = arr.pick.station.clone() else {
                    continue;
                };
                let da = delazi(other_hypo.lat, other_hypo.lon, station.lat, station.lon);
                let Ok(list) = self.ttt.compute_at(&other_hypo, &station) else {
                    continue;
                };

                for window in PHASE_WINDOWS {
                    if da.delta <= window.delta_min || da.delta > window.delta_max {
                        continue;
                    }
                    if other_depth <= window.min_depth && window.min_depth > 0.0 {
                        continue;
                    }
                    if window.skip_xxl && arr.pick.xxl {
                        continue;
                    }
                    let Some(tt) = phase_entry(&list, window.phase) else {
                        continue;
                    };
                    let dt = seconds_between(arr.pick.time, other_time) - tt.time;
                    if dt > window.dt_min && dt < window.dt_max {
                        if dt.abs() < arr.residual.abs() {
                            arr.excluded = Exclusion::DeterioratesSolution;
                        }
                        debug!(
                            "fake test: {} {} -> {} {} dt={:.1}",
                            station.code, origin.id, self.origins[other_index].id, window.phase, dt
                        );
                        count += 1;
                        break;
                    }
                }
            }

            if count > 0 {
                debug!(
                    "fake test: {} -> {}, {}/{}",
                    origin.id, self.origins[other_index].id, count, defining_count
                );
            }
            max_probability = max_probability.max(count as f64 / defining_count as f64);
        }

        max_probability
    }

    /// Low-SNR picks in the Pdiff coda of a large event are noise, not new
    /// events.
    pub(crate) fn perhaps_pdiff(&self, pick: &Pick) -> bool {
        // Crude and harmless: only weak picks shortly after a large event
        // are affected at all.
        if pick.snr > 6.0 {
            return false;
        }
        let Some(station) = pick.station.as_ref() else {
            return false;
        };

        let mut result = false;
        for origin in &self.origins {
            if seconds_between(pick.time, origin.time) > 1000.0 {
                continue;
            }
            if origin.score < 100.0 {
                continue;
            }

            let da = delazi(
                origin.hypocenter.lat,
                origin.hypocenter.lon,
                station.lat,
                station.lon,
            );
            if da.delta < 98.0 || da.delta > 120.0 {
                continue;
            }

            let mut hypo = origin.hypocenter;
            hypo.dep = hypo.dep.max(0.01);
            let Ok(list) = self.ttt.compute_at(&hypo, station) else {
                continue;
            };
            let Some(tt) = phase_entry(&list, "Pdiff") else {
                continue;
            };

            let dt = seconds_between(pick.time, origin.time) - tt.time;
            if dt > 0.0 && dt < 150.0 {
                debug!("pick {} in Pdiff coda of origin {}", pick.id, origin.id);
                result = true;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use prithvi_models::{LocatorConfig, Origin};

    use crate::engine::Locator;

    #[test]
    fn high_score_origin_skips_the_test() {
        let engine = Locator::with_defaults(LocatorConfig::default()).unwrap();
        let mut origin = Origin::new(0.0, 0.0, 10.0, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        origin.score = 90.0;
        assert_eq!(engine.test_fake(&mut origin), 0.0);
    }

    #[test]
    fn imported_origin_skips_the_test() {
        let engine = Locator::with_defaults(LocatorConfig::default()).unwrap();
        let mut origin = Origin::new(0.0, 0.0, 10.0, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        origin.imported = true;
        assert_eq!(engine.test_fake(&mut origin), 0.0);
    }

    #[test]
    fn lone_origin_is_never_fake() {
        let engine = Locator::with_defaults(LocatorConfig::default()).unwrap();
        let mut origin = Origin::new(0.0, 0.0, 10.0, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        origin.score = 10.0;
        assert_eq!(engine.test_fake(&mut origin), 0.0);
    }
}
