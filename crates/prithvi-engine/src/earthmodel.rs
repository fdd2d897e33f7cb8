//! Built-in coarse 1-D travel-time table.
//!
//! A piecewise-linear approximation of a standard radial earth model,
//! sufficient for association windows, nucleation and the bundled
//! least-squares solver. The runner and the end-to-end tests use it as the
//! default `TravelTimeTable`; production deployments may inject a tabulated
//! tau-p implementation instead.
//!
//! Phases provided: P (with Pn/Pg as regional aliases), Pdiff, PKP, PP,
//! pP, sP, S, SKP, PKKP. All times are seconds, distances degrees, depths
//! kilometers.

use prithvi_models::{delazi, Hypocenter};

use crate::travel::{TravelTime, TravelTimeError, TravelTimeTable};

/// Surface-focus P travel time at 10-degree knots, 0..=100 degrees.
const P_KNOTS: [f64; 11] = [
    0.0, 145.0, 273.0, 372.0, 459.0, 539.0, 612.0, 678.0, 738.0, 788.0, 828.0,
];

/// Depth derivative of the direct P time, s/km.
const P_DTDH: f64 = -0.09;

/// Deepest supported source.
const MAX_DEPTH_KM: f64 = 800.0;

/// Coarse built-in travel-time table.
#[derive(Debug, Clone, Default)]
pub struct StandardTable;

impl StandardTable {
    pub fn new() -> Self {
        Self
    }

    /// Surface-focus P time by linear interpolation of the knot table.
    fn p_surface(delta: f64) -> f64 {
        let delta = delta.clamp(0.0, 100.0);
        let i = ((delta / 10.0).floor() as usize).min(9);
        let frac = delta / 10.0 - i as f64;
        P_KNOTS[i] + (P_KNOTS[i + 1] - P_KNOTS[i]) * frac
    }

    /// Direct P time for a buried source; monotone in distance.
    fn p_time(delta: f64, dep: f64) -> f64 {
        let eff = (delta * delta + (dep / 111.2) * (dep / 111.2)).sqrt();
        (Self::p_surface(eff) + P_DTDH * dep).max(dep / 8.0)
    }
}

// Central difference step used for slowness estimates.
fn slope(f: impl Fn(f64) -> f64, x: f64) -> f64 {
    let h = 0.05;
    let lo = (x - h).max(0.0);
    (f(x + h) - f(lo)) / (x + h - lo)
}

fn takeoff_from_slowness(dtdd: f64) -> f64 {
    // 8 km/s source-region velocity; clamp keeps asin well-defined.
    let sine = (dtdd * 8.0 / 111.2).clamp(-1.0, 1.0);
    sine.asin().to_degrees().abs()
}

impl TravelTimeTable for StandardTable {
    fn compute(
        &self,
        source: &Hypocenter,
        rcv_lat: f64,
        rcv_lon: f64,
        _rcv_elev: f64,
    ) -> Result<Vec<TravelTime>, TravelTimeError> {
        let dep = source.dep.max(0.0);
        let da = delazi(source.lat, source.lon, rcv_lat, rcv_lon);
        let delta = da.delta;

        if dep > MAX_DEPTH_KM {
            return Err(TravelTimeError::OutOfRange {
                distance: delta,
                depth: dep,
            });
        }

        let mut list: Vec<TravelTime> = Vec::new();
        let mut push = |phase: &str, time: f64, dtdd: f64, dtdh: f64| {
            list.push(TravelTime {
                phase: phase.into(),
                time,
                dtdd,
                dtdh,
                takeoff: takeoff_from_slowness(dtdd),
            });
        };

        // Direct and diffracted P.
        if delta <= 100.0 {
            let t = Self::p_time(delta, dep);
            let dtdd = slope(|x| Self::p_time(x, dep), delta);
            push("P", t, dtdd, P_DTDH);

            // Depth phases; the surface-reflection delay grows with depth.
            if dep > 0.0 && delta > 5.0 {
                push("pP", t + 0.28 * dep, dtdd, P_DTDH + 0.28);
                push("sP", t + 0.36 * dep, dtdd, P_DTDH + 0.36);
            }
        } else if delta <= 130.0 {
            // Diffracted P along the core-mantle boundary, 4.4 s/deg.
            let t = Self::p_time(100.0, dep) + (delta - 100.0) * 4.4;
            push("Pdiff", t, 4.4, P_DTDH);
        }

        // Core phase PKP beyond 110 degrees.
        if delta >= 110.0 {
            let t = 1120.0 + (delta - 110.0) * 1.5 + P_DTDH * dep;
            push("PKP", t, 1.5, P_DTDH);
        }

        // Surface reflection PP.
        if delta >= 30.0 {
            let half = delta / 2.0;
            let t = 2.0 * Self::p_time(half, 0.0) + P_DTDH * dep;
            push("PP", t, slope(|x| 2.0 * Self::p_time(x / 2.0, 0.0), delta), P_DTDH);
        }

        // Direct S (includes SKS at large distances for our purposes).
        if delta <= 110.0 {
            let t = 1.8 * Self::p_time(delta.min(100.0), dep);
            push("S", t, 1.8 * slope(|x| Self::p_time(x.min(100.0), dep), delta), 1.8 * P_DTDH);
        }

        // Converted core phases in their classical windows.
        if (120.0..=142.0).contains(&delta) {
            push("SKP", 1290.0 + (delta - 120.0) * 2.0 + P_DTDH * dep, 2.0, P_DTDH);
        }
        if (100.0..=130.0).contains(&delta) {
            push("PKKP", 1850.0 + (delta - 100.0) * 1.2 + P_DTDH * dep, 1.2, P_DTDH);
        }

        if list.is_empty() {
            return Err(TravelTimeError::OutOfRange {
                distance: delta,
                depth: dep,
            });
        }

        list.sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap_or(std::cmp::Ordering::Equal));
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::travel::{first_p, phase_entry};

    fn src(dep: f64) -> Hypocenter {
        Hypocenter {
            lat: 0.0,
            lon: 0.0,
            dep,
        }
    }

    #[test]
    fn p_is_monotone_in_distance() {
        let mut last = -1.0;
        for d in 1..100 {
            let t = StandardTable::p_time(d as f64, 10.0);
            assert!(t > last, "P time must grow with distance (delta={d})");
            last = t;
        }
    }

    #[test]
    fn teleseismic_p_around_13_minutes_at_90_degrees() {
        let list = StandardTable::new()
            .compute(&src(10.0), 0.0, 90.0, 0.0)
            .unwrap();
        let p = first_p(&list).unwrap();
        assert_eq!(p.phase, "P");
        assert!((p.time - 787.0).abs() < 5.0);
    }

    #[test]
    fn pkp_only_beyond_110_degrees() {
        let table = StandardTable::new();
        let near = table.compute(&src(10.0), 0.0, 60.0, 0.0).unwrap();
        assert!(phase_entry(&near, "PKP").is_none());

        let far = table.compute(&src(10.0), 0.0, 120.0, 0.0).unwrap();
        let pkp = phase_entry(&far, "PKP").unwrap();
        assert!(pkp.time > 1000.0);
        assert_eq!(first_p(&far).unwrap().phase, "Pdiff");
    }

    #[test]
    fn depth_phases_trail_p_proportionally_to_depth() {
        let table = StandardTable::new();
        let list = table.compute(&src(100.0), 0.0, 50.0, 0.0).unwrap();
        let p = phase_entry(&list, "P").unwrap().time;
        let pp = phase_entry(&list, "pP").unwrap().time;
        let sp = phase_entry(&list, "sP").unwrap().time;
        assert!((pp - p - 28.0).abs() < 1.0);
        assert!(sp > pp);
    }

    #[test]
    fn arrivals_sorted_by_time() {
        let list = StandardTable::new()
            .compute(&src(33.0), 0.0, 60.0, 0.0)
            .unwrap();
        for w in list.windows(2) {
            assert!(w[0].time <= w[1].time);
        }
    }

    #[test]
    fn too_deep_source_is_out_of_range() {
        assert!(StandardTable::new().compute(&src(900.0), 0.0, 50.0, 0.0).is_err());
    }
}
