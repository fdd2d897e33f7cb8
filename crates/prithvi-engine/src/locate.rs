//! Relocation capability: the least-squares locator behind the engine.
//!
//! The engine drives the locator through a small stateful interface (profile,
//! minimum depth, fixed-depth toggle) and hands it origins to relocate. The
//! bundled implementation is a damped Geiger iteration over (time, lat, lon
//! [, depth]) using slownesses from the injected travel-time table. It must
//! preserve the arrival set and the per-arrival exclusion states; only
//! residuals, distances, azimuths, the hypocentre, formal errors and quality
//! are rewritten.

use std::sync::Arc;

use prithvi_models::{add_seconds, delazi, seconds_between, Origin};
use tracing::debug;

use crate::travel::{first_p, phase_entry, TravelTime, TravelTimeError, TravelTimeTable};

/// Relocation failures. All of them are "transient external failures" from
/// the engine's point of view; the engine falls back or keeps the previous
/// solution.
#[derive(Debug, thiserror::Error)]
pub enum LocateError {
    #[error("too few defining arrivals: {got} < {needed}")]
    InsufficientArrivals { needed: usize, got: usize },

    #[error("iteration did not converge")]
    DidNotConverge,

    #[error("degenerate geometry, normal equations singular")]
    Singular,

    #[error(transparent)]
    TravelTime(#[from] TravelTimeError),
}

/// Stateful relocation capability.
pub trait Relocator {
    /// Select a velocity-model profile by name.
    fn set_profile(&mut self, profile: &str);
    /// Depth floor handed down from configuration.
    fn set_minimum_depth(&mut self, depth_km: f64);
    /// Depth used when the fixed-depth mode is on.
    fn set_fixed_depth(&mut self, depth_km: f64);
    /// Toggle fixed-depth mode for subsequent relocations.
    fn use_fixed_depth(&mut self, fixed: bool);
    /// Relocate; the arrival set and exclusion flags are preserved.
    fn relocate(&mut self, origin: &Origin) -> Result<Origin, LocateError>;
}

const MAX_ITERATIONS: usize = 12;
const MAX_SOURCE_DEPTH: f64 = 800.0;

/// Damped Geiger least-squares locator on the built-in (or any injected)
/// travel-time table.
pub struct LeastSquaresRelocator {
    ttt: Arc<dyn TravelTimeTable>,
    profile: String,
    minimum_depth: f64,
    fixed_depth: f64,
    use_fixed: bool,
}

impl LeastSquaresRelocator {
    pub fn new(ttt: Arc<dyn TravelTimeTable>) -> Self {
        Self {
            ttt,
            profile: String::new(),
            minimum_depth: 0.0,
            fixed_depth: 10.0,
            use_fixed: false,
        }
    }

    /// Predicted entry for an arrival's phase: exact code first, the broad
    /// P family falls back to the first P-type onset.
    fn predict<'a>(list: &'a [TravelTime], phase: &str) -> Option<&'a TravelTime> {
        if let Some(tt) = phase_entry(list, phase) {
            return Some(tt);
        }
        if prithvi_models::is_p_phase(phase) || prithvi_models::is_pkp_phase(phase) {
            return first_p(list);
        }
        None
    }

    fn refresh_all_arrivals(&self, origin: &mut Origin) {
        for arr in &mut origin.arrivals {
            let Some(station) = arr.pick.station.clone() else {
                continue;
            };
            let da = delazi(origin.hypocenter.lat, origin.hypocenter.lon, station.lat, station.lon);
            arr.distance = da.delta;
            arr.azimuth = da.azimuth;
            let Ok(list) = self.ttt.compute_at(&origin.hypocenter, &station) else {
                continue;
            };
            if let Some(tt) = Self::predict(&list, &arr.phase) {
                arr.residual =
                    seconds_between(arr.pick.time, origin.time) - tt.time;
            }
        }
    }

    fn quality(origin: &mut Origin) {
        let mut azimuths: Vec<f64> = origin
            .arrivals
            .iter()
            .filter(|a| a.is_defining())
            .map(|a| a.azimuth)
            .collect();
        origin.quality.used_station_count = origin.count_stations();
        origin.quality.azi_gap_secondary = secondary_azimuthal_gap(&mut azimuths);
    }
}

/// Largest azimuthal gap that remains when any single station is removed.
fn secondary_azimuthal_gap(azimuths: &mut Vec<f64>) -> f64 {
    let n = azimuths.len();
    if n < 3 {
        return 360.0;
    }
    azimuths.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mut max_gap = 0.0f64;
    for i in 0..n {
        let a = azimuths[i];
        let b = azimuths[(i + 2) % n];
        let mut gap = b - a;
        if gap < 0.0 {
            gap += 360.0;
        }
        max_gap = max_gap.max(gap);
    }
    max_gap
}

/// Solve the normal equations `ata * x = atb` in place, Gauss-Jordan with
/// partial pivoting. Returns the solution and the inverse of `ata`.
fn solve_normal(ata: Vec<Vec<f64>>, atb: Vec<f64>) -> Option<(Vec<f64>, Vec<Vec<f64>>)> {
    let m = atb.len();
    // Augment with the identity to recover the inverse for the covariance.
    let mut aug: Vec<Vec<f64>> = (0..m)
        .map(|i| {
            let mut row = ata[i].clone();
            row.extend((0..m).map(|j| if i == j { 1.0 } else { 0.0 }));
            row.push(atb[i]);
            row
        })
        .collect();

    for col in 0..m {
        let pivot_row = (col..m).max_by(|&a, &b| {
            aug[a][col]
                .abs()
                .partial_cmp(&aug[b][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if aug[pivot_row][col].abs() < 1e-12 {
            return None;
        }
        aug.swap(col, pivot_row);
        let pivot = aug[col][col];
        for v in aug[col].iter_mut() {
            *v /= pivot;
        }
        for row in 0..m {
            if row == col {
                continue;
            }
            let factor = aug[row][col];
            if factor == 0.0 {
                continue;
            }
            for k in 0..aug[row].len() {
                let delta = factor * aug[col][k];
                aug[row][k] -= delta;
            }
        }
    }

    let x: Vec<f64> = (0..m).map(|i| aug[i][2 * m]).collect();
    let inv: Vec<Vec<f64>> = (0..m).map(|i| aug[i][m..2 * m].to_vec()).collect();
    Some((x, inv))
}

impl Relocator for LeastSquaresRelocator {
    fn set_profile(&mut self, profile: &str) {
        debug!(profile, "relocator profile set");
        self.profile = profile.to_string();
    }

    fn set_minimum_depth(&mut self, depth_km: f64) {
        self.minimum_depth = depth_km;
    }

    fn set_fixed_depth(&mut self, depth_km: f64) {
        self.fixed_depth = depth_km;
    }

    fn use_fixed_depth(&mut self, fixed: bool) {
        self.use_fixed = fixed;
    }

    fn relocate(&mut self, origin: &Origin) -> Result<Origin, LocateError> {
        let mut work = origin.clone();
        if self.use_fixed {
            work.hypocenter.dep = self.fixed_depth.max(0.0);
        }
        work.hypocenter.dep = work
            .hypocenter
            .dep
            .clamp(self.minimum_depth.min(MAX_SOURCE_DEPTH), MAX_SOURCE_DEPTH);

        let unknowns = if self.use_fixed { 3 } else { 4 };
        let defining: Vec<usize> = work
            .arrivals
            .iter()
            .enumerate()
            .filter(|(_, a)| a.is_defining() && a.pick.station.is_some())
            .map(|(i, _)| i)
            .collect();
        if defining.len() < unknowns {
            return Err(LocateError::InsufficientArrivals {
                needed: unknowns,
                got: defining.len(),
            });
        }

        let mut last_ssq = f64::INFINITY;
        let mut ata_inv: Option<Vec<Vec<f64>>> = None;
        let mut dof_ssq = 0.0;

        for _iteration in 0..MAX_ITERATIONS {
            let mut ata = vec![vec![0.0; unknowns]; unknowns];
            let mut atb = vec![0.0; unknowns];
            let mut ssq = 0.0;
            let mut used = 0usize;

            for &i in &defining {
                let arr = &work.arrivals[i];
                let Some(station) = arr.pick.station.as_ref() else {
                    continue;
                };
                let da = delazi(
                    work.hypocenter.lat,
                    work.hypocenter.lon,
                    station.lat,
                    station.lon,
                );
                let list = match self.ttt.compute_at(&work.hypocenter, station) {
                    Ok(list) => list,
                    Err(_) => continue,
                };
                let Some(tt) = Self::predict(&list, &arr.phase) else {
                    continue;
                };
                let residual = seconds_between(arr.pick.time, work.time) - tt.time;

                let az = da.azimuth.to_radians();
                // d(delta)/d(lat), d(delta)/d(lon) in degrees per degree.
                let ddelta_dlat = -az.cos();
                let ddelta_dlon = -az.sin() * work.hypocenter.lat.to_radians().cos();

                let mut row = vec![1.0, tt.dtdd * ddelta_dlat, tt.dtdd * ddelta_dlon];
                if unknowns == 4 {
                    row.push(tt.dtdh);
                }

                for r in 0..unknowns {
                    for c in 0..unknowns {
                        ata[r][c] += row[r] * row[c];
                    }
                    atb[r] += row[r] * residual;
                }
                ssq += residual * residual;
                used += 1;
            }

            if used < unknowns {
                return Err(LocateError::InsufficientArrivals {
                    needed: unknowns,
                    got: used,
                });
            }

            // Light ridge regularization keeps near-degenerate networks
            // (e.g. all stations on one azimuth) from blowing up.
            for (r, row) in ata.iter_mut().enumerate() {
                row[r] += 1e-4;
            }

            let (step, inv) = solve_normal(ata, atb).ok_or(LocateError::Singular)?;
            ata_inv = Some(inv);
            dof_ssq = ssq;

            let dt = step[0].clamp(-50.0, 50.0);
            let dlat = step[1].clamp(-5.0, 5.0);
            let dlon = step[2].clamp(-5.0, 5.0);
            let ddep = if unknowns == 4 {
                step[3].clamp(-100.0, 100.0)
            } else {
                0.0
            };

            work.time = add_seconds(work.time, dt);
            work.hypocenter.lat = (work.hypocenter.lat + dlat).clamp(-90.0, 90.0);
            work.hypocenter.lon = wrap_longitude(work.hypocenter.lon + dlon);
            if unknowns == 4 {
                work.hypocenter.dep = (work.hypocenter.dep + ddep)
                    .clamp(self.minimum_depth, MAX_SOURCE_DEPTH);
            }

            if !work.hypocenter.lat.is_finite()
                || !work.hypocenter.lon.is_finite()
                || !work.hypocenter.dep.is_finite()
            {
                return Err(LocateError::DidNotConverge);
            }

            let converged = dt.abs() < 1e-3 && dlat.abs() < 1e-4 && dlon.abs() < 1e-4 && ddep.abs() < 0.05;
            if converged {
                break;
            }
            // A diverging residual sum means the linearization cannot be
            // trusted at this starting point.
            if ssq > 4.0 * last_ssq && ssq > 1e6 {
                return Err(LocateError::DidNotConverge);
            }
            last_ssq = ssq;
        }

        self.refresh_all_arrivals(&mut work);
        LeastSquaresRelocator::quality(&mut work);

        // Formal errors from the covariance of the final normal equations.
        if let Some(inv) = ata_inv {
            let n = defining.len();
            let m = inv.len();
            let sigma2 = if n > m { dof_ssq / (n - m) as f64 } else { 1.0 };
            work.error.stime = (sigma2 * inv[0][0]).max(0.0).sqrt();
            work.error.slat = (sigma2 * inv[1][1]).max(0.0).sqrt() * 111.2;
            work.error.slon = (sigma2 * inv[2][2]).max(0.0).sqrt()
                * 111.2
                * work.hypocenter.lat.to_radians().cos().abs().max(0.01);
            work.error.sdepth = if m == 4 {
                (sigma2 * inv[3][3]).max(0.0).sqrt()
            } else {
                0.0
            };
        }

        Ok(work)
    }
}

fn wrap_longitude(lon: f64) -> f64 {
    let mut lon = lon;
    while lon > 180.0 {
        lon -= 360.0;
    }
    while lon < -180.0 {
        lon += 360.0;
    }
    lon
}
