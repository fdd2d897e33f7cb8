//! Origin scoring and association affinity.
//!
//! The score is the engine's single figure of merit: association keeps the
//! candidate with the best score, the refinement loop maximizes it, the
//! publication gate thresholds it. It is a sum of per-arrival contributions
//! over the defining arrivals, so it grows with phase count and shrinks when
//! residuals degrade. Large-amplitude, high-SNR picks weigh more, which lets
//! strong teleseismic events clear the high-score short-circuits (fake test,
//! Pdiff suppression) with a dozen stations.

use prithvi_models::{Arrival, LocatorConfig, Origin};

/// Contribution of one defining arrival to the origin score.
pub fn arrival_score(arr: &Arrival, config: &LocatorConfig) -> f64 {
    let normalized = arr.residual / config.max_residual_use.max(1e-9);
    let residual_weight = (-normalized * normalized).exp();
    let amplitude_weight = 1.0 + arr.pick.normalized_amplitude.clamp(0.0, 2.0);
    let snr_weight = 1.0 + 0.1 * arr.pick.snr.clamp(0.0, 20.0);
    residual_weight * amplitude_weight * snr_weight
}

/// Score of an origin as if no other origins existed.
pub fn origin_score(origin: &Origin, config: &LocatorConfig) -> f64 {
    origin
        .arrivals
        .iter()
        .filter(|a| a.is_defining())
        .map(|a| arrival_score(a, config))
        .sum()
}

/// Recompute and cache the origin score and the per-arrival scores.
pub fn update_score(origin: &mut Origin, config: &LocatorConfig) {
    let mut total = 0.0;
    for arr in &mut origin.arrivals {
        let s = arrival_score(arr, config);
        arr.score = if arr.is_defining() { s } else { 0.0 };
        if arr.is_defining() {
            total += s;
        }
    }
    origin.score = total;
}

/// Association confidence in [0, 1]: agreement of the predicted time,
/// attenuated when the station lies beyond its nucleation range.
pub fn affinity(residual: f64, distance: f64, max_nucleation_distance: f64, config: &LocatorConfig) -> f64 {
    let normalized = residual / config.max_residual_use.max(1e-9);
    let residual_factor = 1.0 / (1.0 + normalized * normalized);
    let geometry_factor = if distance <= max_nucleation_distance {
        1.0
    } else {
        (-(distance - max_nucleation_distance) / 30.0).exp()
    };
    (residual_factor * geometry_factor).clamp(0.0, 1.0)
}
