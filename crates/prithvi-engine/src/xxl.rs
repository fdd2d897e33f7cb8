//! The XXL short-circuit: a rapid preliminary origin from a handful of
//! very-large-amplitude picks, long before a regular nucleation would have
//! enough phases.

use std::sync::Arc;

use prithvi_models::{
    add_seconds, delazi, seconds_between, station_distance, Arrival, DepthType, Origin, Pick,
};
use tracing::{debug, info};

use crate::engine::Locator;

impl Locator {
    /// A pick arriving shortly after an XXL pick on the same station is
    /// coda, not a new onset.
    pub(crate) fn follows_bigger_pick(&self, new_pick: &Pick) -> bool {
        for pick in self.pick_pool.values() {
            if pick.id == new_pick.id {
                continue;
            }
            if !pick.xxl {
                continue;
            }
            if pick.station_key() != new_pick.station_key() {
                continue;
            }
            let dt = seconds_between(new_pick.time, pick.time);
            if dt < 0.0 || dt > self.config.xxl_dead_time {
                continue;
            }
            info!(
                "ignoring pick {} (following XXL pick {})",
                new_pick.id, pick.id
            );
            return true;
        }
        false
    }

    /// Try to build a preliminary origin around an XXL pick. Requires
    /// `xxl_min_phase_count` XXL picks on distinct stations inside a tight
    /// space-time window; seeds at the earliest station and sweeps trial
    /// depths.
    pub(crate) fn xxl_preliminary_origin(&mut self, new_pick: &Arc<Pick>) -> Option<Origin> {
        if !new_pick.xxl {
            return None;
        }

        let new_station = new_pick.station.clone()?;
        let mut xxl_picks: Vec<Arc<Pick>> = vec![new_pick.clone()];
        let mut earliest = new_pick.clone();

        let time_window = 10.0 + 13.7 * self.config.xxl_max_sta_dist;
        for old in self.pick_pool.values() {
            if !old.xxl || old.is_ignored() {
                continue;
            }
            if old.id == new_pick.id {
                continue;
            }
            let Some(old_station) = old.station.as_ref() else {
                continue;
            };
            if old_station.key() == new_station.key() {
                continue;
            }

            let dt = seconds_between(new_pick.time, old.time);
            if dt.abs() > time_window {
                continue;
            }
            if station_distance(old_station, &new_station) > self.config.xxl_max_sta_dist {
                continue;
            }
            if !self.config.use_manual_picks && old.is_manual() && !self.config.use_manual_origins
            {
                continue;
            }
            // one pick per station
            let duplicate = xxl_picks
                .iter()
                .any(|p| p.station_key() == old.station_key());
            if duplicate {
                continue;
            }

            if old.time < earliest.time {
                earliest = old.clone();
            }
            xxl_picks.push(old.clone());
        }

        debug!("number of XXL picks={}", xxl_picks.len());
        if xxl_picks.len() < self.config.xxl_min_phase_count {
            return None;
        }

        let earliest_station = earliest.station.clone()?;
        let seed_lat = earliest_station.lat + 0.03;
        let seed_lon = earliest_station.lon + 0.03;
        let seed_time = add_seconds(earliest.time, -0.05);

        // Trial depths are multiples of the default depth; a sticky default
        // needs no alternatives.
        let mut trial_depths = Vec::new();
        let mut dep = 0.0;
        let mut i = 0;
        while dep <= self.config.xxl_max_depth {
            dep = self.config.default_depth * (1 + i) as f64;
            trial_depths.push(dep);
            i += 1;
            if self.config.default_depth_stickiness > 0.9 {
                break;
            }
        }

        for dep in trial_depths {
            let mut origin = Origin::new(seed_lat, seed_lon, dep, seed_time);
            for pick in &xxl_picks {
                let Some(station) = pick.station.as_ref() else {
                    continue;
                };
                let da = delazi(seed_lat, seed_lon, station.lat, station.lon);
                let mut arr = Arrival::new(pick.clone(), "P", 0.0);
                arr.distance = da.delta;
                arr.azimuth = da.azimuth;
                origin.arrivals.push(arr);
            }

            self.relocator.set_fixed_depth(dep);
            self.relocator.use_fixed_depth(true);
            debug!("trying to relocate possible XXL origin; trial depth {dep:.1} km");
            let relo = match self.relocator.relocate(&origin) {
                Ok(r) => r,
                Err(_) => {
                    debug!("failed to relocate possible XXL origin");
                    continue;
                }
            };
            debug!(" XXL {relo}");

            let too_far = relo
                .arrivals
                .iter()
                .any(|arr| arr.distance > self.config.xxl_max_sta_dist);
            if too_far || relo.rms() > self.config.max_rms {
                continue;
            }

            info!("relocated XXL alert");
            origin.update_from(&relo);
            origin.preliminary = true;
            origin.depth_type = if self.config.default_depth_stickiness > 0.9 {
                DepthType::DepthDefault
            } else {
                DepthType::DepthManuallyFixed
            };
            info!("{origin}");

            if self.config.default_depth_stickiness < 0.9 && self.depth_is_resolvable(&mut origin)
            {
                self.relocator.use_fixed_depth(false);
                if let Ok(free) = self.relocator.relocate(&origin) {
                    origin.update_from(&free);
                }
            }

            origin.id = self.new_origin_id();
            origin.sort_arrivals();
            return Some(origin);
        }

        None
    }
}
