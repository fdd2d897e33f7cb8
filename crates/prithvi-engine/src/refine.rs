//! Origin refinement: the attachment contract, the residual gate, depth
//! policy, outlier control and score maximization.
//!
//! Everything here operates on *clones* of stored origins; the engine
//! commits results back through `store_origin`. A failed relocation never
//! aborts refinement; the origin simply keeps its previous solution.

use std::collections::HashSet;
use std::sync::Arc;

use prithvi_models::{
    delazi, is_p_phase, is_pkp_phase, seconds_between, Arrival, DepthType, Exclusion, Origin, Pick,
};
use tracing::{debug, info, warn};

use crate::engine::Locator;
use crate::score::{origin_score, update_score};
use crate::travel::{first_p, phase_entry};

/// Time after which a "P" at PKP distances must really be PKP, seconds.
const P_TO_PKP_TIME: f64 = 960.0;

impl Locator {
    // =========================================================================
    // RESIDUAL GATE
    // =========================================================================

    /// Acceptance interval `[-minF*R, +maxF*R]` around zero residual, with
    /// the PKP widening and the regional-phase tolerance for P.
    pub(crate) fn residual_ok(&self, arr: &Arrival, min_factor: f64, max_factor: f64) -> bool {
        let mut min_residual = -min_factor * self.config.max_residual_use;
        let mut max_residual = max_factor * self.config.max_residual_use;

        if self.config.aggressive_pkp && is_pkp_phase(&arr.phase) {
            min_residual *= 2.0;
            max_residual *= 2.0;
        }

        if is_p_phase(&arr.phase) {
            // Regional tolerance: allow Pg (sometimes even S) to be used as
            // Pn rather than losing the station entirely.
            let regional_weight = 1.0 + 0.7 * (-arr.distance * arr.distance / 50.0).exp();
            max_residual *= regional_weight;
        }

        (min_residual..=max_residual).contains(&arr.residual)
    }

    // =========================================================================
    // ATTACHMENT
    // =========================================================================

    /// Attach a pick to an origin under the full contract: residual gate,
    /// trial relocation, score/rms acceptance, demotion on failure.
    pub(crate) fn associate_pick(
        &mut self,
        origin: &mut Origin,
        pick: &Arc<Pick>,
        phase: &str,
    ) -> bool {
        let dt = seconds_between(pick.time, origin.time);
        if !(-10.0..=1300.0).contains(&dt) {
            return false;
        }
        // A PKP onset is always more than 1000 s after the origin time.
        if phase == "PKP" && dt < 1000.0 {
            return false;
        }
        if origin.find_arrival(&pick.id).is_some() {
            return false;
        }
        let Some(station) = pick.station.clone() else {
            return false;
        };

        let da = delazi(
            origin.hypocenter.lat,
            origin.hypocenter.lon,
            station.lat,
            station.lon,
        );
        let Ok(list) = self.ttt.compute_at(&origin.hypocenter, &station) else {
            return false;
        };
        let tt = match phase {
            "P" => first_p(&list),
            "PKP" => phase_entry(&list, "PKP"),
            other => {
                warn!("associate got {other} phase - ignored");
                return false;
            }
        };
        let Some(tt) = tt else {
            return false;
        };

        let mut arr = Arrival::new(pick.clone(), phase, dt - tt.time);
        arr.distance = da.delta;
        arr.azimuth = da.azimuth;
        if !self.residual_ok(&arr, 0.9, 1.3) {
            return false;
        }

        arr.excluded = if origin.imported {
            // passive association only
            Exclusion::UnusedPhase
        } else {
            Exclusion::NotExcluded
        };

        // PKP-range bookkeeping: the 105..125 degree band is ambiguous, and
        // PKP is only used at all when near stations are scarce.
        if arr.phase == "P" || arr.phase == "PKP" {
            let near_count = origin.defining_phase_count_in(0.0, 105.0);
            if arr.distance > 105.0 && near_count > self.config.min_sta_count_ignore_pkp {
                arr.excluded = Exclusion::UnusedPhase;
            } else if arr.distance > 105.0 && arr.distance < 125.0 {
                info!(
                    "origin {}: excluding pick {} because 105<delta<125",
                    origin.id, pick.id
                );
                arr.excluded = Exclusion::UnusedPhase;
            }
        }

        let mut copy = origin.clone();
        let original_score = origin_score(&copy, &self.config);
        let original_rms = copy.rms();
        copy.add(arr.clone());

        if origin.imported {
            origin.update_from(&copy);
            debug!(" ADD {origin} add {} {}", pick.id, arr.phase);
            return true;
        }

        let mut relocated: Option<Origin> = None;
        if arr.excluded != Exclusion::UnusedPhase {
            // Relocate and verify; otherwise the pick stays only loosely
            // associated.
            let mut fixed = false;
            if self.config.default_depth_stickiness > 0.9 {
                fixed = true;
                self.relocator.set_fixed_depth(self.config.default_depth);
            } else if origin.depth_type == DepthType::DepthManuallyFixed {
                fixed = true;
                self.relocator.set_fixed_depth(origin.hypocenter.dep);
            }
            self.relocator.use_fixed_depth(fixed);

            let mut relo = match self.relocator.relocate(&copy) {
                Ok(o) => Some(o),
                Err(_) if fixed => return false,
                Err(_) => {
                    self.relocator.set_fixed_depth(origin.hypocenter.dep);
                    self.relocator.use_fixed_depth(true);
                    match self.relocator.relocate(&copy) {
                        Ok(o) => Some(o),
                        Err(_) => return false,
                    }
                }
            };

            if let Some(r) = &relo {
                let score_after = origin_score(r, &self.config);
                let rms_after = r.rms();
                let rms_allowance = 3.0 / (10.0 + copy.arrivals.len() as f64).sqrt();
                if score_after < original_score || rms_after > original_rms + rms_allowance {
                    // No improvement; demote and relocate once with the
                    // depth pinned so residuals stay consistent.
                    match copy.find_arrival(&pick.id) {
                        Some(i) => copy.arrivals[i].excluded = Exclusion::LargeResidual,
                        None => {
                            tracing::error!("arrival vanished during association");
                            return false;
                        }
                    }
                    self.relocator.set_fixed_depth(origin.hypocenter.dep);
                    self.relocator.use_fixed_depth(true);
                    relo = match self.relocator.relocate(&copy) {
                        Ok(second) => {
                            if origin_score(&second, &self.config) < original_score {
                                None
                            } else {
                                Some(second)
                            }
                        }
                        Err(err) => {
                            tracing::error!("consistency relocation failed: {err}");
                            None
                        }
                    };
                }
            }

            if let Some(r) = &relo {
                let Some(i) = r.find_arrival(&pick.id) else {
                    tracing::error!("arrival vanished after relocation");
                    return false;
                };
                if r.arrivals[i].residual.abs() > self.config.max_residual_use {
                    // Keep the arrival, but not for location.
                    let mut kept = r.arrivals[i].clone();
                    kept.excluded = Exclusion::LargeResidual;
                    origin.add(kept);
                    return true;
                }
            }

            relocated = relo;
        }

        match relocated {
            Some(r) => origin.update_from(&r),
            None => {
                let mut fallback = origin.clone();
                let mut arr = arr;
                if arr.excluded != Exclusion::UnusedPhase {
                    arr.excluded = Exclusion::DeterioratesSolution;
                }
                fallback.add(arr);
                origin.update_from(&fallback);
            }
        }

        debug!(" ADD {origin} add {}", pick.id);
        true
    }

    // =========================================================================
    // THE REFINEMENT LOOP
    // =========================================================================

    /// Full refinement pass over a candidate origin. Returns whether the
    /// origin still meets the minimum phase count afterwards; callers gate
    /// on `passed_filter`, not on this.
    pub(crate) fn rework(&mut self, origin: &mut Origin) -> bool {
        if origin.defining_phase_count() < self.config.min_phase_count {
            return false;
        }

        let mut enforce_default_depth = false;
        let mut adopt_manual_depth = false;

        if self.config.adopt_manual_depth
            && matches!(
                origin.depth_type,
                DepthType::DepthManuallyFixed | DepthType::DepthPhases
            )
        {
            info!(
                "adopting depth of {:.1} km from manual origin",
                origin.hypocenter.dep
            );
            adopt_manual_depth = true;
        } else if self.config.default_depth_stickiness >= 0.9 {
            enforce_default_depth = true;
            info!("enforcing default depth due to stickiness");
        } else if self.set_the_right_depth(origin) {
            enforce_default_depth = true;
            info!("enforcing default depth due to epicenter-station geometry");
        }

        // Score enhancement is costly and pays off less as the solution
        // consolidates.
        if origin.defining_phase_count() < 30 {
            self.enhance_score(origin, 2);
        }

        if enforce_default_depth {
            self.relocator.set_fixed_depth(self.config.default_depth);
        }
        let keep_depth = adopt_manual_depth || enforce_default_depth;
        self.relocator.use_fixed_depth(keep_depth);

        self.trim_residuals(origin);

        // Distance trim: drop the farthest contributors while enough near
        // stations remain.
        while origin.defining_phase_count_in(0.0, self.config.max_sta_dist)
            > self.config.min_phase_count
        {
            let mut dmax = 0.0;
            let mut imax = None;
            for (i, arr) in origin.arrivals.iter().enumerate() {
                if !arr.is_defining() {
                    continue;
                }
                if arr.distance > dmax {
                    dmax = arr.distance;
                    imax = Some(i);
                }
            }
            let Some(imax) = imax else {
                break;
            };
            if origin.arrivals[imax].distance < self.config.max_sta_dist {
                break;
            }
            origin.arrivals[imax].excluded = Exclusion::StationDistance;

            match self.relocator.relocate(origin) {
                Ok(relo) => origin.update_from(&relo),
                Err(err) => {
                    warn!("relocation failed in distance trim for origin {}: {err}", origin.id);
                    break;
                }
            }
        }

        self.ensure_acceptable_rms(origin, keep_depth);
        self.add_more_picks(origin);

        self.trim_residuals(origin);
        self.remove_outliers(origin);
        self.exclude_distant_stations(origin);
        self.exclude_pkp(origin);

        if origin.hypocenter.dep != self.config.default_depth
            && origin.depth_type == DepthType::DepthDefault
        {
            origin.depth_type = DepthType::DepthFree;
        }

        origin.defining_phase_count() >= self.config.min_phase_count
    }

    // =========================================================================
    // DEPTH POLICY
    // =========================================================================

    /// Relocate a copy with depth pinned to the default and adopt it.
    pub(crate) fn set_default_depth(&mut self, origin: &mut Origin) -> bool {
        let test = origin.clone();
        self.relocator.set_fixed_depth(self.config.default_depth);
        self.relocator.use_fixed_depth(true);
        match self.relocator.relocate(&test) {
            Ok(relo) => {
                origin.update_from(&relo);
                origin.depth_type = DepthType::DepthDefault;
                true
            }
            Err(err) => {
                warn!("default-depth relocation failed: {err}");
                false
            }
        }
    }

    /// Decide between free depth and the default depth. Returns true when
    /// the default depth was adopted (and should then stay fixed).
    pub(crate) fn set_the_right_depth(&mut self, origin: &mut Origin) -> bool {
        if !self.config.try_default_depth {
            return false;
        }
        if origin.depth_type == DepthType::DepthPhases {
            return false;
        }

        if origin.depth_type == DepthType::DepthDefault {
            // Give free depth a chance, otherwise the origin sticks at the
            // default forever.
            let mut test = origin.clone();
            test.depth_type = DepthType::DepthFree;
            self.relocator.use_fixed_depth(false);
            let relo = match self.relocator.relocate(&test) {
                Ok(r) => r,
                Err(err) => {
                    warn!("free-depth test relocation failed: {err}");
                    return false;
                }
            };

            let radius =
                5.0 * relo.hypocenter.dep.max(self.config.default_depth) / 111.2;
            // Enough very near stations resolve the depth.
            if relo.defining_phase_count_in(0.0, radius) >= 2 {
                origin.update_from(&relo);
                return false;
            }
            return true;
        }

        if origin.defining_phase_count_in(0.0, 5.0 * origin.hypocenter.dep / 111.2) >= 2 {
            return false;
        }

        let mut test = origin.clone();
        if !self.set_default_depth(&mut test) {
            return false;
        }

        // Stickiness >= 0.9 forces the default unconditionally; below that
        // the default must compete with the free solution.
        if self.config.default_depth_stickiness < 0.9 {
            let rms_free = origin.rms();
            let rms_default = test.rms();
            if rms_default > 1.2 * rms_free && rms_default > self.config.good_rms {
                return false;
            }

            let score_free = origin_score(origin, &self.config);
            let score_default = origin_score(&test, &self.config);
            if score_default < 0.9 * score_free - 5.0 {
                return false;
            }

            if origin.hypocenter.dep != test.hypocenter.dep {
                info!(
                    "origin {}: changed depth from {:.1} to default of {:.1}  score: {:.1} -> {:.1}  rms: {:.1} -> {:.1}",
                    origin.id,
                    origin.hypocenter.dep,
                    test.hypocenter.dep,
                    score_free,
                    score_default,
                    rms_free,
                    rms_default
                );
            }
        }

        origin.update_from(&test);
        origin.depth_type = DepthType::DepthDefault;
        update_score(origin, &self.config);
        true
    }

    /// Can the data constrain the focal depth at all?
    pub(crate) fn depth_is_resolvable(&mut self, origin: &mut Origin) -> bool {
        if origin.depth_type == DepthType::DepthDefault
            && origin.hypocenter.dep != self.config.default_depth
        {
            origin.depth_type = DepthType::DepthFree;
        }

        let mut test = origin.clone();
        test.depth_type = DepthType::DepthFree;
        self.relocator.use_fixed_depth(false);
        if let Ok(relo) = self.relocator.relocate(&test) {
            if relo.error.sdepth > 0.0
                && (relo.error.sdepth < 15.0 * relo.error.stime
                    || relo.error.sdepth < 0.7 * relo.hypocenter.dep)
            {
                return true;
            }
        }

        let mut test = origin.clone();
        test.hypocenter.dep = self.config.default_depth;
        self.relocator.set_fixed_depth(self.config.default_depth);
        self.relocator.use_fixed_depth(true);
        let relo = match self.relocator.relocate(&test) {
            Ok(r) => r,
            // Unrelocatable at a fixed shallow depth: treat the original
            // depth as resolved.
            Err(_) => return true,
        };

        let score_original = origin_score(origin, &self.config);
        let score_default = origin_score(&relo, &self.config);
        if score_default < 0.8 * score_original {
            return true;
        }

        if origin.hypocenter.dep != relo.hypocenter.dep {
            info!(
                "origin {}: changed depth from {:.1} to default of {:.1}  score: {:.1} -> {:.1}",
                origin.id, origin.hypocenter.dep, relo.hypocenter.dep, score_original, score_default
            );
        }
        origin.update_from(&relo);
        origin.depth_type = DepthType::DepthDefault;
        update_score(origin, &self.config);
        false
    }

    // =========================================================================
    // RESIDUAL AND RMS CONTROL
    // =========================================================================

    /// While the RMS is too large and the origin is big enough, improve the
    /// score or drop the worst arrival.
    pub(crate) fn ensure_acceptable_rms(&mut self, origin: &mut Origin, keep_depth: bool) {
        const MIN_PHASES_FOR_RMS_TRIM: usize = 20;
        const ENHANCE_UP_TO: usize = 50;

        if origin.defining_phase_count() < MIN_PHASES_FOR_RMS_TRIM {
            return;
        }
        if origin.rms() <= self.config.max_rms {
            return;
        }

        debug!("rms control loop begin");
        while origin.rms() > self.config.max_rms {
            let defining = origin.defining_phase_count();
            if defining < MIN_PHASES_FOR_RMS_TRIM {
                break;
            }

            if defining < ENHANCE_UP_TO {
                // Score enhancement picks the most harmful arrival rather
                // than merely the largest residual.
                if !self.enhance_score(origin, 2) {
                    break;
                }
            } else {
                let Some(worst) = arrival_with_largest_residual(origin) else {
                    break;
                };
                origin.arrivals[worst].excluded = Exclusion::LargeResidual;
                self.relocator.use_fixed_depth(keep_depth);
                match self.relocator.relocate(origin) {
                    Ok(relo) => origin.update_from(&relo),
                    Err(err) => {
                        warn!("relocation failed in rms control for origin {}: {err}", origin.id);
                        break;
                    }
                }
            }
        }
        debug!("rms control loop end");
    }

    /// Exclude arrivals with large normalized residuals, then try to bring
    /// back the mildest of the previously excluded ones.
    pub(crate) fn trim_residuals(&mut self, origin: &mut Origin) -> bool {
        let threshold =
            0.8 * (self.config.good_rms + 0.5 * self.config.max_residual_use);
        let mut count = 0usize;

        while origin.defining_phase_count() >= self.config.min_phase_count {
            let mut worst: Option<(usize, f64)> = None;
            for (i, arr) in origin.arrivals.iter().enumerate() {
                if !arr.is_defining() {
                    continue;
                }
                let normalized = (arr.residual / threshold).abs();
                if worst.map_or(true, |(_, w)| normalized > w) {
                    worst = Some((i, normalized));
                }
            }
            let Some((index, normalized)) = worst else {
                break;
            };
            if normalized < 1.0 {
                break;
            }

            let mut copy = origin.clone();
            copy.arrivals[index].excluded = Exclusion::LargeResidual;
            let Ok(relo) = self.relocator.relocate(&copy) else {
                break;
            };
            origin.update_from(&relo);
            debug!(" TRM {origin} exc {}", origin.arrivals[index].pick.id);
            count += 1;
        }

        // Reverse sweep: re-include what now fits again.
        loop {
            let mut mildest: Option<(usize, f64)> = None;
            for (i, arr) in origin.arrivals.iter().enumerate() {
                if arr.excluded != Exclusion::LargeResidual {
                    continue;
                }
                let normalized = (arr.residual / threshold).abs();
                if mildest.map_or(true, |(_, m)| normalized < m) {
                    mildest = Some((i, normalized));
                }
            }
            let Some((index, normalized)) = mildest else {
                break;
            };
            if normalized > 1.0 {
                break;
            }

            let mut copy = origin.clone();
            copy.arrivals[index].excluded = Exclusion::NotExcluded;
            let Ok(relo) = self.relocator.relocate(&copy) else {
                break;
            };
            origin.update_from(&relo);
            debug!(" TRM {origin} inc {}", origin.arrivals[index].pick.id);
            count += 1;
        }

        count > 0
    }

    /// Erase excluded arrivals whose residuals are hopeless; their picks
    /// become available again.
    pub(crate) fn remove_outliers(&mut self, origin: &mut Origin) -> usize {
        let max_keep = self.config.max_residual_keep;
        let mut removed = 0usize;
        let associated = &mut self.associated;
        origin.arrivals.retain(|arr| {
            let drop = arr.excluded != Exclusion::NotExcluded && arr.residual.abs() > max_keep;
            if drop {
                associated.remove(&arr.pick.id);
                removed += 1;
            }
            !drop
        });
        removed
    }

    /// Drop stations that sit far beyond the main station cluster: more
    /// than 4x the upper-decile distance.
    pub(crate) fn exclude_distant_stations(&mut self, origin: &mut Origin) -> bool {
        const GAP_FACTOR: f64 = 4.0;

        let mut distances: Vec<f64> = origin
            .arrivals
            .iter()
            .filter(|arr| {
                // Previously distance-excluded arrivals are reconsidered;
                // the cluster may have grown outward since.
                (arr.is_defining() || arr.excluded == Exclusion::StationDistance)
                    && arr.distance <= 110.0
            })
            .map(|arr| arr.distance)
            .collect();
        if distances.len() < 4 {
            return false;
        }
        distances.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let n = distances.len();
        let nx = ((0.1 * n as f64) as usize).max(2);
        let mut max_distance = distances[n - nx];
        for &d in &distances[n - nx + 1..] {
            if d > GAP_FACTOR * max_distance {
                break;
            }
            max_distance = d;
        }

        let mut excluded = 0usize;
        for arr in &mut origin.arrivals {
            if !arr.is_defining() {
                continue;
            }
            if arr.distance > max_distance {
                arr.excluded = Exclusion::StationDistance;
                excluded += 1;
                debug!("origin {} exc distant {}", origin.id, arr.pick.id);
            }
        }

        if excluded > 0 {
            if let Ok(relo) = self.relocator.relocate(origin) {
                origin.update_from(&relo);
                return true;
            }
        }
        false
    }

    /// Beyond 105 degrees a late "P" is really PKP; take such arrivals out
    /// of the solution when near stations carry it.
    pub(crate) fn exclude_pkp(&mut self, origin: &mut Origin) -> bool {
        if origin.defining_phase_count_in(0.0, 105.0) < self.config.min_sta_count_ignore_pkp {
            return false;
        }

        let mut relocate = false;
        for arr in &mut origin.arrivals {
            if !arr.is_defining() || arr.distance < 105.0 {
                continue;
            }
            if arr.phase == "P" || arr.phase == "PKP" {
                let dt = seconds_between(arr.pick.time, origin.time);
                if dt > P_TO_PKP_TIME {
                    arr.excluded = Exclusion::UnusedPhase;
                    relocate = true;
                }
            }
        }
        if !relocate {
            return false;
        }

        match self.relocator.relocate(origin) {
            Ok(relo) => {
                origin.update_from(&relo);
                true
            }
            Err(err) => {
                warn!("relocation failed in PKP exclusion for origin {}: {err}", origin.id);
                false
            }
        }
    }

    /// Distance/time based P <-> PKP relabeling.
    pub(crate) fn rename_p_pkp(origin: &mut Origin) {
        for arr in &mut origin.arrivals {
            let dt = seconds_between(arr.pick.time, origin.time);
            if arr.distance > 105.0 && dt > 1000.0 && arr.phase == "P" {
                arr.phase = "PKP".into();
            }
            if arr.distance < 125.0 && dt < 1000.0 && arr.phase == "PKP" {
                arr.phase = "P".into();
            }
        }
    }

    // =========================================================================
    // SCORE ENHANCEMENT
    // =========================================================================

    /// Try to raise the score: the XXL fast path for very early origins,
    /// then trial exclusions of single arrivals.
    pub(crate) fn enhance_score(&mut self, origin: &mut Origin, max_loops: usize) -> bool {
        let mut count = 0usize;

        // Early origins dominated by XXL picks: drop everything before the
        // earliest XXL onset and restart near that station.
        if origin.defining_phase_count() < self.config.min_phase_count {
            let mut xxl_count = 0usize;
            let mut earliest_xxl: Option<Arc<Pick>> = None;
            for arr in &origin.arrivals {
                if arr.pick.xxl {
                    xxl_count += 1;
                    let earlier = earliest_xxl
                        .as_ref()
                        .map_or(true, |e| arr.pick.time < e.time);
                    if earlier {
                        earliest_xxl = Some(arr.pick.clone());
                    }
                }
            }

            if xxl_count >= self.config.xxl_min_phase_count {
                if let Some(earliest) = earliest_xxl {
                    let mut copy = origin.clone();
                    let mut excluded = 0usize;
                    for (i, arr) in origin.arrivals.iter().enumerate() {
                        if !arr.pick.xxl && arr.pick.time < earliest.time {
                            copy.arrivals[i].excluded = Exclusion::ManuallyExcluded;
                            excluded += 1;
                        }
                    }

                    if excluded > 0 {
                        self.relocator
                            .use_fixed_depth(self.config.default_depth_stickiness > 0.9);
                        copy.depth_type = DepthType::DepthFree;
                        if let Some(station) = earliest.station.as_ref() {
                            copy.hypocenter.lat = station.lat;
                            copy.hypocenter.lon = station.lon;
                        }
                        if let Ok(relo) = self.relocator.relocate(&copy) {
                            origin.update_from(&relo);
                            info!(" XXL {origin}");
                            return true;
                        }
                    }
                }
            }
        }

        for _ in 0..max_loops {
            let current_score = origin_score(origin, &self.config);
            let mut best_score = current_score;
            let mut best_excluded = None;

            for i in 0..origin.arrivals.len() {
                if !origin.arrivals[i].is_defining() {
                    continue;
                }
                let mut copy = origin.clone();
                copy.arrivals[i].excluded = Exclusion::ManuallyExcluded;

                self.relocator.use_fixed_depth(false);
                let relo = match self.relocator.relocate(&copy) {
                    Ok(r) => r,
                    Err(_) => {
                        // fixed depth sometimes helps on the edge of
                        // convergence
                        self.relocator.use_fixed_depth(true);
                        match self.relocator.relocate(&copy) {
                            Ok(r) => r,
                            Err(_) => continue,
                        }
                    }
                };

                let score = origin_score(&relo, &self.config);
                if score > best_score {
                    best_score = score;
                    best_excluded = Some(i);
                }
            }

            let Some(best_index) = best_excluded else {
                break;
            };
            // Tiny gains are not worth the exclude/include churn.
            if best_score < current_score + 0.2 {
                break;
            }

            let mut copy = origin.clone();
            copy.arrivals[best_index].excluded = Exclusion::LargeResidual;
            self.relocator.use_fixed_depth(false);
            let relo = match self.relocator.relocate(&copy) {
                Ok(r) => r,
                Err(_) => {
                    self.relocator.use_fixed_depth(true);
                    match self.relocator.relocate(&copy) {
                        Ok(r) => r,
                        Err(_) => continue,
                    }
                }
            };

            if best_score > 5.0 {
                debug!(" ENH {relo} exc {}", copy.arrivals[best_index].pick.id);
            }
            origin.update_from(&relo);
            count += 1;
        }

        count > 0
    }

    // =========================================================================
    // PICK SWEEP
    // =========================================================================

    /// Sweep the pool for stations that do not yet contribute a P/PKP to
    /// this origin and try to attach their picks.
    pub(crate) fn add_more_picks(&mut self, origin: &mut Origin) -> bool {
        let mut have: HashSet<String> = HashSet::new();
        for arr in &origin.arrivals {
            if !arr.is_defining() {
                continue;
            }
            if arr.pick.station.is_none() {
                continue;
            }
            have.insert(format!("{}:{}", arr.pick.station_key(), arr.phase));
        }

        let pool: Vec<Arc<Pick>> = self.pick_pool.values().cloned().collect();
        let mut picks_added = 0usize;
        for pick in pool {
            if pick.station.is_none() {
                continue;
            }
            if !self.config.use_manual_picks && pick.is_manual() {
                continue;
            }
            if pick.is_ignored() {
                continue;
            }
            let prefix = pick.station_key();
            if have.contains(&format!("{prefix}:P")) || have.contains(&format!("{prefix}:PKP")) {
                continue;
            }
            if pick.amplitude <= 0.0 || pick.snr <= 0.0 {
                continue;
            }
            if self.too_low_snr(&pick) {
                continue;
            }
            if self.blacklist.contains(&pick.id) {
                continue;
            }
            if !self.associate_pick(origin, &pick, "P")
                && !self.associate_pick(origin, &pick, "PKP")
            {
                continue;
            }
            picks_added += 1;
        }

        if picks_added == 0 {
            return false;
        }
        Self::rename_p_pkp(origin);
        true
    }
}

/// Index of the defining arrival with the largest absolute residual.
fn arrival_with_largest_residual(origin: &Origin) -> Option<usize> {
    let mut result = None;
    let mut res_max = 0.0;
    for (i, arr) in origin.arrivals.iter().enumerate() {
        if !arr.is_defining() {
            continue;
        }
        let abs = arr.residual.abs();
        if abs > res_max {
            res_max = abs;
            result = Some(i);
        }
    }
    result
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use prithvi_models::{
        add_seconds, Arrival, LocatorConfig, Origin, Pick, PickMode,
    };

    use crate::engine::Locator;

    fn arrival(phase: &str, residual: f64, distance: f64, dt: f64) -> Arrival {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let pick = Arc::new(Pick {
            id: format!("{phase}-{distance}"),
            time: add_seconds(t0, dt),
            net: "RF".into(),
            sta: "STA".into(),
            loc: String::new(),
            cha: "BHZ".into(),
            amplitude: 100.0,
            period: 1.0,
            snr: 10.0,
            mode: PickMode::Automatic,
            xxl: false,
            normalized_amplitude: 0.05,
            station: None,
        });
        let mut arr = Arrival::new(pick, phase, residual);
        arr.distance = distance;
        arr
    }

    #[test]
    fn residual_gate_symmetric_for_equal_factors() {
        let engine = Locator::with_defaults(LocatorConfig::default()).unwrap();
        // "S" carries neither the PKP widening nor the regional P bonus.
        for r in [0.5, 3.0, 8.5, 9.0, 9.2] {
            let plus = engine.residual_ok(&arrival("S", r, 50.0, 500.0), 1.3, 1.3);
            let minus = engine.residual_ok(&arrival("S", -r, 50.0, 500.0), 1.3, 1.3);
            assert_eq!(plus, minus, "asymmetric at residual {r}");
        }
    }

    #[test]
    fn residual_gate_widens_for_regional_p() {
        let engine = Locator::with_defaults(LocatorConfig::default()).unwrap();
        // max = 1.3 * 7 = 9.1 for a distant P, nearly 1.7x that at the
        // closest distances.
        assert!(!engine.residual_ok(&arrival("P", 12.0, 60.0, 500.0), 0.9, 1.3));
        assert!(engine.residual_ok(&arrival("P", 12.0, 1.0, 20.0), 0.9, 1.3));
    }

    #[test]
    fn residual_gate_doubles_for_pkp_when_aggressive() {
        let mut config = LocatorConfig::default();
        config.aggressive_pkp = true;
        let engine = Locator::with_defaults(config).unwrap();
        assert!(engine.residual_ok(&arrival("PKP", 15.0, 130.0, 1100.0), 0.9, 1.3));

        let mut config = LocatorConfig::default();
        config.aggressive_pkp = false;
        let engine = Locator::with_defaults(config).unwrap();
        assert!(!engine.residual_ok(&arrival("PKP", 15.0, 130.0, 1100.0), 0.9, 1.3));
    }

    #[test]
    fn rename_p_pkp_by_distance_and_time() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut origin = Origin::new(0.0, 0.0, 10.0, t0);
        origin.arrivals.push(arrival("P", 0.0, 120.0, 1150.0));
        origin.arrivals.push(arrival("PKP", 0.0, 60.0, 600.0));
        origin.arrivals.push(arrival("P", 0.0, 40.0, 460.0));

        Locator::rename_p_pkp(&mut origin);

        assert_eq!(origin.arrivals[0].phase, "PKP");
        assert_eq!(origin.arrivals[1].phase, "P");
        assert_eq!(origin.arrivals[2].phase, "P");
    }
}
