//! Origin merging and external-origin intake (imported and manual).

use prithvi_models::{seconds_between, Arrival, DepthType, Exclusion, Origin, IMPORTED_ORIGIN_ID};
use tracing::{debug, info, warn};

use crate::engine::Locator;
use crate::score::origin_score;

/// Shared picks required before two origins are considered the same event.
const MIN_COMMON_PICKS: usize = 3;

/// Window for matching a manual origin against existing ones, seconds.
const MANUAL_MATCH_WINDOW: f64 = 20.0 * 60.0;

/// Same-station pick time agreement in manual-origin matching, seconds.
const SIMILAR_PICK_WINDOW: f64 = 20.0;

fn count_common_picks(a: &Origin, b: &Origin) -> usize {
    a.arrivals
        .iter()
        .filter(|arr| b.find_arrival(&arr.pick.id).is_some())
        .count()
}

impl Locator {
    // =========================================================================
    // MERGE
    // =========================================================================

    /// Merge two hypotheses of the same event into one origin; the
    /// higher-scoring origin provides the base solution and keeps its id.
    /// Returns None when the combined origin cannot be relocated.
    pub(crate) fn merge(&mut self, origin1: &Origin, origin2: &Origin) -> Option<Origin> {
        // The better origin becomes the base and donates the id.
        let (base, other) = if origin_score(origin2, &self.config) > origin_score(origin1, &self.config)
        {
            (origin2, origin1)
        } else {
            (origin1, origin2)
        };

        let id = base.id;
        let mut combined = base.clone();
        combined.id = id;

        debug!(" MRG1 {base}");
        debug!(" MRG2 {other}");

        for arr in &other.arrivals {
            if combined.find_arrival(&arr.pick.id).is_some() {
                continue;
            }
            // Same station and phase already present: keep the base's pick.
            let duplicate_stream = base.arrivals.iter().any(|existing| {
                existing.pick.station_key() == arr.pick.station_key()
                    && existing.phase == arr.phase
            });
            if duplicate_stream {
                continue;
            }

            let mut parked = arr.clone();
            parked.excluded = Exclusion::TemporarilyExcluded;
            combined.add(parked);
            debug!(" MRG {}->{} added {}", other.id, id, arr.pick.id);
        }

        self.relocator.use_fixed_depth(false);
        let relo = match self.relocator.relocate(&combined) {
            Ok(r) => r,
            Err(err) => {
                // The parked arrivals cannot influence the solution, so this
                // is rare; when it happens the caller keeps both origins.
                warn!("failed to relocate merged origin {id} (not critical): {err}");
                return None;
            }
        };
        combined.update_from(&relo);

        // Now decide which of the parked arrivals actually fit.
        for i in 0..combined.arrivals.len() {
            if combined.arrivals[i].excluded == Exclusion::TemporarilyExcluded {
                combined.arrivals[i].excluded = if self.residual_ok(&combined.arrivals[i], 1.3, 1.8)
                {
                    Exclusion::NotExcluded
                } else {
                    Exclusion::LargeResidual
                };
            }
        }

        self.trim_residuals(&mut combined);
        Some(combined)
    }

    /// Best existing origin sharing at least three picks with the given one.
    pub(crate) fn find_equivalent(&self, origin: &Origin) -> Option<usize> {
        let mut result: Option<usize> = None;
        for (index, other) in self.origins.iter().enumerate() {
            if count_common_picks(origin, other) < MIN_COMMON_PICKS {
                continue;
            }
            let better = result.map_or(true, |r| other.score > self.origins[r].score);
            if better {
                result = Some(index);
            }
        }
        result
    }

    /// Match a manual origin against the existing set by identical picks
    /// plus same-station picks within +-20 s, restricted to 20 minutes.
    fn find_matching_origin(&self, origin: &Origin) -> Option<usize> {
        let mut found: Option<usize> = None;
        let mut best_match = 0usize;

        for (index, existing) in self.origins.iter().enumerate() {
            // Teleseismic mislocations (PKP used as P) can shift the origin
            // time by many minutes, hence the generous window.
            if seconds_between(origin.time, existing.time).abs() > MANUAL_MATCH_WINDOW {
                continue;
            }

            let mut identical = 0usize;
            let mut similar = 0usize;
            for existing_arr in &existing.arrivals {
                let pick = &existing_arr.pick;
                if pick.station.is_none() {
                    warn!("pick {} without station info", pick.id);
                    continue;
                }
                for arr in &origin.arrivals {
                    if arr.pick.id == pick.id {
                        identical += 1;
                        break;
                    }
                    if arr.pick.station_key() == pick.station_key()
                        && seconds_between(arr.pick.time, pick.time).abs() <= SIMILAR_PICK_WINDOW
                    {
                        similar += 1;
                        break;
                    }
                }
            }

            if identical + similar > best_match {
                best_match = identical + similar;
                found = Some(index);
            }
        }

        found
    }

    // =========================================================================
    // EXTERNAL ORIGIN INTAKE
    // =========================================================================

    /// Feed an origin from outside: imported origins are stored for passive
    /// association; manual origins are folded into the best-matching
    /// hypothesis.
    pub fn feed_origin(&mut self, origin: Origin) -> bool {
        if origin.imported {
            let mut origin = origin;
            origin.id = IMPORTED_ORIGIN_ID;
            self.resolve_arrival_stations(&mut origin);
            self.store_origin(origin);
            return true;
        }

        // Anything not imported is expected to be manual.
        let manual = origin;
        if manual.arrivals.is_empty() {
            warn!("ignoring manual origin without arrivals");
            return false;
        }
        if let Some(author) = manual.author.as_deref() {
            if self.config.author_priority(author) == 0 {
                info!("ignoring manual origin from untrusted author {author}");
                return false;
            }
        }

        info!(
            "processing manual origin z={:.3} km dtype={:?}",
            manual.hypocenter.dep, manual.depth_type
        );

        let mut manual = manual;
        manual.manual = true;
        self.resolve_arrival_stations(&mut manual);

        let Some(index) = self.find_matching_origin(&manual) else {
            debug!("no matching origin found");
            return true;
        };
        let existing_id = self.origins[index].id;
        debug!(
            "found matching origin with id={existing_id} z={:.3} km",
            self.origins[index].hypocenter.dep
        );

        // The manual origin wins all attributes; the arrival lists are
        // unioned, deduplicated by pick identity or station+phase.
        let mut arrivals: Vec<Arrival> = manual
            .arrivals
            .iter()
            .filter(|arr| arr.pick.station.is_some())
            .cloned()
            .collect();
        for arr in &self.origins[index].arrivals {
            let have = arrivals.iter().any(|a| {
                a.pick.id == arr.pick.id
                    || (a.pick.station_key() == arr.pick.station_key() && a.phase == arr.phase)
            });
            if !have {
                arrivals.push(arr.clone());
            }
        }

        let mut updated = manual.clone();
        updated.id = existing_id;
        updated.arrivals = arrivals;
        updated.sort_arrivals();

        match manual.depth_type {
            DepthType::DepthManuallyFixed => {
                self.relocator.set_fixed_depth(manual.hypocenter.dep);
                self.relocator.use_fixed_depth(true);
            }
            _ => self.relocator.use_fixed_depth(false),
        }

        match self.relocator.relocate(&updated) {
            Ok(relo) => {
                updated.update_from(&relo);
                self.store_origin(updated);
                self.report();
                self.cleanup(None);
            }
            Err(err) => {
                warn!("relocation failed for manual origin (not critical): {err}");
            }
        }

        true
    }

    /// Resolve station references on arrival picks fed from outside.
    fn resolve_arrival_stations(&self, origin: &mut Origin) {
        for arr in &mut origin.arrivals {
            if arr.pick.station.is_some() {
                continue;
            }
            if let Some(station) = self.stations.get(&arr.pick.station_key()) {
                let mut pick = (*arr.pick).clone();
                pick.station = Some(station.clone());
                arr.pick = std::sync::Arc::new(pick);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use prithvi_models::{
        add_seconds, Arrival, Hypocenter, LocatorConfig, Origin, Pick, PickMode, Station,
    };

    use crate::earthmodel::StandardTable;
    use crate::engine::Locator;
    use crate::travel::{first_p, TravelTimeTable};

    fn synthetic_origin(suffix: &str, station_geometry: &[(f64, f64)]) -> Origin {
        let table = StandardTable::new();
        let time = Utc.with_ymd_and_hms(2024, 5, 5, 0, 0, 0).unwrap();
        let hypo = Hypocenter { lat: 0.0, lon: 0.0, dep: 10.0 };
        let mut origin = Origin::new(0.0, 0.0, 10.0, time);
        for (i, (lat, lon)) in station_geometry.iter().enumerate() {
            let station = Arc::new(Station::new("MG", &format!("{suffix}{i:02}"), *lat, *lon, 0.0));
            let tt = first_p(&table.compute_at(&hypo, &station).unwrap()).unwrap().time;
            let pick = Arc::new(Pick {
                id: format!("{suffix}-{i}"),
                time: add_seconds(time, tt),
                net: "MG".into(),
                sta: station.code.clone(),
                loc: String::new(),
                cha: "BHZ".into(),
                amplitude: 2000.0,
                period: 1.0,
                snr: 20.0,
                mode: PickMode::Automatic,
                xxl: false,
                normalized_amplitude: 1.0,
                station: Some(station),
            });
            let mut arr = Arrival::new(pick, "P", 0.0);
            arr.distance = (lat * lat + lon * lon).sqrt();
            origin.arrivals.push(arr);
        }
        origin.sort_arrivals();
        origin
    }

    #[test]
    fn merge_is_commutative_up_to_the_retained_id() {
        let mut engine = Locator::with_defaults(LocatorConfig::default()).unwrap();

        let mut bigger = synthetic_origin(
            "a",
            &[(4.0, 1.0), (-3.0, 4.0), (2.0, -5.0), (-5.0, -2.0), (6.0, 3.0), (-1.0, 6.0)],
        );
        bigger.id = 7;
        let mut smaller = synthetic_origin("b", &[(5.0, 5.0), (-4.0, 3.0), (3.0, -4.0), (1.0, 7.0)]);
        smaller.id = 9;

        let ab = engine.merge(&bigger, &smaller).expect("merge a,b");
        let ba = engine.merge(&smaller, &bigger).expect("merge b,a");

        // The bigger origin scores higher and donates the id both ways.
        assert_eq!(ab.id, 7);
        assert_eq!(ba.id, 7);

        let mut ab_picks: Vec<&str> = ab.arrivals.iter().map(|a| a.pick.id.as_str()).collect();
        let mut ba_picks: Vec<&str> = ba.arrivals.iter().map(|a| a.pick.id.as_str()).collect();
        ab_picks.sort();
        ba_picks.sort();
        assert_eq!(ab_picks, ba_picks);
        assert_eq!(ab.arrivals.len(), 10);
    }

    #[test]
    fn manual_origin_from_untrusted_author_is_ignored() {
        let mut config = LocatorConfig::default();
        config.use_manual_origins = true;
        config.authors = vec!["ops".into()];
        let mut engine = Locator::with_defaults(config).unwrap();

        let mut manual = synthetic_origin("u", &[(4.0, 1.0), (-3.0, 4.0), (2.0, -5.0)]);
        manual.author = Some("rogue".into());
        assert!(!engine.feed_origin(manual));
    }

    #[test]
    fn merge_skips_picks_already_referenced() {
        let mut engine = Locator::with_defaults(LocatorConfig::default()).unwrap();

        let base = synthetic_origin(
            "c",
            &[(4.0, 1.0), (-3.0, 4.0), (2.0, -5.0), (-5.0, -2.0), (6.0, 3.0)],
        );
        let mut overlapping = base.clone();
        overlapping.id = 99;
        overlapping.arrivals.truncate(4);

        let merged = engine.merge(&base, &overlapping).expect("merge");
        assert_eq!(merged.arrivals.len(), base.arrivals.len());
    }
}
