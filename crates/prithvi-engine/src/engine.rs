//! The Locator: pick intake, association dispatch, origin storage,
//! publication scheduling and state cleanup.
//!
//! Single-threaded and cooperatively driven: one `feed_pick`/`feed_origin`
//! call runs to completion, so the origin set evolves deterministically for
//! a given input order. In playback mode the logical clock is the largest
//! pick time seen so far; in live mode it is wall UTC.
//!
//! Refinement, merging, the fake-origin test and the XXL short-circuit are
//! implemented in sibling modules as further `impl Locator` blocks.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use prithvi_models::{
    add_seconds, seconds_between, LocatorConfig, Origin, OriginId, Pick, PickMode, Station,
    StationConfig,
};

use crate::assoc::Associator;
use crate::earthmodel::StandardTable;
use crate::error::EngineError;
use crate::locate::{LeastSquaresRelocator, Relocator};
use crate::nucleate::GridNucleator;
use crate::picklog::PickLog;
use crate::score::{origin_score, update_score};
use crate::travel::TravelTimeTable;

/// Reference amplitude for normalization when XXL mode is off.
const DEFAULT_NORMALIZATION_AMPLITUDE: f64 = 2000.0;

/// Extra slack added to `max_age` before eviction, seconds.
const CLEANUP_MARGIN: f64 = 1800.0;

/// Suppression window after a publication with no real improvement, seconds.
const NO_IMPROVEMENT_WINDOW: f64 = 150.0;

/// Callback type delivering publishable origins downstream.
pub type ReportSink = Box<dyn FnMut(&Origin)>;

/// The seismic event nucleation, association and refinement engine.
pub struct Locator {
    pub(crate) config: LocatorConfig,
    pub(crate) stations: HashMap<String, Arc<Station>>,
    station_config: StationConfig,
    /// Deduplicated pick store; BTreeMap for deterministic iteration.
    pub(crate) pick_pool: BTreeMap<String, Arc<Pick>>,
    /// Ids of picks currently referenced by any stored origin.
    pub(crate) associated: HashSet<String>,
    pub(crate) blacklist: HashSet<String>,
    missing_stations: HashSet<String>,
    pub(crate) origins: Vec<Origin>,
    new_origins: Vec<OriginId>,
    outgoing: BTreeSet<OriginId>,
    next_due: HashMap<OriginId, DateTime<Utc>>,
    last_sent: HashMap<OriginId, Origin>,
    next_origin_id: OriginId,
    /// Logical clock (playback mode).
    now: DateTime<Utc>,
    next_cleanup: DateTime<Utc>,
    pub(crate) ttt: Arc<dyn TravelTimeTable>,
    pub(crate) relocator: Box<dyn Relocator>,
    nucleator: GridNucleator,
    associator: Associator,
    pick_log: PickLog,
    report_sink: ReportSink,
}

impl Locator {
    /// Engine with injected travel-time and relocation capabilities.
    pub fn new(
        config: LocatorConfig,
        ttt: Arc<dyn TravelTimeTable>,
        mut relocator: Box<dyn Relocator>,
    ) -> Result<Self, EngineError> {
        relocator.set_minimum_depth(config.minimum_depth);
        relocator.set_profile(&config.locator_profile);

        let mut station_config = StationConfig::default();
        if !config.sta_conf_file.is_empty() {
            debug!("reading station config from file {}", config.sta_conf_file);
            station_config.read(&config.sta_conf_file)?;
        }

        let mut nucleator = GridNucleator::new(ttt.clone());
        nucleator.max_radius_factor = config.max_radius_factor;

        let mut pick_log = PickLog::default();
        pick_log.set_prefix(&config.pick_log_file_prefix);

        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        Ok(Self {
            associator: Associator::new(ttt.clone()),
            config,
            stations: HashMap::new(),
            station_config,
            pick_pool: BTreeMap::new(),
            associated: HashSet::new(),
            blacklist: HashSet::new(),
            missing_stations: HashSet::new(),
            origins: Vec::new(),
            new_origins: Vec::new(),
            outgoing: BTreeSet::new(),
            next_due: HashMap::new(),
            last_sent: HashMap::new(),
            next_origin_id: 0,
            now: epoch,
            next_cleanup: epoch,
            ttt,
            relocator,
            nucleator,
            pick_log,
            report_sink: Box::new(|origin| info!(" OUT {origin}")),
        })
    }

    /// Engine with the bundled travel-time table and least-squares locator.
    pub fn with_defaults(config: LocatorConfig) -> Result<Self, EngineError> {
        let ttt: Arc<dyn TravelTimeTable> = Arc::new(StandardTable::new());
        let relocator = Box::new(LeastSquaresRelocator::new(ttt.clone()));
        Self::new(config, ttt, relocator)
    }

    /// Install the downstream delivery callback.
    pub fn set_report_sink(&mut self, sink: ReportSink) {
        self.report_sink = sink;
    }

    /// Register a station; the station configuration file decides usage and
    /// nucleation range. Returns false when the station is already known.
    pub fn set_station(&mut self, mut station: Station) -> bool {
        let key = station.key();
        if self.stations.contains_key(&key) {
            return false;
        }
        let entry = self.station_config.get(&station.net, &station.code);
        station.used = entry.usage > 0;
        station.max_nucleation_distance = entry.max_nuc_dist;
        station.max_location_distance = 180.0;
        debug!("initialized station {key}");
        self.stations.insert(key, Arc::new(station));
        true
    }

    /// Replace the nucleation grid.
    pub fn set_grid_file(&mut self, path: &str) -> Result<usize, EngineError> {
        let n = self.nucleator.set_grid_file(path)?;
        self.nucleator.max_radius_factor = self.config.max_radius_factor;
        Ok(n)
    }

    /// Select the relocator's velocity-model profile.
    pub fn set_locator_profile(&mut self, profile: &str) {
        self.relocator.set_profile(profile);
    }

    /// Reset the pick log file prefix.
    pub fn set_pick_log_prefix(&mut self, prefix: &str) {
        self.pick_log.set_prefix(prefix);
    }

    /// Replace the configuration and push the derived settings down to the
    /// collaborators.
    pub fn set_config(&mut self, config: LocatorConfig) {
        self.relocator.set_minimum_depth(config.minimum_depth);
        self.relocator.set_profile(&config.locator_profile);
        self.nucleator.max_radius_factor = config.max_radius_factor;
        self.pick_log.set_prefix(&config.pick_log_file_prefix);
        self.config = config;
    }

    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    /// Current hypotheses (primarily for diagnostics and tests).
    pub fn origins(&self) -> &[Origin] {
        &self.origins
    }

    /// Stored pick by id.
    pub fn pick(&self, id: &str) -> Option<&Arc<Pick>> {
        self.pick_pool.get(id)
    }

    pub fn pick_count(&self) -> usize {
        self.pick_pool.len()
    }

    /// Logical clock: pick-stream time in playback mode, wall UTC otherwise.
    pub fn now(&self) -> DateTime<Utc> {
        if self.config.playback {
            self.now
        } else {
            Utc::now()
        }
    }

    /// One-liner per live origin, for state dumps.
    pub fn dump_state(&self) {
        for origin in &self.origins {
            info!("{origin}");
        }
    }

    // =========================================================================
    // PICK INTAKE
    // =========================================================================

    /// Feed one pick. Returns true when the pick changed the origin set.
    pub fn feed_pick(&mut self, pick: Pick) -> bool {
        self.new_origins.clear();
        let is_new = !self.pick_pool.contains_key(&pick.id);

        let Some(stored) = self.store_pick(pick) else {
            return false;
        };

        // Amplitudes are required for automatic picks. Until the amplitude
        // arrives the pick just sits in the pool; the upstream re-feeds it
        // on amplitude update.
        if stored.is_automatic() && !stored.has_amplitude() {
            if is_new {
                debug!("pick {} waiting for amplitude", stored.id);
            }
            return false;
        }

        let status = self.process_pick(stored);
        self.cleanup(None);
        if !status {
            return false;
        }
        self.report();
        true
    }

    /// Resolve, validate age, advance the playback clock and pool the pick.
    fn store_pick(&mut self, mut pick: Pick) -> Option<Arc<Pick>> {
        let station = match pick.station.clone() {
            Some(station) => station,
            None => {
                let key = pick.station_key();
                let Some(station) = self.stations.get(&key).cloned() else {
                    // complain once per station
                    if self.missing_stations.insert(key.clone()) {
                        tracing::error!("missing station {key}");
                    }
                    debug!("missing station info for pick {}", pick.id);
                    return None;
                };
                pick.station = Some(station.clone());
                station
            }
        };

        if pick.is_automatic() && !station.used {
            debug!("ignoring pick {} from unused station", pick.id);
            return None;
        }

        if seconds_between(self.now(), pick.time) > self.config.max_age {
            debug!("ignoring old pick {}", pick.id);
            return None;
        }

        if self.config.playback && pick.time > self.now {
            self.now = pick.time;
        }

        let arc = Arc::new(pick);
        self.pick_pool.insert(arc.id.clone(), arc.clone());
        Some(arc)
    }

    /// Clone-modify-reinsert a pooled pick. Only legal while no arrival
    /// references it yet, i.e. during intake of that very pick.
    fn update_pooled(&mut self, pick: &Arc<Pick>, f: impl FnOnce(&mut Pick)) -> Arc<Pick> {
        let mut updated = (**pick).clone();
        f(&mut updated);
        let arc = Arc::new(updated);
        self.pick_pool.insert(arc.id.clone(), arc.clone());
        arc
    }

    /// The intake gauntlet: validity, gates, logging, then association,
    /// nucleation and the XXL short-circuit.
    fn process_pick(&mut self, pick: Arc<Pick>) -> bool {
        if !pick.is_valid() {
            if pick.is_automatic() && pick.snr > prithvi_models::MAX_PLAUSIBLE_SNR {
                warn!("pick {} with snr of {:.3e} was rejected", pick.id, pick.snr);
            }
            debug!("invalid pick {}", pick.id);
            return false;
        }

        if pick.is_automatic() && self.too_low_snr(&pick) {
            return false;
        }

        // XXL flag and amplitude normalization are intake side-effects on
        // the stored pick.
        let config = &self.config;
        let xxl = config.xxl_enabled
            && pick.amplitude >= config.xxl_min_amplitude
            && pick.snr > config.xxl_min_snr;
        let normalization = if config.xxl_enabled {
            config.xxl_min_amplitude
        } else {
            DEFAULT_NORMALIZATION_AMPLITUDE
        };
        let pick = self.update_pooled(&pick, |p| {
            p.xxl = xxl;
            p.normalized_amplitude = p.amplitude / normalization;
        });

        if pick.is_automatic() && self.too_many_recent_picks(&pick) {
            self.update_pooled(&pick, |p| p.mode = PickMode::IgnoredAutomatic);
            return false;
        }

        self.pick_log.log(&pick, Utc::now());

        if self.blacklist.contains(&pick.id) {
            info!("pick {} blacklisted, ignored", pick.id);
            return false;
        }

        if pick.is_manual() {
            if !self.config.use_manual_picks {
                if self.config.use_manual_origins {
                    // Keep it stored for association through manual origins,
                    // but do not feed it to the associator/nucleator.
                    return true;
                }
                info!("blacklisting manual pick {}", pick.id);
                self.blacklist.insert(pick.id.clone());
                return false;
            }
        }

        info!("process pick {}{}", pick.id, if pick.xxl { " XXL" } else { "" });

        if self.follows_bigger_pick(&pick) {
            return false;
        }

        if self.perhaps_pdiff(&pick) {
            return false;
        }

        // Attach to an existing hypothesis if possible.
        let mut associated = None;
        if let Some(origin) = self.try_associate(&pick) {
            if origin.imported {
                self.store_origin(origin);
                return true;
            }
            let mut origin = origin;
            self.rework(&mut origin);
            if self.passed_filter(&mut origin) {
                self.store_origin(origin.clone());
                associated = Some(origin);
            }
        }

        if let Some(origin) = associated {
            // An associated pick never spawns a separate hypothesis, but
            // below the bypass score it still warms the nucleator's cell
            // state for later events.
            if origin.score < self.config.min_score_bypass_nucleator {
                self.nucleator.feed(&pick);
                self.nucleator.new_origins();
            }
            return true;
        }

        // Otherwise try to nucleate a fresh hypothesis.
        if let Some(mut origin) = self.try_nucleate(&pick) {
            self.rework(&mut origin);
            if self.passed_filter(&mut origin) {
                self.store_origin(origin);
                return true;
            }
        }

        // Last resort: the XXL short-circuit.
        if self.config.xxl_enabled {
            if let Some(xxl_origin) = self.xxl_preliminary_origin(&pick) {
                let mut origin = match self.find_equivalent(&xxl_origin) {
                    Some(index) => {
                        let mut equivalent = self.origins[index].clone();
                        equivalent.update_from(&xxl_origin);
                        equivalent
                    }
                    None => xxl_origin,
                };
                self.rework(&mut origin);
                if self.passed_filter(&mut origin) {
                    self.store_origin(origin);
                    return true;
                }
            }
        }

        false
    }

    pub(crate) fn too_low_snr(&self, pick: &Pick) -> bool {
        pick.is_automatic() && pick.snr < self.config.min_pick_snr
    }

    /// Recent-pick-rate gate: a burst of unassociated picks on one station
    /// raises a dynamic SNR threshold that the new pick must beat.
    fn too_many_recent_picks(&self, new_pick: &Pick) -> bool {
        if !new_pick.is_automatic() {
            return false;
        }
        let time_span = self.config.dynamic_pick_threshold_interval;
        if time_span <= 0.0 {
            return false;
        }
        if new_pick.snr <= 0.0 {
            debug!("pick {} without snr, suppressed", new_pick.id);
            return true;
        }

        let mut weighted_sum = 0.0;
        let mut xxl_threshold = 0.0f64;
        let new_key = new_pick.station_key();

        for old in self.pick_pool.values() {
            if old.station_key() != new_key {
                continue;
            }
            if !self.config.use_manual_picks && old.is_manual() && !self.config.use_manual_origins
            {
                continue;
            }
            let dt = seconds_between(new_pick.time, old.time);
            if dt < 0.0 || dt > time_span {
                continue;
            }
            if self.associated.contains(&old.id) {
                continue;
            }

            let snr = old.snr.clamp(3.0, 15.0);
            weighted_sum += snr * (1.0 - dt / time_span);

            if self.config.xxl_dead_time > 0.0 {
                xxl_threshold = xxl_threshold.max(snr * (1.0 - dt / self.config.xxl_dead_time));
            }
        }

        weighted_sum *= 2.0 * 0.07;
        if new_pick.snr < weighted_sum {
            debug!(
                "pick rate gate: {} {:.2} < {:.2}",
                new_pick.id, new_pick.snr, weighted_sum
            );
            return true;
        }
        if new_pick.snr < xxl_threshold {
            debug!(
                "pick rate gate (xxl): {} {:.2} < {:.2}",
                new_pick.id, new_pick.snr, xxl_threshold
            );
            return true;
        }
        false
    }

    // =========================================================================
    // ASSOCIATION AND NUCLEATION DISPATCH
    // =========================================================================

    /// Try to attach the pick to an existing origin. Imported origins take
    /// precedence and are attached passively; among own origins the
    /// candidate with the most defining phases wins.
    fn try_associate(&mut self, pick: &Arc<Pick>) -> Option<Origin> {
        let candidates = self.associator.candidates(pick, &self.origins, &self.config);
        if candidates.is_empty() {
            return None;
        }
        info!("pick {}: {} association candidates", pick.id, candidates.len());

        // Imported origins first: attach and stop, never relocate.
        let mut imported_hit: Option<Origin> = None;
        for asso in &candidates {
            let origin = &self.origins[asso.origin_index];
            if !origin.imported {
                continue;
            }
            let mut clone = origin.clone();
            if !self.associate_pick(&mut clone, pick, &asso.phase) {
                continue;
            }
            info!(
                "associated pick {} to imported origin (phase={} aff={:.2} dist={:.1})",
                pick.id, asso.phase, asso.affinity, asso.distance
            );
            imported_hit = Some(clone);
        }
        if imported_hit.is_some() {
            return imported_hit;
        }

        let mut best: Option<Origin> = None;
        let mut best_defining = 0usize;
        for asso in &candidates {
            if asso.affinity < self.config.min_pick_affinity {
                continue;
            }
            let origin = &self.origins[asso.origin_index];
            if origin.imported {
                continue;
            }

            let mut clone = origin.clone();
            if !self.associate_pick(&mut clone, pick, &asso.phase) {
                debug!(" --- {clone}  ph={}", asso.phase);
                continue;
            }
            debug!(" +++ {clone}  ph={}", asso.phase);

            if !self.passed_filter(&mut clone) {
                continue;
            }

            let defining = clone.defining_phase_count();
            if defining > best_defining {
                best_defining = defining;
                best = Some(clone);
            }
        }
        best
    }

    /// Feed the nucleator; evaluate its candidates and merge with an
    /// equivalent existing origin when one exists.
    fn try_nucleate(&mut self, pick: &Arc<Pick>) -> Option<Origin> {
        if !self.nucleator.feed(pick) {
            return None;
        }

        let candidates = self.nucleator.new_origins();
        debug!("nucleator produced {} candidate origins", candidates.len());

        // The very first hypothesis may carry one bad pick (emergent
        // regional onsets), so the RMS gate is deliberately generous here.
        let mut best: Option<Origin> = None;
        let mut best_score = 0.0;
        for mut candidate in candidates {
            // Collapse the grid discretization before judging the fit; the
            // depth stays pinned to the cell's trial depth at this stage.
            self.relocator.set_fixed_depth(candidate.hypocenter.dep);
            self.relocator.use_fixed_depth(true);
            if let Ok(relocated) = self.relocator.relocate(&candidate) {
                candidate.update_from(&relocated);
            }

            if candidate.rms() > 3.0 * self.config.max_rms {
                continue;
            }
            let score = origin_score(&candidate, &self.config);
            if best.is_none() || score > best_score {
                best_score = score;
                best = Some(candidate);
            }
        }
        let mut new_origin = best?;

        new_origin.id = self.new_origin_id();
        new_origin.sort_arrivals();

        let Some(equivalent_index) = self.find_equivalent(&new_origin) else {
            return Some(new_origin);
        };

        let existing = self.origins[equivalent_index].clone();
        let old_rms = existing.rms();
        let old_score = origin_score(&existing, &self.config);

        let merged = self.merge(&existing, &new_origin)?;

        let epsilon = 1.0e-7;
        let rms_unchanged =
            old_rms > 0.0 && ((merged.rms() - old_rms) / old_rms).abs() < epsilon;
        let score_unchanged = old_score > 0.0
            && ((origin_score(&merged, &self.config) - old_score) / old_score).abs() < epsilon;
        if rms_unchanged && score_unchanged {
            debug!(" MRG {merged} UNCHANGED");
            return None;
        }

        debug!(" MRG {merged}");
        self.origins[equivalent_index].update_from(&merged);
        Some(self.origins[equivalent_index].clone())
    }

    pub(crate) fn new_origin_id(&mut self) -> OriginId {
        self.next_origin_id += 1;
        self.next_origin_id
    }

    // =========================================================================
    // ORIGIN STORAGE
    // =========================================================================

    /// Commit an origin (new or updated) to the origin set and queue it for
    /// reporting.
    pub(crate) fn store_origin(&mut self, origin: Origin) {
        let mut origin = origin;
        Self::rename_p_pkp(&mut origin);

        if origin.imported {
            info!(" IMP {origin}");
            self.add_more_picks(&mut origin);
        } else {
            update_score(&mut origin, &self.config);
        }

        if origin
            .arrivals
            .iter()
            .any(|a| a.is_defining() && prithvi_models::phase::is_depth_phase(&a.phase))
        {
            origin.depth_type = prithvi_models::DepthType::DepthPhases;
        }

        let index = if origin.id != 0 {
            self.origins.iter().position(|o| o.id == origin.id)
        } else if origin.imported {
            // Imported origins all carry id 0; updated copies are matched
            // by origin time (imported origins are never relocated, so the
            // time is stable).
            let time = origin.time;
            self.origins
                .iter()
                .position(|o| o.imported && seconds_between(o.time, time).abs() < 60.0)
        } else {
            None
        };
        let index = match index {
            Some(i) => {
                self.origins[i].update_from(&origin);
                info!(" UPD {}", self.origins[i]);
                i
            }
            None => {
                info!(" NEW {origin}");
                self.origins.push(origin);
                self.origins.len() - 1
            }
        };

        let stored = &mut self.origins[index];
        stored.timestamp = if self.config.playback { self.now } else { Utc::now() };

        if !stored.imported && stored.defining_phase_count() >= self.config.min_phase_count {
            stored.preliminary = false;
        }
        if stored.depth_type == prithvi_models::DepthType::DepthDefault
            && stored.hypocenter.dep != self.config.default_depth
        {
            stored.depth_type = prithvi_models::DepthType::DepthFree;
        }

        for arr in &stored.arrivals {
            self.associated.insert(arr.pick.id.clone());
        }

        let id = stored.id;
        if self.config.offline || self.config.test {
            debug!("{}", self.origins[index]);
        }
        if !self.new_origins.contains(&id) {
            self.new_origins.push(id);
        }
    }

    /// Fake test plus the minimum-phase-count final check; sorts arrivals.
    pub(crate) fn passed_filter(&mut self, origin: &mut Origin) -> bool {
        if self.config.offline || self.config.test {
            debug!(" TRY {origin}");
        }

        let fake_probability = self.test_fake(origin);
        if fake_probability > self.config.max_allowed_fake_probability {
            debug!(
                "probable fake origin {} - prob={:.3}",
                origin.id, fake_probability
            );
            return false;
        }

        if !self.passed_final_check(origin) {
            return false;
        }

        origin.sort_arrivals();
        true
    }

    fn passed_final_check(&self, origin: &Origin) -> bool {
        // Preliminary (XXL) origins may go out with fewer phases; everyone
        // else needs the configured minimum.
        origin.preliminary || origin.defining_phase_count() >= self.config.min_phase_count
    }

    // =========================================================================
    // PUBLICATION
    // =========================================================================

    /// Move freshly stored origins into the outgoing queue and flush it.
    pub fn report(&mut self) {
        for id in std::mem::take(&mut self.new_origins) {
            self.next_due
                .entry(id)
                .or_insert(DateTime::<Utc>::UNIX_EPOCH);
            self.outgoing.insert(id);
        }
        self.flush_outgoing();
    }

    fn flush_outgoing(&mut self) {
        let t = self.now();
        let dn_max = self.config.publication_interval_pick_count;

        let mut due: Vec<OriginId> = Vec::new();
        for &id in &self.outgoing {
            let Some(origin) = self.origins.iter().find(|o| o.id == id) else {
                continue;
            };
            let next_due = self
                .next_due
                .get(&id)
                .copied()
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
            let dt = seconds_between(t, next_due);
            // definingPhaseCount alone would suppress origins that gained
            // only loosely associated phases worth reporting.
            let dn = self
                .last_sent
                .get(&id)
                .map(|prev| origin.phase_count().saturating_sub(prev.phase_count()))
                .unwrap_or(dn_max);
            if dt >= 0.0 || dn >= dn_max {
                due.push(id);
            }
        }

        for id in due {
            let Some(origin) = self.origins.iter().find(|o| o.id == id).cloned() else {
                self.outgoing.remove(&id);
                continue;
            };

            if !self.publishable(&origin) {
                self.outgoing.remove(&id);
                continue;
            }

            if let Some(previous) = self.last_sent.get(&id) {
                if origin.defining_phase_count() <= previous.defining_phase_count()
                    && (origin.arrivals.len() <= previous.arrivals.len()
                        || seconds_between(t, previous.timestamp) < NO_IMPROVEMENT_WINDOW)
                {
                    info!("origin {id} not sent (no improvement)");
                    self.outgoing.remove(&id);
                    continue;
                }
            }

            (self.report_sink)(&origin);
            info!(" OUT {origin}");

            let n = origin.defining_phase_count() as f64;
            let interval = self.config.publication_interval_time_slope * n
                + self.config.publication_interval_time_intercept;
            let immediate =
                interval < 0.0 || (self.config.playback && self.config.playback_publish_immediately);
            let next = if immediate {
                DateTime::<Utc>::UNIX_EPOCH
            } else {
                add_seconds(t, interval)
            };
            self.next_due.insert(id, next);

            let mut snapshot = origin;
            snapshot.timestamp = t;
            self.last_sent.insert(id, snapshot);
            self.outgoing.remove(&id);
        }
    }

    fn publishable(&self, origin: &Origin) -> bool {
        if origin.quality.azi_gap_secondary > self.config.max_azi_gap_secondary {
            info!(
                "origin {} not sent (SGAP {:.0} > {:.0})",
                origin.id, origin.quality.azi_gap_secondary, self.config.max_azi_gap_secondary
            );
            return false;
        }
        if origin.score < self.config.min_score {
            info!(
                "origin {} not sent (score {:.1} < {:.1})",
                origin.id, origin.score, self.config.min_score
            );
            return false;
        }
        if origin.rms() > self.config.max_rms {
            info!(
                "origin {} not sent (RMS {:.1} > {:.1})",
                origin.id,
                origin.rms(),
                self.config.max_rms
            );
            return false;
        }
        if origin.hypocenter.dep > self.config.max_depth {
            info!(
                "origin {} too deep: {:.1} km > {:.1} km",
                origin.id, origin.hypocenter.dep, self.config.max_depth
            );
            return false;
        }
        true
    }

    // =========================================================================
    // CLEANUP AND LIFECYCLE
    // =========================================================================

    /// Evict stale state. With `min_time = None` this is the periodic sweep
    /// (rate-limited by `cleanup_interval`, disabled when `max_age` is 0);
    /// an explicit minimum time sweeps unconditionally.
    pub fn cleanup(&mut self, min_time: Option<DateTime<Utc>>) {
        let min_time = match min_time {
            Some(t) => t,
            None => {
                if self.now() < self.next_cleanup || self.config.max_age <= 0.0 {
                    return;
                }
                add_seconds(self.now(), -(self.config.max_age + CLEANUP_MARGIN))
            }
        };

        let picks_before = self.pick_pool.len();
        self.pick_pool.retain(|_, pick| pick.time >= min_time);
        let pool = &self.pick_pool;
        self.associated.retain(|id| pool.contains_key(id));

        let origins_before = self.origins.len();
        self.origins.retain(|origin| origin.time >= min_time);
        self.last_sent.retain(|_, origin| origin.time >= min_time);

        let live: HashSet<OriginId> = self.origins.iter().map(|o| o.id).collect();
        self.next_due.retain(|id, _| live.contains(id));
        self.outgoing.retain(|id| live.contains(id));

        let evicted = self.nucleator.cleanup(min_time);
        self.next_cleanup = add_seconds(self.now(), self.config.cleanup_interval);
        debug!(
            "cleanup: {} picks, {} origins, {} nucleator entries evicted",
            picks_before - self.pick_pool.len(),
            origins_before - self.origins.len(),
            evicted,
        );
        self.dump_state();
    }

    /// Drop all dynamic state; stations and configuration survive.
    pub fn reset(&mut self) {
        info!("reset requested");
        self.outgoing.clear();
        self.origins.clear();
        self.last_sent.clear();
        self.next_due.clear();
        self.pick_pool.clear();
        self.associated.clear();
        self.blacklist.clear();
        self.new_origins.clear();
        self.nucleator.reset();
    }

    /// Reset, flush the pick log, and account for leftovers.
    pub fn shutdown(&mut self) {
        info!("locator shutdown");
        let leftover_picks = self.pick_pool.len();
        let leftover_origins = self.origins.len();
        self.reset();
        self.pick_log.close();
        if leftover_picks > 0 {
            warn!("dropped {leftover_picks} picks at shutdown");
        }
        if leftover_origins > 0 {
            warn!("dropped {leftover_origins} origins at shutdown");
        }
        info!("locator shutdown completed");
    }
}
