//! End-to-end scenarios for the locator engine, driven through the public
//! API with the bundled travel-time table and least-squares locator:
//! 1. Single-event nucleation from a consistent regional pick set
//! 2. Fake-origin suppression (PP coincidences of a large event)
//! 3. XXL short-circuit preliminary origin
//! 4. Publication throttling (time slope / pick count)
//! 5. No-improvement suppression after publication
//! 6. Playback clock drives cleanup
//! plus intake idempotence.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use chrono::{DateTime, TimeZone, Utc};
use prithvi_engine::{first_p, phase_entry, Locator, StandardTable, TravelTimeTable};
use prithvi_models::{add_seconds, seconds_between, Hypocenter, LocatorConfig, Origin, Pick, PickMode, Station};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

fn station(code: &str, lat: f64, lon: f64) -> Station {
    Station::new("TS", code, lat, lon, 0.0)
}

/// Synthetic first-arrival pick for an event at `hypo` with origin time
/// `origin_time`, shifted by `offset` seconds.
fn synth_pick(
    id: &str,
    sta: &Station,
    hypo: &Hypocenter,
    origin_time: DateTime<Utc>,
    offset: f64,
    snr: f64,
    amplitude: f64,
) -> Pick {
    let table = StandardTable::new();
    let list = table
        .compute(hypo, sta.lat, sta.lon, sta.elev)
        .expect("travel time");
    let tt = first_p(&list).expect("first P").time;
    Pick {
        id: id.into(),
        time: add_seconds(origin_time, tt + offset),
        net: sta.net.clone(),
        sta: sta.code.clone(),
        loc: String::new(),
        cha: "BHZ".into(),
        amplitude,
        period: 1.0,
        snr,
        mode: PickMode::Automatic,
        xxl: false,
        normalized_amplitude: 0.0,
        station: None,
    }
}

/// Engine in playback mode with a capturing report sink.
fn engine_with_sink(
    config: LocatorConfig,
    stations: &[Station],
) -> (Locator, Rc<RefCell<Vec<Origin>>>) {
    let mut engine = Locator::with_defaults(config).expect("engine");
    for sta in stations {
        assert!(engine.set_station(sta.clone()));
    }
    let published = Rc::new(RefCell::new(Vec::new()));
    let capture = published.clone();
    engine.set_report_sink(Box::new(move |origin: &Origin| {
        capture.borrow_mut().push(origin.clone());
    }));
    (engine, published)
}

fn feed_in_time_order(engine: &mut Locator, picks: &mut Vec<Pick>) {
    picks.sort_by_key(|p| p.time);
    for pick in picks.drain(..) {
        engine.feed_pick(pick);
    }
}

fn check_origin_invariants(origin: &Origin) {
    let defining = origin.arrivals.iter().filter(|a| a.is_defining()).count();
    assert_eq!(origin.defining_phase_count(), defining);

    let mut ids: Vec<&str> = origin.arrivals.iter().map(|a| a.pick.id.as_str()).collect();
    ids.sort();
    let before = ids.len();
    ids.dedup();
    assert_eq!(before, ids.len(), "two arrivals share a pick");
}

// =============================================================================
// Scenario 1: Single-event nucleation
// =============================================================================

fn regional_stations() -> Vec<Station> {
    vec![
        station("S01", 4.0, 1.0),
        station("S02", -3.0, 4.5),
        station("S03", 2.5, -5.0),
        station("S04", -5.5, -2.0),
        station("S05", 6.5, 3.0),
        station("S06", -1.0, 6.8),
        station("S07", 5.0, -4.0),
        station("S08", -6.0, 5.0),
    ]
}

#[test]
fn single_event_nucleation() {
    let mut config = LocatorConfig::default();
    config.playback = true;
    config.min_phase_count = 6;
    config.max_rms = 2.0;
    config.default_depth = 10.0;

    let stations = regional_stations();
    let (mut engine, published) = engine_with_sink(config, &stations);

    let hypo = Hypocenter { lat: 0.0, lon: 0.0, dep: 10.0 };
    let mut picks: Vec<Pick> = stations
        .iter()
        .enumerate()
        .map(|(i, sta)| synth_pick(&format!("ev1-{i}"), sta, &hypo, t0(), 0.0, 20.0, 2000.0))
        .collect();
    feed_in_time_order(&mut engine, &mut picks);

    let published = published.borrow();
    assert!(!published.is_empty(), "event must be published");
    let ids: HashSet<u64> = published.iter().map(|o| o.id).collect();
    assert_eq!(ids.len(), 1, "exactly one origin expected");

    let last = published.last().unwrap();
    assert!((last.hypocenter.lat - 0.0).abs() < 0.1, "lat {}", last.hypocenter.lat);
    assert!((last.hypocenter.lon - 0.0).abs() < 0.1, "lon {}", last.hypocenter.lon);
    assert!((last.hypocenter.dep - 10.0).abs() < 5.0, "dep {}", last.hypocenter.dep);
    assert!(seconds_between(last.time, t0()).abs() < 0.5);

    for origin in engine.origins() {
        check_origin_invariants(origin);
    }
}

// =============================================================================
// Scenario 2: Fake-origin suppression
// =============================================================================

#[test]
fn fake_origin_suppressed() {
    let mut config = LocatorConfig::default();
    config.playback = true;
    config.min_phase_count = 4;
    config.max_rms = 2.0;

    // 15 stations around the genuine event, plus a tight remote cluster
    // whose picks will coincide with PP of the big event.
    let mut stations: Vec<Station> = (0..15)
        .map(|i| {
            let angle = (i as f64) * 24.0;
            let r = 2.5 + 0.3 * (i as f64);
            station(
                &format!("B{i:02}"),
                r * angle.to_radians().cos(),
                r * angle.to_radians().sin(),
            )
        })
        .collect();
    let fake_stations = vec![
        station("F1", 0.3, 40.0),
        station("F2", -0.4, 40.5),
        station("F3", 0.6, 41.0),
        station("F4", -0.2, 41.5),
    ];
    stations.extend(fake_stations.iter().cloned());

    let (mut engine, published) = engine_with_sink(config, &stations);

    // The genuine, high-score event.
    let hypo = Hypocenter { lat: 0.0, lon: 0.0, dep: 10.0 };
    let mut picks: Vec<Pick> = stations[..15]
        .iter()
        .enumerate()
        .map(|(i, sta)| synth_pick(&format!("big-{i}"), sta, &hypo, t0(), 0.0, 30.0, 1.0e5))
        .collect();
    feed_in_time_order(&mut engine, &mut picks);
    assert_eq!(engine.origins().len(), 1);
    let big_score = engine.origins()[0].score;
    assert!(big_score > 80.0, "score {big_score}");

    // Four picks consistent with a phantom source near the remote cluster,
    // timed to coincide with the big event's PP arrivals.
    let table = StandardTable::new();
    let phantom = Hypocenter { lat: 0.2, lon: 40.8, dep: 10.0 };
    let pp_anchor = phase_entry(
        &table.compute(&hypo, fake_stations[0].lat, fake_stations[0].lon, 0.0).unwrap(),
        "PP",
    )
    .expect("PP predicted")
    .time;
    let p_anchor = first_p(
        &table
            .compute(&phantom, fake_stations[0].lat, fake_stations[0].lon, 0.0)
            .unwrap(),
    )
    .unwrap()
    .time;
    let phantom_time = add_seconds(t0(), pp_anchor - p_anchor);

    let mut fakes: Vec<Pick> = fake_stations
        .iter()
        .enumerate()
        .map(|(i, sta)| synth_pick(&format!("pp-{i}"), sta, &phantom, phantom_time, 0.0, 15.0, 3000.0))
        .collect();

    // Each phantom pick really falls into the PP window of the big event.
    for (pick, sta) in fakes.iter().zip(&fake_stations) {
        let pp = phase_entry(&table.compute(&hypo, sta.lat, sta.lon, 0.0).unwrap(), "PP")
            .unwrap()
            .time;
        let dt = seconds_between(pick.time, t0()) - pp;
        assert!(dt > -20.0 && dt < 30.0, "construction broken: dt={dt}");
    }

    feed_in_time_order(&mut engine, &mut fakes);

    assert_eq!(engine.origins().len(), 1, "no second origin may form");
    let ids: HashSet<u64> = published.borrow().iter().map(|o| o.id).collect();
    assert_eq!(ids.len(), 1);
}

// =============================================================================
// Scenario 3: XXL short-circuit
// =============================================================================

#[test]
fn xxl_preliminary_origin() {
    let mut config = LocatorConfig::default();
    config.playback = true;
    config.xxl_enabled = true;
    config.xxl_min_amplitude = 1.0e5;
    config.xxl_min_phase_count = 4;
    config.xxl_max_sta_dist = 15.0;
    config.default_depth = 10.0;
    config.default_depth_stickiness = 0.95;

    let stations = vec![
        station("XA", 10.0, 10.0),
        station("XB", 12.0, 11.0),
        station("XC", 9.0, 13.0),
        station("XD", 13.0, 8.0),
    ];
    let (mut engine, published) = engine_with_sink(config, &stations);

    // The event sits right under the first station.
    let hypo = Hypocenter { lat: 10.0, lon: 10.0, dep: 10.0 };
    let mut picks: Vec<Pick> = stations
        .iter()
        .enumerate()
        .map(|(i, sta)| synth_pick(&format!("xxl-{i}"), sta, &hypo, t0(), 0.0, 30.0, 2.0e5))
        .collect();
    feed_in_time_order(&mut engine, &mut picks);

    let published = published.borrow();
    assert!(!published.is_empty(), "XXL origin must be published");
    let origin = published.last().unwrap();
    assert!(origin.preliminary, "XXL origin is preliminary");
    assert!((origin.hypocenter.lat - 10.0).abs() < 0.2);
    assert!((origin.hypocenter.lon - 10.0).abs() < 0.2);
    assert!((origin.hypocenter.dep - 10.0).abs() < 1e-6, "depth pinned to default");
    assert!(seconds_between(origin.time, t0()).abs() < 2.0);
}

// =============================================================================
// Scenario 4: Publication throttling
// =============================================================================

#[test]
fn publication_throttled_by_time_slope() {
    let mut config = LocatorConfig::default();
    config.playback = true;
    config.min_phase_count = 20;
    config.publication_interval_time_slope = 2.0;
    config.publication_interval_time_intercept = 10.0;

    let mut stations: Vec<Station> = (0..20)
        .map(|i| {
            let angle = (i as f64) * 18.0;
            let r = 3.0 + 8.0 * (i as f64) / 19.0;
            station(
                &format!("T{i:02}"),
                r * angle.to_radians().cos(),
                r * angle.to_radians().sin(),
            )
        })
        .collect();
    let late1 = station("L21", 14.0, 0.5);
    let late2 = station("L22", 0.5, 20.0);
    stations.push(late1.clone());
    stations.push(late2.clone());

    let (mut engine, published) = engine_with_sink(config, &stations);

    let hypo = Hypocenter { lat: 0.0, lon: 0.0, dep: 10.0 };
    let mut picks: Vec<Pick> = stations[..20]
        .iter()
        .enumerate()
        .map(|(i, sta)| synth_pick(&format!("th-{i}"), sta, &hypo, t0(), 0.0, 20.0, 2000.0))
        .collect();
    feed_in_time_order(&mut engine, &mut picks);
    assert_eq!(published.borrow().len(), 1, "first publication at 20 phases");
    let first = published.borrow()[0].clone();
    assert_eq!(first.defining_phase_count(), 20);

    // One more arrival well before next-due (T1 + 2*20 + 10): suppressed.
    engine.feed_pick(synth_pick("th-late1", &late1, &hypo, t0(), 0.0, 20.0, 2000.0));
    assert_eq!(published.borrow().len(), 1, "throttled before next due time");

    // An arrival after the back-off expires is published again.
    engine.feed_pick(synth_pick("th-late2", &late2, &hypo, t0(), 0.0, 20.0, 2000.0));
    assert_eq!(published.borrow().len(), 2, "published after back-off");

    // The defining phase count never decreases between publications.
    let published = published.borrow();
    assert!(published[1].defining_phase_count() >= published[0].defining_phase_count());
}

// =============================================================================
// Scenario 5: No-improvement suppression
// =============================================================================

#[test]
fn no_improvement_update_suppressed() {
    let mut config = LocatorConfig::default();
    config.playback = true;
    config.min_phase_count = 6;

    let mut stations = regional_stations()[..6].to_vec();
    let outlier_station = station("S99", 10.5, 5.8);
    stations.push(outlier_station.clone());
    let (mut engine, published) = engine_with_sink(config, &stations);

    let hypo = Hypocenter { lat: 0.0, lon: 0.0, dep: 10.0 };
    let mut picks: Vec<Pick> = stations[..6]
        .iter()
        .enumerate()
        .map(|(i, sta)| synth_pick(&format!("ni-{i}"), sta, &hypo, t0(), 0.0, 20.0, 2000.0))
        .collect();
    feed_in_time_order(&mut engine, &mut picks);
    assert_eq!(published.borrow().len(), 1);

    // An off-time onset from a farther station: it attaches, but not as a
    // defining phase, so the update is an improvement in nothing.
    let off = synth_pick("ni-off", &outlier_station, &hypo, t0(), 8.0, 20.0, 2000.0);
    engine.feed_pick(off);

    assert_eq!(engine.origins().len(), 1);
    assert_eq!(engine.origins()[0].arrivals.len(), 7, "arrival loosely attached");
    assert_eq!(engine.origins()[0].defining_phase_count(), 6);
    assert_eq!(
        published.borrow().len(),
        1,
        "no publication within the no-improvement window"
    );
}

// =============================================================================
// Scenario 6: Playback clock drives cleanup
// =============================================================================

#[test]
fn playback_clock_drives_cleanup() {
    let mut config = LocatorConfig::default();
    config.playback = true;
    config.max_age = 100.0;
    config.cleanup_interval = 10.0;

    let stations = vec![station("C1", 0.0, 0.0), station("C2", 30.0, 30.0)];
    let (mut engine, _published) = engine_with_sink(config, &stations);

    let hypo = Hypocenter { lat: 1.0, lon: 1.0, dep: 10.0 };
    let early = synth_pick("old", &stations[0], &hypo, t0(), 0.0, 10.0, 100.0);
    engine.feed_pick(early);
    assert!(engine.pick("old").is_some());

    // Much later in stream time; wall clock is irrelevant in playback.
    let late = synth_pick("new", &stations[1], &hypo, add_seconds(t0(), 10_000.0), 0.0, 10.0, 100.0);
    engine.feed_pick(late);

    assert!(engine.pick("old").is_none(), "old pick evicted by stream time");
    assert!(engine.pick("new").is_some(), "current pick survives");
    assert_eq!(engine.pick_count(), 1);
}

// =============================================================================
// Idempotence
// =============================================================================

#[test]
fn refeeding_a_pick_changes_nothing() {
    let mut config = LocatorConfig::default();
    config.playback = true;
    config.min_phase_count = 6;
    config.max_rms = 2.0;

    let stations = regional_stations();
    let (mut engine, published) = engine_with_sink(config, &stations);

    let hypo = Hypocenter { lat: 0.0, lon: 0.0, dep: 10.0 };
    let mut picks: Vec<Pick> = stations
        .iter()
        .enumerate()
        .map(|(i, sta)| synth_pick(&format!("idem-{i}"), sta, &hypo, t0(), 0.0, 20.0, 2000.0))
        .collect();
    picks.sort_by_key(|p| p.time);
    let refeed = picks[3].clone();
    for pick in picks.drain(..) {
        engine.feed_pick(pick);
    }

    let origins_before = engine.origins().len();
    let id_before = engine.origins()[0].id;
    let arrivals_before = engine.origins()[0].arrivals.len();
    let defining_before = engine.origins()[0].defining_phase_count();
    let score_before = engine.origins()[0].score;
    let published_before = published.borrow().len();

    engine.feed_pick(refeed);

    assert_eq!(engine.origins().len(), origins_before);
    assert_eq!(engine.origins()[0].id, id_before);
    assert_eq!(engine.origins()[0].arrivals.len(), arrivals_before);
    assert_eq!(engine.origins()[0].defining_phase_count(), defining_before);
    assert!((engine.origins()[0].score - score_before).abs() < 1e-3);
    assert_eq!(published.borrow().len(), published_before);
}

// =============================================================================
// External origins: imported and manual
// =============================================================================

#[test]
fn imported_origin_collects_picks_passively() {
    let mut config = LocatorConfig::default();
    config.playback = true;
    config.min_phase_count = 6;

    let stations = regional_stations();
    let (mut engine, published) = engine_with_sink(config, &stations);

    let mut imported = Origin::new(0.0, 0.0, 10.0, t0());
    imported.imported = true;
    assert!(engine.feed_origin(imported));
    assert_eq!(engine.origins().len(), 1);

    let hypo = Hypocenter { lat: 0.0, lon: 0.0, dep: 10.0 };
    let mut picks: Vec<Pick> = stations
        .iter()
        .enumerate()
        .map(|(i, sta)| synth_pick(&format!("imp-{i}"), sta, &hypo, t0(), 0.0, 20.0, 2000.0))
        .collect();
    feed_in_time_order(&mut engine, &mut picks);

    // All picks attach loosely to the trusted origin; none of them spawns
    // or relocates an own hypothesis, and nothing is published.
    assert_eq!(engine.origins().len(), 1);
    let origin = &engine.origins()[0];
    assert_eq!(origin.id, 0);
    assert!(origin.imported);
    assert_eq!(origin.arrivals.len(), 8);
    assert_eq!(origin.defining_phase_count(), 0);
    assert!((origin.hypocenter.lat - 0.0).abs() < 1e-12, "never relocated");
    assert!(published.borrow().is_empty());
}

#[test]
fn manual_origin_overrides_matching_automatic_origin() {
    let mut config = LocatorConfig::default();
    config.playback = true;
    config.min_phase_count = 6;
    config.use_manual_origins = true;

    let stations = regional_stations();
    let (mut engine, _published) = engine_with_sink(config, &stations);

    let hypo = Hypocenter { lat: 0.0, lon: 0.0, dep: 10.0 };
    let mut picks: Vec<Pick> = stations
        .iter()
        .enumerate()
        .map(|(i, sta)| synth_pick(&format!("mo-{i}"), sta, &hypo, t0(), 0.0, 20.0, 2000.0))
        .collect();
    feed_in_time_order(&mut engine, &mut picks);
    assert_eq!(engine.origins().len(), 1);
    let auto_id = engine.origins()[0].id;

    // An analyst's solution referencing three of the same picks, with a
    // manually fixed deeper source.
    let mut manual = Origin::new(0.1, -0.1, 25.0, t0());
    manual.depth_type = prithvi_models::DepthType::DepthManuallyFixed;
    for arr in engine.origins()[0].arrivals.iter().take(3).cloned().collect::<Vec<_>>() {
        manual.arrivals.push(arr);
    }
    assert!(engine.feed_origin(manual));

    assert_eq!(engine.origins().len(), 1, "folded into the matching origin");
    let merged = &engine.origins()[0];
    assert_eq!(merged.id, auto_id, "existing id is kept");
    assert!(merged.manual);
    assert_eq!(merged.depth_type, prithvi_models::DepthType::DepthManuallyFixed);
    assert!((merged.hypocenter.dep - 25.0).abs() < 1e-6, "manual depth fixed");
    assert_eq!(merged.arrivals.len(), 8, "arrival lists unioned");
}

// =============================================================================
// Shutdown
// =============================================================================

#[test]
fn shutdown_clears_all_state() {
    let mut config = LocatorConfig::default();
    config.playback = true;
    config.min_phase_count = 6;

    let stations = regional_stations();
    let (mut engine, _published) = engine_with_sink(config, &stations);

    let hypo = Hypocenter { lat: 0.0, lon: 0.0, dep: 10.0 };
    let mut picks: Vec<Pick> = stations
        .iter()
        .enumerate()
        .map(|(i, sta)| synth_pick(&format!("sd-{i}"), sta, &hypo, t0(), 0.0, 20.0, 2000.0))
        .collect();
    feed_in_time_order(&mut engine, &mut picks);
    assert!(engine.pick_count() > 0);

    engine.shutdown();
    assert_eq!(engine.pick_count(), 0);
    assert!(engine.origins().is_empty());
}
