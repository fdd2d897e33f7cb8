//! Nucleation: forming first hypotheses from spatiotemporally consistent
//! picks.
//!
//! The nucleator maintains a grid of trial hypocentre cells. Every incoming
//! pick is back-projected onto each cell within reach of its station: the
//! implied origin time is `pick.time - tt_P(cell, station)`. When at least
//! three distinct stations imply the same origin time at one cell, that cell
//! becomes a candidate origin. The engine takes it from there (relocation,
//! refinement, filtering); the nucleator itself stays cheap and greedy.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use prithvi_models::{add_seconds, delazi, seconds_between, Arrival, Origin, Pick};
use tracing::debug;

use crate::error::EngineError;
use crate::travel::{first_p, TravelTimeTable};

/// Base agreement window for implied origin times at one cell, seconds.
const ORIGIN_TIME_TOLERANCE: f64 = 3.0;

/// How far the true source may sit from the cell centre, degrees. The
/// clustering window widens by this misfit times the local slowness, so
/// off-grid events still collapse onto the nearest cell; the relocation and
/// RMS gates downstream discard accidental clusters.
const GRID_MISFIT_DEG: f64 = 3.0;

/// Minimum distinct stations to form a candidate.
const MIN_NUCLEATION_PICKS: usize = 3;

/// One trial hypocentre.
#[derive(Debug, Clone, Copy)]
pub struct GridCell {
    pub lat: f64,
    pub lon: f64,
    pub dep: f64,
    /// Association radius of the cell, degrees.
    pub radius: f64,
}

#[derive(Debug, Clone)]
struct BufferEntry {
    pick: Arc<Pick>,
    implied: DateTime<Utc>,
    distance: f64,
    azimuth: f64,
    /// Slowness of the back-projected phase, s/deg; sets the clustering
    /// window for this entry.
    dtdd: f64,
}

/// Grid-search nucleator.
pub struct GridNucleator {
    ttt: Arc<dyn TravelTimeTable>,
    cells: Vec<GridCell>,
    buffers: Vec<Vec<BufferEntry>>,
    /// Scale factor applied to cell radii.
    pub max_radius_factor: f64,
    fresh: Vec<Origin>,
}

impl GridNucleator {
    /// Nucleator over the built-in coarse global grid.
    pub fn new(ttt: Arc<dyn TravelTimeTable>) -> Self {
        let cells = default_grid();
        let buffers = vec![Vec::new(); cells.len()];
        Self {
            ttt,
            cells,
            buffers,
            max_radius_factor: 1.0,
            fresh: Vec::new(),
        }
    }

    /// Replace the grid from a whitespace file with lines
    /// `lat lon dep radius`. Clears all buffered state.
    pub fn set_grid_file(&mut self, path: impl AsRef<Path>) -> Result<usize, EngineError> {
        let text = std::fs::read_to_string(&path)?;
        let mut cells = Vec::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                return Err(EngineError::GridFile {
                    line: lineno + 1,
                    reason: format!("expected 4 fields, got {}", fields.len()),
                });
            }
            let parse = |s: &str| -> Result<f64, EngineError> {
                s.parse().map_err(|_| EngineError::GridFile {
                    line: lineno + 1,
                    reason: format!("bad number {s:?}"),
                })
            };
            cells.push(GridCell {
                lat: parse(fields[0])?,
                lon: parse(fields[1])?,
                dep: parse(fields[2])?,
                radius: parse(fields[3])?,
            });
        }
        debug!(cells = cells.len(), "nucleation grid loaded");
        self.buffers = vec![Vec::new(); cells.len()];
        self.cells = cells;
        self.fresh.clear();
        Ok(self.cells.len())
    }

    /// Back-project a pick onto the grid. Returns true when at least one
    /// candidate origin was formed; collect them via `new_origins`.
    pub fn feed(&mut self, pick: &Arc<Pick>) -> bool {
        self.fresh.clear();
        let Some(station) = pick.station.clone() else {
            return false;
        };

        for (index, cell) in self.cells.iter().enumerate() {
            let da = delazi(cell.lat, cell.lon, station.lat, station.lon);
            let reach = (cell.radius * self.max_radius_factor)
                .min(station.max_nucleation_distance);
            if da.delta > reach {
                continue;
            }

            let hypo = prithvi_models::Hypocenter {
                lat: cell.lat,
                lon: cell.lon,
                dep: cell.dep,
            };
            let Ok(list) = self.ttt.compute_at(&hypo, &station) else {
                continue;
            };
            let Some(tt) = first_p(&list) else {
                continue;
            };

            let implied = add_seconds(pick.time, -tt.time);
            let buffer = &mut self.buffers[index];
            buffer.retain(|e| e.pick.id != pick.id);
            buffer.push(BufferEntry {
                pick: pick.clone(),
                implied,
                distance: da.delta,
                azimuth: da.azimuth,
                dtdd: tt.dtdd,
            });

            if let Some(candidate) = cluster_candidate(cell, buffer, implied) {
                // Identical pick sets from neighbouring cells add nothing.
                let duplicate = self.fresh.iter().any(|o| same_pick_set(o, &candidate));
                if !duplicate {
                    self.fresh.push(candidate);
                }
            }
        }

        !self.fresh.is_empty()
    }

    /// Candidate origins formed by the last `feed`.
    pub fn new_origins(&mut self) -> Vec<Origin> {
        std::mem::take(&mut self.fresh)
    }

    /// Evict buffered picks older than `min_time`; returns how many.
    pub fn cleanup(&mut self, min_time: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for buffer in &mut self.buffers {
            let before = buffer.len();
            buffer.retain(|e| e.pick.time >= min_time);
            removed += before - buffer.len();
        }
        removed
    }

    /// Drop all buffered state.
    pub fn reset(&mut self) {
        for buffer in &mut self.buffers {
            buffer.clear();
        }
        self.fresh.clear();
    }
}

/// Entries agreeing with `anchor` within the slowness-scaled window, one
/// per station, assembled into a candidate origin when there are enough of
/// them.
fn cluster_candidate(
    cell: &GridCell,
    buffer: &[BufferEntry],
    anchor: DateTime<Utc>,
) -> Option<Origin> {
    let mut per_station: Vec<&BufferEntry> = Vec::new();
    for entry in buffer {
        let window = ORIGIN_TIME_TOLERANCE + GRID_MISFIT_DEG * entry.dtdd.abs();
        if seconds_between(entry.implied, anchor).abs() > window {
            continue;
        }
        match per_station
            .iter()
            .position(|e| e.pick.station_key() == entry.pick.station_key())
        {
            Some(i) => {
                // Prefer the entry that agrees best with the anchor.
                if seconds_between(entry.implied, anchor).abs()
                    < seconds_between(per_station[i].implied, anchor).abs()
                {
                    per_station[i] = entry;
                }
            }
            None => per_station.push(entry),
        }
    }

    if per_station.len() < MIN_NUCLEATION_PICKS {
        return None;
    }

    // Median implied time is the candidate origin time.
    let mut offsets: Vec<f64> = per_station
        .iter()
        .map(|e| seconds_between(e.implied, anchor))
        .collect();
    offsets.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median = offsets[offsets.len() / 2];
    let origin_time = add_seconds(anchor, median);

    let mut origin = Origin::new(cell.lat, cell.lon, cell.dep, origin_time);
    for entry in per_station {
        let mut arr = Arrival::new(
            entry.pick.clone(),
            "P",
            seconds_between(entry.implied, origin_time),
        );
        arr.distance = entry.distance;
        arr.azimuth = entry.azimuth;
        origin.arrivals.push(arr);
    }
    origin.sort_arrivals();
    Some(origin)
}

fn same_pick_set(a: &Origin, b: &Origin) -> bool {
    if a.arrivals.len() != b.arrivals.len() {
        return false;
    }
    a.arrivals
        .iter()
        .all(|arr| b.find_arrival(&arr.pick.id).is_some())
}

/// Coarse global grid: 5-degree latitude rows, longitude spacing widened
/// toward the poles, one shallow and one deep trial layer.
fn default_grid() -> Vec<GridCell> {
    let mut cells = Vec::new();
    let mut lat = -85.0f64;
    while lat <= 85.0 {
        let step = (5.0 / lat.to_radians().cos().max(0.1)).min(60.0);
        let mut lon = -180.0;
        while lon < 180.0 {
            for dep in [10.0, 300.0] {
                cells.push(GridCell {
                    lat,
                    lon,
                    dep,
                    radius: 12.0,
                });
            }
            lon += step;
        }
        lat += 5.0;
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::earthmodel::StandardTable;
    use chrono::TimeZone;
    use prithvi_models::{Hypocenter, PickMode, Station};

    fn pick_for(
        id: &str,
        station: Arc<Station>,
        hypo: &Hypocenter,
        t0: DateTime<Utc>,
        table: &StandardTable,
    ) -> Arc<Pick> {
        let tt = first_p(&table.compute_at(hypo, &station).unwrap())
            .unwrap()
            .time;
        Arc::new(Pick {
            id: id.into(),
            time: add_seconds(t0, tt),
            net: station.net.clone(),
            sta: station.code.clone(),
            loc: String::new(),
            cha: "BHZ".into(),
            amplitude: 200.0,
            period: 1.0,
            snr: 12.0,
            mode: PickMode::Automatic,
            xxl: false,
            normalized_amplitude: 0.1,
            station: Some(station),
        })
    }

    #[test]
    fn three_consistent_picks_nucleate() {
        let table = StandardTable::new();
        let mut nucleator = GridNucleator::new(Arc::new(StandardTable::new()));
        let t0 = Utc.with_ymd_and_hms(2024, 4, 4, 12, 0, 0).unwrap();
        let hypo = Hypocenter { lat: 0.0, lon: 0.0, dep: 10.0 };

        let stations = [
            Arc::new(Station::new("XX", "A", 4.0, 1.0, 0.0)),
            Arc::new(Station::new("XX", "B", -3.0, 4.0, 0.0)),
            Arc::new(Station::new("XX", "C", 2.0, -5.0, 0.0)),
        ];

        let mut fired = false;
        for (i, sta) in stations.iter().enumerate() {
            let pick = pick_for(&format!("n{i}"), sta.clone(), &hypo, t0, &table);
            fired = nucleator.feed(&pick);
        }
        assert!(fired, "third consistent pick must nucleate");

        let candidates = nucleator.new_origins();
        assert!(!candidates.is_empty());
        let best = &candidates[0];
        assert_eq!(best.arrivals.len(), 3);
        assert!(seconds_between(best.time, t0).abs() < 60.0);
    }

    #[test]
    fn inconsistent_picks_do_not_nucleate() {
        let table = StandardTable::new();
        let mut nucleator = GridNucleator::new(Arc::new(StandardTable::new()));
        let t0 = Utc.with_ymd_and_hms(2024, 4, 4, 12, 0, 0).unwrap();
        let hypo = Hypocenter { lat: 0.0, lon: 0.0, dep: 10.0 };

        let stations = [
            Arc::new(Station::new("XX", "A", 4.0, 1.0, 0.0)),
            Arc::new(Station::new("XX", "B", -3.0, 4.0, 0.0)),
            Arc::new(Station::new("XX", "C", 2.0, -5.0, 0.0)),
        ];

        for (i, sta) in stations.iter().enumerate() {
            let mut pick = (*pick_for(&format!("n{i}"), sta.clone(), &hypo, t0, &table)).clone();
            // Scatter onsets far outside any common origin time.
            pick.time = add_seconds(pick.time, (i as f64) * 500.0);
            assert!(!nucleator.feed(&Arc::new(pick)));
        }
    }

    #[test]
    fn duplicate_feed_replaces_buffer_entry() {
        let table = StandardTable::new();
        let mut nucleator = GridNucleator::new(Arc::new(StandardTable::new()));
        let t0 = Utc.with_ymd_and_hms(2024, 4, 4, 12, 0, 0).unwrap();
        let hypo = Hypocenter { lat: 0.0, lon: 0.0, dep: 10.0 };
        let sta = Arc::new(Station::new("XX", "A", 4.0, 1.0, 0.0));

        let pick = pick_for("dup", sta, &hypo, t0, &table);
        nucleator.feed(&pick);
        nucleator.feed(&pick);
        // One station can never nucleate alone, duplicates or not.
        assert!(nucleator.new_origins().is_empty());
    }

    #[test]
    fn cleanup_evicts_old_entries() {
        let table = StandardTable::new();
        let mut nucleator = GridNucleator::new(Arc::new(StandardTable::new()));
        let t0 = Utc.with_ymd_and_hms(2024, 4, 4, 12, 0, 0).unwrap();
        let hypo = Hypocenter { lat: 0.0, lon: 0.0, dep: 10.0 };
        let sta = Arc::new(Station::new("XX", "A", 4.0, 1.0, 0.0));

        let pick = pick_for("old", sta, &hypo, t0, &table);
        nucleator.feed(&pick);
        let removed = nucleator.cleanup(add_seconds(t0, 3600.0));
        assert!(removed > 0);
    }

    #[test]
    fn grid_file_round_trip() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "# lat lon dep radius").unwrap();
        writeln!(f, "10.0 20.0 33.0 5.0").unwrap();
        writeln!(f, "-5.0 140.0 10.0 8.0").unwrap();

        let mut nucleator = GridNucleator::new(Arc::new(StandardTable::new()));
        assert_eq!(nucleator.set_grid_file(f.path()).unwrap(), 2);
    }
}
