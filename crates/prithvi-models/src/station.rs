//! Station registry entries and the whitespace station configuration file.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::ModelError;

/// A seismic receiver. Created once at configuration time, never destroyed
/// during a run; the engine shares stations via `Arc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Station {
    /// Network code, e.g. "GE".
    pub net: String,
    /// Station code, e.g. "WLF".
    pub code: String,
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Elevation in meters.
    #[serde(default)]
    pub elev: f64,
    /// Whether automatic picks from this station take part in location.
    /// Overwritten from the station configuration at registration.
    #[serde(default)]
    pub used: bool,
    /// Maximum epicentral distance (degrees) at which this station may
    /// contribute to nucleation. Overwritten at registration.
    #[serde(default = "default_distance")]
    pub max_nucleation_distance: f64,
    /// Maximum epicentral distance (degrees) at which this station may
    /// contribute to location. Overwritten at registration.
    #[serde(default = "default_distance")]
    pub max_location_distance: f64,
}

fn default_distance() -> f64 {
    180.0
}

impl Station {
    pub fn new(net: impl Into<String>, code: impl Into<String>, lat: f64, lon: f64, elev: f64) -> Self {
        Self {
            net: net.into(),
            code: code.into(),
            lat,
            lon,
            elev,
            used: true,
            max_nucleation_distance: 180.0,
            max_location_distance: 180.0,
        }
    }

    /// Registry key, "NET.STA".
    pub fn key(&self) -> String {
        format!("{}.{}", self.net, self.code)
    }
}

/// One line of the station configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StationConfigEntry {
    /// Usage flag; 0 disables the station for automatic processing.
    pub usage: u32,
    /// Maximum nucleation distance in degrees.
    pub max_nuc_dist: f64,
}

impl Default for StationConfigEntry {
    fn default() -> Self {
        // Stations without an entry are not used.
        Self {
            usage: 0,
            max_nuc_dist: 180.0,
        }
    }
}

/// Per-station usage policy, read from a whitespace-delimited file with
/// lines `net sta usage maxNucDist`. `*` wildcards are accepted for both
/// network and station code; the most specific match wins.
///
/// Without a file every station is usable with unlimited nucleation
/// distance; once a file is read, stations it does not cover are unused.
#[derive(Debug, Clone)]
pub struct StationConfig {
    entries: Vec<(String, String, StationConfigEntry)>,
    cache: HashMap<String, StationConfigEntry>,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            entries: vec![(
                "*".into(),
                "*".into(),
                StationConfigEntry {
                    usage: 1,
                    max_nuc_dist: 180.0,
                },
            )],
            cache: HashMap::new(),
        }
    }
}

impl StationConfig {
    /// Read the configuration file, replacing any previous content.
    pub fn read(&mut self, path: impl AsRef<Path>) -> Result<usize, ModelError> {
        let text = std::fs::read_to_string(path)?;
        self.entries.clear();
        self.cache.clear();

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                return Err(ModelError::StationConfig {
                    line: lineno + 1,
                    reason: format!("expected 4 fields, got {}", fields.len()),
                });
            }
            let usage: u32 = fields[2].parse().map_err(|_| ModelError::StationConfig {
                line: lineno + 1,
                reason: format!("bad usage flag {:?}", fields[2]),
            })?;
            let max_nuc_dist: f64 = fields[3].parse().map_err(|_| ModelError::StationConfig {
                line: lineno + 1,
                reason: format!("bad distance {:?}", fields[3]),
            })?;
            self.entries.push((
                fields[0].to_string(),
                fields[1].to_string(),
                StationConfigEntry {
                    usage,
                    max_nuc_dist,
                },
            ));
        }

        Ok(self.entries.len())
    }

    /// Look up the policy for a station. Missing entries yield the default
    /// (unused) entry.
    pub fn get(&mut self, net: &str, sta: &str) -> StationConfigEntry {
        let key = format!("{net}.{sta}");
        if let Some(hit) = self.cache.get(&key) {
            return *hit;
        }

        let mut best: Option<(u32, StationConfigEntry)> = None;
        for (enet, esta, entry) in &self.entries {
            let net_rank = match_rank(enet, net);
            let sta_rank = match_rank(esta, sta);
            let (Some(nr), Some(sr)) = (net_rank, sta_rank) else {
                continue;
            };
            let rank = nr * 2 + sr;
            if best.map_or(true, |(r, _)| rank > r) {
                best = Some((rank, *entry));
            }
        }

        let entry = best.map(|(_, e)| e).unwrap_or_default();
        self.cache.insert(key, entry);
        entry
    }
}

fn match_rank(pattern: &str, value: &str) -> Option<u32> {
    if pattern == "*" {
        Some(0)
    } else if pattern == value {
        Some(1)
    } else {
        None
    }
}
