//! Engine configuration: the complete key set consumed by the locator.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// All tunables of the locator engine.
///
/// Field names mirror the configuration keys; the TOML file uses the same
/// snake_case spelling. Every field has a production default, so a partial
/// file (or none at all) yields a working engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocatorConfig {
    /// Minimum defining phase count for an origin to survive refinement.
    pub min_phase_count: usize,
    /// Minimum score for publication.
    pub min_score: f64,
    /// Associated origins at or above this score skip the nucleator.
    pub min_score_bypass_nucleator: f64,
    /// Maximum acceptable RMS residual, seconds.
    pub max_rms: f64,
    /// RMS regarded as "good", seconds; used in residual trimming and the
    /// depth policy.
    pub good_rms: f64,
    /// Base half-width of the residual acceptance interval, seconds.
    pub max_residual_use: f64,
    /// Excluded arrivals with residuals beyond this are erased entirely.
    pub max_residual_keep: f64,
    /// Preferred maximum station distance, degrees; beyond it stations are
    /// trimmed while enough phases remain.
    pub max_sta_dist: f64,
    /// Maximum secondary azimuthal gap for publication, degrees.
    pub max_azi_gap_secondary: f64,
    /// Maximum depth for publication, kilometers.
    pub max_depth: f64,
    /// Lower depth bound handed to the relocator, kilometers.
    pub minimum_depth: f64,
    /// Depth used when the data cannot resolve one, kilometers.
    pub default_depth: f64,
    /// 0: never use the default depth; >= 0.9: always force it;
    /// in between: prefer it when it fits nearly as well as free depth.
    pub default_depth_stickiness: f64,
    /// Try the default depth as an alternative during refinement.
    pub try_default_depth: bool,
    /// Keep manually fixed / depth-phase depths during refinement.
    pub adopt_manual_depth: bool,
    /// PKP arrivals beyond 105 degrees are unused while at least this many
    /// defining near stations exist.
    pub min_sta_count_ignore_pkp: usize,
    /// Double the residual acceptance interval for PKP-family phases.
    pub aggressive_pkp: bool,
    /// Minimum affinity for an association candidate to be usable.
    pub min_pick_affinity: f64,
    /// Minimum SNR for automatic picks.
    pub min_pick_snr: f64,
    /// Lookback window of the recent-pick-rate gate, seconds; 0 disables.
    pub dynamic_pick_threshold_interval: f64,
    /// Enable the XXL short-circuit.
    pub xxl_enabled: bool,
    /// Amplitude threshold for the XXL flag.
    pub xxl_min_amplitude: f64,
    /// SNR threshold for the XXL flag.
    pub xxl_min_snr: f64,
    /// Minimum number of XXL picks for a preliminary origin.
    pub xxl_min_phase_count: usize,
    /// Maximum station distance for the XXL origin, degrees.
    pub xxl_max_sta_dist: f64,
    /// Deepest trial depth of the XXL origin, kilometers.
    pub xxl_max_depth: f64,
    /// Dead time after an XXL pick during which further picks on the same
    /// station are dropped, seconds.
    pub xxl_dead_time: f64,
    /// Age beyond which picks and origins are evicted, seconds; 0 disables
    /// periodic cleanup.
    pub max_age: f64,
    /// Interval between cleanup sweeps, seconds.
    pub cleanup_interval: f64,
    /// Publish early when at least this many phases were gained.
    pub publication_interval_pick_count: usize,
    /// Seconds of publication back-off per defining phase.
    pub publication_interval_time_slope: f64,
    /// Base publication back-off, seconds.
    pub publication_interval_time_intercept: f64,
    /// In playback mode, ignore the publication back-off entirely.
    pub playback_publish_immediately: bool,
    /// Reject candidate origins whose picks look like secondary phases of
    /// another origin with at least this probability.
    pub max_allowed_fake_probability: f64,
    /// Scale factor on grid-cell radii during nucleation.
    pub max_radius_factor: f64,
    /// Feed manual picks to the associator/nucleator.
    pub use_manual_picks: bool,
    /// Accept manual origins.
    pub use_manual_origins: bool,
    /// Author priority list for manual input, most trusted first.
    pub authors: Vec<String>,
    /// Playback mode: the logical clock follows the pick stream.
    pub playback: bool,
    /// Offline processing (extra diagnostics).
    pub offline: bool,
    /// Test mode (extra diagnostics, no downstream effects).
    pub test: bool,
    /// Profile name handed to the relocator.
    pub locator_profile: String,
    /// Path of the station configuration file; empty = all stations used
    /// with unlimited nucleation distance.
    pub sta_conf_file: String,
    /// Prefix of the pick log file; empty disables pick logging.
    pub pick_log_file_prefix: String,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            min_phase_count: 6,
            min_score: 8.0,
            min_score_bypass_nucleator: 40.0,
            max_rms: 3.5,
            good_rms: 1.5,
            max_residual_use: 7.0,
            max_residual_keep: 21.0,
            max_sta_dist: 180.0,
            max_azi_gap_secondary: 360.0,
            max_depth: 1000.0,
            minimum_depth: 5.0,
            default_depth: 10.0,
            default_depth_stickiness: 0.5,
            try_default_depth: true,
            adopt_manual_depth: false,
            min_sta_count_ignore_pkp: 15,
            aggressive_pkp: true,
            min_pick_affinity: 0.05,
            min_pick_snr: 3.0,
            dynamic_pick_threshold_interval: 60.0,
            xxl_enabled: false,
            xxl_min_amplitude: 10000.0,
            xxl_min_snr: 8.0,
            xxl_min_phase_count: 4,
            xxl_max_sta_dist: 10.0,
            xxl_max_depth: 100.0,
            xxl_dead_time: 120.0,
            max_age: 6.0 * 3600.0,
            cleanup_interval: 3600.0,
            publication_interval_pick_count: 20,
            publication_interval_time_slope: 0.5,
            publication_interval_time_intercept: 0.0,
            playback_publish_immediately: false,
            max_allowed_fake_probability: 0.2,
            max_radius_factor: 1.0,
            use_manual_picks: false,
            use_manual_origins: false,
            authors: Vec::new(),
            playback: false,
            offline: false,
            test: false,
            locator_profile: "iasp91".into(),
            sta_conf_file: String::new(),
            pick_log_file_prefix: String::new(),
        }
    }
}

impl LocatorConfig {
    /// Load a TOML configuration file; missing keys keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, crate::ModelError> {
        let text = std::fs::read_to_string(&path)?;
        Self::from_toml(&text)
    }

    /// Parse a TOML document; missing keys keep their defaults, unknown
    /// keys are rejected.
    pub fn from_toml(text: &str) -> Result<Self, crate::ModelError> {
        toml::from_str(text).map_err(|e| crate::ModelError::InvalidValue {
            field: "config",
            reason: e.to_string(),
        })
    }

    /// Rank of an author in the trust list: highest for the first entry,
    /// 0 for unlisted authors, 1 for everyone when the list is empty.
    pub fn author_priority(&self, author: &str) -> usize {
        if self.authors.is_empty() {
            return 1;
        }
        let n = self.authors.len();
        self.authors
            .iter()
            .position(|a| a == author)
            .map_or(0, |i| n - i)
    }
}
