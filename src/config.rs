use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    // ── Fix gating ──
    /// Fixes with a horizontal accuracy worse than this (meters) are dropped.
    pub max_accuracy_m: f64,

    // ── Planar projection ──
    /// Meters per display unit on the watch map.
    pub display_unit_divisor: f64,
    /// Radius around the reference point inside which the azimuthal projection is trusted.
    pub projection_radius_m: f64,

    // ── Barometer ──
    pub sea_level_pressure_hpa: f64,
    pub altitude_smoothing_window: usize,
    pub pressure_sampling_period_ms: u64,

    // ── Location subscription ──
    pub default_refresh_interval_ms: u32,
    pub min_update_distance_m: f32,

    // ── Persistence ──
    /// 0 disables periodic saves; metrics are still persisted on stop.
    pub autosave_interval_ms: i64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_accuracy_m: 50.0,
            display_unit_divisor: 10.0,
            projection_radius_m: 10_000.0,
            sea_level_pressure_hpa: 1013.25,
            altitude_smoothing_window: 5,
            pressure_sampling_period_ms: 3_000,
            default_refresh_interval_ms: 1_000,
            min_update_distance_m: 2.0,
            autosave_interval_ms: 60_000,
        }
    }
}

impl TrackerConfig {
    /// Load a config from a JSON file. Missing fields take their default value.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: TrackerConfig = serde_json::from_str(&text)
            .map_err(|e| TrackerError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.display_unit_divisor > 0.0) {
            return Err(TrackerError::InvalidConfig(
                "display_unit_divisor must be positive".to_string(),
            ));
        }
        if !(self.max_accuracy_m > 0.0) {
            return Err(TrackerError::InvalidConfig(
                "max_accuracy_m must be positive".to_string(),
            ));
        }
        if !(self.sea_level_pressure_hpa > 0.0) {
            return Err(TrackerError::InvalidConfig(
                "sea_level_pressure_hpa must be positive".to_string(),
            ));
        }
        if self.altitude_smoothing_window == 0 {
            return Err(TrackerError::InvalidConfig(
                "altitude_smoothing_window must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
