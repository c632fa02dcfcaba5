use crate::smoothing::HannSmoother;
use crate::types::SensorSample;

/// International standard atmosphere pressure-altitude, meters above `sea_level_hpa`.
pub fn pressure_altitude(pressure_hpa: f64, sea_level_hpa: f64) -> f64 {
    44_330.0 * (1.0 - (pressure_hpa / sea_level_hpa).powf(1.0 / 5.255))
}

/// Turns raw pressure samples into a smoothed altitude suitable for ascent accounting.
///
/// Smoothing runs on the uncorrected pressure altitude; the geoid height is added on output,
/// so changing it never disturbs the smoothing window.
pub struct BarometricAltitudeFilter {
    smoother: HannSmoother,
    sea_level_hpa: f64,
    geoid_height: f64,
    last_timestamp_ms: Option<i64>,
    last_altitude: Option<f64>,
}

impl BarometricAltitudeFilter {
    pub fn new(window_size: usize, sea_level_hpa: f64) -> Self {
        Self {
            smoother: HannSmoother::new(window_size),
            sea_level_hpa,
            geoid_height: 0.0,
            last_timestamp_ms: None,
            last_altitude: None,
        }
    }

    /// Feed one sample. Returns the filtered altitude, or `None` if the sample was dropped.
    pub fn accept(&mut self, sample: &SensorSample) -> Option<f64> {
        if !sample.pressure_hpa.is_finite() || sample.pressure_hpa <= 0.0 {
            log::debug!("[baro] dropping invalid pressure {}", sample.pressure_hpa);
            return None;
        }
        if let Some(prev_ts) = self.last_timestamp_ms {
            if sample.timestamp_ms < prev_ts {
                log::debug!(
                    "[baro] dropping out-of-order sample ({} < {})",
                    sample.timestamp_ms,
                    prev_ts
                );
                return None;
            }
        }
        self.last_timestamp_ms = Some(sample.timestamp_ms);

        let raw = pressure_altitude(sample.pressure_hpa, self.sea_level_hpa);
        let smoothed = self.smoother.apply(raw);
        let altitude = smoothed + self.geoid_height;
        self.last_altitude = Some(altitude);
        Some(altitude)
    }

    pub fn set_geoid_height(&mut self, geoid_height: f64) {
        if let Some(alt) = self.last_altitude.as_mut() {
            *alt += geoid_height - self.geoid_height;
        }
        self.geoid_height = geoid_height;
    }

    pub fn geoid_height(&self) -> f64 {
        self.geoid_height
    }

    /// Most recent filtered altitude
    pub fn altitude(&self) -> Option<f64> {
        self.last_altitude
    }

    pub fn reset(&mut self) {
        self.smoother.clear();
        self.last_timestamp_ms = None;
        self.last_altitude = None;
    }
}
