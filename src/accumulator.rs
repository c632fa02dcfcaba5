// accumulator.rs: running distance, time and ascent for one tracking session
//
// Pure computation: fixes and pressure samples in, deltas out. Persistence and event
// publication belong to the tracker; nothing here touches the store or the bus.

use serde::{Deserialize, Serialize};

use crate::barometer::BarometricAltitudeFilter;
use crate::config::TrackerConfig;
use crate::geodesy::{self, CoordinateProjector};
use crate::types::{GeoPoint, GpsFix, SensorSample};

/// Accumulated session metrics, mirrored in the persisted state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackMetrics {
    /// Meters
    pub distance: f64,
    pub elapsed_time_ms: i64,
    /// Meters of positive barometric gain
    pub ascent: f64,
    pub geoid_height: f64,
    /// First accepted fix of the session, origin of the planar projection
    pub reference_point: Option<GeoPoint>,
}

/// What one accepted fix changed.
#[derive(Clone, Debug, PartialEq)]
pub struct LocationDelta {
    pub x: i32,
    pub y: i32,
    pub distance_increment: f64,
    pub elapsed_increment_ms: i64,
    /// This fix became the reference point
    pub first_fix: bool,
    pub beyond_projection_radius: bool,
}

pub struct LocationAccumulator {
    metrics: TrackMetrics,
    projector: CoordinateProjector,
    altimeter: BarometricAltitudeFilter,
    max_accuracy_m: f64,

    previous_fix: Option<GpsFix>,
    last_filtered_altitude: Option<f64>,

    // Display state
    speed: f64,
    bearing: Option<f64>,
    gps_altitude: Option<f64>,
    radius_warning_logged: bool,
}

impl LocationAccumulator {
    pub fn new(config: &TrackerConfig) -> Self {
        Self::with_metrics(config, TrackMetrics::default())
    }

    /// Resume from previously persisted metrics.
    pub fn with_metrics(config: &TrackerConfig, metrics: TrackMetrics) -> Self {
        let mut altimeter = BarometricAltitudeFilter::new(
            config.altitude_smoothing_window,
            config.sea_level_pressure_hpa,
        );
        altimeter.set_geoid_height(metrics.geoid_height);

        Self {
            metrics,
            projector: CoordinateProjector::new(
                config.display_unit_divisor,
                config.projection_radius_m,
            ),
            altimeter,
            max_accuracy_m: config.max_accuracy_m,
            previous_fix: None,
            last_filtered_altitude: None,
            speed: 0.0,
            bearing: None,
            gps_altitude: None,
            radius_warning_logged: false,
        }
    }

    // ── Feeds ────────────────────────────────────────────────────────────

    /// Feed a GPS fix. Returns `None` when the fix is rejected; metrics are then untouched.
    pub fn accept(&mut self, fix: &GpsFix) -> Option<LocationDelta> {
        let position = fix.position();
        if !position.is_finite() {
            log::debug!("[gps] rejecting non-finite fix {:?}", position);
            return None;
        }
        if !(fix.accuracy <= self.max_accuracy_m) {
            log::debug!(
                "[gps] rejecting fix with accuracy {:.1} m (limit {:.1} m)",
                fix.accuracy,
                self.max_accuracy_m
            );
            return None;
        }

        let reference = match self.metrics.reference_point {
            Some(reference) => reference,
            None => {
                log::info!(
                    "[gps] reference point set at ({:.6}, {:.6})",
                    position.latitude,
                    position.longitude
                );
                self.metrics.reference_point = Some(position);
                self.radius_warning_logged = false;
                self.previous_fix = Some(fix.clone());
                self.update_display_state(fix, 0.0, 0);
                return Some(LocationDelta {
                    x: 0,
                    y: 0,
                    distance_increment: 0.0,
                    elapsed_increment_ms: 0,
                    first_fix: true,
                    beyond_projection_radius: false,
                });
            }
        };

        let (distance_increment, elapsed_increment_ms) = match &self.previous_fix {
            Some(prev) => (
                geodesy::great_circle_distance(&prev.position(), &position),
                fix.timestamp_ms.saturating_sub(prev.timestamp_ms).max(0),
            ),
            None => (0.0, 0),
        };

        self.metrics.distance += distance_increment;
        self.metrics.elapsed_time_ms =
            self.metrics.elapsed_time_ms.saturating_add(elapsed_increment_ms);

        let projection = self.projector.project(&reference, &position);
        if projection.beyond_radius && !self.radius_warning_logged {
            log::warn!(
                "[gps] position is outside the projection radius of the reference point; \
                 map offsets lose accuracy until the session is reset"
            );
            self.radius_warning_logged = true;
        }

        self.update_display_state(fix, distance_increment, elapsed_increment_ms);
        self.previous_fix = Some(fix.clone());

        Some(LocationDelta {
            x: projection.x,
            y: projection.y,
            distance_increment,
            elapsed_increment_ms,
            first_fix: false,
            beyond_projection_radius: projection.beyond_radius,
        })
    }

    /// Feed a pressure sample. Returns the ascent increment it produced, or `None` if the
    /// altimeter dropped the sample.
    pub fn accept_pressure(&mut self, sample: &SensorSample) -> Option<f64> {
        let filtered = self.altimeter.accept(sample)?;
        Some(self.accept_altitude(filtered))
    }

    /// Account a filtered altitude. Only climbs count toward ascent.
    pub fn accept_altitude(&mut self, filtered_altitude: f64) -> f64 {
        let increment = match self.last_filtered_altitude {
            Some(prev) => (filtered_altitude - prev).max(0.0),
            None => 0.0,
        };
        self.last_filtered_altitude = Some(filtered_altitude);
        self.metrics.ascent += increment;
        increment
    }

    /// Update the geoid calibration without registering the shift as ascent.
    pub fn set_geoid_height(&mut self, geoid_height: f64) {
        let shift = geoid_height - self.metrics.geoid_height;
        if let Some(prev) = self.last_filtered_altitude.as_mut() {
            *prev += shift;
        }
        self.altimeter.set_geoid_height(geoid_height);
        self.metrics.geoid_height = geoid_height;
    }

    /// Zero distance, time and ascent and forget the reference point. Geoid height survives.
    pub fn reset(&mut self) {
        self.metrics = TrackMetrics {
            geoid_height: self.metrics.geoid_height,
            ..TrackMetrics::default()
        };
        self.previous_fix = None;
        self.last_filtered_altitude = None;
        self.altimeter.reset();
        self.speed = 0.0;
        self.bearing = None;
        self.gps_altitude = None;
        self.radius_warning_logged = false;
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn metrics(&self) -> &TrackMetrics {
        &self.metrics
    }

    /// Meters per second, from the receiver when it reports speed
    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn average_speed(&self) -> f64 {
        if self.metrics.elapsed_time_ms > 0 {
            self.metrics.distance / (self.metrics.elapsed_time_ms as f64 / 1000.0)
        } else {
            0.0
        }
    }

    pub fn bearing(&self) -> Option<f64> {
        self.bearing
    }

    /// Altitude above mean sea level: barometric when available, else GPS.
    pub fn altitude(&self) -> Option<f64> {
        self.last_filtered_altitude
            .or(self.gps_altitude)
            .map(|alt| alt - self.metrics.geoid_height)
    }

    pub fn last_fix_timestamp_ms(&self) -> Option<i64> {
        self.previous_fix.as_ref().map(|f| f.timestamp_ms)
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    fn update_display_state(&mut self, fix: &GpsFix, distance: f64, elapsed_ms: i64) {
        self.speed = match fix.speed {
            Some(speed) if speed.is_finite() && speed >= 0.0 => speed,
            _ if elapsed_ms > 0 => distance / (elapsed_ms as f64 / 1000.0),
            _ => self.speed,
        };
        if let Some(bearing) = fix.bearing.filter(|b| b.is_finite()) {
            self.bearing = Some(bearing);
        } else if let Some(prev) = &self.previous_fix {
            if distance > 0.0 {
                self.bearing = Some(geodesy::bearing(&prev.position(), &fix.position()));
            }
        }
        if let Some(alt) = fix.altitude.filter(|a| a.is_finite()) {
            self.gps_altitude = Some(alt);
        }
    }
}
