use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    pub fn is_finite(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }
}

/// GPS location as delivered by the platform location provider
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Ellipsoidal altitude in meters, when the receiver reports one
    #[serde(default)]
    pub altitude: Option<f64>,
    /// Horizontal accuracy radius in meters
    pub accuracy: f64,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub bearing: Option<f64>,
    pub timestamp_ms: i64,
}

impl GpsFix {
    pub fn new(latitude: f64, longitude: f64, accuracy: f64, timestamp_ms: i64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            accuracy,
            speed: None,
            bearing: None,
            timestamp_ms,
        }
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// Barometric pressure reading
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    pub pressure_hpa: f64,
    pub timestamp_ms: i64,
}

impl SensorSample {
    pub fn new(pressure_hpa: f64, timestamp_ms: i64) -> Self {
        Self { pressure_hpa, timestamp_ms }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Units {
    #[default]
    Metric,
    Imperial,
}

const METERS_PER_MILE: f64 = 1609.344;
const FEET_PER_METER: f64 = 3.280_84;

impl Units {
    /// Parse the stored preference ("0" metric, "1" imperial). Anything else is metric.
    pub fn from_preference(value: &str) -> Self {
        match value.trim().parse::<i32>() {
            Ok(1) => Units::Imperial,
            Ok(0) => Units::Metric,
            _ => {
                log::debug!("Unparsable units preference {:?}, using metric", value);
                Units::Metric
            }
        }
    }

    pub fn preference_value(&self) -> &'static str {
        match self {
            Units::Metric => "0",
            Units::Imperial => "1",
        }
    }

    /// Meters to kilometers or miles
    pub fn long_distance(&self, meters: f64) -> f64 {
        match self {
            Units::Metric => meters / 1000.0,
            Units::Imperial => meters / METERS_PER_MILE,
        }
    }

    /// Meters to meters or feet
    pub fn short_distance(&self, meters: f64) -> f64 {
        match self {
            Units::Metric => meters,
            Units::Imperial => meters * FEET_PER_METER,
        }
    }

    /// m/s to km/h or mph
    pub fn speed(&self, meters_per_second: f64) -> f64 {
        match self {
            Units::Metric => meters_per_second * 3.6,
            Units::Imperial => meters_per_second * 3600.0 / METERS_PER_MILE,
        }
    }
}
