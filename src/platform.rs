//! Seams to the host platform: location provider, pressure sensor and wall clock.
//!
//! Subscription calls are synchronous and must not block. The simulated implementations
//! here back the replay binary and the tests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub trait LocationProvider: Send {
    fn is_enabled(&self) -> bool;
    fn request_location_updates(&mut self, interval_ms: u32, min_distance_m: f32);
    fn remove_location_updates(&mut self);
    fn add_nmea_listener(&mut self);
    fn remove_nmea_listener(&mut self);
}

pub trait PressureSensor: Send {
    /// Returns false when the device has no barometer.
    fn register(&mut self, sampling_period: Duration) -> bool;
    fn unregister(&mut self);
}

pub trait Clock: Send {
    fn now_millis(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock driven by the caller, e.g. from replayed fix timestamps.
#[derive(Clone, Default)]
pub struct ManualClock {
    now_ms: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

// ─── Simulated platform ──────────────────────────────────────────────────────

/// Record of every subscription call made against a [`SimulatedPlatform`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubscriptionLog {
    /// Interval of every `request_location_updates` call, in order
    pub location_requests: Vec<u32>,
    pub location_removals: u32,
    pub nmea_registrations: u32,
    pub nmea_removals: u32,
    pub pressure_registrations: u32,
    pub pressure_removals: u32,
    pub location_active: bool,
    pub nmea_active: bool,
    pub pressure_active: bool,
}

#[derive(Debug)]
struct PlatformState {
    gps_enabled: bool,
    has_barometer: bool,
    log: SubscriptionLog,
}

/// In-process stand-in for the device location and sensor services.
/// Clones share state, so a test can keep one and hand another to the tracker.
#[derive(Clone, Debug)]
pub struct SimulatedPlatform {
    state: Arc<Mutex<PlatformState>>,
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self::new(true)
    }
}

impl SimulatedPlatform {
    pub fn new(gps_enabled: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(PlatformState {
                gps_enabled,
                has_barometer: true,
                log: SubscriptionLog::default(),
            })),
        }
    }

    pub fn without_barometer(self) -> Self {
        self.with_state(|s| s.has_barometer = false);
        self
    }

    pub fn set_gps_enabled(&self, enabled: bool) {
        self.with_state(|s| s.gps_enabled = enabled);
    }

    pub fn log(&self) -> SubscriptionLog {
        self.state
            .lock()
            .map(|s| s.log.clone())
            .unwrap_or_default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut PlatformState) -> R) -> R {
        match self.state.lock() {
            Ok(mut state) => f(&mut state),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

impl LocationProvider for SimulatedPlatform {
    fn is_enabled(&self) -> bool {
        self.with_state(|s| s.gps_enabled)
    }

    fn request_location_updates(&mut self, interval_ms: u32, _min_distance_m: f32) {
        self.with_state(|s| {
            s.log.location_requests.push(interval_ms);
            s.log.location_active = true;
        });
    }

    fn remove_location_updates(&mut self) {
        self.with_state(|s| {
            s.log.location_removals += 1;
            s.log.location_active = false;
        });
    }

    fn add_nmea_listener(&mut self) {
        self.with_state(|s| {
            s.log.nmea_registrations += 1;
            s.log.nmea_active = true;
        });
    }

    fn remove_nmea_listener(&mut self) {
        self.with_state(|s| {
            s.log.nmea_removals += 1;
            s.log.nmea_active = false;
        });
    }
}

impl PressureSensor for SimulatedPlatform {
    fn register(&mut self, _sampling_period: Duration) -> bool {
        self.with_state(|s| {
            if !s.has_barometer {
                return false;
            }
            s.log.pressure_registrations += 1;
            s.log.pressure_active = true;
            true
        })
    }

    fn unregister(&mut self) {
        self.with_state(|s| {
            s.log.pressure_removals += 1;
            s.log.pressure_active = false;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_000);
        let shared = clock.clone();
        clock.advance(500);
        assert_eq!(shared.now_millis(), 1_500);
        shared.set(10);
        assert_eq!(clock.now_millis(), 10);
    }

    #[test]
    fn test_simulated_platform_records_calls() {
        let platform = SimulatedPlatform::new(true);
        let mut provider = platform.clone();
        provider.request_location_updates(1_000, 2.0);
        provider.add_nmea_listener();
        provider.remove_location_updates();

        let log = platform.log();
        assert_eq!(log.location_requests, vec![1_000]);
        assert_eq!(log.location_removals, 1);
        assert!(!log.location_active);
        assert!(log.nmea_active);
    }

    #[test]
    fn test_missing_barometer() {
        let mut platform = SimulatedPlatform::new(true).without_barometer();
        assert!(!PressureSensor::register(&mut platform, Duration::from_secs(3)));
        assert_eq!(platform.log().pressure_registrations, 0);
    }

    #[test]
    fn test_system_clock_is_recent() {
        // 2020-01-01
        assert!(SystemClock.now_millis() > 1_577_836_800_000);
    }
}
