use std::sync::{Arc, Mutex};

use crossbeam::channel::{self, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::types::{GpsFix, SensorSample, Units};

// ─── Inbound commands ────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GpsAction {
    Start,
    Stop,
    AnnounceState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpsChangeState {
    pub action: GpsAction,
    /// Milliseconds; only meaningful for `Start`
    pub refresh_interval: Option<u32>,
}

impl GpsChangeState {
    pub fn start(refresh_interval: Option<u32>) -> Self {
        Self { action: GpsAction::Start, refresh_interval }
    }

    pub fn stop() -> Self {
        Self { action: GpsAction::Stop, refresh_interval: None }
    }

    pub fn announce() -> Self {
        Self { action: GpsAction::AnnounceState, refresh_interval: None }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRefreshInterval {
    pub interval: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HrmHeartRate {
    pub bpm: u16,
}

/// Everything the tracking state machine consumes, commands and sensor callbacks alike.
#[derive(Clone, Debug, PartialEq)]
pub enum TrackerInput {
    ChangeState(GpsChangeState),
    Reset,
    ChangeRefreshInterval(ChangeRefreshInterval),
    HeartRate(HrmHeartRate),
    Location(GpsFix),
    Pressure(SensorSample),
    Nmea(String),
}

// ─── Outbound events ─────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingState {
    NotInitialized,
    Disabled,
    Started,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpsStatus {
    pub state: TrackingState,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewLocation {
    /// Planar offset from the reference point, display units
    pub x: i32,
    pub y: i32,
    /// Meters
    pub distance: f64,
    pub elapsed_time_ms: i64,
    /// Meters
    pub ascent: f64,
    /// Meters above mean sea level
    pub altitude: Option<f64>,
    /// m/s
    pub speed: f64,
    pub average_speed: f64,
    pub bearing: Option<f64>,
    pub units: Units,
    pub heart_rate: Option<u16>,
    pub timestamp_ms: i64,
}

impl NewLocation {
    /// km or miles
    pub fn distance_in_units(&self) -> f64 {
        self.units.long_distance(self.distance)
    }

    /// m or ft
    pub fn ascent_in_units(&self) -> f64 {
        self.units.short_distance(self.ascent)
    }

    pub fn altitude_in_units(&self) -> Option<f64> {
        self.altitude.map(|a| self.units.short_distance(a))
    }

    /// km/h or mph
    pub fn speed_in_units(&self) -> f64 {
        self.units.speed(self.speed)
    }

    pub fn average_speed_in_units(&self) -> f64 {
        self.units.speed(self.average_speed)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TrackerEvent {
    Location(NewLocation),
    Status(GpsStatus),
}

// ─── Bus ─────────────────────────────────────────────────────────────────────

/// Typed in-process pub/sub.
///
/// Each subscriber owns the receiving end of its own channel. `publish` delivers to
/// subscribers in registration order and prunes the ones whose receiver was dropped.
/// Clones share the subscriber list.
pub struct EventBus<E> {
    subscribers: Arc<Mutex<Vec<Sender<E>>>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> Receiver<E> {
        let (tx, rx) = channel::unbounded();
        match self.subscribers.lock() {
            Ok(mut subs) => subs.push(tx),
            Err(poisoned) => poisoned.into_inner().push(tx),
        }
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl<E: Clone> EventBus<E> {
    /// Returns the number of subscribers the event reached.
    pub fn publish(&self, event: E) -> usize {
        let mut subs = match self.subscribers.lock() {
            Ok(subs) => subs,
            Err(poisoned) => poisoned.into_inner(),
        };
        subs.retain(|tx| tx.send(event.clone()).is_ok());
        subs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_subscriber_receives() {
        let bus = EventBus::<u32>::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        assert_eq!(bus.publish(7), 2);
        assert_eq!(a.try_recv().unwrap(), 7);
        assert_eq!(b.try_recv().unwrap(), 7);
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let bus = EventBus::<u32>::new();
        let keep = bus.subscribe();
        let gone = bus.subscribe();
        drop(gone);

        assert_eq!(bus.publish(1), 1);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(keep.try_recv().unwrap(), 1);
    }

    #[test]
    fn test_per_subscriber_order_is_publish_order() {
        let bus = EventBus::<u32>::new();
        let rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(i);
        }
        let got: Vec<u32> = rx.try_iter().collect();
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_clones_share_subscribers() {
        let bus = EventBus::<&'static str>::new();
        let rx = bus.subscribe();
        bus.clone().publish("hello");
        assert_eq!(rx.try_recv().unwrap(), "hello");
    }

    #[test]
    fn test_new_location_unit_helpers() {
        let loc = NewLocation {
            x: 0,
            y: 0,
            distance: 16_093.44,
            elapsed_time_ms: 3_600_000,
            ascent: 100.0,
            altitude: Some(10.0),
            speed: 10.0,
            average_speed: 4.4704,
            bearing: None,
            units: Units::Imperial,
            heart_rate: None,
            timestamp_ms: 0,
        };
        assert!((loc.distance_in_units() - 10.0).abs() < 1e-9);
        assert!((loc.ascent_in_units() - 328.084).abs() < 1e-6);
        assert!((loc.average_speed_in_units() - 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_events_serialize() {
        let json = serde_json::to_string(&TrackerEvent::Status(GpsStatus {
            state: TrackingState::Started,
        }))
        .unwrap();
        assert!(json.contains("Started"));
    }
}
