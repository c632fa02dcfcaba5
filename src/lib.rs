// Ride Tracker core library
// GPS/barometer session tracking, persisted across restarts, published over an event bus

pub mod accumulator;
pub mod barometer;
pub mod config;
pub mod error;
pub mod events;
pub mod geodesy;
pub mod nmea;
pub mod orchestrator;
pub mod platform;
pub mod service;
pub mod smoothing;
pub mod store;
pub mod tracker;
pub mod types;

pub use accumulator::{LocationAccumulator, LocationDelta, TrackMetrics};
pub use barometer::BarometricAltitudeFilter;
pub use config::TrackerConfig;
pub use error::{Result, TrackerError};
pub use events::{EventBus, GpsStatus, NewLocation, TrackerEvent, TrackerInput, TrackingState};
pub use geodesy::{CoordinateProjector, Projection};
pub use orchestrator::{
    InProcessRegistry, ManagedService, ServiceGroup, ServiceOrchestrator, ServiceRegistry,
    StartOptions, Subsystem,
};
pub use service::{TrackingHandle, TrackingService};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore, PersistedTrackState};
pub use tracker::TrackingStateMachine;
pub use types::{GeoPoint, GpsFix, SensorSample, Units};
