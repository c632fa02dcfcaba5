// tracker.rs: lifecycle of one tracking session
//
// Owns the accumulator and the platform subscriptions. Every command and sensor callback
// arrives as a `TrackerInput`; outbound state leaves through the event bus.

use std::time::Duration;

use crossbeam::channel::Receiver;

use crate::accumulator::{LocationAccumulator, TrackMetrics};
use crate::config::TrackerConfig;
use crate::error::Result;
use crate::events::{
    EventBus, GpsAction, GpsChangeState, GpsStatus, NewLocation, TrackerEvent, TrackerInput,
    TrackingState,
};
use crate::nmea;
use crate::platform::{Clock, LocationProvider, PressureSensor};
use crate::store::PersistedTrackState;
use crate::types::{GpsFix, SensorSample};

pub struct TrackingStateMachine {
    config: TrackerConfig,
    state: TrackingState,
    store: PersistedTrackState,
    accumulator: LocationAccumulator,

    location: Box<dyn LocationProvider>,
    pressure: Box<dyn PressureSensor>,
    clock: Box<dyn Clock>,
    bus: EventBus<TrackerEvent>,

    refresh_interval_ms: u32,
    barometer_registered: bool,
    heart_rate: Option<u16>,
    last_save_ms: i64,
}

impl TrackingStateMachine {
    pub fn new(
        config: TrackerConfig,
        store: PersistedTrackState,
        location: Box<dyn LocationProvider>,
        pressure: Box<dyn PressureSensor>,
        clock: Box<dyn Clock>,
        bus: EventBus<TrackerEvent>,
    ) -> Self {
        let accumulator = LocationAccumulator::with_metrics(&config, store.load_metrics());
        let refresh_interval_ms = config.default_refresh_interval_ms;
        let last_save_ms = clock.now_millis();

        let mut machine = Self {
            config,
            state: TrackingState::NotInitialized,
            store,
            accumulator,
            location,
            pressure,
            clock,
            bus,
            refresh_interval_ms,
            barometer_registered: false,
            heart_rate: None,
            last_save_ms,
        };
        machine.set_state(TrackingState::Disabled);
        machine
    }

    /// Dispatch one inbound command or sensor callback.
    pub fn handle(&mut self, input: TrackerInput) -> Result<()> {
        match input {
            TrackerInput::ChangeState(GpsChangeState { action, refresh_interval }) => match action {
                GpsAction::Start => self.start(refresh_interval),
                GpsAction::Stop => self.stop(),
                GpsAction::AnnounceState => {
                    self.announce();
                    Ok(())
                }
            },
            TrackerInput::Reset => self.reset(),
            TrackerInput::ChangeRefreshInterval(change) => {
                self.change_refresh_interval(change.interval);
                Ok(())
            }
            TrackerInput::HeartRate(hr) => {
                self.on_heart_rate(hr.bpm);
                Ok(())
            }
            TrackerInput::Location(fix) => self.on_location(&fix),
            TrackerInput::Pressure(sample) => self.on_pressure(&sample),
            TrackerInput::Nmea(sentence) => {
                self.on_nmea(&sentence);
                Ok(())
            }
        }
    }

    // ─── Commands ────────────────────────────────────────────────────────────

    /// Start tracking. A no-op while already started.
    pub fn start(&mut self, refresh_interval: Option<u32>) -> Result<()> {
        if self.state == TrackingState::Started {
            log::debug!("[tracker] start ignored, already started");
            return Ok(());
        }

        let metrics = self.store.load_metrics();
        log::info!(
            "[tracker] restored session: {:.1} m, {} ms, {:.1} m ascent",
            metrics.distance,
            metrics.elapsed_time_ms,
            metrics.ascent
        );
        self.accumulator = LocationAccumulator::with_metrics(&self.config, metrics);

        if !self.location.is_enabled() {
            log::warn!("[tracker] location provider is disabled");
            self.set_state(TrackingState::Disabled);
            self.announce();
            return Ok(());
        }

        let now = self.clock.now_millis();
        self.store.set_last_start(now)?;

        self.refresh_interval_ms = refresh_interval
            .filter(|ms| *ms > 0)
            .unwrap_or(self.config.default_refresh_interval_ms);
        self.location
            .request_location_updates(self.refresh_interval_ms, self.config.min_update_distance_m);
        self.location.add_nmea_listener();
        self.barometer_registered = self
            .pressure
            .register(Duration::from_millis(self.config.pressure_sampling_period_ms));
        if !self.barometer_registered {
            log::info!("[tracker] no barometer, ascent will not accumulate");
        }

        self.last_save_ms = now;
        self.set_state(TrackingState::Started);
        self.announce();
        // Seed consumers with the restored totals before the first fix arrives
        self.publish_location(0, 0, now);
        Ok(())
    }

    /// Stop tracking. Metrics are committed before the subscriptions are released; on a
    /// storage failure the session stays started.
    pub fn stop(&mut self) -> Result<()> {
        match self.state {
            TrackingState::Started => {
                self.store.save_metrics(self.accumulator.metrics())?;
                self.release_subscriptions();
                self.set_state(TrackingState::Stopped);
                self.announce();
            }
            TrackingState::Disabled | TrackingState::NotInitialized => {
                self.set_state(TrackingState::Stopped);
                self.announce();
            }
            TrackingState::Stopped => {
                log::debug!("[tracker] stop ignored, already stopped");
            }
        }
        Ok(())
    }

    /// Re-emit the current status.
    pub fn announce(&self) {
        self.bus.publish(TrackerEvent::Status(self.status()));
    }

    /// Zero distance, time and ascent and drop the reference point, in any state.
    pub fn reset(&mut self) -> Result<()> {
        self.store.reset_metrics()?;
        self.accumulator.reset();
        self.last_save_ms = self.clock.now_millis();
        log::info!("[tracker] session reset ({:?})", self.state);
        Ok(())
    }

    pub fn change_refresh_interval(&mut self, interval_ms: u32) {
        if self.state != TrackingState::Started {
            log::debug!(
                "[tracker] refresh interval change to {} ms ignored while {:?}",
                interval_ms,
                self.state
            );
            return;
        }
        if interval_ms == 0 {
            log::warn!("[tracker] ignoring zero refresh interval");
            return;
        }
        self.location.remove_location_updates();
        self.location
            .request_location_updates(interval_ms, self.config.min_update_distance_m);
        self.refresh_interval_ms = interval_ms;
        log::info!("[tracker] refresh interval now {} ms", interval_ms);
    }

    // ─── Sensor callbacks ────────────────────────────────────────────────────

    pub fn on_location(&mut self, fix: &GpsFix) -> Result<()> {
        if self.state != TrackingState::Started {
            return Ok(());
        }
        let Some(delta) = self.accumulator.accept(fix) else {
            return Ok(());
        };

        self.publish_location(delta.x, delta.y, fix.timestamp_ms);

        if delta.first_fix {
            self.save()
        } else {
            self.autosave_if_due()
        }
    }

    pub fn on_pressure(&mut self, sample: &SensorSample) -> Result<()> {
        if self.state != TrackingState::Started {
            return Ok(());
        }
        if let Some(climb) = self.accumulator.accept_pressure(sample) {
            if climb > 0.0 {
                log::trace!("[baro] +{:.2} m", climb);
            }
        }
        self.autosave_if_due()
    }

    pub fn on_nmea(&mut self, sentence: &str) {
        if self.state != TrackingState::Started {
            return;
        }
        match nmea::parse_gga(sentence) {
            Ok(Some(gga)) => {
                if let Some(separation) = gga.geoid_separation {
                    if separation != self.accumulator.metrics().geoid_height {
                        log::debug!("[nmea] geoid height {:.1} m", separation);
                        self.accumulator.set_geoid_height(separation);
                    }
                }
            }
            Ok(None) => {}
            Err(e) => log::debug!("[nmea] dropped: {}", e),
        }
    }

    /// A zero reading clears the cached value.
    pub fn on_heart_rate(&mut self, bpm: u16) {
        self.heart_rate = (bpm > 0).then_some(bpm);
    }

    // ─── Queries ─────────────────────────────────────────────────────────────

    pub fn state(&self) -> TrackingState {
        self.state
    }

    pub fn status(&self) -> GpsStatus {
        GpsStatus { state: self.state }
    }

    pub fn metrics(&self) -> &TrackMetrics {
        self.accumulator.metrics()
    }

    pub fn refresh_interval_ms(&self) -> u32 {
        self.refresh_interval_ms
    }

    pub fn heart_rate(&self) -> Option<u16> {
        self.heart_rate
    }

    pub fn subscribe(&self) -> Receiver<TrackerEvent> {
        self.bus.subscribe()
    }

    pub fn event_bus(&self) -> EventBus<TrackerEvent> {
        self.bus.clone()
    }

    // ─── Internal helpers ────────────────────────────────────────────────────

    fn set_state(&mut self, next: TrackingState) {
        if self.state != next {
            log::info!("[tracker] {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn release_subscriptions(&mut self) {
        self.location.remove_location_updates();
        self.location.remove_nmea_listener();
        if self.barometer_registered {
            self.pressure.unregister();
            self.barometer_registered = false;
        }
    }

    fn save(&mut self) -> Result<()> {
        self.store.save_metrics(self.accumulator.metrics())?;
        self.last_save_ms = self.clock.now_millis();
        Ok(())
    }

    fn autosave_if_due(&mut self) -> Result<()> {
        let interval = self.config.autosave_interval_ms;
        if interval <= 0 || self.clock.now_millis().saturating_sub(self.last_save_ms) < interval {
            return Ok(());
        }
        log::debug!("[tracker] autosave");
        self.save()
    }

    fn publish_location(&self, x: i32, y: i32, timestamp_ms: i64) {
        let metrics = self.accumulator.metrics();
        let event = NewLocation {
            x,
            y,
            distance: metrics.distance,
            elapsed_time_ms: metrics.elapsed_time_ms,
            ascent: metrics.ascent,
            altitude: self.accumulator.altitude(),
            speed: self.accumulator.speed(),
            average_speed: self.accumulator.average_speed(),
            bearing: self.accumulator.bearing(),
            units: self.store.units(),
            heart_rate: self.heart_rate,
            timestamp_ms,
        };
        self.bus.publish(TrackerEvent::Location(event));
    }
}
