//! Starts and stops groups of dependent subsystems as one unit.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};
use crate::events::{GpsChangeState, TrackerInput, TrackingState};
use crate::service::TrackingHandle;
use crate::store::PersistedTrackState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Subsystem {
    Gps,
    LiveTracking,
    OruxMaps,
    GoogleFit,
    Pebble,
    ActivityRecognition,
}

impl Subsystem {
    pub const ALL: [Subsystem; 6] = [
        Subsystem::Gps,
        Subsystem::LiveTracking,
        Subsystem::OruxMaps,
        Subsystem::GoogleFit,
        Subsystem::Pebble,
        Subsystem::ActivityRecognition,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Subsystem::Gps => "gps",
            Subsystem::LiveTracking => "live_tracking",
            Subsystem::OruxMaps => "oruxmaps",
            Subsystem::GoogleFit => "google_fit",
            Subsystem::Pebble => "pebble",
            Subsystem::ActivityRecognition => "activity_recognition",
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Subsystem {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self> {
        Subsystem::ALL
            .iter()
            .copied()
            .find(|sub| sub.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| TrackerError::UnknownSubsystem(s.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceGroup {
    Location,
    Watch,
    ActivityRecognition,
}

impl ServiceGroup {
    /// Members in start order.
    pub fn members(&self) -> &'static [Subsystem] {
        match self {
            ServiceGroup::Location => &[
                Subsystem::Gps,
                Subsystem::LiveTracking,
                Subsystem::OruxMaps,
                Subsystem::GoogleFit,
            ],
            ServiceGroup::Watch => &[Subsystem::Pebble],
            ServiceGroup::ActivityRecognition => &[Subsystem::ActivityRecognition],
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// Location refresh interval in ms, GPS only
    pub refresh_interval: Option<u32>,
}

// ─── Registry seam ───────────────────────────────────────────────────────────

/// Named start/stop targets and the list of what is currently running.
pub trait ServiceRegistry {
    fn start_service(&mut self, subsystem: Subsystem, options: &StartOptions) -> Result<()>;
    fn stop_service(&mut self, subsystem: Subsystem) -> Result<()>;
    fn running_services(&self) -> Vec<Subsystem>;
}

/// A subsystem that can be started and stopped in-process.
pub trait ManagedService: Send {
    fn start(&mut self, options: &StartOptions) -> Result<()>;
    fn stop(&mut self) -> Result<()>;

    /// Whether the service is actually up. Services that start asynchronously report their
    /// confirmed state here; the registry only lists a started service while this holds.
    fn is_active(&self) -> bool {
        true
    }
}

/// The GPS start is queued onto the tracking task, so `start` only fails when that task is
/// gone. A start the tracker later rejects is not rolled back by `begin`; it shows up as
/// `is_active() == false` once the task has applied it.
impl ManagedService for TrackingHandle {
    fn start(&mut self, options: &StartOptions) -> Result<()> {
        self.post(TrackerInput::ChangeState(GpsChangeState::start(options.refresh_interval)))
    }

    fn stop(&mut self) -> Result<()> {
        self.post(TrackerInput::ChangeState(GpsChangeState::stop()))
    }

    fn is_active(&self) -> bool {
        self.state() == TrackingState::Started
    }
}

#[derive(Default)]
pub struct InProcessRegistry {
    services: Vec<(Subsystem, Box<dyn ManagedService>)>,
    running: BTreeSet<Subsystem>,
}

impl InProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the service behind `subsystem`.
    pub fn register(&mut self, subsystem: Subsystem, service: Box<dyn ManagedService>) {
        match self.services.iter_mut().find(|(sub, _)| *sub == subsystem) {
            Some(slot) => slot.1 = service,
            None => self.services.push((subsystem, service)),
        }
    }

    pub fn with(mut self, subsystem: Subsystem, service: impl ManagedService + 'static) -> Self {
        self.register(subsystem, Box::new(service));
        self
    }

    fn service_mut(&mut self, subsystem: Subsystem) -> Result<&mut Box<dyn ManagedService>> {
        self.services
            .iter_mut()
            .find(|(sub, _)| *sub == subsystem)
            .map(|(_, service)| service)
            .ok_or_else(|| TrackerError::UnknownSubsystem(subsystem.to_string()))
    }
}

fn subsystem_failed(subsystem: Subsystem, err: TrackerError) -> TrackerError {
    TrackerError::SubsystemFailed {
        name: subsystem.to_string(),
        reason: err.to_string(),
    }
}

impl ServiceRegistry for InProcessRegistry {
    fn start_service(&mut self, subsystem: Subsystem, options: &StartOptions) -> Result<()> {
        self.service_mut(subsystem)?
            .start(options)
            .map_err(|e| subsystem_failed(subsystem, e))?;
        self.running.insert(subsystem);
        Ok(())
    }

    fn stop_service(&mut self, subsystem: Subsystem) -> Result<()> {
        let result = self
            .service_mut(subsystem)?
            .stop()
            .map_err(|e| subsystem_failed(subsystem, e));
        self.running.remove(&subsystem);
        result
    }

    fn running_services(&self) -> Vec<Subsystem> {
        self.services
            .iter()
            .filter(|(sub, service)| self.running.contains(sub) && service.is_active())
            .map(|(sub, _)| *sub)
            .collect()
    }
}

// ─── Orchestrator ────────────────────────────────────────────────────────────

pub struct ServiceOrchestrator<R: ServiceRegistry> {
    registry: R,
    state: PersistedTrackState,
}

impl<R: ServiceRegistry> ServiceOrchestrator<R> {
    pub fn new(registry: R, state: PersistedTrackState) -> Self {
        Self { registry, state }
    }

    /// Start every member of `group` in order. If one fails, the members this call already
    /// started are stopped again and the failure is returned.
    pub fn begin(&mut self, group: ServiceGroup) -> Result<()> {
        let mut started: Vec<Subsystem> = Vec::new();

        for &member in group.members() {
            let options = match member {
                Subsystem::Gps => StartOptions {
                    refresh_interval: Some(self.state.refresh_interval()),
                },
                _ => StartOptions::default(),
            };

            if let Err(e) = self.registry.start_service(member, &options) {
                log::error!("[orchestrator] {:?}: {} failed to start: {}", group, member, e);
                for &undo in started.iter().rev() {
                    if let Err(stop_err) = self.registry.stop_service(undo) {
                        log::warn!("[orchestrator] rollback of {} failed: {}", undo, stop_err);
                    }
                }
                return Err(e);
            }
            started.push(member);
        }

        log::info!("[orchestrator] {:?} started ({} services)", group, started.len());
        Ok(())
    }

    /// Stop every member of `group`. Keeps going past failures and returns the first one.
    pub fn end(&mut self, group: ServiceGroup) -> Result<()> {
        let mut first_error = None;
        for &member in group.members() {
            if let Err(e) = self.registry.stop_service(member) {
                log::warn!("[orchestrator] {:?}: {} failed to stop: {}", group, member, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                log::info!("[orchestrator] {:?} stopped", group);
                Ok(())
            }
        }
    }

    pub fn is_running(&self, subsystem: Subsystem) -> bool {
        self.registry.running_services().contains(&subsystem)
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut R {
        &mut self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{StoredValue, REFRESH_INTERVAL};

    #[derive(Clone, Debug, PartialEq)]
    enum Call {
        Start(Subsystem, StartOptions),
        Stop(Subsystem),
    }

    #[derive(Default)]
    struct RecordingRegistry {
        calls: Vec<Call>,
        running: Vec<Subsystem>,
        fail_start: Option<Subsystem>,
        fail_stop: Option<Subsystem>,
    }

    impl ServiceRegistry for RecordingRegistry {
        fn start_service(&mut self, subsystem: Subsystem, options: &StartOptions) -> Result<()> {
            self.calls.push(Call::Start(subsystem, *options));
            if self.fail_start == Some(subsystem) {
                return Err(TrackerError::SubsystemFailed {
                    name: subsystem.to_string(),
                    reason: "refused".to_string(),
                });
            }
            self.running.push(subsystem);
            Ok(())
        }

        fn stop_service(&mut self, subsystem: Subsystem) -> Result<()> {
            self.calls.push(Call::Stop(subsystem));
            self.running.retain(|s| *s != subsystem);
            if self.fail_stop == Some(subsystem) {
                return Err(TrackerError::SubsystemFailed {
                    name: subsystem.to_string(),
                    reason: "stuck".to_string(),
                });
            }
            Ok(())
        }

        fn running_services(&self) -> Vec<Subsystem> {
            self.running.clone()
        }
    }

    fn orchestrator() -> ServiceOrchestrator<RecordingRegistry> {
        let state = PersistedTrackState::in_memory();
        state
            .put(REFRESH_INTERVAL, StoredValue::Text("1500".to_string()))
            .unwrap();
        ServiceOrchestrator::new(RecordingRegistry::default(), state)
    }

    fn started(calls: &[Call]) -> Vec<Subsystem> {
        calls
            .iter()
            .filter_map(|c| match c {
                Call::Start(sub, _) => Some(*sub),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_location_group_starts_four_services() {
        let mut orch = orchestrator();
        orch.begin(ServiceGroup::Location).unwrap();
        assert_eq!(
            started(&orch.registry().calls),
            vec![
                Subsystem::Gps,
                Subsystem::LiveTracking,
                Subsystem::OruxMaps,
                Subsystem::GoogleFit
            ]
        );
    }

    #[test]
    fn test_gps_receives_refresh_interval() {
        let mut orch = orchestrator();
        orch.begin(ServiceGroup::Location).unwrap();
        let calls = &orch.registry().calls;
        assert_eq!(
            calls[0],
            Call::Start(Subsystem::Gps, StartOptions { refresh_interval: Some(1_500) })
        );
        assert_eq!(
            calls[1],
            Call::Start(Subsystem::LiveTracking, StartOptions::default())
        );
    }

    #[test]
    fn test_refresh_interval_defaults() {
        let mut orch =
            ServiceOrchestrator::new(RecordingRegistry::default(), PersistedTrackState::in_memory());
        orch.begin(ServiceGroup::Location).unwrap();
        assert_eq!(
            orch.registry().calls[0],
            Call::Start(Subsystem::Gps, StartOptions { refresh_interval: Some(1_000) })
        );
    }

    #[test]
    fn test_location_group_stops_four_services() {
        let mut orch = orchestrator();
        orch.end(ServiceGroup::Location).unwrap();
        assert_eq!(
            orch.registry().calls,
            vec![
                Call::Stop(Subsystem::Gps),
                Call::Stop(Subsystem::LiveTracking),
                Call::Stop(Subsystem::OruxMaps),
                Call::Stop(Subsystem::GoogleFit),
            ]
        );
    }

    #[test]
    fn test_single_member_groups() {
        let mut orch = orchestrator();
        orch.begin(ServiceGroup::Watch).unwrap();
        orch.begin(ServiceGroup::ActivityRecognition).unwrap();
        assert_eq!(
            started(&orch.registry().calls),
            vec![Subsystem::Pebble, Subsystem::ActivityRecognition]
        );

        orch.end(ServiceGroup::Watch).unwrap();
        assert!(!orch.is_running(Subsystem::Pebble));
        assert!(orch.is_running(Subsystem::ActivityRecognition));
    }

    #[test]
    fn test_is_running_follows_registry() {
        let mut orch = orchestrator();
        assert!(!orch.is_running(Subsystem::Gps));
        orch.begin(ServiceGroup::Location).unwrap();
        assert!(orch.is_running(Subsystem::Gps));
        assert!(!orch.is_running(Subsystem::Pebble));
        orch.end(ServiceGroup::Location).unwrap();
        assert!(!orch.is_running(Subsystem::Gps));
    }

    #[test]
    fn test_begin_rolls_back_on_failure() {
        let mut orch = orchestrator();
        orch.registry_mut().fail_start = Some(Subsystem::OruxMaps);

        let err = orch.begin(ServiceGroup::Location).unwrap_err();
        assert!(matches!(err, TrackerError::SubsystemFailed { .. }));
        assert_eq!(
            orch.registry().calls[3..],
            [
                Call::Stop(Subsystem::LiveTracking),
                Call::Stop(Subsystem::Gps)
            ]
        );
        assert!(orch.registry().running.is_empty());
        assert!(!started(&orch.registry().calls).contains(&Subsystem::GoogleFit));
    }

    #[test]
    fn test_end_continues_past_failures() {
        let mut orch = orchestrator();
        orch.begin(ServiceGroup::Location).unwrap();
        orch.registry_mut().fail_stop = Some(Subsystem::LiveTracking);

        let err = orch.end(ServiceGroup::Location).unwrap_err();
        assert_eq!(
            err,
            TrackerError::SubsystemFailed {
                name: "live_tracking".to_string(),
                reason: "stuck".to_string()
            }
        );
        assert!(orch.registry().running.is_empty());
    }

    #[test]
    fn test_subsystem_names_parse() {
        for sub in Subsystem::ALL {
            assert_eq!(sub.name().parse::<Subsystem>().unwrap(), sub);
        }
        assert!(matches!(
            "strava".parse::<Subsystem>(),
            Err(TrackerError::UnknownSubsystem(_))
        ));
    }

    // ── InProcessRegistry ──

    struct Flag {
        fail: bool,
    }

    impl ManagedService for Flag {
        fn start(&mut self, _options: &StartOptions) -> Result<()> {
            if self.fail {
                Err(TrackerError::Internal("no network".to_string()))
            } else {
                Ok(())
            }
        }

        fn stop(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_in_process_registry_tracks_running_set() {
        let mut registry = InProcessRegistry::new()
            .with(Subsystem::Pebble, Flag { fail: false })
            .with(Subsystem::ActivityRecognition, Flag { fail: true });

        registry
            .start_service(Subsystem::Pebble, &StartOptions::default())
            .unwrap();
        let err = registry
            .start_service(Subsystem::ActivityRecognition, &StartOptions::default())
            .unwrap_err();
        assert_eq!(
            err,
            TrackerError::SubsystemFailed {
                name: "activity_recognition".to_string(),
                reason: "Internal error: no network".to_string()
            }
        );
        assert_eq!(registry.running_services(), vec![Subsystem::Pebble]);

        registry.stop_service(Subsystem::Pebble).unwrap();
        assert!(registry.running_services().is_empty());
    }

    #[test]
    fn test_in_process_registry_unknown_subsystem() {
        let mut orch = ServiceOrchestrator::new(InProcessRegistry::new(), PersistedTrackState::in_memory());
        assert_eq!(
            orch.begin(ServiceGroup::Watch),
            Err(TrackerError::UnknownSubsystem("pebble".to_string()))
        );
    }

    #[tokio::test]
    async fn test_location_group_drives_tracking_service() {
        use crate::config::TrackerConfig;
        use crate::events::{EventBus, TrackingState};
        use crate::platform::{ManualClock, SimulatedPlatform};
        use crate::service::TrackingService;
        use crate::tracker::TrackingStateMachine;

        let platform = SimulatedPlatform::new(true);
        let state = PersistedTrackState::in_memory();
        state.set_refresh_interval(1_500).unwrap();
        let machine = TrackingStateMachine::new(
            TrackerConfig::default(),
            state.clone(),
            Box::new(platform.clone()),
            Box::new(platform.clone()),
            Box::new(ManualClock::new(0)),
            EventBus::new(),
        );
        let (handle, task) = TrackingService::spawn(machine);

        let registry = InProcessRegistry::new()
            .with(Subsystem::Gps, handle.clone())
            .with(Subsystem::LiveTracking, Flag { fail: false })
            .with(Subsystem::OruxMaps, Flag { fail: false })
            .with(Subsystem::GoogleFit, Flag { fail: false });
        let mut orch = ServiceOrchestrator::new(registry, state);

        orch.begin(ServiceGroup::Location).unwrap();
        assert_eq!(handle.status().await.unwrap().state, TrackingState::Started);
        assert_eq!(platform.log().location_requests, vec![1_500]);
        assert!(orch.is_running(Subsystem::Gps));

        orch.end(ServiceGroup::Location).unwrap();
        assert_eq!(handle.status().await.unwrap().state, TrackingState::Stopped);
        assert!(!orch.is_running(Subsystem::GoogleFit));

        drop(orch);
        drop(handle);
        task.await.unwrap();
    }

    /// Keeps earlier commits but refuses every new one.
    struct FullDisk(crate::store::MemoryStore);

    impl crate::store::KeyValueStore for FullDisk {
        fn get(&self, key: &str) -> Option<StoredValue> {
            self.0.get(key)
        }

        fn put(&mut self, key: &str, value: StoredValue) {
            self.0.put(key, value)
        }

        fn remove(&mut self, key: &str) {
            self.0.remove(key)
        }

        fn commit(&mut self) -> Result<()> {
            Err(TrackerError::StorageError("disk full".to_string()))
        }
    }

    #[tokio::test]
    async fn test_rejected_gps_start_is_not_reported_running() {
        use crate::config::TrackerConfig;
        use crate::events::EventBus;
        use crate::platform::{ManualClock, SimulatedPlatform};
        use crate::service::TrackingService;
        use crate::tracker::TrackingStateMachine;

        let platform = SimulatedPlatform::new(true);
        let state = PersistedTrackState::new(FullDisk(crate::store::MemoryStore::new()));
        let machine = TrackingStateMachine::new(
            TrackerConfig::default(),
            state.clone(),
            Box::new(platform.clone()),
            Box::new(platform.clone()),
            Box::new(ManualClock::new(0)),
            EventBus::new(),
        );
        let (handle, task) = TrackingService::spawn(machine);

        let registry = InProcessRegistry::new()
            .with(Subsystem::Gps, handle.clone())
            .with(Subsystem::LiveTracking, Flag { fail: false })
            .with(Subsystem::OruxMaps, Flag { fail: false })
            .with(Subsystem::GoogleFit, Flag { fail: false });
        let mut orch = ServiceOrchestrator::new(registry, state);

        // Queued start succeeds; stamping GPS_LAST_START fails inside the task
        orch.begin(ServiceGroup::Location).unwrap();
        assert_eq!(handle.status().await.unwrap().state, TrackingState::Disabled);
        assert_eq!(handle.state(), TrackingState::Disabled);
        assert!(!orch.is_running(Subsystem::Gps));
        assert!(orch.is_running(Subsystem::LiveTracking));
        assert!(platform.log().location_requests.is_empty());

        drop(orch);
        drop(handle);
        task.await.unwrap();
    }
}
