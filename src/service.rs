//! Single-owner tokio task around [`TrackingStateMachine`].
//!
//! Commands and sensor callbacks from any number of [`TrackingHandle`]s are funnelled through
//! one unbounded channel and applied in arrival order. When the last handle is dropped, or
//! `shutdown` is requested, the task stops tracking and hands the state machine back through
//! its `JoinHandle`.

use crossbeam::channel::Receiver;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::accumulator::TrackMetrics;
use crate::error::{Result, TrackerError};
use crate::events::{
    ChangeRefreshInterval, EventBus, GpsChangeState, GpsStatus, HrmHeartRate, TrackerEvent,
    TrackerInput, TrackingState,
};
use crate::tracker::TrackingStateMachine;
use crate::types::{GpsFix, SensorSample};

enum Envelope {
    Input {
        input: TrackerInput,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    Status(oneshot::Sender<GpsStatus>),
    Metrics(oneshot::Sender<TrackMetrics>),
    Shutdown,
}

pub struct TrackingService;

impl TrackingService {
    /// Move the state machine onto its own task. Must be called from within a tokio runtime.
    pub fn spawn(machine: TrackingStateMachine) -> (TrackingHandle, JoinHandle<TrackingStateMachine>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(machine.state());
        let handle = TrackingHandle {
            tx,
            bus: machine.event_bus(),
            state: state_rx,
        };
        let task = tokio::spawn(run(machine, rx, state_tx));
        (handle, task)
    }
}

async fn run(
    mut machine: TrackingStateMachine,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    state_tx: watch::Sender<TrackingState>,
) -> TrackingStateMachine {
    log::debug!("[service] tracking task started");

    while let Some(envelope) = rx.recv().await {
        match envelope {
            Envelope::Input { input, reply } => {
                let result = machine.handle(input);
                if let Err(e) = &result {
                    log::error!("[service] {}", e);
                }
                state_tx.send_replace(machine.state());
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            Envelope::Status(reply) => {
                let _ = reply.send(machine.status());
            }
            Envelope::Metrics(reply) => {
                let _ = reply.send(machine.metrics().clone());
            }
            Envelope::Shutdown => break,
        }
    }

    if let Err(e) = machine.stop() {
        log::error!("[service] failed to persist session on shutdown: {}", e);
    }
    state_tx.send_replace(machine.state());
    log::debug!("[service] tracking task finished");
    machine
}

/// Cloneable front end to a running [`TrackingService`].
#[derive(Clone)]
pub struct TrackingHandle {
    tx: mpsc::UnboundedSender<Envelope>,
    bus: EventBus<TrackerEvent>,
    state: watch::Receiver<TrackingState>,
}

impl TrackingHandle {
    fn send(&self, envelope: Envelope) -> Result<()> {
        self.tx.send(envelope).map_err(|_| TrackerError::ServiceStopped)
    }

    /// Enqueue without waiting for the outcome.
    pub fn post(&self, input: TrackerInput) -> Result<()> {
        self.send(Envelope::Input { input, reply: None })
    }

    /// Enqueue and wait for the state machine's result.
    pub async fn request(&self, input: TrackerInput) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Envelope::Input { input, reply: Some(reply) })?;
        rx.await.map_err(|_| TrackerError::ServiceStopped)?
    }

    // ── Commands ──

    pub async fn start(&self, refresh_interval: Option<u32>) -> Result<()> {
        self.request(TrackerInput::ChangeState(GpsChangeState::start(refresh_interval)))
            .await
    }

    pub async fn stop(&self) -> Result<()> {
        self.request(TrackerInput::ChangeState(GpsChangeState::stop())).await
    }

    pub async fn announce(&self) -> Result<()> {
        self.request(TrackerInput::ChangeState(GpsChangeState::announce())).await
    }

    pub async fn reset(&self) -> Result<()> {
        self.request(TrackerInput::Reset).await
    }

    pub async fn change_refresh_interval(&self, interval: u32) -> Result<()> {
        self.request(TrackerInput::ChangeRefreshInterval(ChangeRefreshInterval { interval }))
            .await
    }

    // ── Sensor callbacks ──

    pub fn heart_rate(&self, bpm: u16) -> Result<()> {
        self.post(TrackerInput::HeartRate(HrmHeartRate { bpm }))
    }

    pub fn push_fix(&self, fix: GpsFix) -> Result<()> {
        self.post(TrackerInput::Location(fix))
    }

    pub fn push_pressure(&self, sample: SensorSample) -> Result<()> {
        self.post(TrackerInput::Pressure(sample))
    }

    pub fn push_nmea(&self, sentence: impl Into<String>) -> Result<()> {
        self.post(TrackerInput::Nmea(sentence.into()))
    }

    // ── Queries ──

    pub async fn status(&self) -> Result<GpsStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(Envelope::Status(reply))?;
        rx.await.map_err(|_| TrackerError::ServiceStopped)
    }

    pub async fn metrics(&self) -> Result<TrackMetrics> {
        let (reply, rx) = oneshot::channel();
        self.send(Envelope::Metrics(reply))?;
        rx.await.map_err(|_| TrackerError::ServiceStopped)
    }

    /// State after the most recently applied input. Trails anything still queued.
    pub fn state(&self) -> TrackingState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> Receiver<TrackerEvent> {
        self.bus.subscribe()
    }

    /// Ask the task to stop tracking and exit. Commands queued earlier are still applied.
    pub fn shutdown(&self) -> Result<()> {
        self.send(Envelope::Shutdown)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
