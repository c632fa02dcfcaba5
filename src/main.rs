use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use flate2::read::GzDecoder;
use serde::Deserialize;
use serde_json::json;

use ride_tracker_rs::events::EventBus;
use ride_tracker_rs::platform::{ManualClock, SimulatedPlatform};
use ride_tracker_rs::{
    GpsFix, JsonFileStore, PersistedTrackState, SensorSample, TrackerConfig, TrackingService,
    TrackingStateMachine,
};

#[derive(Parser, Debug)]
#[command(name = "ride_tracker")]
#[command(about = "Replay a recorded ride through the tracking service", long_about = None)]
struct Args {
    /// Path to a recorded session log (.json or .json.gz)
    #[arg(long)]
    log: PathBuf,

    /// Persist tracking state to this JSON file (in-memory when omitted)
    #[arg(long)]
    store: Option<PathBuf>,

    /// Tracker configuration JSON; missing fields keep their defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Location refresh interval in ms, stored as the preference before starting
    #[arg(long)]
    refresh_interval: Option<u32>,

    /// Zero the persisted session before replaying
    #[arg(long, default_value_t = false)]
    reset: bool,
}

#[derive(Deserialize)]
struct LogFile {
    readings: Vec<Reading>,
}

#[derive(Deserialize)]
struct Reading {
    /// Seconds since the epoch
    timestamp: f64,
    #[serde(default)]
    gps: Option<GpsData>,
    #[serde(default)]
    baro: Option<BaroData>,
    #[serde(default)]
    nmea: Option<String>,
    #[serde(default)]
    heart_rate: Option<u16>,
}

#[derive(Deserialize)]
struct GpsData {
    latitude: f64,
    longitude: f64,
    accuracy: f64,
    #[serde(default)]
    altitude: Option<f64>,
    #[serde(default)]
    speed: Option<f64>,
    #[serde(default)]
    bearing: Option<f64>,
}

#[derive(Deserialize)]
struct BaroData {
    /// hPa
    pressure: f64,
}

fn load_log(path: &Path) -> anyhow::Result<LogFile> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        let reader = BufReader::new(GzDecoder::new(file));
        Ok(serde_json::from_reader(reader)?)
    } else {
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match args.config.as_ref() {
        Some(path) => TrackerConfig::from_json_file(path)?,
        None => TrackerConfig::default(),
    };
    config.validate()?;

    let log = load_log(&args.log)?;
    log::info!("loaded {} readings from {}", log.readings.len(), args.log.display());

    let state = match args.store.as_ref() {
        Some(path) => PersistedTrackState::new(JsonFileStore::open(path)?),
        None => PersistedTrackState::in_memory(),
    };
    if args.reset {
        state.reset_metrics()?;
    }
    if let Some(interval) = args.refresh_interval {
        state.set_refresh_interval(interval)?;
    }

    let first_ms = log
        .readings
        .first()
        .map(|r| (r.timestamp * 1000.0).round() as i64)
        .unwrap_or(0);
    let clock = ManualClock::new(first_ms);
    let platform = SimulatedPlatform::new(true);
    let bus = EventBus::new();
    let events = bus.subscribe();

    let machine = TrackingStateMachine::new(
        config,
        state.clone(),
        Box::new(platform.clone()),
        Box::new(platform.clone()),
        Box::new(clock.clone()),
        bus,
    );
    let (handle, task) = TrackingService::spawn(machine);
    handle.start(Some(state.refresh_interval())).await?;

    let mut gps_fixes = 0usize;
    let mut published = 0usize;
    for reading in &log.readings {
        let ts_ms = (reading.timestamp * 1000.0).round() as i64;
        clock.set(ts_ms);

        if let Some(bpm) = reading.heart_rate {
            handle.heart_rate(bpm)?;
        }
        if let Some(sentence) = reading.nmea.as_ref() {
            handle.push_nmea(sentence.as_str())?;
        }
        if let Some(baro) = reading.baro.as_ref() {
            handle.push_pressure(SensorSample::new(baro.pressure, ts_ms))?;
        }
        if let Some(gps) = reading.gps.as_ref() {
            gps_fixes += 1;
            handle.push_fix(GpsFix {
                latitude: gps.latitude,
                longitude: gps.longitude,
                altitude: gps.altitude,
                accuracy: gps.accuracy,
                speed: gps.speed,
                bearing: gps.bearing,
                timestamp_ms: ts_ms,
            })?;
        }

        // Let the service catch up before the clock moves on
        handle.status().await?;
        for event in events.try_iter() {
            println!("{}", serde_json::to_string(&event)?);
            published += 1;
        }
    }

    handle.stop().await?;
    for event in events.try_iter() {
        println!("{}", serde_json::to_string(&event)?);
        published += 1;
    }
    handle.shutdown()?;
    drop(handle);
    let machine = task.await?;

    let metrics = machine.metrics();
    let started_at = state
        .last_start()
        .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
        .map(|t| t.to_rfc3339());
    let summary = json!({
        "readings": log.readings.len(),
        "gps_fixes": gps_fixes,
        "events": published,
        "state": format!("{:?}", machine.state()),
        "started_at": started_at,
        "distance_m": metrics.distance,
        "elapsed_s": metrics.elapsed_time_ms as f64 / 1000.0,
        "ascent_m": metrics.ascent,
        "geoid_height_m": metrics.geoid_height,
        "units": format!("{:?}", state.units()),
    });
    eprintln!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
