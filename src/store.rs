use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::accumulator::TrackMetrics;
use crate::error::{Result, TrackerError};
use crate::types::{GeoPoint, Units};

// ─── Keys (stable across restarts) ───────────────────────────────────────────

pub const GPS_DISTANCE: &str = "GPS_DISTANCE";
pub const GPS_ELAPSEDTIME: &str = "GPS_ELAPSEDTIME";
pub const GPS_ASCENT: &str = "GPS_ASCENT";
pub const GEOID_HEIGHT: &str = "GEOID_HEIGHT";
pub const GPS_FIRST_LOCATION_LAT: &str = "GPS_FIRST_LOCATION_LAT";
pub const GPS_FIRST_LOCATION_LON: &str = "GPS_FIRST_LOCATION_LON";
pub const GPS_LAST_START: &str = "GPS_LAST_START";
pub const UNITS_OF_MEASURE: &str = "UNITS_OF_MEASURE";
pub const REFRESH_INTERVAL: &str = "REFRESH_INTERVAL";

pub const DEFAULT_REFRESH_INTERVAL_MS: u32 = 1_000;

// ─── Raw key/value layer ─────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

/// Durable key/value storage. Writes are staged until `commit`.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Option<StoredValue>;
    fn put(&mut self, key: &str, value: StoredValue);
    fn remove(&mut self, key: &str);
    fn commit(&mut self) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: BTreeMap<String, StoredValue>,
    commits: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commit_count(&self) -> usize {
        self.commits
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<StoredValue> {
        self.values.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: StoredValue) {
        self.values.insert(key.to_string(), value);
    }

    fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }

    fn commit(&mut self) -> Result<()> {
        self.commits += 1;
        Ok(())
    }
}

/// JSON document on disk. `commit` writes a sibling temp file, syncs it and renames it over
/// the target so a crash never leaves a half-written state file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: BTreeMap<String, StoredValue>,
}

impl JsonFileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = if path.exists() {
            let text = fs::read_to_string(&path)?;
            if text.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&text)?
            }
        } else {
            BTreeMap::new()
        };
        log::debug!("[store] opened {} ({} keys)", path.display(), values.len());
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<StoredValue> {
        self.values.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: StoredValue) {
        self.values.insert(key.to_string(), value);
    }

    fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }

    fn commit(&mut self) -> Result<()> {
        let json = serde_json::to_vec_pretty(&self.values)?;
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Records the value each key held before its first write.
struct Transaction<'a> {
    inner: &'a mut dyn KeyValueStore,
    undo: Vec<(String, Option<StoredValue>)>,
}

impl<'a> Transaction<'a> {
    fn new(inner: &'a mut dyn KeyValueStore) -> Self {
        Self {
            inner,
            undo: Vec::new(),
        }
    }

    fn remember(&mut self, key: &str) {
        if !self.undo.iter().any(|(k, _)| k == key) {
            self.undo.push((key.to_string(), self.inner.get(key)));
        }
    }

    fn into_undo(self) -> Vec<(String, Option<StoredValue>)> {
        self.undo
    }
}

impl KeyValueStore for Transaction<'_> {
    fn get(&self, key: &str) -> Option<StoredValue> {
        self.inner.get(key)
    }

    fn put(&mut self, key: &str, value: StoredValue) {
        self.remember(key);
        self.inner.put(key, value);
    }

    fn remove(&mut self, key: &str) {
        self.remember(key);
        self.inner.remove(key);
    }

    fn commit(&mut self) -> Result<()> {
        // The enclosing write commits once all staged changes are in.
        Ok(())
    }
}

// ─── Typed schema over the raw store ─────────────────────────────────────────

/// Shared handle to the persisted tracking state.
///
/// Clones share the same underlying store, so the tracker and the orchestrator see the same
/// preferences. Malformed values fall back to their documented defaults.
#[derive(Clone)]
pub struct PersistedTrackState {
    store: Arc<Mutex<Box<dyn KeyValueStore>>>,
}

impl PersistedTrackState {
    pub fn new(store: impl KeyValueStore + 'static) -> Self {
        Self {
            store: Arc::new(Mutex::new(Box::new(store))),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    fn read(&self, key: &str) -> Option<StoredValue> {
        self.store.lock().ok().and_then(|s| s.get(key))
    }

    /// Apply `f` and commit. On a failed commit every key `f` touched is put back to its prior
    /// value, so the error leaves the store as it was.
    fn write<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut dyn KeyValueStore),
    {
        let mut store = self
            .store
            .lock()
            .map_err(|_| TrackerError::Internal("Failed to acquire store lock".to_string()))?;

        let mut txn = Transaction::new(&mut **store);
        f(&mut txn);
        let undo = txn.into_undo();

        store.commit().map_err(|e| {
            log::warn!("[store] commit failed, rolling back {} keys: {}", undo.len(), e);
            for (key, previous) in undo.into_iter().rev() {
                match previous {
                    Some(value) => store.put(&key, value),
                    None => store.remove(&key),
                }
            }
            e
        })
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        match self.read(key) {
            Some(StoredValue::Float(v)) if v.is_finite() => v,
            Some(StoredValue::Int(v)) => v as f64,
            None => default,
            Some(other) => {
                log::warn!("[store] {} holds {:?}, expected float; using {}", key, other, default);
                default
            }
        }
    }

    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        match self.read(key) {
            Some(StoredValue::Int(v)) => v,
            None => default,
            Some(other) => {
                log::warn!("[store] {} holds {:?}, expected integer; using {}", key, other, default);
                default
            }
        }
    }

    pub fn get_text(&self, key: &str) -> Option<String> {
        match self.read(key)? {
            StoredValue::Text(s) => Some(s),
            StoredValue::Int(v) => Some(v.to_string()),
            other => {
                log::warn!("[store] {} holds {:?}, expected text", key, other);
                None
            }
        }
    }

    pub fn put(&self, key: &str, value: StoredValue) -> Result<()> {
        self.write(|s| s.put(key, value))
    }

    // ── Track metrics ──

    pub fn load_metrics(&self) -> TrackMetrics {
        // A 0.0/0.0 pair is how older state files spell "no reference point".
        let lat = self.get_f64(GPS_FIRST_LOCATION_LAT, 0.0);
        let lon = self.get_f64(GPS_FIRST_LOCATION_LON, 0.0);
        let reference_point = if lat != 0.0 || lon != 0.0 {
            Some(GeoPoint::new(lat, lon))
        } else {
            None
        };

        TrackMetrics {
            distance: self.get_f64(GPS_DISTANCE, 0.0).max(0.0),
            elapsed_time_ms: self.get_i64(GPS_ELAPSEDTIME, 0).max(0),
            ascent: self.get_f64(GPS_ASCENT, 0.0).max(0.0),
            geoid_height: self.get_f64(GEOID_HEIGHT, 0.0),
            reference_point,
        }
    }

    pub fn save_metrics(&self, metrics: &TrackMetrics) -> Result<()> {
        self.write(|s| {
            s.put(GPS_DISTANCE, StoredValue::Float(metrics.distance));
            s.put(GPS_ELAPSEDTIME, StoredValue::Int(metrics.elapsed_time_ms));
            s.put(GPS_ASCENT, StoredValue::Float(metrics.ascent));
            s.put(GEOID_HEIGHT, StoredValue::Float(metrics.geoid_height));
            if let Some(reference) = metrics.reference_point {
                s.put(GPS_FIRST_LOCATION_LAT, StoredValue::Float(reference.latitude));
                s.put(GPS_FIRST_LOCATION_LON, StoredValue::Float(reference.longitude));
            }
        })
    }

    /// Zero the accumulated metrics and forget the reference point. Geoid height is kept.
    pub fn reset_metrics(&self) -> Result<()> {
        self.write(|s| {
            s.put(GPS_DISTANCE, StoredValue::Float(0.0));
            s.put(GPS_ELAPSEDTIME, StoredValue::Int(0));
            s.put(GPS_ASCENT, StoredValue::Float(0.0));
            s.remove(GPS_FIRST_LOCATION_LAT);
            s.remove(GPS_FIRST_LOCATION_LON);
        })
    }

    // ── Session / preferences ──

    pub fn set_last_start(&self, timestamp_ms: i64) -> Result<()> {
        self.put(GPS_LAST_START, StoredValue::Int(timestamp_ms))
    }

    pub fn last_start(&self) -> Option<i64> {
        match self.read(GPS_LAST_START)? {
            StoredValue::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn units(&self) -> Units {
        self.get_text(UNITS_OF_MEASURE)
            .map(|s| Units::from_preference(&s))
            .unwrap_or_default()
    }

    pub fn set_units(&self, units: Units) -> Result<()> {
        self.put(
            UNITS_OF_MEASURE,
            StoredValue::Text(units.preference_value().to_string()),
        )
    }

    /// Location refresh interval in ms; accepts an integer or a numeric string.
    pub fn refresh_interval(&self) -> u32 {
        let parsed = match self.read(REFRESH_INTERVAL) {
            Some(StoredValue::Int(v)) => u32::try_from(v).ok(),
            Some(StoredValue::Text(s)) => s.trim().parse::<u32>().ok(),
            _ => None,
        };
        match parsed {
            Some(v) if v > 0 => v,
            _ => DEFAULT_REFRESH_INTERVAL_MS,
        }
    }

    pub fn set_refresh_interval(&self, interval_ms: u32) -> Result<()> {
        self.put(REFRESH_INTERVAL, StoredValue::Int(interval_ms as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Memory store whose commits fail while `failing` is set.
    struct FailingStore {
        inner: MemoryStore,
        failing: Arc<std::sync::atomic::AtomicBool>,
    }

    impl KeyValueStore for FailingStore {
        fn get(&self, key: &str) -> Option<StoredValue> {
            self.inner.get(key)
        }

        fn put(&mut self, key: &str, value: StoredValue) {
            self.inner.put(key, value);
        }

        fn remove(&mut self, key: &str) {
            self.inner.remove(key);
        }

        fn commit(&mut self) -> Result<()> {
            if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(TrackerError::StorageError("disk full".to_string()));
            }
            self.inner.commit()
        }
    }

    fn failing_state() -> (PersistedTrackState, Arc<std::sync::atomic::AtomicBool>) {
        let failing = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let store = FailingStore {
            inner: MemoryStore::new(),
            failing: failing.clone(),
        };
        (PersistedTrackState::new(store), failing)
    }

    fn temp_path(name: &str) -> PathBuf {
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        std::env::temp_dir().join(format!(
            "ride_tracker_{}_{}_{}.json",
            name,
            std::process::id(),
            nanos
        ))
    }

    #[test]
    fn test_defaults_on_empty_store() {
        let state = PersistedTrackState::in_memory();
        let metrics = state.load_metrics();
        assert_eq!(metrics, TrackMetrics::default());
        assert_eq!(state.units(), Units::Metric);
        assert_eq!(state.refresh_interval(), 1_000);
        assert_eq!(state.last_start(), None);
    }

    #[test]
    fn test_metrics_roundtrip() {
        let state = PersistedTrackState::in_memory();
        let metrics = TrackMetrics {
            distance: 1234.5,
            elapsed_time_ms: 600_000,
            ascent: 87.25,
            geoid_height: 46.9,
            reference_point: Some(GeoPoint::new(48.1, 11.5)),
        };
        state.save_metrics(&metrics).unwrap();
        assert_eq!(state.load_metrics(), metrics);
    }

    #[test]
    fn test_type_mismatch_falls_back_to_default() {
        let state = PersistedTrackState::in_memory();
        state.put(GPS_ASCENT, StoredValue::Text("lots".to_string())).unwrap();
        state.put(GPS_ELAPSEDTIME, StoredValue::Float(12.5)).unwrap();
        state.put(GPS_DISTANCE, StoredValue::Int(42)).unwrap();

        let metrics = state.load_metrics();
        assert_eq!(metrics.ascent, 0.0);
        assert_eq!(metrics.elapsed_time_ms, 0);
        assert_eq!(metrics.distance, 42.0);
    }

    #[test]
    fn test_zero_reference_means_absent() {
        let state = PersistedTrackState::in_memory();
        state.put(GPS_FIRST_LOCATION_LAT, StoredValue::Float(0.0)).unwrap();
        state.put(GPS_FIRST_LOCATION_LON, StoredValue::Float(0.0)).unwrap();
        assert_eq!(state.load_metrics().reference_point, None);
    }

    #[test]
    fn test_reset_keeps_geoid_height() {
        let state = PersistedTrackState::in_memory();
        state
            .save_metrics(&TrackMetrics {
                distance: 10.0,
                elapsed_time_ms: 1000,
                ascent: 3.0,
                geoid_height: 47.0,
                reference_point: Some(GeoPoint::new(1.0, 1.0)),
            })
            .unwrap();
        state.reset_metrics().unwrap();

        let metrics = state.load_metrics();
        assert_eq!(metrics.distance, 0.0);
        assert_eq!(metrics.elapsed_time_ms, 0);
        assert_eq!(metrics.ascent, 0.0);
        assert_eq!(metrics.reference_point, None);
        assert_eq!(metrics.geoid_height, 47.0);
    }

    #[test]
    fn test_preferences_parsing() {
        let state = PersistedTrackState::in_memory();
        state.put(UNITS_OF_MEASURE, StoredValue::Text("1".to_string())).unwrap();
        assert_eq!(state.units(), Units::Imperial);
        state.put(UNITS_OF_MEASURE, StoredValue::Text("imperial".to_string())).unwrap();
        assert_eq!(state.units(), Units::Metric);

        state.put(REFRESH_INTERVAL, StoredValue::Text("1500".to_string())).unwrap();
        assert_eq!(state.refresh_interval(), 1500);
        state.put(REFRESH_INTERVAL, StoredValue::Text("soon".to_string())).unwrap();
        assert_eq!(state.refresh_interval(), 1000);
        state.set_refresh_interval(2500).unwrap();
        assert_eq!(state.refresh_interval(), 2500);
    }

    #[test]
    fn test_clones_share_store() {
        let a = PersistedTrackState::in_memory();
        let b = a.clone();
        a.set_last_start(99).unwrap();
        assert_eq!(b.last_start(), Some(99));
    }

    #[test]
    fn test_json_file_store_survives_reopen() {
        let path = temp_path("reopen");
        {
            let state = PersistedTrackState::new(JsonFileStore::open(&path).unwrap());
            state
                .save_metrics(&TrackMetrics {
                    distance: 500.0,
                    elapsed_time_ms: 90_000,
                    ascent: 12.0,
                    geoid_height: 0.0,
                    reference_point: Some(GeoPoint::new(45.0, 7.0)),
                })
                .unwrap();
            state.set_units(Units::Imperial).unwrap();
        }

        let reopened = PersistedTrackState::new(JsonFileStore::open(&path).unwrap());
        let metrics = reopened.load_metrics();
        assert_eq!(metrics.distance, 500.0);
        assert_eq!(metrics.elapsed_time_ms, 90_000);
        assert_eq!(metrics.ascent, 12.0);
        assert_eq!(metrics.reference_point, Some(GeoPoint::new(45.0, 7.0)));
        assert_eq!(reopened.units(), Units::Imperial);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_json_file_store_rejects_corrupt_file() {
        let path = temp_path("corrupt");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            JsonFileStore::open(&path),
            Err(TrackerError::StorageError(_))
        ));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_memory_store_counts_commits() {
        let mut store = MemoryStore::new();
        store.put(GPS_DISTANCE, StoredValue::Float(1.0));
        store.remove(GPS_ASCENT);
        assert_eq!(store.commit_count(), 0);
        store.commit().unwrap();
        assert_eq!(store.commit_count(), 1);
        assert_eq!(store.get(GPS_DISTANCE), Some(StoredValue::Float(1.0)));
    }

    #[test]
    fn test_failed_commit_rolls_back_put() {
        let (state, failing) = failing_state();
        state.set_refresh_interval(2_000).unwrap();

        failing.store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(matches!(
            state.set_refresh_interval(5_000),
            Err(TrackerError::StorageError(_))
        ));
        assert!(state.set_units(Units::Imperial).is_err());
        assert_eq!(state.refresh_interval(), 2_000);
        assert_eq!(state.get_text(UNITS_OF_MEASURE), None);
    }

    #[test]
    fn test_failed_reset_keeps_saved_metrics() {
        let (state, failing) = failing_state();
        let saved = TrackMetrics {
            distance: 1111.9,
            elapsed_time_ms: 10_000,
            ascent: 4.5,
            geoid_height: 46.9,
            reference_point: Some(GeoPoint::new(45.0, 7.0)),
        };
        state.save_metrics(&saved).unwrap();

        failing.store(true, std::sync::atomic::Ordering::SeqCst);
        assert!(state.reset_metrics().is_err());
        assert_eq!(state.load_metrics(), saved);

        // Failed save leaves the earlier values too.
        let newer = TrackMetrics {
            distance: 2000.0,
            ..saved.clone()
        };
        assert!(state.save_metrics(&newer).is_err());
        assert_eq!(state.load_metrics(), saved);

        failing.store(false, std::sync::atomic::Ordering::SeqCst);
        state.reset_metrics().unwrap();
        assert_eq!(state.load_metrics().distance, 0.0);
        assert_eq!(state.load_metrics().reference_point, None);
    }
}
