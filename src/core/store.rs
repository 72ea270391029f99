//! Persistence boundary for alert, station, and history records.
//!
//! The engine only sees the `AlertStore` trait. Failures after startup
//! are retryable (the loop logs and carries on); a failed or corrupt
//! load at startup is fatal, because arming stale or partial alert state
//! is worse than visibly failing to start.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::CoreError;
use super::model::{Alert, AlertId, History, Station, StationId};

pub trait AlertStore: Send + Sync {
    /// All alerts with `active = true`, for the startup registry load.
    fn load_active_alerts(&self) -> Result<Vec<Alert>, CoreError>;
    /// All known stations.
    fn load_stations(&self) -> Result<Vec<Station>, CoreError>;
    fn save_alert(&self, alert: &Alert) -> Result<(), CoreError>;
    fn save_station(&self, station: &Station) -> Result<(), CoreError>;
    fn append_history(&self, entry: &History) -> Result<(), CoreError>;
    /// Delete an alert and every history entry that references it.
    fn delete_alert(&self, id: AlertId) -> Result<(), CoreError>;
}

#[derive(Default)]
struct StoreState {
    alerts: HashMap<AlertId, Alert>,
    stations: HashMap<StationId, Station>,
    history: Vec<History>,
    loaded: bool,
}

/// JSON-file-backed store: one file per record kind in a data directory.
pub struct JsonAlertStore {
    data_dir: PathBuf,
    state: Mutex<StoreState>,
}

impl JsonAlertStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            state: Mutex::new(StoreState::default()),
        }
    }

    fn alerts_path(&self) -> PathBuf {
        self.data_dir.join("alerts.json")
    }

    fn stations_path(&self) -> PathBuf {
        self.data_dir.join("stations.json")
    }

    fn history_path(&self) -> PathBuf {
        self.data_dir.join("history.json")
    }

    /// Missing file means empty; an unreadable or undecodable file is an
    /// error the caller decides about.
    fn read_file<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, CoreError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn write_file<T: Serialize>(&self, path: &Path, records: &[T]) -> Result<(), CoreError> {
        fs::create_dir_all(&self.data_dir)?;
        let content = serde_json::to_string_pretty(records)?;
        fs::write(path, content)?;
        Ok(())
    }

    fn ensure_loaded(&self, state: &mut StoreState) -> Result<(), CoreError> {
        if state.loaded {
            return Ok(());
        }
        let alerts: Vec<Alert> = Self::read_file(&self.alerts_path())?;
        let stations: Vec<Station> = Self::read_file(&self.stations_path())?;
        let history: Vec<History> = Self::read_file(&self.history_path())?;

        state.alerts = alerts.into_iter().map(|a| (a.id, a)).collect();
        state.stations = stations.into_iter().map(|s| (s.id, s)).collect();
        state.history = history;
        state.loaded = true;
        Ok(())
    }

    fn flush_alerts(&self, state: &StoreState) -> Result<(), CoreError> {
        let mut records: Vec<&Alert> = state.alerts.values().collect();
        records.sort_by_key(|a| a.id);
        self.write_file(&self.alerts_path(), &records)
    }

    fn flush_stations(&self, state: &StoreState) -> Result<(), CoreError> {
        let mut records: Vec<&Station> = state.stations.values().collect();
        records.sort_by_key(|s| s.id);
        self.write_file(&self.stations_path(), &records)
    }

    fn flush_history(&self, state: &StoreState) -> Result<(), CoreError> {
        self.write_file(&self.history_path(), &state.history)
    }

    /// History rows for one alert, newest first. Used by tests and the
    /// surrounding application's history screen.
    pub fn history_for(&self, alert_id: AlertId) -> Result<Vec<History>, CoreError> {
        let mut state = self.state.lock().unwrap();
        self.ensure_loaded(&mut state)?;
        let mut rows: Vec<History> = state
            .history
            .iter()
            .filter(|h| h.alert_id == alert_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.delivered_at.cmp(&a.delivered_at));
        Ok(rows)
    }
}

impl AlertStore for JsonAlertStore {
    fn load_active_alerts(&self) -> Result<Vec<Alert>, CoreError> {
        let mut state = self.state.lock().unwrap();
        self.ensure_loaded(&mut state)?;
        let mut alerts: Vec<Alert> = state
            .alerts
            .values()
            .filter(|a| a.active)
            .cloned()
            .collect();
        alerts.sort_by_key(|a| a.id);
        Ok(alerts)
    }

    fn load_stations(&self) -> Result<Vec<Station>, CoreError> {
        let mut state = self.state.lock().unwrap();
        self.ensure_loaded(&mut state)?;
        let mut stations: Vec<Station> = state.stations.values().cloned().collect();
        stations.sort_by_key(|s| s.id);
        Ok(stations)
    }

    fn save_alert(&self, alert: &Alert) -> Result<(), CoreError> {
        let mut state = self.state.lock().unwrap();
        self.ensure_loaded(&mut state)?;
        state.alerts.insert(alert.id, alert.clone());
        self.flush_alerts(&state)
    }

    fn save_station(&self, station: &Station) -> Result<(), CoreError> {
        let mut state = self.state.lock().unwrap();
        self.ensure_loaded(&mut state)?;
        state.stations.insert(station.id, station.clone());
        self.flush_stations(&state)
    }

    fn append_history(&self, entry: &History) -> Result<(), CoreError> {
        let mut state = self.state.lock().unwrap();
        self.ensure_loaded(&mut state)?;
        state.history.push(entry.clone());
        self.flush_history(&state)
    }

    fn delete_alert(&self, id: AlertId) -> Result<(), CoreError> {
        let mut state = self.state.lock().unwrap();
        self.ensure_loaded(&mut state)?;
        state.alerts.remove(&id);
        state.history.retain(|h| h.alert_id != id);
        self.flush_alerts(&state)?;
        self.flush_history(&state)
    }
}
