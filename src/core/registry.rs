//! In-memory authoritative set of alerts under monitoring.
//!
//! Sourced from the persistent store at startup and owned exclusively by
//! the monitoring loop; every mutation funnels through the loop's
//! command channel.

use std::collections::HashMap;

use crate::core::error::CoreError;
use crate::core::geo::distance;
use crate::core::model::{Alert, AlertId, GeoSample, Station, StationId, TriggerMode};
use crate::core::store::AlertStore;

pub struct AlertRegistry {
    alerts: HashMap<AlertId, Alert>,
    stations: HashMap<StationId, Station>,
}

impl AlertRegistry {
    pub fn new() -> Self {
        Self {
            alerts: HashMap::new(),
            stations: HashMap::new(),
        }
    }

    /// Load stations and active alerts from the store. Errors here are
    /// fatal to engine startup. Alerts referencing a station the store
    /// does not know are skipped with a warning rather than armed blind.
    pub fn from_store(store: &dyn AlertStore) -> Result<Self, CoreError> {
        let stations: HashMap<StationId, Station> = store
            .load_stations()?
            .into_iter()
            .map(|s| (s.id, s))
            .collect();

        let mut alerts = HashMap::new();
        for alert in store.load_active_alerts()? {
            if !stations.contains_key(&alert.station_id) {
                log::warn!(
                    "skipping alert {}: unknown station {}",
                    alert.id,
                    alert.station_id
                );
                continue;
            }
            alerts.insert(alert.id, alert);
        }

        log::info!(
            "registry loaded: {} alerts, {} stations",
            alerts.len(),
            stations.len()
        );
        Ok(Self { alerts, stations })
    }

    pub fn alert(&self, id: AlertId) -> Option<&Alert> {
        self.alerts.get(&id)
    }

    pub fn alert_mut(&mut self, id: AlertId) -> Option<&mut Alert> {
        self.alerts.get_mut(&id)
    }

    pub fn station(&self, id: StationId) -> Option<&Station> {
        self.stations.get(&id)
    }

    pub fn station_for(&self, alert: &Alert) -> Option<&Station> {
        self.stations.get(&alert.station_id)
    }

    pub fn upsert_alert(&mut self, alert: Alert) {
        self.alerts.insert(alert.id, alert);
    }

    pub fn upsert_station(&mut self, station: Station) {
        self.stations.insert(station.id, station);
    }

    pub fn remove_alert(&mut self, id: AlertId) -> Option<Alert> {
        self.alerts.remove(&id)
    }

    /// Flip the active flag. Returns false for an unknown id.
    pub fn set_active(&mut self, id: AlertId, active: bool) -> bool {
        match self.alerts.get_mut(&id) {
            Some(alert) => {
                alert.active = active;
                true
            }
            None => false,
        }
    }

    /// Ids of alerts currently armed (active), in stable order.
    pub fn armed_ids(&self) -> Vec<AlertId> {
        let mut ids: Vec<AlertId> = self
            .alerts
            .values()
            .filter(|a| a.active)
            .map(|a| a.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Minimum distance from the sample to any armed station with a
    /// position-driven trigger (distance or stop-count mode). Feeds the
    /// accuracy-tier selection.
    pub fn min_armed_distance_m(&self, sample: &GeoSample) -> Option<f64> {
        self.alerts
            .values()
            .filter(|a| {
                a.active
                    && matches!(
                        a.trigger,
                        TriggerMode::Distance { .. } | TriggerMode::StopCount { .. }
                    )
            })
            .filter_map(|a| self.stations.get(&a.station_id))
            .map(|station| distance::sample_to_station_m(sample, station))
            .min_by(|a, b| a.total_cmp(b))
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}

impl Default for AlertRegistry {
    fn default() -> Self {
        Self::new()
    }
}
