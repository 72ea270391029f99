//! Notification delivery and history write-back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

use super::model::{Alert, AlertId, History, Station};
use super::store::AlertStore;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// How the platform accepted a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryReceipt {
    /// Shown immediately.
    Delivered,
    /// Queued by the platform for a later trigger time.
    Scheduled,
}

/// The platform notification-delivery collaborator. Identifiers are
/// stable per alert, so re-delivering under the same identifier replaces
/// the pending notification instead of stacking a new one.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver_now(
        &self,
        title: &str,
        body: &str,
        identifier: &str,
    ) -> Result<DeliveryReceipt, SinkError>;

    async fn cancel(&self, identifier: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchResult {
    Delivered,
    Scheduled,
    Failed,
}

/// Turns a resolved (alert, message) pair into a user notification and
/// records one history row per successful dispatch. A `Failed` dispatch
/// writes no history and leaves the alert's state machine untouched, so
/// the next tick re-attempts instead of silently dropping it.
pub struct NotificationDispatcher {
    sink: Arc<dyn NotificationSink>,
    store: Arc<dyn AlertStore>,
    next_history_id: AtomicU64,
}

impl NotificationDispatcher {
    pub fn new(sink: Arc<dyn NotificationSink>, store: Arc<dyn AlertStore>) -> Self {
        // Seed from wall-clock millis so ids stay unique across restarts
        // without a store round-trip.
        let seed = Utc::now().timestamp_millis().unsigned_abs();
        Self {
            sink,
            store,
            next_history_id: AtomicU64::new(seed),
        }
    }

    pub fn notification_identifier(alert_id: AlertId) -> String {
        format!("wakestop-alert-{alert_id}")
    }

    /// `snooze_n` is 0 for the initial fire; re-fires carry their ordinal
    /// in the title so repeated notifications read as escalation.
    pub async fn dispatch(
        &self,
        alert: &Alert,
        station: &Station,
        body: &str,
        snooze_n: u32,
    ) -> DispatchResult {
        let title = if snooze_n == 0 {
            format!("Approaching {}", station.name)
        } else {
            format!("Approaching {} (reminder {snooze_n})", station.name)
        };
        let identifier = Self::notification_identifier(alert.id);

        let receipt = match self.sink.deliver_now(&title, body, &identifier).await {
            Ok(receipt) => receipt,
            Err(err) => {
                log::warn!("notification for alert {} failed: {}", alert.id, err);
                return DispatchResult::Failed;
            }
        };

        let entry = History {
            id: self.next_history_id.fetch_add(1, Ordering::SeqCst),
            alert_id: alert.id,
            message: body.to_string(),
            delivered_at: Utc::now(),
        };
        if let Err(err) = self.store.append_history(&entry) {
            // Retryable: the notification went out, only the record is
            // missing.
            log::warn!("history write for alert {} failed: {}", alert.id, err);
        }

        match receipt {
            DeliveryReceipt::Delivered => DispatchResult::Delivered,
            DeliveryReceipt::Scheduled => DispatchResult::Scheduled,
        }
    }

    /// Drop any pending notification for an alert (pause/delete).
    pub async fn cancel(&self, alert_id: AlertId) {
        self.sink
            .cancel(&Self::notification_identifier(alert_id))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{Persona, RepeatPattern, TriggerMode};
    use crate::core::store::JsonAlertStore;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<(String, String, String)>>,
        cancelled: Mutex<Vec<String>>,
        fail: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn deliver_now(
            &self,
            title: &str,
            body: &str,
            identifier: &str,
        ) -> Result<DeliveryReceipt, SinkError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(SinkError::Delivery("platform refused".to_string()));
            }
            self.delivered.lock().unwrap().push((
                title.to_string(),
                body.to_string(),
                identifier.to_string(),
            ));
            Ok(DeliveryReceipt::Delivered)
        }

        async fn cancel(&self, identifier: &str) {
            self.cancelled.lock().unwrap().push(identifier.to_string());
        }
    }

    fn fixtures() -> (Alert, Station) {
        let station = Station {
            id: 10,
            name: "Ofuna".to_string(),
            latitude: 35.3540,
            longitude: 139.5313,
            lines: Default::default(),
            favorite: false,
            last_used: None,
        };
        let alert = Alert {
            id: 7,
            station_id: 10,
            trigger: TriggerMode::Distance { threshold_m: 500.0 },
            arrival_at: None,
            snooze_minutes: 3,
            persona: Persona::Standard,
            active: true,
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
            repeat: RepeatPattern::None,
        };
        (alert, station)
    }

    #[tokio::test]
    async fn test_dispatch_writes_history() {
        let dir = tempdir().unwrap();
        let store = Arc::new(JsonAlertStore::new(dir.path().to_path_buf()));
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = NotificationDispatcher::new(sink.clone(), store.clone());
        let (alert, station) = fixtures();

        let result = dispatcher.dispatch(&alert, &station, "almost there", 0).await;
        assert_eq!(result, DispatchResult::Delivered);

        let delivered = sink.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, "Approaching Ofuna");
        assert_eq!(delivered[0].2, "wakestop-alert-7");

        let history = store.history_for(7).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message, "almost there");
    }

    #[tokio::test]
    async fn test_failed_dispatch_writes_no_history() {
        let dir = tempdir().unwrap();
        let store = Arc::new(JsonAlertStore::new(dir.path().to_path_buf()));
        let sink = Arc::new(RecordingSink::default());
        sink.fail.store(true, Ordering::SeqCst);
        let dispatcher = NotificationDispatcher::new(sink.clone(), store.clone());
        let (alert, station) = fixtures();

        let result = dispatcher.dispatch(&alert, &station, "almost there", 0).await;
        assert_eq!(result, DispatchResult::Failed);
        assert!(store.history_for(7).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refire_title_escalates_same_identifier() {
        let dir = tempdir().unwrap();
        let store = Arc::new(JsonAlertStore::new(dir.path().to_path_buf()));
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = NotificationDispatcher::new(sink.clone(), store.clone());
        let (alert, station) = fixtures();

        dispatcher.dispatch(&alert, &station, "b1", 0).await;
        dispatcher.dispatch(&alert, &station, "b2", 2).await;

        let delivered = sink.delivered.lock().unwrap();
        assert_eq!(delivered[1].0, "Approaching Ofuna (reminder 2)");
        // Same identifier: the platform replaces instead of stacking.
        assert_eq!(delivered[0].2, delivered[1].2);
    }

    #[tokio::test]
    async fn test_cancel_targets_alert_identifier() {
        let dir = tempdir().unwrap();
        let store = Arc::new(JsonAlertStore::new(dir.path().to_path_buf()));
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = NotificationDispatcher::new(sink.clone(), store);

        dispatcher.cancel(7).await;
        assert_eq!(
            sink.cancelled.lock().unwrap().as_slice(),
            &["wakestop-alert-7".to_string()]
        );
    }
}
