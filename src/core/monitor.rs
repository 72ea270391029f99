//! The monitoring loop: single serialization point for alert state.
//!
//! One long-lived task owns the registry and every session state
//! machine. It wakes on a tier-dependent tick, on location samples, on
//! fire-task completions, and on external commands; whatever queued
//! while a pass was pending is absorbed into the next pass instead of
//! building a backlog. Message resolution and delivery run in detached
//! per-alert tasks so one slow resolution never blocks the evaluation of
//! other alerts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

use super::config::Settings;
use super::dispatch::{DispatchResult, NotificationDispatcher, NotificationSink};
use super::error::CoreError;
use super::geo::sampler::{LocationProvider, TierSelector};
use super::messages::remote::MessageGenerator;
use super::messages::resolver::MessageResolver;
use super::model::{Alert, AlertId, GeoSample, Station, StationId};
use super::registry::AlertRegistry;
use super::session::{AlertSession, Phase, SnoozeAction};
use super::store::AlertStore;
use super::triggers::{self, Decision, EvalContext, StopCountSource};

/// Mutation requests funneled into the loop from the outside.
#[derive(Debug)]
pub enum MonitorCommand {
    AddStation(Station),
    Create(Alert),
    Edit(Alert),
    Pause(AlertId),
    Resume(AlertId),
    Delete(AlertId),
    Shutdown,
}

/// Completion report from a detached fire task.
#[derive(Debug)]
struct FireOutcome {
    alert_id: AlertId,
    result: DispatchResult,
}

/// What a pass decided for one alert; applied after the scan so the
/// registry and session borrows stay disjoint.
enum PassAction {
    Fire {
        alert: Alert,
        station: Station,
        snooze_n: u32,
    },
    Dismissed(AlertId),
}

/// Front door to a running monitoring loop.
pub struct MonitorHandle {
    tx: mpsc::Sender<MonitorCommand>,
    join: JoinHandle<()>,
}

impl MonitorHandle {
    /// Validates before enqueueing: an out-of-bounds alert never reaches
    /// the registry.
    pub async fn create_alert(&self, alert: Alert) -> Result<(), CoreError> {
        alert.validate()?;
        self.send(MonitorCommand::Create(alert)).await
    }

    pub async fn edit_alert(&self, alert: Alert) -> Result<(), CoreError> {
        alert.validate()?;
        self.send(MonitorCommand::Edit(alert)).await
    }

    pub async fn add_station(&self, station: Station) -> Result<(), CoreError> {
        self.send(MonitorCommand::AddStation(station)).await
    }

    pub async fn pause_alert(&self, id: AlertId) -> Result<(), CoreError> {
        self.send(MonitorCommand::Pause(id)).await
    }

    pub async fn resume_alert(&self, id: AlertId) -> Result<(), CoreError> {
        self.send(MonitorCommand::Resume(id)).await
    }

    pub async fn delete_alert(&self, id: AlertId) -> Result<(), CoreError> {
        self.send(MonitorCommand::Delete(id)).await
    }

    /// Stop the loop and wait for it to drain.
    pub async fn shutdown(self) {
        let _ = self.tx.send(MonitorCommand::Shutdown).await;
        let _ = self.join.await;
    }

    async fn send(&self, cmd: MonitorCommand) -> Result<(), CoreError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| CoreError::MonitorClosed)
    }
}

pub struct Monitor {
    registry: AlertRegistry,
    sessions: HashMap<AlertId, AlertSession>,
    store: Arc<dyn AlertStore>,
    resolver: Arc<MessageResolver>,
    dispatcher: Arc<NotificationDispatcher>,
    provider: Arc<dyn LocationProvider>,
    stops: Arc<dyn StopCountSource>,
    settings: Settings,
    tier: TierSelector,
    last_sample: Option<GeoSample>,
    outcome_tx: mpsc::Sender<FireOutcome>,
}

impl Monitor {
    /// Load the registry from the store and spawn the loop. A failed or
    /// corrupt load is a fatal initialization error; arming partial
    /// alert state would be worse than refusing to start.
    pub fn start(
        store: Arc<dyn AlertStore>,
        provider: Arc<dyn LocationProvider>,
        sink: Arc<dyn NotificationSink>,
        generator: Arc<dyn MessageGenerator>,
        stops: Arc<dyn StopCountSource>,
        settings: Settings,
    ) -> Result<MonitorHandle, CoreError> {
        let settings = settings.sanitized();
        let registry = AlertRegistry::from_store(store.as_ref())?;
        let resolver = Arc::new(MessageResolver::new(generator, &settings));
        let dispatcher = Arc::new(NotificationDispatcher::new(sink, store.clone()));

        let mut sessions = HashMap::new();
        for id in registry.armed_ids() {
            sessions.insert(id, AlertSession::new());
        }

        let sample_rx = provider.subscribe();
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (outcome_tx, outcome_rx) = mpsc::channel(64);

        let monitor = Self {
            registry,
            sessions,
            store,
            resolver,
            dispatcher,
            provider,
            stops,
            settings,
            tier: TierSelector::new(),
            last_sample: None,
            outcome_tx,
        };
        let join = tokio::spawn(monitor.run(cmd_rx, sample_rx, outcome_rx));
        Ok(MonitorHandle { tx: cmd_tx, join })
    }

    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<MonitorCommand>,
        mut sample_rx: mpsc::Receiver<GeoSample>,
        mut outcome_rx: mpsc::Receiver<FireOutcome>,
    ) {
        log::info!("monitoring loop started, {} alerts armed", self.sessions.len());
        self.provider.set_accuracy_tier(self.tier.current());

        loop {
            let interval = self.settings.tick_interval(self.tier.current());

            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    None | Some(MonitorCommand::Shutdown) => break,
                    Some(cmd) => self.apply_command(cmd),
                },
                Some(sample) = sample_rx.recv() => {
                    self.last_sample = Some(sample);
                },
                Some(outcome) = outcome_rx.recv() => {
                    self.apply_outcome(outcome);
                },
                _ = sleep(interval) => {},
            }

            // Coalesce: absorb everything that queued while this wake-up
            // was pending so one pass covers it all.
            loop {
                match cmd_rx.try_recv() {
                    Ok(MonitorCommand::Shutdown) => {
                        log::info!("monitoring loop stopped");
                        return;
                    }
                    Ok(cmd) => self.apply_command(cmd),
                    Err(_) => break,
                }
            }
            while let Ok(sample) = sample_rx.try_recv() {
                self.last_sample = Some(sample);
            }
            while let Ok(outcome) = outcome_rx.try_recv() {
                self.apply_outcome(outcome);
            }

            self.pass();
        }
        log::info!("monitoring loop stopped");
    }

    /// One evaluation pass over every armed alert.
    fn pass(&mut self) {
        let now = Utc::now();
        let mut actions = Vec::new();

        for id in self.registry.armed_ids() {
            let Some(alert) = self.registry.alert(id) else {
                continue;
            };
            let Some(station) = self.registry.station_for(alert) else {
                continue;
            };
            let session = self.sessions.entry(id).or_default();

            match session.phase() {
                Phase::Armed => {
                    let ctx = EvalContext {
                        now,
                        sample: self.last_sample.as_ref(),
                        station,
                        remaining_stops: self.stops.remaining_stops(alert),
                        grace: self.settings.grace(),
                    };
                    match triggers::evaluate(alert, &ctx) {
                        Decision::Fire => {
                            if session.begin_fire() {
                                actions.push(PassAction::Fire {
                                    alert: alert.clone(),
                                    station: station.clone(),
                                    snooze_n: 0,
                                });
                            }
                        }
                        Decision::Expire => {
                            if session.expire() {
                                log::info!("alert {id} expired without firing");
                                actions.push(PassAction::Dismissed(id));
                            }
                        }
                        Decision::Hold => {
                            session.last_sample = self.last_sample;
                            session.last_evaluated_at = Some(now);
                        }
                    }
                }
                Phase::Snoozed { .. } => {
                    let snooze =
                        Duration::from_secs(u64::from(alert.snooze_minutes) * 60);
                    match session.snooze_action(
                        snooze,
                        self.settings.snooze_ceiling,
                        Instant::now(),
                    ) {
                        SnoozeAction::ReFire(n) => {
                            if session.begin_refire() {
                                actions.push(PassAction::Fire {
                                    alert: alert.clone(),
                                    station: station.clone(),
                                    snooze_n: n,
                                });
                            }
                        }
                        SnoozeAction::ForceDismiss => {
                            session.force_dismiss();
                            log::info!(
                                "alert {id} dismissed after {} re-fires",
                                self.settings.snooze_ceiling
                            );
                            actions.push(PassAction::Dismissed(id));
                        }
                        SnoozeAction::Wait => {}
                    }
                }
                Phase::Firing { .. } | Phase::Dismissed => {}
            }
        }

        for action in actions {
            match action {
                PassAction::Fire {
                    alert,
                    station,
                    snooze_n,
                } => self.spawn_fire(alert, station, snooze_n),
                PassAction::Dismissed(id) => self.handle_dismissed(id),
            }
        }

        self.retune_tier();
    }

    /// Resolve and deliver off the loop, reporting back over the outcome
    /// channel so the state transition stays serialized here.
    fn spawn_fire(&self, alert: Alert, station: Station, snooze_n: u32) {
        log::debug!("alert {} firing (ordinal {snooze_n})", alert.id);
        let resolver = self.resolver.clone();
        let dispatcher = self.dispatcher.clone();
        let outcome_tx = self.outcome_tx.clone();
        tokio::spawn(async move {
            let body = resolver.resolve(&station, alert.persona).await;
            let result = dispatcher.dispatch(&alert, &station, &body, snooze_n).await;
            let _ = outcome_tx
                .send(FireOutcome {
                    alert_id: alert.id,
                    result,
                })
                .await;
        });
    }

    fn apply_outcome(&mut self, outcome: FireOutcome) {
        let Some(session) = self.sessions.get_mut(&outcome.alert_id) else {
            // Paused or deleted while the fire was in flight: the one
            // extra notification already went out, nothing to transition.
            return;
        };
        let Some(alert) = self.registry.alert(outcome.alert_id) else {
            return;
        };

        match outcome.result {
            DispatchResult::Delivered | DispatchResult::Scheduled => {
                let snooze = Duration::from_secs(u64::from(alert.snooze_minutes) * 60);
                let phase = session.fire_delivered(snooze, Instant::now());
                if phase == Phase::Dismissed {
                    self.handle_dismissed(outcome.alert_id);
                }
            }
            DispatchResult::Failed => {
                // Next tick re-attempts rather than dropping the fire.
                session.fire_failed();
            }
        }
    }

    /// A session reached Dismissed: re-arm repeating alerts for their
    /// next qualifying day, deactivate the rest.
    fn handle_dismissed(&mut self, id: AlertId) {
        let now = Utc::now();
        let Some(alert) = self.registry.alert_mut(id) else {
            self.sessions.remove(&id);
            return;
        };

        let next = alert
            .arrival_at
            .and_then(|target| alert.repeat.next_target(target, now));

        match next {
            Some(next_target) => {
                alert.arrival_at = Some(next_target);
                let snapshot = alert.clone();
                if let Some(session) = self.sessions.get_mut(&id) {
                    session.rearm();
                }
                self.persist_alert(&snapshot);
                log::info!("alert {id} re-armed for {next_target}");
            }
            None => {
                alert.active = false;
                let snapshot = alert.clone();
                self.sessions.remove(&id);
                self.persist_alert(&snapshot);
                log::info!("alert {id} deactivated");
            }
        }
    }

    fn apply_command(&mut self, cmd: MonitorCommand) {
        match cmd {
            MonitorCommand::AddStation(station) => {
                self.persist_station(&station);
                self.registry.upsert_station(station);
            }
            MonitorCommand::Create(alert) => {
                let id = alert.id;
                if self.registry.station(alert.station_id).is_none() {
                    log::warn!(
                        "alert {id} rejected: unknown station {}",
                        alert.station_id
                    );
                    return;
                }
                self.touch_station(alert.station_id);
                self.persist_alert(&alert);
                let active = alert.active;
                self.registry.upsert_alert(alert);
                if active {
                    self.sessions.insert(id, AlertSession::new());
                }
                log::info!("alert {id} created");
            }
            MonitorCommand::Edit(alert) => {
                let id = alert.id;
                if self.registry.station(alert.station_id).is_none() {
                    log::warn!(
                        "edit of alert {id} rejected: unknown station {}",
                        alert.station_id
                    );
                    return;
                }
                self.persist_alert(&alert);
                let active = alert.active;
                self.registry.upsert_alert(alert);
                // Edited conditions are evaluated fresh.
                if active {
                    self.sessions.insert(id, AlertSession::new());
                } else {
                    self.sessions.remove(&id);
                }
                log::info!("alert {id} edited");
            }
            MonitorCommand::Pause(id) => {
                if self.registry.set_active(id, false) {
                    self.sessions.remove(&id);
                    if let Some(alert) = self.registry.alert(id).cloned() {
                        self.persist_alert(&alert);
                    }
                    self.spawn_cancel(id);
                    log::info!("alert {id} paused");
                } else {
                    log::warn!("pause of unknown alert {id}");
                }
            }
            MonitorCommand::Resume(id) => {
                if self.registry.set_active(id, true) {
                    self.sessions.insert(id, AlertSession::new());
                    if let Some(alert) = self.registry.alert(id).cloned() {
                        self.persist_alert(&alert);
                    }
                    log::info!("alert {id} resumed");
                } else {
                    log::warn!("resume of unknown alert {id}");
                }
            }
            MonitorCommand::Delete(id) => {
                self.registry.remove_alert(id);
                self.sessions.remove(&id);
                if let Err(err) = self.store.delete_alert(id) {
                    log::warn!("delete of alert {id} not persisted: {err}");
                }
                self.spawn_cancel(id);
                log::info!("alert {id} deleted");
            }
            // Handled by the loop before dispatching here.
            MonitorCommand::Shutdown => {}
        }
    }

    /// Arming an alert counts as using its station.
    fn touch_station(&mut self, station_id: StationId) {
        if let Some(mut station) = self.registry.station(station_id).cloned() {
            station.last_used = Some(Utc::now());
            self.persist_station(&station);
            self.registry.upsert_station(station);
        }
    }

    fn retune_tier(&mut self) {
        let min = self
            .last_sample
            .as_ref()
            .and_then(|sample| self.registry.min_armed_distance_m(sample));
        if let Some(tier) = self.tier.update(min) {
            log::info!("accuracy tier changed to {tier:?}");
            self.provider.set_accuracy_tier(tier);
        }
    }

    fn spawn_cancel(&self, id: AlertId) {
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            dispatcher.cancel(id).await;
        });
    }

    /// Store writes after startup are retryable, never fatal.
    fn persist_alert(&self, alert: &Alert) {
        if let Err(err) = self.store.save_alert(alert) {
            log::warn!("alert {} not persisted: {err}", alert.id);
        }
    }

    fn persist_station(&self, station: &Station) {
        if let Err(err) = self.store.save_station(station) {
            log::warn!("station {} not persisted: {err}", station.id);
        }
    }
}
