//! Per-alert monitoring session state.
//!
//! Rebuilt from `Alert.active` at startup and never persisted: a process
//! restart resets every armed alert to `Armed`. Transitions are strictly
//! ordered per alert (Armed -> Firing -> Snoozed/Dismissed) and only the
//! monitoring loop drives them.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use super::model::GeoSample;

/// Where an alert sits in its notify lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Actively evaluated against incoming samples.
    Armed,
    /// A fire is in flight: message resolution + dispatch are running.
    /// `snooze_n` is 0 for the initial fire, n for the n-th re-fire.
    Firing { snooze_n: u32 },
    /// Fired n times so far; waiting for the snooze interval to elapse.
    Snoozed { n: u32 },
    /// Finished. Repeating alerts re-arm from here, others deactivate.
    Dismissed,
}

/// What a snoozed alert should do this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnoozeAction {
    Wait,
    /// Re-fire with the given ordinal.
    ReFire(u32),
    /// The ceiling is exhausted; dismiss without another notification.
    ForceDismiss,
}

#[derive(Debug)]
pub struct AlertSession {
    phase: Phase,
    snoozed_at: Option<Instant>,
    /// Last inputs fed to the evaluator, kept for idempotence checks and
    /// diagnostics.
    pub last_sample: Option<GeoSample>,
    pub last_evaluated_at: Option<DateTime<Utc>>,
}

impl AlertSession {
    pub fn new() -> Self {
        Self {
            phase: Phase::Armed,
            snoozed_at: None,
            last_sample: None,
            last_evaluated_at: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Armed -> Firing{0}. Returns false if the session is not armed.
    pub fn begin_fire(&mut self) -> bool {
        if self.phase != Phase::Armed {
            return false;
        }
        self.phase = Phase::Firing { snooze_n: 0 };
        true
    }

    /// Decide what a snoozed session does once `snooze_interval` has a
    /// chance to have elapsed. `ceiling` is the maximum number of
    /// re-fires before forced dismissal.
    pub fn snooze_action(
        &self,
        snooze_interval: Duration,
        ceiling: u32,
        now: Instant,
    ) -> SnoozeAction {
        let Phase::Snoozed { n } = self.phase else {
            return SnoozeAction::Wait;
        };
        let Some(snoozed_at) = self.snoozed_at else {
            return SnoozeAction::Wait;
        };
        if now.duration_since(snoozed_at) < snooze_interval {
            return SnoozeAction::Wait;
        }
        if n >= ceiling {
            SnoozeAction::ForceDismiss
        } else {
            SnoozeAction::ReFire(n + 1)
        }
    }

    /// Snoozed{n} -> Firing{n+1}. Returns false when not snoozed.
    pub fn begin_refire(&mut self) -> bool {
        let Phase::Snoozed { n } = self.phase else {
            return false;
        };
        self.phase = Phase::Firing { snooze_n: n + 1 };
        true
    }

    /// Firing{n} -> Snoozed{n} (interval > 0) or Dismissed. Returns the
    /// phase entered.
    pub fn fire_delivered(&mut self, snooze_interval: Duration, now: Instant) -> Phase {
        if let Phase::Firing { snooze_n } = self.phase {
            if snooze_interval > Duration::ZERO {
                self.phase = Phase::Snoozed { n: snooze_n };
                self.snoozed_at = Some(now);
            } else {
                self.phase = Phase::Dismissed;
            }
        }
        self.phase
    }

    /// Dispatch failed: step back so the next tick attempts the same fire
    /// again. Firing{0} returns to Armed; Firing{n} returns to
    /// Snoozed{n-1} with its already-elapsed timer intact.
    pub fn fire_failed(&mut self) {
        if let Phase::Firing { snooze_n } = self.phase {
            self.phase = if snooze_n == 0 {
                Phase::Armed
            } else {
                Phase::Snoozed { n: snooze_n - 1 }
            };
        }
    }

    /// Armed -> Dismissed, silently (expiry).
    pub fn expire(&mut self) -> bool {
        if self.phase != Phase::Armed {
            return false;
        }
        self.phase = Phase::Dismissed;
        true
    }

    /// Snoozed -> Dismissed once the ceiling is exhausted.
    pub fn force_dismiss(&mut self) {
        self.phase = Phase::Dismissed;
        self.snoozed_at = None;
    }

    /// Dismissed -> Armed for the next repeat occurrence.
    pub fn rearm(&mut self) -> bool {
        if self.phase != Phase::Dismissed {
            return false;
        }
        self.phase = Phase::Armed;
        self.snoozed_at = None;
        self.last_sample = None;
        self.last_evaluated_at = None;
        true
    }
}

impl Default for AlertSession {
    fn default() -> Self {
        Self::new()
    }
}
