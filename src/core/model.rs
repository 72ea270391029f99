use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use serde::{Deserialize, Serialize};

use super::error::CoreError;

pub type AlertId = u64;
pub type StationId = u64;
pub type HistoryId = u64;
pub type LineId = String;

/// Trigger parameter bounds, enforced at creation/edit time.
pub const DISTANCE_MIN_M: f64 = 50.0;
pub const DISTANCE_MAX_M: f64 = 10_000.0;
pub const STOPS_MIN: u32 = 1;
pub const STOPS_MAX: u32 = 10;
pub const LEAD_MIN_MINUTES: u32 = 1;
pub const LEAD_MAX_MINUTES: u32 = 60;

/// A transit station. Owned by the persistence layer; alerts reference it
/// by id. Immutable once created except `favorite` and `last_used`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: StationId,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Identifiers of the lines serving this station.
    #[serde(default)]
    pub lines: BTreeSet<LineId>,
    #[serde(default)]
    pub favorite: bool,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
}

/// One position report from the location provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoSample {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    pub horizontal_accuracy_m: f64,
}

/// Tone used when phrasing a notification body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Persona {
    #[default]
    Standard,
    Healing,
    Strict,
    Cheerful,
}

impl Persona {
    pub fn all() -> &'static [Persona] {
        &[
            Self::Standard,
            Self::Healing,
            Self::Strict,
            Self::Cheerful,
        ]
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Standard => "Standard",
            Self::Healing => "Healing",
            Self::Strict => "Strict",
            Self::Cheerful => "Cheerful",
        }
    }
}

/// The one active condition governing when an alert fires.
/// Exactly one mode (and its parameter) exists per alert.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TriggerMode {
    /// Fire `lead_minutes` before the scheduled arrival time.
    Time { lead_minutes: u32 },
    /// Fire within `threshold_m` meters of the station.
    Distance { threshold_m: f64 },
    /// Fire when the remaining stop count drops to `stops` or fewer.
    StopCount { stops: u32 },
}

impl TriggerMode {
    /// Build a mode from raw per-mode parameters, e.g. out of a setup form
    /// where more than one parameter may be populated. Precedence when
    /// several are present: time, then distance, then stop count. Returns
    /// None when no parameter is set.
    pub fn from_parts(
        lead_minutes: Option<u32>,
        threshold_m: Option<f64>,
        stops: Option<u32>,
    ) -> Option<Self> {
        if let Some(lead) = lead_minutes {
            return Some(Self::Time { lead_minutes: lead });
        }
        if let Some(threshold) = threshold_m {
            return Some(Self::Distance {
                threshold_m: threshold,
            });
        }
        stops.map(|count| Self::StopCount { stops: count })
    }

    /// Check the mode parameter against its bounds.
    pub fn validate(&self) -> Result<(), CoreError> {
        match *self {
            Self::Time { lead_minutes } => {
                if !(LEAD_MIN_MINUTES..=LEAD_MAX_MINUTES).contains(&lead_minutes) {
                    return Err(CoreError::OutOfBounds {
                        field: "lead_minutes",
                        value: f64::from(lead_minutes),
                        min: f64::from(LEAD_MIN_MINUTES),
                        max: f64::from(LEAD_MAX_MINUTES),
                    });
                }
            }
            Self::Distance { threshold_m } => {
                if !(DISTANCE_MIN_M..=DISTANCE_MAX_M).contains(&threshold_m) {
                    return Err(CoreError::OutOfBounds {
                        field: "threshold_m",
                        value: threshold_m,
                        min: DISTANCE_MIN_M,
                        max: DISTANCE_MAX_M,
                    });
                }
            }
            Self::StopCount { stops } => {
                if !(STOPS_MIN..=STOPS_MAX).contains(&stops) {
                    return Err(CoreError::OutOfBounds {
                        field: "stops",
                        value: f64::from(stops),
                        min: f64::from(STOPS_MIN),
                        max: f64::from(STOPS_MAX),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Days on which a dismissed alert re-arms itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "pattern", content = "days")]
pub enum RepeatPattern {
    #[default]
    None,
    Daily,
    Weekdays,
    Weekends,
    Custom(Vec<Weekday>),
}

impl RepeatPattern {
    pub fn is_repeating(&self) -> bool {
        !matches!(self, Self::None)
    }

    pub fn matches(&self, day: Weekday) -> bool {
        match self {
            Self::None => false,
            Self::Daily => true,
            Self::Weekdays => !matches!(day, Weekday::Sat | Weekday::Sun),
            Self::Weekends => matches!(day, Weekday::Sat | Weekday::Sun),
            Self::Custom(days) => days.contains(&day),
        }
    }

    /// Next target strictly after `now`, advancing `target` in whole days
    /// until it lands on a qualifying weekday. Time of day is preserved.
    /// Returns None for non-repeating patterns or an empty custom set.
    pub fn next_target(
        &self,
        target: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if !self.is_repeating() {
            return None;
        }
        let mut candidate = target;
        // 14 days covers every weekday set plus a full week of catch-up.
        for _ in 0..14 {
            candidate += Duration::days(1);
            if candidate > now && self.matches(candidate.weekday()) {
                return Some(candidate);
            }
        }
        None
    }
}

/// A configured destination alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub station_id: StationId,
    #[serde(flatten)]
    pub trigger: TriggerMode,
    /// Scheduled arrival at the target station. Required for time mode and
    /// for repeat re-arming; informational otherwise.
    #[serde(default)]
    pub arrival_at: Option<DateTime<Utc>>,
    /// Minutes between re-fires while snoozed; 0 disables snoozing.
    pub snooze_minutes: u32,
    #[serde(default)]
    pub persona: Persona,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub repeat: RepeatPattern,
}

impl Alert {
    /// Reject configuration that must never enter the registry.
    pub fn validate(&self) -> Result<(), CoreError> {
        self.trigger.validate()?;
        if matches!(self.trigger, TriggerMode::Time { .. }) && self.arrival_at.is_none() {
            return Err(CoreError::MissingArrivalTime(self.id));
        }
        if self.repeat.is_repeating() && self.arrival_at.is_none() {
            return Err(CoreError::MissingArrivalTime(self.id));
        }
        Ok(())
    }
}

/// One delivered notification. Append-only, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub id: HistoryId,
    pub alert_id: AlertId,
    pub message: String,
    pub delivered_at: DateTime<Utc>,
}
