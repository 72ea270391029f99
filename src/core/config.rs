use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::geo::sampler::AccuracyTier;

/// Engine tuning knobs, persisted as settings.json.
///
/// Tick cadences are the engine's *desired* intervals per accuracy tier;
/// the host scheduler may grant longer effective intervals under
/// background-execution quotas and the engine degrades gracefully.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub tick_normal_secs: u64,
    pub tick_approaching_secs: u64,
    pub tick_near_target_secs: u64,
    /// Grace window after the target arrival before a time alert expires.
    pub grace_minutes: u32,
    /// Maximum re-fires while snoozed before forced dismissal.
    pub snooze_ceiling: u32,
    /// Message cache lifetime. Wording is not time-sensitive.
    pub cache_ttl_hours: u64,
    pub remote_timeout_ms: u64,
    pub remote_attempts: u32,
    /// Remote generation requests allowed per rolling minute.
    pub remote_per_minute: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tick_normal_secs: 60,
            tick_approaching_secs: 30,
            tick_near_target_secs: 15,
            grace_minutes: 5,
            snooze_ceiling: 5,
            cache_ttl_hours: 72,
            remote_timeout_ms: 4_000,
            remote_attempts: 3,
            remote_per_minute: 10,
        }
    }
}

impl Settings {
    /// Desired tick interval for an accuracy tier.
    pub fn tick_interval(&self, tier: AccuracyTier) -> Duration {
        let secs = match tier {
            AccuracyTier::Normal => self.tick_normal_secs,
            AccuracyTier::Approaching => self.tick_approaching_secs,
            AccuracyTier::NearTarget => self.tick_near_target_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn grace(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.grace_minutes))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_hours * 3600)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    /// Replace out-of-range values with defaults so a hand-edited settings
    /// file cannot stall the loop or disable delivery.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.tick_normal_secs == 0 || self.tick_normal_secs > 600 {
            self.tick_normal_secs = defaults.tick_normal_secs;
        }
        if self.tick_approaching_secs == 0 || self.tick_approaching_secs > 600 {
            self.tick_approaching_secs = defaults.tick_approaching_secs;
        }
        if self.tick_near_target_secs == 0 || self.tick_near_target_secs > 600 {
            self.tick_near_target_secs = defaults.tick_near_target_secs;
        }
        if self.remote_attempts == 0 {
            self.remote_attempts = defaults.remote_attempts;
        }
        if self.remote_timeout_ms == 0 {
            self.remote_timeout_ms = defaults.remote_timeout_ms;
        }
        self
    }
}

pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_dir: PathBuf) -> Self {
        Self {
            config_path: config_dir.join("settings.json"),
        }
    }

    pub fn load(&self) -> Settings {
        if self.config_path.exists() {
            if let Ok(content) = fs::read_to_string(&self.config_path) {
                if let Ok(settings) = serde_json::from_str::<Settings>(&content) {
                    return settings.sanitized();
                }
            }
        }
        Settings::default()
    }

    pub fn save(&self, settings: &Settings) -> io::Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(settings)?;
        fs::write(&self.config_path, content)
    }
}
