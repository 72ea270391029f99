//! Accuracy-tier selection for location sampling.
//!
//! The tier bounds battery cost while keeping practical accuracy under
//! 100 m near a trigger boundary. It is a pure function of the armed
//! alert set and the latest sample: the loop computes the minimum
//! distance to any armed station once per pass and asks the provider for
//! the matching tier. The sampler never changes tier on its own schedule.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::core::model::GeoSample;

/// Distance below which the finest tier is requested.
pub const NEAR_TARGET_WITHIN_M: f64 = 500.0;
/// Distance below which the medium tier is requested.
pub const APPROACHING_WITHIN_M: f64 = 2_000.0;

/// A named bundle of sampling frequency and precision settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccuracyTier {
    /// Coarse accuracy, long sampling interval.
    #[default]
    Normal,
    /// Medium accuracy, shorter interval.
    Approaching,
    /// Finest accuracy, shortest interval.
    NearTarget,
}

/// Tier for the minimum distance to any armed station. `None` means no
/// armed distance/stop alert has a usable position yet.
pub fn tier_for_distance(min_distance_m: Option<f64>) -> AccuracyTier {
    match min_distance_m {
        Some(d) if d < NEAR_TARGET_WITHIN_M => AccuracyTier::NearTarget,
        Some(d) if d < APPROACHING_WITHIN_M => AccuracyTier::Approaching,
        _ => AccuracyTier::Normal,
    }
}

/// The platform location provider, seen through the tier abstraction.
///
/// `subscribe` hands out the sample feed; the provider keeps emitting on
/// it at whatever cadence the current tier grants.
pub trait LocationProvider: Send + Sync {
    fn set_accuracy_tier(&self, tier: AccuracyTier);
    fn subscribe(&self) -> mpsc::Receiver<GeoSample>;
}

/// Tracks the currently requested tier so the provider is only poked on
/// an actual change. Evaluated once per pass, never mid-tick.
#[derive(Debug)]
pub struct TierSelector {
    current: AccuracyTier,
}

impl TierSelector {
    pub fn new() -> Self {
        Self {
            current: AccuracyTier::Normal,
        }
    }

    pub fn current(&self) -> AccuracyTier {
        self.current
    }

    /// Feed the latest minimum armed-station distance. Returns the new
    /// tier if it changed, None otherwise.
    pub fn update(&mut self, min_distance_m: Option<f64>) -> Option<AccuracyTier> {
        let next = tier_for_distance(min_distance_m);
        if next == self.current {
            None
        } else {
            self.current = next;
            Some(next)
        }
    }
}

impl Default for TierSelector {
    fn default() -> Self {
        Self::new()
    }
}
