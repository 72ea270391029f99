//! Trigger evaluation for armed alerts.
//!
//! `evaluate` is pure and side-effect free: given an alert and the latest
//! known position/time/stop data it decides Fire, Hold, or Expire. All
//! state transitions driven by the decision live in the monitoring loop.

use chrono::{DateTime, Duration, Utc};

use super::geo::distance;
use super::model::{Alert, GeoSample, Station, TriggerMode};

/// Outcome of evaluating one alert against one tick/sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The trigger condition is satisfied; notify now.
    Fire,
    /// Not satisfied yet (or data unavailable); keep watching.
    Hold,
    /// The window has passed; dismiss without notifying.
    Expire,
}

/// Everything an evaluation may look at.
pub struct EvalContext<'a> {
    pub now: DateTime<Utc>,
    /// Latest position sample, if the provider has produced one.
    pub sample: Option<&'a GeoSample>,
    pub station: &'a Station,
    /// Remaining scheduled stops to the target, if the route feed has
    /// data. None means unavailable.
    pub remaining_stops: Option<u32>,
    /// How long after the target arrival a time alert stays live.
    pub grace: Duration,
}

/// Repeating position-trigger alerts only evaluate this close to their
/// next scheduled arrival. Without the window a re-armed daily alert
/// would fire again immediately while the rider is still inside the
/// threshold from today's trip.
pub fn repeat_window_before() -> Duration {
    Duration::hours(2)
}

/// Evaluate a single alert. Each alert carries exactly one trigger mode;
/// when raw inputs could produce several, `TriggerMode::from_parts`
/// already applied the time > distance > stop-count precedence.
pub fn evaluate(alert: &Alert, ctx: &EvalContext) -> Decision {
    if let Some(gate) = repeat_window_gate(alert, ctx) {
        return gate;
    }
    match alert.trigger {
        TriggerMode::Time { lead_minutes } => evaluate_time(alert, lead_minutes, ctx),
        TriggerMode::Distance { threshold_m } => evaluate_distance(threshold_m, ctx),
        TriggerMode::StopCount { stops } => evaluate_stop_count(stops, ctx),
    }
}

/// Daily-window gate for repeating distance/stop alerts: hold before the
/// window opens, expire once the occurrence (plus grace) has passed so
/// the loop can re-arm it for the next qualifying day. Time mode already
/// carries its own window.
fn repeat_window_gate(alert: &Alert, ctx: &EvalContext) -> Option<Decision> {
    if !alert.repeat.is_repeating() || matches!(alert.trigger, TriggerMode::Time { .. }) {
        return None;
    }
    let target = alert.arrival_at?;
    if ctx.now >= target + ctx.grace {
        return Some(Decision::Expire);
    }
    if ctx.now < target - repeat_window_before() {
        return Some(Decision::Hold);
    }
    None
}

/// Fire on `[target - lead, target)`; expire once `now >= target + grace`.
fn evaluate_time(alert: &Alert, lead_minutes: u32, ctx: &EvalContext) -> Decision {
    let Some(target) = alert.arrival_at else {
        // Validation keeps this out of the registry; hold rather than
        // guess if it slips through.
        return Decision::Hold;
    };

    if ctx.now >= target + ctx.grace {
        return Decision::Expire;
    }
    let window_start = target - Duration::minutes(i64::from(lead_minutes));
    if ctx.now >= window_start && ctx.now < target {
        return Decision::Fire;
    }
    Decision::Hold
}

/// Fire once the haversine distance to the station drops to the
/// threshold. Never expires: the rider may still be on their way.
fn evaluate_distance(threshold_m: f64, ctx: &EvalContext) -> Decision {
    let Some(sample) = ctx.sample else {
        return Decision::Hold;
    };
    if distance::sample_to_station_m(sample, ctx.station) <= threshold_m {
        Decision::Fire
    } else {
        Decision::Hold
    }
}

/// Fire when the remaining stop count reaches the configured count.
/// Absent stop data holds; it must never cause a false fire.
fn evaluate_stop_count(stops: u32, ctx: &EvalContext) -> Decision {
    match ctx.remaining_stops {
        Some(remaining) if remaining <= stops => Decision::Fire,
        Some(_) => Decision::Hold,
        None => Decision::Hold,
    }
}

/// Supplies the remaining scheduled stops to an alert's target station.
/// A real timetable/route-position feed is not wired in yet; the shipped
/// implementation always reports unavailable.
pub trait StopCountSource: Send + Sync {
    fn remaining_stops(&self, alert: &Alert) -> Option<u32>;
}

/// Placeholder feed: no stop data, every stop-count alert holds.
pub struct UnavailableStopSource;

impl StopCountSource for UnavailableStopSource {
    fn remaining_stops(&self, _alert: &Alert) -> Option<u32> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{Persona, RepeatPattern};
    use chrono::TimeZone;

    fn station() -> Station {
        Station {
            id: 10,
            name: "Tokyo".to_string(),
            latitude: 35.6812,
            longitude: 139.7671,
            lines: Default::default(),
            favorite: false,
            last_used: None,
        }
    }

    fn alert(trigger: TriggerMode, arrival_at: Option<DateTime<Utc>>) -> Alert {
        Alert {
            id: 1,
            station_id: 10,
            trigger,
            arrival_at,
            snooze_minutes: 3,
            persona: Persona::Standard,
            active: true,
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
            repeat: RepeatPattern::None,
        }
    }

    fn sample_at(latitude: f64, longitude: f64) -> GeoSample {
        GeoSample {
            latitude,
            longitude,
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap(),
            horizontal_accuracy_m: 10.0,
        }
    }

    fn ctx<'a>(
        now: DateTime<Utc>,
        sample: Option<&'a GeoSample>,
        station: &'a Station,
        remaining_stops: Option<u32>,
    ) -> EvalContext<'a> {
        EvalContext {
            now,
            sample,
            station,
            remaining_stops,
            grace: Duration::minutes(5),
        }
    }

    #[test]
    fn test_time_mode_window_boundaries() {
        // lead=5min, target=12:00:00, grace=5min.
        let target = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let st = station();
        let a = alert(TriggerMode::Time { lead_minutes: 5 }, Some(target));

        let at = |h, m, s| Utc.with_ymd_and_hms(2026, 3, 1, h, m, s).unwrap();
        assert_eq!(evaluate(&a, &ctx(at(11, 54, 59), None, &st, None)), Decision::Hold);
        assert_eq!(evaluate(&a, &ctx(at(11, 55, 0), None, &st, None)), Decision::Fire);
        assert_eq!(evaluate(&a, &ctx(at(11, 59, 59), None, &st, None)), Decision::Fire);
        // At the target itself the window is closed but grace keeps it alive.
        assert_eq!(evaluate(&a, &ctx(at(12, 0, 0), None, &st, None)), Decision::Hold);
        assert_eq!(evaluate(&a, &ctx(at(12, 4, 59), None, &st, None)), Decision::Hold);
        assert_eq!(evaluate(&a, &ctx(at(12, 5, 0), None, &st, None)), Decision::Expire);
        assert_eq!(evaluate(&a, &ctx(at(12, 5, 1), None, &st, None)), Decision::Expire);
    }

    #[test]
    fn test_time_mode_no_value_fires_and_expires() {
        // No instant may both fire and expire: the fire window ends at the
        // target, expiry starts at target + grace.
        let target = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let st = station();
        let a = alert(TriggerMode::Time { lead_minutes: 60 }, Some(target));
        let mut t = Utc.with_ymd_and_hms(2026, 3, 1, 10, 59, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 3, 1, 12, 6, 0).unwrap();
        while t < end {
            let decision = evaluate(&a, &ctx(t, None, &st, None));
            if decision == Decision::Fire {
                assert!(t < target);
            }
            if decision == Decision::Expire {
                assert!(t >= target + Duration::minutes(5));
            }
            t += Duration::seconds(30);
        }
    }

    #[test]
    fn test_distance_mode_approach() {
        // Threshold 500 m around Tokyo station; stream crossing
        // ~600 m -> ~480 m -> ~300 m must go Hold, Fire, Fire.
        let st = station();
        let a = alert(TriggerMode::Distance { threshold_m: 500.0 }, None);
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap();

        // Offsets chosen along the latitude axis: 1 deg ~ 111.32 km.
        let far = sample_at(35.6812 + 0.0054, 139.7671); // ~600 m
        let near = sample_at(35.6812 + 0.0043, 139.7671); // ~480 m
        let close = sample_at(35.6812 + 0.0027, 139.7671); // ~300 m

        assert_eq!(evaluate(&a, &ctx(now, Some(&far), &st, None)), Decision::Hold);
        assert_eq!(evaluate(&a, &ctx(now, Some(&near), &st, None)), Decision::Fire);
        assert_eq!(evaluate(&a, &ctx(now, Some(&close), &st, None)), Decision::Fire);
    }

    #[test]
    fn test_distance_mode_monotonic() {
        // Decreasing distance never flips Fire back to Hold.
        let st = station();
        let a = alert(TriggerMode::Distance { threshold_m: 500.0 }, None);
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap();

        let mut fired = false;
        let mut offset = 0.02;
        while offset > 0.0 {
            let sample = sample_at(35.6812 + offset, 139.7671);
            let decision = evaluate(&a, &ctx(now, Some(&sample), &st, None));
            if fired {
                assert_eq!(decision, Decision::Fire);
            }
            fired = decision == Decision::Fire;
            offset -= 0.0005;
        }
        assert!(fired);
    }

    #[test]
    fn test_distance_mode_without_sample_holds() {
        let st = station();
        let a = alert(TriggerMode::Distance { threshold_m: 500.0 }, None);
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap();
        assert_eq!(evaluate(&a, &ctx(now, None, &st, None)), Decision::Hold);
    }

    #[test]
    fn test_stop_count_mode() {
        let st = station();
        let a = alert(TriggerMode::StopCount { stops: 2 }, None);
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap();

        assert_eq!(evaluate(&a, &ctx(now, None, &st, Some(5))), Decision::Hold);
        assert_eq!(evaluate(&a, &ctx(now, None, &st, Some(3))), Decision::Hold);
        assert_eq!(evaluate(&a, &ctx(now, None, &st, Some(2))), Decision::Fire);
        assert_eq!(evaluate(&a, &ctx(now, None, &st, Some(0))), Decision::Fire);
    }

    #[test]
    fn test_stop_count_absent_data_always_holds() {
        // Missing stop data must never fire, however long the sequence.
        let st = station();
        let a = alert(TriggerMode::StopCount { stops: 10 }, None);
        let mut now = Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap();
        for _ in 0..1_000 {
            assert_eq!(evaluate(&a, &ctx(now, None, &st, None)), Decision::Hold);
            now += Duration::seconds(15);
        }
    }

    #[test]
    fn test_unavailable_stop_source() {
        let a = alert(TriggerMode::StopCount { stops: 2 }, None);
        assert_eq!(UnavailableStopSource.remaining_stops(&a), None);
    }

    #[test]
    fn test_repeating_distance_gated_to_window() {
        let st = station();
        let target = Utc.with_ymd_and_hms(2026, 3, 2, 8, 30, 0).unwrap();
        let mut a = alert(TriggerMode::Distance { threshold_m: 500.0 }, Some(target));
        a.repeat = RepeatPattern::Daily;

        // Inside the threshold the whole time.
        let inside = sample_at(35.6812, 139.7671);

        // Hours before the window opens: hold despite being in range.
        let early = Utc.with_ymd_and_hms(2026, 3, 2, 5, 0, 0).unwrap();
        assert_eq!(evaluate(&a, &ctx(early, Some(&inside), &st, None)), Decision::Hold);

        // Window open: fires normally.
        let in_window = Utc.with_ymd_and_hms(2026, 3, 2, 7, 0, 0).unwrap();
        assert_eq!(evaluate(&a, &ctx(in_window, Some(&inside), &st, None)), Decision::Fire);

        // Past the occurrence plus grace: expire so the loop re-arms it.
        let late = Utc.with_ymd_and_hms(2026, 3, 2, 8, 36, 0).unwrap();
        assert_eq!(evaluate(&a, &ctx(late, Some(&inside), &st, None)), Decision::Expire);
    }

    #[test]
    fn test_non_repeating_distance_is_not_gated() {
        let st = station();
        let a = alert(TriggerMode::Distance { threshold_m: 500.0 }, None);
        let inside = sample_at(35.6812, 139.7671);
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 5, 0, 0).unwrap();
        assert_eq!(evaluate(&a, &ctx(now, Some(&inside), &st, None)), Decision::Fire);
    }
}
