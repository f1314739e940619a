//! [`SafetyGate`] – pure evaluation of a [`SafetyState`] against thresholds.
//!
//! The gate knows nothing about motion.  It answers one question: may the
//! robot move *right now*?  Conditions are checked in a fixed order and the
//! first failure is reported:
//!
//! | # | Condition | [`DenyReason`] |
//! |---|-----------|----------------|
//! | 1 | emergency-stop latch set | `Halted` |
//! | 2 | `battery_fraction < battery_min_fraction` | `Battery` |
//! | 3 | `temperature_celsius > temperature_max_celsius` | `Thermal` |
//! | 4 | `\|roll\|` or `\|pitch\| > max_tilt_radians` | `Orientation` |
//! | 5 | last reading older than `sensor_staleness_max_ms` | `Stale` |
//!
//! Non-finite sensor values fail their condition.
//!
//! # Example
//!
//! ```
//! use std::time::Instant;
//! use strider_kernel::safety_gate::{GateDecision, SafetyGate, SafetyThresholds};
//! use strider_kernel::safety_state::SafetyState;
//! use strider_types::DenyReason;
//!
//! let gate = SafetyGate::new(SafetyThresholds::default());
//! let now = Instant::now();
//!
//! let mut state = SafetyState::nominal(now);
//! assert_eq!(gate.evaluate(&state, now), GateDecision::Allowed);
//!
//! state.battery_fraction = 0.15;
//! assert_eq!(gate.evaluate(&state, now), GateDecision::Denied(DenyReason::Battery));
//! ```

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use strider_types::DenyReason;

use crate::safety_state::SafetyState;

// ────────────────────────────────────────────────────────────────────────────
// Thresholds
// ────────────────────────────────────────────────────────────────────────────

/// Safety policy values, loaded once from the `[safety]` config section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyThresholds {
    pub battery_min_fraction: f32,
    pub temperature_max_celsius: f32,
    pub max_tilt_radians: f32,
    pub sensor_staleness_max_ms: u64,
}

impl Default for SafetyThresholds {
    fn default() -> Self {
        Self {
            battery_min_fraction: 0.2,
            temperature_max_celsius: 80.0,
            max_tilt_radians: 0.5,
            sensor_staleness_max_ms: 1000,
        }
    }
}

impl SafetyThresholds {
    pub fn sensor_staleness_max(&self) -> Duration {
        Duration::from_millis(self.sensor_staleness_max_ms)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Evaluation
// ────────────────────────────────────────────────────────────────────────────

/// Result of a gate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allowed,
    Denied(DenyReason),
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allowed)
    }
}

/// Per-condition pass/fail report, `true` meaning the condition is satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyConditions {
    pub emergency_stop_clear: bool,
    pub battery_ok: bool,
    pub temperature_ok: bool,
    pub orientation_ok: bool,
    pub sensors_fresh: bool,
}

impl SafetyConditions {
    pub fn all_ok(&self) -> bool {
        self.failing().is_empty()
    }

    /// Failed conditions in evaluation order.
    pub fn failing(&self) -> Vec<DenyReason> {
        [
            (self.emergency_stop_clear, DenyReason::Halted),
            (self.battery_ok, DenyReason::Battery),
            (self.temperature_ok, DenyReason::Thermal),
            (self.orientation_ok, DenyReason::Orientation),
            (self.sensors_fresh, DenyReason::Stale),
        ]
        .into_iter()
        .filter(|(ok, _)| !ok)
        .map(|(_, reason)| reason)
        .collect()
    }
}

/// Evaluate every condition without short-circuiting.
pub fn conditions(
    state: &SafetyState,
    thresholds: &SafetyThresholds,
    now: Instant,
) -> SafetyConditions {
    // Written as negated "ok" comparisons so that NaN fails every check.
    let tilt_ok = |angle: f32| angle.abs() <= thresholds.max_tilt_radians;
    SafetyConditions {
        emergency_stop_clear: !state.emergency_stop,
        battery_ok: state.battery_fraction >= thresholds.battery_min_fraction,
        temperature_ok: state.temperature_celsius <= thresholds.temperature_max_celsius,
        orientation_ok: tilt_ok(state.orientation.roll) && tilt_ok(state.orientation.pitch),
        sensors_fresh: state
            .sensor_age(now)
            .is_some_and(|age| age <= thresholds.sensor_staleness_max()),
    }
}

/// Evaluate `state` and report the first failing condition.
pub fn evaluate(state: &SafetyState, thresholds: &SafetyThresholds, now: Instant) -> GateDecision {
    if state.emergency_stop {
        return GateDecision::Denied(DenyReason::Halted);
    }
    match conditions(state, thresholds, now).failing().first() {
        Some(reason) => GateDecision::Denied(*reason),
        None => GateDecision::Allowed,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SafetyGate
// ────────────────────────────────────────────────────────────────────────────

/// Owns a set of [`SafetyThresholds`] and evaluates states against them.
#[derive(Debug, Clone, Default)]
pub struct SafetyGate {
    thresholds: SafetyThresholds,
}

impl SafetyGate {
    pub fn new(thresholds: SafetyThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &SafetyThresholds {
        &self.thresholds
    }

    pub fn evaluate(&self, state: &SafetyState, now: Instant) -> GateDecision {
        evaluate(state, &self.thresholds, now)
    }

    pub fn conditions(&self, state: &SafetyState, now: Instant) -> SafetyConditions {
        conditions(state, &self.thresholds, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> SafetyGate {
        SafetyGate::new(SafetyThresholds::default())
    }

    #[test]
    fn nominal_state_is_allowed() {
        let now = Instant::now();
        let state = SafetyState::nominal(now);
        assert!(gate().evaluate(&state, now).is_allowed());
        assert!(gate().conditions(&state, now).all_ok());
    }

    #[test]
    fn low_battery_is_denied() {
        let now = Instant::now();
        let mut state = SafetyState::nominal(now);
        state.battery_fraction = 0.15;
        assert_eq!(
            gate().evaluate(&state, now),
            GateDecision::Denied(DenyReason::Battery)
        );
    }

    #[test]
    fn battery_exactly_at_minimum_is_allowed() {
        let now = Instant::now();
        let mut state = SafetyState::nominal(now);
        state.battery_fraction = 0.2;
        assert!(gate().evaluate(&state, now).is_allowed());
    }

    #[test]
    fn overheating_is_denied() {
        let now = Instant::now();
        let mut state = SafetyState::nominal(now);
        state.temperature_celsius = 80.5;
        assert_eq!(
            gate().evaluate(&state, now),
            GateDecision::Denied(DenyReason::Thermal)
        );
    }

    #[test]
    fn tilt_on_either_axis_is_denied() {
        let now = Instant::now();
        let mut state = SafetyState::nominal(now);
        state.orientation.roll = -0.6;
        assert_eq!(
            gate().evaluate(&state, now),
            GateDecision::Denied(DenyReason::Orientation)
        );

        state.orientation.roll = 0.0;
        state.orientation.pitch = 0.51;
        assert_eq!(
            gate().evaluate(&state, now),
            GateDecision::Denied(DenyReason::Orientation)
        );
    }

    #[test]
    fn stale_or_missing_readings_are_denied() {
        let now = Instant::now();
        let state = SafetyState::nominal(now);
        let later = now + Duration::from_millis(1001);
        assert_eq!(
            gate().evaluate(&state, later),
            GateDecision::Denied(DenyReason::Stale)
        );

        let mut unread = SafetyState::nominal(now);
        unread.last_sensor_update = None;
        assert_eq!(
            gate().evaluate(&unread, now),
            GateDecision::Denied(DenyReason::Stale)
        );
    }

    #[test]
    fn nan_readings_fail_their_condition() {
        let now = Instant::now();
        let mut state = SafetyState::nominal(now);
        state.temperature_celsius = f32::NAN;
        assert_eq!(
            gate().evaluate(&state, now),
            GateDecision::Denied(DenyReason::Thermal)
        );
    }

    #[test]
    fn halted_is_reported_before_everything_else() {
        let now = Instant::now();
        let mut state = SafetyState::initial();
        state.temperature_celsius = 200.0;
        assert_eq!(
            gate().evaluate(&state, now),
            GateDecision::Denied(DenyReason::Halted)
        );
    }

    #[test]
    fn first_failure_follows_fixed_order() {
        let now = Instant::now();
        let mut state = SafetyState::nominal(now);
        state.battery_fraction = 0.1;
        state.temperature_celsius = 95.0;
        state.orientation.pitch = 1.0;
        assert_eq!(
            gate().evaluate(&state, now),
            GateDecision::Denied(DenyReason::Battery)
        );
        assert_eq!(
            gate().conditions(&state, now).failing(),
            vec![
                DenyReason::Battery,
                DenyReason::Thermal,
                DenyReason::Orientation
            ]
        );
    }

    #[test]
    fn thresholds_deserialize_with_defaults() {
        let parsed: SafetyThresholds = toml::from_str("battery_min_fraction = 0.3").unwrap();
        assert_eq!(parsed.battery_min_fraction, 0.3);
        assert_eq!(parsed.temperature_max_celsius, 80.0);
        assert_eq!(parsed.sensor_staleness_max(), Duration::from_secs(1));
    }
}
