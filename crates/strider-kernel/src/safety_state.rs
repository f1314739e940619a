//! [`SafetyState`] – the live physical snapshot the safety gate judges.
//!
//! One instance lives inside the motion controller's guarded domain.  It is
//! mutated only by sensor ingestion and by the emergency-stop trigger/clear
//! path; everything else works on copies returned by
//! [`ControllerHandle::snapshot`][crate::motion_controller::ControllerHandle::snapshot].

use std::time::{Duration, Instant};

use strider_types::{Orientation, SensorReading};

/// Battery, thermal and orientation state plus the emergency-stop latch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafetyState {
    /// State of charge in `[0.0, 1.0]`.
    pub battery_fraction: f32,
    pub temperature_celsius: f32,
    pub orientation: Orientation,
    /// Monotonic time of the last accepted reading.  `None` until the first
    /// reading arrives, which the gate treats as stale.
    pub last_sensor_update: Option<Instant>,
    pub emergency_stop: bool,
}

impl SafetyState {
    /// Conservative start-up state: empty battery, no readings, latch set.
    pub fn initial() -> Self {
        Self {
            battery_fraction: 0.0,
            temperature_celsius: 0.0,
            orientation: Orientation::default(),
            last_sensor_update: None,
            emergency_stop: true,
        }
    }

    /// A clear, freshly-read state.  Handy for tests and simulations.
    pub fn nominal(at: Instant) -> Self {
        Self {
            battery_fraction: 1.0,
            temperature_celsius: 25.0,
            orientation: Orientation::default(),
            last_sensor_update: Some(at),
            emergency_stop: false,
        }
    }

    /// Copy the physical fields of `reading` and stamp them with `at`.
    /// The latch is left untouched.
    pub fn record_reading(&mut self, reading: &SensorReading, at: Instant) {
        self.battery_fraction = reading.battery_fraction;
        self.temperature_celsius = reading.temperature_celsius;
        self.orientation = reading.orientation;
        self.last_sensor_update = Some(at);
    }

    /// Age of the last reading relative to `now`, or `None` if nothing has
    /// been read yet.
    pub fn sensor_age(&self, now: Instant) -> Option<Duration> {
        self.last_sensor_update
            .map(|at| now.saturating_duration_since(at))
    }
}

impl Default for SafetyState {
    fn default() -> Self {
        Self::initial()
    }
}
