//! [`ControllerHandle`] – the motion controller and sole owner of the actuator.
//!
//! The actuator is moved in at construction and never handed back out, so
//! [`ControllerHandle::apply`] is the only way a command can reach hardware.
//! Each `apply` runs under one mutex that also guards the [`SafetyState`] and
//! the emergency-stop latch:
//!
//! 1. Snapshot the state and evaluate the [`SafetyGate`].  On denial, dispatch
//!    Stop and return [`ApplyOutcome::Refused`].
//! 2. Clamp each axis to [`MotionLimits`].  Any change produces a
//!    [`ClampEvent`] that is logged and returned.
//! 3. Dispatch.  Failures are never retried; Stop is attempted instead.
//!
//! A lock-free mirror of the latch is raised by
//! [`EmergencyStop::trigger`][crate::emergency_stop::EmergencyStop::trigger]
//! *before* it takes the mutex and is passed to the actuator as a
//! [`HaltFlag`], so a slow in-flight dispatch can abort rather than delay the
//! stop.
//!
//! # Example
//!
//! ```
//! use std::time::Instant;
//! use strider_hal::sim::SimActuator;
//! use strider_kernel::motion_controller::{ApplyOutcome, ControllerHandle, MotionLimits};
//! use strider_kernel::safety_gate::{SafetyGate, SafetyThresholds};
//! use strider_types::{MotionIntent, MotionKind, Orientation, SensorReading, VelocityTriple};
//!
//! let controller = ControllerHandle::new(
//!     SafetyGate::new(SafetyThresholds::default()),
//!     MotionLimits::default(),
//!     Box::new(SimActuator::new("sim_legs")),
//! );
//!
//! // Latched until a reading arrives and the controller is armed.
//! controller.ingest(&SensorReading {
//!     battery_fraction: 0.9,
//!     temperature_celsius: 30.0,
//!     orientation: Orientation::default(),
//! });
//! controller.arm().expect("fresh reading present");
//!
//! let intent = MotionIntent::new(
//!     MotionKind::MoveForward,
//!     VelocityTriple::new(0.3, 0.0, 0.0),
//!     Instant::now(),
//! );
//! assert!(matches!(controller.apply(&intent), ApplyOutcome::Applied { clamp: None, .. }));
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use strider_hal::actuator::{Actuator, HaltFlag};
use strider_types::{
    ClampEvent, DenyReason, MotionIntent, MotionKind, SensorReading, StriderError,
    VelocityCommand, VelocityTriple,
};
use tracing::{debug, error, info, warn};

use crate::emergency_stop::EmergencyStop;
use crate::safety_gate::{GateDecision, SafetyConditions, SafetyGate};
use crate::safety_state::SafetyState;

// ────────────────────────────────────────────────────────────────────────────
// Limits
// ────────────────────────────────────────────────────────────────────────────

/// Per-axis velocity maxima, loaded from the `[limits]` config section.
///
/// Each axis is clamped to `[-max, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionLimits {
    /// m/s
    pub max_forward: f32,
    /// m/s
    pub max_lateral: f32,
    /// rad/s
    pub max_yaw: f32,
}

impl Default for MotionLimits {
    fn default() -> Self {
        Self {
            max_forward: 0.3,
            max_lateral: 0.2,
            max_yaw: 0.3,
        }
    }
}

impl MotionLimits {
    /// Clamp `velocity` into the limits.  NaN becomes zero.
    pub fn clamp(&self, velocity: VelocityTriple) -> VelocityTriple {
        VelocityTriple {
            forward: clamp_axis(velocity.forward, self.max_forward),
            lateral: clamp_axis(velocity.lateral, self.max_lateral),
            yaw: clamp_axis(velocity.yaw, self.max_yaw),
        }
    }
}

fn clamp_axis(value: f32, max: f32) -> f32 {
    if value.is_nan() || max.is_nan() {
        return 0.0;
    }
    let max = max.abs();
    value.clamp(-max, max)
}

// ────────────────────────────────────────────────────────────────────────────
// Outcome
// ────────────────────────────────────────────────────────────────────────────

/// Result of [`ControllerHandle::apply`].
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// `command` was handed to the actuator.  `clamp` is set when the
    /// requested velocity had to be reduced.
    Applied {
        command: VelocityCommand,
        clamp: Option<ClampEvent>,
    },
    /// Nothing but Stop was dispatched.
    Refused(StriderError),
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied { .. })
    }

    /// The command that reached the actuator on success.
    pub fn command(&self) -> Option<VelocityCommand> {
        match self {
            ApplyOutcome::Applied { command, .. } => Some(*command),
            ApplyOutcome::Refused(_) => None,
        }
    }

    pub fn refusal(&self) -> Option<&StriderError> {
        match self {
            ApplyOutcome::Refused(err) => Some(err),
            ApplyOutcome::Applied { .. } => None,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Shared state
// ────────────────────────────────────────────────────────────────────────────

/// Everything covered by the controller mutex.
pub(crate) struct Guarded {
    pub(crate) state: SafetyState,
    actuator: Box<dyn Actuator>,
    /// Set by an explicit trigger, as opposed to the start-up latch.
    pub(crate) triggered: bool,
    last_denial: Option<DenyReason>,
}

impl Guarded {
    /// Dispatch Stop.  Stop ignores the halt flag and is never aborted.
    pub(crate) fn dispatch_stop(&mut self) {
        if let Err(err) = self
            .actuator
            .dispatch(&VelocityCommand::STOP, &HaltFlag::inactive())
        {
            error!(actuator = %self.actuator.id(), error = %err, "Failed to dispatch Stop");
        }
    }
}

pub(crate) struct Shared {
    guarded: Mutex<Guarded>,
    /// Lock-free mirror of `state.emergency_stop`.  Raised before the mutex is
    /// taken on trigger and again under it.  Lowered only under the mutex.
    pub(crate) halt: AtomicBool,
    gate: SafetyGate,
    limits: MotionLimits,
    actuator_id: String,
    dispatch_failures: AtomicU32,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Guarded> {
        self.guarded.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ControllerHandle
// ────────────────────────────────────────────────────────────────────────────

/// Cheaply clonable, thread-safe handle to the motion controller.
#[derive(Clone)]
pub struct ControllerHandle {
    shared: Arc<Shared>,
}

impl ControllerHandle {
    /// Take ownership of `actuator`.  The controller starts latched with
    /// [`SafetyState::initial`].
    pub fn new(gate: SafetyGate, limits: MotionLimits, actuator: Box<dyn Actuator>) -> Self {
        let actuator_id = actuator.id().to_string();
        Self {
            shared: Arc::new(Shared {
                guarded: Mutex::new(Guarded {
                    state: SafetyState::initial(),
                    actuator,
                    triggered: false,
                    last_denial: None,
                }),
                halt: AtomicBool::new(true),
                gate,
                limits,
                actuator_id,
                dispatch_failures: AtomicU32::new(0),
            }),
        }
    }

    /// Gate, clamp and dispatch `intent` as one step with respect to the
    /// emergency-stop latch.
    pub fn apply(&self, intent: &MotionIntent) -> ApplyOutcome {
        let mut guarded = self.shared.lock();
        let snapshot = guarded.state;

        if let GateDecision::Denied(reason) = self.shared.gate.evaluate(&snapshot, Instant::now()) {
            if guarded.last_denial != Some(reason) {
                warn!(kind = %intent.kind, reason = %reason, "Safety gate denied motion");
            } else {
                debug!(kind = %intent.kind, reason = %reason, "Safety gate denied motion");
            }
            guarded.last_denial = Some(reason);
            guarded.dispatch_stop();
            return ApplyOutcome::Refused(reason.into());
        }
        if guarded.last_denial.take().is_some() {
            info!("Safety gate allows motion again");
        }

        let requested = intent.velocity;
        let clamped = self.shared.limits.clamp(requested);
        let clamp = (clamped != requested).then(|| {
            warn!(
                kind = %intent.kind,
                requested = ?requested,
                clamped = ?clamped,
                "Velocity clamped to configured limits"
            );
            ClampEvent {
                kind: intent.kind,
                requested,
                clamped,
            }
        });

        let command = VelocityCommand::from(clamped);
        let flag = if intent.kind == MotionKind::Stop || command.is_stop() {
            HaltFlag::inactive()
        } else {
            HaltFlag::new(&self.shared.halt)
        };

        // A trigger that raced the gate check shows up here.
        if flag.is_raised() {
            guarded.dispatch_stop();
            return ApplyOutcome::Refused(DenyReason::Halted.into());
        }

        match guarded.actuator.dispatch(&command, &flag) {
            Ok(()) => {
                self.shared.dispatch_failures.store(0, Ordering::Relaxed);
                debug!(kind = %intent.kind, ?command, "Command dispatched");
                ApplyOutcome::Applied { command, clamp }
            }
            Err(_) if flag.is_raised() => {
                warn!(kind = %intent.kind, "In-flight dispatch aborted by emergency stop");
                guarded.dispatch_stop();
                ApplyOutcome::Refused(DenyReason::Halted.into())
            }
            Err(err) => {
                let failures = self.shared.dispatch_failures.fetch_add(1, Ordering::Relaxed) + 1;
                let err = match err {
                    StriderError::DispatchFailed { .. } => err,
                    other => StriderError::DispatchFailed {
                        actuator: self.shared.actuator_id.clone(),
                        details: other.to_string(),
                    },
                };
                warn!(kind = %intent.kind, error = %err, failures, "Dispatch failed");
                guarded.dispatch_stop();
                ApplyOutcome::Refused(err)
            }
        }
    }

    /// Record a sensor reading stamped with the current monotonic time.
    ///
    /// Returns `false` (and leaves the state untouched) for readings with
    /// non-finite values or a battery fraction outside `[0.0, 1.0]`.
    pub fn ingest(&self, reading: &SensorReading) -> bool {
        self.ingest_at(reading, Instant::now())
    }

    /// [`ingest`][Self::ingest] with an explicit timestamp.
    pub fn ingest_at(&self, reading: &SensorReading, at: Instant) -> bool {
        if !reading.is_valid() {
            warn!(?reading, "Discarding invalid sensor reading");
            return false;
        }
        self.shared.lock().state.record_reading(reading, at);
        true
    }

    /// Release the start-up latch.
    ///
    /// # Errors
    ///
    /// - [`StriderError::SensorStale`] if no reading has been ingested yet.
    /// - [`StriderError::SafetyDenied`] (`Halted`) if the latch was set by
    ///   an explicit trigger; only [`EmergencyStop::clear`] releases that.
    pub fn arm(&self) -> Result<(), StriderError> {
        let mut guarded = self.shared.lock();
        if guarded.triggered {
            return Err(DenyReason::Halted.into());
        }
        if guarded.state.last_sensor_update.is_none() {
            return Err(StriderError::SensorStale);
        }
        if guarded.state.emergency_stop {
            guarded.state.emergency_stop = false;
            self.shared.halt.store(false, Ordering::SeqCst);
            info!(actuator = %self.shared.actuator_id, "Motion controller armed");
        }
        Ok(())
    }

    /// A handle that can latch or clear the emergency stop from any thread.
    pub fn emergency_stop(&self) -> EmergencyStop {
        EmergencyStop::new(Arc::clone(&self.shared))
    }

    /// Lock-free read of the latch.
    pub fn is_halted(&self) -> bool {
        self.shared.halt.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> SafetyState {
        self.shared.lock().state
    }

    /// Per-condition report for status output.
    pub fn conditions(&self) -> SafetyConditions {
        let state = self.snapshot();
        self.shared.gate.conditions(&state, Instant::now())
    }

    pub fn consecutive_dispatch_failures(&self) -> u32 {
        self.shared.dispatch_failures.load(Ordering::Relaxed)
    }

    pub fn limits(&self) -> &MotionLimits {
        &self.shared.limits
    }

    pub fn gate(&self) -> &SafetyGate {
        &self.shared.gate
    }

    pub fn actuator_id(&self) -> &str {
        &self.shared.actuator_id
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use strider_hal::sim::{SimActuator, SimActuatorProbe};
    use strider_types::Orientation;

    use super::*;
    use crate::safety_gate::SafetyThresholds;

    fn nominal_reading() -> SensorReading {
        SensorReading {
            battery_fraction: 0.9,
            temperature_celsius: 35.0,
            orientation: Orientation::default(),
        }
    }

    fn armed_controller() -> (ControllerHandle, SimActuatorProbe) {
        armed_with(SimActuator::new("sim"))
    }

    fn armed_with(actuator: SimActuator) -> (ControllerHandle, SimActuatorProbe) {
        let probe = actuator.probe();
        let controller = ControllerHandle::new(
            SafetyGate::new(SafetyThresholds::default()),
            MotionLimits::default(),
            Box::new(actuator),
        );
        assert!(controller.ingest(&nominal_reading()));
        controller.arm().unwrap();
        (controller, probe)
    }

    fn intent(kind: MotionKind, forward: f32, lateral: f32, yaw: f32) -> MotionIntent {
        MotionIntent::new(
            kind,
            VelocityTriple::new(forward, lateral, yaw),
            Instant::now(),
        )
    }

    fn forward() -> MotionIntent {
        intent(MotionKind::MoveForward, 0.3, 0.0, 0.0)
    }

    #[test]
    fn fresh_forward_is_applied_unclamped() {
        let (controller, probe) = armed_controller();
        let outcome = controller.apply(&forward());
        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                command: VelocityCommand {
                    forward: 0.3,
                    lateral: 0.0,
                    yaw: 0.0
                },
                clamp: None,
            }
        );
        assert_eq!(probe.last().map(|c| c.forward), Some(0.3));
    }

    #[test]
    fn controller_starts_latched() {
        let actuator = SimActuator::new("sim");
        let probe = actuator.probe();
        let controller = ControllerHandle::new(
            SafetyGate::default(),
            MotionLimits::default(),
            Box::new(actuator),
        );
        assert!(controller.is_halted());
        assert_eq!(controller.arm(), Err(StriderError::SensorStale));
        let outcome = controller.apply(&forward());
        assert!(outcome.refusal().is_some_and(StriderError::is_halted));
        assert_eq!(probe.last(), Some(VelocityCommand::STOP));
    }

    #[test]
    fn over_limit_velocity_is_clamped_and_reported() {
        let (controller, probe) = armed_controller();
        let outcome = controller.apply(&intent(MotionKind::MoveForward, 1.5, -0.9, 4.0));
        let ApplyOutcome::Applied { command, clamp } = outcome else {
            panic!("expected Applied, got {outcome:?}");
        };
        assert_eq!(command.forward, 0.3);
        assert_eq!(command.lateral, -0.2);
        assert_eq!(command.yaw, 0.3);
        let clamp = clamp.expect("clamp event expected");
        assert_eq!(clamp.requested.forward, 1.5);
        assert_eq!(clamp.clamped.yaw, 0.3);
        assert_eq!(probe.last(), Some(command));
    }

    #[test]
    fn nan_velocity_becomes_zero() {
        let (controller, _probe) = armed_controller();
        let outcome = controller.apply(&intent(MotionKind::TurnLeft, 0.0, 0.0, f32::NAN));
        let ApplyOutcome::Applied { command, clamp } = outcome else {
            panic!("expected Applied");
        };
        assert!(command.is_stop());
        assert!(clamp.is_some());
    }

    #[test]
    fn every_dispatched_axis_is_within_limits() {
        let (controller, probe) = armed_controller();
        let limits = *controller.limits();
        for v in [-10.0, -0.31, -0.3, 0.0, 0.15, 0.3, 7.5, f32::INFINITY] {
            controller.apply(&intent(MotionKind::MoveForward, v, v, v));
        }
        for cmd in probe.commands() {
            assert!(cmd.forward.abs() <= limits.max_forward);
            assert!(cmd.lateral.abs() <= limits.max_lateral);
            assert!(cmd.yaw.abs() <= limits.max_yaw);
        }
    }

    #[test]
    fn low_battery_is_refused_with_stop() {
        let (controller, probe) = armed_controller();
        controller.ingest(&SensorReading {
            battery_fraction: 0.15,
            ..nominal_reading()
        });
        let outcome = controller.apply(&forward());
        assert_eq!(
            outcome,
            ApplyOutcome::Refused(StriderError::SafetyDenied {
                reason: DenyReason::Battery
            })
        );
        assert_eq!(probe.last(), Some(VelocityCommand::STOP));
    }

    #[test]
    fn stale_sensor_data_is_refused() {
        let (controller, probe) = armed_controller();
        let old = Instant::now()
            .checked_sub(Duration::from_secs(5))
            .expect("monotonic clock too young");
        controller.ingest_at(&nominal_reading(), old);
        assert_eq!(
            controller.apply(&forward()),
            ApplyOutcome::Refused(StriderError::SensorStale)
        );
        assert_eq!(probe.last(), Some(VelocityCommand::STOP));
    }

    #[test]
    fn invalid_readings_are_discarded() {
        let (controller, _probe) = armed_controller();
        let before = controller.snapshot();
        assert!(!controller.ingest(&SensorReading {
            battery_fraction: f32::NAN,
            ..nominal_reading()
        }));
        assert_eq!(controller.snapshot(), before);
    }

    #[test]
    fn dispatch_failures_are_counted_and_reset() {
        let (controller, probe) = armed_controller();
        probe.set_failing(true);
        for expected in 1..=3 {
            let outcome = controller.apply(&forward());
            assert!(matches!(
                outcome,
                ApplyOutcome::Refused(StriderError::DispatchFailed { .. })
            ));
            assert_eq!(controller.consecutive_dispatch_failures(), expected);
        }

        probe.set_failing(false);
        assert!(controller.apply(&forward()).is_applied());
        assert_eq!(controller.consecutive_dispatch_failures(), 0);
    }

    #[test]
    fn conditions_report_reflects_state() {
        let (controller, _probe) = armed_controller();
        assert!(controller.conditions().all_ok());
        controller.ingest(&SensorReading {
            temperature_celsius: 90.0,
            ..nominal_reading()
        });
        assert_eq!(controller.conditions().failing(), vec![DenyReason::Thermal]);
    }
}
