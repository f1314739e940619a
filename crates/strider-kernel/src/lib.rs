//! `strider-kernel` – Safety & Motion
//!
//! The part of Strider that decides whether the robot may move and owns the
//! only path to the actuator.  It does not think; it enforces limits.
//!
//! # Modules
//!
//! - [`safety_state`] – [`SafetyState`][safety_state::SafetyState]: battery,
//!   thermal, orientation and sensor freshness plus the emergency-stop latch.
//! - [`safety_gate`] – [`SafetyGate`][safety_gate::SafetyGate]: pure
//!   evaluation of a state against [`SafetyThresholds`][safety_gate::SafetyThresholds].
//! - [`motion_controller`] – [`ControllerHandle`][motion_controller::ControllerHandle]:
//!   gates, clamps and dispatches motion intents under one mutex with the
//!   latch.
//! - [`emergency_stop`] – [`EmergencyStop`][emergency_stop::EmergencyStop]:
//!   trigger/clear handle usable from any thread.

pub mod emergency_stop;
pub mod motion_controller;
pub mod safety_gate;
pub mod safety_state;

pub use emergency_stop::EmergencyStop;
pub use motion_controller::{ApplyOutcome, ControllerHandle, MotionLimits};
pub use safety_gate::{GateDecision, SafetyConditions, SafetyGate, SafetyThresholds};
pub use safety_state::SafetyState;
