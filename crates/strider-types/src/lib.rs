use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// The closed set of locomotion actions a decision source may request.
///
/// Anything outside this set is rejected as an invalid decision before it can
/// reach the motion controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MotionKind {
    MoveForward,
    MoveBackward,
    TurnLeft,
    TurnRight,
    StrafeLeft,
    StrafeRight,
    Stop,
}

impl MotionKind {
    /// Every recognised kind, in table order.
    pub const ALL: [MotionKind; 7] = [
        MotionKind::MoveForward,
        MotionKind::MoveBackward,
        MotionKind::TurnLeft,
        MotionKind::TurnRight,
        MotionKind::StrafeLeft,
        MotionKind::StrafeRight,
        MotionKind::Stop,
    ];

    /// Wire name of the action, e.g. `"move_forward"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            MotionKind::MoveForward => "move_forward",
            MotionKind::MoveBackward => "move_backward",
            MotionKind::TurnLeft => "turn_left",
            MotionKind::TurnRight => "turn_right",
            MotionKind::StrafeLeft => "strafe_left",
            MotionKind::StrafeRight => "strafe_right",
            MotionKind::Stop => "stop",
        }
    }
}

impl fmt::Display for MotionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MotionKind {
    type Err = StriderError;

    /// Case-insensitive parse of the wire name.  Surrounding whitespace and
    /// quotes are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s
            .trim()
            .trim_matches(|c| c == '"' || c == '\'' || c == '`')
            .to_ascii_lowercase();
        MotionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| StriderError::DecisionInvalid(format!("unrecognized action '{s}'")))
    }
}

/// A (forward, lateral, yaw) velocity triple in m/s, m/s and rad/s.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VelocityTriple {
    pub forward: f32,
    pub lateral: f32,
    pub yaw: f32,
}

impl VelocityTriple {
    pub const ZERO: VelocityTriple = VelocityTriple {
        forward: 0.0,
        lateral: 0.0,
        yaw: 0.0,
    };

    pub const fn new(forward: f32, lateral: f32, yaw: f32) -> Self {
        Self {
            forward,
            lateral,
            yaw,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.forward == 0.0 && self.lateral == 0.0 && self.yaw == 0.0
    }
}

/// An unvalidated movement request together with the monotonic time at which
/// its source produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionIntent {
    pub kind: MotionKind,
    pub velocity: VelocityTriple,
    pub issued_at: Instant,
}

impl MotionIntent {
    pub fn new(kind: MotionKind, velocity: VelocityTriple, issued_at: Instant) -> Self {
        Self {
            kind,
            velocity,
            issued_at,
        }
    }

    /// A zero-velocity [`MotionKind::Stop`] intent.
    pub fn stop(issued_at: Instant) -> Self {
        Self::new(MotionKind::Stop, VelocityTriple::ZERO, issued_at)
    }

    /// Age of the intent relative to `now`.  Saturates at zero for intents
    /// stamped in the future.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.issued_at)
    }
}

/// A clamped velocity command ready for the actuator boundary.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VelocityCommand {
    pub forward: f32,
    pub lateral: f32,
    pub yaw: f32,
}

impl VelocityCommand {
    pub const STOP: VelocityCommand = VelocityCommand {
        forward: 0.0,
        lateral: 0.0,
        yaw: 0.0,
    };

    pub fn is_stop(&self) -> bool {
        *self == Self::STOP
    }
}

impl From<VelocityTriple> for VelocityCommand {
    fn from(v: VelocityTriple) -> Self {
        Self {
            forward: v.forward,
            lateral: v.lateral,
            yaw: v.yaw,
        }
    }
}

/// Body orientation from the IMU, in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Orientation {
    pub roll: f32,
    pub pitch: f32,
}

/// A single telemetry sample pushed by the sensor collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// State of charge in `[0.0, 1.0]`.
    pub battery_fraction: f32,
    pub temperature_celsius: f32,
    pub orientation: Orientation,
}

impl SensorReading {
    /// `true` when every field is finite and the battery fraction lies in
    /// `[0.0, 1.0]`.
    pub fn is_valid(&self) -> bool {
        self.battery_fraction.is_finite()
            && (0.0..=1.0).contains(&self.battery_fraction)
            && self.temperature_celsius.is_finite()
            && self.orientation.roll.is_finite()
            && self.orientation.pitch.is_finite()
    }
}

/// Why the safety gate vetoed a motion command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// The emergency-stop latch is set.
    Halted,
    Battery,
    Thermal,
    Orientation,
    /// The last sensor reading is older than the configured maximum.
    Stale,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DenyReason::Halted => "halted",
            DenyReason::Battery => "battery",
            DenyReason::Thermal => "thermal",
            DenyReason::Orientation => "orientation",
            DenyReason::Stale => "stale",
        })
    }
}

/// Emitted whenever the motion controller had to alter a requested velocity
/// to keep it within the configured per-axis maxima.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClampEvent {
    pub kind: MotionKind,
    pub requested: VelocityTriple,
    pub clamped: VelocityTriple,
}

/// Lifecycle of the decision scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// No decision has been accepted yet; Stop is applied.
    Idle,
    /// A fresh decision is being applied.
    Tracking,
    /// The last decision failed or the accepted one went stale; Stop is applied.
    Degraded,
    /// The emergency-stop latch is set.
    Halted,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Tracking => "tracking",
            SchedulerState::Degraded => "degraded",
            SchedulerState::Halted => "halted",
        })
    }
}

/// Unified event wrapper for the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "strider-runtime::scheduler"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Stamp `payload` with a fresh id and the current wall-clock time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Telemetry(SensorReading),
    CommandApplied {
        kind: MotionKind,
        command: VelocityCommand,
    },
    CommandRefused {
        kind: MotionKind,
        reason: String,
    },
    Clamped(ClampEvent),
    StateTransition {
        from: SchedulerState,
        to: SchedulerState,
    },
    DecisionAccepted {
        kind: MotionKind,
        confidence: f32,
    },
    DecisionRejected(String),
    /// Consecutive actuator dispatch failures reached the alert threshold.
    DispatchAlert { consecutive_failures: u32 },
}

/// Error taxonomy shared by every Strider crate.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StriderError {
    #[error("Safety gate denied motion: {reason}")]
    SafetyDenied { reason: DenyReason },

    #[error("Dispatch to {actuator} failed: {details}")]
    DispatchFailed { actuator: String, details: String },

    #[error("Decision source timed out after {0} ms")]
    DecisionTimeout(u64),

    #[error("Invalid decision: {0}")]
    DecisionInvalid(String),

    #[error("Sensor data is stale")]
    SensorStale,

    #[error("Decision source error: {0}")]
    DecisionSource(String),

    #[error("Event bus error: {0}")]
    Channel(String),
}

impl From<DenyReason> for StriderError {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::Stale => StriderError::SensorStale,
            reason => StriderError::SafetyDenied { reason },
        }
    }
}

impl StriderError {
    /// `true` for refusals caused by the emergency-stop latch.
    pub fn is_halted(&self) -> bool {
        matches!(
            self,
            StriderError::SafetyDenied {
                reason: DenyReason::Halted
            }
        )
    }
}
