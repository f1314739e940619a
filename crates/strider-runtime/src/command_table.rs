//! [`CommandTable`] – the fixed mapping from action kind to velocity triple.
//!
//! Loaded from the `[commands]` config section.  Values are requests, not
//! guarantees: the motion controller still clamps them to its limits.
//!
//! ```toml
//! [commands.move_forward]
//! forward = 0.3
//!
//! [commands.turn_left]
//! yaw = 0.3
//! ```

use std::time::Instant;

use serde::{Deserialize, Serialize};
use strider_types::{MotionIntent, MotionKind, VelocityTriple};

/// Velocity for every non-Stop [`MotionKind`].  Stop is always zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandTable {
    pub move_forward: VelocityTriple,
    pub move_backward: VelocityTriple,
    pub turn_left: VelocityTriple,
    pub turn_right: VelocityTriple,
    pub strafe_left: VelocityTriple,
    pub strafe_right: VelocityTriple,
}

impl Default for CommandTable {
    fn default() -> Self {
        Self {
            move_forward: VelocityTriple::new(0.3, 0.0, 0.0),
            move_backward: VelocityTriple::new(-0.15, 0.0, 0.0),
            turn_left: VelocityTriple::new(0.0, 0.0, 0.3),
            turn_right: VelocityTriple::new(0.0, 0.0, -0.3),
            strafe_left: VelocityTriple::new(0.0, 0.2, 0.0),
            strafe_right: VelocityTriple::new(0.0, -0.2, 0.0),
        }
    }
}

impl CommandTable {
    pub fn velocity_for(&self, kind: MotionKind) -> VelocityTriple {
        match kind {
            MotionKind::MoveForward => self.move_forward,
            MotionKind::MoveBackward => self.move_backward,
            MotionKind::TurnLeft => self.turn_left,
            MotionKind::TurnRight => self.turn_right,
            MotionKind::StrafeLeft => self.strafe_left,
            MotionKind::StrafeRight => self.strafe_right,
            MotionKind::Stop => VelocityTriple::ZERO,
        }
    }

    /// Build an intent for `kind` stamped with `issued_at`.
    pub fn intent(&self, kind: MotionKind, issued_at: Instant) -> MotionIntent {
        MotionIntent::new(kind, self.velocity_for(kind), issued_at)
    }
}
