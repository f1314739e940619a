//! The decision-source seam and an in-process scripted implementation.
//!
//! A [`DecisionSource`] answers "what should the robot do next?".  The
//! scheduler reads only [`Decision::action`], which must parse as a
//! [`MotionKind`][strider_types::MotionKind]; everything else is logged and
//! otherwise ignored.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strider_types::StriderError;

/// A navigation decision as returned by a source.  Untrusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Requested action, e.g. `"move_forward"`.
    pub action: String,
    pub reason: Option<String>,
    /// Source-estimated confidence in `[0.0, 1.0]`.
    pub confidence: f32,
}

/// Anything that can produce navigation decisions.
#[async_trait]
pub trait DecisionSource: Send + Sync {
    /// Short name used in logs and events.
    fn name(&self) -> &str;

    /// Produce the next decision.
    ///
    /// `timeout` is advisory: the scheduler enforces it regardless and drops
    /// the future when it expires.
    async fn request_decision(&self, timeout: Duration) -> Result<Decision, StriderError>;
}

/// Replays a fixed list of actions in a loop.  Used by `--sim`.
pub struct ScriptedSource {
    actions: Vec<String>,
    cursor: AtomicUsize,
}

impl ScriptedSource {
    pub fn new<I, S>(actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            actions: actions.into_iter().map(Into::into).collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    /// A short patrol: forward, look around, sidestep, pause.
    pub fn patrol() -> Self {
        Self::new([
            "move_forward",
            "move_forward",
            "turn_left",
            "move_forward",
            "turn_right",
            "strafe_left",
            "strafe_right",
            "stop",
        ])
    }
}

#[async_trait]
impl DecisionSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn request_decision(&self, _timeout: Duration) -> Result<Decision, StriderError> {
        if self.actions.is_empty() {
            return Err(StriderError::DecisionSource("empty script".into()));
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.actions.len();
        Ok(Decision {
            action: self.actions[index].clone(),
            reason: Some(format!("scripted step {index}")),
            confidence: 1.0,
        })
    }
}
