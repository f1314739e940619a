//! The actuator boundary: where clamped velocity commands leave the core.
//!
//! A locomotion driver (robot SDK binding, simulator, test double) implements
//! [`Actuator`].  Only the kernel's motion controller holds the driver, so the
//! rest of the system can never reach the hardware without passing the safety
//! gate.

use std::sync::atomic::{AtomicBool, Ordering};

use strider_types::{StriderError, VelocityCommand};

static NEVER_RAISED: AtomicBool = AtomicBool::new(false);

/// Read-only view of the emergency-stop latch handed to an in-flight dispatch.
///
/// Drivers whose dispatch takes noticeable time should poll
/// [`HaltFlag::is_raised`] and abandon the command when it flips.
#[derive(Clone, Copy)]
pub struct HaltFlag<'a>(&'a AtomicBool);

impl<'a> HaltFlag<'a> {
    pub fn new(flag: &'a AtomicBool) -> Self {
        Self(flag)
    }

    /// A flag that is never raised.  Used for Stop commands, which must not be
    /// aborted.
    pub fn inactive() -> HaltFlag<'static> {
        HaltFlag(&NEVER_RAISED)
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A velocity-controlled locomotion driver.
pub trait Actuator: Send {
    /// Stable identifier for this driver, e.g. `"g1_locomotion"`.
    fn id(&self) -> &str;

    /// Send `command` to the hardware.
    ///
    /// Fire-and-forget: `Ok(())` means the command was handed over, nothing
    /// more.  Implementations must not retry internally and must never abort a
    /// zero-velocity command.
    ///
    /// # Errors
    ///
    /// Returns [`StriderError::DispatchFailed`] if the hardware is unreachable
    /// or the dispatch was abandoned because `halt` was raised.
    fn dispatch(&mut self, command: &VelocityCommand, halt: &HaltFlag<'_>)
    -> Result<(), StriderError>;
}
