//! In-process simulation drivers for running without hardware.
//!
//! [`SimActuator`] records every command it accepts and can be told to fail
//! or to take time per dispatch.  [`SimSensor`] reports a fixed (by default
//! nominal) reading and [`SimCamera`] returns a 1×1 placeholder frame.  The
//! full Strider stack runs against these in `--sim` mode and in tests.
//!
//! # Example
//!
//! ```rust
//! use strider_hal::actuator::{Actuator, HaltFlag};
//! use strider_hal::sim::SimActuator;
//! use strider_types::VelocityCommand;
//!
//! let mut actuator = SimActuator::new("sim_legs");
//! let probe = actuator.probe();
//!
//! actuator
//!     .dispatch(&VelocityCommand::STOP, &HaltFlag::inactive())
//!     .expect("sim dispatch must succeed");
//! assert_eq!(probe.last(), Some(VelocityCommand::STOP));
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use strider_types::{Orientation, SensorReading, StriderError, VelocityCommand};
use tracing::debug;

use crate::actuator::{Actuator, HaltFlag};
use crate::camera::{Camera, CameraFrame};
use crate::sensor::SensorSource;

/// Number of accepted commands the simulator keeps for inspection.
const HISTORY_CAPACITY: usize = 1024;

/// Poll interval while a slow dispatch watches the halt flag.
const HALT_POLL: Duration = Duration::from_millis(2);

// ────────────────────────────────────────────────────────────────────────────
// Actuator
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct SimActuatorLog {
    history: Mutex<VecDeque<VelocityCommand>>,
    failing: AtomicBool,
}

/// A simulated locomotion driver.
pub struct SimActuator {
    id: String,
    latency: Duration,
    log: Arc<SimActuatorLog>,
}

impl SimActuator {
    /// Create a simulated actuator that accepts commands instantly.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            latency: Duration::ZERO,
            log: Arc::new(SimActuatorLog::default()),
        }
    }

    /// Make every non-Stop dispatch take `latency`, watching the halt flag
    /// while it waits.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// A handle that observes this actuator after it has been moved into the
    /// motion controller.
    pub fn probe(&self) -> SimActuatorProbe {
        SimActuatorProbe {
            log: Arc::clone(&self.log),
        }
    }

    fn failure(&self, details: &str) -> StriderError {
        StriderError::DispatchFailed {
            actuator: self.id.clone(),
            details: details.to_string(),
        }
    }
}

impl Actuator for SimActuator {
    fn id(&self) -> &str {
        &self.id
    }

    fn dispatch(
        &mut self,
        command: &VelocityCommand,
        halt: &HaltFlag<'_>,
    ) -> Result<(), StriderError> {
        if self.log.failing.load(Ordering::Acquire) {
            return Err(self.failure("simulated link failure"));
        }

        if !command.is_stop() && !self.latency.is_zero() {
            let deadline = Instant::now() + self.latency;
            while Instant::now() < deadline {
                if halt.is_raised() {
                    return Err(self.failure("aborted by emergency stop"));
                }
                thread::sleep(HALT_POLL);
            }
        }

        debug!(
            actuator = %self.id,
            forward = command.forward,
            lateral = command.lateral,
            yaw = command.yaw,
            "SIM: velocity move"
        );

        let mut history = self
            .log
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if history.len() == HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(*command);
        Ok(())
    }
}

/// Inspection and fault-injection handle for a [`SimActuator`].
#[derive(Clone)]
pub struct SimActuatorProbe {
    log: Arc<SimActuatorLog>,
}

impl SimActuatorProbe {
    /// Every command accepted so far, oldest first.
    pub fn commands(&self) -> Vec<VelocityCommand> {
        self.history().iter().copied().collect()
    }

    /// The most recently accepted command.
    pub fn last(&self) -> Option<VelocityCommand> {
        self.history().back().copied()
    }

    /// While `true`, every dispatch fails as if the link were down.
    pub fn set_failing(&self, failing: bool) {
        self.log.failing.store(failing, Ordering::Release);
    }

    fn history(&self) -> std::sync::MutexGuard<'_, VecDeque<VelocityCommand>> {
        self.log
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Sensor
// ────────────────────────────────────────────────────────────────────────────

/// A simulated telemetry source returning a fixed reading.  Always succeeds.
pub struct SimSensor {
    id: String,
    reading: SensorReading,
}

impl SimSensor {
    /// A level, cool robot with a full battery.
    pub fn nominal(id: impl Into<String>) -> Self {
        Self::with_reading(
            id,
            SensorReading {
                battery_fraction: 1.0,
                temperature_celsius: 25.0,
                orientation: Orientation::default(),
            },
        )
    }

    pub fn with_reading(id: impl Into<String>, reading: SensorReading) -> Self {
        Self {
            id: id.into(),
            reading,
        }
    }
}

impl SensorSource for SimSensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn read(&mut self) -> Result<SensorReading, StriderError> {
        Ok(self.reading)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Camera
// ────────────────────────────────────────────────────────────────────────────

/// 1×1 black PNG.
const PLACEHOLDER_PNG: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

/// A simulated camera that returns a blank 1×1 frame.  Always succeeds.
pub struct SimCamera {
    id: String,
}

impl SimCamera {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl Camera for SimCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn capture(&mut self) -> Result<CameraFrame, StriderError> {
        Ok(CameraFrame {
            width: 1,
            height: 1,
            media_type: "image/png".to_string(),
            base64_data: PLACEHOLDER_PNG.to_string(),
        })
    }
}
