//! [`EmergencyStop`] – the latch that forces an immediate halt.
//!
//! A handle is obtained from
//! [`ControllerHandle::emergency_stop`][crate::motion_controller::ControllerHandle::emergency_stop]
//! and may be cloned into signal handlers, operator threads or async tasks.
//!
//! [`trigger`][EmergencyStop::trigger] raises the lock-free mirror first (so an
//! in-flight dispatch aborts), then takes the controller mutex, sets the latch,
//! raises the mirror again and dispatches Stop.  It never waits on anything but
//! that mutex.  The latch persists until [`clear`][EmergencyStop::clear] is
//! called explicitly.
//!
//! The mirror is only ever lowered under the mutex, and every trigger re-raises
//! it under the mutex, so a `clear` that wins the lock race against a pending
//! trigger cannot leave the mirror down while the latch is set.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tracing::{error, info};

use crate::motion_controller::{Guarded, Shared};

/// Clonable trigger/clear handle for the emergency-stop latch.
#[derive(Clone)]
pub struct EmergencyStop {
    shared: Arc<Shared>,
}

impl EmergencyStop {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Latch the emergency stop and dispatch Stop.  Safe to call repeatedly
    /// and from any thread.
    pub fn trigger(&self, reason: &str) {
        self.shared.halt.store(true, Ordering::SeqCst);

        let mut guarded = self.shared.lock();
        guarded.state.emergency_stop = true;
        guarded.triggered = true;
        self.shared.halt.store(true, Ordering::SeqCst);
        error!(reason, "EMERGENCY STOP triggered");
        guarded.dispatch_stop();
    }

    /// Reset the latch.  Motion resumes only once the safety gate allows it.
    pub fn clear(&self) {
        let mut guarded = self.shared.lock();
        self.release(&mut guarded);
    }

    fn release(&self, guarded: &mut Guarded) {
        guarded.state.emergency_stop = false;
        guarded.triggered = false;
        self.shared.halt.store(false, Ordering::SeqCst);
        info!("Emergency stop cleared");
    }

    /// Lock-free read of the latch.
    pub fn is_triggered(&self) -> bool {
        self.shared.halt.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::{Duration, Instant};

    use strider_hal::sim::{SimActuator, SimActuatorProbe};
    use strider_types::{
        DenyReason, MotionIntent, MotionKind, Orientation, SensorReading, StriderError,
        VelocityCommand, VelocityTriple,
    };

    use super::*;
    use crate::motion_controller::{ApplyOutcome, ControllerHandle, MotionLimits};
    use crate::safety_gate::SafetyGate;

    fn armed_with(actuator: SimActuator) -> (ControllerHandle, SimActuatorProbe) {
        let probe = actuator.probe();
        let controller = ControllerHandle::new(
            SafetyGate::default(),
            MotionLimits::default(),
            Box::new(actuator),
        );
        controller.ingest(&SensorReading {
            battery_fraction: 0.9,
            temperature_celsius: 30.0,
            orientation: Orientation::default(),
        });
        controller.arm().unwrap();
        (controller, probe)
    }

    fn forward() -> MotionIntent {
        MotionIntent::new(
            MotionKind::MoveForward,
            VelocityTriple::new(0.3, 0.0, 0.0),
            Instant::now(),
        )
    }

    fn halted() -> ApplyOutcome {
        ApplyOutcome::Refused(StriderError::SafetyDenied {
            reason: DenyReason::Halted,
        })
    }

    #[test]
    fn trigger_refuses_every_apply_until_cleared() {
        let (controller, probe) = armed_with(SimActuator::new("sim"));
        let estop = controller.emergency_stop();

        estop.trigger("test");
        assert!(estop.is_triggered());
        assert!(controller.is_halted());
        assert_eq!(probe.last(), Some(VelocityCommand::STOP));

        for kind in MotionKind::ALL {
            let intent = MotionIntent::new(kind, VelocityTriple::new(0.1, 0.1, 0.1), Instant::now());
            assert_eq!(controller.apply(&intent), halted());
            assert_eq!(probe.last(), Some(VelocityCommand::STOP));
        }

        estop.clear();
        assert!(!controller.is_halted());
        assert!(controller.apply(&forward()).is_applied());
    }

    #[test]
    fn arm_cannot_override_a_trigger() {
        let (controller, _probe) = armed_with(SimActuator::new("sim"));
        controller.emergency_stop().trigger("operator");
        assert!(controller.arm().unwrap_err().is_halted());
        assert!(controller.is_halted());
    }

    #[test]
    fn trigger_from_another_thread_stops_motion() {
        let (controller, probe) = armed_with(SimActuator::new("sim"));
        let done = Arc::new(AtomicBool::new(false));

        let applier = {
            let controller = controller.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    controller.apply(&forward());
                    thread::sleep(Duration::from_millis(1));
                }
            })
        };

        thread::sleep(Duration::from_millis(20));
        controller.emergency_stop().trigger("operator");
        let at_trigger = probe.commands().len();
        thread::sleep(Duration::from_millis(20));
        done.store(true, Ordering::Release);
        applier.join().unwrap();

        let commands = probe.commands();
        assert_eq!(commands[at_trigger - 1], VelocityCommand::STOP);
        assert!(commands[at_trigger..].iter().all(VelocityCommand::is_stop));
    }

    #[test]
    fn trigger_aborts_in_flight_dispatch() {
        let (controller, probe) =
            armed_with(SimActuator::new("slow").with_latency(Duration::from_secs(5)));

        let applier = {
            let controller = controller.clone();
            thread::spawn(move || controller.apply(&forward()))
        };

        thread::sleep(Duration::from_millis(50));
        let started = Instant::now();
        controller.emergency_stop().trigger("operator");
        assert!(started.elapsed() < Duration::from_secs(1));

        assert_eq!(applier.join().unwrap(), halted());
        assert!(probe.commands().iter().all(VelocityCommand::is_stop));
        assert_eq!(probe.last(), Some(VelocityCommand::STOP));
    }

    /// Holds the mutex for the whole dispatch and never looks at the halt flag.
    struct StubbornActuator {
        latency: Duration,
    }

    impl strider_hal::Actuator for StubbornActuator {
        fn id(&self) -> &str {
            "stubborn"
        }

        fn dispatch(
            &mut self,
            command: &VelocityCommand,
            _halt: &strider_hal::HaltFlag<'_>,
        ) -> Result<(), StriderError> {
            if !command.is_stop() {
                thread::sleep(self.latency);
            }
            Ok(())
        }
    }

    fn stubborn() -> ControllerHandle {
        let controller = ControllerHandle::new(
            SafetyGate::default(),
            MotionLimits::default(),
            Box::new(StubbornActuator {
                latency: Duration::from_millis(60),
            }),
        );
        controller.ingest(&SensorReading {
            battery_fraction: 0.9,
            temperature_celsius: 30.0,
            orientation: Orientation::default(),
        });
        controller.arm().unwrap();
        controller
    }

    #[test]
    fn clear_winning_the_lock_before_a_pending_trigger_keeps_mirror_raised() {
        let controller = stubborn();
        let estop = controller.emergency_stop();

        // Hold the mutex so the trigger parks after raising the mirror.
        let mut guarded = estop.shared.lock();
        let trigger = {
            let estop = estop.clone();
            thread::spawn(move || estop.trigger("operator"))
        };
        while !estop.is_triggered() {
            thread::yield_now();
        }

        // A clear that got the lock first, ahead of the waiting trigger.
        estop.release(&mut guarded);
        assert!(!estop.is_triggered());
        drop(guarded);

        trigger.join().unwrap();
        assert!(controller.snapshot().emergency_stop);
        assert!(controller.is_halted());
        assert_eq!(controller.apply(&forward()), halted());
    }

    #[test]
    fn trigger_and_clear_queued_behind_slow_dispatch_leave_mirror_consistent() {
        for _ in 0..5 {
            let controller = stubborn();
            let estop = controller.emergency_stop();

            let applier = {
                let controller = controller.clone();
                thread::spawn(move || controller.apply(&forward()))
            };
            thread::sleep(Duration::from_millis(10));

            let trigger = {
                let estop = estop.clone();
                thread::spawn(move || estop.trigger("operator"))
            };
            let clear = {
                let estop = estop.clone();
                thread::spawn(move || estop.clear())
            };
            applier.join().unwrap();
            trigger.join().unwrap();
            clear.join().unwrap();

            assert_eq!(controller.is_halted(), controller.snapshot().emergency_stop);
        }
    }

    #[test]
    fn triggering_twice_is_harmless() {
        let (controller, _probe) = armed_with(SimActuator::new("sim"));
        let estop = controller.emergency_stop();
        estop.trigger("first");
        estop.clone().trigger("second");
        assert_eq!(controller.apply(&forward()), halted());
        estop.clear();
        assert!(!estop.is_triggered());
    }
}
