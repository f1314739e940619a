//! [`DecisionScheduler`] – the two-rate loop that drives the motion controller.
//!
//! Two periodic activities share one [`ControllerHandle`]:
//!
//! - **Control tick** (default every 100 ms): applies the latest accepted
//!   intent, or Stop when there is none, it is stale, or the last decision
//!   failed.  Runs on the blocking pool because dispatch may block.
//! - **Decision tick** (default every 1 s): asks the [`DecisionSource`] for a
//!   new decision under `tokio::time::timeout`.  A recognised action replaces
//!   the latest intent; a timeout or invalid reply keeps it but marks the
//!   scheduler failed.
//!
//! # States
//!
//! | State | Meaning | Applied |
//! |---|---|---|
//! | `Idle` | nothing accepted yet | Stop |
//! | `Tracking` | fresh intent available | the intent |
//! | `Degraded` | last decision failed, or intent older than `max_intent_age_ms` | Stop |
//! | `Halted` | emergency-stop latch set | Stop |
//!
//! Entering `Halted` drops the latest intent and the failure mark, so clearing
//! the latch lands in `Idle`.  The decision tick is skipped while halted.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strider_hal::sim::SimActuator;
//! use strider_kernel::{ControllerHandle, MotionLimits, SafetyGate};
//! use strider_middleware::EventBus;
//! use strider_runtime::command_table::CommandTable;
//! use strider_runtime::decision::ScriptedSource;
//! use strider_runtime::scheduler::{DecisionScheduler, SchedulerConfig};
//! use tokio::sync::watch;
//!
//! # async fn demo() {
//! let controller = ControllerHandle::new(
//!     SafetyGate::default(),
//!     MotionLimits::default(),
//!     Box::new(SimActuator::new("sim_legs")),
//! );
//! let scheduler = DecisionScheduler::new(
//!     controller,
//!     Arc::new(ScriptedSource::patrol()),
//!     CommandTable::default(),
//!     SchedulerConfig::default(),
//!     EventBus::default(),
//! );
//! let (_stop_tx, stop_rx) = watch::channel(false);
//! scheduler.run(stop_rx).await;
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use strider_kernel::{ApplyOutcome, ControllerHandle};
use strider_middleware::EventBus;
use strider_types::{
    Event, EventPayload, MotionIntent, MotionKind, SchedulerState, StriderError,
};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::command_table::CommandTable;
use crate::decision::DecisionSource;
use crate::stats::RunStatistics;

const EVENT_SOURCE: &str = "strider-runtime::scheduler";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Timing policy, loaded from the `[scheduler]` config section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub control_period_ms: u64,
    pub decision_period_ms: u64,
    pub decision_timeout_ms: u64,
    pub max_intent_age_ms: u64,
    /// Consecutive dispatch failures that raise a [`EventPayload::DispatchAlert`].
    pub dispatch_alert_threshold: u32,
    /// Log a status line every this many control ticks.  Zero disables it.
    pub status_every_ticks: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            control_period_ms: 100,
            decision_period_ms: 1000,
            decision_timeout_ms: 30_000,
            max_intent_age_ms: 3000,
            dispatch_alert_threshold: 5,
            status_every_ticks: 100,
        }
    }
}

impl SchedulerConfig {
    pub fn control_period(&self) -> Duration {
        Duration::from_millis(self.control_period_ms.max(1))
    }

    pub fn decision_period(&self) -> Duration {
        Duration::from_millis(self.decision_period_ms.max(1))
    }

    pub fn decision_timeout(&self) -> Duration {
        Duration::from_millis(self.decision_timeout_ms)
    }

    pub fn max_intent_age(&self) -> Duration {
        Duration::from_millis(self.max_intent_age_ms)
    }
}

/// Result of one [`DecisionScheduler::decision_tick`].
#[derive(Debug, Clone, PartialEq)]
pub enum DecisionOutcome {
    /// The decision became the latest intent.
    Accepted(MotionIntent),
    /// The request timed out, failed, or named an unknown action.
    Failed(StriderError),
    /// The latch was set; nothing was requested or the reply was discarded.
    Skipped,
}

// ─────────────────────────────────────────────────────────────────────────────
// DecisionScheduler
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct DecisionSlot {
    latest: Option<MotionIntent>,
    last_decision_failed: bool,
}

struct Inner {
    controller: ControllerHandle,
    source: Arc<dyn DecisionSource>,
    table: CommandTable,
    config: SchedulerConfig,
    bus: EventBus,
    slot: Mutex<DecisionSlot>,
    state: watch::Sender<SchedulerState>,
    stats: Arc<RunStatistics>,
}

/// Merges decisions into control ticks.  Clone it cheaply; all clones share
/// the same slot, state and statistics.
#[derive(Clone)]
pub struct DecisionScheduler {
    inner: Arc<Inner>,
}

impl DecisionScheduler {
    pub fn new(
        controller: ControllerHandle,
        source: Arc<dyn DecisionSource>,
        table: CommandTable,
        config: SchedulerConfig,
        bus: EventBus,
    ) -> Self {
        let initial = if controller.is_halted() {
            SchedulerState::Halted
        } else {
            SchedulerState::Idle
        };
        let (state, _) = watch::channel(initial);
        Self {
            inner: Arc::new(Inner {
                controller,
                source,
                table,
                config,
                bus,
                slot: Mutex::new(DecisionSlot::default()),
                state,
                stats: Arc::new(RunStatistics::new()),
            }),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.inner.state.subscribe()
    }

    pub fn stats(&self) -> Arc<RunStatistics> {
        Arc::clone(&self.inner.stats)
    }

    pub fn controller(&self) -> &ControllerHandle {
        &self.inner.controller
    }

    /// Run both loops until `shutdown` turns `true` (or its sender is
    /// dropped), then latch the emergency stop, join the loops and apply one
    /// last tick.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            source = self.inner.source.name(),
            control_period_ms = self.inner.config.control_period_ms,
            decision_period_ms = self.inner.config.decision_period_ms,
            "Decision scheduler starting"
        );

        let control = tokio::spawn(self.clone().control_loop(shutdown.clone()));
        let decision = tokio::spawn(self.clone().decision_loop(shutdown.clone()));

        shutdown_requested(&mut shutdown).await;
        // Trigger waits for the controller mutex, which a dispatch may hold.
        let estop = self.inner.controller.emergency_stop();
        if let Err(e) = tokio::task::spawn_blocking(move || estop.trigger("shutdown")).await {
            error!(error = %e, "Emergency stop on shutdown failed");
        }

        let (control, decision) = tokio::join!(control, decision);
        if let Err(e) = control {
            error!(error = %e, "Control loop terminated abnormally");
        }
        if let Err(e) = decision {
            error!(error = %e, "Decision loop terminated abnormally");
        }

        let this = self.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || this.control_tick()).await {
            error!(error = %e, "Final control tick failed");
        }
        info!(stats = %self.inner.stats.snapshot(), "Decision scheduler stopped");
    }

    // ── Control tick ─────────────────────────────────────────────────────────

    /// Pick the intent for this tick and push it through the controller.
    /// Blocking: holds the controller mutex for the duration of the dispatch.
    pub fn control_tick(&self) -> ApplyOutcome {
        let now = Instant::now();
        let (next, intent) = self.select(now);
        self.transition(next);

        let outcome = self.inner.controller.apply(&intent);
        self.record(&intent, &outcome);
        outcome
    }

    fn select(&self, now: Instant) -> (SchedulerState, MotionIntent) {
        let mut slot = self.lock_slot();
        if self.inner.controller.is_halted() {
            slot.latest = None;
            slot.last_decision_failed = false;
            return (SchedulerState::Halted, MotionIntent::stop(now));
        }
        if slot.last_decision_failed {
            return (SchedulerState::Degraded, MotionIntent::stop(now));
        }
        match &slot.latest {
            None => (SchedulerState::Idle, MotionIntent::stop(now)),
            Some(intent) if intent.age(now) > self.inner.config.max_intent_age() => {
                (SchedulerState::Degraded, MotionIntent::stop(now))
            }
            Some(intent) => (SchedulerState::Tracking, intent.clone()),
        }
    }

    fn transition(&self, next: SchedulerState) {
        let mut previous = next;
        let changed = self.inner.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            previous = *current;
            *current = next;
            true
        });
        if changed {
            info!(from = %previous, to = %next, "Scheduler state changed");
            self.publish(EventPayload::StateTransition {
                from: previous,
                to: next,
            });
        }
    }

    fn record(&self, intent: &MotionIntent, outcome: &ApplyOutcome) {
        let stats = &self.inner.stats;
        stats.record_control_tick();

        match outcome {
            ApplyOutcome::Applied { command, clamp } => {
                if intent.kind != MotionKind::Stop {
                    stats.record_movement_command();
                }
                if let Some(clamp) = clamp {
                    stats.record_clamp();
                    self.publish(EventPayload::Clamped(*clamp));
                }
                self.publish(EventPayload::CommandApplied {
                    kind: intent.kind,
                    command: *command,
                });
            }
            ApplyOutcome::Refused(err) => {
                match err {
                    StriderError::DispatchFailed { .. } => {
                        stats.record_dispatch_failure();
                        self.check_dispatch_alert();
                    }
                    _ => stats.record_safety_stop(),
                }
                self.publish(EventPayload::CommandRefused {
                    kind: intent.kind,
                    reason: err.to_string(),
                });
            }
        }

        let every = self.inner.config.status_every_ticks;
        let ticks = stats.snapshot().control_ticks;
        if every > 0 && ticks % every == 0 {
            let conditions = self.inner.controller.conditions();
            info!(
                state = %self.state(),
                failing = ?conditions.failing(),
                stats = %stats.snapshot(),
                "Status"
            );
        }
    }

    fn check_dispatch_alert(&self) {
        let threshold = self.inner.config.dispatch_alert_threshold;
        let failures = self.inner.controller.consecutive_dispatch_failures();
        if threshold > 0 && failures >= threshold && failures % threshold == 0 {
            error!(
                actuator = %self.inner.controller.actuator_id(),
                consecutive_failures = failures,
                "Actuator keeps rejecting commands"
            );
            self.publish(EventPayload::DispatchAlert {
                consecutive_failures: failures,
            });
        }
    }

    // ── Decision tick ────────────────────────────────────────────────────────

    /// Request one decision and fold the result into the slot.
    pub async fn decision_tick(&self) -> DecisionOutcome {
        if self.inner.controller.is_halted() {
            debug!("Decision tick skipped while halted");
            return DecisionOutcome::Skipped;
        }

        let source = &self.inner.source;
        let timeout = self.inner.config.decision_timeout();
        self.inner.stats.record_decision_request();

        let result = match tokio::time::timeout(timeout, source.request_decision(timeout)).await {
            Ok(result) => result,
            Err(_) => Err(StriderError::DecisionTimeout(timeout.as_millis() as u64)),
        };
        let result = result.and_then(|decision| {
            let kind = decision.action.parse::<MotionKind>()?;
            Ok((decision, kind))
        });

        let mut slot = self.lock_slot();
        if self.inner.controller.is_halted() {
            debug!("Decision discarded: latch set while it was pending");
            return DecisionOutcome::Skipped;
        }

        match result {
            Ok((decision, kind)) => {
                let intent = self.inner.table.intent(kind, Instant::now());
                slot.latest = Some(intent.clone());
                slot.last_decision_failed = false;
                drop(slot);

                self.inner.stats.record_decision_accepted();
                info!(
                    source = source.name(),
                    kind = %kind,
                    confidence = decision.confidence,
                    reason = decision.reason.as_deref().unwrap_or(""),
                    "Decision accepted"
                );
                self.publish(EventPayload::DecisionAccepted {
                    kind,
                    confidence: decision.confidence,
                });
                DecisionOutcome::Accepted(intent)
            }
            Err(err) => {
                slot.last_decision_failed = true;
                drop(slot);

                self.inner.stats.record_decision_failure();
                warn!(source = source.name(), error = %err, "Decision failed");
                self.publish(EventPayload::DecisionRejected(err.to_string()));
                DecisionOutcome::Failed(err)
            }
        }
    }

    // ── Loops ────────────────────────────────────────────────────────────────

    async fn control_loop(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.inner.config.control_period());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                _ = interval.tick() => {}
            }
            let this = self.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || this.control_tick()).await {
                error!(error = %e, "Control tick panicked");
                self.inner.controller.emergency_stop().trigger("control tick panicked");
                break;
            }
        }
        debug!("Control loop exited");
    }

    async fn decision_loop(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.inner.config.decision_period());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                _ = interval.tick() => {}
            }
            // Dropping the in-flight request on shutdown cancels it.
            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                _ = self.decision_tick() => {}
            }
        }
        debug!("Decision loop exited");
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn lock_slot(&self) -> MutexGuard<'_, DecisionSlot> {
        self.inner
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, payload: EventPayload) {
        let _ = self.inner.bus.publish(Event::new(EVENT_SOURCE, payload));
    }
}

/// Resolves once the flag is `true` or its sender is gone.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use strider_hal::sim::{SimActuator, SimActuatorProbe};
    use strider_kernel::{MotionLimits, SafetyGate};
    use strider_middleware::Topic;
    use strider_types::{DenyReason, Orientation, SensorReading, VelocityCommand};

    use super::*;
    use crate::decision::{Decision, ScriptedSource};

    /// Never answers.
    struct SilentSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DecisionSource for SilentSource {
        fn name(&self) -> &str {
            "silent"
        }

        async fn request_decision(&self, _timeout: Duration) -> Result<Decision, StriderError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            std::future::pending().await
        }
    }

    fn nominal() -> SensorReading {
        SensorReading {
            battery_fraction: 0.9,
            temperature_celsius: 30.0,
            orientation: Orientation::default(),
        }
    }

    fn setup(
        source: Arc<dyn DecisionSource>,
        config: SchedulerConfig,
    ) -> (DecisionScheduler, SimActuatorProbe) {
        setup_with(SimActuator::new("sim"), CommandTable::default(), source, config)
    }

    fn setup_with(
        actuator: SimActuator,
        table: CommandTable,
        source: Arc<dyn DecisionSource>,
        config: SchedulerConfig,
    ) -> (DecisionScheduler, SimActuatorProbe) {
        let probe = actuator.probe();
        let controller = ControllerHandle::new(
            SafetyGate::default(),
            MotionLimits::default(),
            Box::new(actuator),
        );
        assert!(controller.ingest(&nominal()));
        controller.arm().unwrap();
        let scheduler = DecisionScheduler::new(
            controller,
            source,
            table,
            config,
            EventBus::default(),
        );
        (scheduler, probe)
    }

    fn scripted(actions: &[&str]) -> Arc<dyn DecisionSource> {
        Arc::new(ScriptedSource::new(actions.iter().copied()))
    }

    #[test]
    fn idle_applies_stop() {
        let (scheduler, probe) = setup(scripted(&["move_forward"]), SchedulerConfig::default());
        let outcome = scheduler.control_tick();
        assert_eq!(outcome.command(), Some(VelocityCommand::STOP));
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(probe.last(), Some(VelocityCommand::STOP));
    }

    #[tokio::test]
    async fn accepted_forward_is_tracked_at_table_speed() {
        let (scheduler, probe) = setup(scripted(&["move_forward"]), SchedulerConfig::default());
        let outcome = scheduler.decision_tick().await;
        assert!(matches!(outcome, DecisionOutcome::Accepted(ref i) if i.kind == MotionKind::MoveForward));

        let applied = scheduler.control_tick();
        assert!(matches!(applied, ApplyOutcome::Applied { clamp: None, .. }));
        assert_eq!(scheduler.state(), SchedulerState::Tracking);
        assert_eq!(probe.last().map(|c| c.forward), Some(0.3));
    }

    #[tokio::test]
    async fn unknown_action_degrades_but_keeps_intent() {
        let (scheduler, probe) = setup(
            scripted(&["move_forward", "moonwalk", "turn_left"]),
            SchedulerConfig::default(),
        );
        scheduler.decision_tick().await;
        scheduler.control_tick();
        assert_eq!(scheduler.state(), SchedulerState::Tracking);

        let outcome = scheduler.decision_tick().await;
        assert!(matches!(
            outcome,
            DecisionOutcome::Failed(StriderError::DecisionInvalid(_))
        ));
        scheduler.control_tick();
        assert_eq!(scheduler.state(), SchedulerState::Degraded);
        assert_eq!(probe.last(), Some(VelocityCommand::STOP));

        // A good decision recovers.
        scheduler.decision_tick().await;
        scheduler.control_tick();
        assert_eq!(scheduler.state(), SchedulerState::Tracking);
        assert_eq!(probe.last().map(|c| c.yaw), Some(0.3));
    }

    #[test]
    fn stale_intent_is_never_applied() {
        let (scheduler, probe) = setup(scripted(&["move_forward"]), SchedulerConfig::default());
        let old = Instant::now()
            .checked_sub(Duration::from_millis(3500))
            .expect("monotonic clock too young");
        scheduler.lock_slot().latest = Some(CommandTable::default().intent(MotionKind::MoveForward, old));

        let outcome = scheduler.control_tick();
        assert_eq!(outcome.command(), Some(VelocityCommand::STOP));
        assert_eq!(scheduler.state(), SchedulerState::Degraded);
        assert!(probe.commands().iter().all(VelocityCommand::is_stop));
    }

    #[tokio::test(start_paused = true)]
    async fn decision_timeout_degrades_and_stops() {
        let source = Arc::new(SilentSource {
            calls: AtomicUsize::new(0),
        });
        let (scheduler, probe) = setup(source.clone(), SchedulerConfig::default());

        for _ in 0..3 {
            let outcome = scheduler.decision_tick().await;
            assert_eq!(outcome, DecisionOutcome::Failed(StriderError::DecisionTimeout(30_000)));
            let applied = scheduler.control_tick();
            assert_eq!(applied.command(), Some(VelocityCommand::STOP));
            assert_eq!(scheduler.state(), SchedulerState::Degraded);
        }
        assert_eq!(source.calls.load(Ordering::Relaxed), 3);
        assert!(probe.commands().iter().all(VelocityCommand::is_stop));
        assert_eq!(scheduler.stats().snapshot().decision_failures, 3);
    }

    #[tokio::test]
    async fn halt_drops_intent_and_clear_returns_to_idle() {
        let (scheduler, probe) = setup(scripted(&["move_forward"]), SchedulerConfig::default());
        scheduler.decision_tick().await;
        scheduler.control_tick();
        assert_eq!(scheduler.state(), SchedulerState::Tracking);

        let estop = scheduler.controller().emergency_stop();
        estop.trigger("test");
        let outcome = scheduler.control_tick();
        assert_eq!(
            outcome,
            ApplyOutcome::Refused(StriderError::SafetyDenied {
                reason: DenyReason::Halted
            })
        );
        assert_eq!(scheduler.state(), SchedulerState::Halted);
        assert_eq!(probe.last(), Some(VelocityCommand::STOP));
        assert_eq!(scheduler.decision_tick().await, DecisionOutcome::Skipped);

        estop.clear();
        scheduler.control_tick();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(probe.last(), Some(VelocityCommand::STOP));
    }

    #[tokio::test]
    async fn transitions_and_decisions_are_published() {
        let (scheduler, _probe) = setup(scripted(&["turn_right"]), SchedulerConfig::default());
        let mut alerts = scheduler.inner.bus.subscribe_to(Topic::SafetyAlerts);
        let mut decisions = scheduler.inner.bus.subscribe_to(Topic::Decisions);

        scheduler.decision_tick().await;
        scheduler.control_tick();

        let event = decisions.try_recv().expect("decision event");
        assert!(matches!(
            event.payload,
            EventPayload::DecisionAccepted {
                kind: MotionKind::TurnRight,
                ..
            }
        ));
        let event = alerts.try_recv().expect("transition event");
        assert!(matches!(
            event.payload,
            EventPayload::StateTransition {
                from: SchedulerState::Idle,
                to: SchedulerState::Tracking
            }
        ));
    }

    #[test]
    fn repeated_dispatch_failures_raise_an_alert() {
        let config = SchedulerConfig {
            dispatch_alert_threshold: 3,
            ..SchedulerConfig::default()
        };
        let (scheduler, probe) = setup(scripted(&["stop"]), config);
        let mut alerts = scheduler.inner.bus.subscribe_to(Topic::SafetyAlerts);
        probe.set_failing(true);

        for _ in 0..3 {
            let outcome = scheduler.control_tick();
            assert!(matches!(
                outcome,
                ApplyOutcome::Refused(StriderError::DispatchFailed { .. })
            ));
        }

        let mut alerted = false;
        while let Some(event) = alerts.try_recv() {
            if let EventPayload::DispatchAlert {
                consecutive_failures,
            } = event.payload
            {
                assert_eq!(consecutive_failures, 3);
                alerted = true;
            }
        }
        assert!(alerted);
        assert_eq!(scheduler.stats().snapshot().dispatch_failures, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn run_moves_then_halts_on_shutdown() {
        let config = SchedulerConfig {
            control_period_ms: 5,
            decision_period_ms: 10,
            ..SchedulerConfig::default()
        };
        let (scheduler, probe) = setup(scripted(&["move_forward"]), config);
        let (stop_tx, stop_rx) = watch::channel(false);

        let runner = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run(stop_rx).await })
        };

        // Keep sensor data fresh while the loops run.
        for _ in 0..20 {
            scheduler.controller().ingest(&nominal());
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        stop_tx.send(true).unwrap();
        runner.await.unwrap();

        let commands = probe.commands();
        assert!(commands.iter().any(|c| c.forward == 0.3));
        assert_eq!(commands.last(), Some(&VelocityCommand::STOP));
        assert_eq!(scheduler.state(), SchedulerState::Halted);
        assert!(scheduler.controller().is_halted());

        let stats = scheduler.stats().snapshot();
        assert!(stats.decisions_accepted > 0);
        assert!(stats.movement_commands > 0);
    }

    #[tokio::test]
    async fn clamped_command_is_published_and_counted() {
        let table = CommandTable {
            move_forward: strider_types::VelocityTriple::new(0.8, 0.0, 0.0),
            ..CommandTable::default()
        };
        let (scheduler, probe) = setup_with(
            SimActuator::new("sim"),
            table,
            scripted(&["move_forward"]),
            SchedulerConfig::default(),
        );
        let mut motion = scheduler.inner.bus.subscribe_to(Topic::MotionCommands);

        scheduler.decision_tick().await;
        let outcome = scheduler.control_tick();
        assert!(matches!(outcome, ApplyOutcome::Applied { clamp: Some(_), .. }));
        assert_eq!(probe.last().map(|c| c.forward), Some(0.3));

        let mut clamp = None;
        while let Some(event) = motion.try_recv() {
            if let EventPayload::Clamped(event) = event.payload {
                clamp = Some(event);
            }
        }
        let clamp = clamp.expect("clamp event on the motion topic");
        assert_eq!(clamp.kind, MotionKind::MoveForward);
        assert_eq!(clamp.requested.forward, 0.8);
        assert_eq!(clamp.clamped.forward, 0.3);
        assert_eq!(scheduler.stats().snapshot().clamp_events, 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn shutdown_completes_while_dispatch_in_flight() {
        let config = SchedulerConfig {
            control_period_ms: 5,
            decision_period_ms: 5,
            ..SchedulerConfig::default()
        };
        let (scheduler, probe) = setup_with(
            SimActuator::new("slow").with_latency(Duration::from_secs(5)),
            CommandTable::default(),
            scripted(&["move_forward"]),
            config,
        );
        let (stop_tx, stop_rx) = watch::channel(false);

        let runner = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run(stop_rx).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .expect("shutdown must not wait for the slow dispatch")
            .unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Halted);
        assert!(scheduler.controller().is_halted());
        assert_eq!(probe.last(), Some(VelocityCommand::STOP));
    }
}
