//! [`RunStatistics`] – lock-free counters for a scheduler run.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Counters updated by the control and decision loops.
#[derive(Debug)]
pub struct RunStatistics {
    started_at: Instant,
    control_ticks: AtomicU64,
    decision_requests: AtomicU64,
    decisions_accepted: AtomicU64,
    decision_failures: AtomicU64,
    movement_commands: AtomicU64,
    safety_stops: AtomicU64,
    clamp_events: AtomicU64,
    dispatch_failures: AtomicU64,
}

/// Point-in-time copy of [`RunStatistics`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub runtime_secs: f64,
    pub control_ticks: u64,
    pub decision_requests: u64,
    pub decisions_accepted: u64,
    pub decision_failures: u64,
    pub movement_commands: u64,
    pub safety_stops: u64,
    pub clamp_events: u64,
    pub dispatch_failures: u64,
}

macro_rules! counter {
    ($($name:ident => $field:ident),* $(,)?) => {
        $(
            pub fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl RunStatistics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            control_ticks: AtomicU64::new(0),
            decision_requests: AtomicU64::new(0),
            decisions_accepted: AtomicU64::new(0),
            decision_failures: AtomicU64::new(0),
            movement_commands: AtomicU64::new(0),
            safety_stops: AtomicU64::new(0),
            clamp_events: AtomicU64::new(0),
            dispatch_failures: AtomicU64::new(0),
        }
    }

    counter! {
        record_control_tick => control_ticks,
        record_decision_request => decision_requests,
        record_decision_accepted => decisions_accepted,
        record_decision_failure => decision_failures,
        record_movement_command => movement_commands,
        record_safety_stop => safety_stops,
        record_clamp => clamp_events,
        record_dispatch_failure => dispatch_failures,
    }

    pub fn runtime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            runtime_secs: self.runtime().as_secs_f64(),
            control_ticks: load(&self.control_ticks),
            decision_requests: load(&self.decision_requests),
            decisions_accepted: load(&self.decisions_accepted),
            decision_failures: load(&self.decision_failures),
            movement_commands: load(&self.movement_commands),
            safety_stops: load(&self.safety_stops),
            clamp_events: load(&self.clamp_events),
            dispatch_failures: load(&self.dispatch_failures),
        }
    }
}

impl Default for RunStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsSnapshot {
    /// Decision requests per second over the whole run.
    pub fn decision_rate(&self) -> f64 {
        if self.runtime_secs > 0.0 {
            self.decision_requests as f64 / self.runtime_secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "runtime {:.1}s, ticks {}, decisions {}/{} ({} failed, {:.2}/s), \
             moves {}, safety stops {}, clamps {}, dispatch failures {}",
            self.runtime_secs,
            self.control_ticks,
            self.decisions_accepted,
            self.decision_requests,
            self.decision_failures,
            self.decision_rate(),
            self.movement_commands,
            self.safety_stops,
            self.clamp_events,
            self.dispatch_failures,
        )
    }
}
