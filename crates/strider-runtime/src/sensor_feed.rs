//! Periodic sensor ingestion.
//!
//! [`run_sensor_feed`] polls a [`SensorSource`] on the blocking pool, stamps
//! each valid reading into the motion controller and publishes it on the
//! telemetry topic.  A failing or silent sensor is not fatal: the safety gate
//! refuses motion once the last reading goes stale.

use std::time::Duration;

use strider_hal::sensor::SensorSource;
use strider_kernel::ControllerHandle;
use strider_middleware::{EventBus, Topic};
use strider_types::{Event, EventPayload};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use crate::scheduler::shutdown_requested;

const EVENT_SOURCE: &str = "strider-runtime::sensor_feed";

/// Poll `sensor` every `period` until `shutdown` turns `true`.
pub async fn run_sensor_feed(
    mut sensor: Box<dyn SensorSource>,
    controller: ControllerHandle,
    bus: EventBus,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failing = false;

    loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            _ = interval.tick() => {}
        }

        let joined = tokio::task::spawn_blocking(move || {
            let reading = sensor.read();
            (sensor, reading)
        })
        .await;
        let reading = match joined {
            Ok((returned, reading)) => {
                sensor = returned;
                reading
            }
            Err(e) => {
                error!(error = %e, "Sensor read panicked; sensor feed stopped");
                return;
            }
        };

        match reading {
            Ok(reading) => {
                if failing {
                    debug!(sensor = %sensor.id(), "Sensor recovered");
                    failing = false;
                }
                if controller.ingest(&reading) {
                    let _ = bus.publish_to(
                        Topic::Telemetry,
                        Event::new(EVENT_SOURCE, EventPayload::Telemetry(reading)),
                    );
                }
            }
            Err(err) => {
                if !failing {
                    warn!(sensor = %sensor.id(), error = %err, "Sensor read failed");
                    failing = true;
                }
            }
        }
    }
    debug!(sensor = %sensor.id(), "Sensor feed exited");
}
