//! `strider-hal` – Hardware boundary
//!
//! Traits the core talks to instead of a robot SDK, plus simulated drivers.
//!
//! # Modules
//!
//! - [`actuator`] – [`Actuator`][actuator::Actuator]: the velocity command
//!   sink and the [`HaltFlag`][actuator::HaltFlag] an in-flight dispatch can
//!   watch to abort on emergency stop.
//! - [`sensor`] – [`SensorSource`][sensor::SensorSource]: battery, thermal and
//!   orientation telemetry.
//! - [`camera`] – [`Camera`][camera::Camera]: encoded frames for the vision
//!   decision source.
//! - [`sim`] – in-process stand-ins for all three.

pub mod actuator;
pub mod camera;
pub mod sensor;
pub mod sim;

pub use actuator::{Actuator, HaltFlag};
pub use camera::{Camera, CameraFrame};
pub use sensor::SensorSource;
pub use sim::{SimActuator, SimActuatorProbe, SimCamera, SimSensor};
