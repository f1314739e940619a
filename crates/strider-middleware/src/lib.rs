//! `strider-middleware` – The Nervous System
//!
//! Routes events between the control loop, the decision loop, the sensor
//! feed and any observers without caring about the data's meaning.
//!
//! # Modules
//!
//! - [`bus`] – Headless, typed, topic-based publish/subscribe event bus built
//!   on Tokio broadcast channels.

pub mod bus;

pub use bus::{EventBus, Topic, TopicReceiver};
