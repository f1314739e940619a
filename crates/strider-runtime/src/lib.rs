//! `strider-runtime` – The Decision Loop
//!
//! Turns untrusted navigation decisions into a steady stream of gated motion
//! commands.
//!
//! # Modules
//!
//! - [`scheduler`] – [`DecisionScheduler`][scheduler::DecisionScheduler]:
//!   runs the fast control tick and the slow decision tick against one
//!   [`ControllerHandle`][strider_kernel::ControllerHandle], with staleness and
//!   timeout fallback to Stop.
//! - [`decision`] – the [`DecisionSource`][decision::DecisionSource] seam and
//!   [`ScriptedSource`][decision::ScriptedSource] for simulation.
//! - [`vision_driver`] – [`VisionDriver`][vision_driver::VisionDriver]: an
//!   OpenAI-compatible multimodal client that asks a model such as LLaVA on
//!   [Ollama](https://ollama.com) where to go next.
//! - [`command_table`] – [`CommandTable`][command_table::CommandTable]:
//!   action kind to velocity triple.
//! - [`sensor_feed`] – [`run_sensor_feed`][sensor_feed::run_sensor_feed]:
//!   periodic telemetry ingestion.
//! - [`stats`] – [`RunStatistics`][stats::RunStatistics]: run counters.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export.

pub mod command_table;
pub mod decision;
pub mod scheduler;
pub mod sensor_feed;
pub mod stats;
pub mod telemetry;
pub mod vision_driver;

pub use command_table::CommandTable;
pub use decision::{Decision, DecisionSource, ScriptedSource};
pub use scheduler::{DecisionOutcome, DecisionScheduler, SchedulerConfig};
pub use sensor_feed::run_sensor_feed;
pub use stats::{RunStatistics, StatsSnapshot};
pub use telemetry::{TracerProviderGuard, init_tracing};
pub use vision_driver::{NavigationReply, VisionDriver, VisionError};
