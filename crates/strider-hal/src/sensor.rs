//! Generic `SensorSource` trait for battery, thermal and IMU telemetry.

use strider_types::{SensorReading, StriderError};

/// A telemetry source polled by the runtime's sensor feed.
///
/// The reading carries no timestamp; the controller stamps it with a
/// monotonic instant on ingestion.
pub trait SensorSource: Send {
    /// Stable identifier, e.g. `"lowstate"`.
    fn id(&self) -> &str;

    /// Read the latest telemetry sample.
    ///
    /// # Errors
    ///
    /// Returns [`StriderError::SensorStale`] when no fresh sample is
    /// available.
    fn read(&mut self) -> Result<SensorReading, StriderError>;
}
