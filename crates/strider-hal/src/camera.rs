//! Generic `Camera` trait for the front-facing navigation camera.
//!
//! Capture and encoding belong to the driver; the vision decision source only
//! forwards the encoded frame.

use strider_types::StriderError;

/// An encoded image frame returned by a camera driver.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// MIME type of the encoded payload, e.g. `"image/jpeg"`.
    pub media_type: String,
    /// Base64-encoded image bytes.
    pub base64_data: String,
}

impl CameraFrame {
    /// Render the frame as a `data:` URL suitable for an `image_url` field.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.base64_data)
    }
}

/// A camera or image-capture device.
pub trait Camera: Send {
    /// Stable identifier for this camera, e.g. `"front_rgb"`.
    fn id(&self) -> &str;

    /// Capture and return the next available frame.
    ///
    /// # Errors
    ///
    /// Returns [`StriderError::DecisionSource`] if the frame cannot be
    /// captured; without a frame there is nothing to decide on.
    fn capture(&mut self) -> Result<CameraFrame, StriderError>;
}
