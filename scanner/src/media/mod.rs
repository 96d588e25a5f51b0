pub mod mjpeg;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;
use image::DynamicImage;
use serde::Serialize;

/// A selectable video-input device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraDevice {
    pub id: String,
    /// May be empty until the platform grants permission.
    pub label: String,
}

impl CameraDevice {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }

    /// Label for a device picker; `index` is the device's position in the list.
    pub fn display_label(&self, index: usize) -> String {
        if self.label.is_empty() {
            format!("Camera {}", index + 1)
        } else {
            self.label.clone()
        }
    }
}

/// Best-effort resolution hints passed when opening a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConstraints {
    pub ideal_width: u32,
    pub ideal_height: u32,
}

impl Default for StreamConstraints {
    fn default() -> Self {
        Self {
            ideal_width: 1280,
            ideal_height: 720,
        }
    }
}

/// Structured failure reasons from the platform media layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("device not found: {0}")]
    NotFound(String),
    #[error("device busy: {0}")]
    Busy(String),
    #[error("constraints cannot be satisfied: {0}")]
    Overconstrained(String),
    #[error("{0}")]
    Other(String),
}

/// Lists the video-input devices the platform exposes.
#[async_trait]
pub trait DeviceEnumerator: Send + Sync {
    /// Ask the platform for camera access so that device labels are
    /// populated. Backends without a permission model accept by default.
    async fn request_permission(&self) -> Result<(), MediaError> {
        Ok(())
    }

    async fn enumerate(&self) -> Result<Vec<CameraDevice>, MediaError>;
}

/// Opens live capture streams.
#[async_trait]
pub trait StreamSource: Send + Sync {
    async fn open(
        &self,
        device_id: &str,
        constraints: StreamConstraints,
    ) -> Result<Box<dyn CaptureStream>, MediaError>;
}

/// A live video feed bound to one device.
pub trait CaptureStream: Send + Sync {
    fn device_id(&self) -> &str;

    /// Current frame dimensions; `(0, 0)` until the stream produces frames.
    fn video_size(&self) -> (u32, u32);

    /// Most recent decoded frame, if any.
    fn current_frame(&self) -> Option<DynamicImage>;

    /// Stop all tracks. Must be idempotent.
    fn stop(&mut self);
}
