use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::media::{CameraDevice, CaptureStream, DeviceEnumerator, MediaError, StreamConstraints, StreamSource};

#[derive(Debug, thiserror::Error)]
#[error("failed to acquire camera {device_id}: {reason}")]
pub struct CameraAcquisitionError {
    pub device_id: String,
    #[source]
    pub reason: MediaError,
}

pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Sole owner of the live capture stream. At most one stream is held at a
/// time and every acquisition releases the previous one first.
pub struct DeviceManager {
    enumerator: Arc<dyn DeviceEnumerator>,
    source: Arc<dyn StreamSource>,
    constraints: StreamConstraints,
    open_timeout: Duration,
    active: Option<Box<dyn CaptureStream>>,
}

impl DeviceManager {
    pub fn new(
        enumerator: Arc<dyn DeviceEnumerator>,
        source: Arc<dyn StreamSource>,
        constraints: StreamConstraints,
    ) -> Self {
        Self {
            enumerator,
            source,
            constraints,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            active: None,
        }
    }

    /// Upper bound on a single stream open. A device that has not answered
    /// by then fails as busy, so the caller never waits on it forever.
    pub fn with_open_timeout(mut self, open_timeout: Duration) -> Self {
        self.open_timeout = open_timeout;
        self
    }

    /// Request permission (best-effort), then enumerate video inputs.
    /// An empty list is a degraded result, not an error.
    pub async fn list_devices(&self) -> Vec<CameraDevice> {
        if let Err(e) = self.enumerator.request_permission().await {
            warn!(error = %e, "camera permission not granted, labels may be empty");
        }
        match self.enumerator.enumerate().await {
            Ok(devices) => {
                debug!(count = devices.len(), "enumerated camera devices");
                devices
            }
            Err(e) => {
                warn!(error = %e, "device enumeration failed");
                Vec::new()
            }
        }
    }

    pub async fn acquire(
        &mut self,
        device_id: &str,
    ) -> Result<&dyn CaptureStream, CameraAcquisitionError> {
        self.release();

        let opened =
            tokio::time::timeout(self.open_timeout, self.source.open(device_id, self.constraints))
                .await
                .unwrap_or_else(|_| {
                    warn!(device_id, timeout_secs = self.open_timeout.as_secs_f64(), "camera open timed out");
                    Err(MediaError::Busy(format!(
                        "{device_id} did not respond within {:?}",
                        self.open_timeout
                    )))
                });
        let stream = opened.map_err(|reason| CameraAcquisitionError {
            device_id: device_id.to_string(),
            reason,
        })?;

        info!(
            device_id,
            width = self.constraints.ideal_width,
            height = self.constraints.ideal_height,
            "camera stream acquired"
        );
        Ok(&**self.active.insert(stream))
    }

    /// Stop and drop the held stream. Safe to call with nothing held.
    pub fn release(&mut self) {
        if let Some(mut stream) = self.active.take() {
            stream.stop();
            info!(device_id = stream.device_id(), "camera stream released");
        }
    }

    pub fn stream(&self) -> Option<&dyn CaptureStream> {
        self.active.as_deref()
    }

    pub fn active_device_id(&self) -> Option<&str> {
        self.active.as_ref().map(|s| s.device_id())
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        self.release();
    }
}
