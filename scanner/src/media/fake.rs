//! In-memory media backend for tests. Counts open streams and track stops so
//! tests can check the single-stream invariant and teardown.

use async_trait::async_trait;
use image::DynamicImage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{CameraDevice, CaptureStream, DeviceEnumerator, MediaError, StreamConstraints, StreamSource};

#[derive(Default)]
pub struct MediaCounters {
    pub open: AtomicUsize,
    pub max_open: AtomicUsize,
    pub opened_total: AtomicUsize,
    pub stops: AtomicUsize,
}

impl MediaCounters {
    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn max_open(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn opened_total(&self) -> usize {
        self.opened_total.load(Ordering::SeqCst)
    }
}

pub struct FakeMedia {
    devices: Vec<CameraDevice>,
    /// Frame size each device's stream reports. Missing entries use 1280x720.
    sizes: Mutex<HashMap<String, (u32, u32)>>,
    failures: Mutex<HashMap<String, MediaError>>,
    deny_permission: bool,
    open_delay: Mutex<Duration>,
    pub counters: Arc<MediaCounters>,
}

impl FakeMedia {
    pub fn new(device_ids: &[&str]) -> Self {
        Self {
            devices: device_ids
                .iter()
                .map(|id| CameraDevice::new(*id, ""))
                .collect(),
            sizes: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            deny_permission: false,
            open_delay: Mutex::new(Duration::ZERO),
            counters: Arc::new(MediaCounters::default()),
        }
    }

    pub fn with_open_delay(self, delay: Duration) -> Self {
        self.set_open_delay(delay);
        self
    }

    pub fn set_open_delay(&self, delay: Duration) {
        *self.open_delay.lock().unwrap() = delay;
    }

    pub fn denying_permission(mut self) -> Self {
        self.deny_permission = true;
        self
    }

    pub fn set_size(&self, device_id: &str, size: (u32, u32)) {
        self.sizes.lock().unwrap().insert(device_id.to_string(), size);
    }

    pub fn fail_open(&self, device_id: &str, err: MediaError) {
        self.failures
            .lock()
            .unwrap()
            .insert(device_id.to_string(), err);
    }
}

#[async_trait]
impl DeviceEnumerator for FakeMedia {
    async fn request_permission(&self) -> Result<(), MediaError> {
        if self.deny_permission {
            return Err(MediaError::PermissionDenied("user dismissed prompt".into()));
        }
        Ok(())
    }

    async fn enumerate(&self) -> Result<Vec<CameraDevice>, MediaError> {
        Ok(self.devices.clone())
    }
}

#[async_trait]
impl StreamSource for FakeMedia {
    async fn open(
        &self,
        device_id: &str,
        _constraints: StreamConstraints,
    ) -> Result<Box<dyn CaptureStream>, MediaError> {
        let delay = *self.open_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.failures.lock().unwrap().get(device_id) {
            return Err(err.clone());
        }
        if !self.devices.iter().any(|d| d.id == device_id) {
            return Err(MediaError::NotFound(device_id.to_string()));
        }

        let size = self
            .sizes
            .lock()
            .unwrap()
            .get(device_id)
            .copied()
            .unwrap_or((1280, 720));
        let open = self.counters.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_open.fetch_max(open, Ordering::SeqCst);
        self.counters.opened_total.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(FakeStream {
            device_id: device_id.to_string(),
            size,
            stopped: false,
            counters: self.counters.clone(),
        }))
    }
}

pub struct FakeStream {
    device_id: String,
    size: (u32, u32),
    stopped: bool,
    counters: Arc<MediaCounters>,
}

impl FakeStream {
    /// A stream not owned by any backend, for capture tests.
    pub fn detached(size: (u32, u32)) -> Self {
        Self {
            device_id: "detached".into(),
            size,
            stopped: false,
            counters: Arc::new(MediaCounters::default()),
        }
    }
}

impl CaptureStream for FakeStream {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn video_size(&self) -> (u32, u32) {
        if self.stopped {
            (0, 0)
        } else {
            self.size
        }
    }

    fn current_frame(&self) -> Option<DynamicImage> {
        let (w, h) = self.video_size();
        if w == 0 || h == 0 {
            return None;
        }
        Some(DynamicImage::new_rgb8(w, h))
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.counters.open.fetch_sub(1, Ordering::SeqCst);
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
    }
}
