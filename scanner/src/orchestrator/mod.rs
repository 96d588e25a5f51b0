mod auto_scan;
pub mod state;

use attendance_common::scan::{AutoScanInterval, ScanResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::capture::CaptureEngine;
use crate::client::{ScanClient, SubmitError};
use crate::device::DeviceManager;
use crate::media::CameraDevice;

use auto_scan::AutoScanTimer;
pub use state::{ScanOutcome, ScanState, ScannerSnapshot, Trigger};
use state::View;

/// Drives manual and timed scans against the active camera and reconciles
/// their outcomes into one UI state.
pub struct ScanOrchestrator {
    core: Arc<Core>,
    timer: Mutex<Option<AutoScanTimer>>,
}

/// State shared with the auto-scan task and the scans it spawns.
pub(crate) struct Core {
    devices: tokio::sync::Mutex<DeviceManager>,
    capture: CaptureEngine,
    client: Arc<dyn ScanClient>,
    view: Mutex<View>,
    in_flight: AtomicBool,
}

/// Held for the duration of one scan attempt; clears the in-flight flag on
/// drop, including when the scan future is cancelled.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn claim(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ScanOrchestrator {
    pub fn new(
        devices: DeviceManager,
        capture: CaptureEngine,
        client: Arc<dyn ScanClient>,
        interval: AutoScanInterval,
    ) -> Self {
        Self {
            core: Arc::new(Core {
                devices: tokio::sync::Mutex::new(devices),
                capture,
                client,
                view: Mutex::new(View::new(interval)),
                in_flight: AtomicBool::new(false),
            }),
            timer: Mutex::new(None),
        }
    }

    /// Discover cameras and start the first one.
    pub async fn initialize(&self) {
        self.refresh_devices().await;
        let idle_with_selection = {
            let view = self.core.view();
            view.selected.is_some() && view.state == ScanState::Idle
        };
        if idle_with_selection {
            self.start_camera().await;
        }
    }

    /// Re-list devices. Keeps the current selection when it is still
    /// present, otherwise falls back to the first device and starts it.
    pub async fn refresh_devices(&self) -> Vec<CameraDevice> {
        let listed = self.core.devices.lock().await.list_devices().await;

        let reselected = {
            let mut view = self.core.view();
            let keep = view
                .selected
                .as_ref()
                .is_some_and(|id| listed.iter().any(|d| &d.id == id));
            let before = view.selected.clone();
            if !keep {
                view.selected = listed.first().map(|d| d.id.clone());
            }
            if listed.is_empty() {
                view.status = "No camera found".into();
            }
            view.devices = listed.clone();
            before != view.selected
        };

        info!(count = listed.len(), "camera list refreshed");
        if reselected {
            if self.core.view().selected.is_some() {
                self.start_camera().await;
            } else {
                self.stop_camera().await;
            }
        }
        listed
    }

    /// Switch to `device_id`: release the current stream and acquire the new
    /// one. Resets the state to `CameraStarting` even mid-scan; an in-flight
    /// submission still completes and its result is shown.
    pub async fn on_device_change(&self, device_id: &str) {
        info!(device_id, "camera device changed");
        self.core.view().selected = Some(device_id.to_string());
        self.start_camera().await;
    }

    /// (Re)start the selected camera.
    pub async fn start_camera(&self) {
        self.core.start_camera().await;
    }

    pub async fn stop_camera(&self) {
        self.core.stop_camera().await;
    }

    pub async fn scan_once(&self) -> ScanOutcome {
        self.core.scan_once(Trigger::Manual).await
    }

    /// Start, stop or re-time the periodic trigger. At most one timer
    /// exists; the previous one is cancelled before a new one starts.
    pub fn set_auto_scan(&self, enabled: bool, interval: AutoScanInterval) {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        // Cancel first so two timers never coexist
        timer.take();
        {
            let mut view = self.core.view();
            view.auto_scan = enabled;
            view.interval = interval;
        }
        if enabled {
            *timer = Some(AutoScanTimer::start(self.core.clone(), interval));
        }
    }

    pub fn snapshot(&self) -> ScannerSnapshot {
        self.core.view().snapshot(self.core.is_busy())
    }

    /// Cancel auto-scan and release the camera.
    pub async fn shutdown(&self) {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.core.view().auto_scan = false;
        self.core.stop_camera().await;
        info!("scanner shut down");
    }
}

impl Drop for ScanOrchestrator {
    fn drop(&mut self) {
        self.timer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match self.core.devices.try_lock() {
            Ok(mut devices) => devices.release(),
            Err(_) => warn!(
                "camera busy during teardown, stream stops when the last running scan or camera start finishes"
            ),
        }
    }
}

impl Core {
    fn view(&self) -> MutexGuard<'_, View> {
        self.view.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    async fn start_camera(&self) {
        let (generation, device_id) = {
            let mut view = self.view();
            let Some(device_id) = view.selected.clone() else {
                view.status = "No camera selected".into();
                return;
            };
            view.camera_generation += 1;
            view.state = ScanState::CameraStarting;
            view.status = "Starting camera...".into();
            view.flash = None;
            (view.camera_generation, device_id)
        };

        let mut devices = self.devices.lock().await;
        if self.view().camera_generation != generation {
            debug!(device_id, "camera start superseded before acquisition");
            return;
        }
        let acquired = devices.acquire(&device_id).await.map(|_| ());

        let mut view = self.view();
        if view.camera_generation != generation {
            debug!(device_id, "camera start superseded, leaving newer state");
            return;
        }
        match acquired {
            Ok(()) => {
                view.state = ScanState::CameraReady;
                view.status = "Camera ready".into();
            }
            Err(e) => {
                warn!(error = %e, device_id, "camera error");
                view.status = format!("Camera error: {}", e.reason);
                view.state = ScanState::CameraError(e.reason.to_string());
            }
        }
    }

    async fn stop_camera(&self) {
        self.view().camera_generation += 1;
        let mut devices = self.devices.lock().await;
        devices.release();
        let mut view = self.view();
        view.state = ScanState::Idle;
        view.status = "Camera stopped".into();
        view.flash = None;
    }

    async fn scan_once(&self, trigger: Trigger) -> ScanOutcome {
        let Some(_in_flight) = InFlight::claim(&self.in_flight) else {
            debug!(?trigger, "scan skipped, submission in flight");
            return ScanOutcome::Busy;
        };

        let (device_id, captured) = {
            // An acquisition in progress holds the lock; skip rather than wait
            let Ok(devices) = self.devices.try_lock() else {
                debug!(?trigger, "scan skipped, camera starting");
                return ScanOutcome::CameraNotReady;
            };
            if !self.view().state.is_ready() {
                if trigger == Trigger::Manual {
                    self.view().status = "Camera not running".into();
                }
                debug!(?trigger, "scan skipped, camera not ready");
                return ScanOutcome::CameraNotReady;
            }
            let device_id = devices.active_device_id().map(str::to_owned);
            (device_id, self.capture.capture_frame(devices.stream()))
        };

        let payload = match captured {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, ?trigger, device_id, "capture failed");
                self.view().status = "Capture failed".into();
                return ScanOutcome::CaptureFailed;
            }
        };

        {
            let mut view = self.view();
            view.state = ScanState::Scanning;
            view.status = "Scanning...".into();
            view.flash = None;
        }
        debug!(?trigger, device_id, bytes = payload.payload_size(), "scan submitted");

        let submitted = self.client.submit(&payload).await;
        drop(payload);
        self.apply_result(submitted)
    }

    fn apply_result(&self, submitted: Result<ScanResult, SubmitError>) -> ScanOutcome {
        let mut view = self.view();
        // A device change may have moved the camera back to starting/error
        // meanwhile; keep that state but still surface the outcome.
        let owns_state = view.state == ScanState::Scanning || view.state.is_ready();

        match submitted {
            Ok(result) => {
                let classification = result.classification();
                info!(
                    classification = classification.label(),
                    employee_code = result.employee_code.as_deref().unwrap_or("-"),
                    confidence = result.confidence,
                    reason = result.reason.as_deref(),
                    flash = classification.flash().color(),
                    "scan classified"
                );
                view.status = classification.label().into();
                view.flash = Some((classification.flash(), Instant::now()));
                view.last_result = Some(result.clone());
                if owns_state {
                    view.state = ScanState::Result(result);
                }
                ScanOutcome::Classified { classification }
            }
            Err(e) => {
                warn!(error = %e, "scan submission failed");
                view.status = "Server error".into();
                view.flash = None;
                if owns_state {
                    view.state = ScanState::SubmitError;
                }
                ScanOutcome::SubmitFailed
            }
        }
    }
}

#[cfg(test)]
mod tests;
