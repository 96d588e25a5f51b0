use attendance_common::scan::{AutoScanInterval, Classification, ScanResult, Tone};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

use crate::media::CameraDevice;

/// Lifecycle label of the scanner. Exactly one is active at a time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ScanState {
    Idle,
    CameraStarting,
    CameraReady,
    CameraError(String),
    Scanning,
    Result(ScanResult),
    SubmitError,
}

impl ScanState {
    /// A scan may start from here. `Result` and `SubmitError` are the
    /// ready state carrying the previous outcome.
    pub fn is_ready(&self) -> bool {
        matches!(
            self,
            ScanState::CameraReady | ScanState::Result(_) | ScanState::SubmitError
        )
    }
}

/// Which trigger started a scan attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Manual,
    Auto,
}

/// What a single `scan_once` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScanOutcome {
    CameraNotReady,
    Busy,
    CaptureFailed,
    Classified { classification: Classification },
    SubmitFailed,
}

/// How long the result flash stays in the snapshot.
pub const FLASH_DURATION: Duration = Duration::from_millis(700);

/// Mutable UI-facing state owned by the orchestrator.
pub(crate) struct View {
    pub state: ScanState,
    pub status: String,
    /// Tone and the instant it was raised.
    pub flash: Option<(Tone, Instant)>,
    pub devices: Vec<CameraDevice>,
    pub selected: Option<String>,
    pub auto_scan: bool,
    pub interval: AutoScanInterval,
    pub last_result: Option<ScanResult>,
    /// Bumped on every camera start/stop so a superseded acquisition does
    /// not overwrite the state of a newer one.
    pub camera_generation: u64,
}

impl View {
    pub fn new(interval: AutoScanInterval) -> Self {
        Self {
            state: ScanState::Idle,
            status: "Ready".into(),
            flash: None,
            devices: Vec::new(),
            selected: None,
            auto_scan: false,
            interval,
            last_result: None,
            camera_generation: 0,
        }
    }

    pub fn snapshot(&self, scanning: bool) -> ScannerSnapshot {
        ScannerSnapshot {
            state: self.state.clone(),
            status: self.status.clone(),
            flash: self
                .flash
                .filter(|(_, raised)| raised.elapsed() < FLASH_DURATION)
                .map(|(tone, _)| tone),
            devices: self
                .devices
                .iter()
                .enumerate()
                .map(|(i, d)| DeviceEntry {
                    id: d.id.clone(),
                    label: d.display_label(i),
                })
                .collect(),
            selected_device: self.selected.clone(),
            auto_scan: self.auto_scan,
            interval_ms: self.interval,
            last_result: self.last_result.as_ref().map(LastResult::from),
            scanning,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEntry {
    pub id: String,
    pub label: String,
}

/// Last scan result with its display classification.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastResult {
    pub classification: Classification,
    pub label: &'static str,
    pub flash: Tone,
    pub duplicate: bool,
    /// Rejection reason, "unknown" when the endpoint gave none.
    pub reason: Option<String>,
    pub confidence_percent: Option<u32>,
    pub confidence_tone: Option<Tone>,
    pub result: ScanResult,
}

impl From<&ScanResult> for LastResult {
    fn from(result: &ScanResult) -> Self {
        let classification = result.classification();
        Self {
            classification,
            label: classification.label(),
            flash: classification.flash(),
            duplicate: result.is_duplicate(),
            reason: (!result.ok).then(|| result.reason_or_unknown().to_string()),
            confidence_percent: result.confidence_percent(),
            confidence_tone: result.confidence_tone(),
            result: result.clone(),
        }
    }
}

/// Everything a UI needs to render the scanner.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerSnapshot {
    pub state: ScanState,
    pub status: String,
    pub flash: Option<Tone>,
    pub devices: Vec<DeviceEntry>,
    pub selected_device: Option<String>,
    pub auto_scan: bool,
    pub interval_ms: AutoScanInterval,
    pub last_result: Option<LastResult>,
    pub scanning: bool,
}
