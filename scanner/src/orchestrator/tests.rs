use super::*;
use crate::capture::CaptureEngine;
use crate::client::fake::FakeScanClient;
use crate::media::fake::FakeMedia;
use crate::media::{MediaError, StreamConstraints};
use attendance_common::config::CaptureConfig;
use attendance_common::scan::{Classification, Tone};
use serde_json::json;
use std::time::Duration;
use tokio::time::sleep;

struct Harness {
    media: Arc<FakeMedia>,
    client: Arc<FakeScanClient>,
    scanner: ScanOrchestrator,
}

fn harness(media: FakeMedia, client: FakeScanClient) -> Harness {
    let media = Arc::new(media);
    let client = Arc::new(client);
    let devices = DeviceManager::new(media.clone(), media.clone(), StreamConstraints::default());
    let scanner = ScanOrchestrator::new(
        devices,
        CaptureEngine::new(&CaptureConfig::default()),
        client.clone(),
        AutoScanInterval::Medium,
    );
    Harness {
        media,
        client,
        scanner,
    }
}

fn ready_harness() -> Harness {
    harness(FakeMedia::new(&["front", "side"]), FakeScanClient::new())
}

#[tokio::test(start_paused = true)]
async fn initialize_selects_and_starts_first_camera() {
    let h = ready_harness();
    assert_eq!(h.scanner.snapshot().state, ScanState::Idle);

    h.scanner.initialize().await;

    let snap = h.scanner.snapshot();
    assert_eq!(snap.state, ScanState::CameraReady);
    assert_eq!(snap.status, "Camera ready");
    assert_eq!(snap.selected_device.as_deref(), Some("front"));
    assert_eq!(snap.devices.len(), 2);
    assert_eq!(h.media.counters.opened_total(), 1);
}

#[tokio::test(start_paused = true)]
async fn no_devices_is_a_degraded_idle_state() {
    let h = harness(FakeMedia::new(&[]), FakeScanClient::new());
    h.scanner.initialize().await;

    let snap = h.scanner.snapshot();
    assert_eq!(snap.state, ScanState::Idle);
    assert_eq!(snap.status, "No camera found");
    assert_eq!(h.scanner.scan_once().await, ScanOutcome::CameraNotReady);
}

#[tokio::test(start_paused = true)]
async fn acquisition_failure_is_camera_error() {
    let media = FakeMedia::new(&["front"]);
    media.fail_open("front", MediaError::PermissionDenied("blocked by user".into()));
    let h = harness(media, FakeScanClient::new());

    h.scanner.initialize().await;

    let snap = h.scanner.snapshot();
    assert!(matches!(snap.state, ScanState::CameraError(_)));
    assert!(snap.status.starts_with("Camera error: permission denied"));
    assert_eq!(h.media.counters.open(), 0);

    assert_eq!(h.scanner.scan_once().await, ScanOutcome::CameraNotReady);
    assert_eq!(h.scanner.snapshot().status, "Camera not running");
    assert_eq!(h.client.submissions(), 0);
}

#[tokio::test(start_paused = true)]
async fn recorded_out_uses_caution_flash() {
    let h = ready_harness();
    h.scanner.initialize().await;
    h.client
        .respond(json!({"ok": true, "type": "OUT-2024-06-01", "employeeCode": "E9", "confidence": 0.77}));

    let outcome = h.scanner.scan_once().await;

    assert_eq!(
        outcome,
        ScanOutcome::Classified {
            classification: Classification::RecordedOut
        }
    );
    let snap = h.scanner.snapshot();
    assert_eq!(snap.status, "Recorded OUT");
    assert_eq!(snap.flash, Some(Tone::Caution));
    assert!(matches!(snap.state, ScanState::Result(ref r) if r.employee_code.as_deref() == Some("E9")));
}

#[tokio::test(start_paused = true)]
async fn recorded_in_uses_success_flash() {
    let h = ready_harness();
    h.scanner.initialize().await;
    h.client.respond(json!({"ok": true, "type": "IN"}));

    h.scanner.scan_once().await;

    let snap = h.scanner.snapshot();
    assert_eq!(snap.status, "Recorded IN");
    assert_eq!(snap.flash, Some(Tone::Success));
}

#[tokio::test(start_paused = true)]
async fn invalid_entry_surfaces_reason() {
    let h = ready_harness();
    h.scanner.initialize().await;
    h.client
        .respond(json!({"ok": false, "reason": "low confidence", "confidence": 0.3}));

    h.scanner.scan_once().await;

    let snap = h.scanner.snapshot();
    assert_eq!(snap.status, "Invalid Entry");
    assert_eq!(snap.flash, Some(Tone::Alarm));
    let last = snap.last_result.unwrap();
    assert_eq!(last.result.reason.as_deref(), Some("low confidence"));
    assert_eq!(last.reason.as_deref(), Some("low confidence"));
    assert_eq!(last.confidence_tone, Some(Tone::Alarm));
}

#[tokio::test(start_paused = true)]
async fn server_error_is_recoverable() {
    let h = ready_harness();
    h.scanner.initialize().await;
    h.client.fail_next();

    assert_eq!(h.scanner.scan_once().await, ScanOutcome::SubmitFailed);
    let snap = h.scanner.snapshot();
    assert_eq!(snap.state, ScanState::SubmitError);
    assert_eq!(snap.status, "Server error");
    assert!(snap.state.is_ready());

    // Next attempt goes through normally
    assert!(matches!(
        h.scanner.scan_once().await,
        ScanOutcome::Classified { .. }
    ));
    assert_eq!(h.client.submissions(), 2);
}

#[tokio::test(start_paused = true)]
async fn cold_stream_is_never_submitted() {
    let media = FakeMedia::new(&["front"]);
    media.set_size("front", (0, 0));
    let h = harness(media, FakeScanClient::new());
    h.scanner.initialize().await;

    assert_eq!(h.scanner.scan_once().await, ScanOutcome::CaptureFailed);
    let snap = h.scanner.snapshot();
    assert_eq!(snap.status, "Capture failed");
    assert_eq!(snap.state, ScanState::CameraReady);
    assert_eq!(h.client.submissions(), 0);
}

#[tokio::test(start_paused = true)]
async fn overlapping_manual_scan_is_dropped() {
    let h = harness(
        FakeMedia::new(&["front"]),
        FakeScanClient::new().with_delay(Duration::from_secs(2)),
    );
    h.scanner.initialize().await;

    let (first, second) = tokio::join!(h.scanner.scan_once(), async {
        sleep(Duration::from_millis(500)).await;
        h.scanner.scan_once().await
    });

    assert!(matches!(first, ScanOutcome::Classified { .. }));
    assert_eq!(second, ScanOutcome::Busy);
    assert_eq!(h.client.submissions(), 1);
    assert!(!h.scanner.snapshot().scanning);
}

#[tokio::test(start_paused = true)]
async fn auto_scan_submits_once_per_interval() {
    let h = ready_harness();
    h.scanner.initialize().await;
    h.scanner.set_auto_scan(true, AutoScanInterval::Fast);

    sleep(Duration::from_millis(10_100)).await;

    assert_eq!(h.client.submissions(), 4);
    assert_eq!(h.client.max_in_flight(), 1);
    assert!(h.scanner.snapshot().auto_scan);
}

#[tokio::test(start_paused = true)]
async fn slow_submission_skips_ticks_instead_of_queueing() {
    let h = harness(
        FakeMedia::new(&["front"]),
        FakeScanClient::new().with_delay(Duration::from_secs(6)),
    );
    h.scanner.initialize().await;
    h.scanner.set_auto_scan(true, AutoScanInterval::Fast);

    // Ticks at 2.5s (submits, busy until 8.5s), 5s and 7.5s (dropped), 10s (submits)
    sleep(Duration::from_millis(10_100)).await;

    assert_eq!(h.client.submissions(), 2);
    assert_eq!(h.client.max_in_flight(), 1);
}

#[tokio::test(start_paused = true)]
async fn auto_scan_waits_for_camera() {
    let media = FakeMedia::new(&["front"]);
    media.fail_open("front", MediaError::Busy("used by another app".into()));
    let h = harness(media, FakeScanClient::new());
    h.scanner.initialize().await;
    let status = h.scanner.snapshot().status;

    h.scanner.set_auto_scan(true, AutoScanInterval::Fast);
    sleep(Duration::from_secs(6)).await;

    assert_eq!(h.client.submissions(), 0);
    // Timer skips must not clobber the camera error text
    assert_eq!(h.scanner.snapshot().status, status);
}

#[tokio::test(start_paused = true)]
async fn toggling_auto_scan_leaves_one_timer() {
    let h = ready_harness();
    h.scanner.initialize().await;

    h.scanner.set_auto_scan(true, AutoScanInterval::Fast);
    h.scanner.set_auto_scan(false, AutoScanInterval::Fast);
    h.scanner.set_auto_scan(true, AutoScanInterval::Slow);

    sleep(Duration::from_millis(10_100)).await;

    // Only the 5s timer fires: at 5s and 10s
    assert_eq!(h.client.submissions(), 2);
    let snap = h.scanner.snapshot();
    assert!(snap.auto_scan);
    assert_eq!(snap.interval_ms, AutoScanInterval::Slow);
}

#[tokio::test(start_paused = true)]
async fn changing_interval_while_enabled_replaces_timer() {
    let h = ready_harness();
    h.scanner.initialize().await;

    h.scanner.set_auto_scan(true, AutoScanInterval::Fast);
    h.scanner.set_auto_scan(true, AutoScanInterval::Slow);
    sleep(Duration::from_millis(5_100)).await;

    assert_eq!(h.client.submissions(), 1);
}

#[tokio::test(start_paused = true)]
async fn disabling_auto_scan_stops_submissions() {
    let h = ready_harness();
    h.scanner.initialize().await;
    h.scanner.set_auto_scan(true, AutoScanInterval::Fast);
    sleep(Duration::from_millis(2_600)).await;
    assert_eq!(h.client.submissions(), 1);

    h.scanner.set_auto_scan(false, AutoScanInterval::Fast);
    sleep(Duration::from_secs(10)).await;
    assert_eq!(h.client.submissions(), 1);
    assert!(!h.scanner.snapshot().auto_scan);
}

#[tokio::test(start_paused = true)]
async fn device_switch_with_auto_scan_keeps_single_submission_and_stream() {
    let h = harness(
        FakeMedia::new(&["front", "side"]).with_open_delay(Duration::from_secs(1)),
        FakeScanClient::new().with_delay(Duration::from_secs(3)),
    );
    // t=1: camera ready
    h.scanner.initialize().await;
    // ticks at 3.5 (submits until 6.5), 6 (dropped), 8.5 (submits until 11.5), 11 (dropped)
    h.scanner.set_auto_scan(true, AutoScanInterval::Fast);

    sleep(Duration::from_secs(3)).await;
    assert!(h.scanner.snapshot().scanning);

    // t=4: switch mid-scan, ready again at t=5
    h.scanner.on_device_change("side").await;
    assert_eq!(h.scanner.snapshot().state, ScanState::CameraReady);

    sleep(Duration::from_secs(2)).await;
    // The submission started on "front" completed after the switch and is shown
    let snap = h.scanner.snapshot();
    assert_eq!(snap.status, "Recorded IN");
    assert!(snap.last_result.is_some());
    assert!(matches!(snap.state, ScanState::Result(_)));

    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.client.submissions(), 2);
    assert_eq!(h.client.max_in_flight(), 1);
    assert_eq!(h.media.counters.max_open(), 1);
    assert_eq!(h.media.counters.opened_total(), 2);
    assert_eq!(h.scanner.snapshot().selected_device.as_deref(), Some("side"));
}

#[tokio::test(start_paused = true)]
async fn result_arriving_while_starting_is_shown_without_state_change() {
    let h = harness(
        FakeMedia::new(&["front", "side"]).with_open_delay(Duration::from_secs(5)),
        FakeScanClient::new().with_delay(Duration::from_secs(1)),
    );
    h.scanner.initialize().await;

    let scanner = &h.scanner;
    let (outcome, snap) = tokio::join!(scanner.scan_once(), async {
        sleep(Duration::from_millis(100)).await;
        let switch = scanner.on_device_change("side");
        tokio::pin!(switch);
        // Poll the switch until the scan result (t+1s) lands, then look
        tokio::select! {
            _ = &mut switch => unreachable!("acquisition takes 5s"),
            _ = sleep(Duration::from_secs(2)) => {}
        }
        let snap = scanner.snapshot();
        switch.await;
        snap
    });

    assert!(matches!(outcome, ScanOutcome::Classified { .. }));
    assert_eq!(snap.state, ScanState::CameraStarting);
    assert_eq!(snap.status, "Recorded IN");
}

#[tokio::test(start_paused = true)]
async fn concurrent_switches_end_on_latest_device() {
    let h = harness(
        FakeMedia::new(&["front", "side", "rear"]).with_open_delay(Duration::from_millis(300)),
        FakeScanClient::new(),
    );
    h.scanner.initialize().await;

    tokio::join!(
        h.scanner.on_device_change("side"),
        h.scanner.on_device_change("rear"),
    );

    let snap = h.scanner.snapshot();
    assert_eq!(snap.selected_device.as_deref(), Some("rear"));
    assert_eq!(snap.state, ScanState::CameraReady);
    assert_eq!(h.media.counters.max_open(), 1);
    assert_eq!(h.media.counters.open(), 1);
}

#[tokio::test(start_paused = true)]
async fn scan_is_skipped_while_camera_is_starting() {
    let h = harness(
        FakeMedia::new(&["front", "side"]).with_open_delay(Duration::from_secs(1)),
        FakeScanClient::new(),
    );
    h.scanner.initialize().await;

    let (_, outcome) = tokio::join!(h.scanner.on_device_change("side"), async {
        sleep(Duration::from_millis(200)).await;
        h.scanner.scan_once().await
    });

    assert_eq!(outcome, ScanOutcome::CameraNotReady);
    assert_eq!(h.client.submissions(), 0);
}

#[tokio::test(start_paused = true)]
async fn stop_camera_releases_stream() {
    let h = ready_harness();
    h.scanner.initialize().await;

    h.scanner.stop_camera().await;

    let snap = h.scanner.snapshot();
    assert_eq!(snap.state, ScanState::Idle);
    assert_eq!(snap.status, "Camera stopped");
    assert_eq!(h.media.counters.open(), 0);
    assert_eq!(h.scanner.scan_once().await, ScanOutcome::CameraNotReady);

    h.scanner.start_camera().await;
    assert_eq!(h.scanner.snapshot().state, ScanState::CameraReady);
    assert_eq!(h.media.counters.open(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_releases_stream_and_cancels_timer() {
    let h = ready_harness();
    h.scanner.initialize().await;
    h.scanner.set_auto_scan(true, AutoScanInterval::Fast);

    h.scanner.shutdown().await;
    sleep(Duration::from_secs(10)).await;

    assert_eq!(h.media.counters.open(), 0);
    assert_eq!(h.media.counters.stops(), 1);
    assert_eq!(h.client.submissions(), 0);
    assert!(!h.scanner.snapshot().auto_scan);
}

#[tokio::test(start_paused = true)]
async fn drop_releases_stream_and_cancels_timer() {
    let Harness {
        media,
        client,
        scanner,
    } = ready_harness();
    scanner.initialize().await;
    scanner.set_auto_scan(true, AutoScanInterval::Fast);
    assert_eq!(media.counters.open(), 1);

    drop(scanner);
    sleep(Duration::from_secs(10)).await;

    assert_eq!(media.counters.open(), 0);
    assert_eq!(media.counters.stops(), 1);
    assert_eq!(client.submissions(), 0);
}

#[tokio::test(start_paused = true)]
async fn refresh_keeps_selection_when_still_present() {
    let h = ready_harness();
    h.scanner.initialize().await;
    h.scanner.on_device_change("side").await;

    let listed = h.scanner.refresh_devices().await;

    assert_eq!(listed.len(), 2);
    assert_eq!(h.scanner.snapshot().selected_device.as_deref(), Some("side"));
    // No extra acquisition for an unchanged selection
    assert_eq!(h.media.counters.opened_total(), 2);
}

#[tokio::test(start_paused = true)]
async fn hung_camera_does_not_block_switch_or_shutdown() {
    let media = Arc::new(FakeMedia::new(&["front", "side"]));
    let client = Arc::new(FakeScanClient::new());
    let devices = DeviceManager::new(media.clone(), media.clone(), StreamConstraints::default())
        .with_open_timeout(Duration::from_secs(5));
    let scanner = Arc::new(ScanOrchestrator::new(
        devices,
        CaptureEngine::new(&CaptureConfig::default()),
        client,
        AutoScanInterval::Medium,
    ));
    scanner.initialize().await;
    media.set_open_delay(Duration::from_secs(3600));

    let stalled = tokio::spawn({
        let scanner = scanner.clone();
        async move { scanner.on_device_change("side").await }
    });
    sleep(Duration::from_millis(100)).await;

    let switched = tokio::time::timeout(Duration::from_secs(30), scanner.on_device_change("front")).await;
    assert!(switched.is_ok());
    assert!(stalled.is_finished());
    let snap = scanner.snapshot();
    assert!(matches!(snap.state, ScanState::CameraError(_)));
    assert!(snap.status.starts_with("Camera error: device busy"));

    let shut = tokio::time::timeout(Duration::from_secs(30), scanner.shutdown()).await;
    assert!(shut.is_ok());
    assert_eq!(media.counters.open(), 0);
}

#[tokio::test(start_paused = true)]
async fn flash_clears_but_result_stays() {
    let h = ready_harness();
    h.scanner.initialize().await;
    h.scanner.scan_once().await;
    assert_eq!(h.scanner.snapshot().flash, Some(Tone::Success));

    sleep(Duration::from_millis(800)).await;

    let snap = h.scanner.snapshot();
    assert_eq!(snap.flash, None);
    assert_eq!(snap.status, "Recorded IN");
    assert!(snap.last_result.is_some());
}

#[tokio::test(start_paused = true)]
async fn drop_during_camera_start_releases_once_core_is_gone() {
    let h = ready_harness();
    h.scanner.initialize().await;
    let core = h.scanner.core.clone();
    let busy = core.devices.lock().await;

    drop(h.scanner);
    // Teardown could not take the camera; the stream is still open
    assert_eq!(h.media.counters.open(), 1);

    drop(busy);
    drop(core);
    assert_eq!(h.media.counters.open(), 0);
    assert_eq!(h.media.counters.stops(), 1);
}
