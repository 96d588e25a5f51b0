mod api;
mod capture;
mod client;
mod device;
mod media;
mod orchestrator;

use attendance_common::config::Config;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use capture::CaptureEngine;
use client::HttpScanClient;
use device::DeviceManager;
use media::mjpeg::MjpegCameras;
use media::StreamConstraints;
use orchestrator::ScanOrchestrator;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let interval = match config.auto_scan.interval() {
        Ok(i) => i,
        Err(e) => {
            error!(error = %e, "invalid auto-scan interval");
            std::process::exit(1);
        }
    };

    info!(
        scan_url = config.scan_url(),
        cameras = config.cameras.len(),
        listen = config.control.listen,
        "starting attendance scanner"
    );

    let cameras = match MjpegCameras::new(config.cameras.clone()) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!(error = %e, "failed to create camera backend");
            std::process::exit(1);
        }
    };
    let client = match HttpScanClient::new(
        config.scan_url(),
        Duration::from_secs(config.api.timeout_secs),
    ) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!(error = %e, "failed to create scan client");
            std::process::exit(1);
        }
    };

    let constraints = StreamConstraints {
        ideal_width: config.capture.ideal_width,
        ideal_height: config.capture.ideal_height,
    };
    let scanner = Arc::new(ScanOrchestrator::new(
        DeviceManager::new(cameras.clone(), cameras, constraints)
            .with_open_timeout(Duration::from_secs(config.capture.open_timeout_secs)),
        CaptureEngine::new(&config.capture),
        client,
        interval,
    ));

    scanner.initialize().await;
    if config.auto_scan.enabled {
        scanner.set_auto_scan(true, interval);
    }

    let listener = match tokio::net::TcpListener::bind(&config.control.listen).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, addr = config.control.listen, "failed to bind control API");
            scanner.shutdown().await;
            std::process::exit(1);
        }
    };
    info!(addr = config.control.listen, "control API listening");

    let served = axum::serve(listener, api::router(scanner.clone()))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown requested");
        })
        .await;
    if let Err(e) = served {
        error!(error = %e, "control API failed");
    }

    scanner.shutdown().await;
}
