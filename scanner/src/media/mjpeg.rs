use async_trait::async_trait;
use attendance_common::config::CameraConfig;
use bytes::BytesMut;
use futures_util::StreamExt;
use image::{DynamicImage, ImageFormat, ImageReader};
use reqwest::StatusCode;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{CameraDevice, CaptureStream, DeviceEnumerator, MediaError, StreamConstraints};

const DEFAULT_BOUNDARY: &str = "frame";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Network MJPEG cameras listed in the config, exposed as capture devices.
pub struct MjpegCameras {
    client: reqwest::Client,
    cameras: Vec<CameraConfig>,
}

impl MjpegCameras {
    pub fn new(cameras: Vec<CameraConfig>) -> Result<Self, MediaError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| MediaError::Other(e.to_string()))?;
        Ok(Self { client, cameras })
    }
}

#[async_trait]
impl DeviceEnumerator for MjpegCameras {
    async fn enumerate(&self) -> Result<Vec<CameraDevice>, MediaError> {
        Ok(self
            .cameras
            .iter()
            .map(|c| CameraDevice::new(&c.id, &c.label))
            .collect())
    }
}

#[async_trait]
impl super::StreamSource for MjpegCameras {
    async fn open(
        &self,
        device_id: &str,
        constraints: StreamConstraints,
    ) -> Result<Box<dyn CaptureStream>, MediaError> {
        let camera = self
            .cameras
            .iter()
            .find(|c| c.id == device_id)
            .ok_or_else(|| MediaError::NotFound(device_id.to_string()))?;

        let url = stream_url(&camera.url, constraints);
        info!(device_id, url, "connecting to MJPEG camera");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| MediaError::Other(format!("{device_id} unreachable: {e}")))?;

        if let Some(err) = status_error(response.status(), device_id) {
            return Err(err);
        }

        let boundary = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(boundary_from_content_type)
            .unwrap_or_else(|| DEFAULT_BOUNDARY.to_string());

        let latest = Arc::new(Mutex::new(None));
        let task = tokio::spawn(pump_frames(
            response,
            MultipartParser::new(&boundary),
            latest.clone(),
            device_id.to_string(),
        ));

        Ok(Box::new(MjpegStream {
            device_id: device_id.to_string(),
            latest,
            task: Some(task),
        }))
    }
}

fn stream_url(base: &str, constraints: StreamConstraints) -> String {
    let sep = if base.contains('?') { '&' } else { '?' };
    format!(
        "{base}{sep}width={}&height={}",
        constraints.ideal_width, constraints.ideal_height
    )
}

fn status_error(status: StatusCode, device_id: &str) -> Option<MediaError> {
    if status.is_success() {
        return None;
    }
    let detail = format!("{device_id} answered HTTP {}", status.as_u16());
    Some(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => MediaError::PermissionDenied(detail),
        StatusCode::NOT_FOUND => MediaError::NotFound(detail),
        StatusCode::CONFLICT | StatusCode::LOCKED | StatusCode::SERVICE_UNAVAILABLE => {
            MediaError::Busy(detail)
        }
        StatusCode::RANGE_NOT_SATISFIABLE | StatusCode::UNPROCESSABLE_ENTITY => {
            MediaError::Overconstrained(detail)
        }
        _ => MediaError::Other(detail),
    })
}

/// Extract `boundary=` from a `multipart/x-mixed-replace` content type.
fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("boundary="))
        .map(|b| b.trim_matches('"').trim_start_matches("--").to_string())
        .filter(|b| !b.is_empty())
}

struct LatestFrame {
    jpeg: Vec<u8>,
    width: u32,
    height: u32,
}

/// Read the multipart body, keeping only the newest frame.
async fn pump_frames(
    response: reqwest::Response,
    mut parser: MultipartParser,
    latest: Arc<Mutex<Option<LatestFrame>>>,
    device_id: String,
) {
    let mut byte_stream = response.bytes_stream();
    let mut frames: u64 = 0;

    while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, device_id, "MJPEG stream error");
                break;
            }
        };

        for jpeg in parser.push(&chunk) {
            let Some((width, height)) = jpeg_dimensions(&jpeg) else {
                debug!(device_id, bytes = jpeg.len(), "skipping undecodable MJPEG part");
                continue;
            };
            frames += 1;
            if let Ok(mut slot) = latest.lock() {
                *slot = Some(LatestFrame {
                    jpeg,
                    width,
                    height,
                });
            }
        }
    }

    info!(device_id, frames, "MJPEG stream ended");
    if let Ok(mut slot) = latest.lock() {
        *slot = None;
    }
}

fn jpeg_dimensions(jpeg: &[u8]) -> Option<(u32, u32)> {
    let mut reader = ImageReader::new(Cursor::new(jpeg));
    reader.set_format(ImageFormat::Jpeg);
    reader.into_dimensions().ok()
}

pub struct MjpegStream {
    device_id: String,
    latest: Arc<Mutex<Option<LatestFrame>>>,
    task: Option<JoinHandle<()>>,
}

impl CaptureStream for MjpegStream {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn video_size(&self) -> (u32, u32) {
        match self.latest.lock() {
            Ok(slot) => slot.as_ref().map_or((0, 0), |f| (f.width, f.height)),
            Err(_) => (0, 0),
        }
    }

    fn current_frame(&self) -> Option<DynamicImage> {
        let jpeg = self.latest.lock().ok()?.as_ref()?.jpeg.clone();
        match image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg) {
            Ok(img) => Some(img),
            Err(e) => {
                warn!(error = %e, device_id = self.device_id, "failed to decode MJPEG frame");
                None
            }
        }
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(device_id = self.device_id, "MJPEG stream stopped");
        }
        if let Ok(mut slot) = self.latest.lock() {
            *slot = None;
        }
    }
}

impl Drop for MjpegStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Parse state for the MJPEG multipart stream.
enum ParseState {
    /// Looking for the boundary marker `--<boundary>\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental splitter for `multipart/x-mixed-replace` bodies.
struct MultipartParser {
    boundary: Vec<u8>,
    buffer: BytesMut,
    state: ParseState,
    jpeg_start: usize,
}

impl MultipartParser {
    fn new(boundary: &str) -> Self {
        Self {
            boundary: format!("--{boundary}\r\n").into_bytes(),
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
        }
    }

    /// Feed one body chunk; returns every JPEG part completed by it.
    fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let marker_len = self.boundary.len();
        let mut parts = Vec::new();

        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, &self.boundary) {
                        let _ = self.buffer.split_to(pos + marker_len);
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep the tail in case the boundary spans chunks
                        if self.buffer.len() > marker_len {
                            let _ = self.buffer.split_to(self.buffer.len() - marker_len);
                        }
                        break;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                        self.jpeg_start = 0;
                        self.state = ParseState::CollectingJpeg;
                    } else {
                        break;
                    }
                }
                ParseState::CollectingJpeg => {
                    let Some(pos) =
                        find_subsequence(&self.buffer[self.jpeg_start..], &self.boundary)
                    else {
                        self.jpeg_start = self.buffer.len().saturating_sub(marker_len);
                        break;
                    };
                    let jpeg_end = self.jpeg_start + pos;
                    let end = if jpeg_end >= 2
                        && self.buffer[jpeg_end - 2] == b'\r'
                        && self.buffer[jpeg_end - 1] == b'\n'
                    {
                        jpeg_end - 2
                    } else {
                        jpeg_end
                    };
                    if end > 0 {
                        parts.push(self.buffer[..end].to_vec());
                    }
                    let _ = self.buffer.split_to(jpeg_end + marker_len);
                    self.state = ParseState::SeekingHeaderEnd;
                }
            }
        }

        parts
    }
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
