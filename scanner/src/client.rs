use async_trait::async_trait;
use attendance_common::frame::FramePayload;
use attendance_common::scan::{ScanParseError, ScanRequest, ScanResult};
use chrono::Utc;
use std::time::Duration;
use tracing::debug;

/// Any failure to obtain a well-formed scan response.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("scan request failed: {0}")]
    Transport(reqwest::Error),
    #[error("HTTP status {status}: {source}")]
    Status {
        status: u16,
        #[source]
        source: ScanParseError,
    },
    #[error("invalid scan response: {0}")]
    Response(#[from] ScanParseError),
}

/// Remote recognition endpoint.
#[async_trait]
pub trait ScanClient: Send + Sync {
    async fn submit(&self, frame: &FramePayload) -> Result<ScanResult, SubmitError>;
}

pub struct HttpScanClient {
    client: reqwest::Client,
    url: String,
}

impl HttpScanClient {
    pub fn new(url: String, timeout: Duration) -> Result<Self, SubmitError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(SubmitError::Client)?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl ScanClient for HttpScanClient {
    async fn submit(&self, frame: &FramePayload) -> Result<ScanResult, SubmitError> {
        let body = ScanRequest {
            image_base64: frame.to_data_url(),
        };
        debug!(
            url = self.url,
            width = frame.width,
            height = frame.height,
            bytes = frame.payload_size(),
            "submitting frame"
        );

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(SubmitError::Transport)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(SubmitError::Transport)?;

        // The endpoint reports rejections in the body, sometimes with a
        // non-2xx status; only an unparsable body is a failure.
        match ScanResult::from_slice(&bytes, Utc::now()) {
            Ok(result) => Ok(result),
            Err(source) if !status.is_success() => Err(SubmitError::Status {
                status: status.as_u16(),
                source,
            }),
            Err(e) => Err(e.into()),
        }
    }
}
