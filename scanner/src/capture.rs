use attendance_common::config::CaptureConfig;
use attendance_common::frame::FramePayload;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use tracing::debug;

use crate::media::CaptureStream;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("no stream bound")]
    NoStream,
    #[error("stream has not produced a frame yet")]
    NoFrame,
    #[error("failed to encode frame: {0}")]
    Encode(String),
}

/// Turns the current video frame into an upload-sized JPEG.
pub struct CaptureEngine {
    max_side: u32,
    quality: u8,
}

impl CaptureEngine {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            max_side: config.max_side,
            quality: config.jpeg_quality,
        }
    }

    pub fn capture_frame(
        &self,
        stream: Option<&dyn CaptureStream>,
    ) -> Result<FramePayload, CaptureError> {
        let stream = stream.ok_or(CaptureError::NoStream)?;

        let (w, h) = stream.video_size();
        if w == 0 || h == 0 {
            return Err(CaptureError::NoFrame);
        }
        let frame = stream.current_frame().ok_or(CaptureError::NoFrame)?;
        if frame.width() == 0 || frame.height() == 0 {
            return Err(CaptureError::NoFrame);
        }

        let (out_w, out_h) = scaled_size(frame.width(), frame.height(), self.max_side);
        let scaled = if (out_w, out_h) == (frame.width(), frame.height()) {
            frame
        } else {
            frame.resize_exact(out_w, out_h, FilterType::Triangle)
        };

        let jpeg = self.encode(&scaled)?;
        debug!(
            device_id = stream.device_id(),
            src_width = w,
            src_height = h,
            width = out_w,
            height = out_h,
            bytes = jpeg.len(),
            "captured frame"
        );
        Ok(FramePayload::new(out_w, out_h, jpeg))
    }

    fn encode(&self, img: &DynamicImage) -> Result<Vec<u8>, CaptureError> {
        // JPEG has no alpha channel
        let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
        let mut jpeg = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut jpeg, self.quality);
        rgb.write_with_encoder(encoder)
            .map_err(|e| CaptureError::Encode(e.to_string()))?;
        Ok(jpeg)
    }
}

/// Fit `width x height` inside `max_side` on the longer side, keeping the
/// aspect ratio. Never upsamples; each side is at least 1.
pub fn scaled_size(width: u32, height: u32, max_side: u32) -> (u32, u32) {
    let longest = width.max(height) as f64;
    let scale = (max_side as f64 / longest).min(1.0);
    let w = ((width as f64 * scale).round() as u32).max(1);
    let h = ((height as f64 * scale).round() as u32).max(1);
    (w, h)
}
