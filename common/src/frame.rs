use base64::Engine;

const DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

/// A compressed still image derived from one video frame, sized for upload.
///
/// Created per scan attempt and dropped once the submission completes.
#[derive(Debug, Clone)]
pub struct FramePayload {
    pub width: u32,
    pub height: u32,
    pub jpeg: Vec<u8>,
}

impl FramePayload {
    pub fn new(width: u32, height: u32, jpeg: Vec<u8>) -> Self {
        Self {
            width,
            height,
            jpeg,
        }
    }

    /// Returns the size of the encoded JPEG in bytes.
    pub fn payload_size(&self) -> usize {
        self.jpeg.len()
    }

    /// Encode as a `data:` URL, the form the recognition endpoint expects
    /// in `imageBase64`.
    pub fn to_data_url(&self) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&self.jpeg);
        let mut url = String::with_capacity(DATA_URL_PREFIX.len() + encoded.len());
        url.push_str(DATA_URL_PREFIX);
        url.push_str(&encoded);
        url
    }
}
