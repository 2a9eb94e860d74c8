use image::DynamicImage;
use std::time::Duration;

/// A decoded frame straight from the capture source, before conversion to
/// the canonical pixel format.
pub struct RawFrame {
    pub image: DynamicImage,
    pub captured_at_ms: i64,
}

/// Something frames can be read from, one at a time.
#[allow(async_fn_in_trait)]
pub trait CaptureSource {
    async fn read_frame(&mut self) -> Result<RawFrame, ReadError>;
}

/// The stream could not be established. Fatal; never retried.
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("HTTP connection failed: {0}")]
    HttpConnect(reqwest::Error),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("expected a multipart MJPEG stream, got content type '{0}'")]
    NotMultipart(String),
}

/// A single frame read did not succeed. The loop logs it and moves on.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("no frame within {0:?}")]
    Timeout(Duration),
    #[error("HTTP stream error: {0}")]
    Stream(reqwest::Error),
    #[error("MJPEG stream ended")]
    StreamEnded,
    #[error("failed to decode JPEG: {0}")]
    Decode(#[from] image::ImageError),
}
