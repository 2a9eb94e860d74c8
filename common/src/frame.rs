use chrono::{DateTime, Utc};

/// Pixel layout of a published frame. Names follow `sensor_msgs/Image`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelEncoding {
    /// Canonical format: three 8-bit channels, blue-green-red.
    Bgr8,
    Rgb8,
    Mono8,
}

impl PixelEncoding {
    pub const CANONICAL: PixelEncoding = PixelEncoding::Bgr8;

    pub fn channels(self) -> usize {
        match self {
            PixelEncoding::Bgr8 | PixelEncoding::Rgb8 => 3,
            PixelEncoding::Mono8 => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PixelEncoding::Bgr8 => "bgr8",
            PixelEncoding::Rgb8 => "rgb8",
            PixelEncoding::Mono8 => "mono8",
        }
    }

    fn tag(self) -> u8 {
        match self {
            PixelEncoding::Bgr8 => 1,
            PixelEncoding::Rgb8 => 2,
            PixelEncoding::Mono8 => 3,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(PixelEncoding::Bgr8),
            2 => Some(PixelEncoding::Rgb8),
            3 => Some(PixelEncoding::Mono8),
            _ => None,
        }
    }
}

impl std::fmt::Display for PixelEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded camera frame as published on the image topic.
///
/// Binary wire format (message value):
///
///   [0]        version         = 0x01
///   [1]        encoding tag    (1 = bgr8, 2 = rgb8, 3 = mono8)
///   [2..10]    captured_at_ms  (i64 big-endian, Unix millis)
///   [10..18]   seq             (u64 big-endian)
///   [18..22]   width           (u32 big-endian)
///   [22..26]   height          (u32 big-endian)
///   [26..30]   step            (u32 big-endian, bytes per row)
///   [30]       frame_id_len    (u8)
///   [31..31+n] frame_id        (UTF-8)
///   [..]       pixel data      (step * height bytes, row-major)
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub step: u32,
    pub encoding: PixelEncoding,
    pub data: Vec<u8>,
    pub captured_at_ms: i64,
    pub seq: u64,
    pub frame_id: String,
}

const WIRE_VERSION: u8 = 0x01;
const HEADER_SIZE: usize = 31; // up to and including frame_id_len

impl VideoFrame {
    /// Build a frame with a tightly packed row stride, checking that `data`
    /// covers exactly `width * height` pixels.
    pub fn new(
        width: u32,
        height: u32,
        encoding: PixelEncoding,
        data: Vec<u8>,
        captured_at_ms: i64,
        seq: u64,
        frame_id: impl Into<String>,
    ) -> Result<Self, FrameError> {
        let step = width as usize * encoding.channels();
        let expected = step * height as usize;
        if data.len() != expected {
            return Err(FrameError::LengthMismatch {
                got: data.len(),
                expected,
            });
        }
        Ok(Self {
            width,
            height,
            step: step as u32,
            encoding,
            data,
            captured_at_ms,
            seq,
            frame_id: frame_id.into(),
        })
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.captured_at_ms).unwrap_or_else(Utc::now)
    }

    /// Message key: `{frame_id}:{captured_at_ms}`.
    pub fn publish_key(&self) -> String {
        format!("{}:{}", self.frame_id, self.captured_at_ms)
    }

    pub fn serialize(&self) -> Vec<u8> {
        // frame_id is capped at 255 bytes, cut on a char boundary
        let mut id_len = self.frame_id.len().min(u8::MAX as usize);
        while !self.frame_id.is_char_boundary(id_len) {
            id_len -= 1;
        }
        let frame_id = &self.frame_id.as_bytes()[..id_len];

        let mut buf = Vec::with_capacity(HEADER_SIZE + frame_id.len() + self.data.len());
        buf.push(WIRE_VERSION);
        buf.push(self.encoding.tag());
        buf.extend_from_slice(&self.captured_at_ms.to_be_bytes());
        buf.extend_from_slice(&self.seq.to_be_bytes());
        buf.extend_from_slice(&self.width.to_be_bytes());
        buf.extend_from_slice(&self.height.to_be_bytes());
        buf.extend_from_slice(&self.step.to_be_bytes());
        buf.push(frame_id.len() as u8);
        buf.extend_from_slice(frame_id);
        buf.extend_from_slice(&self.data);
        buf
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < HEADER_SIZE {
            return Err(FrameError::TooShort {
                got: data.len(),
                expected: HEADER_SIZE,
            });
        }
        if data[0] != WIRE_VERSION {
            return Err(FrameError::UnsupportedVersion(data[0]));
        }
        let encoding =
            PixelEncoding::from_tag(data[1]).ok_or(FrameError::UnknownEncoding(data[1]))?;
        let captured_at_ms = i64::from_be_bytes(be_array(&data[2..10]));
        let seq = u64::from_be_bytes(be_array(&data[10..18]));
        let width = u32::from_be_bytes(be_array(&data[18..22]));
        let height = u32::from_be_bytes(be_array(&data[22..26]));
        let step = u32::from_be_bytes(be_array(&data[26..30]));
        let id_len = data[30] as usize;

        let pixels_start = HEADER_SIZE + id_len;
        if data.len() < pixels_start {
            return Err(FrameError::TooShort {
                got: data.len(),
                expected: pixels_start,
            });
        }
        let frame_id = std::str::from_utf8(&data[HEADER_SIZE..pixels_start])
            .map_err(|_| FrameError::InvalidFrameId)?
            .to_string();

        let min_step = width as usize * encoding.channels();
        let expected = step as usize * height as usize;
        let pixels = &data[pixels_start..];
        if (step as usize) < min_step || pixels.len() != expected {
            return Err(FrameError::LengthMismatch {
                got: pixels.len(),
                expected: expected.max(min_step * height as usize),
            });
        }

        Ok(Self {
            width,
            height,
            step,
            encoding,
            data: pixels.to_vec(),
            captured_at_ms,
            seq,
            frame_id,
        })
    }
}

fn be_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame payload too short: got {got} bytes, expected at least {expected}")]
    TooShort { got: usize, expected: usize },
    #[error("unsupported frame wire version {0:#04x}")]
    UnsupportedVersion(u8),
    #[error("unknown pixel encoding tag {0}")]
    UnknownEncoding(u8),
    #[error("frame_id is not valid UTF-8")]
    InvalidFrameId,
    #[error("pixel data length {got} does not match geometry, expected {expected}")]
    LengthMismatch { got: usize, expected: usize },
}
