use bytes::{Buf, Bytes, BytesMut};
use chrono::Utc;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use image::{ImageFormat, ImageReader};
use mjpeg_relay_common::config::StreamConfig;
use std::io::Cursor;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::capture::{CaptureSource, OpenError, RawFrame, ReadError};

const DEFAULT_BOUNDARY: &str = "frame";
const HEADER_END: &[u8] = b"\r\n\r\n";
/// Parts larger than this are dropped and the parser resyncs.
const MAX_PART_BYTES: usize = 8 * 1024 * 1024;
const MAX_HEADER_BYTES: usize = 16 * 1024;

/// Parse state for the MJPEG multipart stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    /// Looking for the delimiter `--{boundary}`.
    SeekingBoundary,
    /// Found delimiter, now looking for end of part headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes, either a known length or until the next delimiter.
    CollectingJpeg { content_length: Option<usize> },
}

/// Incremental `multipart/x-mixed-replace` splitter.
///
/// Feed raw body chunks with [`push`](Self::push) and drain complete JPEG
/// payloads with [`next_jpeg`](Self::next_jpeg).
pub struct MjpegParser {
    delimiter: Vec<u8>,
    buffer: BytesMut,
    state: ParseState,
    /// Offset into `buffer` already scanned for the delimiter.
    scan_from: usize,
}

impl MjpegParser {
    pub fn new(boundary: &str) -> Self {
        Self {
            delimiter: format!("--{boundary}").into_bytes(),
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            scan_from: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Returns the next complete JPEG payload, or `None` if more bytes are needed.
    pub fn next_jpeg(&mut self) -> Option<Bytes> {
        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, &self.delimiter) {
                        self.buffer.advance(pos + self.delimiter.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep the tail in case the delimiter spans chunks
                        if self.buffer.len() > self.delimiter.len() {
                            let excess = self.buffer.len() - self.delimiter.len();
                            self.buffer.advance(excess);
                        }
                        return None;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        let content_length = parse_content_length(&self.buffer[..pos]);
                        self.buffer.advance(pos + HEADER_END.len());
                        self.scan_from = 0;
                        self.state = ParseState::CollectingJpeg { content_length };
                    } else {
                        if self.buffer.len() > MAX_HEADER_BYTES {
                            warn!(bytes = self.buffer.len(), "oversized part headers, resyncing");
                            self.buffer.clear();
                            self.state = ParseState::SeekingBoundary;
                        }
                        return None;
                    }
                }
                ParseState::CollectingJpeg {
                    content_length: Some(len),
                } => {
                    if len > MAX_PART_BYTES {
                        warn!(len, "part exceeds size limit, skipping");
                        self.state = ParseState::SeekingBoundary;
                        continue;
                    }
                    if self.buffer.len() < len {
                        return None;
                    }
                    let jpeg = self.buffer.split_to(len).freeze();
                    self.state = ParseState::SeekingBoundary;
                    if !jpeg.is_empty() {
                        return Some(jpeg);
                    }
                }
                ParseState::CollectingJpeg {
                    content_length: None,
                } => {
                    let Some(pos) = find_subsequence(&self.buffer[self.scan_from..], &self.delimiter)
                    else {
                        if self.buffer.len() > MAX_PART_BYTES {
                            warn!(bytes = self.buffer.len(), "part exceeds size limit, resyncing");
                            self.buffer.clear();
                            self.scan_from = 0;
                            self.state = ParseState::SeekingBoundary;
                            return None;
                        }
                        // Avoid re-scanning old data
                        self.scan_from = self.buffer.len().saturating_sub(self.delimiter.len());
                        return None;
                    };

                    let delimiter_at = self.scan_from + pos;
                    // Strip trailing \r\n before the delimiter
                    let end = if self.buffer[..delimiter_at].ends_with(b"\r\n") {
                        delimiter_at - 2
                    } else {
                        delimiter_at
                    };
                    let jpeg = self.buffer.split_to(end).freeze();
                    self.buffer.advance(delimiter_at - end + self.delimiter.len());

                    // Already past the delimiter, go to header parsing
                    self.state = ParseState::SeekingHeaderEnd;
                    if !jpeg.is_empty() {
                        return Some(jpeg);
                    }
                }
            }
        }
    }
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn parse_content_length(headers: &[u8]) -> Option<usize> {
    std::str::from_utf8(headers)
        .ok()?
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
}

/// Extract the `boundary=` parameter from a multipart content type.
fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.trim().split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| {
            value
                .trim()
                .trim_matches('"')
                .trim_start_matches("--")
                .to_string()
        })
        .filter(|boundary| !boundary.is_empty())
}

/// An open connection to a remote MJPEG endpoint.
///
/// Never reconnects: once the body ends, every read fails with
/// [`ReadError::StreamEnded`]. Dropping the handle closes the connection.
pub struct MjpegCapture {
    url: String,
    body: Option<BoxStream<'static, reqwest::Result<Bytes>>>,
    parser: MjpegParser,
    read_timeout: Duration,
}

/// Connect to the MJPEG endpoint. One-shot: no retry on failure.
pub async fn open(config: &StreamConfig) -> Result<MjpegCapture, OpenError> {
    let client = reqwest::Client::builder()
        .connect_timeout(config.connect_timeout())
        .build()
        .map_err(OpenError::Client)?;

    info!(url = config.url, "connecting to MJPEG stream");

    // send() resolves once response headers arrive
    let response_deadline = config.connect_timeout() + config.read_timeout();
    let response = tokio::time::timeout(response_deadline, client.get(&config.url).send())
        .await
        .map_err(|_| OpenError::Timeout(response_deadline))?
        .map_err(OpenError::HttpConnect)?;

    if !response.status().is_success() {
        return Err(OpenError::HttpStatus(response.status().as_u16()));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    if !content_type.to_ascii_lowercase().starts_with("multipart/") {
        return Err(OpenError::NotMultipart(content_type));
    }

    let boundary = boundary_from_content_type(&content_type).unwrap_or_else(|| {
        debug!(content_type, "no boundary parameter, assuming '{DEFAULT_BOUNDARY}'");
        DEFAULT_BOUNDARY.to_string()
    });

    info!(status = %response.status(), boundary, "connected to MJPEG stream");

    Ok(MjpegCapture {
        url: config.url.clone(),
        body: Some(response.bytes_stream().boxed()),
        parser: MjpegParser::new(&boundary),
        read_timeout: config.read_timeout(),
    })
}

impl CaptureSource for MjpegCapture {
    async fn read_frame(&mut self) -> Result<RawFrame, ReadError> {
        let deadline = Instant::now() + self.read_timeout;

        loop {
            if let Some(jpeg) = self.parser.next_jpeg() {
                let captured_at_ms = Utc::now().timestamp_millis();
                let image = decode_jpeg(&jpeg)?;
                return Ok(RawFrame {
                    image,
                    captured_at_ms,
                });
            }

            let body = self.body.as_mut().ok_or(ReadError::StreamEnded)?;
            match tokio::time::timeout_at(deadline, body.next()).await {
                Err(_) => return Err(ReadError::Timeout(self.read_timeout)),
                Ok(None) => {
                    info!(url = self.url, "MJPEG stream closed by server");
                    self.body = None;
                    return Err(ReadError::StreamEnded);
                }
                Ok(Some(Err(e))) => return Err(ReadError::Stream(e)),
                Ok(Some(Ok(chunk))) => self.parser.push(&chunk),
            }
        }
    }
}

impl Drop for MjpegCapture {
    fn drop(&mut self) {
        debug!(url = self.url, "releasing MJPEG capture");
    }
}

fn decode_jpeg(jpeg: &[u8]) -> Result<image::DynamicImage, image::ImageError> {
    ImageReader::with_format(Cursor::new(jpeg), ImageFormat::Jpeg).decode()
}
