//! HTTP MJPEG stream capture (phone camera apps such as DroidCam / IP Webcam).
//!
//! The response body is a `multipart/x-mixed-replace` sequence of JPEGs. Rather
//! than parse part headers, frames are cut out of the byte stream between the
//! JPEG start (`FF D8`) and end (`FF D9`) markers.

use crate::frame::{self, Frame};
use crate::source::FrameSource;
use crate::CameraError;
use std::io::Read;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// A stalled stream (phone asleep, Wi-Fi gone) surfaces as a read error.
const READ_TIMEOUT: Duration = Duration::from_secs(10);
const READ_CHUNK: usize = 16 * 1024;
/// Upper bound on a single JPEG; anything larger means we lost sync.
const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Splits a byte stream into complete JPEG images.
pub struct JpegSplitter<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: Read> JpegSplitter<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(READ_CHUNK * 4),
        }
    }

    /// Return the next complete JPEG, reading as much as needed.
    pub fn next_jpeg(&mut self) -> Result<Vec<u8>, CameraError> {
        loop {
            if let Some(start) = find(&self.buf, &SOI, 0) {
                if let Some(end) = find(&self.buf, &EOI, start + SOI.len()) {
                    let stop = end + EOI.len();
                    let jpeg = self.buf[start..stop].to_vec();
                    self.buf.drain(..stop);
                    return Ok(jpeg);
                }
                if start > 0 {
                    self.buf.drain(..start);
                }
                if self.buf.len() > MAX_FRAME_BYTES {
                    self.buf.clear();
                    return Err(CameraError::CaptureFailed(format!(
                        "no JPEG end marker within {MAX_FRAME_BYTES} bytes"
                    )));
                }
            } else {
                // Keep a trailing 0xFF: it may be the first half of a marker.
                let keep = usize::from(self.buf.last() == Some(&0xFF));
                let len = self.buf.len();
                self.buf.drain(..len - keep);
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self
                .reader
                .read(&mut chunk)
                .map_err(|e| CameraError::CaptureFailed(format!("stream read failed: {e}")))?;
            if n == 0 {
                return Err(CameraError::EndOfStream);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

fn find(haystack: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(2)
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// A connected MJPEG-over-HTTP stream.
pub struct MjpegStream {
    url: String,
    splitter: JpegSplitter<reqwest::blocking::Response>,
    sequence: u32,
}

impl MjpegStream {
    /// Connect to `url` and start reading the multipart body.
    pub fn connect(url: &str) -> Result<Self, CameraError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            // The blocking client applies this to each body read, not the whole body.
            .timeout(READ_TIMEOUT)
            .build()
            .map_err(|e| CameraError::StreamUnavailable(format!("{url}: {e}")))?;

        let response = client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| CameraError::StreamUnavailable(format!("{url}: {e}")))?;

        tracing::info!(
            url,
            content_type = ?response.headers().get(reqwest::header::CONTENT_TYPE),
            "connected to video stream"
        );

        Ok(Self {
            url: url.to_string(),
            splitter: JpegSplitter::new(response),
            sequence: 0,
        })
    }
}

impl FrameSource for MjpegStream {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let jpeg = self.splitter.next_jpeg()?;
        let image = frame::decode_image(&jpeg)?;
        self.sequence = self.sequence.wrapping_add(1);
        Ok(Frame::new(image, self.sequence))
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}
