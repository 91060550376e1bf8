//! rollcall-hw — Video capture from local cameras and phone-camera streams.
//!
//! Provides V4L2-based camera access and an HTTP MJPEG reader behind one
//! blocking [`FrameSource`] trait.

pub mod camera;
pub mod frame;
pub mod source;
pub mod stream;

pub use camera::{Camera, PixelFormat, STREAM_BUFFERS};
pub use frame::{Frame, FrameError};
pub use source::{FrameSource, VideoSource};
pub use stream::MjpegStream;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("video stream unavailable: {0}")]
    StreamUnavailable(String),
    #[error("video stream ended")]
    EndOfStream,
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
}
