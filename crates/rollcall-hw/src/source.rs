//! Video source selection: local camera index or phone-camera HTTP stream.

use crate::camera::Camera;
use crate::frame::Frame;
use crate::stream::MjpegStream;
use crate::CameraError;

/// Anything that yields frames one blocking call at a time.
pub trait FrameSource {
    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<Frame, CameraError>;

    /// Human-readable origin of the frames, for logs.
    fn describe(&self) -> String;
}

/// Where frames come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoSource {
    /// Local V4L2 camera by index (`/dev/video<N>`).
    Device(u32),
    /// HTTP MJPEG stream URL.
    Stream(String),
}

impl VideoSource {
    /// Stream URL served by phone camera apps: `http://<host>:<port>/video`.
    pub fn phone(host: &str, port: u16) -> Self {
        Self::Stream(format!("http://{host}:{port}/video"))
    }

    /// Open the source. Fails fast if the device or URL is unreachable.
    pub fn open(&self) -> Result<Box<dyn FrameSource + Send>, CameraError> {
        match self {
            Self::Device(index) => Ok(Box::new(Camera::open_index(*index)?)),
            Self::Stream(url) => Ok(Box::new(MjpegStream::connect(url)?)),
        }
    }
}

impl std::fmt::Display for VideoSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Device(index) => write!(f, "/dev/video{index}"),
            Self::Stream(url) => f.write_str(url),
        }
    }
}

/// Read and drop `count` frames so exposure and gain settle.
pub fn discard_warmup(source: &mut dyn FrameSource, count: usize) -> Result<(), CameraError> {
    if count > 0 {
        tracing::debug!(count, source = %source.describe(), "discarding warmup frames");
    }
    for _ in 0..count {
        source.next_frame()?;
    }
    Ok(())
}
