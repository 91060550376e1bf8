//! Register a new face: capture a frame with a detectable face and
//! store it as the identity's reference image.

use crate::config::Config;
use rollcall_core::{gallery, EngineError, FaceEngine, GalleryError, OnnxFaceEngine};
use rollcall_hw::{source, CameraError, FrameSource, STREAM_BUFFERS};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fraction of near-black pixels above which a capture is rejected outright.
const DARK_FRAME_PCT: f32 = 0.95;

#[derive(Error, Debug)]
pub enum RegisterError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("face engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("gallery error: {0}")]
    Gallery(#[from] GalleryError),
    #[error("no face detected after {0} attempts")]
    NoFace(usize),
    #[error("registration cancelled")]
    Cancelled,
}

/// Capture up to `attempts` frames, saving the first one that contains a face.
///
/// `ready` is called before each attempt with the 1-based attempt number and
/// returns `false` to cancel. Once it returns, `stale` queued frames are
/// dropped so the capture is the scene at that moment.
pub fn capture(
    source: &mut dyn FrameSource,
    engine: &mut dyn FaceEngine,
    gallery_dir: &Path,
    identity: &str,
    attempts: usize,
    stale: usize,
    mut ready: impl FnMut(usize) -> bool,
) -> Result<PathBuf, RegisterError> {
    gallery::validate_identity(identity)?;

    for attempt in 1..=attempts {
        if !ready(attempt) {
            return Err(RegisterError::Cancelled);
        }
        source::discard_warmup(source, stale)?;
        let frame = source.next_frame()?;
        if frame.is_dark(DARK_FRAME_PCT) {
            tracing::warn!(
                identity,
                attempt,
                brightness = frame.avg_brightness(),
                "captured frame is too dark"
            );
            println!("Frame too dark, check the lighting and try again.");
            continue;
        }
        match engine.encode_best(&frame.image)? {
            Some((face, _)) => {
                tracing::debug!(
                    identity,
                    attempt,
                    confidence = face.confidence,
                    "face captured"
                );
                return Ok(gallery::save_reference(gallery_dir, identity, &frame.image)?);
            }
            None => {
                tracing::warn!(identity, attempt, "no face in captured frame");
                println!("No face detected, try again.");
            }
        }
    }
    Err(RegisterError::NoFace(attempts))
}

/// Open the configured source and models, then run [`capture`].
pub fn register(
    config: &Config,
    identity: &str,
    ready: impl FnMut(usize) -> bool,
) -> Result<PathBuf, RegisterError> {
    gallery::validate_identity(identity)?;
    let mut engine = OnnxFaceEngine::load(&config.model_dir)?;

    let video = config.video_source();
    let mut source = video.open()?;
    source::discard_warmup(source.as_mut(), config.warmup_frames)?;
    tracing::info!(identity, source = %video, "registration started");

    capture(
        source.as_mut(),
        &mut engine,
        &config.gallery_dir,
        identity,
        config.register_attempts,
        STREAM_BUFFERS as usize,
        ready,
    )
}
