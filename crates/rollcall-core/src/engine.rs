//! Face backend seam: detection plus encoding behind one trait.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Detects and encodes faces. Implementations are opaque to the rest of the
/// crate; only this contract is relied upon.
pub trait FaceEngine {
    /// All faces in `frame`, most confident first. Empty when there are none.
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, EngineError>;

    /// Fixed-length embedding for one detected face.
    fn encode(&mut self, frame: &RgbImage, face: &BoundingBox) -> Result<Embedding, EngineError>;

    /// Detect, then encode the most confident face.
    fn encode_best(
        &mut self,
        frame: &RgbImage,
    ) -> Result<Option<(BoundingBox, Embedding)>, EngineError> {
        let Some(face) = self.detect(frame)?.into_iter().next() else {
            return Ok(None);
        };
        let embedding = self.encode(frame, &face)?;
        Ok(Some((face, embedding)))
    }
}

/// SCRFD + ArcFace running on ONNX Runtime.
pub struct OnnxFaceEngine {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceEngine {
    /// Load both models from `model_dir`. Fails fast if either is missing.
    pub fn load(model_dir: &Path) -> Result<Self, EngineError> {
        let scrfd = model_dir.join(SCRFD_MODEL_FILE);
        let arcface = model_dir.join(ARCFACE_MODEL_FILE);

        let detector = FaceDetector::load(&scrfd.to_string_lossy())?;
        let recognizer = FaceRecognizer::load(&arcface.to_string_lossy())?;
        tracing::info!(model_dir = %model_dir.display(), "face engine ready");

        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl FaceEngine for OnnxFaceEngine {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, EngineError> {
        Ok(self.detector.detect(frame)?)
    }

    fn encode(&mut self, frame: &RgbImage, face: &BoundingBox) -> Result<Embedding, EngineError> {
        Ok(self.recognizer.extract(frame, face)?)
    }
}
