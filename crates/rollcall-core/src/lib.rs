//! rollcall-core — Face-based attendance: recognition backend, gallery,
//! matching and the attendance ledger.
//!
//! Detection (SCRFD) and recognition (ArcFace) run via ONNX Runtime behind the
//! [`FaceEngine`] trait; everything downstream only sees embeddings.

pub mod alignment;
pub mod detector;
pub mod engine;
pub mod gallery;
pub mod ledger;
pub mod overlay;
pub mod recognizer;
pub mod types;

pub use detector::FaceDetector;
pub use engine::{EngineError, FaceEngine, OnnxFaceEngine};
pub use gallery::{Gallery, GalleryError};
pub use ledger::{AttendanceRecord, DedupPolicy, Ledger, LedgerError, MarkOutcome, MarkState};
pub use recognizer::FaceRecognizer;
pub use types::{BoundingBox, DistanceMatcher, Embedding, GalleryEntry, MatchResult, Matcher};
