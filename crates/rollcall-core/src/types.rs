use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Map a box found on a resized frame back to the original frame.
    ///
    /// `factor` is the resize factor that was applied (0.25 → frame was shrunk 4×).
    pub fn rescale(&self, factor: f32) -> Self {
        let inv = 1.0 / factor;
        Self {
            x: self.x * inv,
            y: self.y * inv,
            width: self.width * inv,
            height: self.height * inv,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(lx, ly)| (lx * inv, ly * inv))),
        }
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Euclidean distance between two embeddings.
    pub fn distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One registered identity and its reference embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryEntry {
    /// Image file stem the embedding was loaded from.
    pub identity: String,
    pub embedding: Embedding,
}

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Distance to the closest gallery entry (`f32::INFINITY` for an empty gallery).
    pub distance: f32,
    /// Index of the closest gallery entry.
    pub index: Option<usize>,
    /// Identity of the matched entry, only set when `matched`.
    pub identity: Option<String>,
}

impl MatchResult {
    fn no_match(distance: f32, index: Option<usize>) -> Self {
        Self {
            matched: false,
            distance,
            index,
            identity: None,
        }
    }
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[GalleryEntry]) -> MatchResult;
}

/// Nearest-neighbour matcher on Euclidean distance.
///
/// Every gallery entry gets an is-match flag (`distance <= tolerance`). The
/// closest entry wins, first one on ties, and is only accepted when its own
/// flag is set.
pub struct DistanceMatcher {
    pub tolerance: f32,
}

impl DistanceMatcher {
    pub fn new(tolerance: f32) -> Self {
        Self { tolerance }
    }
}

impl Matcher for DistanceMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[GalleryEntry]) -> MatchResult {
        let mut best: Option<(usize, f32)> = None;

        for (i, entry) in gallery.iter().enumerate() {
            let d = probe.distance(&entry.embedding);
            // Strict `<` keeps the first of equal minima.
            if best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((i, d));
            }
        }

        match best {
            Some((idx, d)) if d <= self.tolerance => MatchResult {
                matched: true,
                distance: d,
                index: Some(idx),
                identity: Some(gallery[idx].identity.clone()),
            },
            Some((idx, d)) => MatchResult::no_match(d, Some(idx)),
            None => MatchResult::no_match(f32::INFINITY, None),
        }
    }
}
