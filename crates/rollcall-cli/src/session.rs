//! Attendance session: read frame → detect → match → mark → draw, until stopped.

use crate::config::Config;
use chrono::NaiveDateTime;
use image::imageops::{self, FilterType};
use rollcall_core::{
    overlay, DistanceMatcher, EngineError, FaceEngine, Gallery, GalleryError, Ledger, LedgerError,
    MarkOutcome, MarkState, Matcher, OnnxFaceEngine,
};
use rollcall_hw::{source, CameraError, Frame, FrameSource};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no registered faces could be loaded; register someone first")]
    EmptyGallery,
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("face engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("gallery error: {0}")]
    Gallery(#[from] GalleryError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Mutable state carried across frames of one session.
#[derive(Debug, Default)]
pub struct SessionState {
    pub marks: MarkState,
    pub frames: u64,
    pub faces_seen: u64,
    pub matches: u64,
    pub recorded: u64,
    pub mark_failures: u64,
}

/// One recognised face in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Sighting {
    pub identity: String,
    pub distance: f32,
    pub outcome: Option<MarkOutcome>,
}

/// Everything a session loop needs, borrowed for its lifetime.
pub struct Session<'a> {
    pub engine: &'a mut dyn FaceEngine,
    pub gallery: &'a Gallery,
    pub matcher: DistanceMatcher,
    pub ledger: &'a Ledger,
    pub detect_scale: f32,
    pub preview_path: Option<PathBuf>,
}

impl Session<'_> {
    /// Process one frame in place: faces are matched, marked and outlined.
    ///
    /// Ledger failures are logged and the mark dropped; engine failures abort.
    pub fn process_frame(
        &mut self,
        state: &mut SessionState,
        frame: &mut Frame,
        now: NaiveDateTime,
    ) -> Result<Vec<Sighting>, EngineError> {
        state.frames += 1;

        let small = if self.detect_scale < 1.0 {
            let w = ((frame.width() as f32 * self.detect_scale).round() as u32).max(1);
            let h = ((frame.height() as f32 * self.detect_scale).round() as u32).max(1);
            imageops::resize(&frame.image, w, h, FilterType::Triangle)
        } else {
            frame.image.clone()
        };

        let faces = self.engine.detect(&small)?;
        let mut sightings = Vec::new();

        for face in &faces {
            state.faces_seen += 1;
            let embedding = self.engine.encode(&small, face)?;
            let result = self.matcher.compare(&embedding, self.gallery.entries());
            let Some(identity) = result.identity.filter(|_| result.matched) else {
                tracing::trace!(distance = result.distance, "face not recognised");
                continue;
            };
            state.matches += 1;

            let drawn = face.rescale(self.detect_scale);
            overlay::draw_match(&mut frame.image, &drawn);
            tracing::debug!(
                identity = %identity,
                distance = result.distance,
                x = drawn.x,
                y = drawn.y,
                "face recognised"
            );

            let outcome = match self.ledger.mark(&mut state.marks, &identity, now) {
                Ok(outcome) => {
                    if let MarkOutcome::Recorded(record) = &outcome {
                        state.recorded += 1;
                        println!("{} marked present at {} on {}", record.identity, record.time, record.date);
                    }
                    Some(outcome)
                }
                Err(e) => {
                    state.mark_failures += 1;
                    tracing::warn!(identity = %identity, error = %e, "could not write attendance, mark dropped");
                    None
                }
            };

            sightings.push(Sighting {
                identity,
                distance: result.distance,
                outcome,
            });
        }

        if let Some(path) = &self.preview_path {
            if let Err(e) = frame.image.save(path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to write preview frame");
            }
        }

        Ok(sightings)
    }

    /// Pull frames from `source` until `stop` is set.
    ///
    /// A failed frame read ends the session with the camera error.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        state: &mut SessionState,
        stop: &AtomicBool,
        mut clock: impl FnMut() -> NaiveDateTime,
    ) -> Result<(), SessionError> {
        while !stop.load(Ordering::Relaxed) {
            let mut frame = source.next_frame()?;
            self.process_frame(state, &mut frame, clock())?;
        }
        tracing::info!(
            frames = state.frames,
            matches = state.matches,
            recorded = state.recorded,
            "session stopped"
        );
        Ok(())
    }
}

/// Load everything from `config` and run a session until `stop` is set.
pub fn run_attendance(config: &Config, stop: &AtomicBool) -> Result<SessionState, SessionError> {
    let mut engine = OnnxFaceEngine::load(&config.model_dir)?;
    let gallery = Gallery::load(&config.gallery_dir, &mut engine)?;
    if gallery.is_empty() {
        return Err(SessionError::EmptyGallery);
    }
    println!("Encoding complete for {} faces.", gallery.len());

    let ledger = Ledger::open(
        &config.ledger_path,
        config.dedup_policy(),
        config.uppercase_names,
    )?;

    let video = config.video_source();
    let mut source = video.open()?;
    source::discard_warmup(source.as_mut(), config.warmup_frames)?;
    tracing::info!(source = %video, policy = ?ledger.policy(), "attendance session started");

    let mut session = Session {
        engine: &mut engine,
        gallery: &gallery,
        matcher: DistanceMatcher::new(config.match_tolerance),
        ledger: &ledger,
        detect_scale: config.detect_scale,
        preview_path: config.preview_path.clone(),
    };
    let mut state = SessionState::default();
    session.run(source.as_mut(), &mut state, stop, || {
        chrono::Local::now().naive_local()
    })?;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use image::{Rgb, RgbImage};
    use rollcall_core::{BoundingBox, DedupPolicy, Embedding, GalleryEntry};
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::time::Duration;

    /// Every frame carries one face whose embedding is the frame's corner colour.
    struct ColourEngine;

    impl FaceEngine for ColourEngine {
        fn detect(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, EngineError> {
            if frame.get_pixel(0, 0).0 == [0, 0, 0] {
                return Ok(Vec::new());
            }
            Ok(vec![BoundingBox {
                x: 0.0,
                y: 0.0,
                width: frame.width() as f32,
                height: frame.height() as f32,
                confidence: 0.9,
                landmarks: None,
            }])
        }

        fn encode(&mut self, frame: &RgbImage, _face: &BoundingBox) -> Result<Embedding, EngineError> {
            let [r, g, b] = frame.get_pixel(0, 0).0;
            Ok(Embedding::new(vec![r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0]))
        }
    }

    /// Plays back frames, raising `stop` when the last one is handed out.
    struct Playback {
        frames: VecDeque<RgbImage>,
        stop: Arc<AtomicBool>,
    }

    impl FrameSource for Playback {
        fn next_frame(&mut self) -> Result<Frame, CameraError> {
            let image = self.frames.pop_front().ok_or(CameraError::EndOfStream)?;
            if self.frames.is_empty() {
                self.stop.store(true, Ordering::Relaxed);
            }
            Ok(Frame::new(image, 0))
        }

        fn describe(&self) -> String {
            "playback".into()
        }
    }

    const RED: [u8; 3] = [255, 0, 0];
    const GREEN: [u8; 3] = [0, 255, 0];
    const BLUE: [u8; 3] = [0, 0, 255];

    fn frame_of(colour: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(64, 48, Rgb(colour))
    }

    fn gallery() -> Gallery {
        Gallery::from_entries(vec![
            GalleryEntry {
                identity: "red".into(),
                embedding: Embedding::new(vec![1.0, 0.0, 0.0]),
            },
            GalleryEntry {
                identity: "green".into(),
                embedding: Embedding::new(vec![0.0, 1.0, 0.0]),
            },
        ])
    }

    fn t(secs: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
            + chrono::Duration::seconds(secs)
    }

    #[test]
    fn test_unregistered_faces_never_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("a.csv"), DedupPolicy::Daily, true).unwrap();
        let gallery = gallery();
        let mut engine = ColourEngine;
        let mut session = Session {
            engine: &mut engine,
            gallery: &gallery,
            matcher: DistanceMatcher::new(0.5),
            ledger: &ledger,
            detect_scale: 1.0,
            preview_path: None,
        };
        let mut state = SessionState::default();

        for i in 0..5 {
            let mut frame = Frame::new(frame_of(BLUE), i);
            let sightings = session.process_frame(&mut state, &mut frame, t(i as i64)).unwrap();
            assert!(sightings.is_empty());
        }
        assert_eq!(state.faces_seen, 5);
        assert_eq!(state.matches, 0);
        assert!(Ledger::load(ledger.path()).unwrap().is_empty());
    }

    #[test]
    fn test_run_daily_marks_each_person_once() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("a.csv"), DedupPolicy::Daily, true).unwrap();
        let gallery = gallery();
        let mut engine = ColourEngine;
        let mut session = Session {
            engine: &mut engine,
            gallery: &gallery,
            matcher: DistanceMatcher::new(0.5),
            ledger: &ledger,
            detect_scale: 0.25,
            preview_path: None,
        };

        let stop = Arc::new(AtomicBool::new(false));
        let mut source = Playback {
            frames: [RED, RED, [0, 0, 0], GREEN, RED, GREEN]
                .into_iter()
                .map(frame_of)
                .collect(),
            stop: stop.clone(),
        };
        let mut state = SessionState::default();
        let mut tick = 0;
        session
            .run(&mut source, &mut state, &stop, || {
                tick += 1;
                t(tick)
            })
            .unwrap();

        assert_eq!(state.frames, 6);
        assert_eq!(state.matches, 5);
        assert_eq!(state.recorded, 2);
        let names: Vec<String> = Ledger::load(ledger.path())
            .unwrap()
            .into_iter()
            .map(|r| r.identity)
            .collect();
        assert_eq!(names, vec!["RED", "GREEN"]);
    }

    #[test]
    fn test_cooldown_session() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(
            dir.path().join("a.csv"),
            DedupPolicy::Cooldown(Duration::from_secs(10)),
            true,
        )
        .unwrap();
        let gallery = gallery();
        let mut engine = ColourEngine;
        let mut session = Session {
            engine: &mut engine,
            gallery: &gallery,
            matcher: DistanceMatcher::new(0.5),
            ledger: &ledger,
            detect_scale: 1.0,
            preview_path: None,
        };
        let mut state = SessionState::default();

        for secs in [0, 5, 15] {
            let mut frame = Frame::new(frame_of(RED), 0);
            session.process_frame(&mut state, &mut frame, t(secs)).unwrap();
        }
        assert_eq!(state.recorded, 2);
        assert_eq!(Ledger::load(ledger.path()).unwrap().len(), 2);
    }

    #[test]
    fn test_match_is_drawn_and_previewed() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("a.csv"), DedupPolicy::Daily, true).unwrap();
        let preview = dir.path().join("preview.png");
        let gallery = gallery();
        let mut engine = ColourEngine;
        let mut session = Session {
            engine: &mut engine,
            gallery: &gallery,
            matcher: DistanceMatcher::new(0.5),
            ledger: &ledger,
            detect_scale: 0.5,
            preview_path: Some(preview.clone()),
        };

        let mut frame = Frame::new(frame_of(RED), 0);
        let sightings = session
            .process_frame(&mut SessionState::default(), &mut frame, t(0))
            .unwrap();
        assert_eq!(sightings.len(), 1);
        assert_eq!(sightings[0].identity, "red");
        // The label bar covers the bottom of the (full-frame) box.
        assert_eq!(frame.image.get_pixel(32, 46).0, overlay::MATCH_COLOUR.0);
        assert!(preview.is_file());
    }

    #[test]
    fn test_ledger_failure_drops_mark_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("a.csv"), DedupPolicy::Daily, true).unwrap();
        std::fs::remove_file(ledger.path()).unwrap();
        std::fs::create_dir(ledger.path()).unwrap();
        let gallery = gallery();
        let mut engine = ColourEngine;
        let mut session = Session {
            engine: &mut engine,
            gallery: &gallery,
            matcher: DistanceMatcher::new(0.5),
            ledger: &ledger,
            detect_scale: 1.0,
            preview_path: None,
        };
        let mut state = SessionState::default();

        let mut frame = Frame::new(frame_of(RED), 0);
        let sightings = session.process_frame(&mut state, &mut frame, t(0)).unwrap();

        assert_eq!(sightings.len(), 1);
        assert_eq!(sightings[0].outcome, None);
        assert_eq!(state.mark_failures, 1);
        assert_eq!(state.recorded, 0);
        assert!(state.marks.last_marked("RED").is_none());
    }

    #[test]
    fn test_read_failure_ends_session() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("a.csv"), DedupPolicy::Daily, true).unwrap();
        let gallery = gallery();
        let mut engine = ColourEngine;
        let mut session = Session {
            engine: &mut engine,
            gallery: &gallery,
            matcher: DistanceMatcher::new(0.5),
            ledger: &ledger,
            detect_scale: 1.0,
            preview_path: None,
        };
        let stop = AtomicBool::new(false);
        let mut source = Playback {
            frames: VecDeque::new(),
            stop: Arc::new(AtomicBool::new(false)),
        };
        let err = session
            .run(&mut source, &mut SessionState::default(), &stop, || t(0))
            .unwrap_err();
        assert!(matches!(err, SessionError::Camera(CameraError::EndOfStream)));
    }
}
