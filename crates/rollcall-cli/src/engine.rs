//! Live camera attendance.

use crate::announcer::{Announcer, Timings};
use crate::config::Config;
use crate::speaker::speaker_from_config;
use anyhow::Context;
use chrono::{Local, NaiveDateTime};
use rollcall_core::{
    encode_face, largest_face, CorrelationMatcher, DetectorError, FaceBox, FaceLocator, GalleryEntry,
    MatchQuality, Matcher, ScrfdDetector,
};
use rollcall_hw::frame::is_dark_frame;
use rollcall_hw::{Camera, Frame, FrameSource};
use rollcall_store::{AttendanceLedger, MarkOutcome, StudentDatabase};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const PRUNE_INTERVAL: Duration = Duration::from_secs(60);
/// Fraction of near-black pixels above which a frame is skipped.
const DARK_FRAME_THRESHOLD: f32 = 0.95;

/// Tunables for one camera session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub every_n: u64,
    pub frame_scale: f32,
    pub min_face_size: u32,
    pub threshold: f32,
    pub cooldown: Duration,
    pub show_match_quality: bool,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            every_n: config.process_every_n.max(1) as u64,
            frame_scale: config.effective_frame_scale(),
            min_face_size: config.min_face_size,
            threshold: config.recognition_threshold,
            cooldown: Duration::from_secs(config.recognition_cooldown_secs),
            show_match_quality: config.show_match_quality,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    TooSmall,
    /// The face could not be encoded.
    Unreadable,
    Unknown,
    /// Recognized, but marked too recently in this session.
    Cooldown,
    Marked,
    AlreadyMarked,
    LedgerFailed,
}

/// What happened to one detected face.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceOutcome {
    pub face: FaceBox,
    pub kind: OutcomeKind,
    pub student_id: Option<String>,
    pub label: String,
}

impl FaceOutcome {
    fn anonymous(face: FaceBox, kind: OutcomeKind, label: &str) -> Self {
        Self {
            face,
            kind,
            student_id: None,
            label: label.to_string(),
        }
    }

    fn student(face: FaceBox, kind: OutcomeKind, id: String, label: String) -> Self {
        Self {
            face,
            kind,
            student_id: Some(id),
            label,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub frames: u64,
    pub processed: u64,
    pub dark_skipped: u64,
    pub marked: u64,
}

/// Per-session recognition state: gallery, cooldowns and who was marked.
pub struct AttendanceSession<'a, L: FaceLocator> {
    db: &'a StudentDatabase,
    ledger: &'a AttendanceLedger,
    announcer: &'a mut Announcer,
    locator: L,
    matcher: CorrelationMatcher,
    gallery: Vec<GalleryEntry>,
    settings: SessionSettings,
    last_marked: HashMap<String, Instant>,
    recognized_today: HashSet<String>,
    summary: SessionSummary,
}

impl<'a, L: FaceLocator> AttendanceSession<'a, L> {
    pub fn new(
        db: &'a StudentDatabase,
        ledger: &'a AttendanceLedger,
        announcer: &'a mut Announcer,
        locator: L,
        gallery: Vec<GalleryEntry>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            db,
            ledger,
            announcer,
            locator,
            matcher: CorrelationMatcher,
            gallery,
            settings,
            last_marked: HashMap::new(),
            recognized_today: HashSet::new(),
            summary: SessionSummary::default(),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        self.summary
    }

    /// Analyse one frame. Only every n-th call does any work; the others
    /// return an empty list.
    ///
    /// `now` drives cooldowns and the announcer, `at` is the wall-clock time
    /// written to the ledger.
    pub fn process_frame(
        &mut self,
        frame: &Frame,
        now: Instant,
        at: NaiveDateTime,
    ) -> Result<Vec<FaceOutcome>, DetectorError> {
        self.summary.frames += 1;
        if self.summary.frames % self.settings.every_n != 0 {
            return Ok(Vec::new());
        }
        if is_dark_frame(&frame.image, DARK_FRAME_THRESHOLD) {
            self.summary.dark_skipped += 1;
            return Ok(Vec::new());
        }
        self.summary.processed += 1;

        let scale = self.settings.frame_scale;
        let faces = if scale < 1.0 {
            self.locator.locate(&frame.downscaled(scale))?
        } else {
            self.locator.locate(&frame.image)?
        };
        let Some(face) = largest_face(&faces) else {
            return Ok(Vec::new());
        };
        let face = face.scaled(1.0 / scale);

        Ok(vec![self.process_face(frame, face, now, at)])
    }

    fn process_face(&mut self, frame: &Frame, face: FaceBox, now: Instant, at: NaiveDateTime) -> FaceOutcome {
        let min = self.settings.min_face_size as i32;
        if face.width() < min || face.height() < min {
            return FaceOutcome::anonymous(face, OutcomeKind::TooSmall, "Too small");
        }

        let encoding = match encode_face(&frame.image, &face) {
            Ok(encoding) => encoding,
            Err(e) => {
                tracing::debug!(error = %e, "could not encode face");
                return FaceOutcome::anonymous(face, OutcomeKind::Unreadable, "Processing...");
            }
        };

        let result = self.matcher.compare(&encoding, &self.gallery, self.settings.threshold);
        let (true, Some(id), Some(name)) = (result.matched, result.student_id, result.student_name) else {
            tracing::debug!(score = result.score, "unknown face");
            return FaceOutcome::anonymous(face, OutcomeKind::Unknown, "Unknown");
        };

        self.announcer
            .observe(&id, &name, self.recognized_today.contains(&id), now);

        let mut label = if self.settings.show_match_quality {
            format!("{name} ({})", MatchQuality::from_distance(result.distance))
        } else {
            name.clone()
        };

        let cooling = self
            .last_marked
            .get(&id)
            .is_some_and(|last| now.saturating_duration_since(*last) < self.settings.cooldown);
        if cooling {
            label.push_str(" (wait)");
            return FaceOutcome::student(face, OutcomeKind::Cooldown, id, label);
        }

        match self.ledger.mark(&id, &name, at) {
            Ok(MarkOutcome::Marked) => {
                self.last_marked.insert(id.clone(), now);
                self.recognized_today.insert(id.clone());
                self.summary.marked += 1;
                label.push_str(" ✓");
                println!("✓ {name} - Attendance marked!");
                if let Err(e) = self.db.update_recognition_stats(&id, at) {
                    tracing::warn!(student_id = %id, error = %e, "failed to update recognition stats");
                }
                FaceOutcome::student(face, OutcomeKind::Marked, id, label)
            }
            Ok(MarkOutcome::AlreadyMarked) => {
                label.push_str(" (Done)");
                FaceOutcome::student(face, OutcomeKind::AlreadyMarked, id, label)
            }
            Err(e) => {
                tracing::error!(student_id = %id, error = %e, "failed to write attendance");
                FaceOutcome::student(face, OutcomeKind::LedgerFailed, id, label)
            }
        }
    }

    pub fn prune_announcer(&mut self, now: Instant) {
        self.announcer.prune_inactive(now);
    }
}

/// One-line session statistics for the end-of-session report.
pub fn format_summary(summary: &SessionSummary) -> String {
    format!(
        "  Frames: {}  Processed: {}  Dark skipped: {}  Marked: {}",
        summary.frames, summary.processed, summary.dark_skipped, summary.marked
    )
}

/// Run the camera loop until `stop` is set, `max_frames` frames were read,
/// or capture fails.
pub fn run_camera_attendance(
    config: &Config,
    stop: Arc<AtomicBool>,
    max_frames: Option<u64>,
) -> anyhow::Result<SessionSummary> {
    println!("Loading student database...");
    let db = StudentDatabase::open(&config.db_path, Local::now().naive_local())?;
    let gallery = db.gallery()?;
    if gallery.is_empty() {
        println!("No students registered. Register students first.");
        return Ok(SessionSummary::default());
    }
    println!("✓ Loaded {} students", gallery.len());

    let mut camera = Camera::open(&config.camera_device, config.frame_width, config.frame_height)
        .with_context(|| format!("cannot access camera {}", config.camera_device))?;
    println!("✓ Camera initialized");

    let model_path = config.detector_model_path();
    let detector = ScrfdDetector::load(&model_path, 0)
        .with_context(|| format!("loading face detector {}", model_path.display()))?;
    tracing::info!(path = %model_path.display(), "SCRFD detector loaded");

    let ledger = AttendanceLedger::new(&config.attendance_dir);
    let mut announcer = Announcer::spawn(speaker_from_config(config), Timings::default())
        .context("starting audio thread")?;
    announcer.start_session();

    println!("Camera ready! Position students in frame (Ctrl+C to stop)");

    let mut session = AttendanceSession::new(
        &db,
        &ledger,
        &mut announcer,
        detector,
        gallery,
        SessionSettings::from_config(config),
    );
    let mut last_prune = Instant::now();

    while !stop.load(Ordering::SeqCst) {
        if max_frames.is_some_and(|max| session.summary().frames >= max) {
            break;
        }
        let frame = match camera.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                println!("Failed to capture frame");
                tracing::error!(error = %e, "capture failed; ending session");
                break;
            }
        };

        let now = Instant::now();
        match session.process_frame(&frame, now, Local::now().naive_local()) {
            Ok(outcomes) => {
                for outcome in outcomes {
                    tracing::debug!(
                        kind = ?outcome.kind,
                        student_id = ?outcome.student_id,
                        label = %outcome.label,
                        face = ?outcome.face,
                        "face"
                    );
                }
            }
            Err(e) => tracing::warn!(error = %e, "face detection failed"),
        }

        if now.saturating_duration_since(last_prune) >= PRUNE_INTERVAL {
            session.prune_announcer(now);
            last_prune = now;
        }
    }

    let summary = session.summary();
    drop(session);
    tracing::debug!(snapshot = ?announcer.snapshot(), "announcer state at shutdown");
    announcer.end_session();

    println!("\nCamera attendance session ended.");
    println!("{}", format_summary(&summary));
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speaker::testing::RecordingSpeaker;
    use chrono::NaiveDate;
    use image::{Rgb, RgbImage};
    use rollcall_core::Encoding;
    use rollcall_store::StudentId;

    /// Returns the same boxes for every image.
    struct FixedLocator(Vec<FaceBox>);

    impl FaceLocator for FixedLocator {
        fn locate(&mut self, _image: &RgbImage) -> Result<Vec<FaceBox>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    fn gradient_frame() -> Frame {
        let img = RgbImage::from_fn(640, 480, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
        Frame::new(img, 0)
    }

    /// Box in quarter-scale coordinates and its full-resolution counterpart.
    fn small_box() -> FaceBox {
        FaceBox::new(20, 100, 100, 20)
    }

    fn full_box() -> FaceBox {
        FaceBox::new(80, 400, 400, 80)
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 12, 22).unwrap().and_hms_opt(h, m, s).unwrap()
    }

    fn settings(every_n: u64) -> SessionSettings {
        SessionSettings {
            every_n,
            frame_scale: 0.25,
            min_face_size: 50,
            threshold: 0.6,
            cooldown: Duration::from_secs(3),
            show_match_quality: true,
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        db: StudentDatabase,
        ledger: AttendanceLedger,
        speaker: RecordingSpeaker,
        announcer: Announcer,
    }

    fn fixture(encoding: Encoding) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = StudentDatabase::open(dir.path().join("students.json"), at(8, 0, 0)).unwrap();
        let id = StudentId::parse("24054-EC-001").unwrap();
        db.add_student(&id, "ada lovelace", &encoding, &[encoding.clone()], false, at(8, 0, 0))
            .unwrap();
        let ledger = AttendanceLedger::new(dir.path().join("attendance_files"));
        let speaker = RecordingSpeaker::default();
        let timings = Timings {
            global_cooldown: Duration::ZERO,
            ..Timings::default()
        };
        let mut announcer = Announcer::spawn(Box::new(speaker.clone()), timings).unwrap();
        announcer.start_session();
        Fixture {
            _dir: dir,
            db,
            ledger,
            speaker,
            announcer,
        }
    }

    fn enrolled_fixture() -> Fixture {
        fixture(encode_face(&gradient_frame().image, &full_box()).unwrap())
    }

    #[test]
    fn test_mark_cooldown_then_done() {
        let mut fx = enrolled_fixture();
        let gallery = fx.db.gallery().unwrap();
        let frame = gradient_frame();
        let t0 = Instant::now();
        {
            let mut session = AttendanceSession::new(
                &fx.db,
                &fx.ledger,
                &mut fx.announcer,
                FixedLocator(vec![small_box()]),
                gallery,
                settings(1),
            );

            let first = session.process_frame(&frame, t0, at(9, 0, 0)).unwrap();
            assert_eq!(first.len(), 1);
            assert_eq!(first[0].kind, OutcomeKind::Marked);
            assert_eq!(first[0].face, full_box());
            assert_eq!(first[0].student_id.as_deref(), Some("24054-EC-001"));
            assert_eq!(first[0].label, "Ada Lovelace (Excellent) ✓");

            let second = session
                .process_frame(&frame, t0 + Duration::from_secs(1), at(9, 0, 1))
                .unwrap();
            assert_eq!(second[0].kind, OutcomeKind::Cooldown);
            assert_eq!(second[0].label, "Ada Lovelace (Excellent) (wait)");

            let third = session
                .process_frame(&frame, t0 + Duration::from_secs(4), at(9, 0, 4))
                .unwrap();
            assert_eq!(third[0].kind, OutcomeKind::AlreadyMarked);
            assert!(third[0].label.ends_with(" (Done)"));

            assert_eq!(
                session.summary(),
                SessionSummary {
                    frames: 3,
                    processed: 3,
                    dark_skipped: 0,
                    marked: 1
                }
            );
        }

        let day = at(0, 0, 0).date();
        assert_eq!(fx.ledger.today_count(day).unwrap(), 1);
        let record = fx.db.get_student("24054-EC-001").unwrap().unwrap();
        assert_eq!(record.recognition_count, 1);

        let Fixture { speaker, announcer, .. } = fx;
        drop(announcer);
        assert_eq!(speaker.lines().first().map(String::as_str), Some("Marking attendance"));
    }

    #[test]
    fn test_only_every_nth_frame_is_processed() {
        let mut fx = enrolled_fixture();
        let gallery = fx.db.gallery().unwrap();
        let frame = gradient_frame();
        let mut session = AttendanceSession::new(
            &fx.db,
            &fx.ledger,
            &mut fx.announcer,
            FixedLocator(vec![small_box()]),
            gallery,
            settings(4),
        );
        let t0 = Instant::now();
        for _ in 0..3 {
            assert!(session.process_frame(&frame, t0, at(9, 0, 0)).unwrap().is_empty());
        }
        let outcomes = session.process_frame(&frame, t0, at(9, 0, 0)).unwrap();
        assert_eq!(outcomes[0].kind, OutcomeKind::Marked);
        assert_eq!(session.summary().processed, 1);
    }

    #[test]
    fn test_small_unreadable_and_unknown_faces() {
        let mut fx = fixture(Encoding(vec![0.0; 960]));
        let gallery = fx.db.gallery().unwrap();
        let frame = gradient_frame();
        let t0 = Instant::now();

        let mut small = AttendanceSession::new(
            &fx.db,
            &fx.ledger,
            &mut fx.announcer,
            FixedLocator(vec![FaceBox::new(10, 20, 20, 10)]),
            gallery.clone(),
            settings(1),
        );
        let out = small.process_frame(&frame, t0, at(9, 0, 0)).unwrap();
        assert_eq!(out[0].kind, OutcomeKind::TooSmall);
        assert_eq!(out[0].label, "Too small");
        drop(small);

        let mut offscreen = AttendanceSession::new(
            &fx.db,
            &fx.ledger,
            &mut fx.announcer,
            FixedLocator(vec![FaceBox::new(200, 300, 250, 260)]),
            gallery.clone(),
            settings(1),
        );
        let out = offscreen.process_frame(&frame, t0, at(9, 0, 0)).unwrap();
        assert_eq!(out[0].kind, OutcomeKind::Unreadable);
        drop(offscreen);

        let mut unknown = AttendanceSession::new(
            &fx.db,
            &fx.ledger,
            &mut fx.announcer,
            FixedLocator(vec![small_box()]),
            gallery,
            settings(1),
        );
        let out = unknown.process_frame(&frame, t0, at(9, 0, 0)).unwrap();
        assert_eq!(out[0].kind, OutcomeKind::Unknown);
        assert_eq!(out[0].student_id, None);
        drop(unknown);

        assert_eq!(fx.ledger.today_count(at(0, 0, 0).date()).unwrap(), 0);
    }

    #[test]
    fn test_no_face_gives_no_outcome() {
        let mut fx = enrolled_fixture();
        let gallery = fx.db.gallery().unwrap();
        let mut session = AttendanceSession::new(
            &fx.db,
            &fx.ledger,
            &mut fx.announcer,
            FixedLocator(Vec::new()),
            gallery,
            settings(1),
        );
        let out = session
            .process_frame(&gradient_frame(), Instant::now(), at(9, 0, 0))
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_dark_frame_is_skipped() {
        let mut fx = enrolled_fixture();
        let gallery = fx.db.gallery().unwrap();
        let mut session = AttendanceSession::new(
            &fx.db,
            &fx.ledger,
            &mut fx.announcer,
            FixedLocator(vec![small_box()]),
            gallery,
            settings(1),
        );
        let dark = Frame::new(RgbImage::from_pixel(640, 480, Rgb([5, 5, 5])), 0);
        let out = session.process_frame(&dark, Instant::now(), at(9, 0, 0)).unwrap();
        assert!(out.is_empty());
        assert_eq!(session.summary().dark_skipped, 1);
        assert_eq!(session.summary().processed, 0);
    }

    #[test]
    fn test_summary_line_includes_dark_frames() {
        let line = format_summary(&SessionSummary {
            frames: 40,
            processed: 8,
            dark_skipped: 2,
            marked: 1,
        });
        assert_eq!(line, "  Frames: 40  Processed: 8  Dark skipped: 2  Marked: 1");
    }

    #[test]
    fn test_largest_face_wins() {
        let mut fx = enrolled_fixture();
        let gallery = fx.db.gallery().unwrap();
        let mut session = AttendanceSession::new(
            &fx.db,
            &fx.ledger,
            &mut fx.announcer,
            FixedLocator(vec![FaceBox::new(0, 10, 10, 0), small_box()]),
            gallery,
            settings(1),
        );
        let out = session
            .process_frame(&gradient_frame(), Instant::now(), at(9, 0, 0))
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].face, full_box());
    }
}
