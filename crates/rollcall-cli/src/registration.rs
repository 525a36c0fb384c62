//! Student registration from photo folders or the live camera.

use crate::config::Config;
use crate::prompt;
use anyhow::Context;
use chrono::Local;
use rollcall_core::{encode_face, largest_face, Encoding, FaceBox, FaceLocator, ScrfdDetector};
use rollcall_hw::{Camera, FrameSource};
use rollcall_store::{title_case, AddOutcome, StudentDatabase, StudentId};
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];
/// Allowed offset of the face centre from the frame centre.
const MAX_CENTER_DX: i32 = 60;
const MAX_CENTER_DY: i32 = 80;
/// Both face sides must be larger than this.
const MIN_REGISTRATION_FACE: i32 = 160;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pose {
    Straight,
    Left,
    Right,
    Up,
    Down,
}

impl Pose {
    pub fn instruction(&self) -> &'static str {
        match self {
            Pose::Straight => "Position your face in the center of the frame",
            Pose::Left => "Good! Now turn slightly LEFT",
            Pose::Right => "Great! Now turn slightly RIGHT",
            Pose::Up => "Almost done! Tilt head UP slightly",
            Pose::Down => "Last one! Tilt head DOWN slightly",
        }
    }
}

/// Photos per turned pose; the rest are taken facing straight ahead.
const TURNED_POSES: [(Pose, usize); 4] = [(Pose::Left, 2), (Pose::Right, 2), (Pose::Up, 1), (Pose::Down, 1)];

/// Which pose to ask for next, and how many photos are in.
#[derive(Debug, Clone)]
pub struct PosePlan {
    poses: Vec<(Pose, usize)>,
    index: usize,
    taken_this_pose: usize,
    captured: usize,
}

impl PosePlan {
    /// Straight ×4, Left ×2, Right ×2, Up ×1, Down ×1.
    pub fn standard() -> Self {
        Self::for_photos(10)
    }

    /// `total` photos: the turned poses keep their counts and Straight takes
    /// the remainder (at least one).
    pub fn for_photos(total: usize) -> Self {
        let turned: usize = TURNED_POSES.iter().map(|(_, n)| n).sum();
        let mut poses = vec![(Pose::Straight, total.saturating_sub(turned).max(1))];
        poses.extend(TURNED_POSES);
        Self::new(poses)
    }

    pub fn new(poses: Vec<(Pose, usize)>) -> Self {
        Self {
            poses: poses.into_iter().filter(|(_, n)| *n > 0).collect(),
            index: 0,
            taken_this_pose: 0,
            captured: 0,
        }
    }

    /// Pose currently being captured, `None` once complete.
    pub fn current(&self) -> Option<Pose> {
        self.poses.get(self.index).map(|(pose, _)| *pose)
    }

    /// Count one photo. Returns `true` if that finished the current pose.
    pub fn record(&mut self) -> bool {
        let Some(&(_, needed)) = self.poses.get(self.index) else {
            return false;
        };
        self.captured += 1;
        self.taken_this_pose += 1;
        if self.taken_this_pose >= needed {
            self.index += 1;
            self.taken_this_pose = 0;
            true
        } else {
            false
        }
    }

    pub fn captured(&self) -> usize {
        self.captured
    }

    pub fn total(&self) -> usize {
        self.poses.iter().map(|(_, n)| n).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.index >= self.poses.len()
    }
}

/// Face close to the frame centre and large enough for a registration photo.
pub fn is_well_positioned(face: &FaceBox, frame_width: u32, frame_height: u32) -> bool {
    let (cx, cy) = face.center();
    let (fx, fy) = (frame_width as i32 / 2, frame_height as i32 / 2);
    (cx - fx).abs() < MAX_CENTER_DX
        && (cy - fy).abs() < MAX_CENTER_DY
        && face.width() > MIN_REGISTRATION_FACE
        && face.height() > MIN_REGISTRATION_FACE
}

/// Image files directly inside `folder`, sorted by name.
pub fn image_files(folder: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(folder)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Encode the largest face of every readable image in `folder`.
pub fn encode_folder<L: FaceLocator>(locator: &mut L, folder: &Path) -> anyhow::Result<Vec<Encoding>> {
    let mut encodings = Vec::new();
    for path in image_files(folder).with_context(|| format!("listing {}", folder.display()))? {
        let image = match image::open(&path) {
            Ok(img) => img.to_rgb8(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable image skipped");
                continue;
            }
        };
        let faces = match locator.locate(&image) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "face detection failed");
                continue;
            }
        };
        let Some(face) = largest_face(&faces) else {
            tracing::debug!(path = %path.display(), "no face found");
            continue;
        };
        match encode_face(&image, &face) {
            Ok(encoding) => encodings.push(encoding),
            Err(e) => tracing::debug!(path = %path.display(), error = %e, "face not encodable"),
        }
    }
    Ok(encodings)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub registered: usize,
    pub skipped: usize,
}

/// Register every student folder under `registration_dir` (or only `target`).
///
/// `name_for` supplies a name for IDs not yet in the database.
pub fn register_batch<L: FaceLocator>(
    db: &StudentDatabase,
    locator: &mut L,
    registration_dir: &Path,
    target: Option<&str>,
    min_faces: usize,
    mut name_for: impl FnMut(&StudentId) -> anyhow::Result<String>,
) -> anyhow::Result<BatchSummary> {
    let mut summary = BatchSummary::default();

    let folders: Vec<String> = match target {
        Some(id) => vec![id.trim().to_string()],
        None => {
            let mut names: Vec<String> = std::fs::read_dir(registration_dir)
                .with_context(|| format!("listing {}", registration_dir.display()))?
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.path().is_dir())
                .filter_map(|entry| entry.file_name().into_string().ok())
                .collect();
            names.sort();
            names
        }
    };

    for folder in folders {
        let Ok(id) = StudentId::parse(&folder) else {
            println!("✗ Invalid ID folder: {folder}");
            summary.skipped += 1;
            continue;
        };

        let path = registration_dir.join(&folder);
        if !path.is_dir() || image_files(&path).map(|f| f.is_empty()).unwrap_or(true) {
            println!("⚠ No images in {folder}");
            summary.skipped += 1;
            continue;
        }

        let encodings = encode_folder(locator, &path)?;
        if encodings.len() < min_faces {
            println!(
                "✗ {id}: Only {} valid faces found. Need at least {min_faces}.",
                encodings.len()
            );
            summary.skipped += 1;
            continue;
        }
        let Some(primary) = Encoding::mean(&encodings) else {
            summary.skipped += 1;
            continue;
        };

        let name = match db.student_name(id.as_str())? {
            Some(name) => name,
            None => {
                let typed = name_for(&id)?;
                if typed.trim().is_empty() {
                    "Student".to_string()
                } else {
                    title_case(typed.trim())
                }
            }
        };

        db.add_student(&id, &name, &primary, &[], true, Local::now().naive_local())?;
        println!("✓ {name} ({id}) registered successfully");
        summary.registered += 1;
    }

    println!("\nSummary: {} registered, {} skipped", summary.registered, summary.skipped);
    Ok(summary)
}

pub fn run_batch_registration(config: &Config, target: Option<&str>) -> anyhow::Result<()> {
    let dir = &config.registration_dir;
    if !dir.exists() {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        println!(
            "Folder '{}' created. Add one folder of photos per student ID, then run again.",
            dir.display()
        );
        return Ok(());
    }

    let db = StudentDatabase::open(&config.db_path, Local::now().naive_local())?;
    let model_path = config.detector_model_path();
    let mut detector = ScrfdDetector::load(&model_path, 0)
        .with_context(|| format!("loading face detector {}", model_path.display()))?;

    register_batch(&db, &mut detector, dir, target, config.batch_min_faces, |id| {
        prompt::ask(&format!("Enter Name for {id}"))
    })?;
    Ok(())
}

/// Read frames until the plan is complete or `max_frames` were read.
/// Each frame is mirrored; only a well-positioned largest face is encoded.
pub fn capture_live<S: FrameSource, L: FaceLocator>(
    source: &mut S,
    locator: &mut L,
    plan: &mut PosePlan,
    max_frames: usize,
) -> Vec<Encoding> {
    let total = plan.total();
    let mut encodings = Vec::new();
    let mut announced: Option<Pose> = None;

    for _ in 0..max_frames {
        let Some(pose) = plan.current() else {
            break;
        };
        if announced != Some(pose) {
            println!("Pose: {:?}. {}", pose, pose.instruction());
            announced = Some(pose);
        }

        let frame = match source.next_frame() {
            Ok(frame) => frame.mirrored(),
            Err(e) => {
                tracing::error!(error = %e, "capture failed during registration");
                break;
            }
        };
        let faces = match locator.locate(&frame.image) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, "face detection failed");
                continue;
            }
        };
        let Some(face) = largest_face(&faces) else {
            continue;
        };
        if !is_well_positioned(&face, frame.width(), frame.height()) {
            continue;
        }
        if let Ok(encoding) = encode_face(&frame.image, &face) {
            encodings.push(encoding);
            plan.record();
            println!("✓ {}/{total}", plan.captured());
        }
    }
    encodings
}

pub fn run_live_registration(
    config: &Config,
    raw_id: &str,
    raw_name: &str,
    assume_yes: bool,
    max_frames: usize,
) -> anyhow::Result<()> {
    let id = StudentId::parse(raw_id)?;
    let db = StudentDatabase::open(&config.db_path, Local::now().naive_local())?;
    if db.student_exists(id.as_str())? && !prompt::confirm(&format!("{id} is already registered. Overwrite?"), assume_yes)? {
        return Ok(());
    }
    let name = match raw_name.trim() {
        "" => "Student".to_string(),
        name => title_case(name),
    };

    let mut camera = Camera::open(&config.camera_device, config.frame_width, config.frame_height)
        .with_context(|| format!("cannot access camera {}", config.camera_device))?;
    let model_path = config.detector_model_path();
    let mut detector = ScrfdDetector::load(&model_path, 0)
        .with_context(|| format!("loading face detector {}", model_path.display()))?;

    let mut plan = PosePlan::for_photos(config.registration_photos);
    println!("Capturing {} photos for better accuracy...", plan.total());
    let encodings = capture_live(&mut camera, &mut detector, &mut plan, max_frames);

    if encodings.len() < config.min_registration_photos {
        println!("Not enough photos captured.");
        return Ok(());
    }
    if !prompt::confirm("Save this registration?", assume_yes)? {
        return Ok(());
    }
    let Some(primary) = Encoding::mean(&encodings) else {
        println!("✗ Failed to save.");
        return Ok(());
    };

    let outcome = db.add_student(&id, &name, &primary, &[], true, Local::now().naive_local())?;
    tracing::info!(student_id = %id, ?outcome, photos = encodings.len(), "live registration saved");
    match outcome {
        AddOutcome::Added | AddOutcome::Updated => println!("✓ {name} ({id}) registered successfully!"),
        AddOutcome::Exists => println!("✗ Failed to save."),
    }
    Ok(())
}
