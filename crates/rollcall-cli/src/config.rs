use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Application configuration: optional TOML file, then `ROLLCALL_*` overrides.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root for the database, ledgers and registration images.
    pub data_dir: PathBuf,
    /// JSON student database (default: `<data_dir>/student_data/students.json`).
    pub db_path: PathBuf,
    /// Weekly XLSX workbooks.
    pub attendance_dir: PathBuf,
    /// One sub-folder of photos per student ID for batch registration.
    pub registration_dir: PathBuf,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Detection runs on frames resized by this factor.
    pub frame_scale: f32,
    /// Only every n-th frame is analysed.
    pub process_every_n: usize,
    /// Faces narrower or shorter than this (full-resolution pixels) are ignored.
    pub min_face_size: u32,
    /// Correlation a match must exceed.
    pub recognition_threshold: f32,
    /// Seconds between two marking attempts for the same student.
    pub recognition_cooldown_secs: u64,
    pub show_match_quality: bool,
    pub registration_photos: usize,
    pub min_registration_photos: usize,
    /// Valid faces a registration folder needs.
    pub batch_min_faces: usize,
    pub audio_enabled: bool,
    /// Words per minute passed to the speech program.
    pub speech_rate: u32,
    pub speech_command: String,
    /// Directory containing `det_10g.onnx`.
    pub model_dir: PathBuf,
}

/// Shape of `rollcall.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub data_dir: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub camera_device: Option<String>,
    pub frame_width: Option<u32>,
    pub frame_height: Option<u32>,
    pub frame_scale: Option<f32>,
    pub process_every_n: Option<usize>,
    pub min_face_size: Option<u32>,
    pub recognition_threshold: Option<f32>,
    pub recognition_cooldown_secs: Option<u64>,
    pub show_match_quality: Option<bool>,
    pub registration_photos: Option<usize>,
    pub min_registration_photos: Option<usize>,
    pub batch_min_faces: Option<usize>,
    pub audio_enabled: Option<bool>,
    pub speech_rate: Option<u32>,
    pub speech_command: Option<String>,
    pub model_dir: Option<PathBuf>,
}

impl FileConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}

impl Config {
    /// Load from `$ROLLCALL_CONFIG` (or `<data_dir>/rollcall.toml` if present)
    /// and the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::load_with(|key: &str| std::env::var(key).ok())
    }

    /// [`Config::from_env`] with `lookup` standing in for the environment.
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let path = config_file_path(&lookup);
        let file = if path.exists() {
            tracing::debug!(path = %path.display(), "loading config file");
            FileConfig::load(&path)?
        } else if lookup("ROLLCALL_CONFIG").is_some() {
            anyhow::bail!("config file {} does not exist", path.display());
        } else {
            FileConfig::default()
        };
        Ok(Self::resolve(file, lookup))
    }

    /// Combine file values with environment overrides; `lookup` reads a variable.
    pub fn resolve(file: FileConfig, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = lookup("ROLLCALL_DATA_DIR")
            .map(PathBuf::from)
            .or(file.data_dir)
            .unwrap_or_else(|| default_data_dir(&lookup));

        let db_path = lookup("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .or(file.db_path)
            .unwrap_or_else(|| data_dir.join("student_data").join("students.json"));

        let model_dir = lookup("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .or(file.model_dir)
            .unwrap_or_else(|| PathBuf::from("/usr/share/rollcall/models"));

        Self {
            attendance_dir: data_dir.join("attendance_files"),
            registration_dir: data_dir.join("registration_images"),
            camera_device: lookup("ROLLCALL_CAMERA_DEVICE")
                .or(file.camera_device)
                .unwrap_or_else(|| "/dev/video0".to_string()),
            frame_width: env_or(&lookup, "ROLLCALL_FRAME_WIDTH", file.frame_width, 640),
            frame_height: env_or(&lookup, "ROLLCALL_FRAME_HEIGHT", file.frame_height, 480),
            frame_scale: env_or(&lookup, "ROLLCALL_FRAME_SCALE", file.frame_scale, 0.25),
            process_every_n: env_or(&lookup, "ROLLCALL_PROCESS_EVERY_N", file.process_every_n, 4).max(1),
            min_face_size: env_or(&lookup, "ROLLCALL_MIN_FACE_SIZE", file.min_face_size, 50),
            recognition_threshold: env_or(
                &lookup,
                "ROLLCALL_RECOGNITION_THRESHOLD",
                file.recognition_threshold,
                0.6,
            ),
            recognition_cooldown_secs: env_or(
                &lookup,
                "ROLLCALL_RECOGNITION_COOLDOWN_SECS",
                file.recognition_cooldown_secs,
                3,
            ),
            show_match_quality: env_flag(&lookup, "ROLLCALL_SHOW_MATCH_QUALITY", file.show_match_quality, true),
            registration_photos: env_or(&lookup, "ROLLCALL_REGISTRATION_PHOTOS", file.registration_photos, 10),
            min_registration_photos: env_or(
                &lookup,
                "ROLLCALL_MIN_REGISTRATION_PHOTOS",
                file.min_registration_photos,
                8,
            ),
            batch_min_faces: env_or(&lookup, "ROLLCALL_BATCH_MIN_FACES", file.batch_min_faces, 3),
            audio_enabled: env_flag(&lookup, "ROLLCALL_AUDIO_ENABLED", file.audio_enabled, true),
            speech_rate: env_or(&lookup, "ROLLCALL_SPEECH_RATE", file.speech_rate, 150),
            speech_command: lookup("ROLLCALL_SPEECH_COMMAND")
                .or(file.speech_command)
                .unwrap_or_else(|| "espeak-ng".to_string()),
            model_dir,
            data_dir,
            db_path,
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }

    /// Frame scale clamped to (0, 1]; a zero or negative value means full size.
    pub fn effective_frame_scale(&self) -> f32 {
        if self.frame_scale > 0.0 && self.frame_scale <= 1.0 {
            self.frame_scale
        } else {
            1.0
        }
    }
}

/// `$ROLLCALL_CONFIG`, otherwise `rollcall.toml` inside the data dir
/// (`$ROLLCALL_DATA_DIR` or the XDG default).
fn config_file_path(lookup: &impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(path) = lookup("ROLLCALL_CONFIG") {
        return PathBuf::from(path);
    }
    lookup("ROLLCALL_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| default_data_dir(lookup))
        .join("rollcall.toml")
}

fn default_data_dir(lookup: &impl Fn(&str) -> Option<String>) -> PathBuf {
    lookup("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn env_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, file: Option<T>, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .or(file)
        .unwrap_or(default)
}

fn env_flag(lookup: &impl Fn(&str) -> Option<String>, key: &str, file: Option<bool>, default: bool) -> bool {
    lookup(key)
        .map(|v| {
            let v = v.trim().to_ascii_lowercase();
            !matches!(v.as_str(), "0" | "false" | "off" | "no")
        })
        .or(file)
        .unwrap_or(default)
}
