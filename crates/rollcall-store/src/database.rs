//! JSON student database.
//!
//! One pretty-printed JSON file holds every enrolled student with their
//! face encodings and recognition statistics. Every save first copies the
//! previous file to `<path>.backup`; a file that fails to parse is copied to
//! `<path>.corrupted_backup` and replaced by an empty database.

use crate::student_id::{StudentId, StudentIdError};
use chrono::{NaiveDate, NaiveDateTime};
use rollcall_core::{Encoding, GalleryEntry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DATABASE_VERSION: &str = "1.0";
/// Length of the placeholder encodings given to CSV-imported students.
const PLACEHOLDER_ENCODING_LEN: usize = 960;
const PLACEHOLDER_SAMPLES: usize = 5;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("database I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("database serialization: {0}")]
    Json(#[from] serde_json::Error),
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    InvalidId(#[from] StudentIdError),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> DatabaseError + '_ {
    move |source| DatabaseError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Format a timestamp the way the database stores it (ISO 8601, microseconds).
pub fn iso_timestamp(at: NaiveDateTime) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    s.parse::<NaiveDateTime>().ok()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordMetadata {
    #[serde(default)]
    pub face_samples: usize,
    #[serde(default)]
    pub last_updated: String,
}

/// One enrolled student.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentRecord {
    pub student_id: String,
    pub student_name: String,
    #[serde(default)]
    pub primary_encoding: Vec<f32>,
    #[serde(default)]
    pub sample_encodings: Vec<Vec<f32>>,
    #[serde(default)]
    pub registration_date: String,
    #[serde(default)]
    pub recognition_count: u64,
    #[serde(default)]
    pub last_recognition_date: Option<String>,
    #[serde(default)]
    pub metadata: RecordMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseMetadata {
    #[serde(default)]
    pub total_students: usize,
    #[serde(default)]
    pub total_recognitions: u64,
}

fn default_version() -> String {
    DATABASE_VERSION.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DatabaseFile {
    #[serde(default = "default_version")]
    version: String,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    last_updated: String,
    #[serde(default)]
    students: BTreeMap<String, StudentRecord>,
    #[serde(default)]
    metadata: DatabaseMetadata,
}

impl DatabaseFile {
    fn empty(at: NaiveDateTime) -> Self {
        let now = iso_timestamp(at);
        Self {
            version: default_version(),
            created_at: now.clone(),
            last_updated: now,
            students: BTreeMap::new(),
            metadata: DatabaseMetadata::default(),
        }
    }
}

/// Outcome of [`StudentDatabase::add_student`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    Updated,
    /// The ID is already enrolled and overwriting was not requested.
    Exists,
}

/// Search hit from [`StudentDatabase::search_by_name`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentSummary {
    pub student_id: String,
    pub student_name: String,
    pub recognition_count: u64,
    pub last_recognition: String,
}

/// Aggregate figures from [`StudentDatabase::stats`].
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseStats {
    pub total_students: usize,
    pub total_recognitions: u64,
    pub recognitions_today: usize,
    pub created_at: String,
    pub last_updated: String,
    pub version: String,
    /// Only present when at least one student is enrolled.
    pub avg_recognitions_per_student: Option<f64>,
}

/// Handle to the JSON student database at a fixed path.
pub struct StudentDatabase {
    path: PathBuf,
}

impl StudentDatabase {
    /// Open the database, creating its folder and an empty file if needed.
    pub fn open(path: impl Into<PathBuf>, now: NaiveDateTime) -> Result<Self, DatabaseError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let db = Self { path };
        if !db.path.exists() {
            db.write(&DatabaseFile::empty(now))?;
            tracing::info!(path = %db.path.display(), "created new student database");
        }
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<DatabaseFile, DatabaseError> {
        let raw = fs::read_to_string(&self.path).map_err(io_err(&self.path))?;
        match serde_json::from_str::<DatabaseFile>(&raw) {
            Ok(data) => Ok(data),
            Err(err) => {
                let backup = with_suffix(&self.path, ".corrupted_backup");
                tracing::warn!(
                    path = %self.path.display(),
                    backup = %backup.display(),
                    error = %err,
                    "student database is corrupted; backing up and starting empty"
                );
                fs::copy(&self.path, &backup).map_err(io_err(&backup))?;
                let empty = DatabaseFile::empty(chrono::Local::now().naive_local());
                self.write(&empty)?;
                Ok(empty)
            }
        }
    }

    fn save(&self, data: &mut DatabaseFile, now: NaiveDateTime) -> Result<(), DatabaseError> {
        if self.path.exists() {
            let backup = with_suffix(&self.path, ".backup");
            fs::copy(&self.path, &backup).map_err(io_err(&backup))?;
        }
        data.last_updated = iso_timestamp(now);
        data.metadata.total_students = data.students.len();
        self.write(data)
    }

    fn write(&self, data: &DatabaseFile) -> Result<(), DatabaseError> {
        let json = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, json).map_err(io_err(&self.path))
    }

    /// Enroll or update a student. The name is stored title-cased.
    ///
    /// Updating keeps the original registration date and recognition stats.
    pub fn add_student(
        &self,
        id: &StudentId,
        name: &str,
        primary: &Encoding,
        samples: &[Encoding],
        overwrite: bool,
        now: NaiveDateTime,
    ) -> Result<AddOutcome, DatabaseError> {
        let mut data = self.load()?;
        let existing = data.students.get(id.as_str()).cloned();
        if existing.is_some() && !overwrite {
            return Ok(AddOutcome::Exists);
        }

        let stamp = iso_timestamp(now);
        let (registration_date, recognition_count, last_recognition_date) = match &existing {
            Some(prev) => (
                prev.registration_date.clone(),
                prev.recognition_count,
                prev.last_recognition_date.clone(),
            ),
            None => (stamp.clone(), 0, None),
        };

        let record = StudentRecord {
            student_id: id.to_string(),
            student_name: title_case(name.trim()),
            primary_encoding: primary.values().to_vec(),
            sample_encodings: samples.iter().map(|e| e.values().to_vec()).collect(),
            registration_date,
            recognition_count,
            last_recognition_date,
            metadata: RecordMetadata {
                face_samples: samples.len(),
                last_updated: stamp,
            },
        };

        tracing::info!(
            student_id = %id,
            name = %record.student_name,
            update = existing.is_some(),
            "saving student"
        );
        data.students.insert(id.to_string(), record);
        self.save(&mut data, now)?;

        Ok(if existing.is_some() {
            AddOutcome::Updated
        } else {
            AddOutcome::Added
        })
    }

    pub fn get_student(&self, id: &str) -> Result<Option<StudentRecord>, DatabaseError> {
        Ok(self.load()?.students.remove(id))
    }

    /// All students, ordered by ID.
    pub fn all_students(&self) -> Result<BTreeMap<String, StudentRecord>, DatabaseError> {
        Ok(self.load()?.students)
    }

    pub fn student_exists(&self, id: &str) -> Result<bool, DatabaseError> {
        Ok(self.load()?.students.contains_key(id))
    }

    pub fn student_name(&self, id: &str) -> Result<Option<String>, DatabaseError> {
        Ok(self.load()?.students.remove(id).map(|s| s.student_name))
    }

    pub fn student_count(&self) -> Result<usize, DatabaseError> {
        Ok(self.load()?.students.len())
    }

    /// Enrolled students with a usable primary encoding, for matching.
    pub fn gallery(&self) -> Result<Vec<GalleryEntry>, DatabaseError> {
        Ok(self
            .load()?
            .students
            .into_values()
            .filter(|s| !s.primary_encoding.is_empty())
            .map(|s| GalleryEntry {
                student_id: s.student_id,
                student_name: s.student_name,
                encoding: Encoding(s.primary_encoding),
            })
            .collect())
    }

    /// Count one more recognition. Returns `false` for an unknown ID.
    pub fn update_recognition_stats(&self, id: &str, now: NaiveDateTime) -> Result<bool, DatabaseError> {
        let mut data = self.load()?;
        let Some(student) = data.students.get_mut(id) else {
            return Ok(false);
        };
        student.recognition_count += 1;
        student.last_recognition_date = Some(iso_timestamp(now));
        data.metadata.total_recognitions += 1;
        self.save(&mut data, now)?;
        Ok(true)
    }

    /// Remove a student. Returns `false` if the ID was not enrolled.
    pub fn delete_student(&self, id: &str, now: NaiveDateTime) -> Result<bool, DatabaseError> {
        let mut data = self.load()?;
        if data.students.remove(id).is_none() {
            return Ok(false);
        }
        self.save(&mut data, now)?;
        tracing::info!(student_id = id, "student deleted");
        Ok(true)
    }

    /// Case-insensitive substring search over names.
    pub fn search_by_name(&self, query: &str) -> Result<Vec<StudentSummary>, DatabaseError> {
        let query = query.to_lowercase();
        Ok(self
            .load()?
            .students
            .into_values()
            .filter(|s| s.student_name.to_lowercase().contains(&query))
            .map(|s| StudentSummary {
                student_id: s.student_id,
                student_name: s.student_name,
                recognition_count: s.recognition_count,
                last_recognition: s.last_recognition_date.unwrap_or_else(|| "Never".to_string()),
            })
            .collect())
    }

    pub fn stats(&self, today: NaiveDate) -> Result<DatabaseStats, DatabaseError> {
        let data = self.load()?;
        let today = today.format("%Y-%m-%d").to_string();
        let total_students = data.students.len();
        let total_recognitions: u64 = data.students.values().map(|s| s.recognition_count).sum();
        let recognitions_today = data
            .students
            .values()
            .filter(|s| {
                s.last_recognition_date
                    .as_deref()
                    .is_some_and(|d| d.starts_with(&today))
            })
            .count();
        let avg_recognitions_per_student = (total_students > 0).then(|| {
            let avg = total_recognitions as f64 / total_students as f64;
            (avg * 100.0).round() / 100.0
        });

        Ok(DatabaseStats {
            total_students,
            total_recognitions,
            recognitions_today,
            created_at: data.created_at,
            last_updated: data.last_updated,
            version: data.version,
            avg_recognitions_per_student,
        })
    }

    /// Write a CSV summary of every student. Returns the number of rows.
    pub fn export_csv(&self, out: &Path) -> Result<usize, DatabaseError> {
        let data = self.load()?;
        let mut writer = csv::Writer::from_path(out)?;
        writer.write_record([
            "Student ID",
            "Name",
            "Registration Date",
            "Recognition Count",
            "Last Recognition",
            "Face Samples",
        ])?;
        for s in data.students.values() {
            let last = s
                .last_recognition_date
                .as_deref()
                .map(|d| truncate(d, 19).to_string())
                .unwrap_or_else(|| "Never".to_string());
            writer.write_record([
                s.student_id.clone(),
                s.student_name.clone(),
                truncate(&s.registration_date, 10).to_string(),
                s.recognition_count.to_string(),
                last,
                s.sample_encodings.len().to_string(),
            ])?;
        }
        writer.flush().map_err(io_err(out))?;
        tracing::info!(path = %out.display(), rows = data.students.len(), "students exported");
        Ok(data.students.len())
    }

    /// Bulk-enroll from a CSV with `Student ID` and `Name` columns.
    ///
    /// Imported students get placeholder encodings and cannot be recognized
    /// until they are registered again with real photos. Existing IDs are
    /// left untouched.
    pub fn import_csv(&self, csv_path: &Path, now: NaiveDateTime) -> Result<usize, DatabaseError> {
        let mut reader = csv::Reader::from_path(csv_path)?;
        let headers = reader.headers()?.clone();
        let col = |name: &str| headers.iter().position(|h| h.trim() == name);
        let (Some(id_col), Some(name_col)) = (col("Student ID"), col("Name")) else {
            tracing::warn!(path = %csv_path.display(), "CSV lacks 'Student ID'/'Name' columns");
            return Ok(0);
        };

        let primary = Encoding(vec![0.0; PLACEHOLDER_ENCODING_LEN]);
        let samples = vec![primary.clone(); PLACEHOLDER_SAMPLES];
        let mut imported = 0;

        for row in reader.records() {
            let row = row?;
            let raw_id = row.get(id_col).unwrap_or("").trim();
            let name = row.get(name_col).unwrap_or("").trim();
            if raw_id.is_empty() || name.is_empty() {
                continue;
            }
            let Ok(id) = StudentId::parse(raw_id) else {
                tracing::warn!(id = raw_id, "skipping invalid ID in import");
                continue;
            };
            if self.add_student(&id, name, &primary, &samples, false, now)? == AddOutcome::Added {
                imported += 1;
            }
        }

        if imported > 0 {
            tracing::warn!(
                imported,
                "imported students have placeholder face data and will not be recognized until re-registered"
            );
        }
        Ok(imported)
    }

    /// Remove students whose last recognition is older than `days`.
    /// Students never recognized are kept.
    pub fn cleanup_inactive(&self, days: i64, now: NaiveDateTime) -> Result<usize, DatabaseError> {
        let mut data = self.load()?;
        let cutoff = now - chrono::Duration::days(days);
        let before = data.students.len();
        data.students.retain(|_, s| {
            match s.last_recognition_date.as_deref().and_then(parse_timestamp) {
                Some(last) => last >= cutoff,
                None => true,
            }
        });
        let removed = before - data.students.len();
        if removed > 0 {
            self.save(&mut data, now)?;
            tracing::info!(removed, days, "removed inactive students");
        }
        Ok(removed)
    }

    /// Copy the database file. Defaults to `students_backup_<timestamp>.json`
    /// next to the database.
    pub fn backup(&self, dest: Option<&Path>, now: NaiveDateTime) -> Result<PathBuf, DatabaseError> {
        let dest = match dest {
            Some(p) => p.to_path_buf(),
            None => {
                let name = format!("students_backup_{}.json", now.format("%Y%m%d_%H%M%S"));
                self.path.parent().unwrap_or(Path::new(".")).join(name)
            }
        };
        fs::copy(&self.path, &dest).map_err(io_err(&dest))?;
        tracing::info!(path = %dest.display(), "database backup created");
        Ok(dest)
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Upper-case the first letter of every word and lower-case the rest.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for ch in s.chars() {
        if ch.is_alphabetic() {
            if at_word_start {
                out.extend(ch.to_uppercase());
            } else {
                out.extend(ch.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(ch);
            at_word_start = true;
        }
    }
    out
}
