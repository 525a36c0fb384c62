//! Administrative commands: statistics, data exchange, resets and health check.

use crate::config::Config;
use crate::prompt;
use crate::speaker::find_program;
use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime};
use rollcall_core::ScrfdDetector;
use rollcall_hw::Camera;
use rollcall_store::{
    week_of, AttendanceEntry, AttendanceLedger, ClearOutcome, DatabaseStats, StudentDatabase, StudentId,
};
use std::path::{Path, PathBuf};

/// Render the statistics screen.
pub fn format_stats(stats: &DatabaseStats, today: &[AttendanceEntry]) -> String {
    let mut out = String::new();
    out.push_str(&format!("Total Students Registered: {}\n", stats.total_students));
    out.push_str(&format!("Database Created: {}\n", or_na(&stats.created_at)));
    out.push_str(&format!("Last Updated: {}\n", or_na(&stats.last_updated)));
    out.push_str(&format!("Total Recognitions: {}\n", stats.total_recognitions));
    out.push_str(&format!("Recognitions Today: {}\n", stats.recognitions_today));
    if let Some(avg) = stats.avg_recognitions_per_student {
        out.push_str(&format!("Average Recognitions per Student: {avg:.2}\n"));
    }

    out.push_str(&format!("\nToday's Attendance: {}\n", today.len()));
    if stats.total_students > 0 {
        let pct = today.len() as f64 / stats.total_students as f64 * 100.0;
        out.push_str(&format!("Attendance Percentage: {pct:.1}%\n"));
    }

    if today.is_empty() {
        out.push_str("No attendance recorded today yet.\n");
    } else {
        out.push_str("\nToday's Attendance List:\n");
        for (i, entry) in today.iter().enumerate() {
            out.push_str(&format!(
                "{}. {} ({}) at {}\n",
                i + 1,
                entry.student_name,
                entry.student_id,
                entry.time
            ));
        }
    }
    out
}

fn or_na(s: &str) -> &str {
    if s.is_empty() {
        "N/A"
    } else {
        s
    }
}

pub fn stats(db: &StudentDatabase, ledger: &AttendanceLedger, today: NaiveDate) -> anyhow::Result<()> {
    let stats = db.stats(today)?;
    let entries = ledger.today_entries(today)?;
    print!("{}", format_stats(&stats, &entries));
    Ok(())
}

/// Print one ISO week's rows. Defaults to the week containing `today`.
pub fn week_report(
    ledger: &AttendanceLedger,
    week: Option<u32>,
    year: Option<i32>,
    today: NaiveDate,
) -> anyhow::Result<()> {
    let (this_week, this_year) = week_of(today);
    let (week, year) = (week.unwrap_or(this_week), year.unwrap_or(this_year));
    let rows = ledger.week_report(week, year)?;
    if rows.is_empty() {
        println!("No attendance recorded in week {week} of {year}.");
        return Ok(());
    }
    println!("Week {week} of {year}: {} entries", rows.len());
    for row in rows {
        println!(
            "  {}  {}  {:<15} {}",
            row.date, row.time, row.student_id, row.student_name
        );
    }
    Ok(())
}

pub fn list(db: &StudentDatabase, search: Option<&str>) -> anyhow::Result<()> {
    let students = db.search_by_name(search.unwrap_or(""))?;
    if students.is_empty() {
        match search {
            Some(q) => println!("No students matching '{q}'."),
            None => println!("No students registered."),
        }
        return Ok(());
    }
    for s in &students {
        println!(
            "{:<15} {:<25} recognized {} times, last: {}",
            s.student_id, s.student_name, s.recognition_count, s.last_recognition
        );
    }
    println!("{} student(s)", students.len());
    Ok(())
}

pub fn remove(db: &StudentDatabase, raw_id: &str, assume_yes: bool, now: NaiveDateTime) -> anyhow::Result<bool> {
    let id = StudentId::parse(raw_id)?;
    let Some(name) = db.student_name(id.as_str())? else {
        println!("✗ Student ID {id} not found in database.");
        return Ok(false);
    };
    if !prompt::confirm(&format!("Remove {name} ({id})?"), assume_yes)? {
        return Ok(false);
    }
    let removed = db.delete_student(id.as_str(), now)?;
    if removed {
        println!("✓ Removed {name} ({id})");
    }
    Ok(removed)
}

/// Default export target: `students_export.csv` next to the database.
pub fn default_export_path(db: &StudentDatabase) -> PathBuf {
    db.path()
        .parent()
        .unwrap_or(Path::new("."))
        .join("students_export.csv")
}

pub fn export(db: &StudentDatabase, out: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let out = out.unwrap_or_else(|| default_export_path(db));
    let rows = db
        .export_csv(&out)
        .with_context(|| format!("exporting to {}", out.display()))?;
    println!("✓ Exported {rows} students to: {}", out.display());
    Ok(out)
}

pub fn import(db: &StudentDatabase, path: &Path, now: NaiveDateTime) -> anyhow::Result<usize> {
    let imported = db
        .import_csv(path, now)
        .with_context(|| format!("importing {}", path.display()))?;
    println!("✓ Imported {imported} students");
    if imported > 0 {
        println!("  Imported students have no face data yet; register them with photos before camera attendance.");
    }
    Ok(imported)
}

pub fn clear_today(ledger: &AttendanceLedger, today: NaiveDate, assume_yes: bool) -> anyhow::Result<()> {
    if !prompt::confirm("Clear today's attendance records?", assume_yes)? {
        println!("Cancelled.");
        return Ok(());
    }
    match ledger.clear_day(today)? {
        ClearOutcome::NoFile => println!("✗ Attendance file does not exist yet for this week."),
        ClearOutcome::Cleared(0) => println!("✓ No attendance records found for today to clear."),
        ClearOutcome::Cleared(n) => println!("✓ Successfully cleared {n} entries for today."),
    }
    Ok(())
}

pub fn reset_week(ledger: &AttendanceLedger, today: NaiveDate, assume_yes: bool) -> anyhow::Result<()> {
    let path = ledger.path_for(today);
    println!("Current attendance file:\n   {}", path.display());
    if !path.exists() {
        println!("No attendance file found for this week.");
        return Ok(());
    }
    if !prompt::confirm("Delete this file and reset attendance?", assume_yes)? {
        println!("Reset cancelled. Attendance file preserved.");
        return Ok(());
    }
    if ledger.reset_week(today)? {
        println!("✓ All attendance for this week has been reset to zero.");
    }
    Ok(())
}

pub fn cleanup(db: &StudentDatabase, days: i64, now: NaiveDateTime) -> anyhow::Result<usize> {
    let removed = db.cleanup_inactive(days, now)?;
    println!("✓ Removed {removed} students not recognized in {days} days");
    Ok(removed)
}

pub fn backup(db: &StudentDatabase, out: Option<&Path>, now: NaiveDateTime) -> anyhow::Result<PathBuf> {
    let dest = db.backup(out, now)?;
    println!("✓ Database backed up to: {}", dest.display());
    Ok(dest)
}

/// One health-check line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: &'static str,
    pub ok: bool,
    pub detail: String,
}

impl Check {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            ok: true,
            detail: detail.into(),
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            ok: false,
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for Check {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mark = if self.ok { "✓" } else { "✗" };
        write!(f, "{mark} {}: {}", self.name, self.detail)
    }
}

fn check_database(config: &Config, now: NaiveDateTime) -> Check {
    match StudentDatabase::open(&config.db_path, now).and_then(|db| db.student_count()) {
        Ok(count) => Check::pass("Database", format!("{count} students")),
        Err(e) => Check::fail("Database", format!("check failed: {e}")),
    }
}

fn check_attendance_dir(dir: &Path) -> Check {
    let probe = dir.join(".rollcall-write-test");
    let result = std::fs::create_dir_all(dir)
        .and_then(|_| std::fs::write(&probe, b"ok"))
        .and_then(|_| std::fs::remove_file(&probe));
    match result {
        Ok(()) => Check::pass("Attendance files", format!("{} is writable", dir.display())),
        Err(e) => Check::fail("Attendance files", format!("{} is not writable: {e}", dir.display())),
    }
}

fn check_camera(device: &str) -> Check {
    match Camera::probe(device) {
        Ok(info) => Check::pass("Camera", format!("accessible ({}, {})", info.name, info.driver)),
        Err(e) => {
            let others: Vec<String> = Camera::list_devices().into_iter().map(|d| d.path).collect();
            if others.is_empty() {
                Check::fail("Camera", format!("not accessible: {e}"))
            } else {
                Check::fail(
                    "Camera",
                    format!("not accessible: {e} (available: {})", others.join(", ")),
                )
            }
        }
    }
}

fn check_detector(model: &Path) -> Check {
    if !model.exists() {
        return Check::fail("Face detector", format!("model not found at {}", model.display()));
    }
    match ScrfdDetector::load(model, 0) {
        Ok(_) => Check::pass("Face detector", "model loaded"),
        Err(e) => Check::fail("Face detector", format!("model failed to load: {e}")),
    }
}

fn check_speech(config: &Config) -> Check {
    if !config.audio_enabled {
        return Check::pass("Speech", "audio disabled; announcements are printed");
    }
    match find_program(&config.speech_command) {
        Some(path) => Check::pass("Speech", format!("{} found", path.display())),
        None => Check::fail(
            "Speech",
            format!("{} not found; announcements will be printed", config.speech_command),
        ),
    }
}

/// Run every check. A failing check never stops the others.
pub fn run_checks(config: &Config, now: NaiveDateTime) -> Vec<Check> {
    vec![
        check_database(config, now),
        check_attendance_dir(&config.attendance_dir),
        check_camera(&config.camera_device),
        check_detector(&config.detector_model_path()),
        check_speech(config),
    ]
}

pub fn doctor(config: &Config, now: NaiveDateTime) {
    println!("Performing system health check...\n");
    let checks = run_checks(config, now);
    for check in &checks {
        println!("  {check}");
    }
    let failed = checks.iter().filter(|c| !c.ok).count();
    if failed == 0 {
        println!("\nHealth check complete. All checks passed.");
    } else {
        println!("\nHealth check complete. {failed} check(s) need attention.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileConfig;
    use rollcall_core::Encoding;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 12, 22).unwrap().and_hms_opt(9, 0, 0).unwrap()
    }

    fn stats_with(total: usize) -> DatabaseStats {
        DatabaseStats {
            total_students: total,
            total_recognitions: 3,
            recognitions_today: 1,
            created_at: "2025-12-01T08:00:00.000000".into(),
            last_updated: String::new(),
            version: "1.0".into(),
            avg_recognitions_per_student: (total > 0).then_some(1.0),
        }
    }

    fn entry(id: &str, name: &str, time: &str) -> AttendanceEntry {
        AttendanceEntry {
            date: "22-12-2025".into(),
            time: time.into(),
            student_id: id.into(),
            student_name: name.into(),
        }
    }

    #[test]
    fn test_format_stats_with_entries() {
        let report = format_stats(
            &stats_with(3),
            &[entry("24054-EC-001", "Ada", "09:00:00"), entry("24054-EC-002", "Grace", "09:05:10")],
        );
        assert!(report.contains("Total Students Registered: 3"));
        assert!(report.contains("Last Updated: N/A"));
        assert!(report.contains("Recognitions Today: 1"));
        assert!(report.contains("Today's Attendance: 2"));
        assert!(report.contains("Attendance Percentage: 66.7%"));
        assert!(report.contains("1. Ada (24054-EC-001) at 09:00:00"));
        assert!(report.contains("2. Grace (24054-EC-002) at 09:05:10"));
    }

    #[test]
    fn test_format_stats_empty() {
        let report = format_stats(&stats_with(0), &[]);
        assert!(report.contains("No attendance recorded today yet."));
        assert!(!report.contains("Percentage"));
    }

    #[test]
    fn test_remove_and_export_default_path() {
        let dir = tempfile::tempdir().unwrap();
        let db = StudentDatabase::open(dir.path().join("student_data/students.json"), now()).unwrap();
        let id = StudentId::parse("24054-EC-001").unwrap();
        db.add_student(&id, "ada", &Encoding(vec![0.1; 960]), &[], false, now())
            .unwrap();

        let out = export(&db, None).unwrap();
        assert_eq!(out, dir.path().join("student_data/students_export.csv"));
        assert!(out.exists());

        assert!(!remove(&db, "24054-EC-009", true, now()).unwrap());
        assert!(remove(&db, "24054-ec-001", true, now()).unwrap());
        assert_eq!(db.student_count().unwrap(), 0);
        assert!(remove(&db, "nonsense", true, now()).is_err());
    }

    #[test]
    fn test_clear_and_reset_with_yes() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AttendanceLedger::new(dir.path());
        let today = now().date();
        clear_today(&ledger, today, true).unwrap();
        ledger.mark("24054-EC-001", "Ada", now()).unwrap();
        clear_today(&ledger, today, true).unwrap();
        assert_eq!(ledger.today_count(today).unwrap(), 0);
        assert!(ledger.path_for(today).exists());
        reset_week(&ledger, today, true).unwrap();
        assert!(!ledger.path_for(today).exists());
    }

    #[test]
    fn test_checks_report_each_failure_independently() {
        let dir = tempfile::tempdir().unwrap();
        let file: FileConfig = toml::from_str(&format!(
            "data_dir = {:?}\ncamera_device = \"/dev/rollcall-missing-camera\"\nmodel_dir = {:?}\naudio_enabled = false\n",
            dir.path().to_string_lossy(),
            dir.path().join("models").to_string_lossy(),
        ))
        .unwrap();
        let config = Config::resolve(file, |_| None);

        let checks = run_checks(&config, now());
        let by_name = |name: &str| checks.iter().find(|c| c.name == name).unwrap().clone();

        assert_eq!(checks.len(), 5);
        assert!(by_name("Database").ok);
        assert_eq!(by_name("Database").detail, "0 students");
        assert!(by_name("Attendance files").ok);
        assert!(!by_name("Camera").ok);
        let detector = by_name("Face detector");
        assert!(!detector.ok);
        assert!(detector.detail.contains("not found"));
        assert!(by_name("Speech").ok);
        assert!(by_name("Camera").to_string().starts_with("✗ Camera:"));
    }
}
