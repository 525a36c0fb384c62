//! Weekly attendance ledger stored as XLSX workbooks.
//!
//! Each ISO week gets its own `Attendance_Week_{week}_{year}.xlsx` with a
//! single `Attendance` sheet: a bold header row followed by one
//! `Date | Time | Student ID | Student Name` row per mark. Every change reads
//! the existing rows with `calamine` and rewrites the whole workbook with
//! `rust_xlsxwriter`.

use calamine::{Data, Reader, Xlsx};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use rust_xlsxwriter::{Format, Workbook};
use std::fs;
use std::io::{Cursor, ErrorKind};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DATE_FORMAT: &str = "%d-%m-%Y";
pub const TIME_FORMAT: &str = "%H:%M:%S";
const SHEET_NAME: &str = "Attendance";
const HEADERS: [&str; 4] = ["Date", "Time", "Student ID", "Student Name"];
const COLUMN_WIDTHS: [f64; 4] = [12.0, 10.0, 15.0, 25.0];

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("{0} is open in another program; close it and try again")]
    Locked(PathBuf),
    #[error("ledger I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("writing workbook: {0}")]
    Write(#[from] rust_xlsxwriter::XlsxError),
    #[error("reading workbook {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: calamine::XlsxError,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> LedgerError + '_ {
    move |source| {
        if source.kind() == ErrorKind::PermissionDenied {
            LedgerError::Locked(path.to_path_buf())
        } else {
            LedgerError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// One attendance row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceEntry {
    pub date: String,
    pub time: String,
    pub student_id: String,
    pub student_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    Marked,
    /// The student already has a row for that date.
    AlreadyMarked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    /// No workbook exists for that week.
    NoFile,
    Cleared(usize),
}

/// ISO week number and ISO year of `date`.
pub fn week_of(date: NaiveDate) -> (u32, i32) {
    let iso = date.iso_week();
    (iso.week(), iso.year())
}

pub fn file_name(week: u32, year: i32) -> String {
    format!("Attendance_Week_{week}_{year}.xlsx")
}

/// Directory of weekly attendance workbooks.
pub struct AttendanceLedger {
    dir: PathBuf,
}

impl AttendanceLedger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Workbook path for the ISO week containing `date`.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        let (week, year) = week_of(date);
        self.path_for_week(week, year)
    }

    pub fn path_for_week(&self, week: u32, year: i32) -> PathBuf {
        self.dir.join(file_name(week, year))
    }

    /// Record `id` as present at `at`, unless already recorded that day.
    pub fn mark(&self, id: &str, name: &str, at: NaiveDateTime) -> Result<MarkOutcome, LedgerError> {
        let path = self.path_for(at.date());
        let date = at.format(DATE_FORMAT).to_string();
        let time = at.format(TIME_FORMAT).to_string();

        let mut rows = if path.exists() {
            read_rows(&path)?
        } else {
            fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;
            tracing::info!(path = %path.display(), "creating attendance workbook");
            Vec::new()
        };

        let duplicate = rows
            .iter()
            .any(|r| cell(r, 0) == date && cell(r, 2) == id);
        if duplicate {
            return Ok(MarkOutcome::AlreadyMarked);
        }

        rows.push(vec![date, time.clone(), id.to_string(), name.to_string()]);
        write_rows(&path, &rows)?;
        tracing::info!(student_id = id, name, time = %time, "attendance marked");
        Ok(MarkOutcome::Marked)
    }

    /// Number of rows dated `date`.
    pub fn today_count(&self, date: NaiveDate) -> Result<usize, LedgerError> {
        let path = self.path_for(date);
        if !path.exists() {
            return Ok(0);
        }
        let date = date.format(DATE_FORMAT).to_string();
        Ok(read_rows(&path)?
            .iter()
            .filter(|r| !cell(r, 0).is_empty() && cell(r, 0) == date)
            .count())
    }

    /// Complete rows dated `date`, in file order.
    pub fn today_entries(&self, date: NaiveDate) -> Result<Vec<AttendanceEntry>, LedgerError> {
        let date_str = date.format(DATE_FORMAT).to_string();
        Ok(self
            .entries_in(&self.path_for(date))?
            .into_iter()
            .filter(|e| e.date == date_str)
            .collect())
    }

    /// Every complete, dated row of the given ISO week.
    pub fn week_report(&self, week: u32, year: i32) -> Result<Vec<AttendanceEntry>, LedgerError> {
        self.entries_in(&self.path_for_week(week, year))
    }

    fn entries_in(&self, path: &Path) -> Result<Vec<AttendanceEntry>, LedgerError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        Ok(read_rows(path)?
            .into_iter()
            .filter(|r| r.len() >= 4 && !r[0].is_empty())
            .map(|r| AttendanceEntry {
                date: r[0].clone(),
                time: r[1].clone(),
                student_id: r[2].clone(),
                student_name: r[3].clone(),
            })
            .collect())
    }

    /// Remove the rows dated `date`; other days of the week are kept.
    pub fn clear_day(&self, date: NaiveDate) -> Result<ClearOutcome, LedgerError> {
        let path = self.path_for(date);
        if !path.exists() {
            return Ok(ClearOutcome::NoFile);
        }
        let date_str = date.format(DATE_FORMAT).to_string();
        let rows = read_rows(&path)?;
        let before = rows.len();
        let kept: Vec<Vec<String>> = rows.into_iter().filter(|r| cell(r, 0) != date_str).collect();
        let cleared = before - kept.len();
        if cleared > 0 {
            write_rows(&path, &kept)?;
            tracing::info!(cleared, date = %date_str, "cleared attendance for day");
        }
        Ok(ClearOutcome::Cleared(cleared))
    }

    /// Delete the workbook of the week containing `date`.
    /// Returns `false` if there was nothing to delete.
    pub fn reset_week(&self, date: NaiveDate) -> Result<bool, LedgerError> {
        let path = self.path_for(date);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).map_err(io_err(&path))?;
        tracing::info!(path = %path.display(), "weekly attendance workbook deleted");
        Ok(true)
    }
}

fn cell(row: &[String], idx: usize) -> &str {
    row.get(idx).map(String::as_str).unwrap_or("")
}

fn data_to_string(value: &Data) -> String {
    match value {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Data rows (header excluded) with trailing empty cells trimmed.
/// Blank rows are dropped.
fn read_rows(path: &Path) -> Result<Vec<Vec<String>>, LedgerError> {
    let bytes = fs::read(path).map_err(io_err(path))?;
    let read_err = |source| LedgerError::Read {
        path: path.to_path_buf(),
        source,
    };

    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes)).map_err(read_err)?;
    let range = match workbook.worksheet_range(SHEET_NAME) {
        Ok(range) => range,
        Err(_) => match workbook.worksheet_range_at(0) {
            Some(result) => result.map_err(read_err)?,
            None => return Ok(Vec::new()),
        },
    };

    Ok(range
        .rows()
        .skip(1)
        .map(|row| {
            let mut cells: Vec<String> = row.iter().map(data_to_string).collect();
            while cells.last().is_some_and(|c| c.is_empty()) {
                cells.pop();
            }
            cells
        })
        .filter(|cells| !cells.is_empty())
        .collect())
}

/// Write header plus `rows` as a fresh workbook at `path`.
fn write_rows(path: &Path, rows: &[Vec<String>]) -> Result<(), LedgerError> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME)?;

    let bold = Format::new().set_bold();
    for (col, header) in HEADERS.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *header, &bold)?;
    }
    for (col, width) in COLUMN_WIDTHS.iter().enumerate() {
        sheet.set_column_width(col as u16, *width)?;
    }
    for (i, row) in rows.iter().enumerate() {
        for (col, value) in row.iter().enumerate() {
            sheet.write_string(i as u32 + 1, col as u16, value.as_str())?;
        }
    }

    let buffer = workbook.save_to_buffer()?;
    fs::write(path, buffer).map_err(io_err(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn ledger() -> (tempfile::TempDir, AttendanceLedger) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AttendanceLedger::new(dir.path().join("attendance_files"));
        (dir, ledger)
    }

    #[test]
    fn test_week_file_name_uses_iso_year() {
        let (_dir, ledger) = ledger();
        let path = ledger.path_for(NaiveDate::from_ymd_opt(2025, 12, 30).unwrap());
        assert_eq!(path.file_name().unwrap(), "Attendance_Week_1_2026.xlsx");
        assert_eq!(week_of(NaiveDate::from_ymd_opt(2025, 12, 24).unwrap()), (52, 2025));
    }

    #[test]
    fn test_mark_then_duplicate() {
        let (_dir, ledger) = ledger();
        let t = at(2025, 12, 22, 9, 15);
        assert_eq!(ledger.mark("24054-EC-001", "Rajesh Kumar", t).unwrap(), MarkOutcome::Marked);
        assert_eq!(
            ledger.mark("24054-EC-001", "Rajesh Kumar", at(2025, 12, 22, 14, 0)).unwrap(),
            MarkOutcome::AlreadyMarked
        );

        let entries = ledger.today_entries(t.date()).unwrap();
        assert_eq!(
            entries,
            vec![AttendanceEntry {
                date: "22-12-2025".into(),
                time: "09:15:00".into(),
                student_id: "24054-EC-001".into(),
                student_name: "Rajesh Kumar".into(),
            }]
        );
    }

    #[test]
    fn test_next_day_same_week_marks_again() {
        let (_dir, ledger) = ledger();
        ledger.mark("24054-EC-001", "A", at(2025, 12, 22, 9, 0)).unwrap();
        assert_eq!(
            ledger.mark("24054-EC-001", "A", at(2025, 12, 23, 9, 0)).unwrap(),
            MarkOutcome::Marked
        );
        ledger.mark("24054-EC-002", "B", at(2025, 12, 23, 9, 5)).unwrap();

        assert_eq!(ledger.today_count(at(2025, 12, 22, 0, 0).date()).unwrap(), 1);
        assert_eq!(ledger.today_count(at(2025, 12, 23, 0, 0).date()).unwrap(), 2);
        assert_eq!(ledger.week_report(52, 2025).unwrap().len(), 3);
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let (_dir, ledger) = ledger();
        let day = NaiveDate::from_ymd_opt(2025, 12, 22).unwrap();
        assert_eq!(ledger.today_count(day).unwrap(), 0);
        assert!(ledger.today_entries(day).unwrap().is_empty());
        assert!(ledger.week_report(52, 2025).unwrap().is_empty());
        assert_eq!(ledger.clear_day(day).unwrap(), ClearOutcome::NoFile);
        assert!(!ledger.reset_week(day).unwrap());
    }

    #[test]
    fn test_clear_day_keeps_other_days() {
        let (_dir, ledger) = ledger();
        ledger.mark("24054-EC-001", "A", at(2025, 12, 22, 9, 0)).unwrap();
        ledger.mark("24054-EC-001", "A", at(2025, 12, 23, 9, 0)).unwrap();
        ledger.mark("24054-EC-002", "B", at(2025, 12, 23, 9, 1)).unwrap();

        let day = at(2025, 12, 23, 0, 0).date();
        assert_eq!(ledger.clear_day(day).unwrap(), ClearOutcome::Cleared(2));
        assert_eq!(ledger.today_count(day).unwrap(), 0);
        assert_eq!(ledger.week_report(52, 2025).unwrap().len(), 1);
        assert_eq!(ledger.clear_day(day).unwrap(), ClearOutcome::Cleared(0));

        // Clearing must not block re-marking.
        assert_eq!(ledger.mark("24054-EC-002", "B", at(2025, 12, 23, 10, 0)).unwrap(), MarkOutcome::Marked);
    }

    #[test]
    fn test_reset_week_deletes_file() {
        let (_dir, ledger) = ledger();
        let t = at(2025, 12, 22, 9, 0);
        ledger.mark("24054-EC-001", "A", t).unwrap();
        assert!(ledger.path_for(t.date()).exists());
        assert!(ledger.reset_week(t.date()).unwrap());
        assert!(!ledger.path_for(t.date()).exists());
    }

    /// Write a workbook by hand, header included, with `rows` as given.
    fn write_raw(path: &Path, rows: &[&[&str]]) {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name(SHEET_NAME).unwrap();
        for (col, header) in HEADERS.iter().enumerate() {
            sheet.write_string(0, col as u16, *header).unwrap();
        }
        for (i, row) in rows.iter().enumerate() {
            for (col, value) in row.iter().enumerate() {
                if !value.is_empty() {
                    sheet.write_string(i as u32 + 1, col as u16, *value).unwrap();
                }
            }
        }
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        workbook.save(path).unwrap();
    }

    #[test]
    fn test_short_and_undated_rows() {
        let (_dir, ledger) = ledger();
        let day = NaiveDate::from_ymd_opt(2025, 12, 22).unwrap();
        write_raw(
            &ledger.path_for(day),
            &[
                &["22-12-2025", "09:00:00", "24054-EC-001", "Ada"],
                &["22-12-2025", "09:01:00", "24054-EC-002"],
                &["", "09:02:00", "24054-EC-003", "Grace"],
                &["23-12-2025", "09:03:00", "24054-EC-004", "Alan"],
            ],
        );

        // Counts need a date; lists also need all four cells.
        assert_eq!(ledger.today_count(day).unwrap(), 2);
        let today: Vec<String> = ledger
            .today_entries(day)
            .unwrap()
            .into_iter()
            .map(|e| e.student_id)
            .collect();
        assert_eq!(today, vec!["24054-EC-001"]);
        let week: Vec<String> = ledger
            .week_report(52, 2025)
            .unwrap()
            .into_iter()
            .map(|e| e.student_id)
            .collect();
        assert_eq!(week, vec!["24054-EC-001", "24054-EC-004"]);

        // The short row still blocks a duplicate mark for that student.
        assert_eq!(
            ledger.mark("24054-EC-002", "Bob", at(2025, 12, 22, 10, 0)).unwrap(),
            MarkOutcome::AlreadyMarked
        );
    }

    #[test]
    fn test_permission_denied_maps_to_locked() {
        let path = Path::new("/tmp/Attendance_Week_52_2025.xlsx");
        let denied = io_err(path)(std::io::Error::from(ErrorKind::PermissionDenied));
        assert!(matches!(denied, LedgerError::Locked(ref p) if p == path));
        assert!(denied.to_string().contains("open in another program"));

        let missing = io_err(path)(std::io::Error::from(ErrorKind::NotFound));
        assert!(matches!(missing, LedgerError::Io { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_read_only_workbook_is_locked() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, ledger) = ledger();
        let t = at(2025, 12, 22, 9, 0);
        ledger.mark("24054-EC-001", "A", t).unwrap();
        let path = ledger.path_for(t.date());
        fs::set_permissions(&path, fs::Permissions::from_mode(0o444)).unwrap();

        // Root ignores file modes, so only check the mapping when the write is refused.
        if fs::OpenOptions::new().write(true).open(&path).is_err() {
            let err = ledger.mark("24054-EC-002", "B", t).unwrap_err();
            assert!(matches!(err, LedgerError::Locked(_)));
        }
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
    }

    #[test]
    fn test_header_row_is_written() {
        let (_dir, ledger) = ledger();
        let t = at(2025, 12, 22, 9, 0);
        ledger.mark("24054-EC-001", "A", t).unwrap();

        let bytes = fs::read(ledger.path_for(t.date())).unwrap();
        let mut wb: Xlsx<_> = Xlsx::new(Cursor::new(bytes)).unwrap();
        let range = wb.worksheet_range(SHEET_NAME).unwrap();
        let header: Vec<String> = range.rows().next().unwrap().iter().map(data_to_string).collect();
        assert_eq!(header, HEADERS);
    }
}
