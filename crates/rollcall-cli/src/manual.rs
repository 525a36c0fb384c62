//! Attendance by typed student ID, one at a time or as a comma list.

use crate::prompt;
use crate::speaker::Speaker;
use chrono::NaiveDateTime;
use rollcall_store::{AttendanceLedger, MarkOutcome, StudentDatabase, StudentId, STUDENT_ID_EXAMPLE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManualOutcome {
    InvalidFormat,
    NotFound(String),
    Marked { name: String },
    AlreadyMarked { name: String },
    /// The ledger could not be written; the reason is shown to the user.
    Failed(String),
}

impl ManualOutcome {
    pub fn is_marked(&self) -> bool {
        matches!(self, ManualOutcome::Marked { .. })
    }
}

/// Validate `raw_id`, look it up and mark it at `at`. A fresh mark is
/// announced as "Welcome {name}". Ledger failures are reported as
/// [`ManualOutcome::Failed`] so batch and interactive loops keep going.
pub fn mark_by_id(
    db: &StudentDatabase,
    ledger: &AttendanceLedger,
    speaker: &dyn Speaker,
    raw_id: &str,
    at: NaiveDateTime,
) -> anyhow::Result<ManualOutcome> {
    let Ok(id) = StudentId::parse(raw_id) else {
        println!("❌ Invalid ID format. Use format like {STUDENT_ID_EXAMPLE}");
        return Ok(ManualOutcome::InvalidFormat);
    };

    let Some(name) = db.student_name(id.as_str())? else {
        println!("❌ Student ID {id} not found in database.");
        return Ok(ManualOutcome::NotFound(id.to_string()));
    };

    println!("Found: {name}");
    match ledger.mark(id.as_str(), &name, at) {
        Ok(MarkOutcome::Marked) => {
            println!("✅ Attendance marked for {name} at {}", at.format("%H:%M:%S"));
            if let Err(e) = speaker.speak(&format!("Welcome {name}")) {
                tracing::warn!(error = %e, "welcome announcement failed");
            }
            Ok(ManualOutcome::Marked { name })
        }
        Ok(MarkOutcome::AlreadyMarked) => {
            println!("⚠️  {name} already marked today");
            Ok(ManualOutcome::AlreadyMarked { name })
        }
        Err(e) => {
            tracing::error!(student_id = %id, error = %e, "failed to write attendance");
            println!("❌ Could not mark {name}: {e}");
            Ok(ManualOutcome::Failed(e.to_string()))
        }
    }
}

/// Split a comma list into normalized IDs. Empty pieces are kept so they
/// count as failures.
pub fn split_ids(raw: &str) -> Vec<String> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    raw.split(',').map(|id| id.trim().to_uppercase()).collect()
}

/// Mark every ID in `raw`. Returns `(marked, total)`.
pub fn mark_batch(
    db: &StudentDatabase,
    ledger: &AttendanceLedger,
    speaker: &dyn Speaker,
    raw: &str,
    now: impl Fn() -> NaiveDateTime,
) -> anyhow::Result<(usize, usize)> {
    let ids = split_ids(raw);
    if ids.is_empty() {
        return Ok((0, 0));
    }
    println!("\nProcessing {} IDs...\n", ids.len());

    let mut marked = 0;
    for id in &ids {
        if mark_by_id(db, ledger, speaker, id, now())?.is_marked() {
            marked += 1;
        }
    }
    println!("\nCompleted: {marked}/{} marked successfully.", ids.len());
    Ok((marked, ids.len()))
}

/// Prompt for IDs until `Q`.
pub fn run_manual_loop(
    db: &StudentDatabase,
    ledger: &AttendanceLedger,
    speaker: &dyn Speaker,
    now: impl Fn() -> NaiveDateTime,
) -> anyhow::Result<()> {
    println!("Type 'Q' to stop\n");
    loop {
        let raw = prompt::ask(&format!("Enter Student ID ({STUDENT_ID_EXAMPLE})"))?.to_uppercase();
        if raw == "Q" {
            return Ok(());
        }
        mark_by_id(db, ledger, speaker, &raw, now())?;
        println!("{}", "-".repeat(50));
    }
}
