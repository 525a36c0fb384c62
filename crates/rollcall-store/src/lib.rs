pub mod database;
pub mod ledger;
pub mod student_id;

pub use database::{
    iso_timestamp, title_case, AddOutcome, DatabaseError, DatabaseStats, StudentDatabase, StudentRecord,
    StudentSummary,
};
pub use ledger::{week_of, AttendanceEntry, AttendanceLedger, ClearOutcome, LedgerError, MarkOutcome};
pub use student_id::{StudentId, StudentIdError, STUDENT_ID_EXAMPLE};
