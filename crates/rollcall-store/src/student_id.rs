//! Student identifiers of the form `24054-EC-001`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;

pub const STUDENT_ID_EXAMPLE: &str = "24054-EC-001";
const STUDENT_ID_PATTERN: &str = r"^\d{5}-[A-Z]{2}-\d{3}$";

static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

fn pattern() -> Option<&'static Regex> {
    PATTERN.get_or_init(|| Regex::new(STUDENT_ID_PATTERN).ok()).as_ref()
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StudentIdError {
    #[error("invalid student ID {0:?}: must look like {STUDENT_ID_EXAMPLE}")]
    Invalid(String),
}

/// A validated, upper-cased student ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(String);

impl StudentId {
    /// Normalize (trim, upper-case) and validate.
    pub fn parse(raw: &str) -> Result<Self, StudentIdError> {
        let id = normalize(raw);
        if pattern().is_some_and(|re| re.is_match(&id)) {
            Ok(Self(id))
        } else {
            Err(StudentIdError::Invalid(raw.trim().to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StudentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for StudentId {
    type Err = StudentIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Trim surrounding whitespace and upper-case.
pub fn normalize(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// True if `raw` is a valid ID once normalized.
pub fn is_valid(raw: &str) -> bool {
    StudentId::parse(raw).is_ok()
}
