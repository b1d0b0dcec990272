//! # Core Type Definitions
//!
//! This module contains the scalar types shared across the Cursus core:
//! - Identifiers (`StudentId`, `ProgramId`, `SubjectId`, `CourseId`, `RecordId`)
//! - Grade representation (`Score`)
//! - Per-program and global status (`ProgramStatus`, `GlobalStatus`)
//! - Error types (`CursusError`, `ErrorKind`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Use integer arithmetic only (no floating-point)
//! - Implement `Ord` for deterministic ordering in `BTreeMap`/`BTreeSet`

use crate::primitives::MAX_SCORE;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Identifier of a student.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct StudentId(pub u64);

/// Identifier of a program (a sequence of modules).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ProgramId(pub u64);

/// Identifier of a subject taught within one module of a program.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct SubjectId(pub u64);

/// Identifier of a course (a cohort group inside a program).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct CourseId(pub u64);

/// Identifier of a failed-subject record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct RecordId(pub u64);

macro_rules! display_id {
    ($($ty:ident),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        })*
    };
}

display_id!(StudentId, ProgramId, SubjectId, CourseId, RecordId);

// =============================================================================
// SCORE
// =============================================================================

/// A grade in hundredths of a point.
///
/// The grading scale runs from 0.00 to 5.00, stored as `0..=500`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Score(pub u16);

impl Score {
    /// Create a score, rejecting values above the top of the scale.
    pub fn new(hundredths: u16) -> Result<Self, CursusError> {
        if hundredths > MAX_SCORE {
            return Err(CursusError::InvalidScore(hundredths));
        }
        Ok(Self(hundredths))
    }

    /// Raw value in hundredths.
    #[must_use]
    pub const fn hundredths(self) -> u16 {
        self.0
    }

    /// Parse a decimal string such as `"3.5"` or `"2.75"`.
    pub fn parse(s: &str) -> Result<Self, CursusError> {
        let s = s.trim();
        let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
        if whole.is_empty() || frac.len() > 2 {
            return Err(CursusError::Validation(format!("malformed score: {s:?}")));
        }
        let whole: u16 = whole
            .parse()
            .map_err(|_| CursusError::Validation(format!("malformed score: {s:?}")))?;
        let frac: u16 = match frac.len() {
            0 => 0,
            1 => frac
                .parse::<u16>()
                .map(|d| d * 10)
                .map_err(|_| CursusError::Validation(format!("malformed score: {s:?}")))?,
            _ => frac
                .parse()
                .map_err(|_| CursusError::Validation(format!("malformed score: {s:?}")))?,
        };
        let total = whole
            .checked_mul(100)
            .and_then(|w| w.checked_add(frac))
            .ok_or(CursusError::Validation(format!("score out of range: {s:?}")))?;
        Self::new(total)
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// =============================================================================
// PROGRAM STATUS
// =============================================================================

/// Status of a student within one program.
///
/// Serialized with the registry's wire names (`activo`, `pendiente_recuperacion`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProgramStatus {
    /// Currently studying the module recorded in `program_modules`.
    #[serde(rename = "activo")]
    Active,
    /// Failed at least one subject; waiting on the recovery pipeline.
    #[serde(rename = "pendiente_recuperacion")]
    PendingRecovery,
    /// Failed the program.
    #[serde(rename = "reprobado")]
    Failed,
    /// Left the program.
    #[serde(rename = "retirado")]
    Withdrawn,
    /// Completed the final module.
    #[serde(rename = "egresado")]
    Graduated,
}

/// The single status summarizing all of a student's program statuses.
pub type GlobalStatus = ProgramStatus;

impl ProgramStatus {
    /// All statuses in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Active,
        Self::PendingRecovery,
        Self::Failed,
        Self::Withdrawn,
        Self::Graduated,
    ];

    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "activo",
            Self::PendingRecovery => "pendiente_recuperacion",
            Self::Failed => "reprobado",
            Self::Withdrawn => "retirado",
            Self::Graduated => "egresado",
        }
    }

    /// Parse a wire name.
    pub fn parse(s: &str) -> Result<Self, CursusError> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CursusError::Validation(format!("unknown program status: {s:?}")))
    }
}

impl fmt::Display for ProgramStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the Cursus core.
///
/// Interactive operations surface these directly. The sweep catches them per
/// entity, logs them, and keeps going.
#[derive(Debug, Error)]
pub enum CursusError {
    /// Module numbers start at 1.
    #[error("Invalid module number: {0}")]
    InvalidModuleNumber(u32),

    /// Score above the top of the grading scale.
    #[error("Invalid score: {0} hundredths exceeds 500")]
    InvalidScore(u16),

    /// Malformed input (dates, configuration, directory data).
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Student not found: {0}")]
    StudentNotFound(StudentId),

    #[error("Program not found: {0}")]
    ProgramNotFound(ProgramId),

    #[error("Course not found: {0}")]
    CourseNotFound(CourseId),

    #[error("Recovery record not found: {0}")]
    RecordNotFound(RecordId),

    /// No active recovery record matches a (student, course, subject) triple.
    #[error("No active recovery record for student {student} in course {course}")]
    NoActiveRecord {
        student: StudentId,
        course: CourseId,
        subject: Option<SubjectId>,
    },

    /// The student has moved past the module the record belongs to.
    #[error("Module mismatch: record is for module {record_module}, student is in module {student_module}")]
    ModuleMismatch {
        record_module: u32,
        student_module: u32,
    },

    /// The requested transition is not allowed from the current state.
    #[error("State conflict: {0}")]
    StateConflict(String),

    /// A concurrent writer updated the student record first.
    #[error("Version conflict on student {student}: expected {expected}, found {found}")]
    VersionConflict {
        student: StudentId,
        expected: u64,
        found: u64,
    },

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A deserialization error occurred.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// Another process holds the store, or changed it since it was loaded.
    #[error("Store busy: {0}")]
    StoreBusy(String),

    /// An I/O or storage engine error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

/// Coarse classification used by callers to map errors to responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    StateConflict,
    /// Lost a race with another writer; retrying may succeed.
    Transient,
    Storage,
}

impl CursusError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidModuleNumber(_) | Self::InvalidScore(_) | Self::Validation(_) => {
                ErrorKind::Validation
            }
            Self::StudentNotFound(_)
            | Self::ProgramNotFound(_)
            | Self::CourseNotFound(_)
            | Self::RecordNotFound(_)
            | Self::NoActiveRecord { .. } => ErrorKind::NotFound,
            Self::ModuleMismatch { .. } | Self::StateConflict(_) => ErrorKind::StateConflict,
            Self::VersionConflict { .. } | Self::StoreBusy(_) => ErrorKind::Transient,
            Self::SerializationError(_) | Self::DeserializationError(_) | Self::IoError(_) => {
                ErrorKind::Storage
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
