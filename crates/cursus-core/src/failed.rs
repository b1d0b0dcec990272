//! # Failed Subject Records
//!
//! One record per subject a student failed at a module close, carrying the
//! recovery state machine:
//!
//! ```text
//! Pending ──approve──▶ AdminApproved ──grade──▶ TeacherGraded(approved|rejected) ──▶ Processed
//!    │
//!    └────reject────▶ AdminRejected ─────────────────────────────────────────────▶ Processed
//! ```
//!
//! `Processed` is terminal. The store refuses any write to a processed record.

use crate::{CourseId, CursusError, ProgramId, RecordId, Score, StudentId, SubjectId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Instructor verdict on a recovery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeOutcome {
    Approved,
    Rejected,
}

impl GradeOutcome {
    pub fn parse(s: &str) -> Result<Self, CursusError> {
        match s {
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(CursusError::Validation(format!(
                "unknown grade outcome: {other:?} (use approved or rejected)"
            ))),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

/// How the sweep resolved a record at recovery close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Promoted,
    Removed,
}

/// Recovery state of a failed subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryState {
    /// Waiting for the administrator.
    Pending,
    /// Administrator consented; the instructor may grade.
    AdminApproved,
    /// Administrator refused; the student has been removed from the course.
    AdminRejected,
    /// Instructor graded the recovery.
    TeacherGraded(GradeOutcome),
    /// Resolved at recovery close. Terminal.
    Processed(Resolution),
}

impl fmt::Display for RecoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::AdminApproved => f.write_str("admin_approved"),
            Self::AdminRejected => f.write_str("admin_rejected"),
            Self::TeacherGraded(GradeOutcome::Approved) => f.write_str("teacher_graded_approved"),
            Self::TeacherGraded(GradeOutcome::Rejected) => f.write_str("teacher_graded_rejected"),
            Self::Processed(Resolution::Promoted) => f.write_str("processed_promoted"),
            Self::Processed(Resolution::Removed) => f.write_str("processed_removed"),
        }
    }
}

/// A subject (or, without subject structure, a whole course) failed at a module close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedSubjectRecord {
    pub id: RecordId,
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub program_id: ProgramId,
    /// `None` for a course-level record.
    pub subject_id: Option<SubjectId>,
    pub module_number: u32,
    pub average: Score,
    pub state: RecoveryState,
}

impl FailedSubjectRecord {
    /// A fresh pending record. The store assigns the id on insert.
    #[must_use]
    pub fn pending(
        student_id: StudentId,
        course_id: CourseId,
        program_id: ProgramId,
        subject_id: Option<SubjectId>,
        module_number: u32,
        average: Score,
    ) -> Self {
        Self {
            id: RecordId(0),
            student_id,
            course_id,
            program_id,
            subject_id,
            module_number,
            average,
            state: RecoveryState::Pending,
        }
    }

    // -------------------------------------------------------------------------
    // Legacy flag views
    // -------------------------------------------------------------------------

    /// Administrator consented (possibly already graded).
    #[must_use]
    pub fn recovery_approved(&self) -> bool {
        matches!(
            self.state,
            RecoveryState::AdminApproved | RecoveryState::TeacherGraded(_)
        )
    }

    #[must_use]
    pub fn recovery_rejected(&self) -> bool {
        self.state == RecoveryState::AdminRejected
    }

    /// Instructor has graded the recovery.
    #[must_use]
    pub fn recovery_completed(&self) -> bool {
        matches!(self.state, RecoveryState::TeacherGraded(_))
    }

    #[must_use]
    pub fn teacher_graded_status(&self) -> Option<GradeOutcome> {
        match self.state {
            RecoveryState::TeacherGraded(outcome) => Some(outcome),
            _ => None,
        }
    }

    #[must_use]
    pub fn recovery_processed(&self) -> bool {
        matches!(self.state, RecoveryState::Processed(_))
    }

    /// Approved by both parties: the only state that allows promotion.
    #[must_use]
    pub fn is_fully_approved(&self) -> bool {
        self.state == RecoveryState::TeacherGraded(GradeOutcome::Approved)
    }

    /// No administrator decision yet.
    #[must_use]
    pub fn awaits_admin(&self) -> bool {
        self.state == RecoveryState::Pending
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    /// Apply an administrator decision.
    ///
    /// Returns `false` when the record already carries the same approval.
    pub fn admin_decide(&mut self, approve: bool) -> Result<bool, CursusError> {
        match (self.state, approve) {
            (RecoveryState::Pending, true) => {
                self.state = RecoveryState::AdminApproved;
                Ok(true)
            }
            (RecoveryState::Pending | RecoveryState::AdminApproved, false) => {
                self.state = RecoveryState::AdminRejected;
                Ok(true)
            }
            (RecoveryState::AdminApproved, true) => Ok(false),
            (state, _) => Err(CursusError::StateConflict(format!(
                "record {} is {}; administrator decisions are closed",
                self.id, state
            ))),
        }
    }

    /// Apply an instructor grade.
    ///
    /// Returns `false` when the same grade was already recorded.
    pub fn teacher_grade(&mut self, outcome: GradeOutcome) -> Result<bool, CursusError> {
        match self.state {
            RecoveryState::AdminApproved => {
                self.state = RecoveryState::TeacherGraded(outcome);
                Ok(true)
            }
            RecoveryState::TeacherGraded(previous) if previous == outcome => Ok(false),
            RecoveryState::TeacherGraded(previous) => Err(CursusError::StateConflict(format!(
                "record {} was already graded {}",
                self.id,
                previous.as_str()
            ))),
            state => Err(CursusError::StateConflict(format!(
                "record {} is {}; grading requires administrator approval",
                self.id, state
            ))),
        }
    }

    /// Close the record. Terminal.
    pub fn process(&mut self, resolution: Resolution) -> Result<(), CursusError> {
        if self.recovery_processed() {
            return Err(CursusError::StateConflict(format!(
                "record {} is already processed",
                self.id
            )));
        }
        self.state = RecoveryState::Processed(resolution);
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
