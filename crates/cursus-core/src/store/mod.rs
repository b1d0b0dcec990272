//! # Academic Store
//!
//! The `AcademicStore` trait is the persistence seam of the core. Two
//! backends implement it:
//! - [`MemoryStore`]: `BTreeMap`-backed, serializable as a snapshot
//! - [`RedbStore`]: disk-backed via the redb embedded database
//!
//! The store is where the two write-side invariants are enforced, so every
//! caller gets them for free:
//! - at most one non-processed failed record per (student, course, subject)
//! - a processed failed record is never written again
//!
//! Student records use optimistic concurrency: `save_student` only succeeds
//! when the caller presents the version it read.

mod memory;
mod redb_store;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use crate::closure::ModuleClosure;
use crate::directory::{Course, Grade, Program, Subject};
use crate::failed::FailedSubjectRecord;
use crate::record::StudentAcademicRecord;
use crate::{CourseId, CursusError, ProgramId, RecordId, StudentId, SubjectId};
use serde::{Deserialize, Serialize};

/// Persistence operations used by the closure engine, the recovery pipeline
/// and the sweep.
///
/// All listing methods return entities in ascending id order.
pub trait AcademicStore {
    // -------------------------------------------------------------------------
    // Directory
    // -------------------------------------------------------------------------

    fn program(&self, id: ProgramId) -> Result<Option<Program>, CursusError>;

    fn programs(&self) -> Result<Vec<Program>, CursusError>;

    fn put_program(&mut self, program: Program) -> Result<(), CursusError>;

    fn subject(&self, id: SubjectId) -> Result<Option<Subject>, CursusError>;

    fn subjects(&self) -> Result<Vec<Subject>, CursusError>;

    fn put_subject(&mut self, subject: Subject) -> Result<(), CursusError>;

    fn course(&self, id: CourseId) -> Result<Option<Course>, CursusError>;

    fn courses(&self) -> Result<Vec<Course>, CursusError>;

    fn put_course(&mut self, course: Course) -> Result<(), CursusError>;

    /// All grades a student holds in a course, in insertion order.
    fn grades_for(&self, student: StudentId, course: CourseId)
    -> Result<Vec<Grade>, CursusError>;

    fn grades(&self) -> Result<Vec<Grade>, CursusError>;

    /// Replace every grade a student holds in a course.
    fn put_grades(
        &mut self,
        student: StudentId,
        course: CourseId,
        grades: Vec<Grade>,
    ) -> Result<(), CursusError>;

    // -------------------------------------------------------------------------
    // Students
    // -------------------------------------------------------------------------

    fn student(&self, id: StudentId) -> Result<Option<StudentAcademicRecord>, CursusError>;

    fn students(&self) -> Result<Vec<StudentAcademicRecord>, CursusError>;

    /// Compare-and-swap write.
    ///
    /// The stored version (0 when absent) must equal `record.version`.
    /// On success `record.version` is incremented to the stored value.
    fn save_student(&mut self, record: &mut StudentAcademicRecord) -> Result<(), CursusError>;

    // -------------------------------------------------------------------------
    // Failed subject records
    // -------------------------------------------------------------------------

    fn failed_record(&self, id: RecordId) -> Result<Option<FailedSubjectRecord>, CursusError>;

    fn failed_records(&self) -> Result<Vec<FailedSubjectRecord>, CursusError>;

    /// Insert a new record and return its assigned id.
    ///
    /// Fails with `StateConflict` if a non-processed record already exists
    /// for the same (student, course, subject).
    fn insert_failed_record(
        &mut self,
        record: FailedSubjectRecord,
    ) -> Result<RecordId, CursusError>;

    /// Overwrite an existing record.
    ///
    /// Fails with `RecordNotFound` for unknown ids and `StateConflict` if the
    /// stored record is already processed.
    fn update_failed_record(&mut self, record: &FailedSubjectRecord) -> Result<(), CursusError>;

    // -------------------------------------------------------------------------
    // Module closures
    // -------------------------------------------------------------------------

    fn closure(
        &self,
        program: ProgramId,
        module: u32,
    ) -> Result<Option<ModuleClosure>, CursusError>;

    fn closures(&self) -> Result<Vec<ModuleClosure>, CursusError>;

    /// Insert a closure row unless one exists for the same (program, module).
    ///
    /// Returns `true` if the row was inserted.
    fn insert_closure(&mut self, closure: ModuleClosure) -> Result<bool, CursusError>;

    /// Next id `insert_failed_record` will assign.
    fn next_record_id(&self) -> Result<u64, CursusError>;

    // -------------------------------------------------------------------------
    // Provided queries
    // -------------------------------------------------------------------------

    /// Courses belonging to a program.
    fn courses_for_program(&self, program: ProgramId) -> Result<Vec<Course>, CursusError> {
        Ok(self
            .courses()?
            .into_iter()
            .filter(|c| c.program_id == program)
            .collect())
    }

    /// All records, processed or not, for a student in a course.
    fn records_for(
        &self,
        student: StudentId,
        course: CourseId,
    ) -> Result<Vec<FailedSubjectRecord>, CursusError> {
        Ok(self
            .failed_records()?
            .into_iter()
            .filter(|r| r.student_id == student && r.course_id == course)
            .collect())
    }

    /// All records created for a program module.
    fn records_for_module(
        &self,
        program: ProgramId,
        module: u32,
    ) -> Result<Vec<FailedSubjectRecord>, CursusError> {
        Ok(self
            .failed_records()?
            .into_iter()
            .filter(|r| r.program_id == program && r.module_number == module)
            .collect())
    }

    /// The non-processed record for a (student, course, subject), if any.
    fn active_record(
        &self,
        student: StudentId,
        course: CourseId,
        subject: Option<SubjectId>,
    ) -> Result<Option<FailedSubjectRecord>, CursusError> {
        Ok(self
            .records_for(student, course)?
            .into_iter()
            .find(|r| r.subject_id == subject && !r.recovery_processed()))
    }

    /// Export every collection as a snapshot.
    fn snapshot(&self) -> Result<StoreSnapshot, CursusError> {
        Ok(StoreSnapshot {
            programs: self.programs()?,
            subjects: self.subjects()?,
            courses: self.courses()?,
            grades: self.grades()?,
            students: self.students()?,
            failed_records: self.failed_records()?,
            closures: self.closures()?,
            next_record_id: self.next_record_id()?,
        })
    }
}

/// Fail with `StateConflict` if `existing` already holds an active record for
/// the same (student, course, subject) as `candidate`.
pub(crate) fn ensure_unique_active<'a>(
    existing: impl IntoIterator<Item = &'a FailedSubjectRecord>,
    candidate: &FailedSubjectRecord,
) -> Result<(), CursusError> {
    let duplicate = existing.into_iter().find(|r| {
        r.student_id == candidate.student_id
            && r.course_id == candidate.course_id
            && r.subject_id == candidate.subject_id
            && !r.recovery_processed()
    });
    match duplicate {
        Some(r) => Err(CursusError::StateConflict(format!(
            "record {} is still active for student {} in course {}",
            r.id, r.student_id, r.course_id
        ))),
        None => Ok(()),
    }
}

/// Fail with `StateConflict` if the stored version of a record is processed.
pub(crate) fn ensure_not_processed(stored: &FailedSubjectRecord) -> Result<(), CursusError> {
    if stored.recovery_processed() {
        return Err(CursusError::StateConflict(format!(
            "record {} is processed and cannot change",
            stored.id
        )));
    }
    Ok(())
}

/// Check the optimistic-concurrency version of a student write.
pub(crate) fn ensure_version(
    stored: Option<u64>,
    record: &StudentAcademicRecord,
) -> Result<(), CursusError> {
    let found = stored.unwrap_or(0);
    if found != record.version {
        return Err(CursusError::VersionConflict {
            student: record.student_id,
            expected: record.version,
            found,
        });
    }
    Ok(())
}

/// Flat, format-neutral view of a whole store.
///
/// Used for snapshots, JSON export and moving data between backends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub programs: Vec<Program>,
    pub subjects: Vec<Subject>,
    pub courses: Vec<Course>,
    pub grades: Vec<Grade>,
    pub students: Vec<StudentAcademicRecord>,
    pub failed_records: Vec<FailedSubjectRecord>,
    pub closures: Vec<ModuleClosure>,
    pub next_record_id: u64,
}
