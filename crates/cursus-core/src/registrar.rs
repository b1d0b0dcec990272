//! # Registrar
//!
//! The single writer in front of an academic store.
//!
//! ## Storage Backends
//!
//! - `InMemory`: [`MemoryStore`] (fast, volatile unless saved as a snapshot)
//! - `Persistent`: [`RedbStore`] for disk-backed ACID storage
//!
//! Every mutating operation of the core goes through a `&mut Registrar`.
//! Within one registrar the sweep and interactive approvals and grades never
//! overlap; across processes the redb file lock and the store's
//! compare-and-swap checks keep them apart.

use crate::closure::{ClosureSummary, close_module};
use crate::directory::DirectoryImport;
use crate::failed::{FailedSubjectRecord, GradeOutcome};
use crate::pipeline::{ApprovalOutcome, GradeEffect, approve_recovery, grade_recovery};
use crate::record::StudentAcademicRecord;
use crate::store::{AcademicStore, MemoryStore, RedbStore, StoreSnapshot};
use crate::sweep::{SweepReport, run_scheduled_sweep};
use crate::{
    CourseId, CursusError, GlobalStatus, ProgramId, ProgramStatus, RecordId, StudentId, SubjectId,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

/// Storage backend for a Registrar.
#[derive(Debug)]
pub enum StorageBackend {
    /// In-memory store (fast, volatile).
    InMemory(MemoryStore),
    /// Disk-backed store using redb (ACID, persistent).
    Persistent(RedbStore),
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::InMemory(MemoryStore::new())
    }
}

/// What an ingestion wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestCounts {
    pub programs: usize,
    pub subjects: usize,
    pub courses: usize,
    /// (student, course) grade sets replaced.
    pub grade_sets: usize,
    pub students_created: usize,
    /// Students already known; their academic position was left untouched.
    pub students_kept: usize,
}

/// Owner of the store and entry point for every core operation.
#[derive(Debug, Default)]
pub struct Registrar {
    backend: StorageBackend,
}

impl Registrar {
    /// Empty in-memory registrar.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_store(store: MemoryStore) -> Self {
        Self {
            backend: StorageBackend::InMemory(store),
        }
    }

    /// Open or create a redb database at the given path.
    pub fn with_redb(path: impl AsRef<Path>) -> Result<Self, CursusError> {
        Ok(Self {
            backend: StorageBackend::Persistent(RedbStore::open(path)?),
        })
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, StorageBackend::Persistent(_))
    }

    /// The in-memory store, or `None` for persistent backends.
    #[must_use]
    pub fn memory_store(&self) -> Option<&MemoryStore> {
        match &self.backend {
            StorageBackend::InMemory(store) => Some(store),
            StorageBackend::Persistent(_) => None,
        }
    }

    /// Read access to whichever backend is active.
    #[must_use]
    pub fn store(&self) -> &dyn AcademicStore {
        match &self.backend {
            StorageBackend::InMemory(store) => store,
            StorageBackend::Persistent(store) => store,
        }
    }

    fn store_mut(&mut self) -> &mut dyn AcademicStore {
        match &mut self.backend {
            StorageBackend::InMemory(store) => store,
            StorageBackend::Persistent(store) => store,
        }
    }

    // =========================================================================
    // CORE OPERATIONS
    // =========================================================================

    /// Close a module now. Not guarded: the sweep's closure rows are the guard.
    pub fn close_module(
        &mut self,
        module: u32,
        program: Option<ProgramId>,
    ) -> Result<ClosureSummary, CursusError> {
        close_module(self.store_mut(), module, program)
    }

    /// Run the daily sweep as of `today`.
    pub fn run_scheduled_sweep(&mut self, today: NaiveDate) -> SweepReport {
        run_scheduled_sweep(self.store_mut(), today)
    }

    pub fn approve_recovery(
        &mut self,
        record: RecordId,
        approve: bool,
    ) -> Result<ApprovalOutcome, CursusError> {
        approve_recovery(self.store_mut(), record, approve)
    }

    pub fn grade_recovery(
        &mut self,
        student: StudentId,
        course: CourseId,
        subject: Option<SubjectId>,
        outcome: GradeOutcome,
    ) -> Result<GradeEffect, CursusError> {
        grade_recovery(self.store_mut(), student, course, subject, outcome)
    }

    /// Pure status derivation, exposed here for API symmetry.
    #[must_use]
    pub fn derive_estado(statuses: &BTreeMap<ProgramId, ProgramStatus>) -> GlobalStatus {
        crate::status::derive_estado(statuses)
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    pub fn student(&self, id: StudentId) -> Result<StudentAcademicRecord, CursusError> {
        self.store()
            .student(id)?
            .ok_or(CursusError::StudentNotFound(id))
    }

    /// Derived global status of a student.
    pub fn estado_of(&self, id: StudentId) -> Result<GlobalStatus, CursusError> {
        Ok(self.student(id)?.estado())
    }

    /// Failed subject records, optionally restricted to one student.
    pub fn records(
        &self,
        student: Option<StudentId>,
    ) -> Result<Vec<FailedSubjectRecord>, CursusError> {
        let records = self.store().failed_records()?;
        Ok(match student {
            Some(id) => records.into_iter().filter(|r| r.student_id == id).collect(),
            None => records,
        })
    }

    pub fn snapshot(&self) -> Result<StoreSnapshot, CursusError> {
        self.store().snapshot()
    }

    // =========================================================================
    // DIRECTORY DATA
    // =========================================================================

    /// Apply a batch of registry data.
    ///
    /// Re-ingesting the same batch is harmless:
    /// - programs, subjects and grade sets are replaced
    /// - courses are replaced, but removals recorded here survive and removed
    ///   students are filtered out of the incoming roster
    /// - students are only created; known students keep their progress
    pub fn ingest(&mut self, import: DirectoryImport) -> Result<IngestCounts, CursusError> {
        import.validate()?;
        let mut counts = IngestCounts::default();
        let store = self.store_mut();

        for program in import.programs {
            store.put_program(program)?;
            counts.programs += 1;
        }
        for subject in import.subjects {
            store.put_subject(subject)?;
            counts.subjects += 1;
        }
        for mut course in import.courses {
            if let Some(existing) = store.course(course.id)? {
                course.removed_student_ids.extend(existing.removed_student_ids);
            }
            for student in std::mem::take(&mut course.student_ids) {
                if let Err(e) = course.enroll(student) {
                    debug!(course = %course.id, student = %student, error = %e, "roster entry skipped");
                }
            }
            store.put_course(course)?;
            counts.courses += 1;
        }

        let mut grade_sets: BTreeMap<(StudentId, CourseId), Vec<_>> = BTreeMap::new();
        for grade in import.grades {
            grade_sets
                .entry((grade.student_id, grade.course_id))
                .or_default()
                .push(grade);
        }
        for ((student, course), grades) in grade_sets {
            store.put_grades(student, course, grades)?;
            counts.grade_sets += 1;
        }

        for mut student in import.students {
            if store.student(student.student_id)?.is_some() {
                counts.students_kept += 1;
                continue;
            }
            student.version = 0;
            store.save_student(&mut student)?;
            counts.students_created += 1;
        }

        info!(
            programs = counts.programs,
            subjects = counts.subjects,
            courses = counts.courses,
            grade_sets = counts.grade_sets,
            students_created = counts.students_created,
            "directory ingested"
        );
        Ok(counts)
    }

    /// Replace the whole state with a snapshot.
    ///
    /// In-memory registrars swap their store; persistent ones require an
    /// empty database.
    pub fn restore(&mut self, snapshot: StoreSnapshot) -> Result<(), CursusError> {
        match &mut self.backend {
            StorageBackend::InMemory(store) => *store = MemoryStore::from(snapshot),
            StorageBackend::Persistent(store) => store.restore(snapshot)?,
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
