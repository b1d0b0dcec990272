//! In-memory `AcademicStore` backed by `BTreeMap`s.

use super::{AcademicStore, StoreSnapshot, ensure_not_processed, ensure_unique_active, ensure_version};
use crate::closure::ModuleClosure;
use crate::directory::{Course, Grade, Program, Subject};
use crate::failed::FailedSubjectRecord;
use crate::record::StudentAcademicRecord;
use crate::{CourseId, CursusError, ProgramId, RecordId, StudentId, SubjectId};
use std::collections::BTreeMap;

/// Volatile store. Persist it with [`crate::formats::store_to_bytes`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStore {
    programs: BTreeMap<ProgramId, Program>,
    subjects: BTreeMap<SubjectId, Subject>,
    courses: BTreeMap<CourseId, Course>,
    /// (student, course) -> grades in insertion order
    grades: BTreeMap<(StudentId, CourseId), Vec<Grade>>,
    students: BTreeMap<StudentId, StudentAcademicRecord>,
    failed: BTreeMap<RecordId, FailedSubjectRecord>,
    closures: BTreeMap<(ProgramId, u32), ModuleClosure>,
    next_record_id: u64,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_record_id: 1,
            ..Self::default()
        }
    }
}

impl From<StoreSnapshot> for MemoryStore {
    fn from(snapshot: StoreSnapshot) -> Self {
        let mut grades: BTreeMap<(StudentId, CourseId), Vec<Grade>> = BTreeMap::new();
        for grade in snapshot.grades {
            grades
                .entry((grade.student_id, grade.course_id))
                .or_default()
                .push(grade);
        }
        let failed: BTreeMap<RecordId, FailedSubjectRecord> = snapshot
            .failed_records
            .into_iter()
            .map(|r| (r.id, r))
            .collect();
        let highest = failed.keys().next_back().map_or(0, |id| id.0);
        Self {
            programs: snapshot.programs.into_iter().map(|p| (p.id, p)).collect(),
            subjects: snapshot.subjects.into_iter().map(|s| (s.id, s)).collect(),
            courses: snapshot.courses.into_iter().map(|c| (c.id, c)).collect(),
            grades,
            students: snapshot
                .students
                .into_iter()
                .map(|s| (s.student_id, s))
                .collect(),
            failed,
            closures: snapshot
                .closures
                .into_iter()
                .map(|c| ((c.program_id, c.module_number), c))
                .collect(),
            next_record_id: snapshot.next_record_id.max(highest.saturating_add(1)),
        }
    }
}

impl AcademicStore for MemoryStore {
    fn program(&self, id: ProgramId) -> Result<Option<Program>, CursusError> {
        Ok(self.programs.get(&id).cloned())
    }

    fn programs(&self) -> Result<Vec<Program>, CursusError> {
        Ok(self.programs.values().cloned().collect())
    }

    fn put_program(&mut self, program: Program) -> Result<(), CursusError> {
        program.validate()?;
        self.programs.insert(program.id, program);
        Ok(())
    }

    fn subject(&self, id: SubjectId) -> Result<Option<Subject>, CursusError> {
        Ok(self.subjects.get(&id).cloned())
    }

    fn subjects(&self) -> Result<Vec<Subject>, CursusError> {
        Ok(self.subjects.values().cloned().collect())
    }

    fn put_subject(&mut self, subject: Subject) -> Result<(), CursusError> {
        self.subjects.insert(subject.id, subject);
        Ok(())
    }

    fn course(&self, id: CourseId) -> Result<Option<Course>, CursusError> {
        Ok(self.courses.get(&id).cloned())
    }

    fn courses(&self) -> Result<Vec<Course>, CursusError> {
        Ok(self.courses.values().cloned().collect())
    }

    fn put_course(&mut self, course: Course) -> Result<(), CursusError> {
        self.courses.insert(course.id, course);
        Ok(())
    }

    fn grades_for(
        &self,
        student: StudentId,
        course: CourseId,
    ) -> Result<Vec<Grade>, CursusError> {
        Ok(self
            .grades
            .get(&(student, course))
            .cloned()
            .unwrap_or_default())
    }

    fn grades(&self) -> Result<Vec<Grade>, CursusError> {
        Ok(self.grades.values().flatten().copied().collect())
    }

    fn put_grades(
        &mut self,
        student: StudentId,
        course: CourseId,
        grades: Vec<Grade>,
    ) -> Result<(), CursusError> {
        if grades.is_empty() {
            self.grades.remove(&(student, course));
        } else {
            self.grades.insert((student, course), grades);
        }
        Ok(())
    }

    fn student(&self, id: StudentId) -> Result<Option<StudentAcademicRecord>, CursusError> {
        Ok(self.students.get(&id).cloned())
    }

    fn students(&self) -> Result<Vec<StudentAcademicRecord>, CursusError> {
        Ok(self.students.values().cloned().collect())
    }

    fn save_student(&mut self, record: &mut StudentAcademicRecord) -> Result<(), CursusError> {
        let stored = self.students.get(&record.student_id).map(|s| s.version);
        ensure_version(stored, record)?;
        record.version = record.version.saturating_add(1);
        self.students.insert(record.student_id, record.clone());
        Ok(())
    }

    fn failed_record(&self, id: RecordId) -> Result<Option<FailedSubjectRecord>, CursusError> {
        Ok(self.failed.get(&id).cloned())
    }

    fn failed_records(&self) -> Result<Vec<FailedSubjectRecord>, CursusError> {
        Ok(self.failed.values().cloned().collect())
    }

    fn insert_failed_record(
        &mut self,
        mut record: FailedSubjectRecord,
    ) -> Result<RecordId, CursusError> {
        ensure_unique_active(self.failed.values(), &record)?;
        let id = RecordId(self.next_record_id.max(1));
        self.next_record_id = id.0.saturating_add(1);
        record.id = id;
        self.failed.insert(id, record);
        Ok(id)
    }

    fn update_failed_record(&mut self, record: &FailedSubjectRecord) -> Result<(), CursusError> {
        let stored = self
            .failed
            .get_mut(&record.id)
            .ok_or(CursusError::RecordNotFound(record.id))?;
        ensure_not_processed(stored)?;
        *stored = record.clone();
        Ok(())
    }

    fn closure(
        &self,
        program: ProgramId,
        module: u32,
    ) -> Result<Option<ModuleClosure>, CursusError> {
        Ok(self.closures.get(&(program, module)).cloned())
    }

    fn closures(&self) -> Result<Vec<ModuleClosure>, CursusError> {
        Ok(self.closures.values().cloned().collect())
    }

    fn insert_closure(&mut self, closure: ModuleClosure) -> Result<bool, CursusError> {
        let key = (closure.program_id, closure.module_number);
        if self.closures.contains_key(&key) {
            return Ok(false);
        }
        self.closures.insert(key, closure);
        Ok(true)
    }

    fn next_record_id(&self) -> Result<u64, CursusError> {
        Ok(self.next_record_id.max(1))
    }
}

// =============================================================================
// TESTS
// =============================================================================
