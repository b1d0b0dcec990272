//! # Module Closure Engine
//!
//! Evaluates grades at a module's close. Students with failing subjects get
//! one [`FailedSubjectRecord`] per subject and move to
//! `pendiente_recuperacion`; students who pass are promoted, or have their
//! promotion deferred when a course configures a recovery window.
//!
//! `close_module` is not self-idempotent. Repeated runs are guarded by the
//! [`ModuleClosure`] audit row the sweep writes.

use crate::directory::{Course, Program};
use crate::failed::FailedSubjectRecord;
use crate::grading::{course_covers_module, failing_subjects};
use crate::record::{Advancement, StudentAcademicRecord};
use crate::store::AcademicStore;
use crate::{CursusError, ProgramId, ProgramStatus};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Counts produced by one `close_module` run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosureSummary {
    /// Students moved to the next module.
    pub promoted: u32,
    /// Students who completed their final module.
    pub graduated: u32,
    /// Students moved to `pendiente_recuperacion`.
    pub recovery_pending: u32,
    /// Failed subject records created.
    pub failed_subjects_count: u32,
    /// Students whose promotion waits for the recovery close.
    pub deferred: u32,
}

impl ClosureSummary {
    fn absorb(&mut self, other: Self) {
        self.promoted = self.promoted.saturating_add(other.promoted);
        self.graduated = self.graduated.saturating_add(other.graduated);
        self.recovery_pending = self.recovery_pending.saturating_add(other.recovery_pending);
        self.failed_subjects_count = self
            .failed_subjects_count
            .saturating_add(other.failed_subjects_count);
        self.deferred = self.deferred.saturating_add(other.deferred);
    }
}

/// Audit row: a (program, module) pair has been closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleClosure {
    pub program_id: ProgramId,
    pub module_number: u32,
    pub closed_date: NaiveDate,
    pub result: ClosureSummary,
}

/// Close `module` for one program, or for every program when `program` is `None`.
///
/// Programs with fewer than `module` modules are skipped. Errors propagate;
/// writes already made stay in place and a retry reuses existing records.
pub fn close_module<S: AcademicStore + ?Sized>(
    store: &mut S,
    module: u32,
    program: Option<ProgramId>,
) -> Result<ClosureSummary, CursusError> {
    if module < 1 {
        return Err(CursusError::InvalidModuleNumber(module));
    }
    let programs = match program {
        Some(id) => vec![store.program(id)?.ok_or(CursusError::ProgramNotFound(id))?],
        None => store.programs()?,
    };

    let mut summary = ClosureSummary::default();
    for program in programs {
        if program.max_modules < module {
            debug!(program = %program.id, module, "module beyond program length, skipped");
            continue;
        }
        summary.absorb(close_program_module(store, &program, module)?);
    }
    Ok(summary)
}

/// Close one (program, module) pair.
fn close_program_module<S: AcademicStore + ?Sized>(
    store: &mut S,
    program: &Program,
    module: u32,
) -> Result<ClosureSummary, CursusError> {
    let mut courses = Vec::new();
    for course in store.courses_for_program(program.id)? {
        if course_covers_module(store, &course, module)? {
            courses.push(course);
        }
    }

    let mut summary = ClosureSummary::default();
    for mut student in store.students()? {
        if !student.is_at(program.id, module, ProgramStatus::Active) {
            continue;
        }
        let enrolled: Vec<&Course> = courses
            .iter()
            .filter(|c| c.is_enrolled(student.student_id))
            .collect();
        if enrolled.is_empty() {
            debug!(student = %student.student_id, program = %program.id, module, "no enrolled course, skipped");
            continue;
        }
        close_student(store, program, module, &enrolled, &mut student, &mut summary)?;
    }

    info!(
        program = %program.id,
        module,
        promoted = summary.promoted,
        graduated = summary.graduated,
        recovery_pending = summary.recovery_pending,
        failed_subjects = summary.failed_subjects_count,
        deferred = summary.deferred,
        "module closed"
    );
    Ok(summary)
}

fn close_student<S: AcademicStore + ?Sized>(
    store: &mut S,
    program: &Program,
    module: u32,
    courses: &[&Course],
    student: &mut StudentAcademicRecord,
    summary: &mut ClosureSummary,
) -> Result<(), CursusError> {
    let mut failed_any = false;
    for course in courses {
        for failing in failing_subjects(store, student.student_id, course, module)? {
            failed_any = true;
            if store
                .active_record(student.student_id, course.id, failing.subject)?
                .is_some()
            {
                continue;
            }
            let record = FailedSubjectRecord::pending(
                student.student_id,
                course.id,
                program.id,
                failing.subject,
                module,
                failing.average,
            );
            let id = store.insert_failed_record(record)?;
            summary.failed_subjects_count = summary.failed_subjects_count.saturating_add(1);
            debug!(
                record = %id,
                student = %student.student_id,
                course = %course.id,
                average = %failing.average,
                "failed subject recorded"
            );
        }
    }

    if failed_any {
        student.set_status(program.id, ProgramStatus::PendingRecovery);
        summary.recovery_pending = summary.recovery_pending.saturating_add(1);
    } else if courses.iter().any(|c| c.recovery_close(module).is_some()) {
        student.defer_promotion(program.id);
        summary.deferred = summary.deferred.saturating_add(1);
    } else {
        match student.promote(program.id, program.max_modules) {
            Advancement::Promoted(_) => summary.promoted = summary.promoted.saturating_add(1),
            Advancement::Graduated => summary.graduated = summary.graduated.saturating_add(1),
            Advancement::Unchanged => {}
        }
    }
    store.save_student(student)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{Grade, ModuleDates, Subject};
    use crate::failed::RecoveryState;
    use crate::store::MemoryStore;
    use crate::{CourseId, Score, StudentId, SubjectId};

    const P: ProgramId = ProgramId(1);
    const C: CourseId = CourseId(10);

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    fn store_with(recovery_close: Option<NaiveDate>, max_modules: u32) -> MemoryStore {
        let mut store = MemoryStore::new();
        store.put_program(Program::new(P, max_modules)).expect("program");
        for (id, module) in [(1, 1), (2, 1), (3, 2)] {
            store
                .put_subject(Subject {
                    id: SubjectId(id),
                    program_id: P,
                    module_number: module,
                    name: String::new(),
                })
                .expect("subject");
        }
        let mut course = Course::new(C, P);
        course.subject_ids = [SubjectId(1), SubjectId(2), SubjectId(3)].into();
        course.student_ids = [StudentId(1), StudentId(2)].into();
        if recovery_close.is_some() {
            course.module_dates.insert(
                1,
                ModuleDates {
                    recovery_close,
                    ..ModuleDates::default()
                },
            );
        }
        store.put_course(course).expect("course");
        for id in [1, 2] {
            let mut student = StudentAcademicRecord::new(StudentId(id)).enrolled_in(P);
            store.save_student(&mut student).expect("student");
        }
        store
    }

    fn grade(store: &mut MemoryStore, student: u64, values: &[(u64, u16)]) {
        let grades = values
            .iter()
            .map(|&(subject, value)| Grade {
                student_id: StudentId(student),
                course_id: C,
                subject_id: SubjectId(subject),
                value: Score(value),
            })
            .collect();
        store.put_grades(StudentId(student), C, grades).expect("grades");
    }

    fn student(store: &MemoryStore, id: u64) -> StudentAcademicRecord {
        store.student(StudentId(id)).expect("read").expect("exists")
    }

    #[test]
    fn rejects_module_zero() {
        let mut store = MemoryStore::new();
        assert!(matches!(
            close_module(&mut store, 0, None),
            Err(CursusError::InvalidModuleNumber(0))
        ));
    }

    #[test]
    fn unknown_program_is_not_found() {
        let mut store = MemoryStore::new();
        assert!(matches!(
            close_module(&mut store, 1, Some(ProgramId(9))),
            Err(CursusError::ProgramNotFound(_))
        ));
    }

    #[test]
    fn failing_subject_creates_record_and_pending_status() {
        let mut store = store_with(None, 3);
        grade(&mut store, 1, &[(1, 250), (2, 400)]);
        grade(&mut store, 2, &[(1, 400), (2, 400)]);

        let summary = close_module(&mut store, 1, Some(P)).expect("close");

        assert_eq!(summary.recovery_pending, 1);
        assert_eq!(summary.failed_subjects_count, 1);
        assert_eq!(summary.promoted, 1);

        let failed = student(&store, 1);
        assert_eq!(failed.status(P), Some(ProgramStatus::PendingRecovery));
        assert_eq!(failed.module(P), Some(1));

        let records = store.failed_records().expect("records");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].subject_id, Some(SubjectId(1)));
        assert_eq!(records[0].average, Score(250));
        assert_eq!(records[0].state, RecoveryState::Pending);

        let passed = student(&store, 2);
        assert_eq!(passed.module(P), Some(2));
        assert_eq!(passed.status(P), Some(ProgramStatus::Active));
    }

    #[test]
    fn recovery_window_defers_promotion() {
        let mut store = store_with(Some(date("2025-06-30")), 3);
        grade(&mut store, 1, &[(1, 350)]);

        let summary = close_module(&mut store, 1, None).expect("close");

        assert_eq!(summary.deferred, 2);
        assert_eq!(summary.promoted, 0);
        let s = student(&store, 1);
        assert_eq!(s.module(P), Some(1));
        assert!(s.is_promotion_pending(P));
    }

    #[test]
    fn final_module_graduates() {
        let mut store = store_with(None, 1);
        grade(&mut store, 1, &[(1, 500)]);

        let summary = close_module(&mut store, 1, Some(P)).expect("close");

        assert_eq!(summary.graduated, 2);
        assert_eq!(student(&store, 1).status(P), Some(ProgramStatus::Graduated));
        assert_eq!(student(&store, 1).estado(), ProgramStatus::Graduated);
    }

    #[test]
    fn programs_shorter_than_module_are_skipped() {
        let mut store = store_with(None, 1);
        let summary = close_module(&mut store, 2, None).expect("close");
        assert_eq!(summary, ClosureSummary::default());
    }

    #[test]
    fn rerun_reuses_active_records() {
        let mut store = store_with(None, 3);
        grade(&mut store, 1, &[(1, 100)]);
        close_module(&mut store, 1, Some(P)).expect("close");

        // Put the student back to active to force a second evaluation
        let mut s = student(&store, 1);
        s.set_status(P, ProgramStatus::Active);
        store.save_student(&mut s).expect("save");

        let summary = close_module(&mut store, 1, Some(P)).expect("close again");
        assert_eq!(summary.failed_subjects_count, 0);
        assert_eq!(summary.recovery_pending, 1);
        assert_eq!(store.failed_records().expect("records").len(), 1);
    }

    #[test]
    fn non_active_students_are_ignored() {
        let mut store = store_with(None, 3);
        let mut s = student(&store, 1);
        s.set_status(P, ProgramStatus::Withdrawn);
        store.save_student(&mut s).expect("save");

        let summary = close_module(&mut store, 1, Some(P)).expect("close");
        assert_eq!(summary.promoted, 1);
        assert_eq!(student(&store, 1).module(P), Some(1));
    }

    #[test]
    fn course_level_fallback_without_subjects() {
        let mut store = MemoryStore::new();
        store.put_program(Program::new(P, 2)).expect("program");
        let mut course = Course::new(C, P);
        course.student_ids.insert(StudentId(1));
        store.put_course(course).expect("course");
        let mut s = StudentAcademicRecord::new(StudentId(1)).enrolled_in(P);
        store.save_student(&mut s).expect("student");
        grade(&mut store, 1, &[(99, 200)]);

        close_module(&mut store, 1, Some(P)).expect("close");

        let records = store.failed_records().expect("records");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].subject_id, None);
    }
}
