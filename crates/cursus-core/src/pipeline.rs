//! # Recovery Approval Pipeline
//!
//! Two-party consent on each [`FailedSubjectRecord`]: the administrator
//! approves or rejects, then the instructor grades the recovery.
//!
//! Both steps have immediate effects that do not wait for the recovery close:
//! - administrator rejection removes the student from the course and fails the program
//! - the last approving grade of a course reinstates the student; when the
//!   course has no recovery window for the module, the student also moves on
//! - once every approved record is graded and any grade is a rejection, the
//!   student is removed, whichever grade completed the set

use crate::enrollment::unenroll;
use crate::failed::{FailedSubjectRecord, GradeOutcome, RecoveryState, Resolution};
use crate::record::StudentAcademicRecord;
use crate::store::AcademicStore;
use crate::{CourseId, CursusError, ProgramStatus, RecordId, StudentId, SubjectId};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Result of an administrator decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalOutcome {
    pub record: RecordId,
    pub state: RecoveryState,
    /// `false` when the decision repeated an existing approval.
    pub changed: bool,
    /// The student was removed from the course.
    pub removed: bool,
}

/// Immediate effect of an instructor grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradeEffect {
    /// Grade stored; resolution waits for more grades or the recovery close.
    Recorded,
    /// Every outstanding record was approved; the program status was restored.
    /// Without a recovery window the student was also promoted or graduated.
    Reinstated(ProgramStatus),
    /// A rejection completed the set; the student was removed from the course.
    Removed,
}

/// Apply an administrator decision to a failed subject record.
pub fn approve_recovery<S: AcademicStore + ?Sized>(
    store: &mut S,
    id: RecordId,
    approve: bool,
) -> Result<ApprovalOutcome, CursusError> {
    let mut record = store.failed_record(id)?.ok_or(CursusError::RecordNotFound(id))?;
    if record.recovery_processed() {
        return Err(CursusError::StateConflict(format!(
            "record {} is already processed",
            id
        )));
    }
    let mut student = store
        .student(record.student_id)?
        .ok_or(CursusError::StudentNotFound(record.student_id))?;
    let student_module = student.module(record.program_id).unwrap_or(0);
    if student_module != record.module_number {
        return Err(CursusError::ModuleMismatch {
            record_module: record.module_number,
            student_module,
        });
    }

    let changed = record.admin_decide(approve)?;
    let mut removed = false;
    if changed {
        store.update_failed_record(&record)?;
        if record.recovery_rejected() {
            unenroll(store, &mut student, record.course_id)?;
            student.fail(record.program_id);
            store.save_student(&mut student)?;
            removed = true;
        }
        info!(
            record = %id,
            student = %record.student_id,
            state = %record.state,
            "administrator decision recorded"
        );
    }

    Ok(ApprovalOutcome {
        record: id,
        state: record.state,
        changed,
        removed,
    })
}

/// Record the instructor's grade on the active record for a subject.
///
/// `subject` is `None` for course-level records.
pub fn grade_recovery<S: AcademicStore + ?Sized>(
    store: &mut S,
    student: StudentId,
    course: CourseId,
    subject: Option<SubjectId>,
    outcome: GradeOutcome,
) -> Result<GradeEffect, CursusError> {
    let mut record =
        store
            .active_record(student, course, subject)?
            .ok_or(CursusError::NoActiveRecord {
                student,
                course,
                subject,
            })?;

    if record.teacher_grade(outcome)? {
        store.update_failed_record(&record)?;
        info!(
            record = %record.id,
            student = %student,
            outcome = outcome.as_str(),
            "recovery graded"
        );
    }

    let outstanding: Vec<FailedSubjectRecord> = store
        .records_for(student, course)?
        .into_iter()
        .filter(|r| !r.recovery_processed())
        .collect();

    match outcome {
        GradeOutcome::Approved => match try_reinstate(store, &record, &outstanding)? {
            // An approval can be the grade that completes a set holding a rejection
            GradeEffect::Recorded => try_remove(store, &record, &outstanding),
            effect => Ok(effect),
        },
        GradeOutcome::Rejected => try_remove(store, &record, &outstanding),
    }
}

/// Restore the student when every outstanding record of the course, and of
/// any sibling course in the same module, is fully approved.
fn try_reinstate<S: AcademicStore + ?Sized>(
    store: &mut S,
    record: &FailedSubjectRecord,
    outstanding: &[FailedSubjectRecord],
) -> Result<GradeEffect, CursusError> {
    if !outstanding.iter().all(FailedSubjectRecord::is_fully_approved) {
        return Ok(GradeEffect::Recorded);
    }
    let program_id = record.program_id;
    let module = record.module_number;
    let mut student = load_student(store, record.student_id)?;
    if !student.is_at(program_id, module, ProgramStatus::PendingRecovery) {
        return Ok(GradeEffect::Recorded);
    }
    let sibling_blocks = store.records_for_module(program_id, module)?.iter().any(|r| {
        r.student_id == record.student_id
            && r.course_id != record.course_id
            && !r.recovery_processed()
            && !r.is_fully_approved()
    });
    if sibling_blocks {
        return Ok(GradeEffect::Recorded);
    }

    let program = store
        .program(program_id)?
        .ok_or(CursusError::ProgramNotFound(program_id))?;
    if has_recovery_window(store, record.course_id, module)? {
        // The recovery close advances the student
        let status = if program.is_final_module(module) {
            student.promotion_pending.remove(&program_id);
            ProgramStatus::Graduated
        } else {
            ProgramStatus::Active
        };
        student.set_status(program_id, status);
        store.save_student(&mut student)?;
        info!(student = %student.student_id, program = %program_id, module, status = %status, "reinstated after recovery");
        return Ok(GradeEffect::Reinstated(status));
    }

    // No recovery close will ever come for this module: settle it now
    let advancement = student.promote(program_id, program.max_modules);
    store.save_student(&mut student)?;
    let mut settled = outstanding.to_vec();
    for sibling in store.records_for_module(program_id, module)? {
        let open_elsewhere = sibling.student_id == record.student_id
            && sibling.course_id != record.course_id
            && !sibling.recovery_processed();
        if open_elsewhere && !has_recovery_window(store, sibling.course_id, module)? {
            settled.push(sibling);
        }
    }
    for mut approved in settled {
        approved.process(Resolution::Promoted)?;
        store.update_failed_record(&approved)?;
    }
    let status = student.status(program_id).unwrap_or(ProgramStatus::Active);
    info!(
        student = %student.student_id,
        program = %program_id,
        module,
        advancement = ?advancement,
        "reinstated and advanced without a recovery window"
    );
    Ok(GradeEffect::Reinstated(status))
}

/// Remove the student once every admin-approved record is graded and at
/// least one grade is a rejection.
fn try_remove<S: AcademicStore + ?Sized>(
    store: &mut S,
    record: &FailedSubjectRecord,
    outstanding: &[FailedSubjectRecord],
) -> Result<GradeEffect, CursusError> {
    let approved: Vec<&FailedSubjectRecord> =
        outstanding.iter().filter(|r| r.recovery_approved()).collect();
    let all_graded = approved.iter().all(|r| r.recovery_completed());
    let any_rejected = approved
        .iter()
        .any(|r| r.teacher_graded_status() == Some(GradeOutcome::Rejected));
    if !(all_graded && any_rejected) {
        return Ok(GradeEffect::Recorded);
    }

    let mut student = load_student(store, record.student_id)?;
    unenroll(store, &mut student, record.course_id)?;
    student.fail(record.program_id);
    store.save_student(&mut student)?;
    info!(student = %student.student_id, course = %record.course_id, "removed after rejected recovery");
    Ok(GradeEffect::Removed)
}

fn has_recovery_window<S: AcademicStore + ?Sized>(
    store: &S,
    course: CourseId,
    module: u32,
) -> Result<bool, CursusError> {
    Ok(store
        .course(course)?
        .is_some_and(|c| c.recovery_close(module).is_some()))
}

fn load_student<S: AcademicStore + ?Sized>(
    store: &S,
    id: StudentId,
) -> Result<StudentAcademicRecord, CursusError> {
    store.student(id)?.ok_or(CursusError::StudentNotFound(id))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{Course, ModuleDates, Program};
    use crate::store::MemoryStore;
    use crate::{ProgramId, Score};
    use chrono::NaiveDate;

    const P: ProgramId = ProgramId(1);
    const C: CourseId = CourseId(10);
    const S: StudentId = StudentId(1);

    /// Student at module `module` of a 2-module program, pending recovery on
    /// the given subjects of course `C`.
    fn setup(module: u32, subjects: &[u64]) -> (MemoryStore, Vec<RecordId>) {
        let mut store = MemoryStore::new();
        store.put_program(Program::new(P, 2)).expect("program");
        let mut course = Course::new(C, P);
        course.student_ids.insert(S);
        store.put_course(course).expect("course");
        let mut student = StudentAcademicRecord::new(S)
            .at_module(P, module)
            .with_group_label("G1");
        student.set_status(P, ProgramStatus::PendingRecovery);
        store.save_student(&mut student).expect("student");

        let ids = subjects
            .iter()
            .map(|&subject| {
                store
                    .insert_failed_record(FailedSubjectRecord::pending(
                        S,
                        C,
                        P,
                        Some(SubjectId(subject)),
                        module,
                        Score(200),
                    ))
                    .expect("record")
            })
            .collect();
        (store, ids)
    }

    fn status(store: &MemoryStore) -> Option<ProgramStatus> {
        store.student(S).expect("read").expect("exists").status(P)
    }

    fn with_recovery_window(store: &mut MemoryStore, module: u32) {
        let mut course = store.course(C).expect("read").expect("exists");
        course.module_dates.insert(
            module,
            ModuleDates {
                recovery_close: NaiveDate::from_ymd_opt(2025, 3, 31),
                ..ModuleDates::default()
            },
        );
        store.put_course(course).expect("course");
    }

    fn module(store: &MemoryStore) -> Option<u32> {
        store.student(S).expect("read").expect("exists").module(P)
    }

    #[test]
    fn approve_then_grade_reinstates_immediately() {
        let (mut store, ids) = setup(1, &[1]);
        with_recovery_window(&mut store, 1);

        let outcome = approve_recovery(&mut store, ids[0], true).expect("approve");
        assert!(outcome.changed);
        assert_eq!(outcome.state, RecoveryState::AdminApproved);

        let effect =
            grade_recovery(&mut store, S, C, Some(SubjectId(1)), GradeOutcome::Approved).expect("grade");
        assert_eq!(effect, GradeEffect::Reinstated(ProgramStatus::Active));
        assert_eq!(status(&store), Some(ProgramStatus::Active));
        // Advancement waits for the recovery close
        assert_eq!(module(&store), Some(1));
        let record = store.failed_record(ids[0]).expect("read").expect("exists");
        assert!(record.is_fully_approved());
    }

    #[test]
    fn final_module_reinstates_as_graduated() {
        let (mut store, ids) = setup(2, &[1]);
        with_recovery_window(&mut store, 2);
        approve_recovery(&mut store, ids[0], true).expect("approve");
        let effect =
            grade_recovery(&mut store, S, C, Some(SubjectId(1)), GradeOutcome::Approved).expect("grade");
        assert_eq!(effect, GradeEffect::Reinstated(ProgramStatus::Graduated));
    }

    #[test]
    fn reinstatement_without_recovery_window_promotes() {
        let (mut store, ids) = setup(1, &[1]);
        approve_recovery(&mut store, ids[0], true).expect("approve");

        let effect =
            grade_recovery(&mut store, S, C, Some(SubjectId(1)), GradeOutcome::Approved).expect("grade");
        assert_eq!(effect, GradeEffect::Reinstated(ProgramStatus::Active));
        assert_eq!(module(&store), Some(2));
        let record = store.failed_record(ids[0]).expect("read").expect("exists");
        assert_eq!(record.state, RecoveryState::Processed(Resolution::Promoted));
    }

    #[test]
    fn reinstatement_without_recovery_window_graduates_at_final_module() {
        let (mut store, ids) = setup(2, &[1]);
        approve_recovery(&mut store, ids[0], true).expect("approve");

        let effect =
            grade_recovery(&mut store, S, C, Some(SubjectId(1)), GradeOutcome::Approved).expect("grade");
        assert_eq!(effect, GradeEffect::Reinstated(ProgramStatus::Graduated));
        assert_eq!(module(&store), Some(2));
        assert!(store.failed_record(ids[0]).expect("read").expect("exists").recovery_processed());
    }

    #[test]
    fn reinstatement_waits_for_every_subject() {
        let (mut store, ids) = setup(1, &[1, 2]);
        for id in &ids {
            approve_recovery(&mut store, *id, true).expect("approve");
        }
        let first =
            grade_recovery(&mut store, S, C, Some(SubjectId(1)), GradeOutcome::Approved).expect("grade");
        assert_eq!(first, GradeEffect::Recorded);
        assert_eq!(status(&store), Some(ProgramStatus::PendingRecovery));

        let second =
            grade_recovery(&mut store, S, C, Some(SubjectId(2)), GradeOutcome::Approved).expect("grade");
        assert_eq!(second, GradeEffect::Reinstated(ProgramStatus::Active));
    }

    #[test]
    fn admin_rejection_removes_immediately() {
        let (mut store, ids) = setup(1, &[1]);

        let outcome = approve_recovery(&mut store, ids[0], false).expect("reject");
        assert!(outcome.removed);
        assert_eq!(outcome.state, RecoveryState::AdminRejected);

        let student = store.student(S).expect("read").expect("exists");
        assert_eq!(student.status(P), Some(ProgramStatus::Failed));
        assert_eq!(student.group_label, None);
        let course = store.course(C).expect("read").expect("exists");
        assert!(!course.is_enrolled(S));
        assert!(course.removed_student_ids.contains(&S));
    }

    #[test]
    fn teacher_rejection_removes_once_all_graded() {
        let (mut store, ids) = setup(1, &[1, 2]);
        for id in &ids {
            approve_recovery(&mut store, *id, true).expect("approve");
        }
        let first =
            grade_recovery(&mut store, S, C, Some(SubjectId(1)), GradeOutcome::Rejected).expect("grade");
        assert_eq!(first, GradeEffect::Recorded);

        // The approval completes the set; the earlier rejection decides it
        let second =
            grade_recovery(&mut store, S, C, Some(SubjectId(2)), GradeOutcome::Approved).expect("grade");
        assert_eq!(second, GradeEffect::Removed);
        assert_eq!(status(&store), Some(ProgramStatus::Failed));
        assert!(!store.course(C).expect("read").expect("exists").is_enrolled(S));
    }

    #[test]
    fn single_rejection_removes() {
        let (mut store, ids) = setup(1, &[1]);
        approve_recovery(&mut store, ids[0], true).expect("approve");
        let effect =
            grade_recovery(&mut store, S, C, Some(SubjectId(1)), GradeOutcome::Rejected).expect("grade");
        assert_eq!(effect, GradeEffect::Removed);
        assert!(!store.course(C).expect("read").expect("exists").is_enrolled(S));
    }

    #[test]
    fn grading_without_admin_approval_conflicts() {
        let (mut store, _) = setup(1, &[1]);
        let err = grade_recovery(&mut store, S, C, Some(SubjectId(1)), GradeOutcome::Approved);
        assert!(matches!(err, Err(CursusError::StateConflict(_))));
    }

    #[test]
    fn grading_unknown_subject_is_not_found() {
        let (mut store, _) = setup(1, &[1]);
        let err = grade_recovery(&mut store, S, C, Some(SubjectId(9)), GradeOutcome::Approved);
        assert!(matches!(err, Err(CursusError::NoActiveRecord { .. })));
    }

    #[test]
    fn approval_checks_module() {
        let (mut store, ids) = setup(1, &[1]);
        let mut student = store.student(S).expect("read").expect("exists");
        student.program_modules.insert(P, 2);
        store.save_student(&mut student).expect("save");

        let err = approve_recovery(&mut store, ids[0], true);
        assert!(matches!(
            err,
            Err(CursusError::ModuleMismatch {
                record_module: 1,
                student_module: 2
            })
        ));
    }

    #[test]
    fn approval_errors() {
        let (mut store, ids) = setup(1, &[1]);
        assert!(matches!(
            approve_recovery(&mut store, RecordId(99), true),
            Err(CursusError::RecordNotFound(_))
        ));

        let mut record = store.failed_record(ids[0]).expect("read").expect("exists");
        record.process(Resolution::Removed).expect("process");
        store.update_failed_record(&record).expect("update");
        assert!(matches!(
            approve_recovery(&mut store, ids[0], true),
            Err(CursusError::StateConflict(_))
        ));
    }

    #[test]
    fn repeated_approval_is_a_noop() {
        let (mut store, ids) = setup(1, &[1]);
        approve_recovery(&mut store, ids[0], true).expect("approve");
        let again = approve_recovery(&mut store, ids[0], true).expect("approve again");
        assert!(!again.changed);
        assert!(!again.removed);
    }
}
