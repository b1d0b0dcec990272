//! # Scheduled Closure Sweep
//!
//! The daily reconciliation job. Runs two passes over the whole store:
//!
//! - **Pass A**: close every (program, module) whose close date has passed
//!   and that has no [`ModuleClosure`] row yet. The row is the guard.
//! - **Pass B**: for every course module whose recovery close has passed,
//!   in order:
//!   1. retroactive repair when neither records nor a closure exist
//!   2. resolve unprocessed failed records, grouped by student
//!   3. promote students whose promotion was deferred at the close, and drop
//!      the enrollment of students who already failed the module elsewhere
//!   4. remove enrolled students still failing without a promoted record
//!
//! Every step is isolated per entity. An error is logged, added to the
//! report, and the sweep moves on. Nothing is rolled back.
//!
//! Running the sweep twice on unchanged data performs no writes the second
//! time: every step keys off a terminal state (processed records, closure
//! rows, cleared pending flags, removed enrollments).

use crate::closure::{ModuleClosure, close_module};
use crate::directory::{Course, Program};
use crate::enrollment::unenroll;
use crate::failed::{FailedSubjectRecord, RecoveryState, Resolution};
use crate::grading::failing_subjects;
use crate::record::{Advancement, StudentAcademicRecord};
use crate::store::AcademicStore;
use crate::{CourseId, CursusError, ProgramId, ProgramStatus, StudentId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

// =============================================================================
// REPORT
// =============================================================================

/// An entity the sweep could not process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepIssue {
    pub scope: String,
    pub error: String,
}

/// What one sweep run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub today: NaiveDate,
    /// Pass A closures, as (program, module).
    pub closures_run: Vec<(ProgramId, u32)>,
    /// Pass B closures run to make up for a missed Pass A.
    pub retroactive_repairs: Vec<(ProgramId, u32)>,
    pub promoted: u32,
    pub graduated: u32,
    pub removed: u32,
    pub records_processed: u32,
    pub issues: Vec<SweepIssue>,
}

impl SweepReport {
    #[must_use]
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today,
            closures_run: Vec::new(),
            retroactive_repairs: Vec::new(),
            promoted: 0,
            graduated: 0,
            removed: 0,
            records_processed: 0,
            issues: Vec::new(),
        }
    }

    /// Number of state changes the run made.
    #[must_use]
    pub fn mutations(&self) -> usize {
        self.closures_run.len()
            + self.retroactive_repairs.len()
            + self.promoted as usize
            + self.graduated as usize
            + self.removed as usize
            + self.records_processed as usize
    }

    /// `true` when the run changed nothing and hit no errors.
    #[must_use]
    pub fn is_quiet(&self) -> bool {
        self.mutations() == 0 && self.issues.is_empty()
    }

    fn issue(&mut self, scope: String, error: &CursusError) {
        warn!(scope = %scope, error = %error, "sweep step failed");
        self.issues.push(SweepIssue {
            scope,
            error: error.to_string(),
        });
    }

    fn tally(&mut self, effect: Effect) {
        match effect {
            Effect::Promoted => self.promoted = self.promoted.saturating_add(1),
            Effect::Graduated => self.graduated = self.graduated.saturating_add(1),
            Effect::Removed => self.removed = self.removed.saturating_add(1),
            Effect::Unchanged => {}
        }
    }
}

/// Outcome of one per-student step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    Promoted,
    Graduated,
    Removed,
    Unchanged,
}

impl From<Advancement> for Effect {
    fn from(advancement: Advancement) -> Self {
        match advancement {
            Advancement::Promoted(_) => Self::Promoted,
            Advancement::Graduated => Self::Graduated,
            Advancement::Unchanged => Self::Unchanged,
        }
    }
}

// =============================================================================
// ENTRY POINT
// =============================================================================

/// Run both passes for the given day.
///
/// Never fails as a whole; per-entity errors are listed in the report.
pub fn run_scheduled_sweep<S: AcademicStore + ?Sized>(store: &mut S, today: NaiveDate) -> SweepReport {
    let mut report = SweepReport::new(today);
    close_due_modules(store, today, &mut report);
    resolve_recovery_windows(store, today, &mut report);

    info!(
        today = %today,
        closures = report.closures_run.len(),
        repairs = report.retroactive_repairs.len(),
        promoted = report.promoted,
        graduated = report.graduated,
        removed = report.removed,
        records = report.records_processed,
        issues = report.issues.len(),
        "sweep finished"
    );
    report
}

// =============================================================================
// PASS A: MODULE CLOSE DATES
// =============================================================================

fn close_due_modules<S: AcademicStore + ?Sized>(
    store: &mut S,
    today: NaiveDate,
    report: &mut SweepReport,
) {
    let programs = match store.programs() {
        Ok(programs) => programs,
        Err(e) => {
            report.issue("programs".to_string(), &e);
            return;
        }
    };
    for program in programs {
        for module in 1..=program.max_modules {
            let due = program.close_date(module).is_some_and(|d| d <= today);
            if !due {
                continue;
            }
            match close_once(store, program.id, module, today) {
                Ok(true) => report.closures_run.push((program.id, module)),
                Ok(false) => {}
                Err(e) => report.issue(format!("program {} module {}", program.id, module), &e),
            }
        }
    }
}

/// Close a module unless its closure row exists. Returns `true` if it ran.
fn close_once<S: AcademicStore + ?Sized>(
    store: &mut S,
    program: ProgramId,
    module: u32,
    today: NaiveDate,
) -> Result<bool, CursusError> {
    if store.closure(program, module)?.is_some() {
        return Ok(false);
    }
    let result = close_module(store, module, Some(program))?;
    store.insert_closure(ModuleClosure {
        program_id: program,
        module_number: module,
        closed_date: today,
        result,
    })
}

// =============================================================================
// PASS B: RECOVERY CLOSE
// =============================================================================

fn resolve_recovery_windows<S: AcademicStore + ?Sized>(
    store: &mut S,
    today: NaiveDate,
    report: &mut SweepReport,
) {
    let courses = match store.courses() {
        Ok(courses) => courses,
        Err(e) => {
            report.issue("courses".to_string(), &e);
            return;
        }
    };
    for course in courses {
        let due: Vec<u32> = course
            .module_dates
            .iter()
            .filter(|(_, dates)| dates.recovery_close.is_some_and(|d| d <= today))
            .map(|(module, _)| *module)
            .collect();
        for module in due {
            resolve_window(store, today, course.id, module, report);
        }
    }
}

/// All Pass B steps for one course module.
fn resolve_window<S: AcademicStore + ?Sized>(
    store: &mut S,
    today: NaiveDate,
    course_id: CourseId,
    module: u32,
    report: &mut SweepReport,
) {
    let scope = format!("course {} module {}", course_id, module);
    let program = match load_program(store, course_id) {
        Ok(program) => program,
        Err(e) => {
            report.issue(scope, &e);
            return;
        }
    };
    if module == 0 || program.max_modules < module {
        debug!(course = %course_id, module, "recovery close outside program modules, skipped");
        return;
    }

    match repair_missed_closure(store, &program, module, today) {
        Ok(true) => report.retroactive_repairs.push((program.id, module)),
        Ok(false) => {}
        Err(e) => {
            // Resolving against a half-closed module would remove students unfairly
            report.issue(scope, &e);
            return;
        }
    }

    resolve_groups(store, &program, course_id, module, report);
    promote_direct_passes(store, &program, course_id, module, report);
    enforce_failing_averages(store, &program, course_id, module, report);
}

fn load_program<S: AcademicStore + ?Sized>(
    store: &S,
    course_id: CourseId,
) -> Result<Program, CursusError> {
    let course = store
        .course(course_id)?
        .ok_or(CursusError::CourseNotFound(course_id))?;
    store
        .program(course.program_id)?
        .ok_or(CursusError::ProgramNotFound(course.program_id))
}

fn load_course<S: AcademicStore + ?Sized>(
    store: &S,
    course_id: CourseId,
) -> Result<Course, CursusError> {
    store
        .course(course_id)?
        .ok_or(CursusError::CourseNotFound(course_id))
}

// -----------------------------------------------------------------------------
// Step 1: retroactive repair
// -----------------------------------------------------------------------------

/// Run a closure Pass A missed. Fires only when the module has neither a
/// closure row nor any failed record.
fn repair_missed_closure<S: AcademicStore + ?Sized>(
    store: &mut S,
    program: &Program,
    module: u32,
    today: NaiveDate,
) -> Result<bool, CursusError> {
    if store.closure(program.id, module)?.is_some() {
        return Ok(false);
    }
    if !store.records_for_module(program.id, module)?.is_empty() {
        return Ok(false);
    }
    warn!(program = %program.id, module, "module never closed; closing retroactively");
    let result = close_module(store, module, Some(program.id))?;
    store.insert_closure(ModuleClosure {
        program_id: program.id,
        module_number: module,
        closed_date: today,
        result,
    })
}

// -----------------------------------------------------------------------------
// Step 2: grouped record resolution
// -----------------------------------------------------------------------------

fn resolve_groups<S: AcademicStore + ?Sized>(
    store: &mut S,
    program: &Program,
    course_id: CourseId,
    module: u32,
    report: &mut SweepReport,
) {
    let records = match store.records_for_module(program.id, module) {
        Ok(records) => records,
        Err(e) => {
            report.issue(format!("course {} module {} records", course_id, module), &e);
            return;
        }
    };
    let mut groups: BTreeMap<StudentId, Vec<FailedSubjectRecord>> = BTreeMap::new();
    for record in records
        .into_iter()
        .filter(|r| r.course_id == course_id && !r.recovery_processed())
    {
        groups.entry(record.student_id).or_default().push(record);
    }

    for (student_id, group) in groups {
        let count = u32::try_from(group.len()).unwrap_or(u32::MAX);
        match resolve_group(store, program, course_id, module, student_id, group) {
            Ok(effect) => {
                report.tally(effect);
                report.records_processed = report.records_processed.saturating_add(count);
            }
            Err(e) => report.issue(format!("student {} in course {}", student_id, course_id), &e),
        }
    }
}

/// Decide a student's unresolved records for one course module.
///
/// No administrator action on any record, or any outcome short of full
/// approval on all of them, removes the student. Every record is processed.
fn resolve_group<S: AcademicStore + ?Sized>(
    store: &mut S,
    program: &Program,
    course_id: CourseId,
    module: u32,
    student_id: StudentId,
    group: Vec<FailedSubjectRecord>,
) -> Result<Effect, CursusError> {
    let verdict = if group.iter().all(FailedSubjectRecord::is_fully_approved) {
        Resolution::Promoted
    } else {
        Resolution::Removed
    };
    let mut student = store
        .student(student_id)?
        .ok_or(CursusError::StudentNotFound(student_id))?;

    // Student first: a crash before the records are processed leaves a retryable state
    let effect = match verdict {
        Resolution::Promoted => promote_if_clear(store, program, course_id, module, &mut student)?,
        Resolution::Removed => remove_from_course(store, program, course_id, module, &mut student)?,
    };

    for mut record in group {
        record.process(verdict)?;
        store.update_failed_record(&record)?;
    }
    debug!(student = %student_id, course = %course_id, module, verdict = ?verdict, "recovery resolved");
    Ok(effect)
}

// -----------------------------------------------------------------------------
// Step 3: deferred promotions
// -----------------------------------------------------------------------------

fn promote_direct_passes<S: AcademicStore + ?Sized>(
    store: &mut S,
    program: &Program,
    course_id: CourseId,
    module: u32,
    report: &mut SweepReport,
) {
    let scope = || format!("course {} module {} direct pass", course_id, module);
    let (course, recorded) = match roster_without_records(store, program.id, course_id, module) {
        Ok(v) => v,
        Err(e) => {
            report.issue(scope(), &e);
            return;
        }
    };
    for student_id in course.student_ids.difference(&recorded).copied().collect::<Vec<_>>() {
        match direct_pass(store, program, &course, module, student_id) {
            Ok(effect) => report.tally(effect),
            Err(e) => report.issue(format!("student {} in course {}", student_id, course_id), &e),
        }
    }
}

/// The course as it stands now, plus students holding any record for the module.
fn roster_without_records<S: AcademicStore + ?Sized>(
    store: &S,
    program: ProgramId,
    course_id: CourseId,
    module: u32,
) -> Result<(Course, BTreeSet<StudentId>), CursusError> {
    let course = load_course(store, course_id)?;
    let recorded = store
        .records_for_module(program, module)?
        .into_iter()
        .filter(|r| r.course_id == course_id)
        .map(|r| r.student_id)
        .collect();
    Ok((course, recorded))
}

/// Promote a student who passed at the close but waited for the recovery close.
///
/// A student who already failed the program at this module, usually through
/// a sibling course, holds no pending flag; only the enrollment is dropped.
fn direct_pass<S: AcademicStore + ?Sized>(
    store: &mut S,
    program: &Program,
    course: &Course,
    module: u32,
    student_id: StudentId,
) -> Result<Effect, CursusError> {
    let Some(mut student) = store.student(student_id)? else {
        return Ok(Effect::Unchanged);
    };
    let p = program.id;
    if student.module(p) != Some(module) {
        return Ok(Effect::Unchanged);
    }
    let stale = match student.status(p) {
        Some(ProgramStatus::Failed) => true,
        Some(ProgramStatus::Withdrawn) => student.is_promotion_pending(p),
        _ => false,
    };
    if !stale && !student.is_promotion_pending(p) {
        return Ok(Effect::Unchanged);
    }

    let before = student.clone();
    let effect = if stale {
        let unenrolled = unenroll(store, &mut student, course.id)?;
        student.promotion_pending.remove(&p);
        if unenrolled {
            info!(student = %student_id, course = %course.id, module, "stale enrollment dropped");
            Effect::Removed
        } else {
            Effect::Unchanged
        }
    } else if !failing_subjects(store, student_id, course, module)?.is_empty() {
        warn!(student = %student_id, course = %course.id, module, "deferred promotion but failing; removing");
        unenroll(store, &mut student, course.id)?;
        student.fail(p);
        Effect::Removed
    } else if has_open_sibling_records(store, p, module, student_id, course.id)? {
        return Ok(Effect::Unchanged);
    } else {
        Effect::from(student.promote(p, program.max_modules))
    };
    if student != before {
        store.save_student(&mut student)?;
    }
    Ok(effect)
}

// -----------------------------------------------------------------------------
// Step 4: failing-average enforcement
// -----------------------------------------------------------------------------

fn enforce_failing_averages<S: AcademicStore + ?Sized>(
    store: &mut S,
    program: &Program,
    course_id: CourseId,
    module: u32,
    report: &mut SweepReport,
) {
    let course = match load_course(store, course_id) {
        Ok(course) => course,
        Err(e) => {
            report.issue(format!("course {} module {} enforcement", course_id, module), &e);
            return;
        }
    };
    for student_id in course.student_ids.iter().copied().collect::<Vec<_>>() {
        match enforce_student(store, program, &course, module, student_id) {
            Ok(effect) => report.tally(effect),
            Err(e) => report.issue(format!("student {} in course {}", student_id, course_id), &e),
        }
    }
}

/// Remove a student still at the module whose failing subject was never
/// resolved as promoted.
fn enforce_student<S: AcademicStore + ?Sized>(
    store: &mut S,
    program: &Program,
    course: &Course,
    module: u32,
    student_id: StudentId,
) -> Result<Effect, CursusError> {
    let Some(mut student) = store.student(student_id)? else {
        return Ok(Effect::Unchanged);
    };
    let p = program.id;
    let in_progress = matches!(
        student.status(p),
        Some(ProgramStatus::Active | ProgramStatus::PendingRecovery)
    );
    if student.module(p) != Some(module) || !in_progress {
        return Ok(Effect::Unchanged);
    }

    let failing = failing_subjects(store, student_id, course, module)?;
    if failing.is_empty() {
        return Ok(Effect::Unchanged);
    }
    let records = store.records_for(student_id, course.id)?;
    let unresolved = failing.iter().any(|f| {
        !records.iter().any(|r| {
            r.module_number == module
                && r.subject_id == f.subject
                && r.state == RecoveryState::Processed(Resolution::Promoted)
        })
    });
    if !unresolved {
        return Ok(Effect::Unchanged);
    }

    warn!(student = %student_id, course = %course.id, module, "failing average without a resolved recovery; removing");
    remove_from_course(store, program, course.id, module, &mut student)
}

// -----------------------------------------------------------------------------
// Shared transitions
// -----------------------------------------------------------------------------

/// Promote unless the student has moved on, is terminal in the program, or
/// still has open records in a sibling course of the same module.
fn promote_if_clear<S: AcademicStore + ?Sized>(
    store: &mut S,
    program: &Program,
    course_id: CourseId,
    module: u32,
    student: &mut StudentAcademicRecord,
) -> Result<Effect, CursusError> {
    let p = program.id;
    let in_progress = matches!(
        student.status(p),
        Some(ProgramStatus::Active | ProgramStatus::PendingRecovery)
    );
    if student.module(p) != Some(module) || !in_progress {
        return Ok(Effect::Unchanged);
    }
    if has_open_sibling_records(store, p, module, student.student_id, course_id)? {
        debug!(student = %student.student_id, program = %p, module, "promotion waits for sibling course");
        return Ok(Effect::Unchanged);
    }
    let effect = Effect::from(student.promote(p, program.max_modules));
    store.save_student(student)?;
    info!(student = %student.student_id, program = %p, module, effect = ?effect, "promoted at recovery close");
    Ok(effect)
}

/// Unenroll from the course and fail the program if the student is still in this module.
fn remove_from_course<S: AcademicStore + ?Sized>(
    store: &mut S,
    program: &Program,
    course_id: CourseId,
    module: u32,
    student: &mut StudentAcademicRecord,
) -> Result<Effect, CursusError> {
    let p = program.id;
    let before = student.clone();
    unenroll(store, student, course_id)?;
    if student.module(p) == Some(module) && student.status(p) != Some(ProgramStatus::Graduated) {
        student.fail(p);
    }
    if *student == before {
        return Ok(Effect::Unchanged);
    }
    store.save_student(student)?;
    info!(student = %student.student_id, course = %course_id, module, "removed at recovery close");
    Ok(Effect::Removed)
}

fn has_open_sibling_records<S: AcademicStore + ?Sized>(
    store: &S,
    program: ProgramId,
    module: u32,
    student: StudentId,
    course: CourseId,
) -> Result<bool, CursusError> {
    Ok(store
        .records_for_module(program, module)?
        .iter()
        .any(|r| r.student_id == student && r.course_id != course && !r.recovery_processed()))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{Grade, ModuleDates, Subject};
    use crate::pipeline::approve_recovery;
    use crate::store::MemoryStore;
    use crate::{Score, SubjectId};

    const P: ProgramId = ProgramId(1);
    const A: CourseId = CourseId(10);
    const B: CourseId = CourseId(11);

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    fn course(id: CourseId, subject: u64, students: &[u64], recovery_close: &str) -> Course {
        let mut course = Course::new(id, P);
        course.subject_ids.insert(SubjectId(subject));
        course.student_ids = students.iter().map(|&s| StudentId(s)).collect();
        course.module_dates.insert(
            1,
            ModuleDates {
                recovery_close: Some(date(recovery_close)),
                ..ModuleDates::default()
            },
        );
        course
    }

    fn grade(store: &mut MemoryStore, student: u64, course: CourseId, subject: u64, value: u16) {
        store
            .put_grades(
                StudentId(student),
                course,
                vec![Grade {
                    student_id: StudentId(student),
                    course_id: course,
                    subject_id: SubjectId(subject),
                    value: Score(value),
                }],
            )
            .expect("grades");
    }

    /// Program of 3 modules closing module 1 on 2025-03-01; course A with
    /// subject 1 and a recovery close on 2025-03-15.
    fn setup(students: &[u64]) -> MemoryStore {
        let mut store = MemoryStore::new();
        store
            .put_program(Program::new(P, 3).with_close_date(1, date("2025-03-01")))
            .expect("program");
        store
            .put_subject(Subject {
                id: SubjectId(1),
                program_id: P,
                module_number: 1,
                name: String::new(),
            })
            .expect("subject");
        store
            .put_course(course(A, 1, students, "2025-03-15"))
            .expect("course");
        for &id in students {
            let mut s = StudentAcademicRecord::new(StudentId(id)).enrolled_in(P);
            store.save_student(&mut s).expect("student");
        }
        store
    }

    fn student(store: &MemoryStore, id: u64) -> StudentAcademicRecord {
        store.student(StudentId(id)).expect("read").expect("exists")
    }

    #[test]
    fn pass_a_runs_once() {
        let mut store = setup(&[1]);
        grade(&mut store, 1, A, 1, 400);

        let before = run_scheduled_sweep(&mut store, date("2025-02-28"));
        assert!(before.is_quiet());

        let first = run_scheduled_sweep(&mut store, date("2025-03-01"));
        assert_eq!(first.closures_run, vec![(P, 1)]);
        assert!(student(&store, 1).is_promotion_pending(P));

        let second = run_scheduled_sweep(&mut store, date("2025-03-02"));
        assert!(second.is_quiet());
        assert_eq!(store.closures().expect("closures").len(), 1);
    }

    #[test]
    fn unanswered_records_remove_at_recovery_close() {
        let mut store = setup(&[1]);
        grade(&mut store, 1, A, 1, 100);
        run_scheduled_sweep(&mut store, date("2025-03-01"));

        let report = run_scheduled_sweep(&mut store, date("2025-03-15"));

        assert_eq!(report.removed, 1);
        assert_eq!(report.records_processed, 1);
        assert_eq!(student(&store, 1).status(P), Some(ProgramStatus::Failed));
        let records = store.failed_records().expect("records");
        assert_eq!(records[0].state, RecoveryState::Processed(Resolution::Removed));
        assert!(!store.course(A).expect("read").expect("exists").is_enrolled(StudentId(1)));
    }

    #[test]
    fn partial_approval_removes() {
        let mut store = setup(&[1]);
        grade(&mut store, 1, A, 1, 100);
        run_scheduled_sweep(&mut store, date("2025-03-01"));
        let id = store.failed_records().expect("records")[0].id;
        approve_recovery(&mut store, id, true).expect("approve");

        let report = run_scheduled_sweep(&mut store, date("2025-03-20"));
        assert_eq!(report.removed, 1);
        assert_eq!(student(&store, 1).status(P), Some(ProgramStatus::Failed));
    }

    #[test]
    fn retroactive_repair_fires_once() {
        let mut store = MemoryStore::new();
        // No module close date: Pass A never closes module 1
        store.put_program(Program::new(P, 3)).expect("program");
        store
            .put_subject(Subject {
                id: SubjectId(1),
                program_id: P,
                module_number: 1,
                name: String::new(),
            })
            .expect("subject");
        store.put_course(course(A, 1, &[1], "2025-03-15")).expect("course");
        let mut s = StudentAcademicRecord::new(StudentId(1)).enrolled_in(P);
        store.save_student(&mut s).expect("student");
        grade(&mut store, 1, A, 1, 450);

        let first = run_scheduled_sweep(&mut store, date("2025-03-15"));
        assert_eq!(first.retroactive_repairs, vec![(P, 1)]);
        assert_eq!(first.promoted, 1, "deferred promotion resolved in the same run");
        assert_eq!(student(&store, 1).module(P), Some(2));

        let second = run_scheduled_sweep(&mut store, date("2025-03-16"));
        assert!(second.is_quiet());
    }

    #[test]
    fn sibling_course_failure_wins() {
        let mut store = setup(&[1]);
        store
            .put_subject(Subject {
                id: SubjectId(2),
                program_id: P,
                module_number: 1,
                name: String::new(),
            })
            .expect("subject");
        store.put_course(course(B, 2, &[1], "2025-03-20")).expect("course");
        grade(&mut store, 1, A, 1, 100);
        grade(&mut store, 1, B, 2, 100);
        run_scheduled_sweep(&mut store, date("2025-03-01"));

        // Course A fully approved
        let records = store.failed_records().expect("records");
        let in_a = records.iter().find(|r| r.course_id == A).expect("record in A");
        approve_recovery(&mut store, in_a.id, true).expect("approve");
        crate::pipeline::grade_recovery(
            &mut store,
            StudentId(1),
            A,
            Some(SubjectId(1)),
            crate::failed::GradeOutcome::Approved,
        )
        .expect("grade");

        // A closes first: promotion waits for B
        let first = run_scheduled_sweep(&mut store, date("2025-03-15"));
        assert_eq!(first.promoted, 0);
        assert_eq!(student(&store, 1).module(P), Some(1));

        // B has no admin action: removal wins
        let second = run_scheduled_sweep(&mut store, date("2025-03-20"));
        assert_eq!(second.removed, 1);
        assert_eq!(student(&store, 1).status(P), Some(ProgramStatus::Failed));
        assert_eq!(student(&store, 1).module(P), Some(1));
    }

    #[test]
    fn failed_student_with_deferred_promotion_loses_stale_enrollment() {
        let mut store = setup(&[1]);
        grade(&mut store, 1, A, 1, 400);
        run_scheduled_sweep(&mut store, date("2025-03-01"));

        // Failed elsewhere in the meantime
        let mut s = student(&store, 1);
        s.set_status(P, ProgramStatus::Failed);
        store.save_student(&mut s).expect("save");

        let report = run_scheduled_sweep(&mut store, date("2025-03-15"));
        assert_eq!(report.removed, 1);
        assert_eq!(report.promoted, 0);
        let s = student(&store, 1);
        assert!(!s.is_promotion_pending(P));
        assert_eq!(s.module(P), Some(1));
    }

    #[test]
    fn late_failing_grade_blocks_deferred_promotion() {
        let mut store = setup(&[1]);
        grade(&mut store, 1, A, 1, 400);
        run_scheduled_sweep(&mut store, date("2025-03-01"));
        grade(&mut store, 1, A, 1, 200);

        let report = run_scheduled_sweep(&mut store, date("2025-03-15"));
        assert_eq!(report.removed, 1);
        assert_eq!(student(&store, 1).status(P), Some(ProgramStatus::Failed));
    }

    #[test]
    fn enforcement_removes_unrecorded_failures() {
        let mut store = setup(&[1]);
        grade(&mut store, 1, A, 1, 400);
        run_scheduled_sweep(&mut store, date("2025-03-01"));

        // Promotion flag lost and a failing grade arrives without a record
        let mut s = student(&store, 1);
        s.promotion_pending.clear();
        store.save_student(&mut s).expect("save");
        grade(&mut store, 1, A, 1, 150);

        let report = run_scheduled_sweep(&mut store, date("2025-03-15"));
        assert_eq!(report.removed, 1);
        assert!(run_scheduled_sweep(&mut store, date("2025-03-16")).is_quiet());
    }

    #[test]
    fn missing_course_program_is_reported_not_fatal() {
        let mut store = setup(&[1]);
        let mut orphan = course(B, 1, &[], "2025-03-01");
        orphan.program_id = ProgramId(42);
        store.put_course(orphan).expect("course");

        let report = run_scheduled_sweep(&mut store, date("2025-03-15"));
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].scope.contains("course 11"));
        // The valid course was still resolved
        assert_eq!(report.promoted, 1);
    }
}
