//! Integration tests for the sweep scheduler.
//!
//! The scheduler runs with a fake clock and a 10 ms check interval against a
//! snapshot file or redb database in a temp dir.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use cursus::scheduler::{Clock, SweepScheduler};
use cursus::{Backend, StorageConfig, StoreSession, open_registrar};
use cursus_core::{
    Course, CourseId, DirectoryImport, Grade, ModuleDates, Program, ProgramId, ProgramStatus,
    RecoveryState, Score, StudentAcademicRecord, StudentId, Subject, SubjectId, SweepReport,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;

const PROGRAM: ProgramId = ProgramId(1);
const STUDENT: StudentId = StudentId(7);
const TICK: Duration = Duration::from_millis(10);
const WAIT: Duration = Duration::from_secs(5);

fn instant(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0)
        .single()
        .expect("valid instant")
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

/// A clock the test can move forward.
fn manual_clock(start: DateTime<Utc>) -> (Clock, Arc<Mutex<DateTime<Utc>>>) {
    let now = Arc::new(Mutex::new(start));
    let reader = Arc::clone(&now);
    let clock: Clock = Arc::new(move || *reader.lock().expect("clock lock"));
    (clock, now)
}

/// One failing student in a program whose module 1 closes on 2025-03-01.
fn directory() -> DirectoryImport {
    let mut course = Course::new(CourseId(100), PROGRAM);
    course.subject_ids.insert(SubjectId(10));
    course.student_ids.insert(STUDENT);
    course.module_dates.insert(
        1,
        ModuleDates {
            recovery_close: Some(day(2025, 3, 31)),
            ..ModuleDates::default()
        },
    );
    let mut student = StudentAcademicRecord::new(STUDENT);
    student.program_modules.insert(PROGRAM, 1);
    student.set_status(PROGRAM, ProgramStatus::Active);
    DirectoryImport {
        programs: vec![Program::new(PROGRAM, 3).with_close_date(1, day(2025, 3, 1))],
        subjects: vec![Subject {
            id: SubjectId(10),
            program_id: PROGRAM,
            module_number: 1,
            name: String::new(),
        }],
        courses: vec![course],
        grades: vec![Grade {
            student_id: STUDENT,
            course_id: CourseId(100),
            subject_id: SubjectId(10),
            value: Score(180),
        }],
        students: vec![student],
    }
}

/// Storage of the given backend, seeded with [`directory`].
fn seeded(dir: &tempfile::TempDir, backend: Backend) -> StorageConfig {
    let name = match backend {
        Backend::File => "cursus.snapshot",
        Backend::Redb => "cursus.db",
    };
    let storage = StorageConfig {
        database: dir.path().join(name),
        backend,
    };
    let mut session = StoreSession::open(&storage).expect("open");
    session.registrar_mut().ingest(directory()).expect("ingest");
    session.commit().expect("commit");
    storage
}

async fn next_report(reports: &mut watch::Receiver<Option<SweepReport>>) -> SweepReport {
    timeout(WAIT, reports.changed())
        .await
        .expect("sweep ran in time")
        .expect("scheduler alive");
    reports.borrow_and_update().clone().expect("report present")
}

async fn stop(scheduler: SweepScheduler) {
    scheduler.shutdown();
    timeout(WAIT, scheduler.join())
        .await
        .expect("scheduler stopped in time");
}

fn status(storage: &StorageConfig) -> Option<ProgramStatus> {
    open_registrar(storage)
        .expect("open")
        .student(STUDENT)
        .expect("student")
        .status(PROGRAM)
}

fn record_state(storage: &StorageConfig) -> RecoveryState {
    let registrar = open_registrar(storage).expect("open");
    let records = registrar.records(Some(STUDENT)).expect("records");
    assert_eq!(records.len(), 1);
    records[0].state
}

/// Approve the only record from a separate session, as the CLI does.
fn approve_from_cli(storage: &StorageConfig) {
    let mut session = StoreSession::open(storage).expect("open while daemon runs");
    let id = session.registrar().records(Some(STUDENT)).expect("records")[0].id;
    session
        .registrar_mut()
        .approve_recovery(id, true)
        .expect("approve");
    session.commit().expect("commit");
}

/// Approval made between two scheduled runs survives the second run.
async fn interactive_approval_between_runs(backend: Backend) {
    let dir = tempfile::tempdir().expect("tempdir");
    let storage = seeded(&dir, backend);
    let (clock, now) = manual_clock(instant(2025, 3, 1, 3));

    let scheduler = SweepScheduler::spawn_with_clock(storage.clone(), 2, TICK, clock);
    let mut reports = scheduler.reports();
    next_report(&mut reports).await;
    assert_eq!(record_state(&storage), RecoveryState::Pending);

    approve_from_cli(&storage);

    *now.lock().expect("clock lock") = instant(2025, 3, 2, 3);
    let second = next_report(&mut reports).await;
    assert_eq!(second.today, day(2025, 3, 2));
    assert_eq!(record_state(&storage), RecoveryState::AdminApproved);

    stop(scheduler).await;
}

// =============================================================================
// TESTS
// =============================================================================

#[tokio::test]
async fn runs_once_after_the_configured_hour() {
    let dir = tempfile::tempdir().expect("tempdir");
    let storage = seeded(&dir, Backend::File);
    let (clock, _now) = manual_clock(instant(2025, 3, 1, 3));

    let scheduler = SweepScheduler::spawn_with_clock(storage.clone(), 2, TICK, clock);
    let mut reports = scheduler.reports();

    let report = next_report(&mut reports).await;
    assert_eq!(report.today, day(2025, 3, 1));
    assert_eq!(report.closures_run, vec![(PROGRAM, 1)]);
    assert_eq!(status(&storage), Some(ProgramStatus::PendingRecovery));

    // Many more ticks on the same day do nothing
    tokio::time::sleep(TICK * 10).await;
    assert!(!reports.has_changed().expect("scheduler alive"));

    stop(scheduler).await;
}

#[tokio::test]
async fn waits_for_the_run_hour_then_for_the_next_day() {
    let dir = tempfile::tempdir().expect("tempdir");
    let storage = seeded(&dir, Backend::File);
    let (clock, now) = manual_clock(instant(2025, 3, 1, 1));

    let scheduler = SweepScheduler::spawn_with_clock(storage.clone(), 2, TICK, clock);
    let mut reports = scheduler.reports();

    tokio::time::sleep(TICK * 10).await;
    assert!(reports.borrow().is_none());
    assert_eq!(status(&storage), Some(ProgramStatus::Active));

    *now.lock().expect("clock lock") = instant(2025, 3, 1, 2);
    let first = next_report(&mut reports).await;
    assert_eq!(first.today, day(2025, 3, 1));

    // At the recovery close the unapproved record removes the student
    *now.lock().expect("clock lock") = instant(2025, 3, 31, 2);
    let second = next_report(&mut reports).await;
    assert_eq!(second.today, day(2025, 3, 31));
    assert_eq!(second.removed, 1);
    assert_eq!(status(&storage), Some(ProgramStatus::Failed));

    stop(scheduler).await;
}

#[tokio::test]
async fn sweep_results_are_saved_for_file_backends() {
    let dir = tempfile::tempdir().expect("tempdir");
    let storage = seeded(&dir, Backend::File);
    let (clock, _now) = manual_clock(instant(2025, 3, 1, 12));

    let scheduler = SweepScheduler::spawn_with_clock(storage.clone(), 2, TICK, clock);
    let mut reports = scheduler.reports();
    next_report(&mut reports).await;
    stop(scheduler).await;

    let reopened = open_registrar(&storage).expect("reopen");
    let student = reopened.student(STUDENT).expect("student");
    assert_eq!(student.status(PROGRAM), Some(ProgramStatus::PendingRecovery));
    assert_eq!(reopened.records(Some(STUDENT)).expect("records").len(), 1);
}

#[tokio::test]
async fn interactive_approval_survives_next_run_on_file_backend() {
    interactive_approval_between_runs(Backend::File).await;
}

#[tokio::test]
async fn interactive_approval_survives_next_run_on_redb_backend() {
    interactive_approval_between_runs(Backend::Redb).await;
}

#[tokio::test]
async fn shutdown_while_idle_exits_cleanly() {
    let dir = tempfile::tempdir().expect("tempdir");
    let storage = seeded(&dir, Backend::Redb);
    let (clock, _now) = manual_clock(instant(2025, 3, 1, 0));

    let scheduler =
        SweepScheduler::spawn_with_clock(storage.clone(), 2, Duration::from_secs(3600), clock);
    let reports = scheduler.reports();
    stop(scheduler).await;

    assert!(reports.borrow().is_none());
    assert_eq!(status(&storage), Some(ProgramStatus::Active));
}
