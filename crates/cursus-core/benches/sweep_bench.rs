//! # Sweep Benchmarks
//!
//! Performance benchmarks for module closure and the daily sweep.
//!
//! Run with: `cargo bench -p cursus-core`

use chrono::NaiveDate;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use cursus_core::{
    AcademicStore, Course, CourseId, Grade, MemoryStore, ModuleDates, Program, ProgramId,
    ProgramStatus, Score, StudentAcademicRecord, StudentId, Subject, SubjectId, close_module,
    run_scheduled_sweep,
};
use std::hint::black_box;

const PROGRAM: ProgramId = ProgramId(1);
const SUBJECTS_PER_COURSE: u64 = 4;
const STUDENTS_PER_COURSE: u64 = 30;

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
}

/// A store with `courses` courses of 30 students each. Roughly one grade in
/// five is failing.
fn create_store(courses: u64) -> MemoryStore {
    let mut store = MemoryStore::new();
    store
        .put_program(Program::new(PROGRAM, 4).with_close_date(1, date("2025-03-01")))
        .expect("program");
    for s in 0..SUBJECTS_PER_COURSE {
        store
            .put_subject(Subject {
                id: SubjectId(s),
                program_id: PROGRAM,
                module_number: 1,
                name: String::new(),
            })
            .expect("subject");
    }

    for c in 0..courses {
        let course_id = CourseId(c);
        let mut course = Course::new(course_id, PROGRAM);
        course.subject_ids = (0..SUBJECTS_PER_COURSE).map(SubjectId).collect();
        course.module_dates.insert(
            1,
            ModuleDates {
                recovery_close: Some(date("2025-03-31")),
                ..ModuleDates::default()
            },
        );
        for n in 0..STUDENTS_PER_COURSE {
            let student = StudentId(c * STUDENTS_PER_COURSE + n);
            course.student_ids.insert(student);
            let mut record = StudentAcademicRecord::new(student);
            record.program_modules.insert(PROGRAM, 1);
            record.set_status(PROGRAM, ProgramStatus::Active);
            store.save_student(&mut record).expect("student");
            let grades = (0..SUBJECTS_PER_COURSE)
                .map(|s| Grade {
                    student_id: student,
                    course_id,
                    subject_id: SubjectId(s),
                    value: Score(if (student.0 + s) % 5 == 0 { 200 } else { 400 }),
                })
                .collect();
            store.put_grades(student, course_id, grades).expect("grades");
        }
        store.put_course(course).expect("course");
    }
    store
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_close_module(c: &mut Criterion) {
    let mut group = c.benchmark_group("close_module");

    for courses in [1u64, 10, 50] {
        let store = create_store(courses);
        group.bench_with_input(BenchmarkId::from_parameter(courses), &store, |b, store| {
            b.iter(|| {
                let mut store = store.clone();
                black_box(close_module(&mut store, 1, Some(PROGRAM)).expect("close"))
            });
        });
    }

    group.finish();
}

fn bench_full_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("sweep_full_cycle");

    for courses in [1u64, 10, 50] {
        let store = create_store(courses);
        group.bench_with_input(BenchmarkId::from_parameter(courses), &store, |b, store| {
            b.iter(|| {
                let mut store = store.clone();
                run_scheduled_sweep(&mut store, date("2025-03-01"));
                black_box(run_scheduled_sweep(&mut store, date("2025-03-31")))
            });
        });
    }

    group.finish();
}

fn bench_quiet_sweep(c: &mut Criterion) {
    let mut store = create_store(10);
    run_scheduled_sweep(&mut store, date("2025-03-01"));
    run_scheduled_sweep(&mut store, date("2025-03-31"));

    c.bench_function("sweep_quiet_rerun", |b| {
        b.iter(|| black_box(run_scheduled_sweep(&mut store, date("2025-04-01"))));
    });
}

criterion_group!(
    benches,
    bench_close_module,
    bench_full_cycle,
    bench_quiet_sweep
);
criterion_main!(benches);
