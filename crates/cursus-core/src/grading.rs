//! # Grade Averages
//!
//! Per-subject averages for one student in one course module, computed with
//! integer arithmetic in hundredths.

use crate::directory::Course;
use crate::primitives::PASSING_SCORE;
use crate::store::AcademicStore;
use crate::{CursusError, Score, StudentId, SubjectId};
use std::collections::BTreeSet;

/// Average of one subject, or of the whole course when it has no subjects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubjectAverage {
    /// `None` for the course-level fallback.
    pub subject: Option<SubjectId>,
    pub average: Score,
    pub failing: bool,
}

impl SubjectAverage {
    fn from_values(subject: Option<SubjectId>, values: &[Score]) -> Option<Self> {
        let count = u32::try_from(values.len()).ok().filter(|&c| c > 0)?;
        let sum: u32 = values.iter().map(|v| u32::from(v.hundredths())).sum();
        // Exact comparison: sum / count < 3.00  <=>  sum < 300 * count
        let failing = sum < u32::from(PASSING_SCORE).saturating_mul(count);
        let average = Score(u16::try_from(sum / count).unwrap_or(u16::MAX));
        Some(Self {
            subject,
            average,
            failing,
        })
    }
}

/// Subjects of `course` that belong to `module`.
///
/// Subjects missing from the directory are ignored.
pub fn module_subjects<S: AcademicStore + ?Sized>(
    store: &S,
    course: &Course,
    module: u32,
) -> Result<BTreeSet<SubjectId>, CursusError> {
    let mut out = BTreeSet::new();
    for id in &course.subject_ids {
        if let Some(subject) = store.subject(*id)?
            && subject.module_number == module
        {
            out.insert(*id);
        }
    }
    Ok(out)
}

/// Whether `course` takes part in `module`.
///
/// A course with neither module dates nor subjects places no restriction.
pub fn course_covers_module<S: AcademicStore + ?Sized>(
    store: &S,
    course: &Course,
    module: u32,
) -> Result<bool, CursusError> {
    if course.declares_module(module) {
        return Ok(true);
    }
    if !module_subjects(store, course, module)?.is_empty() {
        return Ok(true);
    }
    Ok(course.module_dates.is_empty() && course.subject_ids.is_empty())
}

/// Averages for every gradeable subject of `module` in `course`.
///
/// Subjects with no recorded grade are skipped. When the course has no
/// subject structure at all, a single course-level average is returned.
pub fn module_averages<S: AcademicStore + ?Sized>(
    store: &S,
    student: StudentId,
    course: &Course,
    module: u32,
) -> Result<Vec<SubjectAverage>, CursusError> {
    let grades = store.grades_for(student, course.id)?;

    if course.subject_ids.is_empty() {
        let values: Vec<Score> = grades.iter().map(|g| g.value).collect();
        return Ok(SubjectAverage::from_values(None, &values).into_iter().collect());
    }

    let mut out = Vec::new();
    for subject in module_subjects(store, course, module)? {
        let values: Vec<Score> = grades
            .iter()
            .filter(|g| g.subject_id == subject)
            .map(|g| g.value)
            .collect();
        out.extend(SubjectAverage::from_values(Some(subject), &values));
    }
    Ok(out)
}

/// Only the failing averages.
pub fn failing_subjects<S: AcademicStore + ?Sized>(
    store: &S,
    student: StudentId,
    course: &Course,
    module: u32,
) -> Result<Vec<SubjectAverage>, CursusError> {
    Ok(module_averages(store, student, course, module)?
        .into_iter()
        .filter(|a| a.failing)
        .collect())
}
