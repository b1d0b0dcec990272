//! # Directory Reference Data
//!
//! Programs, subjects, courses and grades as supplied by the external
//! registry. The core only reads these, with one exception: course
//! enrollment lists, which the core edits when it removes a student.

use crate::primitives::MAX_MODULES_PER_PROGRAM;
use crate::record::StudentAcademicRecord;
use crate::{CourseId, CursusError, ProgramId, Score, StudentId, SubjectId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// PROGRAM
// =============================================================================

/// A program is an ordered sequence of modules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub id: ProgramId,
    #[serde(default)]
    pub name: String,
    /// Number of modules; the last one graduates the student.
    pub max_modules: u32,
    /// Date on which each module is closed by the sweep.
    #[serde(default)]
    pub close_dates: BTreeMap<u32, NaiveDate>,
}

impl Program {
    #[must_use]
    pub fn new(id: ProgramId, max_modules: u32) -> Self {
        Self {
            id,
            name: String::new(),
            max_modules,
            close_dates: BTreeMap::new(),
        }
    }

    /// Builder-style helper to set a module close date.
    #[must_use]
    pub fn with_close_date(mut self, module: u32, date: NaiveDate) -> Self {
        self.close_dates.insert(module, date);
        self
    }

    pub fn validate(&self) -> Result<(), CursusError> {
        if self.max_modules == 0 || self.max_modules > MAX_MODULES_PER_PROGRAM {
            return Err(CursusError::Validation(format!(
                "program {} must have between 1 and {} modules, got {}",
                self.id, MAX_MODULES_PER_PROGRAM, self.max_modules
            )));
        }
        if let Some(module) = self
            .close_dates
            .keys()
            .find(|&&m| m == 0 || m > self.max_modules)
        {
            return Err(CursusError::Validation(format!(
                "program {} has a close date for module {} outside 1..={}",
                self.id, module, self.max_modules
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn close_date(&self, module: u32) -> Option<NaiveDate> {
        self.close_dates.get(&module).copied()
    }

    #[must_use]
    pub fn is_final_module(&self, module: u32) -> bool {
        module >= self.max_modules
    }
}

// =============================================================================
// SUBJECT
// =============================================================================

/// A subject taught in one module of a program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub program_id: ProgramId,
    pub module_number: u32,
    #[serde(default)]
    pub name: String,
}

// =============================================================================
// COURSE
// =============================================================================

/// Calendar of one module inside a course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModuleDates {
    #[serde(default)]
    pub start: Option<NaiveDate>,
    #[serde(default)]
    pub end: Option<NaiveDate>,
    /// Deadline after which the recovery window is force-resolved.
    #[serde(default)]
    pub recovery_close: Option<NaiveDate>,
}

/// A cohort group inside a program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub program_id: ProgramId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub subject_ids: BTreeSet<SubjectId>,
    #[serde(default)]
    pub student_ids: BTreeSet<StudentId>,
    /// Students removed from this course; they cannot be enrolled again.
    #[serde(default)]
    pub removed_student_ids: BTreeSet<StudentId>,
    #[serde(default)]
    pub module_dates: BTreeMap<u32, ModuleDates>,
}

impl Course {
    #[must_use]
    pub fn new(id: CourseId, program_id: ProgramId) -> Self {
        Self {
            id,
            program_id,
            name: String::new(),
            subject_ids: BTreeSet::new(),
            student_ids: BTreeSet::new(),
            removed_student_ids: BTreeSet::new(),
            module_dates: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn is_enrolled(&self, student: StudentId) -> bool {
        self.student_ids.contains(&student)
    }

    /// Enroll a student. Students previously removed from this course are refused.
    pub fn enroll(&mut self, student: StudentId) -> Result<bool, CursusError> {
        if self.removed_student_ids.contains(&student) {
            return Err(CursusError::StateConflict(format!(
                "student {} was removed from course {} and cannot re-enroll",
                student, self.id
            )));
        }
        Ok(self.student_ids.insert(student))
    }

    /// Move a student from the roster to the removed list.
    ///
    /// Returns `true` if anything changed.
    pub fn unenroll(&mut self, student: StudentId) -> bool {
        let removed = self.student_ids.remove(&student);
        let blocked = self.removed_student_ids.insert(student);
        removed || blocked
    }

    #[must_use]
    pub fn declares_module(&self, module: u32) -> bool {
        self.module_dates.contains_key(&module)
    }

    #[must_use]
    pub fn recovery_close(&self, module: u32) -> Option<NaiveDate> {
        self.module_dates
            .get(&module)
            .and_then(|dates| dates.recovery_close)
    }
}

// =============================================================================
// GRADE
// =============================================================================

/// One recorded grade for a student in a course subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grade {
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub subject_id: SubjectId,
    pub value: Score,
}

// =============================================================================
// DIRECTORY IMPORT
// =============================================================================

/// A batch of reference data handed over by the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryImport {
    #[serde(default)]
    pub programs: Vec<Program>,
    #[serde(default)]
    pub subjects: Vec<Subject>,
    #[serde(default)]
    pub courses: Vec<Course>,
    #[serde(default)]
    pub grades: Vec<Grade>,
    #[serde(default)]
    pub students: Vec<StudentAcademicRecord>,
}

impl DirectoryImport {
    /// Check internal consistency before anything is written.
    pub fn validate(&self) -> Result<(), CursusError> {
        let mut programs = BTreeMap::new();
        for program in &self.programs {
            program.validate()?;
            programs.insert(program.id, program.max_modules);
        }
        for subject in &self.subjects {
            if subject.module_number == 0 {
                return Err(CursusError::InvalidModuleNumber(0));
            }
            if let Some(&max) = programs.get(&subject.program_id)
                && subject.module_number > max
            {
                return Err(CursusError::Validation(format!(
                    "subject {} belongs to module {} but program {} has {} modules",
                    subject.id, subject.module_number, subject.program_id, max
                )));
            }
        }
        for course in &self.courses {
            if course.module_dates.contains_key(&0) {
                return Err(CursusError::InvalidModuleNumber(0));
            }
            if let Some(student) = course
                .student_ids
                .intersection(&course.removed_student_ids)
                .next()
            {
                return Err(CursusError::Validation(format!(
                    "student {} is both enrolled in and removed from course {}",
                    student, course.id
                )));
            }
        }
        for grade in &self.grades {
            Score::new(grade.value.hundredths())?;
        }
        for student in &self.students {
            if let Some((program, _)) = student.program_modules.iter().find(|(_, m)| **m == 0) {
                return Err(CursusError::Validation(format!(
                    "student {} has module 0 in program {}",
                    student.student_id, program
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
