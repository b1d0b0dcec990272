//! Course removal shared by the recovery pipeline and the sweep.

use crate::record::StudentAcademicRecord;
use crate::store::AcademicStore;
use crate::{CourseId, CursusError};
use tracing::debug;

/// Remove a student from a course and block re-enrollment.
///
/// Clears the student's group label when no other enrollment remains. The
/// course is written here; the caller saves `student`.
pub fn unenroll<S: AcademicStore + ?Sized>(
    store: &mut S,
    student: &mut StudentAcademicRecord,
    course: CourseId,
) -> Result<bool, CursusError> {
    let mut target = store.course(course)?.ok_or(CursusError::CourseNotFound(course))?;
    let changed = target.unenroll(student.student_id);
    if changed {
        store.put_course(target)?;
        debug!(student = %student.student_id, course = %course, "unenrolled");
    }

    let still_enrolled = store
        .courses()?
        .iter()
        .any(|c| c.is_enrolled(student.student_id));
    if !still_enrolled && student.group_label.take().is_some() {
        debug!(student = %student.student_id, "group label cleared");
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::Course;
    use crate::{ProgramId, StudentId};

    fn course(id: u64, students: &[u64]) -> Course {
        let mut course = Course::new(CourseId(id), ProgramId(1));
        course.student_ids = students.iter().map(|&s| StudentId(s)).collect();
        course
    }

    #[test]
    fn keeps_label_while_other_enrollment_exists() {
        let mut store = crate::store::MemoryStore::new();
        store.put_course(course(1, &[7])).expect("course");
        store.put_course(course(2, &[7])).expect("course");
        let mut student = StudentAcademicRecord::new(StudentId(7)).with_group_label("A-1");

        assert!(unenroll(&mut store, &mut student, CourseId(1)).expect("unenroll"));
        assert_eq!(student.group_label.as_deref(), Some("A-1"));

        assert!(unenroll(&mut store, &mut student, CourseId(2)).expect("unenroll"));
        assert_eq!(student.group_label, None);

        let stored = store.course(CourseId(2)).expect("read").expect("exists");
        assert!(stored.removed_student_ids.contains(&StudentId(7)));
        assert!(!unenroll(&mut store, &mut student, CourseId(2)).expect("again"));
    }

    #[test]
    fn missing_course_is_not_found() {
        let mut store = crate::store::MemoryStore::new();
        let mut student = StudentAcademicRecord::new(StudentId(7));
        assert!(matches!(
            unenroll(&mut store, &mut student, CourseId(3)),
            Err(CursusError::CourseNotFound(_))
        ));
    }
}
