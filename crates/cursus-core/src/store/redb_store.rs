//! # redb-backed Academic Store
//!
//! A disk-backed store using the redb embedded database, providing:
//! - ACID transactions
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//!
//! Every mutation runs in its own write transaction. The compare-and-swap
//! checks (student versions, unique active records, processed records,
//! closure existence) happen inside that transaction, so they hold even when
//! two `Registrar`s share the file.

use super::{
    AcademicStore, StoreSnapshot, ensure_not_processed, ensure_unique_active, ensure_version,
};
use crate::closure::ModuleClosure;
use crate::directory::{Course, Grade, Program, Subject};
use crate::failed::FailedSubjectRecord;
use crate::record::StudentAcademicRecord;
use crate::{CourseId, CursusError, ProgramId, RecordId, StudentId, SubjectId};
use redb::{Database, DatabaseError, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::Path;

type BlobTable = TableDefinition<'static, u64, &'static [u8]>;

/// Table for programs: ProgramId(u64) -> serialized Program
const PROGRAMS: BlobTable = TableDefinition::new("programs");

/// Table for subjects: SubjectId(u64) -> serialized Subject
const SUBJECTS: BlobTable = TableDefinition::new("subjects");

/// Table for courses: CourseId(u64) -> serialized Course
const COURSES: BlobTable = TableDefinition::new("courses");

/// Table for students: StudentId(u64) -> serialized StudentAcademicRecord
const STUDENTS: BlobTable = TableDefinition::new("students");

/// Table for failed subject records: RecordId(u64) -> serialized FailedSubjectRecord
const FAILED_RECORDS: BlobTable = TableDefinition::new("failed_records");

/// Table for grades: (student_id, course_id) -> serialized Vec<Grade>
const GRADES: TableDefinition<(u64, u64), &[u8]> = TableDefinition::new("grades");

/// Table for closures: (program_id, module) -> serialized ModuleClosure
const CLOSURES: TableDefinition<(u64, u32), &[u8]> = TableDefinition::new("module_closures");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const NEXT_RECORD_ID: &str = "next_record_id";

fn io_err(e: impl std::fmt::Display) -> CursusError {
    CursusError::IoError(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CursusError> {
    postcard::to_allocvec(value).map_err(|e| CursusError::SerializationError(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CursusError> {
    postcard::from_bytes(bytes).map_err(|e| CursusError::DeserializationError(e.to_string()))
}

/// A disk-backed academic store using redb.
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a database at the given path.
    ///
    /// Fails with [`CursusError::StoreBusy`] while another handle holds the file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CursusError> {
        let db = Database::create(path.as_ref()).map_err(|e| match e {
            DatabaseError::DatabaseAlreadyOpen => {
                CursusError::StoreBusy(format!("{} is open elsewhere", path.as_ref().display()))
            }
            other => io_err(other),
        })?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(io_err)?;
            for table in [PROGRAMS, SUBJECTS, COURSES, STUDENTS, FAILED_RECORDS] {
                let _ = write_txn.open_table(table).map_err(io_err)?;
            }
            let _ = write_txn.open_table(GRADES).map_err(io_err)?;
            let _ = write_txn.open_table(CLOSURES).map_err(io_err)?;
            let _ = write_txn.open_table(METADATA).map_err(io_err)?;
            write_txn.commit().map_err(io_err)?;
        }

        Ok(Self { db })
    }

    /// Load a snapshot into an empty database in one transaction.
    ///
    /// Record ids, versions and the id counter are kept as they are in the
    /// snapshot.
    pub fn restore(&mut self, snapshot: StoreSnapshot) -> Result<(), CursusError> {
        if !self.programs()?.is_empty() || !self.students()?.is_empty() {
            return Err(CursusError::StateConflict(
                "database is not empty; restore needs a fresh file".to_string(),
            ));
        }
        for program in &snapshot.programs {
            program.validate()?;
        }

        let mut grades: BTreeMap<(u64, u64), Vec<Grade>> = BTreeMap::new();
        for grade in snapshot.grades {
            grades
                .entry((grade.student_id.0, grade.course_id.0))
                .or_default()
                .push(grade);
        }
        let highest = snapshot
            .failed_records
            .iter()
            .map(|r| r.id.0)
            .max()
            .unwrap_or(0);

        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut table = write_txn.open_table(PROGRAMS).map_err(io_err)?;
            for p in &snapshot.programs {
                table.insert(p.id.0, encode(p)?.as_slice()).map_err(io_err)?;
            }
            let mut table = write_txn.open_table(SUBJECTS).map_err(io_err)?;
            for s in &snapshot.subjects {
                table.insert(s.id.0, encode(s)?.as_slice()).map_err(io_err)?;
            }
            let mut table = write_txn.open_table(COURSES).map_err(io_err)?;
            for c in &snapshot.courses {
                table.insert(c.id.0, encode(c)?.as_slice()).map_err(io_err)?;
            }
            let mut table = write_txn.open_table(STUDENTS).map_err(io_err)?;
            for s in &snapshot.students {
                table
                    .insert(s.student_id.0, encode(s)?.as_slice())
                    .map_err(io_err)?;
            }
            let mut table = write_txn.open_table(FAILED_RECORDS).map_err(io_err)?;
            for r in &snapshot.failed_records {
                table.insert(r.id.0, encode(r)?.as_slice()).map_err(io_err)?;
            }
            let mut table = write_txn.open_table(GRADES).map_err(io_err)?;
            for (key, list) in &grades {
                table.insert(*key, encode(list)?.as_slice()).map_err(io_err)?;
            }
            let mut table = write_txn.open_table(CLOSURES).map_err(io_err)?;
            for c in &snapshot.closures {
                table
                    .insert((c.program_id.0, c.module_number), encode(c)?.as_slice())
                    .map_err(io_err)?;
            }
            let mut meta = write_txn.open_table(METADATA).map_err(io_err)?;
            let next = snapshot.next_record_id.max(highest.saturating_add(1));
            meta.insert(NEXT_RECORD_ID, next).map_err(io_err)?;
        }
        write_txn.commit().map_err(io_err)?;
        Ok(())
    }

    fn read_one<T: DeserializeOwned>(
        &self,
        table: BlobTable,
        key: u64,
    ) -> Result<Option<T>, CursusError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(table).map_err(io_err)?;
        match table.get(key).map_err(io_err)? {
            Some(data) => Ok(Some(decode(data.value())?)),
            None => Ok(None),
        }
    }

    fn read_all<T: DeserializeOwned>(&self, table: BlobTable) -> Result<Vec<T>, CursusError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(table).map_err(io_err)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(io_err)? {
            let (_, value) = entry.map_err(io_err)?;
            out.push(decode(value.value())?);
        }
        Ok(out)
    }

    fn write_one<T: Serialize>(
        &self,
        table: BlobTable,
        key: u64,
        value: &T,
    ) -> Result<(), CursusError> {
        let bytes = encode(value)?;
        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut table = write_txn.open_table(table).map_err(io_err)?;
            table.insert(key, bytes.as_slice()).map_err(io_err)?;
        }
        write_txn.commit().map_err(io_err)?;
        Ok(())
    }
}

// =============================================================================
// ACADEMICSTORE TRAIT IMPLEMENTATION
// =============================================================================

impl AcademicStore for RedbStore {
    fn program(&self, id: ProgramId) -> Result<Option<Program>, CursusError> {
        self.read_one(PROGRAMS, id.0)
    }

    fn programs(&self) -> Result<Vec<Program>, CursusError> {
        self.read_all(PROGRAMS)
    }

    fn put_program(&mut self, program: Program) -> Result<(), CursusError> {
        program.validate()?;
        self.write_one(PROGRAMS, program.id.0, &program)
    }

    fn subject(&self, id: SubjectId) -> Result<Option<Subject>, CursusError> {
        self.read_one(SUBJECTS, id.0)
    }

    fn subjects(&self) -> Result<Vec<Subject>, CursusError> {
        self.read_all(SUBJECTS)
    }

    fn put_subject(&mut self, subject: Subject) -> Result<(), CursusError> {
        self.write_one(SUBJECTS, subject.id.0, &subject)
    }

    fn course(&self, id: CourseId) -> Result<Option<Course>, CursusError> {
        self.read_one(COURSES, id.0)
    }

    fn courses(&self) -> Result<Vec<Course>, CursusError> {
        self.read_all(COURSES)
    }

    fn put_course(&mut self, course: Course) -> Result<(), CursusError> {
        self.write_one(COURSES, course.id.0, &course)
    }

    fn grades_for(
        &self,
        student: StudentId,
        course: CourseId,
    ) -> Result<Vec<Grade>, CursusError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(GRADES).map_err(io_err)?;
        match table.get((student.0, course.0)).map_err(io_err)? {
            Some(data) => decode(data.value()),
            None => Ok(Vec::new()),
        }
    }

    fn grades(&self) -> Result<Vec<Grade>, CursusError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(GRADES).map_err(io_err)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(io_err)? {
            let (_, value) = entry.map_err(io_err)?;
            out.extend(decode::<Vec<Grade>>(value.value())?);
        }
        Ok(out)
    }

    fn put_grades(
        &mut self,
        student: StudentId,
        course: CourseId,
        grades: Vec<Grade>,
    ) -> Result<(), CursusError> {
        let key = (student.0, course.0);
        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut table = write_txn.open_table(GRADES).map_err(io_err)?;
            if grades.is_empty() {
                table.remove(key).map_err(io_err)?;
            } else {
                let bytes = encode(&grades)?;
                table.insert(key, bytes.as_slice()).map_err(io_err)?;
            }
        }
        write_txn.commit().map_err(io_err)?;
        Ok(())
    }

    fn student(&self, id: StudentId) -> Result<Option<StudentAcademicRecord>, CursusError> {
        self.read_one(STUDENTS, id.0)
    }

    fn students(&self) -> Result<Vec<StudentAcademicRecord>, CursusError> {
        self.read_all(STUDENTS)
    }

    fn save_student(&mut self, record: &mut StudentAcademicRecord) -> Result<(), CursusError> {
        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut table = write_txn.open_table(STUDENTS).map_err(io_err)?;
            let stored = match table.get(record.student_id.0).map_err(io_err)? {
                Some(data) => Some(decode::<StudentAcademicRecord>(data.value())?.version),
                None => None,
            };
            ensure_version(stored, record)?;

            let mut next = record.clone();
            next.version = record.version.saturating_add(1);
            let bytes = encode(&next)?;
            table
                .insert(record.student_id.0, bytes.as_slice())
                .map_err(io_err)?;
        }
        write_txn.commit().map_err(io_err)?;

        // Update the caller's copy only after successful commit.
        record.version = record.version.saturating_add(1);
        Ok(())
    }

    fn failed_record(&self, id: RecordId) -> Result<Option<FailedSubjectRecord>, CursusError> {
        self.read_one(FAILED_RECORDS, id.0)
    }

    fn failed_records(&self) -> Result<Vec<FailedSubjectRecord>, CursusError> {
        self.read_all(FAILED_RECORDS)
    }

    fn insert_failed_record(
        &mut self,
        mut record: FailedSubjectRecord,
    ) -> Result<RecordId, CursusError> {
        let write_txn = self.db.begin_write().map_err(io_err)?;
        let id = {
            let mut table = write_txn.open_table(FAILED_RECORDS).map_err(io_err)?;
            let mut meta = write_txn.open_table(METADATA).map_err(io_err)?;

            let mut existing = Vec::new();
            for entry in table.iter().map_err(io_err)? {
                let (_, value) = entry.map_err(io_err)?;
                existing.push(decode::<FailedSubjectRecord>(value.value())?);
            }
            ensure_unique_active(&existing, &record)?;

            let next = meta
                .get(NEXT_RECORD_ID)
                .map_err(io_err)?
                .map(|v| v.value())
                .unwrap_or(1)
                .max(1);
            let id = RecordId(next);
            record.id = id;

            let bytes = encode(&record)?;
            table.insert(id.0, bytes.as_slice()).map_err(io_err)?;
            meta.insert(NEXT_RECORD_ID, next.saturating_add(1))
                .map_err(io_err)?;
            id
        };
        write_txn.commit().map_err(io_err)?;
        Ok(id)
    }

    fn update_failed_record(&mut self, record: &FailedSubjectRecord) -> Result<(), CursusError> {
        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut table = write_txn.open_table(FAILED_RECORDS).map_err(io_err)?;
            let stored = match table.get(record.id.0).map_err(io_err)? {
                Some(data) => decode::<FailedSubjectRecord>(data.value())?,
                None => return Err(CursusError::RecordNotFound(record.id)),
            };
            ensure_not_processed(&stored)?;
            let bytes = encode(record)?;
            table.insert(record.id.0, bytes.as_slice()).map_err(io_err)?;
        }
        write_txn.commit().map_err(io_err)?;
        Ok(())
    }

    fn closure(
        &self,
        program: ProgramId,
        module: u32,
    ) -> Result<Option<ModuleClosure>, CursusError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(CLOSURES).map_err(io_err)?;
        match table.get((program.0, module)).map_err(io_err)? {
            Some(data) => Ok(Some(decode(data.value())?)),
            None => Ok(None),
        }
    }

    fn closures(&self) -> Result<Vec<ModuleClosure>, CursusError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(CLOSURES).map_err(io_err)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(io_err)? {
            let (_, value) = entry.map_err(io_err)?;
            out.push(decode(value.value())?);
        }
        Ok(out)
    }

    fn insert_closure(&mut self, closure: ModuleClosure) -> Result<bool, CursusError> {
        let key = (closure.program_id.0, closure.module_number);
        let write_txn = self.db.begin_write().map_err(io_err)?;
        let inserted = {
            let mut table = write_txn.open_table(CLOSURES).map_err(io_err)?;
            let exists = table.get(key).map_err(io_err)?.is_some();
            if !exists {
                let bytes = encode(&closure)?;
                table.insert(key, bytes.as_slice()).map_err(io_err)?;
            }
            !exists
        };
        write_txn.commit().map_err(io_err)?;
        Ok(inserted)
    }

    fn next_record_id(&self) -> Result<u64, CursusError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(METADATA).map_err(io_err)?;
        Ok(table
            .get(NEXT_RECORD_ID)
            .map_err(io_err)?
            .map(|v| v.value())
            .unwrap_or(1)
            .max(1))
    }
}

// =============================================================================
// TESTS
// =============================================================================
