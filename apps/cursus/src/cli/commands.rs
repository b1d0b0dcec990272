//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use crate::config::{Backend, CursusConfig};
use crate::scheduler::{SweepScheduler, sweep_once};
use crate::storage::{StoreSession, open_registrar};
use chrono::{NaiveDate, Utc};
use cursus_core::{
    CourseId, CursusError, DirectoryImport, FailedSubjectRecord, GradeOutcome, ProgramId,
    RecordId, StoreSnapshot, StudentId, SubjectId, SweepReport,
    formats::{snapshot_checksum, snapshot_crypto_hash, snapshot_from_bytes, snapshot_to_bytes},
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum file size for ingestion (100 MB).
const MAX_INGEST_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Maximum file size for import (500 MB).
///
/// JSON exports are several times larger than binary snapshots.
const MAX_IMPORT_FILE_SIZE: u64 = 500 * 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), CursusError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| CursusError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(CursusError::Validation(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Resolve an input path and make sure it names a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, CursusError> {
    let canonical = path.canonicalize().map_err(|e| {
        CursusError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(CursusError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Resolve an output path against its (existing) parent directory.
fn validate_output_path(path: &Path) -> Result<PathBuf, CursusError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        CursusError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(CursusError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| CursusError::IoError("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

/// Read an input file after path and size checks.
fn read_input(path: &Path, max_size: u64) -> Result<Vec<u8>, CursusError> {
    let validated = validate_file_path(path)?;
    validate_file_size(&validated, max_size)?;
    std::fs::read(&validated).map_err(|e| CursusError::IoError(format!("Read file: {}", e)))
}

pub fn parse_date(s: &str) -> Result<NaiveDate, CursusError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| CursusError::Validation(format!("Invalid date {s:?} (want YYYY-MM-DD): {e}")))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CursusError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| CursusError::SerializationError(e.to_string()))?;
    println!("{}", json);
    Ok(())
}

// =============================================================================
// DAEMON COMMAND
// =============================================================================

/// Run the scheduler until Ctrl+C.
///
/// The store is only opened while a sweep runs, so interactive commands keep
/// working against the same database.
pub async fn cmd_daemon(config: &CursusConfig) -> Result<(), CursusError> {
    // Fail fast on an unreadable store instead of at the first run
    drop(open_registrar(&config.storage)?);

    println!("Cursus sweep daemon starting...");
    println!();
    println!("Configuration:");
    println!("  Backend:        {}", config.storage.backend);
    println!("  Database:       {:?}", config.storage.database);
    println!("  Run hour (UTC): {}", config.schedule.run_hour_utc);
    println!("  Check every:    {}s", config.schedule.check_interval_secs);
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let scheduler = SweepScheduler::spawn(config.storage.clone(), &config.schedule);

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| CursusError::IoError(format!("Signal handler: {}", e)))?;

    info!("shutdown requested, waiting for the current sweep");
    scheduler.shutdown();
    scheduler.join().await;
    Ok(())
}

// =============================================================================
// SWEEP COMMANDS
// =============================================================================

/// Run the sweep once for `date` (default: today, UTC).
pub async fn cmd_sweep(
    config: &CursusConfig,
    json_mode: bool,
    date: Option<&str>,
) -> Result<(), CursusError> {
    let today = match date {
        Some(s) => parse_date(s)?,
        None => Utc::now().date_naive(),
    };
    let report = sweep_once(&config.storage, today).await?;

    if json_mode {
        print_json(&report)?;
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &SweepReport) {
    println!("Sweep for {}", report.today);
    println!("==================");
    for (program, module) in &report.closures_run {
        println!("Closed:    program {} module {}", program, module);
    }
    for (program, module) in &report.retroactive_repairs {
        println!("Repaired:  program {} module {}", program, module);
    }
    println!("Promoted:  {}", report.promoted);
    println!("Graduated: {}", report.graduated);
    println!("Removed:   {}", report.removed);
    println!("Records:   {}", report.records_processed);
    for issue in &report.issues {
        println!("Issue:     {}: {}", issue.scope, issue.error);
    }
}

/// Close a module immediately.
pub fn cmd_close_module(
    config: &CursusConfig,
    json_mode: bool,
    module: u32,
    program: Option<u64>,
) -> Result<(), CursusError> {
    let mut session = StoreSession::open(&config.storage)?;
    let summary = session
        .registrar_mut()
        .close_module(module, program.map(ProgramId))?;
    session.commit()?;

    if json_mode {
        print_json(&summary)?;
        return Ok(());
    }

    println!("Closed module {}", module);
    println!("Promoted:         {}", summary.promoted);
    println!("Graduated:        {}", summary.graduated);
    println!("Recovery pending: {}", summary.recovery_pending);
    println!("Failed subjects:  {}", summary.failed_subjects_count);
    println!("Deferred:         {}", summary.deferred);
    Ok(())
}

// =============================================================================
// RECOVERY COMMANDS
// =============================================================================

/// Record the administrator decision on one recovery record.
pub fn cmd_approve(
    config: &CursusConfig,
    json_mode: bool,
    record: u64,
    approve: bool,
) -> Result<(), CursusError> {
    let mut session = StoreSession::open(&config.storage)?;
    let outcome = session
        .registrar_mut()
        .approve_recovery(RecordId(record), approve)?;
    session.commit()?;

    if json_mode {
        print_json(&outcome)?;
        return Ok(());
    }

    let verb = if approve { "Approved" } else { "Rejected" };
    if outcome.changed {
        println!("{} recovery record {}", verb, record);
    } else {
        println!("Recovery record {} was already approved", record);
    }
    if outcome.removed {
        println!("Student removed from the course");
    }
    Ok(())
}

/// Record the instructor grade on the active record for a subject.
pub fn cmd_grade(
    config: &CursusConfig,
    json_mode: bool,
    student: u64,
    course: u64,
    subject: Option<u64>,
    outcome: &str,
) -> Result<(), CursusError> {
    let outcome = GradeOutcome::parse(outcome)?;
    let mut session = StoreSession::open(&config.storage)?;
    let effect = session.registrar_mut().grade_recovery(
        StudentId(student),
        CourseId(course),
        subject.map(SubjectId),
        outcome,
    )?;
    session.commit()?;

    if json_mode {
        print_json(&serde_json::json!({
            "student_id": student,
            "course_id": course,
            "subject_id": subject,
            "outcome": outcome.as_str(),
            "effect": effect,
        }))?;
        return Ok(());
    }

    println!(
        "Graded student {} in course {}: {}",
        student,
        course,
        outcome.as_str()
    );
    println!("Effect: {:?}", effect);
    Ok(())
}

// =============================================================================
// STATUS COMMANDS
// =============================================================================

/// Show store totals, or the statuses of one student.
pub fn cmd_status(
    config: &CursusConfig,
    json_mode: bool,
    student: Option<u64>,
) -> Result<(), CursusError> {
    let registrar = open_registrar(&config.storage)?;

    if let Some(id) = student {
        let record = registrar.student(StudentId(id))?;
        if json_mode {
            print_json(&serde_json::json!({
                "student_id": id,
                "estado": record.estado(),
                "program_statuses": record.program_statuses,
                "program_modules": record.program_modules,
                "promotion_pending": record.promotion_pending,
                "group_label": record.group_label,
            }))?;
            return Ok(());
        }

        println!("Student {}", id);
        println!("==================");
        println!("Global status: {}", record.estado());
        for (program, status) in &record.program_statuses {
            let module = record.module(*program).unwrap_or(0);
            let pending = if record.is_promotion_pending(*program) {
                " (promotion pending)"
            } else {
                ""
            };
            println!(
                "Program {}: {} at module {}{}",
                program, status, module, pending
            );
        }
        return Ok(());
    }

    let store = registrar.store();
    let programs = store.programs()?.len();
    let courses = store.courses()?.len();
    let students = store.students()?.len();
    let records = store.failed_records()?;
    let open = records.iter().filter(|r| !r.recovery_processed()).count();
    let awaiting_admin = records.iter().filter(|r| r.awaits_admin()).count();
    let closures = store.closures()?.len();

    if json_mode {
        print_json(&serde_json::json!({
            "database": config.storage.database.to_string_lossy(),
            "backend": config.storage.backend.as_str(),
            "programs": programs,
            "courses": courses,
            "students": students,
            "failed_records": records.len(),
            "open_records": open,
            "awaiting_admin": awaiting_admin,
            "closures": closures,
        }))?;
        return Ok(());
    }

    println!("Cursus Store Status");
    println!("==================");
    println!("Database: {:?}", config.storage.database);
    println!("Backend:  {}", config.storage.backend);
    println!();
    println!("Programs:       {}", programs);
    println!("Courses:        {}", courses);
    println!("Students:       {}", students);
    println!(
        "Failed records: {} ({} open, {} awaiting admin)",
        records.len(),
        open,
        awaiting_admin
    );
    println!("Closures run:   {}", closures);

    Ok(())
}

/// List failed-subject records.
pub fn cmd_records(
    config: &CursusConfig,
    json_mode: bool,
    student: Option<u64>,
) -> Result<(), CursusError> {
    let registrar = open_registrar(&config.storage)?;
    let records = registrar.records(student.map(StudentId))?;

    if json_mode {
        print_json(&records)?;
        return Ok(());
    }

    if records.is_empty() {
        println!("No failed-subject records");
        return Ok(());
    }
    for record in &records {
        println!("{}", describe_record(record));
    }
    Ok(())
}

fn describe_record(record: &FailedSubjectRecord) -> String {
    let subject = record
        .subject_id
        .map_or_else(|| "course".to_string(), |s| format!("subject {}", s));
    format!(
        "#{} student {} course {} {} module {} avg {} -> {:?}",
        record.id,
        record.student_id,
        record.course_id,
        subject,
        record.module_number,
        record.average,
        record.state
    )
}

// =============================================================================
// INGEST COMMAND
// =============================================================================

/// Load directory data from a JSON file.
pub fn cmd_ingest(config: &CursusConfig, json_mode: bool, file: &Path) -> Result<(), CursusError> {
    info!("Ingesting directory data from {:?}", file);

    let contents = read_input(file, MAX_INGEST_FILE_SIZE)?;
    let import: DirectoryImport = serde_json::from_slice(&contents)
        .map_err(|e| CursusError::DeserializationError(format!("Directory JSON: {}", e)))?;

    let mut session = StoreSession::open(&config.storage)?;
    let counts = session.registrar_mut().ingest(import)?;
    session.commit()?;

    if json_mode {
        print_json(&counts)?;
        return Ok(());
    }

    println!("Ingested:");
    println!("  Programs:   {}", counts.programs);
    println!("  Subjects:   {}", counts.subjects);
    println!("  Courses:    {}", counts.courses);
    println!("  Grade sets: {}", counts.grade_sets);
    println!(
        "  Students:   {} new, {} kept",
        counts.students_created, counts.students_kept
    );
    Ok(())
}

// =============================================================================
// EXPORT COMMAND
// =============================================================================

/// Export the store as a binary snapshot or JSON.
pub fn cmd_export(config: &CursusConfig, output: &Path, format: &str) -> Result<(), CursusError> {
    let validated_output = validate_output_path(output)?;

    let registrar = open_registrar(&config.storage)?;
    let snapshot = registrar.snapshot()?;

    let data = match format {
        "snapshot" => {
            let data = snapshot_to_bytes(&snapshot)?;
            println!("Checksum: {}", snapshot_checksum(registrar.store())?);
            data
        }
        "json" => serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| CursusError::SerializationError(e.to_string()))?,
        _ => {
            return Err(CursusError::Validation(format!(
                "Unknown format: {}. Use: snapshot, json",
                format
            )));
        }
    };

    std::fs::write(&validated_output, &data)
        .map_err(|e| CursusError::IoError(format!("Write file: {}", e)))?;

    println!("Exported {} bytes to {:?}", data.len(), validated_output);

    Ok(())
}

// =============================================================================
// IMPORT COMMAND
// =============================================================================

/// Import an export into an empty store.
pub fn cmd_import(config: &CursusConfig, input: &Path, format: &str) -> Result<(), CursusError> {
    let data = read_input(input, MAX_IMPORT_FILE_SIZE)?;

    let snapshot: StoreSnapshot = match format {
        "snapshot" => snapshot_from_bytes(&data)?,
        "json" => serde_json::from_slice(&data)
            .map_err(|e| CursusError::DeserializationError(e.to_string()))?,
        _ => {
            return Err(CursusError::Validation(format!(
                "Unknown format: {}. Use: snapshot, json",
                format
            )));
        }
    };
    let students = snapshot.students.len();
    let records = snapshot.failed_records.len();

    let mut session = StoreSession::open(&config.storage)?;
    session.registrar_mut().restore(snapshot)?;
    session.commit()?;

    println!(
        "Imported store: {} students, {} failed-subject records",
        students, records
    );

    Ok(())
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize new database.
pub fn cmd_init(config: &CursusConfig, force: bool) -> Result<(), CursusError> {
    let db_path = &config.storage.database;
    if db_path.exists() {
        if !force {
            return Err(CursusError::StateConflict(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(db_path)
            .map_err(|e| CursusError::IoError(format!("Remove db: {}", e)))?;
    }

    StoreSession::open(&config.storage)?.commit()?;
    match config.storage.backend {
        Backend::Redb => println!("Initialized new redb database at {:?}", db_path),
        Backend::File => println!("Initialized new snapshot file at {:?}", db_path),
    }

    Ok(())
}

// =============================================================================
// HASH COMMAND
// =============================================================================

/// Print the FNV-1a checksum and BLAKE3 hash of the store.
pub fn cmd_hash(config: &CursusConfig, json_mode: bool) -> Result<(), CursusError> {
    let registrar = open_registrar(&config.storage)?;
    let checksum = snapshot_checksum(registrar.store())?;
    let blake3 = snapshot_crypto_hash(registrar.store())?;

    if json_mode {
        print_json(&serde_json::json!({
            "checksum": checksum,
            "blake3": blake3,
        }))?;
        return Ok(());
    }

    println!("Checksum (FNV-1a): {:016x}", checksum);
    println!("BLAKE3:            {}", blake3);
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn print_json_reports_unserializable_values() {
        // JSON object keys must be strings
        let mut by_pair = BTreeMap::new();
        by_pair.insert((1u32, 2u32), "module");
        let err = print_json(&by_pair).expect_err("tuple keys");
        assert!(matches!(err, CursusError::SerializationError(_)));
    }

    #[test]
    fn parse_date_rejects_other_layouts() {
        assert!(parse_date("2025-03-31").is_ok());
        assert!(matches!(
            parse_date("31/03/2025"),
            Err(CursusError::Validation(_))
        ));
    }
}
