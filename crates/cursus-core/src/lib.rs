//! # cursus-core
//!
//! The academic progression engine for Cursus - THE LOGIC.
//!
//! This crate tracks each student's status within every program they are
//! enrolled in, closes modules on their configured dates, runs the
//! administrator + instructor recovery pipeline, and resolves promotion,
//! graduation or failure when recovery deadlines pass.
//!
//! ## Architectural Constraints
//!
//! The CORE:
//! - Is synchronous and deterministic (`BTreeMap` only, integer grades)
//! - Never reads the clock; the caller passes `today` to the sweep
//! - Has NO async, NO network dependencies (pure Rust)
//! - Reaches storage only through the [`AcademicStore`] trait

// =============================================================================
// MODULES
// =============================================================================

pub mod closure;
pub mod directory;
pub mod enrollment;
pub mod failed;
pub mod formats;
pub mod grading;
pub mod pipeline;
pub mod primitives;
pub mod record;
pub mod registrar;
pub mod status;
pub mod store;
pub mod sweep;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    CourseId, CursusError, ErrorKind, GlobalStatus, ProgramId, ProgramStatus, RecordId, Score,
    StudentId, SubjectId,
};

// =============================================================================
// RE-EXPORTS: Data Model
// =============================================================================

pub use directory::{Course, DirectoryImport, Grade, ModuleDates, Program, Subject};
pub use failed::{FailedSubjectRecord, GradeOutcome, RecoveryState, Resolution};
pub use record::{Advancement, StudentAcademicRecord};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use closure::{ClosureSummary, ModuleClosure, close_module};
pub use pipeline::{ApprovalOutcome, GradeEffect, approve_recovery, grade_recovery};
pub use registrar::{IngestCounts, Registrar, StorageBackend};
pub use status::derive_estado;
pub use store::{AcademicStore, MemoryStore, RedbStore, StoreSnapshot};
pub use sweep::{SweepIssue, SweepReport, run_scheduled_sweep};

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

pub use formats::{PersistenceHeader, snapshot_checksum, store_from_bytes, store_to_bytes};
