//! # Student Academic Record
//!
//! Per-student, per-program module position and status.
//!
//! The global estado is never stored. It is derived from `program_statuses`
//! on every read via [`crate::status::derive_estado`].

use crate::status::derive_estado;
use crate::{GlobalStatus, ProgramId, ProgramStatus, StudentId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Result of advancing a student past a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Advancement {
    /// Moved on to the given module.
    Promoted(u32),
    /// Completed the final module.
    Graduated,
    /// Nothing changed (already graduated, or not positioned in the program).
    Unchanged,
}

/// Academic position of one student across all enrolled programs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StudentAcademicRecord {
    pub student_id: StudentId,
    /// Current module per program. Never decreases.
    #[serde(default)]
    pub program_modules: BTreeMap<ProgramId, u32>,
    #[serde(default)]
    pub program_statuses: BTreeMap<ProgramId, ProgramStatus>,
    /// Programs whose promotion waits for the recovery-close pass.
    #[serde(default)]
    pub promotion_pending: BTreeSet<ProgramId>,
    /// Legacy cohort label, cleared once the student holds no enrollment.
    #[serde(default)]
    pub group_label: Option<String>,
    /// Optimistic-concurrency version, bumped by the store on every write.
    #[serde(default)]
    pub version: u64,
}

impl StudentAcademicRecord {
    #[must_use]
    pub fn new(student_id: StudentId) -> Self {
        Self {
            student_id,
            ..Self::default()
        }
    }

    /// Derived global status.
    #[must_use]
    pub fn estado(&self) -> GlobalStatus {
        derive_estado(&self.program_statuses)
    }

    #[must_use]
    pub fn module(&self, program: ProgramId) -> Option<u32> {
        self.program_modules.get(&program).copied()
    }

    #[must_use]
    pub fn status(&self, program: ProgramId) -> Option<ProgramStatus> {
        self.program_statuses.get(&program).copied()
    }

    /// `true` when the student is at `module` of `program` with the given status.
    #[must_use]
    pub fn is_at(&self, program: ProgramId, module: u32, status: ProgramStatus) -> bool {
        self.module(program) == Some(module) && self.status(program) == Some(status)
    }

    #[must_use]
    pub fn is_promotion_pending(&self, program: ProgramId) -> bool {
        self.promotion_pending.contains(&program)
    }

    pub fn set_status(&mut self, program: ProgramId, status: ProgramStatus) {
        self.program_statuses.insert(program, status);
    }

    pub fn defer_promotion(&mut self, program: ProgramId) {
        self.promotion_pending.insert(program);
    }

    /// Advance past the current module of `program`.
    ///
    /// Below the final module the module number increments and the status
    /// becomes active; at the final module the status becomes graduated.
    /// Always clears the pending-promotion flag.
    pub fn promote(&mut self, program: ProgramId, max_modules: u32) -> Advancement {
        self.promotion_pending.remove(&program);
        if self.status(program) == Some(ProgramStatus::Graduated) {
            return Advancement::Unchanged;
        }
        let Some(current) = self.module(program) else {
            return Advancement::Unchanged;
        };
        if current < max_modules {
            let next = current.saturating_add(1);
            self.program_modules.insert(program, next);
            self.set_status(program, ProgramStatus::Active);
            Advancement::Promoted(next)
        } else {
            self.set_status(program, ProgramStatus::Graduated);
            Advancement::Graduated
        }
    }

    /// Mark the program as failed and drop any deferred promotion.
    pub fn fail(&mut self, program: ProgramId) {
        self.promotion_pending.remove(&program);
        self.set_status(program, ProgramStatus::Failed);
    }
}

/// Builders for unit tests.
#[cfg(test)]
impl StudentAcademicRecord {
    /// Enroll in a program at module 1 as active.
    pub(crate) fn enrolled_in(self, program: ProgramId) -> Self {
        self.at_module(program, 1)
    }

    /// Place the student at a given module.
    pub(crate) fn at_module(mut self, program: ProgramId, module: u32) -> Self {
        self.program_modules.insert(program, module);
        self.program_statuses
            .entry(program)
            .or_insert(ProgramStatus::Active);
        self
    }

    pub(crate) fn with_group_label(mut self, label: impl Into<String>) -> Self {
        self.group_label = Some(label.into());
        self
    }
}

// =============================================================================
// TESTS
// =============================================================================
