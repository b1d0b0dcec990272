//! # Status Deriver
//!
//! Combines per-program statuses into one global status.

use crate::{GlobalStatus, ProgramId, ProgramStatus};
use std::collections::BTreeMap;

/// Derive the global estado from per-program statuses.
///
/// Priority, first match wins:
/// 1. any `activo` → `activo`
/// 2. all `egresado` → `egresado`
/// 3. any `pendiente_recuperacion` → `pendiente_recuperacion`
/// 4. any `egresado` → `egresado`
/// 5. any `reprobado` → `reprobado`
/// 6. otherwise `retirado`
///
/// An empty map yields `activo`.
#[must_use]
pub fn derive_estado(statuses: &BTreeMap<ProgramId, ProgramStatus>) -> GlobalStatus {
    if statuses.is_empty() {
        return ProgramStatus::Active;
    }
    let any = |wanted: ProgramStatus| statuses.values().any(|s| *s == wanted);

    if any(ProgramStatus::Active) {
        ProgramStatus::Active
    } else if statuses.values().all(|s| *s == ProgramStatus::Graduated) {
        ProgramStatus::Graduated
    } else if any(ProgramStatus::PendingRecovery) {
        ProgramStatus::PendingRecovery
    } else if any(ProgramStatus::Graduated) {
        ProgramStatus::Graduated
    } else if any(ProgramStatus::Failed) {
        ProgramStatus::Failed
    } else {
        ProgramStatus::Withdrawn
    }
}
