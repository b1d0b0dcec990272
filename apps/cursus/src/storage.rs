//! # Storage
//!
//! Opens and saves the registrar for the configured backend.
//!
//! Every command and every scheduled sweep works through a [`StoreSession`]
//! that lives for one unit of work, so the daemon never keeps the store
//! between runs:
//! - `redb`: the file lock is held only while the session lives. Opening
//!   waits a bounded time for another holder to let go.
//! - `file`: the snapshot is read on open and written back only if the file
//!   still holds the state it was loaded from.

use crate::config::{Backend, StorageConfig};
use cursus_core::{
    CursusError, Registrar, snapshot_checksum, store_from_bytes, store_to_bytes,
};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Pause between attempts to open a locked redb file.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Attempts before giving up on a locked redb file (about 10 seconds).
const LOCK_RETRY_ATTEMPTS: u32 = 100;

/// Open the registrar, creating an empty one when the file does not exist.
///
/// For read-only callers. Mutations go through [`StoreSession`].
pub fn open_registrar(storage: &StorageConfig) -> Result<Registrar, CursusError> {
    match storage.backend {
        Backend::Redb => open_redb(&storage.database),
        Backend::File => match read_snapshot(&storage.database)? {
            Some(data) => Ok(Registrar::with_store(store_from_bytes(&data)?)),
            None => Ok(Registrar::new()),
        },
    }
}

fn open_redb(path: &Path) -> Result<Registrar, CursusError> {
    let mut attempt = 1;
    loop {
        match Registrar::with_redb(path) {
            Err(CursusError::StoreBusy(reason)) if attempt < LOCK_RETRY_ATTEMPTS => {
                debug!(attempt, %reason, "database busy, waiting");
                std::thread::sleep(LOCK_RETRY_INTERVAL);
                attempt += 1;
            }
            other => return other,
        }
    }
}

fn read_snapshot(path: &Path) -> Result<Option<Vec<u8>>, CursusError> {
    match std::fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CursusError::IoError(format!("Read db: {}", e))),
    }
}

/// Checksum of the snapshot currently on disk, `None` when there is no file.
fn disk_checksum(path: &Path) -> Result<Option<u64>, CursusError> {
    read_snapshot(path)?
        .map(|data| snapshot_checksum(&store_from_bytes(&data)?))
        .transpose()
}

/// Write-then-rename so a crash never leaves a truncated snapshot.
fn write_snapshot(registrar: &Registrar, path: &Path) -> Result<(), CursusError> {
    let data = store_to_bytes(registrar.store())?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, &data).map_err(|e| CursusError::IoError(format!("Write db: {}", e)))?;
    std::fs::rename(&tmp, path).map_err(|e| CursusError::IoError(format!("Replace db: {}", e)))?;
    Ok(())
}

/// A registrar opened for one command or one sweep.
#[derive(Debug)]
pub struct StoreSession {
    registrar: Registrar,
    storage: StorageConfig,
    /// Checksum of the snapshot as loaded; `None` when there was no file.
    loaded: Option<u64>,
}

impl StoreSession {
    pub fn open(storage: &StorageConfig) -> Result<Self, CursusError> {
        let registrar = open_registrar(storage)?;
        let loaded = match storage.backend {
            Backend::File if storage.database.exists() => {
                Some(snapshot_checksum(registrar.store())?)
            }
            _ => None,
        };
        Ok(Self {
            registrar,
            storage: storage.clone(),
            loaded,
        })
    }

    #[must_use]
    pub fn registrar(&self) -> &Registrar {
        &self.registrar
    }

    pub fn registrar_mut(&mut self) -> &mut Registrar {
        &mut self.registrar
    }

    /// Persist the session and release the store.
    ///
    /// Redb writes are already durable. A snapshot file that changed on disk
    /// since it was loaded is left alone and the call fails with
    /// [`CursusError::StoreBusy`]; the caller retries with a fresh session.
    pub fn commit(self) -> Result<(), CursusError> {
        if self.registrar.is_persistent() {
            return Ok(());
        }
        let path = &self.storage.database;
        if disk_checksum(path)? != self.loaded {
            return Err(CursusError::StoreBusy(format!(
                "{} changed on disk since it was loaded",
                path.display()
            )));
        }
        write_snapshot(&self.registrar, path)
    }
}
