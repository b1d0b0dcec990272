//! # Configuration
//!
//! Settings read from `cursus.toml`. Every key is optional:
//!
//! ```toml
//! [storage]
//! database = "cursus.db"
//! backend = "redb"          # or "file"
//!
//! [schedule]
//! run_hour_utc = 2
//! check_interval_secs = 3600
//! ```
//!
//! Command-line flags override whatever the file sets.

use cursus_core::CursusError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "cursus.toml";

/// Maximum config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

// =============================================================================
// BACKEND
// =============================================================================

/// Where academic data lives between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// A snapshot file rewritten after every change.
    File,
    /// A redb database (ACID, updated in place).
    #[default]
    Redb,
}

impl Backend {
    pub fn parse(s: &str) -> Result<Self, CursusError> {
        match s {
            "file" => Ok(Self::File),
            "redb" => Ok(Self::Redb),
            other => Err(CursusError::Validation(format!(
                "unknown backend: {other:?} (use file or redb)"
            ))),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Redb => "redb",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// SECTIONS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub database: PathBuf,
    pub backend: Backend,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("cursus.db"),
            backend: Backend::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleConfig {
    /// Earliest UTC hour at which the daily sweep may run.
    pub run_hour_utc: u32,
    /// How often the scheduler wakes up to check whether the sweep is due.
    pub check_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            run_hour_utc: 2,
            check_interval_secs: 3600,
        }
    }
}

impl ScheduleConfig {
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}

// =============================================================================
// CURSUS CONFIG
// =============================================================================

/// The whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CursusConfig {
    pub storage: StorageConfig,
    pub schedule: ScheduleConfig,
}

impl CursusConfig {
    /// Parse and validate TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, CursusError> {
        let config: Self = toml::from_str(text)
            .map_err(|e| CursusError::Validation(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a config file.
    pub fn load(path: &Path) -> Result<Self, CursusError> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            CursusError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(CursusError::Validation(format!(
                "Config file size {} bytes exceeds maximum allowed {} bytes",
                metadata.len(),
                MAX_CONFIG_FILE_SIZE
            )));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| CursusError::IoError(format!("Read config: {}", e)))?;
        Self::from_toml_str(&text)
    }

    /// Load the explicit path, or `cursus.toml` if present, or the defaults.
    ///
    /// An explicit path that does not exist is an error; a missing default
    /// file is not.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, CursusError> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.is_file() {
                    Self::load(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), CursusError> {
        if self.schedule.run_hour_utc > 23 {
            return Err(CursusError::Validation(format!(
                "schedule.run_hour_utc must be 0..=23, got {}",
                self.schedule.run_hour_utc
            )));
        }
        if self.schedule.check_interval_secs == 0 {
            return Err(CursusError::Validation(
                "schedule.check_interval_secs must be positive".to_string(),
            ));
        }
        if self.storage.database.as_os_str().is_empty() {
            return Err(CursusError::Validation(
                "storage.database must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
