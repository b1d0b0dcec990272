//! # Cursus
//!
//! Application layer around `cursus-core`: configuration, storage backends,
//! the daily sweep scheduler and the command-line interface.

pub mod cli;
pub mod config;
pub mod scheduler;
pub mod storage;

pub use config::{Backend, CursusConfig, ScheduleConfig, StorageConfig};
pub use scheduler::{SweepScheduler, due_date};
pub use storage::{StoreSession, open_registrar};
