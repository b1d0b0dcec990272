//! # Primitives
//!
//! Hardcoded constants for the Cursus core.
//!
//! The grading scale, the passing threshold and the snapshot header are
//! compiled into the binary and are immutable at runtime.

/// Top of the grading scale in hundredths (5.00).
pub const MAX_SCORE: u16 = 500;

/// Minimum subject average required to pass a module, in hundredths (3.00).
///
/// A subject average strictly below this value marks the subject as failing.
pub const PASSING_SCORE: u16 = 300;

/// Magic bytes for the Cursus snapshot header.
///
/// - File Header = Magic Bytes ("CURS") + Version (u8) before payload.
pub const MAGIC_BYTES: &[u8; 4] = b"CURS";

/// Current snapshot format version.
///
/// Increment this when making breaking changes to the serialization format.
pub const FORMAT_VERSION: u8 = 1;

/// Upper bound on `Program::max_modules`.
///
/// Keeps the sweep's per-program module loop bounded.
pub const MAX_MODULES_PER_PROGRAM: u32 = 64;
