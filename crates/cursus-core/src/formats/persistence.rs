//! # Persistence Format
//!
//! Binary snapshots of a whole academic store.
//!
//! Format: Header (5 bytes) + postcard-serialized [`StoreSnapshot`].
//! - 4 bytes: Magic ("CURS")
//! - 1 byte: Version
//!
//! File I/O lives in the app layer; these are pure transformations.
//!
//! ## Validation
//!
//! Size limits and the header are checked before the payload is decoded.

use crate::store::{AcademicStore, MemoryStore, StoreSnapshot};
use crate::{CursusError, primitives};

// =============================================================================
// LIMITS
// =============================================================================

/// Maximum accepted snapshot size.
///
/// Checked before deserialization so a corrupted or hostile file cannot force
/// a huge allocation.
pub const MAX_PERSISTENCE_PAYLOAD_SIZE: usize = 256 * 1024 * 1024; // 256 MB

/// Header only.
const HEADER_LEN: usize = 5;

// =============================================================================
// FILE HEADER
// =============================================================================

/// The header that precedes every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistenceHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl PersistenceHeader {
    /// Header for the current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *primitives::MAGIC_BYTES,
            version: primitives::FORMAT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<(), CursusError> {
        if &self.magic != primitives::MAGIC_BYTES {
            return Err(CursusError::DeserializationError(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != primitives::FORMAT_VERSION {
            return Err(CursusError::DeserializationError(format!(
                "Unsupported version: {} (expected {})",
                self.version,
                primitives::FORMAT_VERSION
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CursusError> {
        let Some(header) = bytes.get(..HEADER_LEN) else {
            return Err(CursusError::DeserializationError(
                "Header too short".to_string(),
            ));
        };
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&header[0..4]);
        Ok(Self {
            magic,
            version: header[4],
        })
    }
}

impl Default for PersistenceHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// SERIALIZATION FUNCTIONS
// =============================================================================

/// Serialize a snapshot to bytes (header + payload).
pub fn snapshot_to_bytes(snapshot: &StoreSnapshot) -> Result<Vec<u8>, CursusError> {
    let payload = postcard::to_stdvec(snapshot)
        .map_err(|e| CursusError::SerializationError(e.to_string()))?;

    let mut result = Vec::with_capacity(HEADER_LEN + payload.len());
    result.extend_from_slice(&PersistenceHeader::new().to_bytes());
    result.extend_from_slice(&payload);
    Ok(result)
}

/// Deserialize a snapshot, validating size and header first.
pub fn snapshot_from_bytes(bytes: &[u8]) -> Result<StoreSnapshot, CursusError> {
    if bytes.len() < HEADER_LEN {
        return Err(CursusError::DeserializationError(format!(
            "Data too short: minimum {} bytes required",
            HEADER_LEN
        )));
    }
    if bytes.len() > MAX_PERSISTENCE_PAYLOAD_SIZE {
        return Err(CursusError::DeserializationError(format!(
            "Data size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_PERSISTENCE_PAYLOAD_SIZE
        )));
    }

    PersistenceHeader::from_bytes(bytes)?.validate()?;

    postcard::from_bytes(&bytes[HEADER_LEN..]).map_err(|e| {
        CursusError::DeserializationError(format!("Failed to deserialize snapshot: {}", e))
    })
}

/// Serialize any store.
pub fn store_to_bytes<S: AcademicStore + ?Sized>(store: &S) -> Result<Vec<u8>, CursusError> {
    snapshot_to_bytes(&store.snapshot()?)
}

/// Load a snapshot into a fresh in-memory store.
pub fn store_from_bytes(bytes: &[u8]) -> Result<MemoryStore, CursusError> {
    snapshot_from_bytes(bytes).map(MemoryStore::from)
}

// =============================================================================
// CHECKSUMS
// =============================================================================

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Deterministic 64-bit FNV-1a checksum of a store's serialized snapshot.
///
/// Detects accidental corruption and lets two stores be compared quickly.
/// It is not a cryptographic hash; use `snapshot_crypto_hash` for that.
pub fn snapshot_checksum<S: AcademicStore + ?Sized>(store: &S) -> Result<u64, CursusError> {
    let bytes = store_to_bytes(store)?;
    Ok(bytes.iter().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    }))
}

/// BLAKE3 hex digest (64 characters) of a store's serialized snapshot.
///
/// Only available with the `crypto-hash` feature.
#[cfg(feature = "crypto-hash")]
pub fn snapshot_crypto_hash<S: AcademicStore + ?Sized>(store: &S) -> Result<String, CursusError> {
    let bytes = store_to_bytes(store)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::Program;
    use crate::record::StudentAcademicRecord;
    use crate::{ProgramId, StudentId};

    fn sample() -> MemoryStore {
        let mut store = MemoryStore::new();
        store
            .put_program(Program::new(ProgramId(1), 4))
            .expect("program");
        let mut student = StudentAcademicRecord::new(StudentId(3)).enrolled_in(ProgramId(1));
        store.save_student(&mut student).expect("student");
        store
    }

    #[test]
    fn header_layout() {
        let bytes = PersistenceHeader::new().to_bytes();
        assert_eq!(&bytes[0..4], b"CURS");
        assert_eq!(bytes[4], primitives::FORMAT_VERSION);
    }

    #[test]
    fn save_load_save_is_bit_exact() {
        let store = sample();
        let first = store_to_bytes(&store).expect("serialize");
        let restored = store_from_bytes(&first).expect("deserialize");
        let second = store_to_bytes(&restored).expect("serialize again");
        assert_eq!(first, second);
        assert_eq!(restored, store);
    }

    #[test]
    fn invalid_magic_rejected() {
        let mut bytes = store_to_bytes(&sample()).expect("serialize");
        bytes[0..4].copy_from_slice(b"KREM");
        assert!(matches!(
            store_from_bytes(&bytes),
            Err(CursusError::DeserializationError(_))
        ));
    }

    #[test]
    fn future_version_rejected() {
        let mut bytes = store_to_bytes(&sample()).expect("serialize");
        bytes[4] = primitives::FORMAT_VERSION.wrapping_add(1);
        assert!(store_from_bytes(&bytes).is_err());
    }

    #[test]
    fn truncated_data_rejected() {
        assert!(store_from_bytes(b"CUR").is_err());
        let bytes = store_to_bytes(&sample()).expect("serialize");
        assert!(store_from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn checksum_tracks_content() {
        let store = sample();
        let a = snapshot_checksum(&store).expect("checksum");
        assert_eq!(a, snapshot_checksum(&store.clone()).expect("checksum"));

        let mut changed = store;
        changed
            .put_program(Program::new(ProgramId(2), 1))
            .expect("program");
        assert_ne!(a, snapshot_checksum(&changed).expect("checksum"));
    }

    #[cfg(feature = "crypto-hash")]
    #[test]
    fn crypto_hash_is_hex() {
        let hash = snapshot_crypto_hash(&sample()).expect("hash");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
