//! # Formats
//!
//! Serialization formats for store snapshots.

pub mod persistence;

#[cfg(feature = "crypto-hash")]
pub use persistence::snapshot_crypto_hash;
pub use persistence::{
    MAX_PERSISTENCE_PAYLOAD_SIZE, PersistenceHeader, snapshot_checksum, snapshot_from_bytes,
    snapshot_to_bytes, store_from_bytes, store_to_bytes,
};
