//! Durable stroke storage behind the persistence port.
//!
//! ```text
//! ┌─────────────┐  insert/load/clear  ┌────────────────────────────┐
//! │  LocalHub   │ ──────────────────► │ dyn StrokeStorage          │
//! │ (ports)     │                     │  ├─ MemoryStore  (tests)   │
//! └─────────────┘                     │  └─ StrokeStore  (RocksDB) │
//!                                     └────────────────────────────┘
//! ```
//!
//! Backends assign the authoritative id (UUID v4) and creation time, and
//! return strokes in insertion order.

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::{RoomMetadata, StoreConfig, StrokeStore};

use sketchroom_core::{NewStroke, RoomId, Stroke, StrokeError};

/// Synchronous storage backend. The hub calls it from async context;
/// implementations must not block for long.
pub trait StrokeStorage: Send + Sync {
    /// Persist a validated stroke and return the stored row.
    fn insert(&self, room_id: &RoomId, stroke: NewStroke) -> Result<Stroke, StoreError>;

    /// All strokes of the room, oldest first.
    fn load(&self, room_id: &RoomId) -> Result<Vec<Stroke>, StoreError>;

    /// Delete every stroke of the room. Returns how many were removed.
    fn clear(&self, room_id: &RoomId) -> Result<u64, StoreError>;
}

/// Storage and persistence-port errors.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// RocksDB internal error
    DatabaseError(String),
    SerializationError(String),
    DeserializationError(String),
    CompressionError(String),
    /// The stroke failed validation and was not stored
    Rejected(StrokeError),
    /// The backing service could not be reached
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            StoreError::CompressionError(e) => write!(f, "Compression error: {e}"),
            StoreError::Rejected(e) => write!(f, "Stroke rejected: {e}"),
            StoreError::Unavailable(e) => write!(f, "Storage unavailable: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

impl From<StrokeError> for StoreError {
    fn from(e: StrokeError) -> Self {
        StoreError::Rejected(e)
    }
}

impl From<crate::protocol::ProtocolError> for StoreError {
    fn from(e: crate::protocol::ProtocolError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}
