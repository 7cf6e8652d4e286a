//! Wire types for the two room channels and the relay framing.
//!
//! Stroke channel events and presence snapshots are what the transport
//! port hands to a session. The relay wraps them (plus request/response
//! pairs for the persistence port) in [`ClientFrame`] / [`ServerFrame`]:
//!
//! ```text
//! client ──► ClientFrame::{Subscribe, Unsubscribe, Track, Untrack, Insert, Load, Clear}
//! server ──► ServerFrame::{Stroke, PresenceSync, Inserted, Loaded, Cleared, Failed}
//! ```
//!
//! Frames are bincode-encoded (standard config), one frame per binary
//! WebSocket message.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use sketchroom_core::{NewStroke, Participant, Point, RoomId, Stroke, StrokeRecord};

/// Event on a room's stroke channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StrokeEvent {
    /// A row was inserted. Unvalidated; consumers must check it.
    Insert(StrokeRecord),
    /// Every stroke of `room_id` was deleted.
    Delete { room_id: RoomId },
    /// Events for `room_id` were dropped before delivery. The receiver
    /// must reload the room to catch up.
    Resync { room_id: RoomId },
}

/// One participant's live cursor as tracked on the presence channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub user_id: String,
    pub user_name: String,
    pub user_color: String,
    pub x: f32,
    pub y: f32,
    /// Unix milliseconds.
    pub timestamp: i64,
}

impl PresenceRecord {
    pub fn new(participant: &Participant, position: Point, timestamp: i64) -> Self {
        Self {
            user_id: participant.user_id.clone(),
            user_name: participant.user_name.clone(),
            user_color: participant.user_color.clone(),
            x: position.x,
            y: position.y,
            timestamp,
        }
    }

    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// Full presence state of a room: connection key → tracked records.
///
/// A user who reconnected may briefly appear under two keys.
pub type PresenceSnapshot = BTreeMap<String, Vec<PresenceRecord>>;

/// Client → relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientFrame {
    Subscribe { room_id: RoomId },
    Unsubscribe { room_id: RoomId },
    Track { room_id: RoomId, record: PresenceRecord },
    Untrack { room_id: RoomId },
    Insert { request_id: Uuid, room_id: RoomId, stroke: NewStroke },
    Load { request_id: Uuid, room_id: RoomId },
    Clear { request_id: Uuid, room_id: RoomId },
}

/// Relay → client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerFrame {
    Stroke { room_id: RoomId, event: StrokeEvent },
    PresenceSync { room_id: RoomId, snapshot: PresenceSnapshot },
    Inserted { request_id: Uuid, stroke: Stroke },
    Loaded { request_id: Uuid, strokes: Vec<Stroke> },
    Cleared { request_id: Uuid, removed: u64 },
    Failed { request_id: Uuid, reason: String },
}

impl ServerFrame {
    /// Request id for response frames, `None` for pushed events.
    pub fn request_id(&self) -> Option<Uuid> {
        match self {
            ServerFrame::Inserted { request_id, .. }
            | ServerFrame::Loaded { request_id, .. }
            | ServerFrame::Cleared { request_id, .. }
            | ServerFrame::Failed { request_id, .. } => Some(*request_id),
            ServerFrame::Stroke { .. } | ServerFrame::PresenceSync { .. } => None,
        }
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| ProtocolError::SerializationError(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
    Ok(value)
}

impl ClientFrame {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }
}

impl ServerFrame {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }
}

/// Transport-level errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    ConnectionFailed(String),
    ConnectionClosed,
    Timeout,
    /// The outgoing queue is full; the frame was not sent.
    QueueFull,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::ConnectionFailed(e) => write!(f, "Connection failed: {e}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Timeout => write!(f, "Request timed out"),
            Self::QueueFull => write!(f, "Outgoing queue full"),
        }
    }
}

impl std::error::Error for ProtocolError {}
