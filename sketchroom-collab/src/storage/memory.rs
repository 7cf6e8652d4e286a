use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use sketchroom_core::{unix_millis, NewStroke, RoomId, Stroke};

use super::{StoreError, StrokeStorage};

/// In-memory backend. Contents are lost with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rooms: RwLock<HashMap<RoomId, Vec<Stroke>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stroke_count(&self, room_id: &RoomId) -> usize {
        self.rooms
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(room_id)
            .map_or(0, Vec::len)
    }
}

impl StrokeStorage for MemoryStore {
    fn insert(&self, room_id: &RoomId, stroke: NewStroke) -> Result<Stroke, StoreError> {
        stroke.validate()?;
        let stored = stroke.into_stroke(Uuid::new_v4().to_string(), room_id.clone(), unix_millis());
        self.rooms
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(room_id.clone())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    fn load(&self, room_id: &RoomId) -> Result<Vec<Stroke>, StoreError> {
        let rooms = self.rooms.read().unwrap_or_else(|e| e.into_inner());
        Ok(rooms.get(room_id).cloned().unwrap_or_default())
    }

    fn clear(&self, room_id: &RoomId) -> Result<u64, StoreError> {
        let removed = self
            .rooms
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(room_id)
            .map_or(0, |strokes| strokes.len());
        Ok(removed as u64)
    }
}
