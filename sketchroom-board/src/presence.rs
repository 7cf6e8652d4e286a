//! Board presence integration: bridges the collab presence room with the
//! renderer's cursor sprites.
//!
//! ```text
//!  pointer move ──► BoardPresence::pointer_moved() ──► PresenceRecord (throttled) ──► track()
//!  sync snapshot ──► BoardPresence::apply_sync()   ──► dirty
//!  full redraw  ◄── BoardPresence::cursor_sprites()
//! ```

use sketchroom_collab::{PresenceConfig, PresenceRecord, PresenceRoom, PresenceSnapshot};
use sketchroom_core::{unix_millis, Participant, Point};
use sketchroom_render::CursorSprite;

pub struct BoardPresence {
    room: PresenceRoom,
    /// Whether any remote cursor changed since the sprites were last built.
    dirty: bool,
    cached_sprites: Vec<CursorSprite>,
}

impl BoardPresence {
    pub fn new(local: Participant, config: PresenceConfig) -> Self {
        Self {
            room: PresenceRoom::new(local, config),
            dirty: false,
            cached_sprites: Vec::new(),
        }
    }

    pub fn join_record(&mut self) -> PresenceRecord {
        self.room.join_record()
    }

    /// Local pointer moved, drawing or not. Returns the record to publish
    /// unless throttled.
    pub fn pointer_moved(&mut self, position: Point) -> Option<PresenceRecord> {
        self.room.update_local(position, unix_millis())
    }

    /// Returns `true` if the cursor map changed (needs redraw).
    pub fn apply_sync(&mut self, snapshot: &PresenceSnapshot) -> bool {
        let changed = self.room.apply_sync(snapshot);
        self.dirty |= changed;
        changed
    }

    pub fn cursor_count(&self) -> usize {
        self.room.cursors().len()
    }

    pub fn room(&self) -> &PresenceRoom {
        &self.room
    }

    /// Sprites for every remote cursor, ordered by user id.
    pub fn cursor_sprites(&mut self) -> &[CursorSprite] {
        if self.dirty {
            let mut cursors: Vec<_> = self.room.cursors().iter().collect();
            cursors.sort_by(|a, b| a.0.cmp(b.0));
            self.cached_sprites = cursors
                .into_iter()
                .map(|(_, cursor)| CursorSprite {
                    name: cursor.user_name.clone(),
                    color: cursor.user_color.clone(),
                    position: cursor.position(),
                })
                .collect();
            self.dirty = false;
        }
        &self.cached_sprites
    }

    /// Forget the room's cursors (room change or leave).
    pub fn reset(&mut self) {
        self.room.reset();
        self.cached_sprites.clear();
        self.dirty = false;
    }
}
