//! Remote cursor map and local presence publishing.
//!
//! The map is rebuilt from every sync snapshot; nothing is merged
//! incrementally, so participants who left simply stop appearing.
//!
//! Duplicate entries for one user (a reconnect leaving a stale key
//! behind) resolve deterministically:
//!
//! ```text
//!   within a key      → first record
//!   across keys       → greatest timestamp
//!   timestamp tie     → smallest key (BTreeMap order, first seen wins)
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use sketchroom_core::{unix_millis, Participant, Point};

use crate::protocol::{PresenceRecord, PresenceSnapshot};

/// Presence tuning.
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// Minimum time between two published cursor updates. Zero publishes
    /// every move.
    pub min_interval: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::ZERO,
        }
    }
}

/// Another participant's last known cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCursor {
    pub user_name: String,
    pub user_color: String,
    pub x: f32,
    pub y: f32,
    pub timestamp: i64,
}

impl RemoteCursor {
    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

impl From<&PresenceRecord> for RemoteCursor {
    fn from(record: &PresenceRecord) -> Self {
        Self {
            user_name: record.user_name.clone(),
            user_color: record.user_color.clone(),
            x: record.x,
            y: record.y,
            timestamp: record.timestamp,
        }
    }
}

/// Presence state of one room as seen by the local participant.
#[derive(Debug)]
pub struct PresenceRoom {
    local: Participant,
    config: PresenceConfig,
    cursors: HashMap<String, RemoteCursor>,
    latest: PresenceRecord,
    last_published: Option<Instant>,
}

impl PresenceRoom {
    pub fn new(local: Participant, config: PresenceConfig) -> Self {
        let latest = PresenceRecord::new(&local, Point::default(), unix_millis());
        Self {
            local,
            config,
            cursors: HashMap::new(),
            latest,
            last_published: None,
        }
    }

    /// Record announced when joining a room, before any pointer movement.
    pub fn join_record(&mut self) -> PresenceRecord {
        self.latest.timestamp = unix_millis();
        self.last_published = Some(Instant::now());
        self.latest.clone()
    }

    /// Record the local cursor. Returns the record to publish, or `None`
    /// while throttled (the position is still kept).
    pub fn update_local(&mut self, position: Point, timestamp: i64) -> Option<PresenceRecord> {
        self.latest.x = position.x;
        self.latest.y = position.y;
        self.latest.timestamp = timestamp;

        let now = Instant::now();
        if let Some(last) = self.last_published {
            if now.duration_since(last) < self.config.min_interval {
                return None;
            }
        }
        self.last_published = Some(now);
        Some(self.latest.clone())
    }

    /// Last local record, published or not.
    pub fn local_record(&self) -> &PresenceRecord {
        &self.latest
    }

    /// Rebuild the cursor map from a sync snapshot. Returns whether it changed.
    pub fn apply_sync(&mut self, snapshot: &PresenceSnapshot) -> bool {
        let mut next: HashMap<String, RemoteCursor> = HashMap::new();
        for (key, records) in snapshot {
            let Some(record) = records.first() else {
                continue;
            };
            if record.user_id == self.local.user_id {
                continue;
            }
            if !record.position().is_finite() {
                log::warn!("Ignoring presence key {key}: non-finite cursor");
                continue;
            }
            match next.get(&record.user_id) {
                Some(existing) if existing.timestamp >= record.timestamp => {}
                _ => {
                    next.insert(record.user_id.clone(), RemoteCursor::from(record));
                }
            }
        }

        let changed = next != self.cursors;
        self.cursors = next;
        changed
    }

    pub fn cursors(&self) -> &HashMap<String, RemoteCursor> {
        &self.cursors
    }

    pub fn cursor(&self, user_id: &str) -> Option<&RemoteCursor> {
        self.cursors.get(user_id)
    }

    pub fn local(&self) -> &Participant {
        &self.local
    }

    /// Drop everything learned about the current room.
    pub fn reset(&mut self) {
        self.cursors.clear();
        self.last_published = None;
    }
}
