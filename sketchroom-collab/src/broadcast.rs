//! In-process fan-out hub implementing both ports.
//!
//! One [`HubRoom`] per room id, each with two independent tokio broadcast
//! channels:
//!
//! ```text
//!   insert_stroke ──► storage.insert ──► strokes.send(Insert)
//!   clear_room    ──► storage.clear  ──► strokes.send(Delete)
//!   track(key)    ──► members[key]   ──► presence.send(snapshot)
//! ```
//!
//! Events are published only after storage succeeds. The relay server
//! shares the same hub, so in-process and remote sessions see one stream.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use sketchroom_core::{NewStroke, RoomId, Stroke, StrokeRecord};

use crate::ports::{PersistencePort, PresenceFeed, StrokeFeed, SubscriptionGuard, TransportPort};
use crate::protocol::{PresenceRecord, PresenceSnapshot, ProtocolError, StrokeEvent};
use crate::storage::{MemoryStore, StoreError, StrokeStorage};

/// Default per-subscriber buffer.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Channels and presence membership for one room.
pub struct HubRoom {
    strokes: broadcast::Sender<StrokeEvent>,
    presence: broadcast::Sender<PresenceSnapshot>,
    members: Mutex<PresenceSnapshot>,
}

impl HubRoom {
    fn new(capacity: usize) -> Self {
        let (strokes, _) = broadcast::channel(capacity);
        let (presence, _) = broadcast::channel(capacity);
        Self {
            strokes,
            presence,
            members: Mutex::new(PresenceSnapshot::new()),
        }
    }

    fn members(&self) -> std::sync::MutexGuard<'_, PresenceSnapshot> {
        self.members.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Publish the current membership. Must be called with `members` held
    /// so concurrent syncs go out in mutation order.
    fn publish_sync(&self, members: &PresenceSnapshot) {
        // No receivers is fine.
        let _ = self.presence.send(members.clone());
    }

    /// No subscriber on either channel and no tracked key.
    fn is_idle(&self) -> bool {
        self.strokes.receiver_count() == 0
            && self.presence.receiver_count() == 0
            && self.members().is_empty()
    }
}

/// Room registry on top of a storage backend.
#[derive(Clone)]
pub struct LocalHub {
    storage: Arc<dyn StrokeStorage>,
    rooms: Arc<RwLock<HashMap<RoomId, Arc<HubRoom>>>>,
    capacity: usize,
}

impl LocalHub {
    pub fn new(storage: Arc<dyn StrokeStorage>) -> Self {
        Self::with_capacity(storage, DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(storage: Arc<dyn StrokeStorage>, capacity: usize) -> Self {
        Self {
            storage,
            rooms: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Hub over a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn storage(&self) -> &Arc<dyn StrokeStorage> {
        &self.storage
    }

    /// Run `f` on the room, creating it if needed. `f` runs under the
    /// registry lock so a concurrent [`LocalHub::remove_if_empty`] cannot
    /// drop the room between lookup and subscribe.
    fn with_room<R>(&self, room_id: &RoomId, f: impl FnOnce(&HubRoom) -> R) -> R {
        {
            let rooms = self.rooms.read().unwrap_or_else(|e| e.into_inner());
            if let Some(room) = rooms.get(room_id) {
                return f(room);
            }
        }
        let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
        let room = rooms.entry(room_id.clone()).or_insert_with(|| {
            log::debug!("Created hub room {room_id}");
            Arc::new(HubRoom::new(self.capacity))
        });
        f(room)
    }

    fn existing_room(&self, room_id: &RoomId) -> Option<Arc<HubRoom>> {
        self.rooms
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(room_id)
            .cloned()
    }

    /// Drop the room if nobody is subscribed or tracked in it.
    pub fn remove_if_empty(&self, room_id: &RoomId) -> bool {
        let mut rooms = self.rooms.write().unwrap_or_else(|e| e.into_inner());
        if rooms.get(room_id).is_some_and(|room| room.is_idle()) {
            rooms.remove(room_id);
            log::debug!("Removed idle hub room {room_id}");
            return true;
        }
        false
    }

    pub fn room_count(&self) -> usize {
        self.rooms.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    // ─── Stroke channel ───────────────────────────────────────────────

    /// Subscribe to a room's stroke events. Dropping the feed releases
    /// the room once it is idle.
    pub fn stroke_feed(&self, room_id: &RoomId) -> StrokeFeed {
        let rx = self.with_room(room_id, |room| room.strokes.subscribe());
        let guard = {
            let hub = self.clone();
            let room_id = room_id.clone();
            SubscriptionGuard::new(move || {
                hub.remove_if_empty(&room_id);
            })
        };
        StrokeFeed::new(room_id.clone(), rx, guard)
    }

    /// Live stroke-channel subscribers of a room.
    pub fn subscriber_count(&self, room_id: &RoomId) -> usize {
        self.existing_room(room_id)
            .map_or(0, |room| room.strokes.receiver_count())
    }

    /// Announce an event to the room's subscribers without touching storage.
    /// A room nobody listens to has no channel, so the event goes nowhere.
    pub fn publish(&self, room_id: &RoomId, event: StrokeEvent) {
        let receivers = self
            .existing_room(room_id)
            .map_or(0, |room| room.strokes.send(event).unwrap_or(0));
        log::debug!("Published stroke event in {room_id} to {receivers} subscribers");
    }

    /// Validate, store, then announce a stroke.
    pub fn insert(&self, room_id: &RoomId, stroke: NewStroke) -> Result<Stroke, StoreError> {
        stroke.validate()?;
        let stored = self.storage.insert(room_id, stroke)?;
        self.publish(room_id, StrokeEvent::Insert(StrokeRecord::from(&stored)));
        Ok(stored)
    }

    pub fn load(&self, room_id: &RoomId) -> Result<Vec<Stroke>, StoreError> {
        self.storage.load(room_id)
    }

    /// Clear storage, then announce the delete to every subscriber.
    pub fn clear(&self, room_id: &RoomId) -> Result<u64, StoreError> {
        let removed = self.storage.clear(room_id)?;
        self.publish(
            room_id,
            StrokeEvent::Delete {
                room_id: room_id.clone(),
            },
        );
        Ok(removed)
    }

    // ─── Presence channel ─────────────────────────────────────────────

    /// Join the presence channel under a fresh connection key. The feed
    /// immediately gets the current membership; dropping it leaves.
    pub fn presence_feed(&self, room_id: &RoomId) -> (String, PresenceFeed) {
        let key = Uuid::new_v4().to_string();
        let rx = self.with_room(room_id, |room| {
            let rx = room.presence.subscribe();
            let members = room.members();
            room.publish_sync(&members);
            rx
        });

        let tracker = {
            let hub = self.clone();
            let room_id = room_id.clone();
            let key = key.clone();
            move |record: PresenceRecord| -> Result<(), ProtocolError> {
                hub.presence_track(&room_id, &key, record);
                Ok(())
            }
        };
        let guard = {
            let hub = self.clone();
            let room_id = room_id.clone();
            let key = key.clone();
            SubscriptionGuard::new(move || hub.presence_leave(&room_id, &key))
        };
        (key, PresenceFeed::new(room_id.clone(), rx, tracker, guard))
    }

    /// Replace the records tracked under `key` and publish a sync.
    pub fn presence_track(&self, room_id: &RoomId, key: &str, record: PresenceRecord) {
        self.with_room(room_id, |room| {
            let mut members = room.members();
            members.insert(key.to_string(), vec![record]);
            room.publish_sync(&members);
        });
    }

    /// Remove a connection key, publish a sync if it was tracked, and
    /// release the room once idle. Unknown rooms are left alone.
    pub fn presence_leave(&self, room_id: &RoomId, key: &str) {
        let Some(room) = self.existing_room(room_id) else {
            return;
        };
        {
            let mut members = room.members();
            if members.remove(key).is_some() {
                log::debug!("Presence key {key} left room {room_id}");
                room.publish_sync(&members);
            }
        }
        drop(room);
        self.remove_if_empty(room_id);
    }

    pub fn presence_snapshot(&self, room_id: &RoomId) -> PresenceSnapshot {
        self.existing_room(room_id)
            .map(|room| room.members().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PersistencePort for LocalHub {
    async fn insert_stroke(&self, room_id: &RoomId, stroke: NewStroke) -> Result<Stroke, StoreError> {
        self.insert(room_id, stroke)
    }

    async fn load_strokes(&self, room_id: &RoomId) -> Result<Vec<Stroke>, StoreError> {
        self.load(room_id)
    }

    async fn clear_room(&self, room_id: &RoomId) -> Result<u64, StoreError> {
        self.clear(room_id)
    }
}

#[async_trait]
impl TransportPort for LocalHub {
    async fn subscribe_strokes(&self, room_id: &RoomId) -> Result<StrokeFeed, ProtocolError> {
        Ok(self.stroke_feed(room_id))
    }

    async fn join_presence(&self, room_id: &RoomId) -> Result<PresenceFeed, ProtocolError> {
        Ok(self.presence_feed(room_id).1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sketchroom_core::{Point, Tool};

    fn pen(user: &str) -> NewStroke {
        NewStroke {
            user_id: user.into(),
            user_name: user.into(),
            user_color: "#000".into(),
            points: vec![Point::new(0.0, 0.0), Point::new(3.0, 4.0)],
            color: "#ff0000".into(),
            size: 2.0,
            tool: Tool::Pen,
        }
    }

    fn cursor(user: &str, x: f32) -> PresenceRecord {
        PresenceRecord {
            user_id: user.into(),
            user_name: user.into(),
            user_color: "#00f".into(),
            x,
            y: 0.0,
            timestamp: 1,
        }
    }

    #[tokio::test]
    async fn test_insert_publishes_after_storage() {
        let hub = LocalHub::in_memory();
        let room = RoomId::new("R1");
        let mut feed = hub.subscribe_strokes(&room).await.unwrap();

        let stored = hub.insert_stroke(&room, pen("u1")).await.unwrap();
        match feed.try_next() {
            Some(StrokeEvent::Insert(record)) => assert_eq!(record.id, Some(stored.id.clone())),
            other => panic!("expected insert, got {other:?}"),
        }
        assert_eq!(hub.load_strokes(&room).await.unwrap(), vec![stored]);
    }

    #[tokio::test]
    async fn test_rejected_insert_publishes_nothing() {
        let hub = LocalHub::in_memory();
        let room = RoomId::new("R1");
        let mut feed = hub.subscribe_strokes(&room).await.unwrap();
        let mut bad = pen("u1");
        bad.points.truncate(1);

        assert!(matches!(
            hub.insert_stroke(&room, bad).await,
            Err(StoreError::Rejected(_))
        ));
        assert_eq!(feed.try_next(), None);
    }

    #[tokio::test]
    async fn test_clear_publishes_room_scoped_delete() {
        let hub = LocalHub::in_memory();
        let r1 = RoomId::new("R1");
        let r2 = RoomId::new("R2");
        hub.insert_stroke(&r1, pen("u1")).await.unwrap();
        let mut feed1 = hub.subscribe_strokes(&r1).await.unwrap();
        let mut feed2 = hub.subscribe_strokes(&r2).await.unwrap();

        assert_eq!(hub.clear_room(&r1).await.unwrap(), 1);
        assert_eq!(feed1.try_next(), Some(StrokeEvent::Delete { room_id: r1.clone() }));
        assert_eq!(feed2.try_next(), None);
    }

    #[tokio::test]
    async fn test_dropping_feed_unsubscribes() {
        let hub = LocalHub::in_memory();
        let room = RoomId::new("R1");
        let feed = hub.subscribe_strokes(&room).await.unwrap();
        assert_eq!(hub.subscriber_count(&room), 1);
        drop(feed);
        assert_eq!(hub.subscriber_count(&room), 0);
    }

    #[tokio::test]
    async fn test_presence_track_and_leave() {
        let hub = LocalHub::in_memory();
        let room = RoomId::new("R1");
        let mut watcher = hub.join_presence(&room).await.unwrap();
        let mover = hub.join_presence(&room).await.unwrap();

        mover.track(cursor("u2", 5.0)).unwrap();
        let snapshot = watcher.try_next().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.values().next().unwrap()[0].x, 5.0);

        drop(mover);
        assert!(watcher.try_next().unwrap().is_empty());
        assert!(hub.presence_snapshot(&room).is_empty());
    }

    #[tokio::test]
    async fn test_track_replaces_previous_record_for_key() {
        let hub = LocalHub::in_memory();
        let room = RoomId::new("R1");
        let feed = hub.join_presence(&room).await.unwrap();
        feed.track(cursor("u2", 1.0)).unwrap();
        feed.track(cursor("u2", 2.0)).unwrap();

        let snapshot = hub.presence_snapshot(&room);
        assert_eq!(snapshot.len(), 1);
        let records = snapshot.values().next().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].x, 2.0);
    }

    #[tokio::test]
    async fn test_join_receives_current_membership() {
        let hub = LocalHub::in_memory();
        let room = RoomId::new("R1");
        let first = hub.join_presence(&room).await.unwrap();
        first.track(cursor("u2", 3.0)).unwrap();

        let mut second = hub.join_presence(&room).await.unwrap();
        let snapshot = second.try_next().unwrap();
        assert_eq!(snapshot.len(), 1);
    }

    #[tokio::test]
    async fn test_room_removed_when_last_feed_drops() {
        let hub = LocalHub::in_memory();
        let room = RoomId::new("R1");
        let strokes = hub.subscribe_strokes(&room).await.unwrap();
        let presence = hub.join_presence(&room).await.unwrap();
        presence.track(cursor("u1", 1.0)).unwrap();
        assert_eq!(hub.room_count(), 1);

        drop(strokes);
        assert_eq!(hub.room_count(), 1);
        drop(presence);
        assert_eq!(hub.room_count(), 0);
        assert!(!hub.remove_if_empty(&room));
    }

    #[tokio::test]
    async fn test_remove_if_empty_keeps_busy_room() {
        let hub = LocalHub::in_memory();
        let room = RoomId::new("R1");
        let _feed = hub.subscribe_strokes(&room).await.unwrap();
        assert!(!hub.remove_if_empty(&room));
        assert_eq!(hub.room_count(), 1);
    }

    #[test]
    fn test_tracked_key_keeps_room_until_it_leaves() {
        let hub = LocalHub::in_memory();
        let room = RoomId::new("R1");
        hub.presence_track(&room, "k1", cursor("u1", 1.0));
        assert!(!hub.remove_if_empty(&room));

        hub.presence_leave(&room, "k1");
        assert_eq!(hub.room_count(), 0);
    }

    #[test]
    fn test_leave_and_publish_do_not_create_rooms() {
        let hub = LocalHub::in_memory();
        let room = RoomId::new("nowhere");
        hub.presence_leave(&room, "k1");
        hub.publish(&room, StrokeEvent::Delete { room_id: room.clone() });
        assert!(hub.presence_snapshot(&room).is_empty());
        assert_eq!(hub.subscriber_count(&room), 0);
        assert_eq!(hub.room_count(), 0);
    }

    #[tokio::test]
    async fn test_many_rooms_released_after_use() {
        let hub = LocalHub::in_memory();
        let mut feeds = Vec::new();
        for i in 0..50 {
            let room = RoomId::new(format!("room-{i}"));
            feeds.push((
                hub.subscribe_strokes(&room).await.unwrap(),
                hub.join_presence(&room).await.unwrap(),
            ));
        }
        assert_eq!(hub.room_count(), 50);
        feeds.clear();
        assert_eq!(hub.room_count(), 0);
    }
}
