//! The two seams a board session talks through.
//!
//! - [`PersistencePort`]: durable insert/load/clear of strokes.
//! - [`TransportPort`]: per-room push channels, one for stroke events and
//!   one for presence. Both are handed out as feeds that unsubscribe when
//!   dropped.
//!
//! Feeds are drained with [`StrokeFeed::try_next`] / [`PresenceFeed::try_next`]
//! from the session's own task, so remote events are applied in arrival
//! order between local pointer events.

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::TryRecvError};

use sketchroom_core::{NewStroke, RoomId, Stroke};

use crate::protocol::{PresenceRecord, PresenceSnapshot, ProtocolError, StrokeEvent};
use crate::storage::StoreError;

#[async_trait]
pub trait PersistencePort: Send + Sync {
    /// Persist a stroke. Returns the stored row with its authoritative id.
    async fn insert_stroke(&self, room_id: &RoomId, stroke: NewStroke) -> Result<Stroke, StoreError>;

    /// Every stroke of the room ordered by creation time, oldest first.
    async fn load_strokes(&self, room_id: &RoomId) -> Result<Vec<Stroke>, StoreError>;

    /// Delete every stroke of the room; subscribers get a `Delete` event.
    async fn clear_room(&self, room_id: &RoomId) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait TransportPort: Send + Sync {
    async fn subscribe_strokes(&self, room_id: &RoomId) -> Result<StrokeFeed, ProtocolError>;

    async fn join_presence(&self, room_id: &RoomId) -> Result<PresenceFeed, ProtocolError>;
}

/// Runs a teardown action when dropped.
pub struct SubscriptionGuard {
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionGuard {
    pub fn new(on_drop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            on_drop: Some(Box::new(on_drop)),
        }
    }

    /// A guard with nothing to tear down.
    pub fn noop() -> Self {
        Self { on_drop: None }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(on_drop) = self.on_drop.take() {
            on_drop();
        }
    }
}

impl std::fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionGuard")
            .field("armed", &self.on_drop.is_some())
            .finish()
    }
}

/// Non-blocking drain of a broadcast receiver. On lag, `on_lag` may turn
/// the gap into an item; otherwise the gap is skipped.
fn drain_one<T: Clone>(
    rx: &mut broadcast::Receiver<T>,
    closed: &mut bool,
    channel: &str,
    room_id: &RoomId,
    on_lag: impl Fn() -> Option<T>,
) -> Option<T> {
    loop {
        match rx.try_recv() {
            Ok(item) => return Some(item),
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Lagged(skipped)) => {
                log::warn!("{channel} feed for room {room_id} lagged, {skipped} events dropped");
                if let Some(item) = on_lag() {
                    return Some(item);
                }
            }
            Err(TryRecvError::Closed) => {
                if !*closed {
                    log::info!("{channel} feed for room {room_id} closed");
                    *closed = true;
                }
                return None;
            }
        }
    }
}

/// Subscription to a room's stroke channel.
///
/// Events lost to a full buffer surface as a single
/// [`StrokeEvent::Resync`] in their place.
#[derive(Debug)]
pub struct StrokeFeed {
    room_id: RoomId,
    rx: broadcast::Receiver<StrokeEvent>,
    closed: bool,
    // Dropped after `rx`, so teardown sees the receiver gone.
    _guard: SubscriptionGuard,
}

impl StrokeFeed {
    pub fn new(
        room_id: RoomId,
        rx: broadcast::Receiver<StrokeEvent>,
        guard: SubscriptionGuard,
    ) -> Self {
        Self {
            room_id,
            rx,
            closed: false,
            _guard: guard,
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Next buffered event, if any.
    pub fn try_next(&mut self) -> Option<StrokeEvent> {
        let room_id = &self.room_id;
        drain_one(&mut self.rx, &mut self.closed, "Stroke", room_id, || {
            Some(StrokeEvent::Resync {
                room_id: room_id.clone(),
            })
        })
    }

    /// Wait for the next event. `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<StrokeEvent> {
        match self.rx.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("Stroke feed for room {} lagged, {skipped} events dropped", self.room_id);
                Some(StrokeEvent::Resync {
                    room_id: self.room_id.clone(),
                })
            }
            Err(broadcast::error::RecvError::Closed) => {
                self.closed = true;
                None
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Publishes the local participant's presence record.
pub trait PresenceTracker: Send {
    fn track(&self, record: PresenceRecord) -> Result<(), ProtocolError>;
}

impl<F> PresenceTracker for F
where
    F: Fn(PresenceRecord) -> Result<(), ProtocolError> + Send,
{
    fn track(&self, record: PresenceRecord) -> Result<(), ProtocolError> {
        self(record)
    }
}

/// Membership in a room's presence channel.
pub struct PresenceFeed {
    room_id: RoomId,
    rx: broadcast::Receiver<PresenceSnapshot>,
    tracker: Box<dyn PresenceTracker>,
    closed: bool,
    _guard: SubscriptionGuard,
}

impl PresenceFeed {
    pub fn new(
        room_id: RoomId,
        rx: broadcast::Receiver<PresenceSnapshot>,
        tracker: impl PresenceTracker + 'static,
        guard: SubscriptionGuard,
    ) -> Self {
        Self {
            room_id,
            rx,
            tracker: Box::new(tracker),
            closed: false,
            _guard: guard,
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn track(&self, record: PresenceRecord) -> Result<(), ProtocolError> {
        self.tracker.track(record)
    }

    /// Latest buffered sync snapshot. Older buffered snapshots are skipped
    /// since each one supersedes the previous.
    pub fn try_next(&mut self) -> Option<PresenceSnapshot> {
        let mut latest = None;
        while let Some(snapshot) =
            drain_one(&mut self.rx, &mut self.closed, "Presence", &self.room_id, || None)
        {
            latest = Some(snapshot);
        }
        latest
    }

    /// Wait for the next sync. Lag is skipped since a later snapshot
    /// supersedes the lost ones.
    pub async fn recv(&mut self) -> Option<PresenceSnapshot> {
        loop {
            match self.rx.recv().await {
                Ok(snapshot) => return Some(snapshot),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::debug!("Presence feed for room {} skipped {skipped} syncs", self.room_id);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.closed = true;
                    return None;
                }
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl std::fmt::Debug for PresenceFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceFeed")
            .field("room_id", &self.room_id)
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_guard_runs_once_on_drop() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        let guard = SubscriptionGuard::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        drop(guard);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stroke_feed_drains_in_order_then_reports_closed() {
        let (tx, rx) = broadcast::channel(8);
        let room = RoomId::new("R1");
        let mut feed = StrokeFeed::new(room.clone(), rx, SubscriptionGuard::noop());

        assert_eq!(feed.try_next(), None);
        tx.send(StrokeEvent::Delete { room_id: room.clone() }).unwrap();
        tx.send(StrokeEvent::Insert(Default::default())).unwrap();

        assert_eq!(feed.try_next(), Some(StrokeEvent::Delete { room_id: room }));
        assert_eq!(feed.try_next(), Some(StrokeEvent::Insert(Default::default())));
        assert!(!feed.is_closed());

        drop(tx);
        assert_eq!(feed.try_next(), None);
        assert!(feed.is_closed());
    }

    #[test]
    fn test_stroke_feed_reports_lag_as_resync() {
        let (tx, rx) = broadcast::channel(2);
        let room = RoomId::new("R1");
        let mut feed = StrokeFeed::new(room.clone(), rx, SubscriptionGuard::noop());
        for name in ["a", "b", "c", "d"] {
            tx.send(StrokeEvent::Delete { room_id: RoomId::new(name) }).unwrap();
        }
        // Capacity 2: the two oldest are lost and reported once.
        assert_eq!(feed.try_next(), Some(StrokeEvent::Resync { room_id: room }));
        assert_eq!(feed.try_next(), Some(StrokeEvent::Delete { room_id: RoomId::new("c") }));
        assert_eq!(feed.try_next(), Some(StrokeEvent::Delete { room_id: RoomId::new("d") }));
        assert_eq!(feed.try_next(), None);
    }

    #[tokio::test]
    async fn test_stroke_feed_recv_reports_lag_as_resync() {
        let (tx, rx) = broadcast::channel(1);
        let room = RoomId::new("R1");
        let mut feed = StrokeFeed::new(room.clone(), rx, SubscriptionGuard::noop());
        tx.send(StrokeEvent::Insert(Default::default())).unwrap();
        tx.send(StrokeEvent::Delete { room_id: room.clone() }).unwrap();

        assert_eq!(feed.recv().await, Some(StrokeEvent::Resync { room_id: room.clone() }));
        assert_eq!(feed.recv().await, Some(StrokeEvent::Delete { room_id: room }));
    }

    #[test]
    fn test_presence_feed_skips_lag_silently() {
        let (tx, rx) = broadcast::channel(1);
        let mut feed = PresenceFeed::new(
            RoomId::new("R1"),
            rx,
            |_record: PresenceRecord| -> Result<(), ProtocolError> { Ok(()) },
            SubscriptionGuard::noop(),
        );
        let mut newest = PresenceSnapshot::new();
        newest.insert("k2".into(), Vec::new());
        tx.send(PresenceSnapshot::new()).unwrap();
        tx.send(newest.clone()).unwrap();
        assert_eq!(feed.try_next(), Some(newest));
    }

    #[test]
    fn test_presence_feed_returns_latest_snapshot_and_tracks() {
        let (tx, rx) = broadcast::channel(8);
        let tracked = Arc::new(AtomicBool::new(false));
        let flag = tracked.clone();
        let mut feed = PresenceFeed::new(
            RoomId::new("R1"),
            rx,
            move |_record: PresenceRecord| -> Result<(), ProtocolError> {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            },
            SubscriptionGuard::noop(),
        );

        let mut older = PresenceSnapshot::new();
        older.insert("k1".into(), Vec::new());
        tx.send(older).unwrap();
        tx.send(PresenceSnapshot::new()).unwrap();
        assert_eq!(feed.try_next(), Some(PresenceSnapshot::new()));
        assert_eq!(feed.try_next(), None);

        let record = PresenceRecord {
            user_id: "u1".into(),
            user_name: "Ada".into(),
            user_color: "#fff".into(),
            x: 1.0,
            y: 2.0,
            timestamp: 3,
        };
        feed.track(record).unwrap();
        assert!(tracked.load(Ordering::SeqCst));
    }
}
