//! WebSocket client for the relay, implementing both ports.
//!
//! ```text
//!   insert/load/clear ──► ClientFrame{request_id} ──► relay
//!          ▲                                            │
//!          └──── oneshot ◄── pending[request_id] ◄──────┘ response frame
//!
//!   relay ──► ServerFrame::Stroke / PresenceSync ──► per-room broadcast ──► feeds
//! ```
//!
//! Pushed events are re-published on local broadcast channels, so feeds
//! from the relay behave exactly like feeds from an in-process hub.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use sketchroom_core::{NewStroke, RoomId, Stroke};

use crate::broadcast::DEFAULT_CHANNEL_CAPACITY;
use crate::ports::{PersistencePort, PresenceFeed, StrokeFeed, SubscriptionGuard, TransportPort};
use crate::protocol::{
    ClientFrame, PresenceRecord, PresenceSnapshot, ProtocolError, ServerFrame, StrokeEvent,
};
use crate::storage::StoreError;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long a persistence request waits for its response
    pub request_timeout: Duration,
    /// Outgoing frames queued before senders wait
    pub outgoing_capacity: usize,
    /// Buffered events per local feed
    pub feed_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            outgoing_capacity: 256,
            feed_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Local fan-out for one room's pushed events.
struct ClientRoom {
    strokes: broadcast::Sender<StrokeEvent>,
    presence: broadcast::Sender<PresenceSnapshot>,
    stroke_subscribers: usize,
}

impl ClientRoom {
    fn is_idle(&self) -> bool {
        self.stroke_subscribers == 0
            && self.strokes.receiver_count() == 0
            && self.presence.receiver_count() == 0
    }
}

struct ClientShared {
    out_tx: mpsc::Sender<Vec<u8>>,
    pending: Mutex<HashMap<Uuid, oneshot::Sender<ServerFrame>>>,
    rooms: Mutex<HashMap<RoomId, ClientRoom>>,
    config: ClientConfig,
}

impl ClientShared {
    fn rooms(&self) -> std::sync::MutexGuard<'_, HashMap<RoomId, ClientRoom>> {
        self.rooms.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, oneshot::Sender<ServerFrame>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_room<R>(&self, room_id: &RoomId, f: impl FnOnce(&mut ClientRoom) -> R) -> R {
        let mut rooms = self.rooms();
        let room = rooms.entry(room_id.clone()).or_insert_with(|| {
            let (strokes, _) = broadcast::channel(self.config.feed_capacity.max(1));
            let (presence, _) = broadcast::channel(self.config.feed_capacity.max(1));
            ClientRoom {
                strokes,
                presence,
                stroke_subscribers: 0,
            }
        });
        f(room)
    }

    /// Forget a room once no local feed uses it.
    fn release(&self, room_id: &RoomId) {
        let mut rooms = self.rooms();
        if rooms.get(room_id).is_some_and(ClientRoom::is_idle) {
            rooms.remove(room_id);
        }
    }

    /// Queue a frame from synchronous code (drop guards, trackers).
    fn try_send(&self, frame: &ClientFrame) -> Result<(), ProtocolError> {
        let encoded = frame.encode()?;
        self.out_tx.try_send(encoded).map_err(|e| match e {
            mpsc::error::TrySendError::Closed(_) => ProtocolError::ConnectionClosed,
            mpsc::error::TrySendError::Full(_) => ProtocolError::QueueFull,
        })
    }

    async fn send(&self, frame: &ClientFrame) -> Result<(), ProtocolError> {
        let encoded = frame.encode()?;
        self.out_tx
            .send(encoded)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    fn dispatch(&self, frame: ServerFrame) {
        if let Some(request_id) = frame.request_id() {
            match self.pending().remove(&request_id) {
                Some(reply) => {
                    let _ = reply.send(frame);
                }
                None => log::debug!("Response for unknown request {request_id}"),
            }
            return;
        }
        match frame {
            ServerFrame::Stroke { room_id, event } => {
                if let Some(room) = self.rooms().get(&room_id) {
                    let _ = room.strokes.send(event);
                }
            }
            ServerFrame::PresenceSync { room_id, snapshot } => {
                if let Some(room) = self.rooms().get(&room_id) {
                    let _ = room.presence.send(snapshot);
                }
            }
            _ => {}
        }
    }
}

/// Relay connection. Cheap to clone; clones share the socket.
#[derive(Clone)]
pub struct RelayClient {
    shared: Arc<ClientShared>,
}

impl RelayClient {
    pub async fn connect(url: &str) -> Result<Self, ProtocolError> {
        Self::connect_with(url, ClientConfig::default()).await
    }

    pub async fn connect_with(url: &str, config: ClientConfig) -> Result<Self, ProtocolError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| ProtocolError::ConnectionFailed(e.to_string()))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(config.outgoing_capacity.max(1));
        let shared = Arc::new(ClientShared {
            out_tx,
            pending: Mutex::new(HashMap::new()),
            rooms: Mutex::new(HashMap::new()),
            config,
        });

        // Writer task: forward outgoing queue to the socket
        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        // Reader task: route responses and pushed events
        let reader_shared = Arc::downgrade(&shared);
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                let Some(shared) = reader_shared.upgrade() else {
                    break;
                };
                match msg {
                    Ok(Message::Binary(data)) => {
                        let bytes: Vec<u8> = data.into();
                        match ServerFrame::decode(&bytes) {
                            Ok(frame) => shared.dispatch(frame),
                            Err(e) => log::warn!("Dropping undecodable relay frame: {e}"),
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            if let Some(shared) = reader_shared.upgrade() {
                // Fail every in-flight request and close every feed.
                shared.pending().clear();
                shared.rooms().clear();
            }
            log::info!("Relay connection closed");
        });

        log::info!("Connected to relay at {url}");
        Ok(Self { shared })
    }

    /// Send a request frame and wait for its response.
    async fn request(
        &self,
        request_id: Uuid,
        frame: ClientFrame,
    ) -> Result<ServerFrame, ProtocolError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.shared.pending().insert(request_id, reply_tx);

        if let Err(e) = self.shared.send(&frame).await {
            self.shared.pending().remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(self.shared.config.request_timeout, reply_rx).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(ProtocolError::ConnectionClosed),
            Err(_) => {
                self.shared.pending().remove(&request_id);
                Err(ProtocolError::Timeout)
            }
        }
    }

    pub fn pending_requests(&self) -> usize {
        self.shared.pending().len()
    }

    /// Rooms with at least one live local feed.
    pub fn room_count(&self) -> usize {
        self.shared.rooms().len()
    }
}

fn unexpected(frame: ServerFrame) -> StoreError {
    match frame {
        ServerFrame::Failed { reason, .. } => StoreError::Unavailable(reason),
        other => StoreError::Unavailable(format!("unexpected response {other:?}")),
    }
}

#[async_trait]
impl PersistencePort for RelayClient {
    async fn insert_stroke(&self, room_id: &RoomId, stroke: NewStroke) -> Result<Stroke, StoreError> {
        let request_id = Uuid::new_v4();
        let frame = ClientFrame::Insert {
            request_id,
            room_id: room_id.clone(),
            stroke,
        };
        match self.request(request_id, frame).await? {
            ServerFrame::Inserted { stroke, .. } => Ok(stroke),
            other => Err(unexpected(other)),
        }
    }

    async fn load_strokes(&self, room_id: &RoomId) -> Result<Vec<Stroke>, StoreError> {
        let request_id = Uuid::new_v4();
        let frame = ClientFrame::Load {
            request_id,
            room_id: room_id.clone(),
        };
        match self.request(request_id, frame).await? {
            ServerFrame::Loaded { strokes, .. } => Ok(strokes),
            other => Err(unexpected(other)),
        }
    }

    async fn clear_room(&self, room_id: &RoomId) -> Result<u64, StoreError> {
        let request_id = Uuid::new_v4();
        let frame = ClientFrame::Clear {
            request_id,
            room_id: room_id.clone(),
        };
        match self.request(request_id, frame).await? {
            ServerFrame::Cleared { removed, .. } => Ok(removed),
            other => Err(unexpected(other)),
        }
    }
}

#[async_trait]
impl TransportPort for RelayClient {
    async fn subscribe_strokes(&self, room_id: &RoomId) -> Result<StrokeFeed, ProtocolError> {
        let (rx, first) = self.shared.with_room(room_id, |room| {
            room.stroke_subscribers += 1;
            (room.strokes.subscribe(), room.stroke_subscribers == 1)
        });
        if first {
            self.shared
                .send(&ClientFrame::Subscribe {
                    room_id: room_id.clone(),
                })
                .await?;
        }

        let shared = self.shared.clone();
        let room = room_id.clone();
        let guard = SubscriptionGuard::new(move || {
            let last = shared.with_room(&room, |r| {
                r.stroke_subscribers = r.stroke_subscribers.saturating_sub(1);
                r.stroke_subscribers == 0
            });
            if last {
                if let Err(e) = shared.try_send(&ClientFrame::Unsubscribe {
                    room_id: room.clone(),
                }) {
                    log::debug!("Could not send unsubscribe: {e}");
                }
            }
            shared.release(&room);
        });
        Ok(StrokeFeed::new(room_id.clone(), rx, guard))
    }

    /// One presence key per room per connection: a second join on the same
    /// client shares the key of the first.
    async fn join_presence(&self, room_id: &RoomId) -> Result<PresenceFeed, ProtocolError> {
        let rx = self.shared.with_room(room_id, |room| room.presence.subscribe());

        let tracker = {
            let shared = self.shared.clone();
            let room_id = room_id.clone();
            move |record: PresenceRecord| -> Result<(), ProtocolError> {
                shared.try_send(&ClientFrame::Track {
                    room_id: room_id.clone(),
                    record,
                })
            }
        };
        let guard = {
            let shared = self.shared.clone();
            let room_id = room_id.clone();
            SubscriptionGuard::new(move || {
                if let Err(e) = shared.try_send(&ClientFrame::Untrack {
                    room_id: room_id.clone(),
                }) {
                    log::debug!("Could not send untrack: {e}");
                }
                shared.release(&room_id);
            })
        };
        Ok(PresenceFeed::new(room_id.clone(), rx, tracker, guard))
    }
}
