//! WebSocket relay exposing a [`LocalHub`] to remote sessions.
//!
//! ```text
//! Client A ──┐                         ┌── room "R1" ── strokes  (broadcast)
//!            ├── RelayServer ── hub ───┤              └─ presence (broadcast)
//! Client B ──┘        │                └── room "R2" ── ...
//!                     └── StrokeStorage (memory / RocksDB)
//! ```
//!
//! Each connection owns one forwarder task per subscribed channel. The
//! forwarders feed an mpsc queue that the connection loop writes to the
//! socket, so a connection has exactly one writer. On disconnect every
//! forwarder is aborted, tracked presence keys leave their rooms, and
//! rooms left idle are dropped from the hub.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use sketchroom_core::RoomId;

use crate::broadcast::{LocalHub, DEFAULT_CHANNEL_CAPACITY};
use crate::ports::{PresenceFeed, StrokeFeed};
use crate::protocol::{ClientFrame, ServerFrame};

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Frames queued per connection before forwarders wait
    pub outgoing_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            outgoing_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl RelayConfig {
    pub fn for_testing(port: u16) -> Self {
        Self {
            bind_addr: format!("127.0.0.1:{port}"),
            outgoing_capacity: 64,
        }
    }
}

/// Relay statistics.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_frames: u64,
    pub total_bytes: u64,
}

/// A connection's subscriptions in one room.
#[derive(Default)]
struct RoomLink {
    strokes: Option<JoinHandle<()>>,
    presence: Option<(String, JoinHandle<()>)>,
}

pub struct RelayServer {
    config: RelayConfig,
    hub: LocalHub,
    stats: Arc<RwLock<RelayStats>>,
}

impl RelayServer {
    pub fn new(config: RelayConfig, hub: LocalHub) -> Self {
        Self {
            config,
            hub,
            stats: Arc::new(RwLock::new(RelayStats::default())),
        }
    }

    /// Accept connections forever. Call from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let hub = self.hub.clone();
            let stats = self.stats.clone();
            let capacity = self.config.outgoing_capacity;
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, hub, stats, capacity).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        hub: LocalHub,
        stats: Arc<RwLock<RelayStats>>,
        capacity: usize,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        log::info!("WebSocket connection established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let (out_tx, mut out_rx) = mpsc::channel::<ServerFrame>(capacity.max(1));
        let mut links: HashMap<RoomId, RoomLink> = HashMap::new();

        let result = loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            {
                                let mut s = stats.write().await;
                                s.total_frames += 1;
                                s.total_bytes += bytes.len() as u64;
                            }
                            let frame = match ClientFrame::decode(&bytes) {
                                Ok(frame) => frame,
                                Err(e) => {
                                    log::warn!("Dropping undecodable frame from {addr}: {e}");
                                    continue;
                                }
                            };
                            if let Some(reply) = Self::handle_frame(frame, &hub, &mut links, &out_tx) {
                                if let Err(e) = Self::send_frame(&mut ws_sender, &reply).await {
                                    break Err(e);
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break Ok(()),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break Err(e.into()),
                    }
                }
                Some(frame) = out_rx.recv() => {
                    if let Err(e) = Self::send_frame(&mut ws_sender, &frame).await {
                        break Err(e);
                    }
                }
            }
        };

        for (room_id, link) in links.drain() {
            Self::unlink(&hub, &room_id, link);
        }
        {
            let mut s = stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
        }
        log::info!("Connection from {addr} closed");
        result
    }

    async fn send_frame<S>(
        ws_sender: &mut S,
        frame: &ServerFrame,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        S: Sink<Message> + Unpin,
        S::Error: std::error::Error + Send + Sync + 'static,
    {
        let encoded = frame.encode()?;
        ws_sender.send(Message::Binary(encoded.into())).await?;
        Ok(())
    }

    /// Apply one client frame. Returns the direct reply, if any.
    fn handle_frame(
        frame: ClientFrame,
        hub: &LocalHub,
        links: &mut HashMap<RoomId, RoomLink>,
        out_tx: &mpsc::Sender<ServerFrame>,
    ) -> Option<ServerFrame> {
        match frame {
            ClientFrame::Subscribe { room_id } => {
                let link = links.entry(room_id.clone()).or_default();
                if link.strokes.is_none() {
                    let feed = hub.stroke_feed(&room_id);
                    link.strokes = Some(forward_strokes(feed, out_tx.clone()));
                    log::debug!("Subscribed to strokes of room {room_id}");
                }
                None
            }
            ClientFrame::Unsubscribe { room_id } => {
                if let Some(task) = links.get_mut(&room_id).and_then(|l| l.strokes.take()) {
                    task.abort();
                }
                None
            }
            ClientFrame::Track { room_id, record } => {
                let link = links.entry(room_id.clone()).or_default();
                let key = match &link.presence {
                    Some((key, _)) => key.clone(),
                    None => {
                        let (key, feed) = hub.presence_feed(&room_id);
                        link.presence = Some((key.clone(), forward_presence(feed, out_tx.clone())));
                        key
                    }
                };
                hub.presence_track(&room_id, &key, record);
                None
            }
            ClientFrame::Untrack { room_id } => {
                if let Some((key, task)) = links.get_mut(&room_id).and_then(|l| l.presence.take()) {
                    task.abort();
                    hub.presence_leave(&room_id, &key);
                }
                None
            }
            ClientFrame::Insert {
                request_id,
                room_id,
                stroke,
            } => Some(match hub.insert(&room_id, stroke) {
                Ok(stroke) => ServerFrame::Inserted { request_id, stroke },
                Err(e) => ServerFrame::Failed {
                    request_id,
                    reason: e.to_string(),
                },
            }),
            ClientFrame::Load { request_id, room_id } => Some(match hub.load(&room_id) {
                Ok(strokes) => ServerFrame::Loaded { request_id, strokes },
                Err(e) => ServerFrame::Failed {
                    request_id,
                    reason: e.to_string(),
                },
            }),
            ClientFrame::Clear { request_id, room_id } => Some(match hub.clear(&room_id) {
                Ok(removed) => ServerFrame::Cleared { request_id, removed },
                Err(e) => ServerFrame::Failed {
                    request_id,
                    reason: e.to_string(),
                },
            }),
        }
    }

    fn unlink(hub: &LocalHub, room_id: &RoomId, link: RoomLink) {
        if let Some(task) = link.strokes {
            task.abort();
        }
        if let Some((key, task)) = link.presence {
            task.abort();
            hub.presence_leave(room_id, &key);
        }
    }

    pub async fn stats(&self) -> RelayStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn hub(&self) -> &LocalHub {
        &self.hub
    }
}

/// Forward a stroke feed into a connection's outgoing queue. A lagged
/// feed forwards a resync so the client reloads. Aborting the task drops
/// the feed, which releases the hub room.
fn forward_strokes(mut feed: StrokeFeed, out_tx: mpsc::Sender<ServerFrame>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = feed.recv().await {
            let frame = ServerFrame::Stroke {
                room_id: feed.room_id().clone(),
                event,
            };
            if out_tx.send(frame).await.is_err() {
                break;
            }
        }
    })
}

fn forward_presence(mut feed: PresenceFeed, out_tx: mpsc::Sender<ServerFrame>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(snapshot) = feed.recv().await {
            let frame = ServerFrame::PresenceSync {
                room_id: feed.room_id().clone(),
                snapshot,
            };
            if out_tx.send(frame).await.is_err() {
                break;
            }
        }
    })
}
