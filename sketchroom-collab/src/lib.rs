//! # sketchroom-collab — shared stroke log and presence for sketch rooms
//!
//! Two structurally separate channels per room: a durable, ordered stroke
//! log and an ephemeral presence layer. They share nothing but the room id.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   PersistencePort    ┌──────────────┐
//! │ BoardSession │ ───────────────────► │  LocalHub    │──► StrokeStorage
//! │  StrokeLog   │   TransportPort      │  (in-proc)   │    (memory / RocksDB)
//! │  PresenceRoom│ ◄─── StrokeFeed ──── │              │
//! └──────────────┘ ◄─── PresenceFeed ── └──────┬───────┘
//!        ▲                                     │ shared
//!        │ same ports over WebSocket           ▼
//! ┌──────┴───────┐      bincode frames  ┌──────────────┐
//! │ RelayClient  │ ◄──────────────────► │ RelayServer  │
//! └──────────────┘                      └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — stroke events, presence records, relay frames
//! - [`ports`] — persistence and transport traits, feeds
//! - [`stroke_log`] — committed stroke list with optimistic reconciliation
//! - [`presence`] — remote cursor map and local presence throttle
//! - [`broadcast`] — in-process hub implementing both ports
//! - [`storage`] — memory and RocksDB stroke storage
//! - [`server`] — WebSocket relay
//! - [`client`] — WebSocket client implementing both ports

pub mod broadcast;
pub mod client;
pub mod ports;
pub mod presence;
pub mod protocol;
pub mod server;
pub mod storage;
pub mod stroke_log;

pub use broadcast::{HubRoom, LocalHub, DEFAULT_CHANNEL_CAPACITY};
pub use client::{ClientConfig, RelayClient};
pub use ports::{
    PersistencePort, PresenceFeed, PresenceTracker, StrokeFeed, SubscriptionGuard, TransportPort,
};
pub use presence::{PresenceConfig, PresenceRoom, RemoteCursor};
pub use protocol::{
    ClientFrame, PresenceRecord, PresenceSnapshot, ProtocolError, ServerFrame, StrokeEvent,
};
pub use server::{RelayConfig, RelayServer, RelayStats};
pub use storage::{MemoryStore, RoomMetadata, StoreConfig, StoreError, StrokeStorage, StrokeStore};
pub use stroke_log::{RemoteInsert, ResyncMark, StrokeLog, StrokeStatus};
