//! # sketchroom-board
//!
//! Reconciliation glue for one participant: pointer capture, the shared
//! stroke log, presence and rendering wired to the persistence and
//! transport ports.
//!
//! - [`session`] — `BoardSession`, room lifecycle and event handling
//! - [`presence`] — presence room → cursor sprites
//! - [`config`] — surface, render, presence and persistence settings

pub mod config;
pub mod presence;
pub mod session;

pub use config::{BoardConfig, PersistPolicy};
pub use presence::BoardPresence;
pub use session::{BoardSession, PumpStats, SessionError};
