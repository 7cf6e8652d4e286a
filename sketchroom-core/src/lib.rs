//! # sketchroom-core
//!
//! Data model and local input state for the shared drawing surface.
//!
//! ```text
//!  pointer events ──► CaptureMachine ──► CaptureEffect::Segment   (incremental draw)
//!                           │
//!                           └──────────► CaptureEffect::Finished  (optimistic commit)
//!                                               │
//!                                    ToolCell::snapshot() at finalize time
//!                                               │
//!                                               ▼
//!                                          NewStroke ──► persistence port
//! ```
//!
//! - [`stroke`] — points, tools, committed strokes and the loosely typed
//!   [`StrokeRecord`] wire payload
//! - [`identity`] — room ids and participant identity
//! - [`tools`] — current tool/color/size behind a shared latest-value cell
//! - [`capture`] — the `Idle → Capturing → Idle` gesture state machine

pub mod capture;
pub mod error;
pub mod identity;
pub mod stroke;
pub mod tools;

pub use capture::{CaptureEffect, CaptureMachine, CaptureState, PointerButton, PointerEvent};
pub use error::StrokeError;
pub use identity::{Participant, RoomId};
pub use stroke::{
    local_stroke_id, unix_millis, NewStroke, Point, Stroke, StrokeRecord, Tool,
    LOCAL_ID_PREFIX, MIN_RENDERABLE_POINTS,
};
pub use tools::{ToolCell, ToolSettings};
