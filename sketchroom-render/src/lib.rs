//! # sketchroom-render
//!
//! CPU rendering backend for sketch rooms, built on `tiny-skia`.
//!
//! ## Architecture
//!
//! ```text
//!  StrokeLog + CaptureMachine + PresenceRoom
//!       │
//!       ▼
//!  Scene { strokes, in_progress, cursors }
//!       │
//!       ▼
//!  Renderer.full_redraw(surface, scene)     ◀─── background, strokes, live stroke, cursors
//!  Renderer.draw_segment(surface, a, b)     ◀─── pointer-move fast path
//!       │
//!       ▼
//!  Surface (Pixmap, logical→device transform, PNG export)
//! ```
//!
//! ## Crate modules
//!
//! - [`color`] — CSS color parsing
//! - [`surface`] — backing pixmap and DPR transform
//! - [`renderer`] — scene drawing

pub mod color;
pub mod renderer;
pub mod surface;

pub use color::Rgba;
pub use renderer::{CursorSprite, FrameStats, InProgress, RenderConfig, RenderError, Renderer, Scene};
pub use surface::Surface;
