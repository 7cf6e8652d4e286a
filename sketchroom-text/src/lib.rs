//! # sketchroom-text
//!
//! Label rasterization for cursor name tags. Shapes short strings with
//! `cosmic-text` and hands back 8-bit coverage masks the renderer tints
//! with the participant's color.
//!
//! ```text
//! LabelEngine (FontSystem + SwashCache + LRU)
//!     │
//!     ▼
//! label(str, style) ──► Arc<LabelMask { width, height, left, top, alpha }>
//! ```

pub mod engine;

pub use engine::{LabelEngine, LabelMask, LabelStyle, DEFAULT_CACHE_CAPACITY};
