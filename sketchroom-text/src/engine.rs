//! Label engine: shapes short strings with `cosmic-text` and rasterizes
//! them into coverage masks for cursor name tags.
//!
//! Labels repeat a lot (one per remote participant, redrawn on every
//! cursor move), so finished masks are kept in an LRU cache keyed by
//! text, family and pixel size.

use std::num::NonZeroUsize;
use std::sync::Arc;

use cosmic_text::{Attrs, Buffer, Family, FontSystem, Metrics, Shaping, SwashCache, SwashContent};
use lru::LruCache;

/// Style of a label run.
#[derive(Clone, Debug, PartialEq)]
pub struct LabelStyle {
    /// Font size in device pixels.
    pub font_size: f32,
    /// CSS-style family (`"sans-serif"`, `"monospace"`, or a concrete name).
    pub family: String,
}

impl Default for LabelStyle {
    fn default() -> Self {
        Self {
            font_size: 12.0,
            family: String::from("sans-serif"),
        }
    }
}

impl LabelStyle {
    fn family(&self) -> Family<'_> {
        let first = self
            .family
            .split(',')
            .next()
            .unwrap_or(&self.family)
            .trim()
            .trim_matches('"')
            .trim_matches('\'');
        match first {
            "sans-serif" => Family::SansSerif,
            "serif" => Family::Serif,
            "monospace" => Family::Monospace,
            concrete => Family::Name(concrete),
        }
    }
}

/// 8-bit coverage mask of a rasterized label.
///
/// `left`/`top` place the mask relative to the pen origin, which sits on
/// the baseline of the first line (the same anchor as canvas `fillText`).
#[derive(Clone, Debug, PartialEq)]
pub struct LabelMask {
    pub width: u32,
    pub height: u32,
    pub left: i32,
    pub top: i32,
    /// Row-major coverage, `width * height` bytes.
    pub alpha: Vec<u8>,
}

impl LabelMask {
    pub fn coverage(&self, x: u32, y: u32) -> u8 {
        if x >= self.width || y >= self.height {
            return 0;
        }
        self.alpha[(y * self.width + x) as usize]
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct LabelKey {
    text: String,
    family: String,
    size_bits: u32,
}

/// A rasterized glyph waiting to be blitted.
struct GlyphImage {
    x: i32,
    y: i32,
    width: u32,
    height: u32,
    coverage: Vec<u8>,
}

pub const DEFAULT_CACHE_CAPACITY: usize = 128;

/// Shaping + rasterization state.
pub struct LabelEngine {
    font_system: FontSystem,
    swash_cache: SwashCache,
    cache: LruCache<LabelKey, Arc<LabelMask>>,
}

impl LabelEngine {
    /// Engine with system font discovery.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        let font_system = FontSystem::new();
        log::debug!("Label engine loaded {} font faces", font_system.db().faces().count());
        Self {
            font_system,
            swash_cache: SwashCache::new(),
            cache: LruCache::new(capacity),
        }
    }

    pub fn cached_labels(&self) -> usize {
        self.cache.len()
    }

    /// Mask for `text`, from cache when possible. `None` when nothing
    /// visible would be drawn (empty text, whitespace, or no usable font).
    pub fn label(&mut self, text: &str, style: &LabelStyle) -> Option<Arc<LabelMask>> {
        if text.trim().is_empty() || !(style.font_size.is_finite() && style.font_size > 0.0) {
            return None;
        }
        let key = LabelKey {
            text: text.to_string(),
            family: style.family.clone(),
            size_bits: style.font_size.to_bits(),
        };
        if let Some(mask) = self.cache.get(&key) {
            return Some(mask.clone());
        }

        let mask = Arc::new(self.rasterize(text, style)?);
        self.cache.put(key, mask.clone());
        Some(mask)
    }

    fn rasterize(&mut self, text: &str, style: &LabelStyle) -> Option<LabelMask> {
        let metrics = Metrics::new(style.font_size, style.font_size * 1.25);
        let attrs = Attrs::new().family(style.family());

        let mut buffer = Buffer::new(&mut self.font_system, metrics);
        buffer.set_size(&mut self.font_system, None, None);
        buffer.set_text(&mut self.font_system, text, attrs, Shaping::Advanced);
        buffer.shape_until_scroll(&mut self.font_system, false);

        let mut glyphs = Vec::new();
        let mut baseline: Option<f32> = None;
        for run in buffer.layout_runs() {
            let origin = *baseline.get_or_insert(run.line_y);
            for glyph in run.glyphs.iter() {
                let physical = glyph.physical((0.0, 0.0), 1.0);
                let Some(image) = self
                    .swash_cache
                    .get_image(&mut self.font_system, physical.cache_key)
                else {
                    continue;
                };
                let (width, height) = (image.placement.width, image.placement.height);
                if width == 0 || height == 0 {
                    continue;
                }
                let pixels = (width * height) as usize;
                let coverage: Vec<u8> = match image.content {
                    SwashContent::Mask => image.data.clone(),
                    // Color glyphs (emoji): keep alpha only.
                    SwashContent::Color => image.data.chunks_exact(4).map(|px| px[3]).collect(),
                    SwashContent::SubpixelMask => image
                        .data
                        .chunks_exact(4)
                        .map(|px| ((px[0] as u16 + px[1] as u16 + px[2] as u16) / 3) as u8)
                        .collect(),
                };
                if coverage.len() < pixels {
                    log::debug!("Skipping glyph with short bitmap ({} < {pixels})", coverage.len());
                    continue;
                }
                glyphs.push(GlyphImage {
                    x: physical.x + image.placement.left,
                    y: (run.line_y - origin) as i32 + physical.y - image.placement.top,
                    width,
                    height,
                    coverage,
                });
            }
        }

        compose(glyphs)
    }
}

impl Default for LabelEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Blit glyph bitmaps into one mask covering their union.
fn compose(glyphs: Vec<GlyphImage>) -> Option<LabelMask> {
    let left = glyphs.iter().map(|g| g.x).min()?;
    let top = glyphs.iter().map(|g| g.y).min()?;
    let right = glyphs.iter().map(|g| g.x + g.width as i32).max()?;
    let bottom = glyphs.iter().map(|g| g.y + g.height as i32).max()?;
    let width = (right - left) as u32;
    let height = (bottom - top) as u32;

    let mut alpha = vec![0u8; (width * height) as usize];
    for glyph in &glyphs {
        let ox = (glyph.x - left) as u32;
        let oy = (glyph.y - top) as u32;
        for row in 0..glyph.height {
            for col in 0..glyph.width {
                let src = glyph.coverage[(row * glyph.width + col) as usize];
                let dst = &mut alpha[((oy + row) * width + ox + col) as usize];
                *dst = (*dst).max(src);
            }
        }
    }

    Some(LabelMask {
        width,
        height,
        left,
        top,
        alpha,
    })
}

// ===================================================================
// Tests
// ===================================================================
