//! Scene renderer: committed strokes, the in-progress local stroke and
//! remote cursors drawn onto a [`Surface`].
//!
//! Two entry points:
//!
//! - [`Renderer::full_redraw`] — background fill, then strokes in list
//!   order, then the in-progress stroke, then cursors.
//! - [`Renderer::draw_segment`] — one segment with the current tool,
//!   nothing cleared. Used on every pointer move while capturing.

use std::sync::Arc;

use thiserror::Error;
use tiny_skia::{
    BlendMode, FillRule, LineCap, LineJoin, Paint, PathBuilder, Pixmap, PixmapPaint, Stroke,
    Transform,
};

use sketchroom_core::{Point, Stroke as CommittedStroke, Tool, ToolSettings, MIN_RENDERABLE_POINTS};
use sketchroom_text::{LabelEngine, LabelMask, LabelStyle};

use crate::color::Rgba;
use crate::surface::Surface;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Invalid surface size {width}x{height} @ dpr {dpr}")]
    InvalidSize { width: f32, height: f32, dpr: f32 },
    #[error("PNG encoding failed: {0}")]
    Png(String),
}

/// Frame statistics returned after each full redraw.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub strokes_drawn: u32,
    /// Strokes that failed geometry validation and were left out.
    pub strokes_skipped: u32,
    pub cursors_drawn: u32,
    pub labels_drawn: u32,
}

/// A remote participant's cursor as the renderer sees it.
#[derive(Clone, Debug, PartialEq)]
pub struct CursorSprite {
    pub name: String,
    pub color: String,
    pub position: Point,
}

/// The local stroke still being drawn.
#[derive(Clone, Copy, Debug)]
pub struct InProgress<'a> {
    pub points: &'a [Point],
    pub settings: &'a ToolSettings,
}

/// Everything a full redraw needs.
#[derive(Clone, Copy, Debug, Default)]
pub struct Scene<'a> {
    pub strokes: &'a [CommittedStroke],
    pub in_progress: Option<InProgress<'a>>,
    pub cursors: &'a [CursorSprite],
}

#[derive(Clone, Debug)]
pub struct RenderConfig {
    /// CSS background fill.
    pub background: String,
    /// Cursor dot radius, logical px.
    pub cursor_radius: f32,
    /// Label anchor relative to the cursor, logical px.
    pub label_offset: (f32, f32),
    /// Label style; `font_size` is in logical px.
    pub label_style: LabelStyle,
    /// Rasterize name labels. Loading system fonts is slow, so tests turn this off.
    pub draw_labels: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            background: String::from("#ffffff"),
            cursor_radius: 5.0,
            label_offset: (10.0, -10.0),
            label_style: LabelStyle::default(),
            draw_labels: true,
        }
    }
}

impl RenderConfig {
    pub fn for_testing() -> Self {
        Self {
            draw_labels: false,
            ..Default::default()
        }
    }
}

pub struct Renderer {
    config: RenderConfig,
    background: Rgba,
    labels: Option<LabelEngine>,
    last_frame: FrameStats,
}

impl Renderer {
    pub fn new(config: RenderConfig) -> Self {
        let background = Rgba::parse_or_black(&config.background);
        let labels = config.draw_labels.then(LabelEngine::new);
        Self {
            config,
            background,
            labels,
            last_frame: FrameStats::default(),
        }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn last_frame(&self) -> FrameStats {
        self.last_frame
    }

    /// Redraw the whole scene. Idempotent for an unchanged scene.
    pub fn full_redraw(&mut self, surface: &mut Surface, scene: &Scene<'_>) -> FrameStats {
        let mut stats = FrameStats::default();
        let transform = surface.transform();
        let pixmap = surface.pixmap_mut();
        pixmap.fill(self.background.to_color());

        for stroke in scene.strokes {
            if stroke.validate().is_err() {
                log::warn!("Skipping invalid stroke {} at draw time", stroke.id);
                stats.strokes_skipped += 1;
                continue;
            }
            draw_polyline(pixmap, transform, &stroke.points, &stroke.color, stroke.size, &stroke.tool);
            stats.strokes_drawn += 1;
        }

        if let Some(live) = scene.in_progress {
            if live.points.len() >= MIN_RENDERABLE_POINTS {
                let settings = live.settings;
                draw_polyline(pixmap, transform, live.points, &settings.color, settings.size, &settings.tool);
            }
        }

        for cursor in scene.cursors {
            if !cursor.position.is_finite() {
                continue;
            }
            self.draw_cursor(surface, cursor, &mut stats);
        }

        self.last_frame = stats;
        stats
    }

    /// Draw a single segment with the given tool settings, leaving the
    /// rest of the surface untouched.
    pub fn draw_segment(&self, surface: &mut Surface, from: Point, to: Point, settings: &ToolSettings) {
        let transform = surface.transform();
        draw_polyline(
            surface.pixmap_mut(),
            transform,
            &[from, to],
            &settings.color,
            settings.size,
            &settings.tool,
        );
    }

    fn draw_cursor(&mut self, surface: &mut Surface, cursor: &CursorSprite, stats: &mut FrameStats) {
        let transform = surface.transform();
        let color = Rgba::parse_or_black(&cursor.color);
        let Some(dot) = PathBuilder::from_circle(
            cursor.position.x,
            cursor.position.y,
            self.config.cursor_radius,
        ) else {
            return;
        };
        let mut paint = Paint::default();
        paint.set_color_rgba8(color.r, color.g, color.b, color.a);
        paint.anti_alias = true;
        surface
            .pixmap_mut()
            .fill_path(&dot, &paint, FillRule::Winding, transform, None);
        stats.cursors_drawn += 1;

        let dpr = surface.dpr();
        let Some(engine) = self.labels.as_mut() else {
            return;
        };
        // Rasterize at device size so text stays crisp on high-dpi surfaces.
        let style = LabelStyle {
            font_size: self.config.label_style.font_size * dpr,
            family: self.config.label_style.family.clone(),
        };
        let Some(mask) = engine.label(&cursor.name, &style) else {
            return;
        };
        let Some(sprite) = tint(&mask, color) else {
            return;
        };
        let (ox, oy) = self.config.label_offset;
        let x = ((cursor.position.x + ox) * dpr).round() as i32 + mask.left;
        let y = ((cursor.position.y + oy) * dpr).round() as i32 + mask.top;
        surface.pixmap_mut().draw_pixmap(
            x,
            y,
            sprite.as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            None,
        );
        stats.labels_drawn += 1;
    }
}

fn draw_polyline(
    pixmap: &mut Pixmap,
    transform: Transform,
    points: &[Point],
    color: &str,
    size: f32,
    tool: &Tool,
) {
    let Some((first, rest)) = points.split_first() else {
        return;
    };
    if rest.is_empty() {
        return;
    }
    let mut builder = PathBuilder::new();
    builder.move_to(first.x, first.y);
    for point in rest {
        builder.line_to(point.x, point.y);
    }
    let Some(path) = builder.finish() else {
        log::trace!("Degenerate path with {} points skipped", points.len());
        return;
    };

    let mut paint = Paint::default();
    paint.anti_alias = true;
    if tool.is_eraser() {
        // Punch through to transparent, background included.
        paint.blend_mode = BlendMode::DestinationOut;
        paint.set_color_rgba8(0, 0, 0, 255);
    } else {
        let rgba = Rgba::parse_or_black(color);
        paint.blend_mode = BlendMode::SourceOver;
        paint.set_color_rgba8(rgba.r, rgba.g, rgba.b, rgba.a);
    }

    let stroke = Stroke {
        width: size,
        line_cap: LineCap::Round,
        line_join: LineJoin::Round,
        ..Default::default()
    };
    pixmap.stroke_path(&path, &paint, &stroke, transform, None);
}

/// Color a coverage mask into a premultiplied sprite.
fn tint(mask: &Arc<LabelMask>, color: Rgba) -> Option<Pixmap> {
    let mut sprite = Pixmap::new(mask.width, mask.height)?;
    for (px, &coverage) in sprite.data_mut().chunks_exact_mut(4).zip(mask.alpha.iter()) {
        let alpha = (coverage as u16 * color.a as u16 / 255) as u8;
        let premul = |c: u8| (c as u16 * alpha as u16 / 255) as u8;
        px[0] = premul(color.r);
        px[1] = premul(color.g);
        px[2] = premul(color.b);
        px[3] = alpha;
    }
    Some(sprite)
}

// ===================================================================
// Tests
// ===================================================================
