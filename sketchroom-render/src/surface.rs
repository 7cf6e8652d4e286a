//! CPU drawing surface with device-pixel-ratio scaling.
//!
//! All drawing happens in logical (CSS-pixel) coordinates. The backing
//! pixmap is `ceil(width * dpr) x ceil(height * dpr)` device pixels and
//! the logical→device transform is fixed whenever the surface is resized.

use std::path::Path;

use tiny_skia::{Pixmap, PremultipliedColorU8, Transform};

use crate::renderer::RenderError;

pub struct Surface {
    pixmap: Pixmap,
    width: f32,
    height: f32,
    dpr: f32,
    transform: Transform,
}

impl Surface {
    pub fn new(width: f32, height: f32, dpr: f32) -> Result<Self, RenderError> {
        let (pixmap, transform) = allocate(width, height, dpr)?;
        Ok(Self {
            pixmap,
            width,
            height,
            dpr,
            transform,
        })
    }

    /// Reallocate the backing buffer. Previous pixels are discarded; the
    /// caller is expected to run a full redraw afterwards.
    pub fn resize(&mut self, width: f32, height: f32, dpr: f32) -> Result<(), RenderError> {
        let (pixmap, transform) = allocate(width, height, dpr)?;
        log::debug!(
            "Surface resized to {width}x{height} @{dpr} ({}x{} device px)",
            pixmap.width(),
            pixmap.height()
        );
        self.pixmap = pixmap;
        self.width = width;
        self.height = height;
        self.dpr = dpr;
        self.transform = transform;
        Ok(())
    }

    pub fn logical_size(&self) -> (f32, f32) {
        (self.width, self.height)
    }

    pub fn device_size(&self) -> (u32, u32) {
        (self.pixmap.width(), self.pixmap.height())
    }

    pub fn dpr(&self) -> f32 {
        self.dpr
    }

    /// Logical → device transform.
    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    pub fn pixmap_mut(&mut self) -> &mut Pixmap {
        &mut self.pixmap
    }

    /// Device pixel under the logical point `(x, y)`.
    pub fn pixel_at(&self, x: f32, y: f32) -> Option<PremultipliedColorU8> {
        if !(x.is_finite() && y.is_finite()) || x < 0.0 || y < 0.0 {
            return None;
        }
        let dx = (x * self.dpr).floor() as u32;
        let dy = (y * self.dpr).floor() as u32;
        // `Pixmap::pixel` only checks the flat index, so a column past the
        // right edge would wrap onto the next row.
        if dx >= self.pixmap.width() || dy >= self.pixmap.height() {
            return None;
        }
        self.pixmap.pixel(dx, dy)
    }

    pub fn encode_png(&self) -> Result<Vec<u8>, RenderError> {
        self.pixmap
            .encode_png()
            .map_err(|e| RenderError::Png(e.to_string()))
    }

    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<(), RenderError> {
        self.pixmap
            .save_png(path)
            .map_err(|e| RenderError::Png(e.to_string()))
    }
}

fn allocate(width: f32, height: f32, dpr: f32) -> Result<(Pixmap, Transform), RenderError> {
    let valid = |v: f32| v.is_finite() && v > 0.0;
    if !(valid(width) && valid(height) && valid(dpr)) {
        return Err(RenderError::InvalidSize { width, height, dpr });
    }
    let device_w = (width * dpr).ceil() as u32;
    let device_h = (height * dpr).ceil() as u32;
    let pixmap =
        Pixmap::new(device_w, device_h).ok_or(RenderError::InvalidSize { width, height, dpr })?;
    Ok((pixmap, Transform::from_scale(dpr, dpr)))
}
