//! Current tool, color and brush size.
//!
//! The toolbar writes, pointer handlers read. Handlers are attached once
//! per room and hold a clone of the [`ToolCell`], so they always see the
//! latest value without being re-attached.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::stroke::Tool;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSettings {
    pub tool: Tool,
    /// CSS color; ignored by the eraser.
    pub color: String,
    pub size: f32,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            tool: Tool::Pen,
            color: String::from("#000000"),
            size: 4.0,
        }
    }
}

/// Shared latest-value cell for [`ToolSettings`].
///
/// Clones share the same cell. Single writer, many readers.
#[derive(Debug, Clone, Default)]
pub struct ToolCell {
    inner: Arc<RwLock<ToolSettings>>,
}

impl ToolCell {
    pub fn new(settings: ToolSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    // A poisoned lock still holds a complete value; keep using it.
    fn read(&self) -> RwLockReadGuard<'_, ToolSettings> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ToolSettings> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy of the values live right now.
    pub fn snapshot(&self) -> ToolSettings {
        self.read().clone()
    }

    pub fn set(&self, settings: ToolSettings) {
        *self.write() = settings;
    }

    pub fn set_tool(&self, tool: Tool) {
        self.write().tool = tool;
    }

    pub fn set_color(&self, color: impl Into<String>) {
        self.write().color = color.into();
    }

    /// Set the brush size. Non-positive or non-finite sizes are ignored.
    pub fn set_size(&self, size: f32) -> bool {
        if !(size.is_finite() && size > 0.0) {
            log::warn!("Ignoring invalid brush size {size}");
            return false;
        }
        self.write().size = size;
        true
    }

    pub fn tool(&self) -> Tool {
        self.read().tool.clone()
    }

    pub fn color(&self) -> String {
        self.read().color.clone()
    }

    pub fn size(&self) -> f32 {
        self.read().size
    }
}
