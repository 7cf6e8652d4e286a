//! Strokes and their wire payload.
//!
//! A [`Stroke`] is immutable once it reaches the committed list. Locally
//! drawn strokes start life with a temporary id (see [`local_stroke_id`])
//! and are swapped for the persisted row once the store answers.
//!
//! Remote payloads arrive as a [`StrokeRecord`], a shape where every field
//! is optional. Converting it into a [`Stroke`] is the single validation
//! point: anything missing, non-finite or degenerate is rejected there.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use crate::error::StrokeError;
use crate::identity::{Participant, RoomId};
use crate::tools::ToolSettings;

/// Fewer points than this cannot be drawn as a line.
pub const MIN_RENDERABLE_POINTS: usize = 2;

/// Prefix of client-generated ids for strokes not yet confirmed by the store.
pub const LOCAL_ID_PREFIX: &str = "local-";

static LOCAL_ID_SEQ: AtomicU64 = AtomicU64::new(0);

/// Milliseconds since the Unix epoch (0 if the clock is before it).
pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Clock-based temporary id for an optimistic stroke.
///
/// The sequence suffix keeps ids unique when two strokes finish within
/// the same millisecond.
pub fn local_stroke_id() -> String {
    let seq = LOCAL_ID_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{LOCAL_ID_PREFIX}{}-{seq}", unix_millis())
}

/// A point in logical (CSS pixel) surface coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Drawing tool. Unknown names are kept verbatim and paint like a pen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Tool {
    #[default]
    Pen,
    Eraser,
    Other(String),
}

impl Tool {
    pub fn parse(name: &str) -> Self {
        match name {
            "pen" => Tool::Pen,
            "eraser" => Tool::Eraser,
            other => Tool::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Tool::Pen => "pen",
            Tool::Eraser => "eraser",
            Tool::Other(name) => name,
        }
    }

    /// Eraser strokes punch through everything beneath them.
    pub fn is_eraser(&self) -> bool {
        matches!(self, Tool::Eraser)
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Tool {
    fn from(name: String) -> Self {
        Tool::parse(&name)
    }
}

impl From<Tool> for String {
    fn from(tool: Tool) -> Self {
        tool.as_str().to_string()
    }
}

fn validate_geometry(points: &[Point], size: f32) -> Result<(), StrokeError> {
    if points.len() < MIN_RENDERABLE_POINTS {
        return Err(StrokeError::TooFewPoints(points.len()));
    }
    if let Some(index) = points.iter().position(|p| !p.is_finite()) {
        return Err(StrokeError::NonFinitePoint { index });
    }
    if !(size.is_finite() && size > 0.0) {
        return Err(StrokeError::InvalidSize(size));
    }
    Ok(())
}

/// A stroke as submitted to the persistence port, before it has an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStroke {
    pub user_id: String,
    pub user_name: String,
    pub user_color: String,
    pub points: Vec<Point>,
    pub color: String,
    pub size: f32,
    pub tool: Tool,
}

impl NewStroke {
    /// Build a stroke from a finished gesture.
    ///
    /// `settings` must be the snapshot taken at finalize time; it applies
    /// to every point, including those drawn before a mid-stroke change.
    pub fn from_gesture(author: &Participant, points: Vec<Point>, settings: &ToolSettings) -> Self {
        Self {
            user_id: author.user_id.clone(),
            user_name: author.user_name.clone(),
            user_color: author.user_color.clone(),
            points,
            color: settings.color.clone(),
            size: settings.size,
            tool: settings.tool.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), StrokeError> {
        validate_geometry(&self.points, self.size)
    }

    /// Attach identity and creation time, producing a committed stroke.
    pub fn into_stroke(self, id: impl Into<String>, room_id: RoomId, created_at: i64) -> Stroke {
        Stroke {
            id: id.into(),
            room_id,
            user_id: self.user_id,
            user_name: self.user_name,
            user_color: self.user_color,
            points: self.points,
            color: self.color,
            size: self.size,
            tool: self.tool,
            created_at,
        }
    }
}

/// A committed freehand stroke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub id: String,
    pub room_id: RoomId,
    pub user_id: String,
    pub user_name: String,
    pub user_color: String,
    pub points: Vec<Point>,
    pub color: String,
    pub size: f32,
    pub tool: Tool,
    /// Creation time, Unix milliseconds.
    pub created_at: i64,
}

impl Stroke {
    pub fn validate(&self) -> Result<(), StrokeError> {
        validate_geometry(&self.points, self.size)
    }

    pub fn is_renderable(&self) -> bool {
        self.validate().is_ok()
    }

    /// Whether the id is a client-generated placeholder.
    pub fn has_local_id(&self) -> bool {
        self.id.starts_with(LOCAL_ID_PREFIX)
    }

    /// Same author and same drawn content, ignoring id and timestamps.
    ///
    /// Used to recognise the transport echo of an optimistic stroke.
    pub fn same_content(&self, other: &Stroke) -> bool {
        self.user_id == other.user_id
            && self.tool == other.tool
            && self.color == other.color
            && self.size == other.size
            && self.points == other.points
    }
}

/// Loosely typed stroke payload as delivered by a transport or a JSON row.
///
/// Every field is optional so that a partially broken payload still
/// decodes; [`Stroke::try_from`] decides whether it is usable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrokeRecord {
    pub id: Option<String>,
    pub room_id: Option<String>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub user_color: Option<String>,
    pub points: Option<Vec<Point>>,
    pub color: Option<String>,
    pub size: Option<f32>,
    pub tool: Option<String>,
    pub created_at: Option<i64>,
}

impl StrokeRecord {
    /// Parse a JSON row. Type mismatches surface as [`StrokeError::Malformed`].
    pub fn from_json(text: &str) -> Result<Self, StrokeError> {
        serde_json::from_str(text).map_err(|e| StrokeError::Malformed(e.to_string()))
    }

    pub fn from_json_value(value: serde_json::Value) -> Result<Self, StrokeError> {
        serde_json::from_value(value).map_err(|e| StrokeError::Malformed(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, StrokeError> {
        serde_json::to_string(self).map_err(|e| StrokeError::Malformed(e.to_string()))
    }
}

impl From<&Stroke> for StrokeRecord {
    fn from(stroke: &Stroke) -> Self {
        Self {
            id: Some(stroke.id.clone()),
            room_id: Some(stroke.room_id.as_str().to_string()),
            user_id: Some(stroke.user_id.clone()),
            user_name: Some(stroke.user_name.clone()),
            user_color: Some(stroke.user_color.clone()),
            points: Some(stroke.points.clone()),
            color: Some(stroke.color.clone()),
            size: Some(stroke.size),
            tool: Some(stroke.tool.as_str().to_string()),
            created_at: Some(stroke.created_at),
        }
    }
}

impl From<Stroke> for StrokeRecord {
    fn from(stroke: Stroke) -> Self {
        StrokeRecord::from(&stroke)
    }
}

impl TryFrom<StrokeRecord> for Stroke {
    type Error = StrokeError;

    fn try_from(record: StrokeRecord) -> Result<Self, Self::Error> {
        let id = record.id.ok_or(StrokeError::MissingField("id"))?;
        let room_id = record.room_id.ok_or(StrokeError::MissingField("room_id"))?;
        let user_id = record.user_id.ok_or(StrokeError::MissingField("user_id"))?;
        let points = record.points.ok_or(StrokeError::MissingField("points"))?;
        let size = record.size.ok_or(StrokeError::MissingField("size"))?;
        let tool = record.tool.map(Tool::from).unwrap_or_default();
        // Eraser rows may omit the color; it is never used for them.
        let color = match record.color {
            Some(color) => color,
            None if tool.is_eraser() => String::new(),
            None => return Err(StrokeError::MissingField("color")),
        };

        let stroke = Stroke {
            id,
            room_id: RoomId::new(room_id),
            user_id,
            user_name: record.user_name.unwrap_or_default(),
            user_color: record.user_color.unwrap_or_default(),
            points,
            color,
            size,
            tool,
            created_at: record.created_at.unwrap_or_default(),
        };
        stroke.validate()?;
        Ok(stroke)
    }
}
