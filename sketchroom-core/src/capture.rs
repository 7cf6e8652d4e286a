//! Single-pointer gesture capture.
//!
//! ```text
//!          pointer_down (primary)
//!   Idle ─────────────────────────► Capturing { pointer_id, points }
//!    ▲                                   │  pointer_move (same id) → Segment
//!    │   pointer_up / capture_lost       │
//!    └───────────────────────────────────┘  → Finished (≥ 2 points) | Discarded
//! ```
//!
//! The machine never touches tool settings or the network. It only says
//! what happened; the caller snapshots tools and persists on `Finished`.

use crate::stroke::{Point, MIN_RENDERABLE_POINTS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    Primary,
    Secondary,
    Middle,
    Other(u16),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub pointer_id: u32,
    pub button: PointerButton,
    /// Logical surface coordinates.
    pub position: Point,
}

impl PointerEvent {
    pub fn primary(pointer_id: u32, x: f32, y: f32) -> Self {
        Self {
            pointer_id,
            button: PointerButton::Primary,
            position: Point::new(x, y),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum CaptureState {
    #[default]
    Idle,
    Capturing { pointer_id: u32, points: Vec<Point> },
}

/// What the caller should do in response to a pointer event.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEffect {
    /// A gesture started at this point. Nothing to draw yet.
    Began(Point),
    /// Draw one segment incrementally.
    Segment { from: Point, to: Point },
    /// The gesture ended with a drawable polyline.
    Finished(Vec<Point>),
    /// The gesture ended too short to draw; it is dropped silently.
    Discarded { points: usize },
}

#[derive(Debug, Default)]
pub struct CaptureMachine {
    state: CaptureState,
}

impl CaptureMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self.state, CaptureState::Capturing { .. })
    }

    /// Points of the gesture in progress, empty when idle.
    pub fn in_progress(&self) -> &[Point] {
        match &self.state {
            CaptureState::Capturing { points, .. } => points,
            CaptureState::Idle => &[],
        }
    }

    /// Only a primary press from idle starts a gesture. A second pointer
    /// going down mid-gesture is ignored, as is a non-finite position.
    pub fn pointer_down(&mut self, event: PointerEvent) -> Option<CaptureEffect> {
        if event.button != PointerButton::Primary || self.is_capturing() {
            return None;
        }
        if !event.position.is_finite() {
            log::debug!("Ignoring pointer down at a non-finite position");
            return None;
        }
        self.state = CaptureState::Capturing {
            pointer_id: event.pointer_id,
            points: vec![event.position],
        };
        Some(CaptureEffect::Began(event.position))
    }

    pub fn pointer_move(&mut self, event: PointerEvent) -> Option<CaptureEffect> {
        let CaptureState::Capturing { pointer_id, points } = &mut self.state else {
            return None;
        };
        if *pointer_id != event.pointer_id {
            return None;
        }
        if !event.position.is_finite() {
            log::debug!("Skipping non-finite move of pointer {pointer_id}");
            return None;
        }
        let from = *points.last()?;
        points.push(event.position);
        Some(CaptureEffect::Segment {
            from,
            to: event.position,
        })
    }

    /// Ends the gesture. The release position is not added as a point.
    pub fn pointer_up(&mut self, event: PointerEvent) -> Option<CaptureEffect> {
        self.finish(event.pointer_id)
    }

    /// Pointer capture was taken away (window blur, cancel). Finalizes
    /// exactly like a release.
    pub fn capture_lost(&mut self, pointer_id: u32) -> Option<CaptureEffect> {
        self.finish(pointer_id)
    }

    /// Abandon the gesture without committing anything.
    pub fn reset(&mut self) {
        self.state = CaptureState::Idle;
    }

    fn finish(&mut self, pointer_id: u32) -> Option<CaptureEffect> {
        match &self.state {
            CaptureState::Capturing { pointer_id: active, .. } if *active == pointer_id => {}
            _ => return None,
        }
        let CaptureState::Capturing { points, .. } = std::mem::take(&mut self.state) else {
            return None;
        };
        if points.len() < MIN_RENDERABLE_POINTS {
            log::debug!("Discarding gesture with {} point(s)", points.len());
            return Some(CaptureEffect::Discarded {
                points: points.len(),
            });
        }
        Some(CaptureEffect::Finished(points))
    }
}
