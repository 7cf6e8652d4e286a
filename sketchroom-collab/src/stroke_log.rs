//! Ordered committed-stroke list shared by optimistic and remote strokes.
//!
//! ```text
//!   commit_local(s)        ──► [.., s(Pending)]
//!   confirm_local(tmp, s') ──► [.., s'(Confirmed)]   same slot
//!   apply_remote_insert(r) ──► validate ─┬─ rejected  → dropped
//!                                        ├─ known id  → ignored
//!                                        ├─ own echo  → confirms the pending slot
//!                                        └─ otherwise → appended
//!   apply_remote_clear()   ──► []
//!   backfill(mark, rows)   ──► rows ++ local unpersisted ++ arrived since mark
//! ```
//!
//! The list is append-only apart from clear and backfill. A slot is never
//! edited in place; confirming swaps the whole stroke for the persisted one.

use std::collections::HashMap;

use sketchroom_core::{Stroke, StrokeError, StrokeRecord};

/// Persistence state of a stroke in the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrokeStatus {
    /// Drawn locally, write in flight.
    Pending,
    /// Persisted (remote strokes are always confirmed).
    Confirmed,
    /// The write failed. Still shown locally; other clients never see it.
    Failed,
}

/// Outcome of applying a remote insert.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteInsert {
    Appended,
    /// The insert was the echo of our own pending stroke.
    Confirmed { local_id: String },
    Duplicate,
    Rejected(StrokeError),
}

impl RemoteInsert {
    /// Whether the visible list changed.
    pub fn changed(&self) -> bool {
        matches!(self, RemoteInsert::Appended)
    }
}

/// Point in the log's history taken when a reload is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResyncMark {
    arrival: u64,
    clears: u64,
}

#[derive(Debug, Clone)]
pub struct StrokeLog {
    local_user_id: String,
    strokes: Vec<Stroke>,
    status: Vec<StrokeStatus>,
    /// Arrival order of each slot.
    arrival: Vec<u64>,
    /// Stroke id to slot.
    index: HashMap<String, usize>,
    next_arrival: u64,
    clears: u64,
}

impl StrokeLog {
    pub fn new(local_user_id: impl Into<String>) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            strokes: Vec::new(),
            status: Vec::new(),
            arrival: Vec::new(),
            index: HashMap::new(),
            next_arrival: 0,
            clears: 0,
        }
    }

    /// Strokes in visible order.
    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub fn len(&self) -> usize {
        self.strokes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.status
            .iter()
            .filter(|s| **s == StrokeStatus::Pending)
            .count()
    }

    pub fn status_of(&self, id: &str) -> Option<StrokeStatus> {
        self.position(id).map(|i| self.status[i])
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    fn push(&mut self, stroke: Stroke, status: StrokeStatus) {
        self.index.insert(stroke.id.clone(), self.strokes.len());
        self.strokes.push(stroke);
        self.status.push(status);
        self.arrival.push(self.next_arrival);
        self.next_arrival += 1;
    }

    /// Put `stroke` in slot `i`, keeping the slot's arrival.
    fn swap_slot(&mut self, i: usize, stroke: Stroke, status: StrokeStatus) -> Stroke {
        self.index.remove(&self.strokes[i].id);
        self.index.insert(stroke.id.clone(), i);
        let old = std::mem::replace(&mut self.strokes[i], stroke);
        self.status[i] = status;
        old
    }

    fn remove_slot(&mut self, i: usize) {
        let removed = self.strokes.remove(i);
        self.status.remove(i);
        self.arrival.remove(i);
        self.index.remove(&removed.id);
        for (offset, stroke) in self.strokes[i..].iter().enumerate() {
            self.index.insert(stroke.id.clone(), i + offset);
        }
    }

    fn reset(&mut self) {
        self.strokes.clear();
        self.status.clear();
        self.arrival.clear();
        self.index.clear();
    }

    /// Append validated, not yet known rows as confirmed strokes.
    fn extend_loaded(&mut self, strokes: Vec<Stroke>) {
        for stroke in strokes {
            if let Err(e) = stroke.validate() {
                log::warn!("Dropping loaded stroke {}: {e}", stroke.id);
                continue;
            }
            if self.position(&stroke.id).is_some() {
                continue;
            }
            self.push(stroke, StrokeStatus::Confirmed);
        }
    }

    /// Replace everything with a freshly loaded list. Invalid rows are dropped.
    pub fn replace_all(&mut self, strokes: Vec<Stroke>) {
        self.reset();
        self.extend_loaded(strokes);
    }

    /// Remember the current position before reloading the room.
    pub fn mark(&self) -> ResyncMark {
        ResyncMark {
            arrival: self.next_arrival,
            clears: self.clears,
        }
    }

    /// Rebuild from rows loaded after `mark` was taken.
    ///
    /// The rows come first. Local strokes not yet persisted follow, unless
    /// a row carries the same content (the write landed and its echo was
    /// lost). Remote strokes applied since `mark` follow as well, since the
    /// load may predate them. Anything else missing from the rows was
    /// removed upstream and is dropped.
    ///
    /// Returns `None`, leaving the list untouched, if a clear was applied
    /// since `mark`. Otherwise returns how many strokes became visible.
    pub fn backfill(&mut self, mark: ResyncMark, loaded: Vec<Stroke>) -> Option<usize> {
        if mark.clears != self.clears {
            return None;
        }
        let fresh = Self::new(self.local_user_id.clone());
        let previous = std::mem::replace(self, fresh);
        self.next_arrival = previous.next_arrival;
        self.clears = previous.clears;
        self.extend_loaded(loaded);

        let mut recovered = self
            .strokes
            .iter()
            .filter(|s| !previous.index.contains_key(&s.id))
            .count();
        // Rows new to us that could be our own unconfirmed strokes.
        let mut unclaimed: Vec<usize> = (0..self.strokes.len())
            .filter(|&i| {
                let row = &self.strokes[i];
                row.user_id == self.local_user_id && !previous.index.contains_key(&row.id)
            })
            .collect();

        let slots = previous
            .strokes
            .into_iter()
            .zip(previous.status)
            .zip(previous.arrival);
        for ((stroke, status), arrival) in slots {
            if self.position(&stroke.id).is_some() {
                continue;
            }
            match status {
                StrokeStatus::Pending | StrokeStatus::Failed => {
                    let persisted = unclaimed
                        .iter()
                        .position(|&i| self.strokes[i].same_content(&stroke));
                    if let Some(claimed) = persisted {
                        unclaimed.swap_remove(claimed);
                        recovered = recovered.saturating_sub(1);
                        log::debug!("Local stroke {} found persisted on reload", stroke.id);
                    } else {
                        self.push(stroke, status);
                    }
                }
                StrokeStatus::Confirmed if arrival >= mark.arrival => {
                    self.push(stroke, status);
                }
                StrokeStatus::Confirmed => {
                    log::debug!("Stroke {} no longer in the room, dropped", stroke.id);
                }
            }
        }
        Some(recovered)
    }

    /// Optimistically append a locally drawn stroke before persistence answers.
    pub fn commit_local(&mut self, stroke: Stroke) -> bool {
        if let Err(e) = stroke.validate() {
            log::debug!("Not committing local stroke {}: {e}", stroke.id);
            return false;
        }
        self.push(stroke, StrokeStatus::Pending);
        true
    }

    /// Swap a pending local stroke for its persisted row.
    ///
    /// Returns false if the temporary id is gone (already confirmed by the
    /// echo, or removed by a clear); the list is left untouched then.
    pub fn confirm_local(&mut self, local_id: &str, persisted: Stroke) -> bool {
        let Some(index) = self.position(local_id) else {
            return false;
        };
        if self.position(&persisted.id).is_some() {
            // Echo already delivered the row under its real id.
            self.remove_slot(index);
            return true;
        }
        self.swap_slot(index, persisted, StrokeStatus::Confirmed);
        true
    }

    /// Record a failed write. The stroke stays visible.
    pub fn mark_failed(&mut self, local_id: &str) -> bool {
        match self.position(local_id) {
            Some(index) if self.status[index] == StrokeStatus::Pending => {
                self.status[index] = StrokeStatus::Failed;
                true
            }
            _ => false,
        }
    }

    pub fn apply_remote_insert(&mut self, record: StrokeRecord) -> RemoteInsert {
        let stroke = match Stroke::try_from(record) {
            Ok(stroke) => stroke,
            Err(e) => {
                log::warn!("Dropping remote stroke: {e}");
                return RemoteInsert::Rejected(e);
            }
        };

        if self.position(&stroke.id).is_some() {
            return RemoteInsert::Duplicate;
        }

        if stroke.user_id == self.local_user_id {
            let echo = self.strokes.iter().zip(&self.status).position(|(s, status)| {
                *status != StrokeStatus::Confirmed && s.has_local_id() && s.same_content(&stroke)
            });
            if let Some(index) = echo {
                let local_id = self.swap_slot(index, stroke, StrokeStatus::Confirmed).id;
                return RemoteInsert::Confirmed { local_id };
            }
        }

        self.push(stroke, StrokeStatus::Confirmed);
        RemoteInsert::Appended
    }

    /// Empty the list unconditionally. Returns how many strokes were dropped.
    pub fn apply_remote_clear(&mut self) -> usize {
        let removed = self.strokes.len();
        self.reset();
        self.clears += 1;
        removed
    }
}
