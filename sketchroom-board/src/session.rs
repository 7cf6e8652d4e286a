//! Board session: one participant's view of one room at a time.
//!
//! `BoardSession` owns the capture machine, the stroke log, the presence
//! bridge, the renderer and the surface, and talks to the outside world
//! only through the persistence and transport ports.
//!
//! ```text
//!  pointer_down/move/up ──► CaptureMachine ──► Segment  ──► Renderer::draw_segment
//!                                  │
//!                                  └─ Finished ──► StrokeLog::commit_local (Pending)
//!                                                  └─ spawn insert_stroke ──► outcome channel
//!  process_remote() ◄── StrokeFeed (Insert/Delete) + PresenceFeed (sync) + outcomes
//!         │                   └─ Resync ──► spawn load_strokes ──► StrokeLog::backfill
//!         └─ changed? ──► Renderer::full_redraw
//! ```
//!
//! Every method runs on the owner's task. The only concurrent work is the
//! persistence writes and reloads, which report back over a channel drained
//! by [`BoardSession::process_remote`] or [`BoardSession::wait_for_commits`].

use std::sync::Arc;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use sketchroom_collab::{
    PersistencePort, PresenceFeed, ProtocolError, RemoteInsert, ResyncMark, StoreError,
    StrokeEvent, StrokeFeed, StrokeLog, TransportPort,
};
use sketchroom_core::{
    local_stroke_id, unix_millis, CaptureEffect, CaptureMachine, NewStroke, Participant, Point,
    PointerEvent, RoomId, Stroke, ToolCell,
};
use sketchroom_render::{FrameStats, InProgress, RenderError, Renderer, Scene, Surface};

use crate::config::{BoardConfig, PersistPolicy};
use crate::presence::BoardPresence;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(#[from] ProtocolError),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("Render error: {0}")]
    Render(#[from] RenderError),
    #[error("Not joined to a room")]
    NotInRoom,
}

/// What one [`BoardSession::process_remote`] call applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    /// Remote strokes appended.
    pub inserted: usize,
    /// Pending local strokes confirmed, by echo or by write result.
    pub confirmed: usize,
    /// Local strokes whose write failed.
    pub failed: usize,
    /// Remote strokes dropped as malformed.
    pub rejected: usize,
    pub clears: usize,
    /// Times the stroke feed fell behind and a reload was requested.
    pub resyncs: usize,
    /// Strokes that became visible through a reload.
    pub restored: usize,
    pub presence_syncs: usize,
    /// Whether a full redraw ran.
    pub redrawn: bool,
}

/// Result of spawned persistence work, sent back to the session task.
#[derive(Debug)]
enum TaskOutcome {
    Write {
        room_id: RoomId,
        local_id: String,
        result: Result<Stroke, StoreError>,
    },
    /// Reload after the stroke feed lagged. `epoch` ties it to one join.
    Backfill {
        epoch: u64,
        room_id: RoomId,
        mark: ResyncMark,
        result: Result<Vec<Stroke>, StoreError>,
    },
}

/// Live subscriptions for the joined room. Dropping it unsubscribes and
/// untracks presence.
struct RoomBinding {
    room_id: RoomId,
    strokes: StrokeFeed,
    presence: PresenceFeed,
    runtime: Handle,
}

pub struct BoardSession {
    participant: Participant,
    tools: ToolCell,
    policy: PersistPolicy,
    persistence: Arc<dyn PersistencePort>,
    transport: Arc<dyn TransportPort>,
    binding: Option<RoomBinding>,
    log: StrokeLog,
    presence: BoardPresence,
    capture: CaptureMachine,
    renderer: Renderer,
    surface: Surface,
    outcome_tx: mpsc::UnboundedSender<TaskOutcome>,
    outcome_rx: mpsc::UnboundedReceiver<TaskOutcome>,
    in_flight: usize,
    /// Bumped on every teardown.
    epoch: u64,
    backfill_in_flight: bool,
    backfill_queued: bool,
}

impl BoardSession {
    /// Session whose persistence and transport are the same service.
    pub fn new<P>(participant: Participant, config: BoardConfig, port: Arc<P>) -> Result<Self, SessionError>
    where
        P: PersistencePort + TransportPort + 'static,
    {
        Self::with_ports(participant, config, port.clone(), port)
    }

    pub fn with_ports(
        participant: Participant,
        config: BoardConfig,
        persistence: Arc<dyn PersistencePort>,
        transport: Arc<dyn TransportPort>,
    ) -> Result<Self, SessionError> {
        let surface = Surface::new(config.width, config.height, config.device_pixel_ratio)?;
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        Ok(Self {
            log: StrokeLog::new(participant.user_id.clone()),
            presence: BoardPresence::new(participant.clone(), config.presence),
            participant,
            tools: ToolCell::new(config.tools),
            policy: config.persist,
            persistence,
            transport,
            binding: None,
            capture: CaptureMachine::new(),
            renderer: Renderer::new(config.render),
            surface,
            outcome_tx,
            outcome_rx,
            in_flight: 0,
            epoch: 0,
            backfill_in_flight: false,
            backfill_queued: false,
        })
    }

    // ─── Accessors ────────────────────────────────────────────────────

    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    /// Shared tool settings. Clone it into the toolbar; handlers here read
    /// it at the moment of use.
    pub fn tools(&self) -> &ToolCell {
        &self.tools
    }

    pub fn room_id(&self) -> Option<&RoomId> {
        self.binding.as_ref().map(|b| &b.room_id)
    }

    pub fn strokes(&self) -> &[Stroke] {
        self.log.strokes()
    }

    pub fn stroke_log(&self) -> &StrokeLog {
        &self.log
    }

    pub fn presence(&self) -> &BoardPresence {
        &self.presence
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_capturing()
    }

    /// Persistence writes and reloads not yet reported back.
    pub fn commits_in_flight(&self) -> usize {
        self.in_flight
    }

    // ─── Room lifecycle ───────────────────────────────────────────────

    /// Join `room_id`, leaving the current room first. Subscribes before
    /// loading so no insert falls between the two; load failures are
    /// logged and leave an empty board.
    pub async fn join_room(&mut self, room_id: impl Into<RoomId>) -> Result<(), SessionError> {
        let room_id = room_id.into();
        self.teardown();

        let strokes = self.transport.subscribe_strokes(&room_id).await?;
        let presence = self.transport.join_presence(&room_id).await?;
        if let Err(e) = presence.track(self.presence.join_record()) {
            warn!("Failed to announce presence in room {room_id}: {e}");
        }
        self.binding = Some(RoomBinding {
            room_id: room_id.clone(),
            strokes,
            presence,
            runtime: Handle::current(),
        });

        match self.persistence.load_strokes(&room_id).await {
            Ok(strokes) => self.log.replace_all(strokes),
            Err(e) => warn!("Failed to load strokes for room {room_id}: {e}"),
        }
        info!(
            "{} joined room {room_id} ({} strokes)",
            self.participant.user_name,
            self.log.len()
        );

        self.process_remote();
        self.redraw();
        Ok(())
    }

    /// Leave the current room, if any, and redraw an empty board.
    pub fn leave(&mut self) {
        self.teardown();
        self.redraw();
    }

    fn teardown(&mut self) {
        if let Some(binding) = self.binding.take() {
            info!("{} leaving room {}", self.participant.user_name, binding.room_id);
        }
        self.capture.reset();
        self.log = StrokeLog::new(self.participant.user_id.clone());
        self.presence.reset();
        self.epoch += 1;
        self.backfill_in_flight = false;
        self.backfill_queued = false;
    }

    // ─── Pointer input ────────────────────────────────────────────────

    pub fn pointer_down(&mut self, event: PointerEvent) {
        if self.binding.is_none() {
            debug!("Pointer down outside a room ignored");
            return;
        }
        if let Some(CaptureEffect::Began(at)) = self.capture.pointer_down(event) {
            debug!("Gesture {} began at ({}, {})", event.pointer_id, at.x, at.y);
        }
    }

    /// Presence is updated on every move; a segment is drawn only while
    /// capturing.
    pub fn pointer_move(&mut self, event: PointerEvent) {
        self.track_pointer(event.position);
        if let Some(CaptureEffect::Segment { from, to }) = self.capture.pointer_move(event) {
            let settings = self.tools.snapshot();
            self.renderer.draw_segment(&mut self.surface, from, to, &settings);
        }
    }

    /// Ends the gesture. Returns the temporary id of the committed stroke.
    pub fn pointer_up(&mut self, event: PointerEvent) -> Option<String> {
        let effect = self.capture.pointer_up(event);
        self.finish_gesture(effect)
    }

    /// Pointer capture was lost; finalizes like a release.
    pub fn capture_lost(&mut self, pointer_id: u32) -> Option<String> {
        let effect = self.capture.capture_lost(pointer_id);
        self.finish_gesture(effect)
    }

    fn track_pointer(&mut self, position: Point) {
        let Some(binding) = &self.binding else {
            return;
        };
        if !position.is_finite() {
            return;
        }
        if let Some(record) = self.presence.pointer_moved(position) {
            if let Err(e) = binding.presence.track(record) {
                debug!("Presence update dropped: {e}");
            }
        }
    }

    fn finish_gesture(&mut self, effect: Option<CaptureEffect>) -> Option<String> {
        match effect? {
            CaptureEffect::Finished(points) => self.finalize(points),
            CaptureEffect::Discarded { points } => {
                debug!("Discarded gesture with {points} point(s)");
                None
            }
            _ => None,
        }
    }

    /// Tool settings are read now and apply to the whole stroke.
    fn finalize(&mut self, points: Vec<Point>) -> Option<String> {
        let binding = self.binding.as_ref()?;
        let room_id = binding.room_id.clone();
        let runtime = binding.runtime.clone();

        let settings = self.tools.snapshot();
        let stroke = NewStroke::from_gesture(&self.participant, points, &settings);
        let local_id = local_stroke_id();
        let optimistic = stroke
            .clone()
            .into_stroke(local_id.clone(), room_id.clone(), unix_millis());
        if !self.log.commit_local(optimistic) {
            return None;
        }

        let port = self.persistence.clone();
        let policy = self.policy.clone();
        let tx = self.outcome_tx.clone();
        let id = local_id.clone();
        self.in_flight += 1;
        runtime.spawn(async move {
            let result = persist_with_retry(port.as_ref(), &room_id, stroke, &policy).await;
            let outcome = TaskOutcome::Write {
                room_id,
                local_id: id,
                result,
            };
            if tx.send(outcome).is_err() {
                debug!("Session dropped before stroke write finished");
            }
        });

        self.redraw();
        Some(local_id)
    }

    // ─── Remote events ────────────────────────────────────────────────

    /// Apply everything that arrived since the last call, in arrival
    /// order, then redraw if the board changed. A lagged stroke feed
    /// starts a reload whose result is merged by a later call.
    pub fn process_remote(&mut self) -> PumpStats {
        let mut stats = PumpStats::default();
        let mut dirty = false;
        let mut resync = None;

        if let Some(binding) = self.binding.as_mut() {
            while let Some(event) = binding.strokes.try_next() {
                match event {
                    StrokeEvent::Insert(record) => {
                        if record
                            .room_id
                            .as_deref()
                            .is_some_and(|room| room != binding.room_id.as_str())
                        {
                            debug!("Ignoring insert addressed to another room");
                            continue;
                        }
                        match self.log.apply_remote_insert(record) {
                            RemoteInsert::Appended => {
                                stats.inserted += 1;
                                dirty = true;
                            }
                            RemoteInsert::Confirmed { local_id } => {
                                debug!("Stroke {local_id} confirmed by echo");
                                stats.confirmed += 1;
                            }
                            RemoteInsert::Duplicate => {}
                            RemoteInsert::Rejected(_) => stats.rejected += 1,
                        }
                    }
                    StrokeEvent::Delete { room_id } => {
                        if room_id != binding.room_id {
                            debug!("Ignoring clear of room {room_id}");
                            continue;
                        }
                        let removed = self.log.apply_remote_clear();
                        info!("Room {room_id} cleared, {removed} strokes dropped");
                        stats.clears += 1;
                        dirty = true;
                    }
                    StrokeEvent::Resync { room_id } => {
                        if room_id != binding.room_id {
                            continue;
                        }
                        warn!("Stroke feed for room {room_id} fell behind, reloading");
                        stats.resyncs += 1;
                        resync.get_or_insert(self.log.mark());
                    }
                }
            }

            if let Some(snapshot) = binding.presence.try_next() {
                stats.presence_syncs += 1;
                dirty |= self.presence.apply_sync(&snapshot);
            }
        }

        if let Some(mark) = resync {
            self.request_backfill(mark);
        }

        while let Ok(outcome) = self.outcome_rx.try_recv() {
            dirty |= self.apply_outcome(outcome, &mut stats);
        }

        if dirty {
            self.redraw();
            stats.redrawn = true;
        }
        stats
    }

    /// Wait until every spawned write and reload has reported back.
    pub async fn wait_for_commits(&mut self) -> PumpStats {
        let mut stats = PumpStats::default();
        let mut dirty = false;
        while self.in_flight > 0 {
            match self.outcome_rx.recv().await {
                Some(outcome) => dirty |= self.apply_outcome(outcome, &mut stats),
                None => break,
            }
        }
        if dirty {
            self.redraw();
            stats.redrawn = true;
        }
        stats
    }

    /// Reload the room in the background. One reload runs at a time; a
    /// lag seen meanwhile queues another.
    fn request_backfill(&mut self, mark: ResyncMark) {
        let Some(binding) = self.binding.as_ref() else {
            return;
        };
        if self.backfill_in_flight {
            self.backfill_queued = true;
            return;
        }
        let port = self.persistence.clone();
        let tx = self.outcome_tx.clone();
        let room_id = binding.room_id.clone();
        let epoch = self.epoch;
        self.backfill_in_flight = true;
        self.in_flight += 1;
        binding.runtime.spawn(async move {
            let result = port.load_strokes(&room_id).await;
            let outcome = TaskOutcome::Backfill {
                epoch,
                room_id,
                mark,
                result,
            };
            if tx.send(outcome).is_err() {
                debug!("Session dropped before room reload finished");
            }
        });
    }

    /// Returns whether the visible stroke list changed.
    fn apply_outcome(&mut self, outcome: TaskOutcome, stats: &mut PumpStats) -> bool {
        self.in_flight = self.in_flight.saturating_sub(1);
        match outcome {
            TaskOutcome::Write {
                room_id,
                local_id,
                result,
            } => {
                self.apply_write(room_id, local_id, result, stats);
                false
            }
            TaskOutcome::Backfill {
                epoch,
                room_id,
                mark,
                result,
            } => {
                if epoch != self.epoch {
                    debug!("Reload of room {room_id} arrived after leaving it");
                    return false;
                }
                self.backfill_in_flight = false;
                let changed = match result {
                    Ok(strokes) => match self.log.backfill(mark, strokes) {
                        Some(restored) => {
                            info!("Room {room_id} reloaded, {restored} missed strokes restored");
                            stats.restored += restored;
                            true
                        }
                        None => {
                            debug!("Reload of room {room_id} overtaken by a clear");
                            false
                        }
                    },
                    Err(e) => {
                        warn!("Failed to reload room {room_id}: {e}");
                        false
                    }
                };
                if std::mem::take(&mut self.backfill_queued) {
                    self.request_backfill(self.log.mark());
                }
                changed
            }
        }
    }

    fn apply_write(
        &mut self,
        room_id: RoomId,
        local_id: String,
        result: Result<Stroke, StoreError>,
        stats: &mut PumpStats,
    ) {
        if self.room_id() != Some(&room_id) {
            debug!("Write result for {local_id} arrived after leaving room {room_id}");
            return;
        }
        match result {
            Ok(persisted) => {
                if self.log.confirm_local(&local_id, persisted) {
                    stats.confirmed += 1;
                }
            }
            Err(e) => {
                log::error!("Stroke {local_id} was not persisted in room {room_id}: {e}");
                if self.log.mark_failed(&local_id) {
                    stats.failed += 1;
                }
            }
        }
    }

    /// Delete every stroke in the room. The view empties when the clear
    /// notification comes back through the stroke feed.
    pub async fn clear_board(&self) -> Result<u64, SessionError> {
        let room_id = self.room_id().ok_or(SessionError::NotInRoom)?;
        Ok(self.persistence.clear_room(room_id).await?)
    }

    // ─── Rendering ────────────────────────────────────────────────────

    /// Resize the surface; the stroke list is kept and redrawn.
    pub fn resize(&mut self, width: f32, height: f32, dpr: f32) -> Result<(), SessionError> {
        self.surface.resize(width, height, dpr)?;
        self.redraw();
        Ok(())
    }

    pub fn redraw(&mut self) -> FrameStats {
        let settings = self.tools.snapshot();
        let live = self.capture.in_progress();
        let scene = Scene {
            strokes: self.log.strokes(),
            in_progress: (!live.is_empty()).then_some(InProgress {
                points: live,
                settings: &settings,
            }),
            cursors: self.presence.cursor_sprites(),
        };
        self.renderer.full_redraw(&mut self.surface, &scene)
    }
}

/// Insert with exponential backoff. Validation rejections are final.
async fn persist_with_retry(
    port: &dyn PersistencePort,
    room_id: &RoomId,
    stroke: NewStroke,
    policy: &PersistPolicy,
) -> Result<Stroke, StoreError> {
    let mut attempt = 1;
    loop {
        match port.insert_stroke(room_id, stroke.clone()).await {
            Ok(persisted) => return Ok(persisted),
            Err(StoreError::Rejected(e)) => return Err(StoreError::Rejected(e)),
            Err(e) if attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    "Stroke write to room {room_id} failed (attempt {attempt}/{}): {e}, retrying in {delay:?}",
                    policy.max_attempts
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

// ===================================================================
// Tests
// ===================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use sketchroom_collab::{LocalHub, MemoryStore, StrokeStatus};
    use sketchroom_core::{StrokeRecord, Tool, ToolSettings};

    fn participant(id: &str) -> Participant {
        Participant::new(id, id.to_uppercase(), "#336699")
    }

    fn session(id: &str, hub: &LocalHub) -> BoardSession {
        BoardSession::new(participant(id), BoardConfig::for_testing(), Arc::new(hub.clone())).unwrap()
    }

    fn draw(session: &mut BoardSession, points: &[(f32, f32)]) -> Option<String> {
        let (x0, y0) = points[0];
        session.pointer_down(PointerEvent::primary(1, x0, y0));
        for &(x, y) in &points[1..] {
            session.pointer_move(PointerEvent::primary(1, x, y));
        }
        let (xn, yn) = points[points.len() - 1];
        session.pointer_up(PointerEvent::primary(1, xn, yn))
    }

    fn rgba(session: &BoardSession, x: f32, y: f32) -> (u8, u8, u8, u8) {
        let px = session.surface().pixel_at(x, y).unwrap();
        (px.red(), px.green(), px.blue(), px.alpha())
    }

    /// Persistence that fails a fixed number of times before delegating.
    struct FlakyStore {
        hub: LocalHub,
        failures_left: AtomicU32,
        attempts: AtomicU32,
        fail_loads: bool,
    }

    impl FlakyStore {
        fn new(hub: &LocalHub, failures: u32) -> Self {
            Self {
                hub: hub.clone(),
                failures_left: AtomicU32::new(failures),
                attempts: AtomicU32::new(0),
                fail_loads: false,
            }
        }
    }

    #[async_trait]
    impl PersistencePort for FlakyStore {
        async fn insert_stroke(&self, room_id: &RoomId, stroke: NewStroke) -> Result<Stroke, StoreError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("store offline".into()));
            }
            self.hub.insert(room_id, stroke)
        }

        async fn load_strokes(&self, room_id: &RoomId) -> Result<Vec<Stroke>, StoreError> {
            if self.fail_loads {
                return Err(StoreError::Unavailable("store offline".into()));
            }
            self.hub.load(room_id)
        }

        async fn clear_room(&self, room_id: &RoomId) -> Result<u64, StoreError> {
            self.hub.clear(room_id)
        }
    }

    #[tokio::test]
    async fn test_red_polyline_commit() {
        let hub = LocalHub::in_memory();
        let mut a = session("a", &hub);
        a.join_room("R1").await.unwrap();
        a.tools().set(ToolSettings {
            tool: Tool::Pen,
            color: "#ff0000".into(),
            size: 4.0,
        });

        let local_id = draw(&mut a, &[(0.0, 0.0), (10.0, 10.0), (20.0, 5.0)]).unwrap();
        assert_eq!(a.strokes().len(), 1);
        let stroke = &a.strokes()[0];
        assert_eq!(stroke.id, local_id);
        assert_eq!(
            stroke.points,
            vec![Point::new(0.0, 0.0), Point::new(10.0, 10.0), Point::new(20.0, 5.0)]
        );
        assert_eq!(stroke.color, "#ff0000");
        assert_eq!(stroke.size, 4.0);
        assert_eq!(stroke.tool, Tool::Pen);
        assert_eq!(a.stroke_log().status_of(&local_id), Some(StrokeStatus::Pending));

        let (r, g, _, alpha) = rgba(&a, 10.0, 10.0);
        assert!(r > 200 && g < 60 && alpha == 255);

        a.wait_for_commits().await;
        a.process_remote();
        assert_eq!(a.strokes().len(), 1);
        assert!(!a.strokes()[0].has_local_id());
        assert_eq!(a.stroke_log().pending_count(), 0);
        assert_eq!(hub.load(&RoomId::new("R1")).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_short_gestures_never_commit() {
        let hub = LocalHub::in_memory();
        let mut a = session("a", &hub);
        a.join_room("R1").await.unwrap();

        a.pointer_down(PointerEvent::primary(1, 5.0, 5.0));
        assert!(a.pointer_up(PointerEvent::primary(1, 5.0, 5.0)).is_none());
        assert!(a.strokes().is_empty());
        assert_eq!(a.commits_in_flight(), 0);
        assert!(hub.load(&RoomId::new("R1")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remote_stroke_reaches_other_participant() {
        let hub = LocalHub::in_memory();
        let mut a = session("a", &hub);
        let mut b = session("b", &hub);
        a.join_room("R1").await.unwrap();
        b.join_room("R1").await.unwrap();

        draw(&mut a, &[(10.0, 10.0), (50.0, 50.0)]).unwrap();
        a.wait_for_commits().await;

        let stats = b.process_remote();
        assert_eq!(stats.inserted, 1);
        assert!(stats.redrawn);
        assert_eq!(b.strokes().len(), 1);
        assert_eq!(b.strokes()[0].user_id, "a");
    }

    #[tokio::test]
    async fn test_late_joiner_loads_history() {
        let hub = LocalHub::in_memory();
        let mut a = session("a", &hub);
        a.join_room("R1").await.unwrap();
        draw(&mut a, &[(10.0, 10.0), (50.0, 50.0)]).unwrap();
        draw(&mut a, &[(60.0, 10.0), (90.0, 50.0)]).unwrap();
        a.wait_for_commits().await;

        let mut b = session("b", &hub);
        b.join_room("R1").await.unwrap();
        assert_eq!(b.strokes().len(), 2);
        assert_eq!(b.strokes()[0].points[0], Point::new(10.0, 10.0));
    }

    #[tokio::test]
    async fn test_malformed_remote_insert_dropped() {
        let hub = LocalHub::in_memory();
        let mut a = session("a", &hub);
        a.join_room("R1").await.unwrap();

        let room = RoomId::new("R1");
        let one_point = StrokeRecord {
            id: Some("x1".into()),
            room_id: Some("R1".into()),
            user_id: Some("b".into()),
            points: Some(vec![Point::new(1.0, 1.0)]),
            color: Some("#000".into()),
            size: Some(3.0),
            ..Default::default()
        };
        hub.publish(&room, StrokeEvent::Insert(one_point));
        hub.publish(&room, StrokeEvent::Insert(StrokeRecord::default()));

        let stats = a.process_remote();
        assert_eq!(stats.rejected, 2);
        assert!(a.strokes().is_empty());
    }

    #[tokio::test]
    async fn test_clear_is_scoped_to_room() {
        let hub = LocalHub::in_memory();
        let mut a = session("a", &hub);
        a.join_room("R1").await.unwrap();
        draw(&mut a, &[(10.0, 10.0), (50.0, 50.0)]).unwrap();
        a.wait_for_commits().await;
        a.process_remote();

        hub.publish(
            &RoomId::new("R1"),
            StrokeEvent::Delete {
                room_id: RoomId::new("R2"),
            },
        );
        assert_eq!(a.process_remote().clears, 0);
        assert_eq!(a.strokes().len(), 1);

        assert_eq!(a.clear_board().await.unwrap(), 1);
        let stats = a.process_remote();
        assert_eq!(stats.clears, 1);
        assert!(a.strokes().is_empty());
        assert_eq!(rgba(&a, 30.0, 30.0), (255, 255, 255, 255));
    }

    #[tokio::test]
    async fn test_tool_change_mid_stroke_applies_to_whole_stroke() {
        let hub = LocalHub::in_memory();
        let mut a = session("a", &hub);
        a.join_room("R1").await.unwrap();
        a.tools().set(ToolSettings {
            tool: Tool::Pen,
            color: "#ff0000".into(),
            size: 6.0,
        });

        a.pointer_down(PointerEvent::primary(1, 10.0, 20.0));
        a.pointer_move(PointerEvent::primary(1, 90.0, 20.0));
        // Live segment uses the color current at the move.
        assert_eq!(rgba(&a, 50.0, 20.0), (255, 0, 0, 255));

        // The toolbar holds its own handle to the same cell.
        let toolbar = a.tools().clone();
        toolbar.set_color("#0000ff");
        a.pointer_move(PointerEvent::primary(1, 90.0, 80.0));
        a.pointer_up(PointerEvent::primary(1, 90.0, 80.0)).unwrap();

        assert_eq!(a.strokes()[0].color, "#0000ff");
        assert_eq!(rgba(&a, 50.0, 20.0), (0, 0, 255, 255));
    }

    #[tokio::test]
    async fn test_switching_rooms_tears_down_subscriptions() {
        let hub = LocalHub::in_memory();
        let r1 = RoomId::new("R1");
        let r2 = RoomId::new("R2");
        let mut a = session("a", &hub);

        a.join_room(r1.clone()).await.unwrap();
        assert_eq!(hub.subscriber_count(&r1), 1);
        assert_eq!(hub.presence_snapshot(&r1).len(), 1);
        draw(&mut a, &[(10.0, 10.0), (50.0, 50.0)]).unwrap();
        a.wait_for_commits().await;

        a.join_room(r2.clone()).await.unwrap();
        assert_eq!(hub.subscriber_count(&r1), 0);
        assert!(hub.presence_snapshot(&r1).is_empty());
        assert_eq!(hub.subscriber_count(&r2), 1);
        assert_eq!(a.room_id(), Some(&r2));
        assert!(a.strokes().is_empty());

        // Activity in the old room no longer reaches us.
        hub.clear(&r1).unwrap();
        assert_eq!(a.process_remote().clears, 0);
    }

    #[tokio::test]
    async fn test_presence_excludes_local_participant() {
        let hub = LocalHub::in_memory();
        let mut u1 = session("u1", &hub);
        let mut u2 = session("u2", &hub);
        let mut u3 = session("u3", &hub);
        u1.join_room("R1").await.unwrap();
        u2.join_room("R1").await.unwrap();
        u3.join_room("R1").await.unwrap();

        u2.pointer_move(PointerEvent::primary(7, 40.0, 40.0));
        u1.pointer_move(PointerEvent::primary(1, 5.0, 5.0));

        let stats = u1.process_remote();
        assert_eq!(stats.presence_syncs, 1);
        let cursors = u1.presence().room().cursors();
        assert_eq!(cursors.len(), 2);
        assert!(!cursors.contains_key("u1"));
        assert_eq!(cursors["u2"].position(), Point::new(40.0, 40.0));
        // Cursor dot drawn in the participant color.
        assert_eq!(rgba(&u1, 40.0, 40.0), (0x33, 0x66, 0x99, 255));
    }

    #[tokio::test]
    async fn test_leaving_removes_cursor_elsewhere() {
        let hub = LocalHub::in_memory();
        let mut a = session("a", &hub);
        let mut b = session("b", &hub);
        a.join_room("R1").await.unwrap();
        b.join_room("R1").await.unwrap();
        a.process_remote();
        assert_eq!(a.presence().cursor_count(), 1);

        b.leave();
        a.process_remote();
        assert_eq!(a.presence().cursor_count(), 0);
        assert!(b.room_id().is_none());
    }

    #[tokio::test]
    async fn test_failed_write_keeps_stroke_visible() {
        let hub = LocalHub::in_memory();
        let store = Arc::new(FlakyStore::new(&hub, u32::MAX));
        let mut a = BoardSession::with_ports(
            participant("a"),
            BoardConfig::for_testing(),
            store.clone(),
            Arc::new(hub.clone()),
        )
        .unwrap();
        a.join_room("R1").await.unwrap();

        let local_id = draw(&mut a, &[(10.0, 50.0), (90.0, 50.0)]).unwrap();
        let stats = a.wait_for_commits().await;
        assert_eq!(stats.failed, 1);
        assert_eq!(store.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(a.stroke_log().status_of(&local_id), Some(StrokeStatus::Failed));
        assert_eq!(a.strokes().len(), 1);
        assert_eq!(rgba(&a, 50.0, 50.0), (0, 0, 0, 255));
    }

    #[tokio::test]
    async fn test_retry_policy_recovers_write() {
        let hub = LocalHub::in_memory();
        let store = Arc::new(FlakyStore::new(&hub, 2));
        let mut config = BoardConfig::for_testing();
        config.persist.max_attempts = 3;
        let mut a =
            BoardSession::with_ports(participant("a"), config, store.clone(), Arc::new(hub.clone()))
                .unwrap();
        a.join_room("R1").await.unwrap();

        draw(&mut a, &[(10.0, 50.0), (90.0, 50.0)]).unwrap();
        let stats = a.wait_for_commits().await;
        assert_eq!(stats.failed, 0);
        assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
        a.process_remote();
        assert_eq!(a.stroke_log().pending_count(), 0);
        assert_eq!(a.strokes().len(), 1);
    }

    #[tokio::test]
    async fn test_load_failure_renders_empty_board() {
        let hub = LocalHub::in_memory();
        hub.insert(
            &RoomId::new("R1"),
            NewStroke {
                user_id: "b".into(),
                user_name: "B".into(),
                user_color: "#000".into(),
                points: vec![Point::new(0.0, 0.0), Point::new(5.0, 5.0)],
                color: "#000".into(),
                size: 2.0,
                tool: Tool::Pen,
            },
        )
        .unwrap();
        let mut store = FlakyStore::new(&hub, 0);
        store.fail_loads = true;
        let mut a = BoardSession::with_ports(
            participant("a"),
            BoardConfig::for_testing(),
            Arc::new(store),
            Arc::new(hub.clone()),
        )
        .unwrap();

        a.join_room("R1").await.unwrap();
        assert!(a.strokes().is_empty());
        assert_eq!(a.room_id(), Some(&RoomId::new("R1")));
    }

    #[tokio::test]
    async fn test_resize_keeps_strokes() {
        let hub = LocalHub::in_memory();
        let mut a = session("a", &hub);
        a.join_room("R1").await.unwrap();
        draw(&mut a, &[(10.0, 50.0), (90.0, 50.0)]).unwrap();

        a.resize(100.0, 100.0, 2.0).unwrap();
        assert_eq!(a.surface().device_size(), (200, 200));
        assert_eq!(a.strokes().len(), 1);
        assert_eq!(rgba(&a, 50.0, 50.0), (0, 0, 0, 255));
        assert!(matches!(a.resize(0.0, 10.0, 1.0), Err(SessionError::Render(_))));
    }

    #[tokio::test]
    async fn test_capture_lost_finalizes() {
        let hub = LocalHub::in_memory();
        let mut a = session("a", &hub);
        a.join_room("R1").await.unwrap();
        a.pointer_down(PointerEvent::primary(3, 10.0, 10.0));
        a.pointer_move(PointerEvent::primary(3, 20.0, 20.0));
        assert!(a.is_capturing());
        assert!(a.capture_lost(3).is_some());
        assert!(!a.is_capturing());
        assert_eq!(a.strokes().len(), 1);
    }

    #[tokio::test]
    async fn test_drawing_outside_room_is_ignored() {
        let hub = LocalHub::in_memory();
        let mut a = session("a", &hub);
        assert!(draw(&mut a, &[(10.0, 10.0), (20.0, 20.0)]).is_none());
        assert!(a.strokes().is_empty());
        assert!(matches!(a.clear_board().await, Err(SessionError::NotInRoom)));
    }

    #[tokio::test]
    async fn test_write_result_after_room_change_is_ignored() {
        let hub = LocalHub::in_memory();
        let mut a = session("a", &hub);
        a.join_room("R1").await.unwrap();
        draw(&mut a, &[(10.0, 10.0), (20.0, 20.0)]).unwrap();
        a.join_room("R2").await.unwrap();

        let stats = a.wait_for_commits().await;
        assert_eq!(stats.confirmed, 0);
        assert!(a.strokes().is_empty());
        assert_eq!(a.commits_in_flight(), 0);
        // The write itself still completed.
        assert_eq!(hub.load(&RoomId::new("R1")).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_eraser_stroke_cuts_through() {
        let hub = LocalHub::in_memory();
        let mut a = session("a", &hub);
        a.join_room("R1").await.unwrap();
        a.tools().set_size(10.0);
        draw(&mut a, &[(10.0, 50.0), (90.0, 50.0)]).unwrap();
        a.tools().set_tool(Tool::Eraser);
        draw(&mut a, &[(10.0, 50.0), (90.0, 50.0)]).unwrap();
        assert_eq!(rgba(&a, 50.0, 50.0).3, 0);

        a.wait_for_commits().await;
        let erasers = hub
            .load(&RoomId::new("R1"))
            .unwrap()
            .into_iter()
            .filter(|s| s.tool.is_eraser())
            .count();
        assert_eq!(erasers, 1);
    }

    #[test]
    fn test_surface_size_follows_config() {
        let hub = LocalHub::in_memory();
        let mut config = BoardConfig::for_testing();
        config.width = 64.0;
        config.height = 32.0;
        config.device_pixel_ratio = 2.0;
        let a = BoardSession::new(participant("a"), config, Arc::new(hub)).unwrap();
        assert_eq!(a.surface().device_size(), (128, 64));
        assert!(a.room_id().is_none());
    }

    #[tokio::test]
    async fn test_backoff_waits_between_attempts() {
        let hub = LocalHub::in_memory();
        let store = FlakyStore::new(&hub, 1);
        let policy = PersistPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(20),
        };
        let stroke = NewStroke {
            user_id: "a".into(),
            user_name: "A".into(),
            user_color: "#000".into(),
            points: vec![Point::new(0.0, 0.0), Point::new(5.0, 5.0)],
            color: "#000".into(),
            size: 2.0,
            tool: Tool::Pen,
        };
        let started = std::time::Instant::now();
        let stored = persist_with_retry(&store, &RoomId::new("R1"), stroke, &policy).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(stored.room_id, RoomId::new("R1"));
    }

    #[tokio::test]
    async fn test_rejected_write_is_not_retried() {
        let hub = LocalHub::in_memory();
        let store = FlakyStore::new(&hub, 0);
        let stroke = NewStroke {
            user_id: "a".into(),
            user_name: "A".into(),
            user_color: "#000".into(),
            points: vec![Point::new(0.0, 0.0)],
            color: "#000".into(),
            size: 2.0,
            tool: Tool::Pen,
        };
        let result = persist_with_retry(&store, &RoomId::new("R1"), stroke, &PersistPolicy::retrying(5)).await;
        assert!(matches!(result, Err(StoreError::Rejected(_))));
        assert_eq!(store.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lagged_feed_reloads_missed_strokes() {
        let hub = LocalHub::with_capacity(Arc::new(MemoryStore::new()), 2);
        let mut a = session("a", &hub);
        let mut b = session("b", &hub);
        a.join_room("R1").await.unwrap();
        b.join_room("R1").await.unwrap();

        for i in 0..3 {
            let x = i as f32 * 30.0;
            draw(&mut b, &[(x, 10.0), (x + 20.0, 40.0)]).unwrap();
        }
        b.wait_for_commits().await;

        let stats = a.process_remote();
        assert_eq!(stats.resyncs, 1);
        assert_eq!(stats.inserted, 2);
        assert_eq!(a.strokes().len(), 2);

        let stats = a.wait_for_commits().await;
        assert_eq!(stats.restored, 1);
        assert!(stats.redrawn);
        assert_eq!(a.commits_in_flight(), 0);
        let ids: Vec<_> = a.strokes().iter().map(|s| s.id.clone()).collect();
        let stored: Vec<_> = hub
            .load(&RoomId::new("R1"))
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, stored);
    }

    #[tokio::test]
    async fn test_reload_after_leaving_is_ignored() {
        let hub = LocalHub::with_capacity(Arc::new(MemoryStore::new()), 1);
        let mut a = session("a", &hub);
        let mut b = session("b", &hub);
        a.join_room("R1").await.unwrap();
        b.join_room("R1").await.unwrap();
        draw(&mut b, &[(0.0, 0.0), (20.0, 20.0)]).unwrap();
        draw(&mut b, &[(30.0, 0.0), (50.0, 20.0)]).unwrap();
        b.wait_for_commits().await;

        assert_eq!(a.process_remote().resyncs, 1);
        a.join_room("R2").await.unwrap();
        let stats = a.wait_for_commits().await;
        assert_eq!(stats.restored, 0);
        assert!(a.strokes().is_empty());
        assert_eq!(a.commits_in_flight(), 0);
    }

    #[tokio::test]
    async fn test_visited_rooms_released_after_leave() {
        let hub = LocalHub::in_memory();
        let mut a = session("a", &hub);
        for i in 0..50 {
            a.join_room(format!("room-{i}")).await.unwrap();
            assert_eq!(hub.room_count(), 1);
        }
        a.leave();
        assert_eq!(hub.room_count(), 0);
    }

    #[tokio::test]
    async fn test_non_finite_move_is_not_recorded() {
        let hub = LocalHub::in_memory();
        let mut a = session("a", &hub);
        a.join_room("R1").await.unwrap();

        a.pointer_down(PointerEvent::primary(1, 0.0, 0.0));
        a.pointer_move(PointerEvent::primary(1, f32::NAN, 5.0));
        a.pointer_move(PointerEvent::primary(1, 10.0, 10.0));
        a.pointer_up(PointerEvent::primary(1, 10.0, 10.0)).unwrap();

        assert_eq!(
            a.strokes()[0].points,
            vec![Point::new(0.0, 0.0), Point::new(10.0, 10.0)]
        );
        a.wait_for_commits().await;
        assert_eq!(a.stroke_log().pending_count(), 0);
        assert_eq!(hub.load(&RoomId::new("R1")).unwrap().len(), 1);
    }
}
