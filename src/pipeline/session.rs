//! Session lifecycle
//!
//! A session pairs one capture source with one encoder sink. Both are created
//! together by a [`SessionFactory`] and released together, exactly once, when
//! the sink confirms its output is flushed.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc;

use super::controller::{FrameController, FrameOutcome};
use super::state::SessionState;
use super::types::{MediaTime, SessionId};
use crate::capture::{CaptureFrame, CaptureSource};
use crate::encoder::{EncoderSink, FlushNotifier, FlushSignal};
use crate::error::SessionError;
use crate::workers::library::{PersistOutcome, Persistence};

/// Builds the source and sink of a new session.
///
/// Each call must bind the sink to a fresh output location.
pub trait SessionFactory: Send {
    fn create(
        &mut self,
        id: SessionId,
    ) -> anyhow::Result<(Box<dyn CaptureSource>, Box<dyn EncoderSink>)>;
}

/// Outward result of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub session: SessionId,
    pub success: bool,
    pub message: String,
    /// Where the recording ended up, when it was persisted
    pub location: Option<PathBuf>,
    pub frames_counted: u64,
    pub frames_appended: u64,
    pub error: Option<SessionError>,
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.success { "ok" } else { "failed" };
        write!(
            f,
            "session {} {}: {} ({} frames counted, {} appended)",
            self.session, verdict, self.message, self.frames_counted, self.frames_appended
        )
    }
}

struct Session {
    id: SessionId,
    source: Box<dyn CaptureSource>,
    sink: Box<dyn EncoderSink>,
}

impl Session {
    fn release(&mut self) {
        self.source.release();
        self.sink.release();
    }
}

/// Owns the session state machine and its resources.
///
/// Every method must be called from one serialized context; the
/// [`Recorder`](crate::workers::recorder::Recorder) task is that context.
pub struct SessionManager {
    state: SessionState,
    session: Option<Session>,
    controller: FrameController,
    factory: Box<dyn SessionFactory>,
    persistence: Arc<dyn Persistence>,
    flush_tx: mpsc::UnboundedSender<FlushSignal>,
    reports: mpsc::UnboundedSender<SessionReport>,
    frame_queue_depth: usize,
    next_id: u64,
}

impl SessionManager {
    pub fn new(
        controller: FrameController,
        factory: Box<dyn SessionFactory>,
        persistence: Arc<dyn Persistence>,
        flush_tx: mpsc::UnboundedSender<FlushSignal>,
        reports: mpsc::UnboundedSender<SessionReport>,
        frame_queue_depth: usize,
    ) -> Self {
        Self {
            state: SessionState::Idle,
            session: None,
            controller,
            factory,
            persistence,
            flush_tx,
            reports,
            frame_queue_depth: frame_queue_depth.max(1),
            next_id: 1,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn controller(&self) -> &FrameController {
        &self.controller
    }

    pub fn active_session(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id)
    }

    fn transition(&mut self, target: SessionState) {
        if self.state.can_transition_to(&target) {
            log::debug!("Session state: {} -> {}", self.state, target);
        } else {
            log::warn!("Unexpected session transition {} -> {}", self.state, target);
        }
        self.state = target;
    }

    /// Build and start a fresh session.
    ///
    /// Returns the receiving end of the session's frame stream. On failure both
    /// halves are released and the manager stays in its previous state.
    pub async fn start(
        &mut self,
    ) -> Result<(SessionId, mpsc::Receiver<CaptureFrame>), SessionError> {
        if !self.state.accepts_start() {
            return Err(SessionError::InvalidState { state: self.state });
        }

        let id = SessionId(self.next_id);
        self.next_id += 1;

        let (source, sink) = self
            .factory
            .create(id)
            .map_err(|e| SessionError::Setup(format!("{e:#}")))?;
        let mut session = Session { id, source, sink };

        if let Err(e) = blocking_setup(|| session.sink.start_writing()) {
            session.release();
            return Err(SessionError::Setup(format!("{e:#}")));
        }
        session.sink.start_session(MediaTime::ZERO);

        let (frame_tx, frame_rx) = mpsc::channel(self.frame_queue_depth);
        if let Err(e) = session.source.start(frame_tx).await {
            session.release();
            let output = session.sink.output_path().to_path_buf();
            remove_partial_output(&output).await;
            return Err(SessionError::Setup(format!("{e:#}")));
        }

        let (w, h) = session.source.resolution();
        log::info!(
            "Session {} started ({}x{} @ {} fps), recording to {}",
            id,
            w,
            h,
            session.source.nominal_fps(),
            session.sink.output_path().display()
        );
        self.controller.begin();
        self.session = Some(session);
        self.transition(SessionState::Active);
        Ok((id, frame_rx))
    }

    /// Run one frame through the pipeline; starts finalization when the
    /// budget is crossed.
    pub async fn handle_frame(&mut self, frame: CaptureFrame) -> FrameOutcome {
        let Some(session) = self.session.as_mut() else {
            log::trace!("Frame at {} without a session, dropped", frame.pts);
            return FrameOutcome::dropped();
        };
        if !self.state.is_active() {
            log::trace!("Frame at {} while {}, dropped", frame.pts, self.state);
            return FrameOutcome::dropped();
        }

        let outcome = self.controller.on_frame(&frame, session.sink.as_mut());
        if let Some(end_at) = outcome.finalize_at {
            self.finalize(end_at).await;
        }
        outcome
    }

    async fn finalize(&mut self, end_at: MediaTime) {
        self.transition(SessionState::Finalizing);
        let Some(session) = self.session.as_mut() else {
            return;
        };
        log::info!(
            "Session {} reached {} frames, finalizing at {:.3}s",
            session.id,
            self.controller.frame_count(),
            end_at.seconds()
        );

        if let Err(e) = session.source.stop().await {
            log::warn!("Failed to stop capture for session {}: {:#}", session.id, e);
        }
        session.sink.end_session(end_at);
        session
            .sink
            .finish_writing(FlushNotifier::new(session.id, self.flush_tx.clone()));
    }

    /// Complete the `finalizing -> closed` transition.
    ///
    /// Signals for a session that is not the one finalizing, including a
    /// repeated signal for a session already closed, are ignored.
    pub fn handle_flush(&mut self, signal: FlushSignal) {
        let current = self.session.as_ref().map(|s| s.id);
        if current != Some(signal.session) || !self.state.is_finalizing() {
            log::debug!(
                "Ignoring flush signal for session {} while {}",
                signal.session,
                self.state
            );
            return;
        }
        let Some(mut session) = self.session.take() else {
            return;
        };

        session.release();
        let health = self.controller.health();
        let frames_counted = self.controller.frame_count();
        let frames_appended = health.frames_appended();
        self.controller.reset();
        self.transition(SessionState::Closed);
        log::info!("Session {} closed: {}", session.id, health.summary());

        let id = session.id;
        match signal.result {
            Ok(path) => {
                let persistence = self.persistence.clone();
                let reports = self.reports.clone();
                tokio::spawn(async move {
                    let outcome = persistence.persist(&path).await;
                    let report =
                        persisted_report(id, outcome, frames_counted, frames_appended);
                    if reports.send(report).is_err() {
                        log::debug!("Report for session {} dropped: no observer", id);
                    }
                });
            }
            Err(message) => {
                log::error!("Session {} failed to finalize: {}", id, message);
                let report = SessionReport {
                    session: id,
                    success: false,
                    message: format!("recording could not be finalized: {message}"),
                    location: None,
                    frames_counted,
                    frames_appended,
                    error: Some(SessionError::Finalize(message)),
                };
                if self.reports.send(report).is_err() {
                    log::debug!("Report for session {} dropped: no observer", id);
                }
            }
        }
    }
}

/// Run a setup step that may block on the sink's worker thread.
///
/// On a multi-threaded runtime the worker is handed off first so other tasks
/// keep running; a current-thread runtime cannot do that and runs it inline.
fn blocking_setup<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

/// Delete the file a started sink created for a session that never ran
async fn remove_partial_output(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => log::debug!("Removed unused output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove {}: {}", path.display(), e),
    }
}

fn persisted_report(
    session: SessionId,
    outcome: PersistOutcome,
    frames_counted: u64,
    frames_appended: u64,
) -> SessionReport {
    if outcome.success {
        SessionReport {
            session,
            success: true,
            message: "recording saved".to_string(),
            location: outcome.location,
            frames_counted,
            frames_appended,
            error: None,
        }
    } else {
        let error = outcome.error.unwrap_or_else(|| "unknown error".to_string());
        SessionReport {
            session,
            success: false,
            message: format!("recording could not be saved: {error}"),
            location: None,
            frames_counted,
            frames_appended,
            error: Some(SessionError::Persist(error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::PixelBufferConverter;
    use crate::overlay::OverlayCompositor;
    use crate::pipeline::Disposition;
    use crate::testing::{FRAME_H, FRAME_W, FlushScript, MockPersistence, ScriptedFactory, test_frame};

    struct Harness {
        manager: SessionManager,
        factory: ScriptedFactory,
        persistence: Arc<MockPersistence>,
        flush_rx: mpsc::UnboundedReceiver<FlushSignal>,
        report_rx: mpsc::UnboundedReceiver<SessionReport>,
    }

    fn harness(persistence: MockPersistence) -> Harness {
        let factory = ScriptedFactory::default();
        let persistence = Arc::new(persistence);
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let controller = FrameController::new(
            PixelBufferConverter::new(FRAME_W, FRAME_H).unwrap(),
            OverlayCompositor::default(),
            200,
            30,
        );
        let manager = SessionManager::new(
            controller,
            Box::new(factory.clone()),
            persistence.clone(),
            flush_tx,
            report_tx,
            8,
        );
        Harness {
            manager,
            factory,
            persistence,
            flush_rx,
            report_rx,
        }
    }

    impl Harness {
        async fn feed(&mut self, frames: std::ops::Range<i64>) -> Vec<FrameOutcome> {
            let mut outcomes = Vec::new();
            for n in frames {
                outcomes.push(self.manager.handle_frame(test_frame(n)).await);
            }
            outcomes
        }

        async fn flush(&mut self) {
            let signal = self.flush_rx.recv().await.unwrap();
            self.manager.handle_flush(signal);
        }
    }

    #[tokio::test]
    async fn test_budget_finalizes_once_and_closes() {
        let mut h = harness(MockPersistence::default());
        let (id, _frames) = h.manager.start().await.unwrap();
        assert_eq!(h.manager.state(), SessionState::Active);
        assert_eq!(h.factory.sink.lock().unwrap().session_start, Some(MediaTime::ZERO));

        let outcomes = h.feed(0..201).await;
        let finals: Vec<_> = outcomes.iter().filter_map(|o| o.finalize_at).collect();
        assert_eq!(finals, vec![MediaTime::new(200, 30)]);
        assert_eq!(h.manager.state(), SessionState::Finalizing);
        {
            let sink = h.factory.sink.lock().unwrap();
            assert_eq!(sink.finish_calls, 1);
            assert_eq!(sink.session_end, Some(MediaTime::new(200, 30)));
            assert_eq!(sink.appended.len(), 201);
        }
        assert_eq!(h.factory.source.lock().unwrap().stops, 1);

        // a late frame after the stop request is not delivered to the sink
        let late = h.manager.handle_frame(test_frame(201)).await;
        assert_eq!(late.disposition, Disposition::Dropped);

        h.flush().await;
        assert_eq!(h.manager.state(), SessionState::Closed);
        assert_eq!(h.manager.controller().frame_count(), 0);
        assert_eq!(h.manager.controller().state().anchor, None);
        assert_eq!(h.factory.sink.lock().unwrap().releases, 1);
        assert_eq!(h.factory.source.lock().unwrap().releases, 1);

        let report = h.report_rx.recv().await.unwrap();
        assert_eq!(report.session, id);
        assert!(report.success);
        assert_eq!(report.frames_counted, 201);
        assert_eq!(report.frames_appended, 201);
        assert_eq!(
            *h.persistence.calls.lock().unwrap(),
            vec![PathBuf::from("session-1.y4m")]
        );
    }

    #[tokio::test]
    async fn test_not_ready_frames_are_skipped_but_counted() {
        let mut h = harness(MockPersistence::default());
        h.factory.sink.lock().unwrap().not_ready = (5..10).collect();
        h.manager.start().await.unwrap();

        let outcomes = h.feed(0..201).await;
        let skipped: Vec<_> = outcomes
            .iter()
            .enumerate()
            .filter(|(_, o)| o.disposition == Disposition::Skipped)
            .map(|(n, _)| n)
            .collect();
        assert_eq!(skipped, vec![5, 6, 7, 8, 9]);
        assert!(outcomes[200].finalize_at.is_some());

        let sink = h.factory.sink.lock().unwrap();
        assert_eq!(sink.appended.len(), 196);
        assert_eq!(sink.finish_calls, 1);
        // skipped frames leave a gap in the timeline
        assert_eq!(sink.appended[5], MediaTime::new(10, 30));
    }

    #[tokio::test]
    async fn test_persistence_failure_is_reported() {
        let mut h = harness(MockPersistence {
            fail: Some("library full".into()),
            ..MockPersistence::default()
        });
        h.manager.start().await.unwrap();
        h.feed(0..201).await;
        h.flush().await;

        let report = h.report_rx.recv().await.unwrap();
        assert!(!report.success);
        assert_eq!(report.error, Some(SessionError::Persist("library full".into())));
        assert_eq!(h.manager.state(), SessionState::Closed);
        assert_eq!(h.factory.sink.lock().unwrap().releases, 1);
        assert_eq!(h.factory.source.lock().unwrap().releases, 1);
    }

    #[tokio::test]
    async fn test_finalize_failure_skips_persistence() {
        let mut h = harness(MockPersistence::default());
        h.factory.sink.lock().unwrap().flush = FlushScript::Fail("disk error".into());
        h.manager.start().await.unwrap();
        h.feed(0..201).await;
        h.flush().await;

        let report = h.report_rx.recv().await.unwrap();
        assert!(!report.success);
        assert_eq!(report.error, Some(SessionError::Finalize("disk error".into())));
        assert!(h.persistence.calls.lock().unwrap().is_empty());
        assert_eq!(h.manager.state(), SessionState::Closed);
        assert_eq!(h.factory.sink.lock().unwrap().releases, 1);
    }

    #[tokio::test]
    async fn test_double_flush_tears_down_once() {
        let mut h = harness(MockPersistence::default());
        h.factory.sink.lock().unwrap().flush = FlushScript::SucceedTwice;
        h.manager.start().await.unwrap();
        h.feed(0..201).await;
        h.flush().await;
        h.flush().await;

        assert_eq!(h.factory.sink.lock().unwrap().releases, 1);
        assert_eq!(h.factory.source.lock().unwrap().releases, 1);
        assert!(h.report_rx.recv().await.unwrap().success);
        assert!(h.report_rx.try_recv().is_err());
        assert_eq!(h.persistence.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_start_rejected_while_active_or_finalizing() {
        let mut h = harness(MockPersistence::default());
        h.factory.sink.lock().unwrap().flush = FlushScript::Hold;
        h.manager.start().await.unwrap();

        let err = h.manager.start().await.unwrap_err();
        assert_eq!(
            err,
            SessionError::InvalidState {
                state: SessionState::Active
            }
        );

        h.feed(0..201).await;
        let err = h.manager.start().await.unwrap_err();
        assert_eq!(
            err,
            SessionError::InvalidState {
                state: SessionState::Finalizing
            }
        );
        // rejected starts never touch the running pair
        assert_eq!(h.factory.source.lock().unwrap().starts, 1);
        assert_eq!(h.factory.sink.lock().unwrap().releases, 0);
    }

    #[tokio::test]
    async fn test_failed_setup_releases_both_halves() {
        let mut h = harness(MockPersistence::default());
        h.factory.sink.lock().unwrap().fail_start = true;

        let err = h.manager.start().await.unwrap_err();
        assert!(matches!(err, SessionError::Setup(_)));
        assert_eq!(h.manager.state(), SessionState::Idle);
        assert_eq!(h.manager.active_session(), None);
        assert_eq!(h.factory.source.lock().unwrap().starts, 0);
        assert_eq!(h.factory.source.lock().unwrap().releases, 1);
        assert_eq!(h.factory.sink.lock().unwrap().releases, 1);

        h.factory.sink.lock().unwrap().fail_start = false;
        h.factory.source.lock().unwrap().fail_start = true;
        assert!(h.manager.start().await.is_err());
        assert_eq!(h.factory.sink.lock().unwrap().releases, 2);
        assert_eq!(h.manager.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_factory_failure_leaves_no_session() {
        let mut h = harness(MockPersistence::default());
        h.factory.fail = true;
        h.manager.factory = Box::new(h.factory.clone());

        let err = h.manager.start().await.unwrap_err();
        assert!(matches!(err, SessionError::Setup(ref msg) if msg.contains("factory")));
        assert_eq!(h.manager.state(), SessionState::Idle);
        assert_eq!(h.manager.active_session(), None);
        assert_eq!(h.factory.source.lock().unwrap().starts, 0);
        assert_eq!(h.factory.sink.lock().unwrap().session_start, None);

        // frames delivered meanwhile are not counted
        let outcomes = h.feed(0..3).await;
        assert!(outcomes.iter().all(|o| !o.disposition.is_counted()));

        h.factory.fail = false;
        h.manager.factory = Box::new(h.factory.clone());
        let (id, _frames) = h.manager.start().await.unwrap();
        assert_eq!(id, SessionId(2));
        assert_eq!(h.manager.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn test_source_failure_removes_unused_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = harness(MockPersistence::default());
        h.factory.dir = Some(dir.path().to_path_buf());
        h.factory.source.lock().unwrap().fail_start = true;
        h.manager.factory = Box::new(h.factory.clone());

        // stands in for the header a started sink has already written
        let output = dir.path().join("session-1.y4m");
        std::fs::write(&output, b"YUV4MPEG2").unwrap();

        assert!(matches!(h.manager.start().await, Err(SessionError::Setup(_))));
        assert!(!output.exists());
        assert_eq!(h.factory.sink.lock().unwrap().releases, 1);
        assert_eq!(h.manager.state(), SessionState::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_on_multi_thread_runtime() {
        let mut h = harness(MockPersistence::default());
        let (id, _frames) = h.manager.start().await.unwrap();
        assert_eq!(h.manager.active_session(), Some(id));

        let outcomes = h.feed(0..201).await;
        assert!(outcomes[200].finalize_at.is_some());
        h.flush().await;
        assert!(h.report_rx.recv().await.unwrap().success);
    }

    #[tokio::test]
    async fn test_new_session_after_close() {
        let mut h = harness(MockPersistence::default());
        let (first, _frames) = h.manager.start().await.unwrap();
        h.feed(0..201).await;
        h.flush().await;
        h.report_rx.recv().await.unwrap();

        let (second, _frames) = h.manager.start().await.unwrap();
        assert_ne!(first, second);
        assert_eq!(h.manager.state(), SessionState::Active);

        let outcomes = h.feed(500..503).await;
        assert!(outcomes.iter().all(|o| o.disposition == Disposition::Appended));
        assert_eq!(h.manager.controller().frame_count(), 3);
        assert_eq!(
            h.manager.controller().state().anchor,
            Some(MediaTime::new(500, 30))
        );
    }

    #[tokio::test]
    async fn test_frames_without_session_are_ignored() {
        let mut h = harness(MockPersistence::default());
        let outcomes = h.feed(0..3).await;
        assert!(outcomes.iter().all(|o| !o.disposition.is_counted()));
        assert_eq!(h.manager.controller().frame_count(), 0);
    }
}
