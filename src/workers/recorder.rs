//! Recorder worker
//!
//! One tokio task owns the [`SessionManager`] and is the only place session
//! state is mutated. It multiplexes start requests, frames of the active
//! session and flush completions; callers talk to it through a
//! [`RecorderHandle`].

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::capture::CaptureFrame;
use crate::encoder::FlushSignal;
use crate::error::SessionError;
use crate::pipeline::{
    FrameController, PipelineHealth, SessionFactory, SessionId, SessionManager, SessionReport,
};
use crate::workers::WorkerClose;
use crate::workers::library::Persistence;

enum Command {
    Start {
        reply: oneshot::Sender<Result<SessionId, SessionError>>,
    },
}

/// Cloneable front end of a running [`Recorder`]
#[derive(Clone)]
pub struct RecorderHandle {
    commands: mpsc::Sender<Command>,
    health: Arc<PipelineHealth>,
}

impl RecorderHandle {
    /// Start one recording session
    pub async fn start(&self) -> Result<SessionId, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Start { reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Live counters of the current (or last) session
    pub fn health(&self) -> Arc<PipelineHealth> {
        self.health.clone()
    }
}

pub struct Recorder {
    task: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl Recorder {
    /// Spawn the recorder task. Session reports arrive on the returned receiver.
    pub fn spawn(
        controller: FrameController,
        factory: Box<dyn SessionFactory>,
        persistence: Arc<dyn Persistence>,
        frame_queue_depth: usize,
    ) -> (Self, RecorderHandle, mpsc::UnboundedReceiver<SessionReport>) {
        let (command_tx, command_rx) = mpsc::channel(4);
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let health = controller.health();

        let manager = SessionManager::new(
            controller,
            factory,
            persistence,
            flush_tx,
            report_tx,
            frame_queue_depth,
        );
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run(manager, command_rx, flush_rx, shutdown.clone()));

        let handle = RecorderHandle {
            commands: command_tx,
            health,
        };
        (
            Self {
                task: Some(task),
                shutdown,
            },
            handle,
            report_rx,
        )
    }

    /// Wait for the task to exit. It exits once every handle is dropped and no
    /// session is in flight, or after [`WorkerClose::close`].
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::error!("Recorder task failed: {}", e);
            }
        }
    }
}

impl WorkerClose for Recorder {
    fn close(&mut self) {
        self.shutdown.cancel();
    }
}

/// Next frame of the active session; pends forever without one
async fn next_frame(frames: &mut Option<mpsc::Receiver<CaptureFrame>>) -> Option<CaptureFrame> {
    match frames {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn run(
    mut manager: SessionManager,
    mut commands: mpsc::Receiver<Command>,
    mut flushes: mpsc::UnboundedReceiver<FlushSignal>,
    shutdown: CancellationToken,
) {
    let mut frames: Option<mpsc::Receiver<CaptureFrame>> = None;
    let mut accepting = true;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                log::info!("Recorder shutting down while {}", manager.state());
                break;
            }
            command = commands.recv(), if accepting => match command {
                Some(Command::Start { reply }) => {
                    let result = match manager.start().await {
                        Ok((id, rx)) => {
                            frames = Some(rx);
                            Ok(id)
                        }
                        Err(e) => {
                            log::warn!("Start rejected: {}", e);
                            Err(e)
                        }
                    };
                    let _ = reply.send(result);
                }
                None => accepting = false,
            },
            frame = next_frame(&mut frames) => match frame {
                Some(frame) => {
                    let outcome = manager.handle_frame(frame).await;
                    if outcome.finalize_at.is_some() {
                        // the source is stopped; late frames are not needed
                        frames = None;
                    }
                }
                None => {
                    log::debug!("Frame stream ended");
                    frames = None;
                }
            },
            Some(signal) = flushes.recv() => manager.handle_flush(signal),
        }

        let busy = manager.state().is_active() || manager.state().is_finalizing();
        if !accepting && !busy {
            break;
        }
    }
    log::debug!("Recorder task exited");
}
