use anyhow::{Context, Result, anyhow, bail};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use tokio::sync::mpsc;

use super::{EncoderSink, FlushNotifier, FrameWriter, PixelBuffer, SinkStatus};
use crate::pipeline::{EncodedFrame, MediaTime};

type WriterFactory = Box<dyn FnOnce(&Path) -> Result<Box<dyn FrameWriter>> + Send>;

enum SinkCommand {
    StartSession(MediaTime),
    Frame(EncodedFrame),
    EndSession(MediaTime),
    Finish(FlushNotifier),
}

/// Runs a [`FrameWriter`] on a dedicated thread behind a bounded frame queue.
///
/// The writer is constructed on the worker thread, so it does not need to be
/// `Send`. Readiness is the number of frames in flight against `queue_depth`.
pub struct ThreadedSink {
    path: PathBuf,
    queue_depth: usize,
    status: Arc<AtomicU8>,
    pending: Arc<AtomicUsize>,
    tx: Option<mpsc::UnboundedSender<SinkCommand>>,
    worker: Option<JoinHandle<()>>,
    factory: Option<WriterFactory>,
    finishing: bool,
}

impl ThreadedSink {
    pub fn new<F, W>(path: impl Into<PathBuf>, queue_depth: usize, factory: F) -> Self
    where
        F: FnOnce(&Path) -> Result<W> + Send + 'static,
        W: FrameWriter + 'static,
    {
        let factory: WriterFactory =
            Box::new(move |path| Ok(Box::new(factory(path)?) as Box<dyn FrameWriter>));
        Self {
            path: path.into(),
            queue_depth: queue_depth.max(1),
            status: Arc::new(AtomicU8::new(SinkStatus::Unknown as u8)),
            pending: Arc::new(AtomicUsize::new(0)),
            tx: None,
            worker: None,
            factory: Some(factory),
            finishing: false,
        }
    }

    /// Frames accepted but not yet written
    pub fn queued(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    fn send(&self, command: SinkCommand) -> bool {
        match &self.tx {
            Some(tx) => tx.send(command).is_ok(),
            None => false,
        }
    }
}

impl EncoderSink for ThreadedSink {
    fn status(&self) -> SinkStatus {
        SinkStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn is_ready(&self) -> bool {
        self.status() == SinkStatus::Writing
            && !self.finishing
            && self.queued() < self.queue_depth
    }

    fn start_writing(&mut self) -> Result<()> {
        let current = self.status();
        if current != SinkStatus::Unknown {
            bail!("Sink already started ({:?})", current);
        }
        let factory = self
            .factory
            .take()
            .ok_or_else(|| anyhow!("Sink already started"))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<(), String>>(1);
        let path = self.path.clone();
        let status = self.status.clone();
        let pending = self.pending.clone();

        let worker = std::thread::Builder::new()
            .name("framestamp-sink".into())
            .spawn(move || {
                let writer = match factory(&path) {
                    Ok(writer) => writer,
                    Err(e) => {
                        status.store(SinkStatus::Failed as u8, Ordering::Release);
                        let _ = ready_tx.send(Err(format!("{e:#}")));
                        return;
                    }
                };
                status.store(SinkStatus::Writing as u8, Ordering::Release);
                let _ = ready_tx.send(Ok(()));
                run_worker(writer, rx, path, status, pending);
            })
            .context("Failed to spawn sink worker")?;
        self.worker = Some(worker);

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.tx = Some(tx);
                log::info!("Sink writing to {}", self.path.display());
                Ok(())
            }
            Ok(Err(e)) => Err(anyhow!("Failed to open {}: {}", self.path.display(), e)),
            Err(_) => {
                self.status
                    .store(SinkStatus::Failed as u8, Ordering::Release);
                Err(anyhow!("Sink worker exited during startup"))
            }
        }
    }

    fn start_session(&mut self, at: MediaTime) {
        if !self.send(SinkCommand::StartSession(at)) {
            log::debug!("start_session ignored: sink not running");
        }
    }

    fn append(&mut self, buffer: PixelBuffer, at: MediaTime) -> bool {
        if !self.is_ready() {
            return false;
        }
        self.pending.fetch_add(1, Ordering::AcqRel);
        if !self.send(SinkCommand::Frame(EncodedFrame { buffer, pts: at })) {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    fn end_session(&mut self, at: MediaTime) {
        if !self.send(SinkCommand::EndSession(at)) {
            log::debug!("end_session ignored: sink not running");
        }
    }

    fn finish_writing(&mut self, notifier: FlushNotifier) {
        self.finishing = true;
        if !self.send(SinkCommand::Finish(notifier.clone())) {
            notifier.notify(Err(format!(
                "sink for {} is not running ({:?})",
                self.path.display(),
                self.status()
            )));
        }
    }

    fn output_path(&self) -> &Path {
        &self.path
    }

    fn release(&mut self) {
        // dropping the sender lets the worker drain and exit
        self.tx = None;
        self.factory = None;
        if self.status() == SinkStatus::Unknown {
            self.status
                .store(SinkStatus::Cancelled as u8, Ordering::Release);
        }
        if let Some(worker) = self.worker.take() {
            if worker.is_finished() {
                if worker.join().is_err() {
                    log::warn!("Sink worker panicked");
                }
            } else {
                log::debug!("Sink worker still draining, detaching");
            }
        }
    }
}

fn run_worker(
    mut writer: Box<dyn FrameWriter>,
    mut rx: mpsc::UnboundedReceiver<SinkCommand>,
    path: PathBuf,
    status: Arc<AtomicU8>,
    pending: Arc<AtomicUsize>,
) {
    let mut end = None;
    let mut written = 0u64;

    while let Some(command) = rx.blocking_recv() {
        match command {
            SinkCommand::StartSession(at) => writer.start_session(at),
            SinkCommand::Frame(EncodedFrame { buffer, pts: at }) => {
                let writing = SinkStatus::from_u8(status.load(Ordering::Acquire))
                    == SinkStatus::Writing;
                if writing {
                    match writer.write_frame(&buffer, at) {
                        Ok(()) => written += 1,
                        Err(e) => {
                            log::error!("Sink write failed at {}: {:#}", at, e);
                            status.store(SinkStatus::Failed as u8, Ordering::Release);
                        }
                    }
                }
                pending.fetch_sub(1, Ordering::AcqRel);
            }
            SinkCommand::EndSession(at) => end = Some(at),
            SinkCommand::Finish(notifier) => {
                let failed =
                    SinkStatus::from_u8(status.load(Ordering::Acquire)) == SinkStatus::Failed;
                let result = if failed {
                    Err(format!("writer for {} failed earlier", path.display()))
                } else {
                    writer
                        .finish(end)
                        .map(|()| path.clone())
                        .map_err(|e| format!("{e:#}"))
                };
                let final_status = if result.is_ok() {
                    SinkStatus::Completed
                } else {
                    SinkStatus::Failed
                };
                status.store(final_status as u8, Ordering::Release);
                log::debug!("Sink finished: {} frames, {:?}", written, final_status);
                // the output file must be closed before completion is reported
                drop(writer);
                notifier.notify(result);
                return;
            }
        }
    }

    let _ = status.compare_exchange(
        SinkStatus::Writing as u8,
        SinkStatus::Cancelled as u8,
        Ordering::AcqRel,
        Ordering::Acquire,
    );
    log::debug!("Sink released before finishing ({} frames written)", written);
}
