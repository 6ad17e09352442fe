//! Scriptable collaborators for driving sessions in tests

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::capture::{CaptureFrame, CaptureSource};
use crate::encoder::{EncoderSink, FlushNotifier, PixelBuffer, SinkStatus};
use crate::pipeline::{MediaTime, SessionFactory, SessionId};
use crate::workers::library::{PersistOutcome, Persistence};

/// How a [`MemorySink`] answers `finish_writing`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FlushScript {
    #[default]
    Succeed,
    /// Completion is signalled twice
    SucceedTwice,
    Fail(String),
    /// Keep the notifier; the test fires it
    Hold,
}

#[derive(Default)]
pub struct SinkProbe {
    /// `is_ready` call indices that answer false
    pub not_ready: HashSet<u64>,
    pub ready_checks: u64,
    pub fail_start: bool,
    pub reject_appends: bool,
    pub flush: FlushScript,
    pub appended: Vec<MediaTime>,
    pub buffers: Vec<PixelBuffer>,
    pub session_start: Option<MediaTime>,
    pub session_end: Option<MediaTime>,
    pub finish_calls: u32,
    pub releases: u32,
    pub held: Option<FlushNotifier>,
}

pub struct MemorySink {
    path: PathBuf,
    status: SinkStatus,
    probe: Arc<Mutex<SinkProbe>>,
}

impl MemorySink {
    pub fn new(path: impl Into<PathBuf>) -> (Self, Arc<Mutex<SinkProbe>>) {
        Self::with_probe(path, Arc::new(Mutex::new(SinkProbe::default())))
    }

    pub fn with_probe(
        path: impl Into<PathBuf>,
        probe: Arc<Mutex<SinkProbe>>,
    ) -> (Self, Arc<Mutex<SinkProbe>>) {
        let sink = Self {
            path: path.into(),
            status: SinkStatus::Unknown,
            probe: probe.clone(),
        };
        (sink, probe)
    }

    /// Sink already in the writing state
    pub fn writing(path: impl Into<PathBuf>) -> (Self, Arc<Mutex<SinkProbe>>) {
        let (mut sink, probe) = Self::new(path);
        sink.status = SinkStatus::Writing;
        (sink, probe)
    }
}

impl EncoderSink for MemorySink {
    fn status(&self) -> SinkStatus {
        self.status
    }

    fn is_ready(&self) -> bool {
        let mut probe = self.probe.lock().unwrap();
        let index = probe.ready_checks;
        probe.ready_checks += 1;
        !probe.not_ready.contains(&index)
    }

    fn start_writing(&mut self) -> Result<()> {
        if self.probe.lock().unwrap().fail_start {
            self.status = SinkStatus::Failed;
            bail!("scripted start failure");
        }
        self.status = SinkStatus::Writing;
        Ok(())
    }

    fn start_session(&mut self, at: MediaTime) {
        self.probe.lock().unwrap().session_start = Some(at);
    }

    fn append(&mut self, buffer: PixelBuffer, at: MediaTime) -> bool {
        let mut probe = self.probe.lock().unwrap();
        if probe.reject_appends {
            return false;
        }
        probe.appended.push(at);
        probe.buffers.push(buffer);
        true
    }

    fn end_session(&mut self, at: MediaTime) {
        self.probe.lock().unwrap().session_end = Some(at);
    }

    fn finish_writing(&mut self, notifier: FlushNotifier) {
        let mut probe = self.probe.lock().unwrap();
        probe.finish_calls += 1;
        match probe.flush.clone() {
            FlushScript::Succeed => {
                self.status = SinkStatus::Completed;
                notifier.notify(Ok(self.path.clone()));
            }
            FlushScript::SucceedTwice => {
                self.status = SinkStatus::Completed;
                notifier.notify(Ok(self.path.clone()));
                notifier.notify(Ok(self.path.clone()));
            }
            FlushScript::Fail(message) => {
                self.status = SinkStatus::Failed;
                notifier.notify(Err(message));
            }
            FlushScript::Hold => probe.held = Some(notifier),
        }
    }

    fn output_path(&self) -> &Path {
        &self.path
    }

    fn release(&mut self) {
        self.probe.lock().unwrap().releases += 1;
    }
}

#[derive(Default)]
pub struct SourceProbe {
    /// Frame channel of the running source
    pub output: Option<mpsc::Sender<CaptureFrame>>,
    pub fail_start: bool,
    pub starts: u32,
    pub stops: u32,
    pub releases: u32,
}

/// Capture source whose frames are pushed by the test through the probe
pub struct ScriptedSource {
    probe: Arc<Mutex<SourceProbe>>,
}

impl ScriptedSource {
    pub fn with_probe(probe: Arc<Mutex<SourceProbe>>) -> (Self, Arc<Mutex<SourceProbe>>) {
        (
            Self {
                probe: probe.clone(),
            },
            probe,
        )
    }
}

#[async_trait]
impl CaptureSource for ScriptedSource {
    fn resolution(&self) -> (u32, u32) {
        (FRAME_W, FRAME_H)
    }

    fn nominal_fps(&self) -> i32 {
        30
    }

    async fn start(&mut self, output: mpsc::Sender<CaptureFrame>) -> Result<()> {
        let mut probe = self.probe.lock().unwrap();
        if probe.fail_start {
            return Err(anyhow!("scripted source failure"));
        }
        probe.starts += 1;
        probe.output = Some(output);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let mut probe = self.probe.lock().unwrap();
        probe.stops += 1;
        probe.output = None;
        Ok(())
    }

    fn release(&mut self) {
        let mut probe = self.probe.lock().unwrap();
        probe.releases += 1;
        probe.output = None;
    }
}

pub const FRAME_W: u32 = 16;
pub const FRAME_H: u32 = 8;

/// Frame `n` of a 30 fps stream
pub fn test_frame(n: i64) -> CaptureFrame {
    CaptureFrame::solid(MediaTime::new(n, 30), FRAME_W, FRAME_H, [20, 40, 60, 255])
}

/// Hands out scripted pairs sharing one probe each, so tests can inspect every
/// session the manager builds
#[derive(Default, Clone)]
pub struct ScriptedFactory {
    pub sink: Arc<Mutex<SinkProbe>>,
    pub source: Arc<Mutex<SourceProbe>>,
    pub fail: bool,
    /// Directory for output paths; relative paths when unset
    pub dir: Option<PathBuf>,
}

impl SessionFactory for ScriptedFactory {
    fn create(
        &mut self,
        id: SessionId,
    ) -> Result<(Box<dyn CaptureSource>, Box<dyn EncoderSink>)> {
        if self.fail {
            bail!("scripted factory failure");
        }
        let (source, _) = ScriptedSource::with_probe(self.source.clone());
        let name = format!("session-{}.y4m", id.0);
        let path = match &self.dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        };
        let (sink, _) = MemorySink::with_probe(path, self.sink.clone());
        Ok((Box::new(source), Box::new(sink)))
    }
}

/// Persistence that records every call and answers with a fixed outcome
#[derive(Default)]
pub struct MockPersistence {
    pub calls: Mutex<Vec<PathBuf>>,
    pub fail: Option<String>,
}

#[async_trait]
impl Persistence for MockPersistence {
    async fn persist(&self, recording: &Path) -> PersistOutcome {
        self.calls.lock().unwrap().push(recording.to_path_buf());
        match &self.fail {
            Some(error) => PersistOutcome::failed(error.clone()),
            None => PersistOutcome::stored(PathBuf::from("library").join(recording)),
        }
    }
}
