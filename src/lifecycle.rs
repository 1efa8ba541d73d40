//! Lifecycle controller.
//!
//! `OverlayPipeline` owns one session at a time: the camera stream, the loaded
//! model and the render loop handle. `start` acquires the camera and loads the
//! model concurrently and arms the loop once both are ready; `stop` cancels the
//! loop before releasing the camera so no cycle ever reads from a torn-down
//! stream. Teardown happens once per start no matter how often `stop` runs.

use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::detect::{AdapterSettings, InferenceAdapter, ModelLoader};
use crate::error::PipelineError;
use crate::ingest::{CameraConstraints, CameraDevice, CameraStream, LiveFeed};
use crate::overlay::DetectionBoard;
use crate::scheduler::{ArmedLoop, LoopHandle, LoopReport, LoopState, SharedSurface};
use crate::Dimensions;

/// Transitions kept for diagnostics.
const HISTORY_LIMIT: usize = 64;

/// Tunables for one pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineSettings {
    pub constraints: CameraConstraints,
    /// Time between render cycles (one display refresh).
    pub refresh: Duration,
    /// How long `stop` waits for an in-flight detection before aborting it.
    pub stop_grace: Duration,
    pub adapter: AdapterSettings,
    /// Displayed size of the video. `None` draws at native size.
    pub display: Option<Dimensions>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            constraints: CameraConstraints::default(),
            refresh: Duration::from_secs_f64(1.0 / 60.0),
            stop_grace: Duration::from_millis(500),
            adapter: AdapterSettings::default(),
            display: None,
        }
    }
}

/// Where the detection model is in its life.
#[derive(Clone, Default)]
pub enum ModelState {
    #[default]
    Unloaded,
    Loading,
    Loaded(Arc<InferenceAdapter>),
    Failed(PipelineError),
}

impl ModelState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Loaded(_) => "loaded",
            Self::Failed(_) => "failed",
        }
    }

    pub fn adapter(&self) -> Option<&Arc<InferenceAdapter>> {
        match self {
            Self::Loaded(adapter) => Some(adapter),
            _ => None,
        }
    }
}

impl fmt::Debug for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loaded(adapter) => f.debug_tuple("Loaded").field(&adapter.model_name()).finish(),
            Self::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
            other => f.write_str(other.name()),
        }
    }
}

/// Snapshot of what the user should see.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineStatus {
    pub state: LoopState,
    /// Detections currently drawn. Zero unless running.
    pub detection_count: usize,
    pub error: Option<PipelineError>,
}

/// One recorded state change.
#[derive(Clone, Debug)]
pub struct Transition {
    pub at: Instant,
    pub from: LoopState,
    pub to: LoopState,
}

// ----------------------------------------------------------------------------
// OverlayPipeline
// ----------------------------------------------------------------------------

pub struct OverlayPipeline {
    camera: Arc<dyn CameraDevice>,
    loader: Arc<dyn ModelLoader>,
    surface: SharedSurface,
    settings: PipelineSettings,

    // Field order matters for drop: the loop goes before the stream.
    handle: Option<LoopHandle>,
    stream: Option<CameraStream>,
    model: ModelState,

    board: DetectionBoard,
    display: watch::Sender<Option<Dimensions>>,
    state: watch::Sender<LoopState>,
    history: VecDeque<Transition>,
    notice: Option<PipelineError>,
    last_report: Option<LoopReport>,
}

impl OverlayPipeline {
    pub fn new(
        camera: Arc<dyn CameraDevice>,
        loader: Arc<dyn ModelLoader>,
        surface: SharedSurface,
        settings: PipelineSettings,
    ) -> Self {
        let (display, _) = watch::channel(settings.display);
        let (state, _) = watch::channel(LoopState::Idle);
        Self {
            camera,
            loader,
            surface,
            settings,
            handle: None,
            stream: None,
            model: ModelState::Unloaded,
            board: DetectionBoard::new(),
            display,
            state,
            history: VecDeque::new(),
            notice: None,
            last_report: None,
        }
    }

    /// Start a session: camera and model in parallel, then the render loop.
    ///
    /// An active session is stopped first. A model failure is terminal and
    /// releases the camera. A camera failure keeps the loaded model so
    /// `retry_camera` can resume without reloading it.
    pub async fn start(&mut self) -> Result<(), PipelineError> {
        self.stop().await;
        self.last_report = None;
        self.transition(LoopState::Loading);
        self.model = ModelState::Loading;

        let loader = Arc::clone(&self.loader);
        let (camera, model) = tokio::join!(
            self.acquire_camera(),
            InferenceAdapter::load(loader.as_ref(), self.settings.adapter)
        );

        let adapter = match model {
            Ok(adapter) => Arc::new(adapter),
            Err(err) => {
                if let Ok((mut stream, _)) = camera {
                    stream.release();
                }
                self.model = ModelState::Failed(err.clone());
                self.transition(LoopState::Failed(err.clone()));
                return Err(err);
            }
        };
        self.model = ModelState::Loaded(Arc::clone(&adapter));

        match camera {
            Ok((stream, feed)) => {
                self.stream = Some(stream);
                self.arm(feed, adapter);
                Ok(())
            }
            Err(err) => {
                self.transition(LoopState::Failed(err.clone()));
                Err(err)
            }
        }
    }

    /// Re-request only the camera, reusing the model already loaded.
    ///
    /// After a model failure this returns that failure again; the model is
    /// never reloaded here. Without any model (no session yet) this is `start`.
    pub async fn retry_camera(&mut self) -> Result<(), PipelineError> {
        let adapter = match &self.model {
            ModelState::Loaded(adapter) => Arc::clone(adapter),
            ModelState::Failed(err) => return Err(err.clone()),
            ModelState::Unloaded | ModelState::Loading => return self.start().await,
        };
        if self.handle.is_some() {
            return Ok(());
        }
        if let Some(mut stale) = self.stream.take() {
            stale.release();
        }

        log::info!("pipeline: retrying camera {}", self.camera.name());
        self.transition(LoopState::Loading);
        match self.acquire_camera().await {
            Ok((stream, feed)) => {
                self.stream = Some(stream);
                self.arm(feed, adapter);
                Ok(())
            }
            Err(err) => {
                self.transition(LoopState::Failed(err.clone()));
                Err(err)
            }
        }
    }

    /// Tear down the session: cancel the loop, then release the camera.
    ///
    /// Returns false when there was nothing to tear down, so repeated calls
    /// are harmless and release the camera only once.
    pub async fn stop(&mut self) -> bool {
        let handle = self.handle.take();
        let stream = self.stream.take();
        let settled = matches!(*self.state.borrow(), LoopState::Idle | LoopState::Stopped);
        if handle.is_none() && stream.is_none() && settled {
            return false;
        }

        if let Some(handle) = handle {
            self.last_report = handle.shutdown(self.settings.stop_grace).await;
        }
        if let Some(mut stream) = stream {
            stream.release();
        }
        self.model = ModelState::Unloaded;
        self.board.reset();
        match self.surface.lock() {
            Ok(mut surface) => surface.clear(),
            Err(_) => log::error!("overlay surface lock poisoned; not clearing"),
        }
        self.transition(LoopState::Stopped);
        true
    }

    /// Update the displayed video size. The next redraw picks it up.
    pub fn resize(&self, display: Dimensions) {
        log::debug!("pipeline: display resized to {}", display);
        self.display.send_replace(Some(display));
    }

    pub fn state(&self) -> LoopState {
        self.state.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state.borrow(), LoopState::Running)
    }

    pub fn status(&self) -> PipelineStatus {
        let state = self.state();
        let detection_count = match state {
            LoopState::Running => self.board.count(),
            _ => 0,
        };
        let error = match &state {
            LoopState::Failed(err) => Some(err.clone()),
            _ => None,
        };
        PipelineStatus {
            state,
            detection_count,
            error,
        }
    }

    /// Human-readable line for the current state.
    pub fn status_message(&self) -> String {
        match self.state() {
            LoopState::Idle => "Camera is off.".to_string(),
            LoopState::Loading => "Starting camera and loading detection model...".to_string(),
            LoopState::Armed => "Starting detection...".to_string(),
            LoopState::Running => match self.board.count() {
                1 => "1 object detected".to_string(),
                n => format!("{} objects detected", n),
            },
            LoopState::Stopped => "Camera stopped.".to_string(),
            LoopState::Failed(err) => err.user_message().to_string(),
        }
    }

    /// True while a camera stream is held; the video should be hidden otherwise.
    pub fn video_available(&self) -> bool {
        self.stream.as_ref().is_some_and(CameraStream::is_live)
    }

    pub fn model_state(&self) -> &ModelState {
        &self.model
    }

    pub fn board(&self) -> &DetectionBoard {
        &self.board
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Counters from the last loop that was shut down cleanly.
    pub fn last_report(&self) -> Option<LoopReport> {
        self.last_report
    }

    /// Recent state changes, oldest first.
    pub fn transitions(&self) -> impl Iterator<Item = &Transition> {
        self.history.iter()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    /// Export the latest frame with the current boxes drawn on it.
    ///
    /// A failure is kept as a one-time notice and never affects the loop.
    pub fn snapshot(&mut self, path: &Path) -> Result<(), PipelineError> {
        let result = match self.stream.as_ref().and_then(CameraStream::latest) {
            Some(frame) => crate::snapshot::save(&frame, &self.board.current(), path),
            None => Err(PipelineError::FrameCaptureFailure(
                "no camera frame available".to_string(),
            )),
        };
        if let Err(err) = &result {
            log::warn!("[{}] {}", err.code(), err);
            self.notice = Some(err.clone());
        }
        result
    }

    /// Take the pending one-time notice, if any.
    pub fn take_notice(&mut self) -> Option<PipelineError> {
        self.notice.take()
    }

    // ------------------------------------------------------------------------

    async fn acquire_camera(&self) -> Result<(CameraStream, LiveFeed), PipelineError> {
        let mut stream = self.camera.acquire(&self.settings.constraints).await?;
        let feed = stream.ready().await?;
        Ok((stream, feed))
    }

    fn arm(&mut self, feed: LiveFeed, adapter: Arc<InferenceAdapter>) {
        self.transition(LoopState::Armed);
        let armed = ArmedLoop::arm(feed, adapter, self.display.subscribe(), self.settings.refresh);
        self.handle = Some(armed.spawn(Arc::clone(&self.surface), self.board.clone()));
        self.transition(LoopState::Running);
    }

    fn transition(&mut self, to: LoopState) {
        let from = self.state.send_replace(to.clone());
        match &to {
            LoopState::Failed(err) => log::error!(
                "pipeline: {} -> failed [{}]: {}",
                from.name(),
                err.code(),
                err
            ),
            _ => log::info!("pipeline: {} -> {}", from.name(), to.name()),
        }
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(Transition {
            at: Instant::now(),
            from,
            to,
        });
    }
}

impl Drop for OverlayPipeline {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.cancel();
        }
        if let Some(mut stream) = self.stream.take() {
            stream.release();
        }
    }
}
