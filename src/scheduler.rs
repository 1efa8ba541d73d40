//! Render loop.
//!
//! The loop is an explicit state machine owned by the lifecycle controller:
//!
//! ```text
//! Idle -> Loading -> Armed -> Running -> Stopped
//!            \                    \
//!             +--> Failed          +--> (cancel from any state) Stopped
//! ```
//!
//! An `ArmedLoop` can only be built from a `LiveFeed` (camera metadata loaded)
//! and a loaded `InferenceAdapter`, so the loop cannot start before both are
//! ready. Once spawned, each cycle:
//!
//! 1. waits for the next refresh tick,
//! 2. reads the latest frame,
//! 3. awaits detection on it (exactly one call in flight),
//! 4. replaces the detection list, on failure with an empty one,
//! 5. redraws the overlay, and goes round again regardless of the outcome.
//!
//! Ticks that fire while a detection is still running are skipped, not queued.
//! Cancellation goes through the `LoopHandle`: no new cycle starts after it, and
//! a detection already in flight runs to completion with its result discarded.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::detect::{DetectionSet, InferenceAdapter};
use crate::error::PipelineError;
use crate::ingest::LiveFeed;
use crate::overlay::{DetectionBoard, Overlay, OverlaySurface};
use crate::Dimensions;

/// Render target shared between the controller and the loop task.
pub type SharedSurface = Arc<Mutex<dyn OverlaySurface>>;

/// Pipeline state as seen by the user.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum LoopState {
    /// No session.
    #[default]
    Idle,
    /// Camera acquisition and/or model load in flight.
    Loading,
    /// Camera metadata and model ready; loop not yet scheduled.
    Armed,
    /// One detect + redraw cycle per refresh.
    Running,
    /// Cancelled.
    Stopped,
    /// Terminal error; needs retry or navigation away.
    Failed(PipelineError),
}

impl LoopState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Armed => "armed",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Loading | Self::Armed | Self::Running)
    }
}

/// Counters returned when a loop ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopReport {
    /// Cycles that completed a redraw.
    pub cycles: u64,
    /// Cycles whose detection failed (drawn as zero detections).
    pub detect_failures: u64,
    /// Detections that finished after cancellation and were thrown away.
    pub discarded: u64,
}

// ----------------------------------------------------------------------------
// ArmedLoop
// ----------------------------------------------------------------------------

/// A loop whose inputs are ready. Spawning it moves to `Running`.
pub struct ArmedLoop {
    feed: LiveFeed,
    adapter: Arc<InferenceAdapter>,
    display: watch::Receiver<Option<Dimensions>>,
    refresh: Duration,
}

impl ArmedLoop {
    /// `display` carries the on-screen size; `None` draws at native size.
    pub fn arm(
        feed: LiveFeed,
        adapter: Arc<InferenceAdapter>,
        display: watch::Receiver<Option<Dimensions>>,
        refresh: Duration,
    ) -> Self {
        Self {
            feed,
            adapter,
            display,
            refresh: refresh.max(Duration::from_millis(1)),
        }
    }

    /// Schedule the loop on the runtime.
    pub fn spawn(self, surface: SharedSurface, board: DetectionBoard) -> LoopHandle {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(surface, board, cancel_rx));
        LoopHandle {
            cancel: cancel_tx,
            task: Some(task),
        }
    }

    async fn run(
        mut self,
        surface: SharedSurface,
        board: DetectionBoard,
        mut cancel: watch::Receiver<bool>,
    ) -> LoopReport {
        let mut report = LoopReport::default();
        let mut ticker = tokio::time::interval(self.refresh);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        log::info!(
            "render loop running: model={}, refresh={}ms",
            self.adapter.model_name(),
            self.refresh.as_millis()
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.wait_for(|cancelled| *cancelled) => break,
                _ = ticker.tick() => {}
            }

            let frame = self.feed.current();
            let outcome = self.adapter.detect(frame.view()).await;

            if *cancel.borrow() {
                report.discarded += 1;
                break;
            }

            let detections = match outcome {
                Ok(detections) => detections,
                Err(err) => {
                    report.detect_failures += 1;
                    log::warn!("[{}] {}; drawing zero detections", err.code(), err);
                    Vec::new()
                }
            };
            let set = board.replace(DetectionSet::new(frame.index(), detections));

            let native = frame.dimensions();
            let display = (*self.display.borrow()).unwrap_or(native);
            let overlay = Overlay::compose(&set, native, display);
            match surface.lock() {
                Ok(mut surface) => surface.render(&overlay),
                Err(_) => log::error!("overlay surface lock poisoned; skipping redraw"),
            }
            report.cycles += 1;
        }

        log::info!(
            "render loop stopped after {} cycles ({} detection failures, {} discarded)",
            report.cycles,
            report.detect_failures,
            report.discarded
        );
        report
    }
}

// ----------------------------------------------------------------------------
// LoopHandle
// ----------------------------------------------------------------------------

/// Cancellation token for a running loop. Exactly one exists per session.
///
/// Dropping the handle also cancels the loop.
pub struct LoopHandle {
    cancel: watch::Sender<bool>,
    task: Option<JoinHandle<LoopReport>>,
}

impl LoopHandle {
    /// Request cancellation. Returns true only for the first request.
    pub fn cancel(&self) -> bool {
        self.cancel.send_if_modified(|cancelled| {
            let first = !*cancelled;
            *cancelled = true;
            first
        })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Cancel and wait for the loop to wind down.
    ///
    /// An in-flight detection gets `grace` to finish; after that the task is
    /// aborted and `None` is returned.
    pub async fn shutdown(mut self, grace: Duration) -> Option<LoopReport> {
        self.cancel();
        let mut task = self.task.take()?;
        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(report)) => Some(report),
            Ok(Err(err)) => {
                log::error!("render loop task ended abnormally: {}", err);
                None
            }
            Err(_) => {
                log::warn!(
                    "render loop did not stop within {}ms; aborting in-flight detection",
                    grace.as_millis()
                );
                task.abort();
                None
            }
        }
    }
}

impl Drop for LoopHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{AdapterSettings, DetectionModel, StubBackend};
    use crate::frame::VideoFrame;
    use crate::ingest::{frame_channel, CameraStream, StreamTracks};

    struct NoopTracks;

    impl StreamTracks for NoopTracks {
        fn stop(&mut self) {}
    }

    #[derive(Default)]
    struct Recorder(Vec<Overlay>);

    impl OverlaySurface for Recorder {
        fn render(&mut self, overlay: &Overlay) {
            self.0.push(overlay.clone());
        }
    }

    fn bright_frame(index: u64) -> VideoFrame {
        VideoFrame::new(vec![255u8; 8 * 4 * 3], 8, 4, index).unwrap()
    }

    #[test]
    fn state_activity() {
        assert!(LoopState::Loading.is_active());
        assert!(LoopState::Running.is_active());
        assert!(!LoopState::Stopped.is_active());
        assert!(!LoopState::Failed(PipelineError::ModelLoadFailure(String::new())).is_active());
        assert_eq!(LoopState::Armed.name(), "armed");
    }

    #[tokio::test(start_paused = true)]
    async fn loop_draws_scaled_overlay_and_stops_on_cancel() {
        let (sink, frames) = frame_channel();
        let mut stream = CameraStream::new("test", frames, Box::new(NoopTracks));
        sink.publish(bright_frame(1));
        let feed = stream.ready().await.unwrap();

        let model: Box<dyn DetectionModel> = Box::new(StubBackend::default());
        let adapter = Arc::new(InferenceAdapter::new(model, AdapterSettings::default()));
        let (_display_tx, display_rx) = watch::channel(Some(Dimensions::new(16, 2)));
        let recorder = Arc::new(Mutex::new(Recorder::default()));
        let board = DetectionBoard::new();

        let handle = ArmedLoop::arm(feed, adapter, display_rx, Duration::from_millis(16))
            .spawn(recorder.clone(), board.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!handle.is_cancelled());
        assert!(handle.cancel());
        assert!(handle.is_cancelled());
        assert!(!handle.cancel());
        let report = handle.shutdown(Duration::from_millis(100)).await.unwrap();
        assert!(report.cycles >= 3);

        let drawn = recorder.lock().unwrap();
        let last = drawn.0.last().unwrap();
        assert_eq!(last.display, Dimensions::new(16, 2));
        assert_eq!(last.boxes.len(), 1);
        assert_eq!(last.boxes[0].rect.width, 16.0);
        assert_eq!(last.boxes[0].rect.height, 2.0);
        assert_eq!(board.count(), 1);
        assert_eq!(drawn.0.len() as u64, report.cycles);
    }
}
