//! Camera acquisition.
//!
//! A `CameraDevice` opens a stream for a set of `CameraConstraints`. The stream
//! publishes decoded frames into a watch channel that always holds the latest
//! frame, the way a video element always shows the newest picture:
//! - Synthetic cameras (`stub://` urls, testing and demos)
//! - USB/V4L2 devices (feature: camera-v4l2)
//!
//! A stream owns the OS-level camera handle (its `StreamTracks`) until it is
//! released. Release happens exactly once, explicitly or on drop.
//!
//! Native dimensions are not known when a stream is opened. `CameraStream::ready`
//! resolves once the first frame has arrived ("metadata loaded") and returns a
//! `LiveFeed` that always has a current frame.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::PipelineError;
use crate::frame::VideoFrame;
use crate::Dimensions;

#[cfg(feature = "camera-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "camera-v4l2")]
pub mod v4l2;

pub use synthetic::SyntheticCamera;
#[cfg(feature = "camera-v4l2")]
pub use v4l2::{V4l2Camera, V4l2Config};

/// Which way the requested camera faces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Rear camera, pointing at the scene.
    #[default]
    Environment,
    /// Front camera, pointing at the user.
    User,
}

/// What the pipeline asks a camera for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraConstraints {
    pub facing: FacingMode,
    /// Audio is never requested by the overlay pipeline.
    pub audio: bool,
    /// Suggested resolution. Devices may deliver something else.
    pub ideal: Dimensions,
    pub target_fps: u32,
}

impl CameraConstraints {
    /// Rear-facing, video only.
    pub fn rear(ideal: Dimensions, target_fps: u32) -> Self {
        Self {
            facing: FacingMode::Environment,
            audio: false,
            ideal,
            target_fps,
        }
    }
}

impl Default for CameraConstraints {
    fn default() -> Self {
        Self::rear(Dimensions::new(1280, 720), 30)
    }
}

/// A camera that can be opened.
#[async_trait]
pub trait CameraDevice: Send + Sync {
    /// Device identifier for logs.
    fn name(&self) -> &str;

    /// Request the camera. Errors are classified into the camera taxonomy.
    async fn acquire(&self, constraints: &CameraConstraints)
        -> Result<CameraStream, PipelineError>;
}

/// Release hook for the OS-level resources behind a stream.
pub trait StreamTracks: Send {
    /// Stop capture and release the device. Called at most once.
    fn stop(&mut self);
}

// ----------------------------------------------------------------------------
// Frame channel
// ----------------------------------------------------------------------------

type LatestFrame = watch::Receiver<Option<Arc<VideoFrame>>>;

/// Producer side of a camera stream.
pub struct FrameSink {
    tx: watch::Sender<Option<Arc<VideoFrame>>>,
}

impl FrameSink {
    /// Replace the latest frame. Returns false once the stream side is gone.
    pub fn publish(&self, frame: VideoFrame) -> bool {
        self.tx.send(Some(Arc::new(frame))).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of a frame channel, handed to `CameraStream::new`.
pub struct FrameReceiver {
    rx: LatestFrame,
}

/// Create a latest-frame channel for a camera implementation.
pub fn frame_channel() -> (FrameSink, FrameReceiver) {
    let (tx, rx) = watch::channel(None);
    (FrameSink { tx }, FrameReceiver { rx })
}

// ----------------------------------------------------------------------------
// CameraStream
// ----------------------------------------------------------------------------

/// A live camera stream. Holds the camera until released.
pub struct CameraStream {
    label: String,
    frames: LatestFrame,
    tracks: Option<Box<dyn StreamTracks>>,
}

impl CameraStream {
    pub fn new(label: impl Into<String>, frames: FrameReceiver, tracks: Box<dyn StreamTracks>) -> Self {
        Self {
            label: label.into(),
            frames: frames.rx,
            tracks: Some(tracks),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Wait for the first frame and return a feed over the stream.
    ///
    /// Fails with `OtherAcquisitionFailure` when the producer goes away before
    /// delivering anything.
    pub async fn ready(&mut self) -> Result<LiveFeed, PipelineError> {
        let first = match self.frames.wait_for(Option::is_some).await {
            Ok(frame) => Option::clone(&frame),
            Err(_) => None,
        };
        let latest = first.ok_or_else(|| {
            PipelineError::OtherAcquisitionFailure(format!(
                "{}: stream ended before the first frame",
                self.label
            ))
        })?;
        log::info!(
            "camera {}: metadata loaded, native {}",
            self.label,
            latest.dimensions()
        );
        Ok(LiveFeed {
            frames: self.frames.clone(),
            latest,
        })
    }

    /// Most recent frame, if any arrived yet.
    pub fn latest(&self) -> Option<Arc<VideoFrame>> {
        Option::clone(&self.frames.borrow())
    }

    /// True until the stream is released.
    pub fn is_live(&self) -> bool {
        self.tracks.is_some()
    }

    /// Release the camera. Returns true only for the call that released it.
    pub fn release(&mut self) -> bool {
        match self.tracks.take() {
            Some(mut tracks) => {
                tracks.stop();
                log::info!("camera {}: released", self.label);
                true
            }
            None => false,
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.release();
    }
}

// ----------------------------------------------------------------------------
// LiveFeed
// ----------------------------------------------------------------------------

/// Read side used by the render loop. Always has a current frame.
#[derive(Clone)]
pub struct LiveFeed {
    frames: LatestFrame,
    latest: Arc<VideoFrame>,
}

impl LiveFeed {
    /// Latest published frame, as a shared reference.
    pub fn current(&mut self) -> Arc<VideoFrame> {
        if self.frames.has_changed().unwrap_or(false) {
            if let Some(frame) = Option::clone(&self.frames.borrow_and_update()) {
                self.latest = frame;
            }
        }
        Arc::clone(&self.latest)
    }

    /// Native dimensions of the latest frame seen by this feed.
    pub fn native(&self) -> Dimensions {
        self.latest.dimensions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTracks(Arc<AtomicUsize>);

    impl StreamTracks for CountingTracks {
        fn stop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn frame(index: u64) -> VideoFrame {
        VideoFrame::new(vec![0u8; 4 * 2 * 3], 4, 2, index).unwrap()
    }

    #[tokio::test]
    async fn ready_waits_for_first_frame() {
        let (sink, frames) = frame_channel();
        let stops = Arc::new(AtomicUsize::new(0));
        let mut stream = CameraStream::new("test", frames, Box::new(CountingTracks(stops.clone())));
        assert!(stream.latest().is_none());

        let producer = tokio::spawn(async move {
            tokio::task::yield_now().await;
            sink.publish(frame(1));
            sink
        });
        let mut feed = stream.ready().await.unwrap();
        let sink = producer.await.unwrap();

        assert_eq!(feed.native(), Dimensions::new(4, 2));
        assert_eq!(feed.current().index(), 1);
        sink.publish(frame(2));
        assert_eq!(feed.current().index(), 2);
        assert_eq!(feed.current().index(), 2);
    }

    #[tokio::test]
    async fn ready_fails_when_producer_disappears() {
        let (sink, frames) = frame_channel();
        let stops = Arc::new(AtomicUsize::new(0));
        let mut stream = CameraStream::new("gone", frames, Box::new(CountingTracks(stops)));
        drop(sink);
        let err = stream.ready().await.err().unwrap();
        assert!(matches!(err, PipelineError::OtherAcquisitionFailure(_)));
    }

    #[test]
    fn release_happens_once() {
        let (_sink, frames) = frame_channel();
        let stops = Arc::new(AtomicUsize::new(0));
        let mut stream = CameraStream::new("cam", frames, Box::new(CountingTracks(stops.clone())));

        assert!(stream.release());
        assert!(!stream.release());
        assert!(!stream.is_live());
        drop(stream);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_releases_unreleased_stream() {
        let (_sink, frames) = frame_channel();
        let stops = Arc::new(AtomicUsize::new(0));
        drop(CameraStream::new("cam", frames, Box::new(CountingTracks(stops.clone()))));
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_constraints_request_rear_video_only() {
        let constraints = CameraConstraints::default();
        assert_eq!(constraints.facing, FacingMode::Environment);
        assert!(!constraints.audio);
    }
}
