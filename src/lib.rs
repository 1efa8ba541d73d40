//! Live Annotation Overlay
//!
//! This crate continuously captures frames from a camera, runs them through an
//! object detector and renders bounding-box overlays in the coordinate space of
//! the displayed video, until the session is torn down.
//!
//! # Architecture
//!
//! The pipeline is built from five parts, leaves first:
//!
//! 1. **Media acquisition** (`ingest`): opens a camera stream and publishes the
//!    latest frame.
//! 2. **Inference adapter** (`detect`): loads a model once per session and turns
//!    a frame into a replacement list of detections.
//! 3. **Coordinate transform** (`transform`): maps native pixel boxes to display
//!    boxes with independent X/Y scaling.
//! 4. **Render loop** (`scheduler`): one single-flight detect + redraw cycle per
//!    display refresh, cancellable through a `LoopHandle`.
//! 5. **Lifecycle** (`lifecycle`): starts camera and model in parallel, arms the
//!    loop once both are ready and tears everything down exactly once.
//!
//! # Module Structure
//!
//! - `frame`: `VideoFrame` and the read-only `FrameView` detectors receive
//! - `overlay`: overlay composition, render surfaces, the detection board
//! - `snapshot`: annotated frame export (JPEG)
//! - `assist`: request/response collaborators (chat store, completion,
//!   transcription, speech) and the voice query flow
//! - `config`, `ui`: daemon configuration and terminal presentation

use serde::{Deserialize, Serialize};

pub mod assist;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod lifecycle;
pub mod overlay;
pub mod scheduler;
pub mod snapshot;
pub mod transform;
pub mod ui;

pub use detect::{
    BackendRegistry, BoundingBox, Detection, DetectionModel, DetectionSet, InferenceAdapter,
    ModelLoader,
};
pub use error::PipelineError;
pub use frame::{FrameView, VideoFrame};
pub use ingest::{
    frame_channel, CameraConstraints, CameraDevice, CameraStream, FacingMode, FrameSink, LiveFeed,
    StreamTracks, SyntheticCamera,
};
#[cfg(feature = "camera-v4l2")]
pub use ingest::{V4l2Camera, V4l2Config};
pub use lifecycle::{ModelState, OverlayPipeline, PipelineSettings, PipelineStatus};
pub use overlay::{DetectionBoard, LogSurface, Overlay, OverlayBox, OverlaySurface};
pub use scheduler::{ArmedLoop, LoopHandle, LoopReport, LoopState};
pub use transform::{to_display_box, ScaleFactors};

// -------------------- Geometry --------------------

/// Width/height pair in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when either axis is zero.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Number of pixels, or `None` on overflow.
    pub fn area(&self) -> Option<usize> {
        (self.width as usize).checked_mul(self.height as usize)
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
