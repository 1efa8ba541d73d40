//! Video frames.
//!
//! - `VideoFrame`: one decoded RGB24 frame. Pixels are private and immutable.
//! - `FrameView`: read-only view handed to detectors.
//!
//! Frames are shared between the camera, the render loop and the detector as
//! `Arc<VideoFrame>`. Passing a frame to a detector hands over a reference;
//! pixels are never copied on that path.

use anyhow::{anyhow, Result};
use std::time::Instant;

use crate::Dimensions;

/// Bytes per pixel for the only pixel layout the pipeline carries (RGB24).
pub const RGB_CHANNELS: usize = 3;

// ----------------------------------------------------------------------------
// VideoFrame
// ----------------------------------------------------------------------------

/// One captured frame in native camera resolution.
///
/// There is no mutable accessor: once a frame is published by a camera stream
/// nothing downstream can change its pixels.
pub struct VideoFrame {
    pixels: Vec<u8>,
    dimensions: Dimensions,
    /// Monotonic per-stream frame counter, starting at 1.
    index: u64,
    captured_at: Instant,
}

impl VideoFrame {
    /// Wrap RGB24 pixels. Fails on zero dimensions or a length mismatch.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, index: u64) -> Result<Self> {
        let dimensions = Dimensions::new(width, height);
        if dimensions.is_empty() {
            return Err(anyhow!("frame dimensions must be non-zero, got {dimensions}"));
        }
        let expected = dimensions
            .area()
            .and_then(|area| area.checked_mul(RGB_CHANNELS))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}, received {}",
                expected,
                dimensions,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            dimensions,
            index,
            captured_at: Instant::now(),
        })
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn width(&self) -> u32 {
        self.dimensions.width
    }

    pub fn height(&self) -> u32 {
        self.dimensions.height
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Read-only view for inference.
    pub fn view(&self) -> FrameView<'_> {
        FrameView { frame: self }
    }
}

impl std::fmt::Debug for VideoFrame {
    // Pixel content stays out of logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFrame")
            .field("index", &self.index)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// FrameView
// ----------------------------------------------------------------------------

/// Borrowed, read-only view of a frame.
#[derive(Clone, Copy)]
pub struct FrameView<'a> {
    frame: &'a VideoFrame,
}

impl<'a> FrameView<'a> {
    pub fn width(&self) -> u32 {
        self.frame.dimensions.width
    }

    pub fn height(&self) -> u32 {
        self.frame.dimensions.height
    }

    pub fn dimensions(&self) -> Dimensions {
        self.frame.dimensions
    }

    pub fn index(&self) -> u64 {
        self.frame.index
    }

    /// Interleaved RGB24 pixels, row-major.
    pub fn pixels(&self) -> &'a [u8] {
        &self.frame.pixels
    }

    /// RGB triple at `(x, y)`, or `None` outside the frame.
    pub fn rgb_at(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        let offset = (y as usize * self.width() as usize + x as usize) * RGB_CHANNELS;
        let px = self.frame.pixels.get(offset..offset + RGB_CHANNELS)?;
        Some([px[0], px[1], px[2]])
    }

    /// Rec. 601 luma at `(x, y)`.
    pub fn luma_at(&self, x: u32, y: u32) -> Option<u8> {
        self.rgb_at(x, y).map(|[r, g, b]| {
            let y = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
            y.round().clamp(0.0, 255.0) as u8
        })
    }
}
