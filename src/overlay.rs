//! Overlay composition and render surfaces.
//!
//! The render loop turns the current `DetectionSet` into an `Overlay` in
//! display coordinates and hands it to an `OverlaySurface`. A surface draws one
//! rectangle per box plus its caption (`"<label> <confidence>%"`).

use std::sync::Arc;

use tokio::sync::watch;

use crate::detect::{BoundingBox, DetectionSet};
use crate::transform::{to_display_box, ScaleFactors};
use crate::Dimensions;

/// One box to draw, already in display coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct OverlayBox {
    pub rect: BoundingBox,
    pub label: String,
    pub confidence: f32,
    pub caption: String,
}

/// Everything a surface needs for one redraw.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Overlay {
    pub frame_index: u64,
    pub native: Dimensions,
    pub display: Dimensions,
    pub boxes: Vec<OverlayBox>,
}

impl Overlay {
    /// Scale every detection from `native` to `display`.
    ///
    /// Factors are derived here, per call, so a resize between two frames is
    /// picked up by the next redraw.
    pub fn compose(set: &DetectionSet, native: Dimensions, display: Dimensions) -> Self {
        let scale = ScaleFactors::between(native, display).unwrap_or(ScaleFactors::IDENTITY);
        let boxes = set
            .detections
            .iter()
            .map(|detection| OverlayBox {
                rect: to_display_box(detection.bbox, scale),
                label: detection.label.clone(),
                confidence: detection.confidence,
                caption: detection.caption(),
            })
            .collect();
        Self {
            frame_index: set.frame_index,
            native,
            display,
            boxes,
        }
    }

    pub fn detection_count(&self) -> usize {
        self.boxes.len()
    }
}

/// Something the overlay can be drawn on.
pub trait OverlaySurface: Send {
    /// Replace whatever is currently drawn with `overlay`.
    fn render(&mut self, overlay: &Overlay);

    /// Remove the overlay, e.g. when the session stops.
    fn clear(&mut self) {}
}

/// Surface that writes overlays to the log.
///
/// Count changes are logged at info, every redraw at debug.
#[derive(Debug, Default)]
pub struct LogSurface {
    last_count: Option<usize>,
}

impl LogSurface {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OverlaySurface for LogSurface {
    fn render(&mut self, overlay: &Overlay) {
        let count = overlay.detection_count();
        if self.last_count != Some(count) {
            log::info!("overlay: {} object(s) at frame {}", count, overlay.frame_index);
            self.last_count = Some(count);
        }
        for b in &overlay.boxes {
            log::debug!(
                "overlay frame {}: {} at ({:.0}, {:.0}) {:.0}x{:.0}",
                overlay.frame_index,
                b.caption,
                b.rect.x,
                b.rect.y,
                b.rect.width,
                b.rect.height
            );
        }
    }

    fn clear(&mut self) {
        self.last_count = None;
        log::debug!("overlay cleared");
    }
}

// ----------------------------------------------------------------------------
// DetectionBoard
// ----------------------------------------------------------------------------

/// Holds the current detection list. Each publish replaces it whole.
#[derive(Clone, Debug)]
pub struct DetectionBoard {
    tx: Arc<watch::Sender<Arc<DetectionSet>>>,
}

impl DetectionBoard {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(DetectionSet::default()));
        Self { tx: Arc::new(tx) }
    }

    /// Swap in a new list and return it.
    pub fn replace(&self, set: DetectionSet) -> Arc<DetectionSet> {
        let set = Arc::new(set);
        self.tx.send_replace(Arc::clone(&set));
        set
    }

    /// Drop all detections.
    pub fn reset(&self) {
        self.tx.send_replace(Arc::new(DetectionSet::default()));
    }

    pub fn current(&self) -> Arc<DetectionSet> {
        Arc::clone(&self.tx.borrow())
    }

    pub fn count(&self) -> usize {
        self.tx.borrow().len()
    }

    /// Receiver notified on every replacement.
    pub fn subscribe(&self) -> watch::Receiver<Arc<DetectionSet>> {
        self.tx.subscribe()
    }
}

impl Default for DetectionBoard {
    fn default() -> Self {
        Self::new()
    }
}
