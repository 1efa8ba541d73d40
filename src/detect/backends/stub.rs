use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::detect::backend::{DetectionModel, ModelLoader};
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::FrameView;

/// Luma at or above this counts as part of the bright region.
const BRIGHT_THRESHOLD: u8 = 200;

/// Stub backend for synthetic scenes and tests.
///
/// Reports the bounding box of all bright pixels as a single detection. The
/// synthetic camera draws one bright square on a dark background, so this
/// tracks it exactly. Confidence is the fraction of the box that is bright.
pub struct StubBackend {
    label: String,
}

impl StubBackend {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new("object")
    }
}

#[async_trait]
impl DetectionModel for StubBackend {
    fn name(&self) -> &str {
        "stub"
    }

    async fn detect(&self, frame: FrameView<'_>) -> Result<Vec<Detection>> {
        let mut min_x = u32::MAX;
        let mut min_y = u32::MAX;
        let mut max_x = 0u32;
        let mut max_y = 0u32;
        let mut bright = 0u64;

        for y in 0..frame.height() {
            for x in 0..frame.width() {
                if frame.luma_at(x, y).is_some_and(|l| l >= BRIGHT_THRESHOLD) {
                    bright += 1;
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                }
            }
        }

        if bright == 0 {
            return Ok(Vec::new());
        }

        let width = (max_x - min_x + 1) as f32;
        let height = (max_y - min_y + 1) as f32;
        let confidence = bright as f32 / (width * height);
        Ok(vec![Detection::new(
            BoundingBox::new(min_x as f32, min_y as f32, width, height),
            self.label.clone(),
            confidence,
        )])
    }
}

/// Loader for `StubBackend`, with an optional artificial load delay.
#[derive(Clone, Debug, Default)]
pub struct StubLoader {
    label: Option<String>,
    load_delay: Duration,
}

impl StubLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Simulate a model download of the given length.
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }
}

#[async_trait]
impl ModelLoader for StubLoader {
    fn name(&self) -> &str {
        "stub"
    }

    async fn load(&self) -> Result<Box<dyn DetectionModel>> {
        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }
        let backend = match &self.label {
            Some(label) => StubBackend::new(label.clone()),
            None => StubBackend::default(),
        };
        Ok(Box::new(backend))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::VideoFrame;

    fn frame_with_square(x0: u32, y0: u32, side: u32) -> VideoFrame {
        let (w, h) = (32u32, 24u32);
        let mut pixels = vec![10u8; (w * h * 3) as usize];
        for y in y0..y0 + side {
            for x in x0..x0 + side {
                let offset = ((y * w + x) * 3) as usize;
                pixels[offset..offset + 3].copy_from_slice(&[250, 250, 250]);
            }
        }
        VideoFrame::new(pixels, w, h, 1).unwrap()
    }

    #[tokio::test]
    async fn stub_backend_boxes_bright_square() {
        let backend = StubBackend::new("person");
        let frame = frame_with_square(4, 6, 8);

        let out = backend.detect(frame.view()).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bbox, BoundingBox::new(4.0, 6.0, 8.0, 8.0));
        assert_eq!(out[0].label, "person");
        assert_eq!(out[0].confidence, 1.0);
    }

    #[tokio::test]
    async fn stub_backend_reports_nothing_on_dark_frame() {
        let backend = StubBackend::default();
        let frame = VideoFrame::new(vec![0u8; 8 * 8 * 3], 8, 8, 1).unwrap();
        assert!(backend.detect(frame.view()).await.unwrap().is_empty());
    }
}
