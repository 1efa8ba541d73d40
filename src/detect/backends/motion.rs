use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::detect::backend::{DetectionModel, ModelLoader};
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::FrameView;
use crate::Dimensions;

const DEFAULT_BLOCK_SIZE: u32 = 16;
/// Mean luma change per block that counts as motion.
const DEFAULT_BLOCK_THRESHOLD: f32 = 24.0;

struct MotionState {
    frame_hash: [u8; 32],
    dimensions: Dimensions,
    blocks: Vec<f32>,
    detections: Vec<Detection>,
}

/// CPU motion detector.
///
/// Splits each frame into square blocks, averages luma per block and compares
/// against the previous frame. Changed blocks are merged into one "motion" box.
/// Identical frames short-circuit on a SHA-256 of the pixels and get the
/// previous result back, so a refresh faster than the camera keeps the box.
pub struct MotionBackend {
    block_size: u32,
    threshold: f32,
    last: Mutex<Option<MotionState>>,
}

impl MotionBackend {
    pub fn new() -> Self {
        Self::with_params(DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_THRESHOLD)
    }

    pub fn with_params(block_size: u32, threshold: f32) -> Self {
        Self {
            block_size: block_size.max(1),
            threshold,
            last: Mutex::new(None),
        }
    }

    fn block_means(&self, frame: FrameView<'_>) -> (u32, u32, Vec<f32>) {
        let cols = frame.width().div_ceil(self.block_size);
        let rows = frame.height().div_ceil(self.block_size);
        let mut sums = vec![0f32; (cols * rows) as usize];
        let mut counts = vec![0u32; (cols * rows) as usize];
        for y in 0..frame.height() {
            for x in 0..frame.width() {
                let Some(luma) = frame.luma_at(x, y) else {
                    continue;
                };
                let idx = ((y / self.block_size) * cols + x / self.block_size) as usize;
                sums[idx] += luma as f32;
                counts[idx] += 1;
            }
        }
        let means = sums
            .iter()
            .zip(&counts)
            .map(|(sum, count)| if *count == 0 { 0.0 } else { sum / *count as f32 })
            .collect();
        (cols, rows, means)
    }
}

impl Default for MotionBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DetectionModel for MotionBackend {
    fn name(&self) -> &str {
        "motion"
    }

    async fn detect(&self, frame: FrameView<'_>) -> Result<Vec<Detection>> {
        let frame_hash: [u8; 32] = Sha256::digest(frame.pixels()).into();
        let mut last = self
            .last
            .lock()
            .map_err(|_| anyhow!("motion state lock poisoned"))?;

        if let Some(prev) = last.as_ref().filter(|prev| prev.frame_hash == frame_hash) {
            return Ok(prev.detections.clone());
        }

        let (cols, rows, blocks) = self.block_means(frame);
        let previous = last
            .take()
            .filter(|prev| prev.dimensions == frame.dimensions());

        let mut detections = Vec::new();
        if let Some(prev) = previous {
            let mut min = (u32::MAX, u32::MAX);
            let mut max = (0u32, 0u32);
            let mut changed = 0u32;
            let mut delta_sum = 0f32;
            for row in 0..rows {
                for col in 0..cols {
                    let idx = (row * cols + col) as usize;
                    let delta = (blocks[idx] - prev.blocks[idx]).abs();
                    if delta >= self.threshold {
                        changed += 1;
                        delta_sum += delta;
                        min = (min.0.min(col), min.1.min(row));
                        max = (max.0.max(col), max.1.max(row));
                    }
                }
            }
            if changed > 0 {
                let x1 = min.0 * self.block_size;
                let y1 = min.1 * self.block_size;
                let x2 = ((max.0 + 1) * self.block_size).min(frame.width());
                let y2 = ((max.1 + 1) * self.block_size).min(frame.height());
                let confidence = (delta_sum / changed as f32 / 64.0).min(1.0);
                detections.push(Detection::new(
                    BoundingBox::from_corners(x1 as f32, y1 as f32, x2 as f32, y2 as f32),
                    "motion",
                    confidence,
                ));
            }
        }

        *last = Some(MotionState {
            frame_hash,
            dimensions: frame.dimensions(),
            blocks,
            detections: detections.clone(),
        });
        Ok(detections)
    }
}

/// Loader for `MotionBackend`.
#[derive(Clone, Copy, Debug, Default)]
pub struct MotionLoader;

#[async_trait]
impl ModelLoader for MotionLoader {
    fn name(&self) -> &str {
        "motion"
    }

    async fn load(&self) -> Result<Box<dyn DetectionModel>> {
        Ok(Box::new(MotionBackend::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::VideoFrame;

    fn frame(fill: impl Fn(u32, u32) -> u8, index: u64) -> VideoFrame {
        let (w, h) = (64u32, 48u32);
        let mut pixels = Vec::with_capacity((w * h * 3) as usize);
        for y in 0..h {
            for x in 0..w {
                let v = fill(x, y);
                pixels.extend_from_slice(&[v, v, v]);
            }
        }
        VideoFrame::new(pixels, w, h, index).unwrap()
    }

    #[tokio::test]
    async fn motion_backend_detects_changed_region() {
        let backend = MotionBackend::new();

        let first = frame(|_, _| 20, 1);
        assert!(backend.detect(first.view()).await.unwrap().is_empty());

        let second = frame(|x, y| if (16..32).contains(&x) && (16..32).contains(&y) { 220 } else { 20 }, 2);
        let out = backend.detect(second.view()).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, "motion");
        assert_eq!(out[0].bbox, BoundingBox::new(16.0, 16.0, 16.0, 16.0));
        assert_eq!(out[0].confidence, 1.0);

        // A fresh frame matching the second one: the square stopped moving.
        let third = frame(|x, y| if (16..32).contains(&x) && (16..32).contains(&y) { 220 } else { 20 }, 3);
        let fourth = frame(|x, y| if (16..32).contains(&x) && (16..32).contains(&y) { 220 } else { 21 }, 4);
        backend.detect(third.view()).await.unwrap();
        assert!(backend.detect(fourth.view()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn redetecting_the_same_frame_repeats_its_result() {
        let backend = MotionBackend::new();
        let still = frame(|_, _| 20, 1);
        let moved = frame(|x, y| if (32..48).contains(&x) && (0..16).contains(&y) { 200 } else { 20 }, 2);

        backend.detect(still.view()).await.unwrap();
        let first = backend.detect(moved.view()).await.unwrap();
        // The render loop polls faster than the camera, so it sees `moved` twice.
        let again = backend.detect(moved.view()).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(again, first);
        assert_eq!(again[0].bbox, BoundingBox::new(32.0, 0.0, 16.0, 16.0));
    }

    #[tokio::test]
    async fn small_changes_stay_below_threshold() {
        let backend = MotionBackend::new();
        let first = frame(|_, _| 100, 1);
        let second = frame(|_, _| 110, 2);
        backend.detect(first.view()).await.unwrap();
        assert!(backend.detect(second.view()).await.unwrap().is_empty());
    }
}
