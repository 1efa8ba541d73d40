#![cfg(feature = "backend-tract")]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tract_onnx::prelude::*;

use crate::detect::backend::{run_blocking, DetectionModel, ModelLoader};
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::FrameView;

/// Class names for COCO-trained detectors, indexed by class id.
pub const COCO_LABELS: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// Tract-based ONNX object detector.
///
/// Expects a model with one `1x3xHxW` f32 input (RGB, 0..1) and one output of
/// rows `[x1, y1, x2, y2, score, class]` in input pixels, i.e. an exported
/// detector with NMS folded in. Frames are resized to the input with nearest
/// sampling and boxes are scaled back to native pixels.
pub struct TractBackend {
    model: Arc<TypedRunnableModel<TypedModel>>,
    input_width: u32,
    input_height: u32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_width: u32, input_height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_height as usize, input_width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model: Arc::new(model),
            input_width,
            input_height,
        })
    }

    fn build_input(&self, frame: FrameView<'_>) -> Tensor {
        let (in_w, in_h) = (self.input_width as usize, self.input_height as usize);
        let (src_w, src_h) = (frame.width() as usize, frame.height() as usize);
        let pixels = frame.pixels();
        tract_ndarray::Array4::from_shape_fn((1, 3, in_h, in_w), |(_, channel, y, x)| {
            let sx = (x * src_w / in_w).min(src_w - 1);
            let sy = (y * src_h / in_h).min(src_h - 1);
            pixels[(sy * src_w + sx) * 3 + channel] as f32 / 255.0
        })
        .into_tensor()
    }

    fn decode(&self, outputs: TVec<TValue>, frame: FrameView<'_>) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        let row_len = *shape.last().ok_or_else(|| anyhow!("model output is a scalar"))?;
        if row_len < 6 {
            return Err(anyhow!("expected rows of 6 values, got {:?}", shape));
        }
        let values: Vec<f32> = view.iter().copied().collect();

        let sx = frame.width() as f32 / self.input_width as f32;
        let sy = frame.height() as f32 / self.input_height as f32;
        let detections = values
            .chunks_exact(row_len)
            .map(|row| {
                let class = row[5].max(0.0) as usize;
                let label = COCO_LABELS.get(class).copied().unwrap_or("unknown");
                Detection::new(
                    BoundingBox::from_corners(row[0] * sx, row[1] * sy, row[2] * sx, row[3] * sy),
                    label,
                    row[4],
                )
            })
            .collect();
        Ok(detections)
    }
}

#[async_trait]
impl DetectionModel for TractBackend {
    fn name(&self) -> &str {
        "tract"
    }

    async fn detect(&self, frame: FrameView<'_>) -> Result<Vec<Detection>> {
        let input = self.build_input(frame);
        let model = Arc::clone(&self.model);
        let outputs = run_blocking(move || {
            model
                .run(tvec!(input.into()))
                .context("ONNX inference failed")
        })
        .await?;
        self.decode(outputs, frame)
    }
}

/// Loads a `TractBackend` off the async runtime.
#[derive(Clone, Debug)]
pub struct TractLoader {
    model_path: PathBuf,
    input_width: u32,
    input_height: u32,
}

impl TractLoader {
    pub fn new(model_path: impl Into<PathBuf>, input_width: u32, input_height: u32) -> Self {
        Self {
            model_path: model_path.into(),
            input_width,
            input_height,
        }
    }
}

#[async_trait]
impl ModelLoader for TractLoader {
    fn name(&self) -> &str {
        "tract"
    }

    async fn load(&self) -> Result<Box<dyn DetectionModel>> {
        let loader = self.clone();
        let backend = run_blocking(move || {
            TractBackend::new(&loader.model_path, loader.input_width, loader.input_height)
        })
        .await?;
        Ok(Box::new(backend))
    }
}
