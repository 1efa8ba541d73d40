use std::cmp::Ordering;
use std::time::Instant;

use crate::detect::backend::{DetectionModel, ModelLoader};
use crate::detect::result::Detection;
use crate::error::PipelineError;
use crate::frame::FrameView;

/// Output policy applied to every model result.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AdapterSettings {
    /// Detections scoring below this are dropped.
    pub min_confidence: f32,
    /// At most this many detections (highest scores first) are kept.
    pub max_detections: usize,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            max_detections: 20,
        }
    }
}

/// Wraps a loaded model and normalises what it returns.
///
/// `detect` errors come back as `PipelineError::DetectionFailure`; the render
/// loop treats them as an empty frame and keeps going.
pub struct InferenceAdapter {
    model: Box<dyn DetectionModel>,
    settings: AdapterSettings,
}

impl InferenceAdapter {
    pub fn new(model: Box<dyn DetectionModel>, settings: AdapterSettings) -> Self {
        Self { model, settings }
    }

    /// Load through `loader`. A failure here is terminal for the session.
    pub async fn load(
        loader: &dyn ModelLoader,
        settings: AdapterSettings,
    ) -> Result<Self, PipelineError> {
        let started = Instant::now();
        log::info!("loading detection model '{}'", loader.name());
        let model = loader.load().await.map_err(|err| {
            log::error!("detection model '{}' failed to load: {:#}", loader.name(), err);
            PipelineError::ModelLoadFailure(format!("{}: {:#}", loader.name(), err))
        })?;
        log::info!(
            "detection model '{}' ready in {}ms",
            model.name(),
            started.elapsed().as_millis()
        );
        Ok(Self::new(model, settings))
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub fn settings(&self) -> AdapterSettings {
        self.settings
    }

    /// Detect on `frame` and return the replacement detection list.
    pub async fn detect(&self, frame: FrameView<'_>) -> Result<Vec<Detection>, PipelineError> {
        let raw = self.model.detect(frame).await.map_err(|err| {
            PipelineError::DetectionFailure(format!("frame {}: {:#}", frame.index(), err))
        })?;
        Ok(self.normalise(raw))
    }

    fn normalise(&self, raw: Vec<Detection>) -> Vec<Detection> {
        let mut kept: Vec<Detection> = raw
            .into_iter()
            .filter(|d| d.bbox.is_finite() && d.bbox.area() > 0.0 && !d.confidence.is_nan())
            .map(|mut d| {
                d.confidence = d.confidence.clamp(0.0, 1.0);
                d
            })
            .filter(|d| d.confidence >= self.settings.min_confidence)
            .collect();
        kept.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(Ordering::Equal)
        });
        kept.truncate(self.settings.max_detections);
        kept
    }
}
