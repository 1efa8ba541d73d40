use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::detect::{AdapterSettings, BackendRegistry, ModelLoader};
use crate::ingest::{CameraConstraints, CameraDevice, SyntheticCamera};
use crate::lifecycle::PipelineSettings;
use crate::Dimensions;

const DEFAULT_CAMERA_URL: &str = "stub://rear_camera";
const DEFAULT_CAMERA_WIDTH: u32 = 1280;
const DEFAULT_CAMERA_HEIGHT: u32 = 720;
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_BACKEND: &str = "stub";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_MIN_CONFIDENCE: f32 = 0.5;
const DEFAULT_MAX_DETECTIONS: usize = 20;
const DEFAULT_REFRESH_HZ: u32 = 60;
const DEFAULT_STOP_GRACE_MS: u64 = 500;

#[derive(Debug, Deserialize, Default)]
struct OverlayConfigFile {
    camera: Option<CameraConfigFile>,
    detector: Option<DetectorConfigFile>,
    display: Option<DisplayConfigFile>,
    render: Option<RenderConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    min_confidence: Option<f32>,
    max_detections: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct RenderConfigFile {
    refresh_hz: Option<u32>,
    stop_grace_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct OverlayConfig {
    pub camera: CameraSettings,
    pub detector: DetectorSettings,
    pub display: Option<Dimensions>,
    pub render: RenderSettings,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    pub min_confidence: f32,
    pub max_detections: usize,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub refresh_hz: u32,
    pub stop_grace: Duration,
}

impl OverlayConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("OVERLAY_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: OverlayConfigFile) -> Result<Self> {
        let camera_file = file.camera.unwrap_or_default();
        let camera = CameraSettings {
            url: camera_file
                .url
                .unwrap_or_else(|| DEFAULT_CAMERA_URL.to_string()),
            width: camera_file.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: camera_file.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
            target_fps: camera_file.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
        };

        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: detector_file
                .backend
                .unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
            model_path: detector_file.model_path,
            input_width: detector_file.input_width.unwrap_or(DEFAULT_INPUT_SIZE),
            input_height: detector_file.input_height.unwrap_or(DEFAULT_INPUT_SIZE),
            min_confidence: detector_file
                .min_confidence
                .unwrap_or(DEFAULT_MIN_CONFIDENCE),
            max_detections: detector_file
                .max_detections
                .unwrap_or(DEFAULT_MAX_DETECTIONS),
        };

        let display = match file.display {
            None => None,
            Some(DisplayConfigFile {
                width: None,
                height: None,
            }) => None,
            Some(DisplayConfigFile {
                width: Some(width),
                height: Some(height),
            }) => Some(Dimensions::new(width, height)),
            Some(_) => {
                return Err(anyhow!(
                    "display.width and display.height must be set together"
                ))
            }
        };

        let render_file = file.render.unwrap_or_default();
        let render = RenderSettings {
            refresh_hz: render_file.refresh_hz.unwrap_or(DEFAULT_REFRESH_HZ),
            stop_grace: Duration::from_millis(
                render_file.stop_grace_ms.unwrap_or(DEFAULT_STOP_GRACE_MS),
            ),
        };

        Ok(Self {
            camera,
            detector,
            display,
            render,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("OVERLAY_CAMERA_URL") {
            if !url.trim().is_empty() {
                self.camera.url = url;
            }
        }
        if let Ok(backend) = std::env::var("OVERLAY_BACKEND") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend.trim().to_lowercase();
            }
        }
        if let Ok(path) = std::env::var("OVERLAY_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(hz) = std::env::var("OVERLAY_REFRESH_HZ") {
            self.render.refresh_hz = hz
                .trim()
                .parse()
                .map_err(|_| anyhow!("OVERLAY_REFRESH_HZ must be an integer number of hertz"))?;
        }
        if let Ok(confidence) = std::env::var("OVERLAY_MIN_CONFIDENCE") {
            self.detector.min_confidence = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("OVERLAY_MIN_CONFIDENCE must be a number between 0 and 1"))?;
        }
        if let Ok(grace) = std::env::var("OVERLAY_STOP_GRACE_MS") {
            let millis: u64 = grace.trim().parse().map_err(|_| {
                anyhow!("OVERLAY_STOP_GRACE_MS must be an integer number of milliseconds")
            })?;
            self.render.stop_grace = Duration::from_millis(millis);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.detector.backend = self.detector.backend.trim().to_lowercase();

        if self.camera.url.trim().is_empty() {
            return Err(anyhow!("camera.url must not be empty"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera dimensions must be greater than zero"));
        }
        if self.camera.target_fps == 0 {
            return Err(anyhow!("camera.target_fps must be greater than zero"));
        }
        if self.render.refresh_hz == 0 {
            return Err(anyhow!("render.refresh_hz must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.detector.min_confidence) {
            return Err(anyhow!("detector.min_confidence must be between 0 and 1"));
        }
        if self.detector.max_detections == 0 {
            return Err(anyhow!("detector.max_detections must be greater than zero"));
        }
        if self.detector.input_width == 0 || self.detector.input_height == 0 {
            return Err(anyhow!("detector input dimensions must be greater than zero"));
        }
        if self.detector.backend == "tract" && self.detector.model_path.is_none() {
            return Err(anyhow!("detector.model_path is required for the tract backend"));
        }
        if let Some(display) = self.display {
            if display.is_empty() {
                return Err(anyhow!("display dimensions must be greater than zero"));
            }
        }
        Ok(())
    }

    /// Camera for `camera.url`: `stub://` is synthetic, anything else a device.
    pub fn camera_device(&self) -> Result<Arc<dyn CameraDevice>> {
        if self.camera.url.starts_with("stub://") {
            return Ok(Arc::new(SyntheticCamera::new(self.camera.url.clone())));
        }
        #[cfg(feature = "camera-v4l2")]
        {
            let config = crate::ingest::V4l2Config {
                device: self.camera.url.clone(),
                ..crate::ingest::V4l2Config::default()
            };
            Ok(Arc::new(crate::ingest::V4l2Camera::new(config)))
        }
        #[cfg(not(feature = "camera-v4l2"))]
        {
            Err(anyhow!(
                "camera {} needs the camera-v4l2 feature; only stub:// urls are available",
                self.camera.url
            ))
        }
    }

    pub fn registry(&self) -> BackendRegistry {
        BackendRegistry::with_builtin(
            self.detector.model_path.as_deref(),
            Dimensions::new(self.detector.input_width, self.detector.input_height),
        )
    }

    /// Loader for `detector.backend`.
    pub fn model_loader(&self) -> Result<Arc<dyn ModelLoader>> {
        self.registry().loader(&self.detector.backend)
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            constraints: CameraConstraints::rear(
                Dimensions::new(self.camera.width, self.camera.height),
                self.camera.target_fps,
            ),
            refresh: Duration::from_secs_f64(1.0 / self.render.refresh_hz.max(1) as f64),
            stop_grace: self.render.stop_grace,
            adapter: AdapterSettings {
                min_confidence: self.detector.min_confidence,
                max_detections: self.detector.max_detections,
            },
            display: self.display,
        }
    }
}

fn read_config_file(path: &Path) -> Result<OverlayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
