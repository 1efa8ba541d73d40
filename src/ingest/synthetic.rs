//! Synthetic camera.
//!
//! `stub://` urls open a generated scene instead of a device: a bright square
//! bouncing across a dark background at the requested frame rate. A few hosts
//! simulate acquisition failures:
//! - `stub://denied`: permission denied
//! - `stub://absent`: no such device
//! - `stub://busy`: device in use

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{frame_channel, CameraConstraints, CameraDevice, CameraStream, StreamTracks};
use crate::error::PipelineError;
use crate::frame::{VideoFrame, RGB_CHANNELS};
use crate::Dimensions;

const BACKGROUND: u8 = 16;
const FOREGROUND: u8 = 235;
/// Horizontal movement of the square per frame, in pixels.
const STEP_PX: u32 = 8;

/// Camera backed by a generated scene.
#[derive(Clone, Debug)]
pub struct SyntheticCamera {
    url: String,
}

impl SyntheticCamera {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    fn host(&self) -> &str {
        let rest = self.url.strip_prefix("stub://").unwrap_or(&self.url);
        rest.split(['/', '?']).next().unwrap_or_default()
    }

    fn scripted_failure(&self) -> Option<PipelineError> {
        let detail = format!("{} (synthetic)", self.url);
        match self.host() {
            "denied" => Some(PipelineError::PermissionDenied(detail)),
            "absent" => Some(PipelineError::DeviceNotFound(detail)),
            "busy" => Some(PipelineError::OtherAcquisitionFailure(detail)),
            _ => None,
        }
    }
}

#[async_trait]
impl CameraDevice for SyntheticCamera {
    fn name(&self) -> &str {
        &self.url
    }

    async fn acquire(
        &self,
        constraints: &CameraConstraints,
    ) -> Result<CameraStream, PipelineError> {
        if let Some(err) = self.scripted_failure() {
            log::warn!("SyntheticCamera: {} refused: {}", self.url, err);
            return Err(err);
        }
        let mut scene = SyntheticScene::new(constraints.ideal).map_err(|err| {
            PipelineError::OtherAcquisitionFailure(format!("{}: {:#}", self.url, err))
        })?;

        let (sink, frames) = frame_channel();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let period = Duration::from_secs_f64(1.0 / constraints.target_fps.max(1) as f64);
        let url = self.url.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        match scene.next_frame() {
                            Ok(frame) => {
                                if !sink.publish(frame) {
                                    break;
                                }
                            }
                            Err(err) => {
                                log::warn!("SyntheticCamera: {} frame generation failed: {:#}", url, err);
                                break;
                            }
                        }
                    }
                }
            }
        });

        log::info!(
            "SyntheticCamera: connected to {} ({}, {} fps)",
            self.url,
            constraints.ideal,
            constraints.target_fps
        );
        Ok(CameraStream::new(
            self.url.clone(),
            frames,
            Box::new(SyntheticTracks {
                shutdown: shutdown_tx,
                task: Some(task),
            }),
        ))
    }
}

struct SyntheticTracks {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl StreamTracks for SyntheticTracks {
    fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ----------------------------------------------------------------------------
// Scene generation
// ----------------------------------------------------------------------------

/// Dark frame with one bright square moving left and right.
pub(crate) struct SyntheticScene {
    dimensions: Dimensions,
    side: u32,
    frame_count: u64,
}

impl SyntheticScene {
    pub(crate) fn new(dimensions: Dimensions) -> Result<Self> {
        if dimensions.is_empty() {
            anyhow::bail!("synthetic scene needs non-zero dimensions, got {dimensions}");
        }
        Ok(Self {
            dimensions,
            side: (dimensions.width.min(dimensions.height) / 5).max(1),
            frame_count: 0,
        })
    }

    /// Top-left corner of the square for the current frame.
    pub(crate) fn square_origin(&self) -> (u32, u32) {
        let travel = self.dimensions.width.saturating_sub(self.side);
        let y = (self.dimensions.height - self.side) / 2;
        if travel == 0 {
            return (0, y);
        }
        let period = 2 * travel as u64;
        let pos = (self.frame_count * STEP_PX as u64) % period;
        let x = if pos <= travel as u64 {
            pos
        } else {
            period - pos
        };
        (x as u32, y)
    }

    pub(crate) fn side(&self) -> u32 {
        self.side
    }

    pub(crate) fn next_frame(&mut self) -> Result<VideoFrame> {
        self.frame_count += 1;
        let (w, h) = (self.dimensions.width as usize, self.dimensions.height as usize);
        let mut pixels = vec![BACKGROUND; w * h * RGB_CHANNELS];

        let (x0, y0) = self.square_origin();
        let (x0, y0, side) = (x0 as usize, y0 as usize, self.side as usize);
        for row in pixels.chunks_exact_mut(w * RGB_CHANNELS).skip(y0).take(side) {
            row[x0 * RGB_CHANNELS..(x0 + side) * RGB_CHANNELS].fill(FOREGROUND);
        }

        VideoFrame::new(
            pixels,
            self.dimensions.width,
            self.dimensions.height,
            self.frame_count,
        )
    }
}
