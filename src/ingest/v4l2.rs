//! V4L2 camera.
//!
//! Opens a local device node (e.g. `/dev/video0`) and captures on a dedicated
//! thread, publishing each decoded frame into the stream's latest-frame
//! channel. Open failures are classified from the OS error: `EACCES` is a
//! permission denial, `ENOENT` a missing device, anything else a generic
//! acquisition failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use async_trait::async_trait;
use ouroboros::self_referencing;
use tokio::sync::oneshot;

use super::normalize::{to_rgb, PixelFormat};
use super::{frame_channel, CameraConstraints, CameraDevice, CameraStream, FrameSink, StreamTracks};
use crate::error::PipelineError;
use crate::frame::VideoFrame;

/// Consecutive capture errors tolerated before the capture thread gives up.
const MAX_CAPTURE_ERRORS: u32 = 10;

/// Configuration for a V4L2 camera.
#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device path (e.g., "/dev/video0")
    pub device: String,
    /// Number of mmap buffers.
    pub buffers: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            buffers: 4,
        }
    }
}

pub struct V4l2Camera {
    config: V4l2Config,
}

impl V4l2Camera {
    pub fn new(config: V4l2Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CameraDevice for V4l2Camera {
    fn name(&self) -> &str {
        &self.config.device
    }

    async fn acquire(
        &self,
        constraints: &CameraConstraints,
    ) -> Result<CameraStream, PipelineError> {
        let (sink, frames) = frame_channel();
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = oneshot::channel();

        let config = self.config.clone();
        let constraints = constraints.clone();
        let thread_stop = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name(format!("v4l2:{}", self.config.device))
            .spawn(move || run_capture(config, constraints, sink, thread_stop, ready_tx))
            .map_err(|err| {
                PipelineError::OtherAcquisitionFailure(format!(
                    "{}: spawn capture thread: {}",
                    self.config.device, err
                ))
            })?;

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                return Err(PipelineError::OtherAcquisitionFailure(format!(
                    "{}: capture thread exited during open",
                    self.config.device
                )))
            }
        }

        Ok(CameraStream::new(
            self.config.device.clone(),
            frames,
            Box::new(V4l2Tracks {
                stop,
                thread: Some(thread),
            }),
        ))
    }
}

struct V4l2Tracks {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl StreamTracks for V4l2Tracks {
    fn stop(&mut self) {
        // Wait for the in-progress dequeue so the device is closed on return
        // and can be reopened right away.
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("V4l2Camera: capture thread panicked");
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Capture thread
// ----------------------------------------------------------------------------

fn run_capture(
    config: V4l2Config,
    constraints: CameraConstraints,
    sink: FrameSink,
    stop: Arc<AtomicBool>,
    ready: oneshot::Sender<Result<(), PipelineError>>,
) {
    let mut capture = match DeviceCapture::open(&config, &constraints) {
        Ok(capture) => capture,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }

    let mut errors = 0u32;
    while !stop.load(Ordering::SeqCst) {
        match capture.next_frame() {
            Ok(frame) => {
                errors = 0;
                if !sink.publish(frame) {
                    break;
                }
            }
            Err(err) => {
                errors += 1;
                log::warn!("V4l2Camera: capture on {} failed: {:#}", config.device, err);
                if errors >= MAX_CAPTURE_ERRORS {
                    log::error!(
                        "V4l2Camera: {} failed {} times in a row, closing",
                        config.device,
                        errors
                    );
                    break;
                }
            }
        }
    }
    log::info!("V4l2Camera: {} closed after {} frames", config.device, capture.frame_count);
}

#[self_referencing]
struct DeviceStream {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

struct DeviceCapture {
    stream: DeviceStream,
    format: PixelFormat,
    width: u32,
    height: u32,
    frame_count: u64,
}

impl DeviceCapture {
    fn open(config: &V4l2Config, constraints: &CameraConstraints) -> Result<Self, PipelineError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device = v4l::Device::with_path(&config.device)
            .map_err(|err| PipelineError::from_device_io(&config.device, &err))?;
        let other = |what: &str, err: std::io::Error| {
            PipelineError::OtherAcquisitionFailure(format!("{}: {}: {}", config.device, what, err))
        };

        let mut format = device.format().map_err(|err| other("read format", err))?;
        format.width = constraints.ideal.width;
        format.height = constraints.ideal.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");
        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Camera: failed to set format on {}: {}", config.device, err);
                device
                    .format()
                    .map_err(|err| other("read format after set failure", err))?
            }
        };
        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            PipelineError::OtherAcquisitionFailure(format!(
                "{}: unsupported pixel format {}",
                config.device, format.fourcc
            ))
        })?;

        if constraints.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(constraints.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Camera: failed to set fps on {}: {}", config.device, err);
            }
        }

        let stream = DeviceStreamTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, config.buffers)
            },
        }
        .try_build()
        .map_err(|err| other("create buffer stream", err))?;

        log::info!(
            "V4l2Camera: connected to {} ({}x{}, {:?})",
            config.device,
            format.width,
            format.height,
            pixel_format
        );
        Ok(Self {
            stream,
            format: pixel_format,
            width: format.width,
            height: format.height,
            frame_count: 0,
        })
    }

    fn next_frame(&mut self) -> Result<VideoFrame> {
        use v4l::io::traits::CaptureStream;

        let raw = self
            .stream
            .with_stream_mut(|stream| stream.next().map(|(buf, _meta)| buf.to_vec()))
            .context("capture v4l2 frame")?;
        let rgb = to_rgb(&raw, self.width, self.height, self.format)?;
        self.frame_count += 1;
        VideoFrame::new(rgb, self.width, self.height, self.frame_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn stop_returns_after_capture_thread_has_exited() {
        let stop = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));
        let thread = {
            let stop = Arc::clone(&stop);
            let closed = Arc::clone(&closed);
            std::thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    // Stands in for a blocking dequeue.
                    std::thread::sleep(Duration::from_millis(20));
                }
                closed.store(true, Ordering::SeqCst);
            })
        };

        let mut tracks = V4l2Tracks {
            stop,
            thread: Some(thread),
        };
        tracks.stop();
        assert!(closed.load(Ordering::SeqCst));
        assert!(tracks.thread.is_none());
    }
}
