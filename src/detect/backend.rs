use anyhow::Result;
use async_trait::async_trait;

use crate::detect::result::Detection;
use crate::frame::FrameView;

/// A loaded detection model.
///
/// Implementations receive a read-only view of the current frame and return
/// labelled boxes in native pixel coordinates. They must not hold on to the
/// pixel slice beyond the call.
#[async_trait]
pub trait DetectionModel: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &str;

    /// Run detection on a frame.
    async fn detect(&self, frame: FrameView<'_>) -> Result<Vec<Detection>>;
}

/// Loads a `DetectionModel`. Called once per session.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    fn name(&self) -> &str;

    async fn load(&self) -> Result<Box<dyn DetectionModel>>;
}

/// Run CPU-bound inference on the blocking pool so the runtime keeps serving
/// the controller, timers and camera tasks while a model is busy.
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| anyhow::anyhow!("inference task failed: {}", err))?
}
