use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use live_overlay::detect::StubLoader;
use live_overlay::{
    frame_channel, BoundingBox, CameraConstraints, CameraDevice, CameraStream, Detection,
    DetectionModel, Dimensions, FrameSink, FrameView, LoopState, ModelLoader, ModelState, Overlay,
    OverlayPipeline, OverlaySurface, PipelineError, PipelineSettings, StreamTracks, VideoFrame,
};

// ----------------------------------------------------------------------------
// Scripted camera
// ----------------------------------------------------------------------------

#[derive(Default)]
struct ScriptedCamera {
    failures: Mutex<VecDeque<PipelineError>>,
    acquires: AtomicUsize,
    releases: Arc<AtomicUsize>,
    acquire_delay: Duration,
}

impl ScriptedCamera {
    fn failing_first(err: PipelineError) -> Self {
        let camera = Self::default();
        camera.failures.lock().unwrap().push_back(err);
        camera
    }
}

struct CountingTracks {
    releases: Arc<AtomicUsize>,
    _sink: FrameSink,
}

impl StreamTracks for CountingTracks {
    fn stop(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CameraDevice for ScriptedCamera {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn acquire(&self, _c: &CameraConstraints) -> Result<CameraStream, PipelineError> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        if !self.acquire_delay.is_zero() {
            tokio::time::sleep(self.acquire_delay).await;
        }
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let (sink, frames) = frame_channel();
        sink.publish(VideoFrame::new(vec![0u8; 64 * 48 * 3], 64, 48, 1).unwrap());
        Ok(CameraStream::new(
            "scripted",
            frames,
            Box::new(CountingTracks {
                releases: Arc::clone(&self.releases),
                _sink: sink,
            }),
        ))
    }
}

// ----------------------------------------------------------------------------
// Scripted model
// ----------------------------------------------------------------------------

#[derive(Default)]
struct ModelScript {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
    fail_calls: HashSet<usize>,
}

impl ModelScript {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

struct ScriptedModel(Arc<ModelScript>);

#[async_trait]
impl DetectionModel for ScriptedModel {
    fn name(&self) -> &str {
        "script"
    }

    async fn detect(&self, _frame: FrameView<'_>) -> Result<Vec<Detection>> {
        let script = &self.0;
        let call = script.calls.fetch_add(1, Ordering::SeqCst);
        let now = script.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        script.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }
        script.in_flight.fetch_sub(1, Ordering::SeqCst);
        if script.fail_calls.contains(&call) {
            return Err(anyhow!("scripted failure on call {}", call));
        }
        Ok(vec![Detection::new(
            BoundingBox::new(8.0, 8.0, 16.0, 16.0),
            "object",
            0.9,
        )])
    }
}

struct ScriptedLoader {
    script: Arc<ModelScript>,
    loads: AtomicUsize,
    fail: bool,
}

impl ScriptedLoader {
    fn new(script: ModelScript) -> Self {
        Self {
            script: Arc::new(script),
            loads: AtomicUsize::new(0),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(ModelScript::default())
        }
    }
}

#[async_trait]
impl ModelLoader for ScriptedLoader {
    fn name(&self) -> &str {
        "script"
    }

    async fn load(&self) -> Result<Box<dyn DetectionModel>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        if self.fail {
            return Err(anyhow!("weights missing"));
        }
        Ok(Box::new(ScriptedModel(Arc::clone(&self.script))))
    }
}

// ----------------------------------------------------------------------------
// Recording surface
// ----------------------------------------------------------------------------

#[derive(Default)]
struct Recorder {
    counts: Vec<usize>,
    displays: Vec<Dimensions>,
}

impl OverlaySurface for Recorder {
    fn render(&mut self, overlay: &Overlay) {
        self.counts.push(overlay.detection_count());
        self.displays.push(overlay.display);
    }
}

struct Harness {
    camera: Arc<ScriptedCamera>,
    loader: Arc<ScriptedLoader>,
    recorder: Arc<Mutex<Recorder>>,
    pipeline: OverlayPipeline,
}

fn harness(camera: ScriptedCamera, loader: ScriptedLoader, settings: PipelineSettings) -> Harness {
    let camera = Arc::new(camera);
    let loader = Arc::new(loader);
    let recorder = Arc::new(Mutex::new(Recorder::default()));
    let pipeline = OverlayPipeline::new(
        camera.clone(),
        loader.clone(),
        recorder.clone(),
        settings,
    );
    Harness {
        camera,
        loader,
        recorder,
        pipeline,
    }
}

fn settings(refresh_ms: u64) -> PipelineSettings {
    PipelineSettings {
        refresh: Duration::from_millis(refresh_ms),
        ..PipelineSettings::default()
    }
}

// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn loop_starts_automatically_within_one_tick() {
    let mut h = harness(
        ScriptedCamera::default(),
        ScriptedLoader::new(ModelScript::default()),
        settings(16),
    );
    h.pipeline.start().await.unwrap();
    assert_eq!(h.pipeline.state(), LoopState::Running);

    tokio::time::sleep(Duration::from_millis(16)).await;
    assert!(h.loader.script.calls() >= 1);
    assert_eq!(h.pipeline.status().detection_count, 1);
}

#[tokio::test(start_paused = true)]
async fn never_more_than_one_detect_in_flight() {
    let script = ModelScript {
        delay: Duration::from_millis(50),
        ..ModelScript::default()
    };
    let mut h = harness(ScriptedCamera::default(), ScriptedLoader::new(script), settings(10));
    h.pipeline.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    h.pipeline.stop().await;

    let script = &h.loader.script;
    assert_eq!(script.max_in_flight.load(Ordering::SeqCst), 1);
    // Stale ticks are dropped, not queued: at most one call per detection delay.
    assert!(script.calls() >= 5, "calls = {}", script.calls());
    assert!(script.calls() <= 11, "calls = {}", script.calls());
}

#[tokio::test(start_paused = true)]
async fn detection_failure_draws_empty_and_loop_recovers() {
    let script = ModelScript {
        fail_calls: HashSet::from([1]),
        ..ModelScript::default()
    };
    let mut h = harness(ScriptedCamera::default(), ScriptedLoader::new(script), settings(10));
    h.pipeline.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.pipeline.stop().await;

    let counts = h.recorder.lock().unwrap().counts.clone();
    assert_eq!(&counts[..3], &[1, 0, 1]);
    assert!(counts[3..].iter().all(|&c| c == 1));
    assert_eq!(h.pipeline.last_report().unwrap().detect_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn stop_twice_releases_camera_once() {
    let mut h = harness(
        ScriptedCamera::default(),
        ScriptedLoader::new(ModelScript::default()),
        settings(16),
    );
    h.pipeline.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;

    assert!(h.pipeline.stop().await);
    assert!(!h.pipeline.stop().await);
    assert_eq!(h.camera.releases.load(Ordering::SeqCst), 1);
    assert_eq!(h.pipeline.state(), LoopState::Stopped);

    // Nothing draws after stop.
    let drawn = h.recorder.lock().unwrap().counts.len();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.recorder.lock().unwrap().counts.len(), drawn);
}

#[tokio::test(start_paused = true)]
async fn model_failure_never_arms_or_detects() {
    let mut h = harness(ScriptedCamera::default(), ScriptedLoader::failing(), settings(10));
    let err = h.pipeline.start().await.unwrap_err();
    assert!(matches!(err, PipelineError::ModelLoadFailure(_)));
    assert!(matches!(h.pipeline.state(), LoopState::Failed(_)));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.loader.script.calls(), 0);
    assert!(h.recorder.lock().unwrap().counts.is_empty());
    assert_eq!(h.camera.releases.load(Ordering::SeqCst), 1);
    assert!(h.pipeline.transitions().all(|t| t.to != LoopState::Armed));

    // No automatic or camera-only path reloads the model.
    assert!(h.pipeline.retry_camera().await.is_err());
    assert_eq!(h.loader.loads.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn permission_denied_then_retry_reacquires_only_camera() {
    let camera = ScriptedCamera::failing_first(PipelineError::PermissionDenied("denied".into()));
    let mut h = harness(camera, ScriptedLoader::new(ModelScript::default()), settings(16));

    let err = h.pipeline.start().await.unwrap_err();
    assert!(matches!(err, PipelineError::PermissionDenied(_)));
    assert!(h.pipeline.status_message().starts_with("Camera permission denied"));
    assert!(!h.pipeline.video_available());

    h.pipeline.retry_camera().await.unwrap();
    assert_eq!(h.pipeline.state(), LoopState::Running);
    assert!(h.pipeline.video_available());
    assert_eq!(h.camera.acquires.load(Ordering::SeqCst), 2);
    assert_eq!(h.loader.loads.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(32)).await;
    assert!(h.loader.script.calls() >= 1);
}

#[tokio::test(start_paused = true)]
async fn in_flight_detection_after_stop_is_discarded() {
    let script = ModelScript {
        delay: Duration::from_millis(200),
        ..ModelScript::default()
    };
    let mut h = harness(ScriptedCamera::default(), ScriptedLoader::new(script), settings(10));
    h.pipeline.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.loader.script.calls(), 1);

    h.pipeline.stop().await;
    let report = h.pipeline.last_report().unwrap();
    assert_eq!(report.discarded, 1);
    assert_eq!(report.cycles, 0);
    assert!(h.recorder.lock().unwrap().counts.is_empty());
    assert_eq!(h.pipeline.board().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn stop_grace_bounds_teardown() {
    let script = ModelScript {
        delay: Duration::from_secs(60),
        ..ModelScript::default()
    };
    let settings = PipelineSettings {
        stop_grace: Duration::from_millis(100),
        ..settings(10)
    };
    let mut h = harness(ScriptedCamera::default(), ScriptedLoader::new(script), settings);
    h.pipeline.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let before = tokio::time::Instant::now();
    assert!(h.pipeline.stop().await);
    assert!(before.elapsed() < Duration::from_secs(1));
    assert!(h.pipeline.last_report().is_none());
    assert_eq!(h.camera.releases.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn starting_again_tears_down_previous_session() {
    let mut h = harness(
        ScriptedCamera::default(),
        ScriptedLoader::new(ModelScript::default()),
        settings(16),
    );
    h.pipeline.start().await.unwrap();
    h.pipeline.start().await.unwrap();

    assert_eq!(h.camera.acquires.load(Ordering::SeqCst), 2);
    assert_eq!(h.camera.releases.load(Ordering::SeqCst), 1);
    assert_eq!(h.loader.loads.load(Ordering::SeqCst), 2);
    assert!(h.pipeline.is_running());

    drop(h.pipeline);
    assert_eq!(h.camera.releases.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn display_size_follows_resize() {
    let settings = PipelineSettings {
        display: Some(Dimensions::new(128, 96)),
        ..settings(10)
    };
    let mut h = harness(
        ScriptedCamera::default(),
        ScriptedLoader::new(ModelScript::default()),
        settings,
    );
    h.pipeline.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(25)).await;
    h.pipeline.resize(Dimensions::new(32, 24));
    tokio::time::sleep(Duration::from_millis(25)).await;
    h.pipeline.stop().await;

    let displays = h.recorder.lock().unwrap().displays.clone();
    assert_eq!(displays.first(), Some(&Dimensions::new(128, 96)));
    assert_eq!(displays.last(), Some(&Dimensions::new(32, 24)));

    let dir = tempfile::tempdir().unwrap();
    // Stopped pipelines have no frame to export.
    assert!(h.pipeline.snapshot(&dir.path().join("late.jpg")).is_err());
}

#[tokio::test(start_paused = true)]
async fn camera_and_model_load_concurrently() {
    let camera = Arc::new(ScriptedCamera {
        acquire_delay: Duration::from_millis(80),
        ..ScriptedCamera::default()
    });
    let loader = StubLoader::new()
        .with_label("square")
        .with_load_delay(Duration::from_millis(100));
    let recorder = Arc::new(Mutex::new(Recorder::default()));
    let mut pipeline =
        OverlayPipeline::new(camera.clone(), Arc::new(loader), recorder, settings(10));

    let started = tokio::time::Instant::now();
    pipeline.start().await.unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(100), "start took {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(180), "start took {:?}", elapsed);
    assert_eq!(pipeline.state(), LoopState::Running);
    assert_eq!(camera.acquires.load(Ordering::SeqCst), 1);

    let ModelState::Loaded(adapter) = pipeline.model_state() else {
        panic!("model not loaded");
    };
    let mut pixels = vec![0u8; 32 * 24 * 3];
    for y in 4..12 {
        for x in 8..16 {
            let offset = (y * 32 + x) * 3;
            pixels[offset..offset + 3].copy_from_slice(&[255, 255, 255]);
        }
    }
    let frame = VideoFrame::new(pixels, 32, 24, 1).unwrap();
    let detections = adapter.detect(frame.view()).await.unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].label, "square");

    pipeline.stop().await;
}
