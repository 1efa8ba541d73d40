//! demo - end-to-end synthetic run of the live annotation overlay

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use live_overlay::assist::{
    AudioClip, ChatStore, InMemoryChatStore, SpeechEvent, SpeechSynthesizer, Transcriber,
    VisionCompletion, VoiceQuery,
};
use live_overlay::detect::{MotionLoader, StubLoader};
use live_overlay::{
    CameraConstraints, Dimensions, LogSurface, ModelLoader, OverlayPipeline, PipelineSettings,
    SyntheticCamera,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Duration in seconds to run the render loop.
    #[arg(long, default_value_t = 3)]
    seconds: u64,
    /// Frames per second for the synthetic camera.
    #[arg(long, default_value_t = 30)]
    fps: u32,
    /// Render refresh rate in Hz.
    #[arg(long, default_value_t = 60)]
    refresh_hz: u32,
    /// Detector backend: stub or motion.
    #[arg(long, default_value = "stub")]
    backend: String,
    /// Simulated model download time in milliseconds (stub backend).
    #[arg(long, default_value_t = 0)]
    model_delay_ms: u64,
    /// Output directory for the snapshot.
    #[arg(long, default_value = "demo_out")]
    out: String,
    /// Ask a question about the last frame through the voice query flow.
    #[arg(long)]
    ask: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.fps == 0 || args.refresh_hz == 0 {
        return Err(anyhow!("fps and refresh-hz must be >= 1"));
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(args))
}

async fn run(args: Args) -> Result<()> {
    let out_dir = PathBuf::from(&args.out);
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("create output directory {}", out_dir.display()))?;

    let loader: Arc<dyn ModelLoader> = match args.backend.as_str() {
        "stub" => Arc::new(
            StubLoader::new().with_load_delay(Duration::from_millis(args.model_delay_ms)),
        ),
        "motion" => Arc::new(MotionLoader),
        other => return Err(anyhow!("unknown demo backend '{}'", other)),
    };
    let settings = PipelineSettings {
        constraints: CameraConstraints::rear(Dimensions::new(640, 360), args.fps),
        refresh: Duration::from_secs_f64(1.0 / args.refresh_hz as f64),
        display: Some(Dimensions::new(1280, 720)),
        ..PipelineSettings::default()
    };
    let mut pipeline = OverlayPipeline::new(
        Arc::new(SyntheticCamera::new("stub://demo")),
        loader,
        Arc::new(Mutex::new(LogSurface::new())),
        settings,
    );

    stage("start camera + model");
    pipeline.start().await?;

    stage("run render loop");
    tokio::time::sleep(Duration::from_secs(args.seconds) / 2).await;
    // Halfway through the window shrinks; the overlay follows on the next redraw.
    pipeline.resize(Dimensions::new(960, 540));
    tokio::time::sleep(Duration::from_secs(args.seconds) / 2).await;
    println!("status: {}", pipeline.status_message());

    stage("snapshot");
    let snapshot_path = out_dir.join("snapshot.jpg");
    pipeline.snapshot(&snapshot_path)?;
    println!("snapshot: {}", snapshot_path.display());

    if let Some(question) = &args.ask {
        stage("voice query");
        let image = fs::read(&snapshot_path)?;
        let store = InMemoryChatStore::new();
        let chat = store.create_chat("demo").await?;
        let vision = BoardVision {
            objects: pipeline.board().count(),
        };
        let query = VoiceQuery {
            transcriber: &TextTranscriber,
            vision: &vision,
            store: &store,
            speech: &PrintSpeech,
        };
        let clip = AudioClip {
            mime_type: "text/plain".to_string(),
            bytes: question.as_bytes().to_vec(),
        };
        let answer = query.ask(&chat.id, &clip, &image).await?;
        println!("answer: {}", answer.answer);
    }

    stage("stop");
    pipeline.stop().await;
    // Second stop is a no-op.
    pipeline.stop().await;

    let report = pipeline.last_report().unwrap_or_default();
    println!(
        "loop report: cycles={} detect_failures={} discarded={}",
        report.cycles, report.detect_failures, report.discarded
    );
    println!("transitions:");
    for t in pipeline.transitions() {
        println!("  {} -> {}", t.from.name(), t.to.name());
    }
    Ok(())
}

fn stage(msg: &str) {
    println!("==> {}", msg);
}

// ----------------------------------------------------------------------------
// Scripted collaborators
// ----------------------------------------------------------------------------

/// Treats the clip bytes as the already-spoken text.
struct TextTranscriber;

#[async_trait]
impl Transcriber for TextTranscriber {
    async fn transcribe(&self, audio: &AudioClip) -> Result<String> {
        String::from_utf8(audio.bytes.clone()).context("clip is not utf-8 text")
    }
}

/// Answers from the detection count instead of a hosted model.
struct BoardVision {
    objects: usize,
}

#[async_trait]
impl VisionCompletion for BoardVision {
    async fn describe(&self, image: &[u8], prompt: &str) -> Result<String> {
        Ok(format!(
            "'{}': I can see {} highlighted object(s) in a {} byte frame.",
            prompt,
            self.objects,
            image.len()
        ))
    }
}

struct PrintSpeech;

#[async_trait]
impl SpeechSynthesizer for PrintSpeech {
    async fn speak(&self, text: &str, events: mpsc::UnboundedSender<SpeechEvent>) -> Result<()> {
        let _ = events.send(SpeechEvent::Started);
        println!("(speaking) {}", text);
        let _ = events.send(SpeechEvent::Finished);
        Ok(())
    }
}
