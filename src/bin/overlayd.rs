//! overlayd - live annotation overlay daemon
//!
//! This daemon:
//! 1. Loads configuration (OVERLAY_CONFIG file, defaults, OVERLAY_* env)
//! 2. Opens the camera and loads the detection model in parallel
//! 3. Runs the render loop, keeping a detection counter on stderr
//! 4. On a camera failure, explains it and retries the camera on Enter
//! 5. Stops on Ctrl-C, optionally writing an annotated snapshot first

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};

use live_overlay::config::OverlayConfig;
use live_overlay::ui::{Ui, UiMode};
use live_overlay::{LoopState, OverlayPipeline};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Camera url or device path (overrides camera.url).
    #[arg(long)]
    camera: Option<String>,
    /// Detector backend (overrides detector.backend).
    #[arg(long)]
    backend: Option<String>,
    /// Write an annotated JPEG of the last frame here on exit.
    #[arg(long)]
    snapshot: Option<PathBuf>,
    /// UI mode for stderr progress.
    #[arg(long, value_enum, default_value_t = UiMode::Auto)]
    ui: UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(args))
}

async fn run(args: Args) -> Result<()> {
    let mut cfg = OverlayConfig::load()?;
    if let Some(camera) = args.camera {
        cfg.camera.url = camera;
    }
    if let Some(backend) = args.backend {
        cfg.detector.backend = backend.trim().to_lowercase();
    }

    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = Ui::new(args.ui, is_tty, !stdout_is_tty);

    let camera = cfg.camera_device()?;
    let loader = cfg.model_loader()?;
    log::info!(
        "overlayd: camera={}, backend={}, refresh={}Hz",
        camera.name(),
        loader.name(),
        cfg.render.refresh_hz
    );

    let counter = Arc::new(Mutex::new(ui.counter()));
    let mut pipeline = OverlayPipeline::new(camera, loader, counter, cfg.pipeline_settings());

    let stage = ui.stage("start camera + model");
    let started = tokio::select! {
        result = pipeline.start() => result,
        _ = tokio::signal::ctrl_c() => {
            stage.fail();
            pipeline.stop().await;
            return Ok(());
        }
    };
    match started {
        Ok(()) => drop(stage),
        Err(_) => stage.fail(),
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let outcome = loop {
        match pipeline.state() {
            LoopState::Failed(err) if err.is_camera_error() => {
                ui.fatal(&err);
                tokio::select! {
                    line = stdin.next_line() => match line {
                        Ok(Some(_)) => {
                            let stage = ui.stage("retry camera");
                            if pipeline.retry_camera().await.is_err() {
                                stage.fail();
                            }
                        }
                        // stdin closed: nobody can press retry.
                        _ => break Err(anyhow!("{}", err.user_message())),
                    },
                    _ = tokio::signal::ctrl_c() => break Ok(()),
                }
            }
            LoopState::Failed(err) => {
                ui.fatal(&err);
                break Err(anyhow!("{}", err.user_message()));
            }
            _ => {
                tokio::signal::ctrl_c().await?;
                break Ok(());
            }
        }
    };

    if let Some(path) = &args.snapshot {
        if pipeline.snapshot(path).is_err() {
            if let Some(notice) = pipeline.take_notice() {
                ui.notice(&notice);
            }
        }
    }

    let stage = ui.stage("stop");
    pipeline.stop().await;
    drop(stage);
    if let Some(report) = pipeline.last_report() {
        log::info!(
            "overlayd: {} cycles, {} detection failures",
            report.cycles,
            report.detect_failures
        );
    }
    outcome
}
