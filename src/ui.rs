//! Terminal presentation for the binaries: stage spinners, the persistent
//! detection counter and fatal error panels.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use crate::error::PipelineError;
use crate::overlay::{Overlay, OverlaySurface};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum UiMode {
    #[default]
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    fn pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    fn spinner(&self, template: &str) -> Option<ProgressBar> {
        if !self.pretty() {
            return None;
        }
        let spinner = ProgressBar::new_spinner();
        spinner.set_draw_target(ProgressDrawTarget::stderr());
        spinner.enable_steady_tick(Duration::from_millis(120));
        let style = ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        Some(spinner)
    }

    /// Spinner (or a plain line) for a step that finishes when the guard drops.
    pub fn stage(&self, name: &str) -> StageGuard {
        match self.spinner("{spinner} {msg}") {
            Some(spinner) => {
                spinner.set_message(format!("{name}…"));
                StageGuard::new(name.to_string(), Some(spinner))
            }
            None => {
                eprintln!("==> {}", name);
                StageGuard::new(name.to_string(), None)
            }
        }
    }

    /// Surface that keeps the current detection count on screen.
    pub fn counter(&self) -> DetectionCounter {
        DetectionCounter {
            spinner: self.spinner("{spinner} {prefix} {msg}"),
            last: None,
        }
    }

    /// Explain a fatal error in place of the video.
    pub fn fatal(&self, err: &PipelineError) {
        eprintln!("✘ {}", err.user_message());
        eprintln!("  [{}] {}", err.code(), err);
        if err.is_camera_error() {
            eprintln!("  Press Enter to retry the camera, Ctrl-C to quit.");
        }
    }

    /// One-time message for a recoverable failure.
    pub fn notice(&self, err: &PipelineError) {
        eprintln!("! {}", err.user_message());
    }
}

// ----------------------------------------------------------------------------

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    failed: bool,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
            failed: false,
        }
    }

    /// Finish the stage as failed instead of done.
    pub fn fail(mut self) {
        self.failed = true;
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let mark = if self.failed { "✘" } else { "✔" };
        let message = format!(
            "{} {} ({})",
            mark,
            self.name,
            format_duration(self.start.elapsed())
        );
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

// ----------------------------------------------------------------------------

/// Persistent "N objects" indicator, redrawn only when the count changes.
pub struct DetectionCounter {
    spinner: Option<ProgressBar>,
    last: Option<usize>,
}

impl DetectionCounter {
    pub fn last_count(&self) -> Option<usize> {
        self.last
    }
}

impl OverlaySurface for DetectionCounter {
    fn render(&mut self, overlay: &Overlay) {
        let count = overlay.detection_count();
        if self.last == Some(count) {
            return;
        }
        self.last = Some(count);
        let labels: Vec<&str> = overlay.boxes.iter().map(|b| b.caption.as_str()).collect();
        match &self.spinner {
            Some(spinner) => {
                spinner.set_prefix(count_label(count));
                spinner.set_message(labels.join(", "));
            }
            None => eprintln!("[{}] {}", count_label(count), labels.join(", ")),
        }
    }

    fn clear(&mut self) {
        self.last = None;
        if let Some(spinner) = &self.spinner {
            spinner.finish_and_clear();
        }
    }
}

fn count_label(count: usize) -> String {
    match count {
        1 => "1 object".to_string(),
        n => format!("{n} objects"),
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection, DetectionSet};
    use crate::Dimensions;

    #[test]
    fn counter_tracks_count_changes() {
        let ui = Ui::new(UiMode::Plain, false, false);
        let mut counter = ui.counter();
        let native = Dimensions::new(10, 10);

        let one = DetectionSet::new(
            1,
            vec![Detection::new(BoundingBox::new(0.0, 0.0, 2.0, 2.0), "cup", 0.8)],
        );
        counter.render(&Overlay::compose(&one, native, native));
        assert_eq!(counter.last_count(), Some(1));

        counter.render(&Overlay::compose(&DetectionSet::default(), native, native));
        assert_eq!(counter.last_count(), Some(0));

        counter.clear();
        assert_eq!(counter.last_count(), None);
    }

    #[test]
    fn labels_and_durations() {
        assert_eq!(count_label(1), "1 object");
        assert_eq!(count_label(3), "3 objects");
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }
}
