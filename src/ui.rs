//! Human-facing output: one-line status messages on stdout and spinner stages on
//! stderr for steps that take a while.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::fmt;
use std::io::IsTerminal;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

/// Prefix of a status line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Glyph {
    Start,
    Search,
    Camera,
    Ok,
    Fail,
    Warn,
}

impl Glyph {
    pub fn symbol(self) -> &'static str {
        match self {
            Glyph::Start => "🚀",
            Glyph::Search => "🔍",
            Glyph::Camera => "🎥",
            Glyph::Ok => "✅",
            Glyph::Fail => "❌",
            Glyph::Warn => "⚠️",
        }
    }
}

impl fmt::Display for Glyph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    /// `--ui plain|pretty|auto`; anything else means auto.
    pub fn from_args(ui_flag: Option<&str>) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, std::io::stderr().is_terminal())
    }

    pub fn status(&self, glyph: Glyph, message: impl fmt::Display) {
        println!("{}", status_line(glyph, message));
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        let use_pretty = self.is_tty
            && match self.mode {
                UiMode::Pretty | UiMode::Auto => true,
                UiMode::Plain => false,
            };

        if use_pretty {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }
}

pub fn status_line(glyph: Glyph, message: impl fmt::Display) -> String {
    format!("{} {}", glyph, message)
}

/// Prints the stage outcome when dropped. A stage that is dropped without
/// `finish_ok` is reported as failed.
pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    succeeded: bool,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
            succeeded: false,
        }
    }

    pub fn finish_ok(mut self) {
        self.succeeded = true;
    }

    fn outcome_line(&self) -> String {
        let elapsed = format_duration(self.start.elapsed());
        if self.succeeded {
            format!("✔ {} ({})", self.name, elapsed)
        } else {
            format!("✖ {} failed ({})", self.name, elapsed)
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let message = self.outcome_line();
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
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

    #[test]
    fn status_lines_lead_with_glyph() {
        assert_eq!(status_line(Glyph::Ok, "Camera 0 is working"), "✅ Camera 0 is working");
        assert_eq!(status_line(Glyph::Fail, 1), "❌ 1");
    }

    #[test]
    fn durations_switch_units_at_one_second() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }

    #[test]
    fn plain_stage_finishes_without_tty() {
        let ui = Ui::new(UiMode::Pretty, false);
        ui.stage("export").finish_ok();
    }

    #[test]
    fn stage_dropped_without_finish_reports_failure() {
        let mut stage = StageGuard::new("prepare model".to_string(), None);
        assert!(stage.outcome_line().starts_with("✖ prepare model failed"));
        stage.succeeded = true;
        assert!(stage.outcome_line().starts_with("✔ prepare model ("));
    }
}
