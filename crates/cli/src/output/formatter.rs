//! Output formatter for human-readable and JSON output
//!
//! Every command prints through a [`Formatter`] so `--json`, `--quiet` and
//! `--no-color` behave the same everywhere.

use console::Style;
use serde::Serialize;
use xfer_core::TaskState;

use super::OutputConfig;

/// Color theme for styled output
#[derive(Debug, Clone)]
pub struct Theme {
    /// Locators - cyan
    pub locator: Style,
    /// Sizes - green
    pub size: Style,
    /// Timestamps - dim
    pub date: Style,
    /// Table headers and labels - bold
    pub label: Style,
    pub success: Style,
    pub error: Style,
    pub warning: Style,
    /// Skipped and cancelled tasks - dim
    pub muted: Style,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            locator: Style::new().cyan(),
            size: Style::new().green(),
            date: Style::new().dim(),
            label: Style::new().bold(),
            success: Style::new().green(),
            error: Style::new().red(),
            warning: Style::new().yellow(),
            muted: Style::new().dim(),
        }
    }
}

impl Theme {
    /// Returns a theme with no styling (for no-color mode)
    pub fn plain() -> Self {
        Self {
            locator: Style::new(),
            size: Style::new(),
            date: Style::new(),
            label: Style::new(),
            success: Style::new(),
            error: Style::new(),
            warning: Style::new(),
            muted: Style::new(),
        }
    }
}

/// Formatter for CLI output
///
/// When JSON mode is enabled, stdout carries only JSON documents.
#[derive(Debug, Clone)]
pub struct Formatter {
    config: OutputConfig,
    theme: Theme,
}

impl Formatter {
    pub fn new(config: OutputConfig) -> Self {
        let theme = if config.no_color || config.json {
            Theme::plain()
        } else {
            Theme::default()
        };
        Self { config, theme }
    }

    pub fn is_json(&self) -> bool {
        self.config.json
    }

    /// Whether an interactive progress bar may be drawn
    pub fn show_progress(&self) -> bool {
        !self.config.quiet && !self.config.json
    }

    // ========== Style helper methods ==========

    pub fn style_locator(&self, text: &str) -> String {
        self.theme.locator.apply_to(text).to_string()
    }

    pub fn style_size(&self, bytes: u64) -> String {
        let text = humansize::format_size(bytes, humansize::BINARY);
        self.theme.size.apply_to(text).to_string()
    }

    pub fn style_date(&self, text: &str) -> String {
        self.theme.date.apply_to(text).to_string()
    }

    pub fn style_label(&self, text: &str) -> String {
        self.theme.label.apply_to(text).to_string()
    }

    /// Fixed-width status column for a task outcome
    pub fn style_state(&self, state: TaskState) -> String {
        let (text, style) = match state {
            TaskState::Succeeded => ("copied", &self.theme.success),
            TaskState::Skipped => ("skipped", &self.theme.muted),
            TaskState::Cancelled => ("cancelled", &self.theme.warning),
            TaskState::Failed(_) => ("failed", &self.theme.error),
            TaskState::Pending => ("pending", &self.theme.muted),
            TaskState::InFlight => ("running", &self.theme.muted),
        };
        style.apply_to(format!("{text:<9}")).to_string()
    }

    // ========== Output methods ==========

    /// Output a success message
    pub fn success(&self, message: &str) {
        if self.config.quiet || self.config.json {
            return;
        }

        let checkmark = self.theme.success.apply_to("✓");
        println!("{checkmark} {message}");
    }

    /// Output an error message
    ///
    /// Errors are always printed, even in quiet mode.
    pub fn error(&self, message: &str) {
        if self.config.json {
            let error = serde_json::json!({
                "error": message
            });
            eprintln!(
                "{}",
                serde_json::to_string_pretty(&error).unwrap_or_else(|_| message.to_string())
            );
        } else {
            let cross = self.theme.error.apply_to("✗");
            eprintln!("{cross} {message}");
        }
    }

    pub fn warning(&self, message: &str) {
        if self.config.quiet || self.config.json {
            return;
        }

        let warn_icon = self.theme.warning.apply_to("⚠");
        eprintln!("{warn_icon} {message}");
    }

    /// Output a JSON document, regardless of quiet mode
    pub fn json<T: Serialize>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Error serializing output: {e}"),
        }
    }

    /// Print a line of text (respects quiet mode)
    pub fn println(&self, message: &str) {
        if self.config.quiet {
            return;
        }
        println!("{message}");
    }
}

impl Default for Formatter {
    fn default() -> Self {
        Self::new(OutputConfig::default())
    }
}
