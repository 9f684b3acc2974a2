//! Output formatting for human and JSON modes

mod formatter;
mod progress;

pub use formatter::Formatter;
pub use progress::TransferProgress;

/// Global output switches shared by every command
#[derive(Debug, Clone, Default)]
pub struct OutputConfig {
    /// Strict JSON on stdout, no colors or progress
    pub json: bool,
    pub no_color: bool,
    /// Suppress everything but errors
    pub quiet: bool,
}
