//! Tracing and log-file setup shared by the worker binary.

use std::path::PathBuf;

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init(settings: &LogSettings) -> std::io::Result<()> {
    tracing::init(settings)
}

/// Logging knobs resolved from configuration.
#[derive(Debug, Clone)]
pub struct LogSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Optional append-only log file in addition to stdout.
    pub file: Option<PathBuf>,
    /// Size at which the log file is truncated.
    pub max_file_bytes: u64,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_file_bytes: rotating::DEFAULT_MAX_BYTES,
        }
    }
}

/// Size-capped log file writer.
pub mod rotating;

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use rotating::SizeCappedFile;
