#![forbid(unsafe_code)]

//! Stderr logging for the binary. Library code only uses the `log` macros.

use flexi_logger::{AdaptiveFormat, Logger, LoggerHandle, WriteMode};

pub const LEVELS: &[&str] = &["off", "error", "warn", "info", "debug", "trace"];

#[must_use]
pub fn normalize_level(level: &str) -> Option<&'static str> {
    let wanted = level.trim().to_lowercase();
    LEVELS.iter().copied().find(|l| *l == wanted)
}

/// Starts the global logger. `RUST_LOG` wins over `level` when set.
///
/// Keep the returned handle alive for as long as logs should be written.
pub fn init(level: &str) -> anyhow::Result<LoggerHandle> {
    let level = normalize_level(level)
        .ok_or_else(|| anyhow::anyhow!("unsupported log level '{level}'"))?;
    let handle = Logger::try_with_env_or_str(level)?
        .log_to_stderr()
        .adaptive_format_for_stderr(AdaptiveFormat::Default)
        .write_mode(WriteMode::Direct)
        .start()?;
    Ok(handle)
}
