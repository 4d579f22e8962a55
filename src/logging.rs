//! Log setup
//!
//! The console is in raw mode while a session runs, so logs never go to the
//! terminal: either to a file or nowhere.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::FmtSubscriber;

/// Install the global subscriber. Logs go to `path` in append mode at INFO,
/// overridable with `RUST_LOG`. With no path, nothing is installed and
/// events are discarded.
///
/// Returns `Ok(false)` when a subscriber was already installed.
pub fn init(path: Option<&Path>) -> anyhow::Result<bool> {
    let Some(path) = path else {
        return Ok(false);
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .finish();

    Ok(tracing::subscriber::set_global_default(subscriber).is_ok())
}
