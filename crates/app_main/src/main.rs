//! MediaSift - Media triage browser
//!
//! Headless entry point: browse a folder from the command line.

mod app;

use anyhow::Result;
use std::path::PathBuf;

fn main() -> Result<()> {
    // Initialize logging and panic hook first
    let _log_guard = app_log::init()?;

    // Clean up old logs (7 days)
    if let Err(e) = app_log::cleanup_old_logs(7) {
        tracing::warn!("Failed to cleanup old logs: {}", e);
    }

    tracing::info!("MediaSift starting...");

    // Load configuration
    let config = app_core::AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!("Ignoring unreadable configuration: {}", e);
        app_core::AppConfig::default()
    });

    let session = app_core::init(config)?;

    let start = match std::env::args_os().nth(1) {
        Some(arg) => PathBuf::from(arg),
        None => std::env::current_dir()?,
    };

    app::run(session, start)
}
