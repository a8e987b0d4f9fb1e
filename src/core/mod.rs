pub mod batch;
pub mod engine;
pub mod error;
pub mod executor;
pub mod job;
pub mod pool;
pub mod report;
pub mod resources;
pub mod schedule;

use std::path::PathBuf;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn get_config_dir() -> anyhow::Result<PathBuf> {
    dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Failed to get config directory"))
        .map(|p| p.join("corun"))
}

pub fn get_data_dir() -> anyhow::Result<PathBuf> {
    dirs::data_dir()
        .ok_or_else(|| anyhow::anyhow!("Failed to get data directory"))
        .map(|p| p.join("corun"))
}

/// Default directory for per-job logs.
pub fn get_log_dir() -> anyhow::Result<PathBuf> {
    Ok(get_data_dir()?.join("logs"))
}
