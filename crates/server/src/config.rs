use std::{fs, path::Path};

use anyhow::Context;
use dataset_api::DEFAULT_MAX_SESSIONS;
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "server.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_bind: String,
    pub max_upload_bytes: usize,
    pub max_sessions: usize,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:5000".into(),
            max_upload_bytes: 16 * 1024 * 1024,
            max_sessions: DEFAULT_MAX_SESSIONS,
            log_filter: "info".into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    bind_addr: Option<String>,
    max_upload_bytes: Option<usize>,
    max_sessions: Option<usize>,
    log_filter: Option<String>,
}

/// Defaults, then `server.toml` in the working directory, then environment.
pub fn load_settings() -> anyhow::Result<Settings> {
    let mut settings = Settings::default();
    if Path::new(DEFAULT_CONFIG_PATH).exists() {
        apply_file(&mut settings, Path::new(DEFAULT_CONFIG_PATH))?;
    }
    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

pub fn apply_file(settings: &mut Settings, path: &Path) -> anyhow::Result<()> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file '{}'", path.display()))?;
    let file_cfg: FileConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file '{}'", path.display()))?;

    if let Some(v) = file_cfg.bind_addr {
        settings.server_bind = v;
    }
    if let Some(v) = file_cfg.max_upload_bytes {
        settings.max_upload_bytes = v;
    }
    if let Some(v) = file_cfg.max_sessions {
        settings.max_sessions = v;
    }
    if let Some(v) = file_cfg.log_filter {
        settings.log_filter = v;
    }
    Ok(())
}

pub fn apply_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("SERVER_BIND") {
        settings.server_bind = v;
    }
    if let Some(v) = lookup("APP__BIND_ADDR") {
        settings.server_bind = v;
    }
    if let Some(v) = lookup("APP__MAX_UPLOAD_BYTES").and_then(|v| v.parse().ok()) {
        settings.max_upload_bytes = v;
    }
    if let Some(v) = lookup("APP__MAX_SESSIONS").and_then(|v| v.parse().ok()) {
        settings.max_sessions = v;
    }
    if let Some(v) = lookup("RUST_LOG") {
        settings.log_filter = v;
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
