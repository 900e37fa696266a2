use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::attention::{AttentionPolicy, DebounceConfig};
use crate::capture::CaptureConfig;
use crate::detect::DetectorSettings;
use crate::ingest::CameraConfig;
use crate::server::ServerConfig;

/// Full daemon configuration.
///
/// Layering: compiled defaults, then the JSON file named by `GAZE_CONFIG`
/// (sections and fields may be omitted), then `GAZE_*` environment
/// overrides, then `validate()`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub server: ServerConfig,
    pub camera: CameraConfig,
    pub attention: AttentionPolicy,
    pub debounce: DebounceConfig,
    pub capture: CaptureConfig,
    pub detect: DetectorSettings,
}

impl MonitorConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("GAZE_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Like `load`, with an explicit file in place of `GAZE_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(path) => read_config_file(path)?,
            None => Self::default(),
        };
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env_string("GAZE_SERVER_ADDR") {
            self.server.addr = addr;
        }
        if let Some(url) = env_string("GAZE_CAMERA_URL") {
            self.camera.url = url;
        }
        if let Some(fps) = env_string("GAZE_TARGET_FPS") {
            self.camera.target_fps = fps
                .parse()
                .map_err(|_| anyhow!("GAZE_TARGET_FPS must be a positive integer"))?;
        }
        if let Some(secs) = env_string("GAZE_EARLY_WARNING_SECS") {
            self.debounce.early_warning_secs = secs
                .parse()
                .map_err(|_| anyhow!("GAZE_EARLY_WARNING_SECS must be a number of seconds"))?;
        }
        if let Some(secs) = env_string("GAZE_WARNING_SECS") {
            self.debounce.warning_secs = secs
                .parse()
                .map_err(|_| anyhow!("GAZE_WARNING_SECS must be a number of seconds"))?;
        }
        if let Some(url) = env_string("GAZE_REPORT_URL") {
            self.capture.report_url = Some(url);
        }
        if let Some(dir) = env_string("GAZE_FALLBACK_DIR") {
            self.capture.fallback_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.camera.validate()?;
        self.attention.validate()?;
        self.debounce.validate()?;
        self.capture.validate()?;
        self.detect.validate()?;
        Ok(())
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn read_config_file(path: &Path) -> Result<MonitorConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
