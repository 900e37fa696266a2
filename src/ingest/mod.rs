//! Capture devices.
//!
//! - `stub://` synthetic camera driven by a scene script (tests, demos)
//! - V4L2 devices (feature: ingest-v4l2)
//!
//! A device is opened once per session through the `DevicePool`, which
//! enforces exclusive ownership and releases the device when the returned
//! `DeviceLease` is dropped.
//!
//! Devices MUST NOT write frames to disk or log pixel content; evidence
//! persistence belongs to the capture pipeline.

mod pool;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
mod v4l2;

pub use pool::{DeviceBusy, DeviceLease, DevicePool};
pub use synthetic::{Scene, SyntheticCamera};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Camera;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::frame::Frame;

/// Capture device collaborator.
///
/// `open` failure is fatal to the session that asked for the device.
/// `read_frame` failures are transient; callers back off and retry.
pub trait CaptureDevice: Send {
    fn url(&self) -> &str;
    fn open(&mut self) -> Result<()>;
    fn read_frame(&mut self) -> Result<Frame>;
    /// Idempotent.
    fn release(&mut self);
    fn stats(&self) -> CaptureStats;
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    pub url: String,
    pub frames_read: u64,
    pub read_failures: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// `stub://<name>?script=...` or a V4L2 device (`/dev/video0`,
    /// `v4l2:///dev/video0`).
    pub url: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            url: "stub://webcam".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

impl CameraConfig {
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(anyhow!("camera.url must not be empty"));
        }
        if self.target_fps == 0 {
            return Err(anyhow!("camera.target_fps must be positive"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!("camera.width and camera.height must be positive"));
        }
        if self
            .width
            .checked_mul(self.height)
            .and_then(|pixels| pixels.checked_mul(3))
            .is_none()
        {
            return Err(anyhow!(
                "camera.width x camera.height ({}x{}) is too large",
                self.width,
                self.height
            ));
        }
        Ok(())
    }
}

/// Construct (but do not open) the device named by `config.url`.
pub fn open_device(config: &CameraConfig) -> Result<Box<dyn CaptureDevice>> {
    if config.url.starts_with("stub://") {
        Ok(Box::new(SyntheticCamera::new(config)?))
    } else if config.url.starts_with("/dev/") || config.url.starts_with("v4l2://") {
        #[cfg(feature = "ingest-v4l2")]
        {
            Ok(Box::new(V4l2Camera::new(config)))
        }
        #[cfg(not(feature = "ingest-v4l2"))]
        {
            Err(anyhow!("camera {} requires the ingest-v4l2 feature", config.url))
        }
    } else {
        Err(anyhow!("unsupported camera url: {}", config.url))
    }
}
