//! V4L2 webcam (feature: ingest-v4l2).
//!
//! Requests RGB24 at the configured size and rate. The driver may adjust the
//! size, but a device that will not deliver RGB24 fails to open.

use anyhow::{bail, Context, Result};
use ouroboros::self_referencing;

use crate::frame::Frame;
use crate::ingest::{CameraConfig, CaptureDevice, CaptureStats};

pub struct V4l2Camera {
    url: String,
    path: String,
    target_fps: u32,
    width: u32,
    height: u32,
    state: Option<StreamState>,
    frames_read: u64,
    read_failures: u64,
}

#[self_referencing]
struct StreamState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Camera {
    pub fn new(config: &CameraConfig) -> Self {
        let path = config
            .url
            .strip_prefix("v4l2://")
            .unwrap_or(&config.url)
            .to_string();
        Self {
            url: config.url.clone(),
            path,
            target_fps: config.target_fps,
            width: config.width,
            height: config.height,
            state: None,
            frames_read: 0,
            read_failures: 0,
        }
    }
}

fn rgb24() -> v4l::FourCC {
    v4l::FourCC::new(b"RGB3")
}

/// Frames are decoded as packed RGB24; any other negotiated format would fail
/// every read.
fn ensure_rgb24(format: &v4l::Format) -> Result<()> {
    if format.fourcc != rgb24() {
        bail!("negotiated pixel format {} instead of RGB3", format.fourcc);
    }
    Ok(())
}

impl CaptureDevice for V4l2Camera {
    fn url(&self) -> &str {
        &self.url
    }

    fn open(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.path)
            .with_context(|| format!("open v4l2 device {}", self.path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.width;
        format.height = self.height;
        format.fourcc = rgb24();

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Camera: failed to set format on {}: {}", self.path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        let params = v4l::video::capture::Parameters::with_fps(self.target_fps);
        if let Err(err) = device.set_params(&params) {
            log::warn!("V4l2Camera: failed to set fps on {}: {}", self.path, err);
        }

        ensure_rgb24(&format)
            .with_context(|| format!("v4l2 device {} rejected RGB24", self.path))?;
        self.width = format.width;
        self.height = format.height;

        let state = StreamStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Camera: opened {} ({}x{})",
            self.path,
            self.width,
            self.height
        );
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not open")?;
        let pixels = match state.with_mut(|fields| fields.stream.next()) {
            Ok((buf, _meta)) => buf.to_vec(),
            Err(err) => {
                self.read_failures += 1;
                return Err(anyhow::Error::new(err).context("capture v4l2 frame"));
            }
        };

        self.frames_read += 1;
        Frame::from_rgb(pixels, self.width, self.height, self.frames_read)
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            log::info!("V4l2Camera: released {}", self.path);
        }
    }

    fn stats(&self) -> CaptureStats {
        CaptureStats {
            url: self.url.clone(),
            frames_read: self.frames_read,
            read_failures: self.read_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rgb24_is_accepted() {
        assert!(ensure_rgb24(&v4l::Format::new(640, 480, rgb24())).is_ok());

        let err = ensure_rgb24(&v4l::Format::new(640, 480, v4l::FourCC::new(b"YUYV")))
            .expect_err("YUYV must be rejected");
        assert!(err.to_string().contains("YUYV"), "{}", err);
    }

    #[test]
    fn open_fails_without_device() {
        let mut camera = V4l2Camera::new(&CameraConfig {
            url: "v4l2:///dev/video-does-not-exist".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
        });
        assert!(camera.open().is_err());
        assert!(camera.read_frame().is_err());
    }
}
