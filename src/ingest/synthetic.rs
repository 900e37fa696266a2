//! Synthetic `stub://` camera.
//!
//! URL form: `stub://<name>?script=attentive:30,away:100,glasses:20&loop=true`
//!
//! The script is a list of `scene:frames` steps. Scenes are drawn as flat
//! grayscale patches that the blob detection backend recognises:
//! background 110, face 215, eyes 20 (75 behind tinted glasses).
//!
//! Query options:
//! - `script`: scene steps (default `attentive:1`)
//! - `loop`: restart the script when it ends (default true); otherwise the
//!   last scene holds forever
//! - `fail_open`: make `open()` fail (device-unavailable simulation)

use anyhow::{anyhow, bail, Context, Result};
use std::str::FromStr;

use crate::frame::Frame;
use crate::ingest::{CameraConfig, CaptureDevice, CaptureStats};

const BACKGROUND: u8 = 110;
const FACE: u8 = 215;
const EYE: u8 = 20;
const TINTED_EYE: u8 = 75;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scene {
    /// One face, two clearly visible eyes.
    Attentive,
    /// One face, two eyes behind tinted lenses.
    Glasses,
    /// No face in view.
    Away,
    TwoFaces,
    /// Face present but no eyes (head turned).
    NoEyes,
    /// `read_frame` fails for this step.
    ReadFailure,
}

impl FromStr for Scene {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "attentive" => Ok(Scene::Attentive),
            "glasses" => Ok(Scene::Glasses),
            "away" => Ok(Scene::Away),
            "two_faces" => Ok(Scene::TwoFaces),
            "no_eyes" => Ok(Scene::NoEyes),
            "read_failure" => Ok(Scene::ReadFailure),
            other => Err(anyhow!("unknown synthetic scene {:?}", other)),
        }
    }
}

pub struct SyntheticCamera {
    url: String,
    width: u32,
    height: u32,
    pixels: usize,
    script: Vec<(Scene, u32)>,
    looping: bool,
    fail_open: bool,
    opened: bool,
    reads: u64,
    frames_read: u64,
    read_failures: u64,
}

impl SyntheticCamera {
    pub fn new(config: &CameraConfig) -> Result<Self> {
        let parsed = url::Url::parse(&config.url)
            .with_context(|| format!("parse camera url {}", config.url))?;
        if parsed.scheme() != "stub" {
            bail!("synthetic camera needs a stub:// url, got {}", config.url);
        }
        let pixels = canvas_pixels(config.width, config.height)
            .with_context(|| format!("synthetic camera {}", config.url))?;

        let mut script = vec![(Scene::Attentive, 1)];
        let mut looping = true;
        let mut fail_open = false;
        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "script" => script = parse_script(&value)?,
                "loop" => looping = parse_flag(&value)?,
                "fail_open" => fail_open = parse_flag(&value)?,
                other => log::warn!("SyntheticCamera: ignoring unknown option {}", other),
            }
        }

        Ok(Self {
            url: config.url.clone(),
            width: config.width,
            height: config.height,
            pixels,
            script,
            looping,
            fail_open,
            opened: false,
            reads: 0,
            frames_read: 0,
            read_failures: 0,
        })
    }

    fn scene_at(&self, index: u64) -> Scene {
        let total: u64 = self.script.iter().map(|(_, n)| *n as u64).sum();
        let mut position = if self.looping {
            index % total
        } else {
            index.min(total - 1)
        };
        for (scene, frames) in &self.script {
            if position < *frames as u64 {
                return *scene;
            }
            position -= *frames as u64;
        }
        self.script[self.script.len() - 1].0
    }

    fn draw(&self, scene: Scene) -> Vec<u8> {
        let (w, h) = (self.width as i32, self.height as i32);
        let mut gray = vec![BACKGROUND; self.pixels];
        match scene {
            Scene::Attentive => self.draw_face(&mut gray, (w - w / 3) / 2, w / 3, h / 2, Some(EYE)),
            Scene::Glasses => {
                self.draw_face(&mut gray, (w - w / 3) / 2, w / 3, h / 2, Some(TINTED_EYE))
            }
            Scene::NoEyes => self.draw_face(&mut gray, (w - w / 3) / 2, w / 3, h / 2, None),
            Scene::TwoFaces => {
                self.draw_face(&mut gray, w / 8, w / 4, h / 2, Some(EYE));
                self.draw_face(&mut gray, 5 * w / 8, w / 4, h / 2, Some(EYE));
            }
            Scene::Away | Scene::ReadFailure => {}
        }
        gray
    }

    fn draw_face(&self, gray: &mut [u8], x: i32, fw: i32, fh: i32, eye: Option<u8>) {
        let y = (self.height as i32 - fh) / 2;
        self.fill(gray, x, y, fw, fh, FACE);
        if let Some(value) = eye {
            let (ew, eh) = (fw / 5, fh / 6);
            let ey = y + fh / 4;
            self.fill(gray, x + fw / 5, ey, ew, eh, value);
            self.fill(gray, x + 3 * fw / 5, ey, ew, eh, value);
        }
    }

    fn fill(&self, gray: &mut [u8], x: i32, y: i32, w: i32, h: i32, value: u8) {
        let width = self.width as i32;
        let height = self.height as i32;
        for row in y.max(0)..(y + h).min(height) {
            for col in x.max(0)..(x + w).min(width) {
                gray[(row * width + col) as usize] = value;
            }
        }
    }
}

impl CaptureDevice for SyntheticCamera {
    fn url(&self) -> &str {
        &self.url
    }

    fn open(&mut self) -> Result<()> {
        if self.fail_open {
            bail!("synthetic camera {} unavailable", self.url);
        }
        self.opened = true;
        log::info!(
            "SyntheticCamera: opened {} ({}x{})",
            self.url,
            self.width,
            self.height
        );
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame> {
        if !self.opened {
            bail!("synthetic camera {} is not open", self.url);
        }
        let scene = self.scene_at(self.reads);
        self.reads += 1;
        if scene == Scene::ReadFailure {
            self.read_failures += 1;
            bail!("synthetic read failure on {}", self.url);
        }
        self.frames_read += 1;
        Frame::from_gray(self.draw(scene), self.width, self.height, self.frames_read)
    }

    fn release(&mut self) {
        if self.opened {
            self.opened = false;
            log::info!("SyntheticCamera: released {}", self.url);
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

fn parse_script(raw: &str) -> Result<Vec<(Scene, u32)>> {
    let mut steps = Vec::new();
    for step in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, frames) = match step.split_once(':') {
            Some((name, count)) => (
                name,
                count
                    .parse::<u32>()
                    .with_context(|| format!("invalid frame count in step {:?}", step))?,
            ),
            None => (step, 1),
        };
        if frames == 0 {
            bail!("script step {:?} has zero frames", step);
        }
        steps.push((name.parse()?, frames));
    }
    if steps.is_empty() {
        bail!("synthetic script is empty");
    }
    Ok(steps)
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        other => Err(anyhow!("invalid boolean option {:?}", other)),
    }
}

/// Grayscale canvas size. Both dimensions must also fit the `i32` drawing
/// coordinates.
fn canvas_pixels(width: u32, height: u32) -> Result<usize> {
    if width == 0 || height == 0 {
        bail!("frame dimensions must be non-zero");
    }
    if i32::try_from(width).is_err() || i32::try_from(height).is_err() {
        bail!("frame dimensions {}x{} are too large", width, height);
    }
    width
        .checked_mul(height)
        .and_then(|pixels| pixels.checked_mul(3))
        .map(|_| width as usize * height as usize)
        .ok_or_else(|| anyhow!("frame dimensions {}x{} overflow", width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(url: &str) -> SyntheticCamera {
        SyntheticCamera::new(&CameraConfig {
            url: url.to_string(),
            target_fps: 10,
            width: 160,
            height: 120,
        })
        .unwrap()
    }

    #[test]
    fn oversized_canvas_is_rejected() {
        let config = |width, height| CameraConfig {
            url: "stub://cam".to_string(),
            target_fps: 10,
            width,
            height,
        };
        assert!(SyntheticCamera::new(&config(u32::MAX, u32::MAX)).is_err());
        assert!(SyntheticCamera::new(&config(u32::MAX, 1)).is_err());
        assert!(SyntheticCamera::new(&config(0, 120)).is_err());
        assert_eq!(SyntheticCamera::new(&config(160, 120)).unwrap().pixels, 160 * 120);
    }

    #[test]
    fn follows_script_and_loops() {
        let c = camera("stub://cam?script=attentive:2,away:1");
        let scenes: Vec<Scene> = (0..5).map(|i| c.scene_at(i)).collect();
        assert_eq!(
            scenes,
            vec![
                Scene::Attentive,
                Scene::Attentive,
                Scene::Away,
                Scene::Attentive,
                Scene::Attentive
            ]
        );
    }

    #[test]
    fn non_looping_script_holds_last_scene() {
        let c = camera("stub://cam?script=attentive:1,away:2&loop=false");
        assert_eq!(c.scene_at(50), Scene::Away);
    }

    #[test]
    fn read_requires_open_and_counts_failures() {
        let mut c = camera("stub://cam?script=read_failure,attentive");
        assert!(c.read_frame().is_err());

        c.open().unwrap();
        assert!(c.read_frame().is_err());
        let frame = c.read_frame().unwrap();
        assert_eq!(frame.sequence, 1);
        assert_eq!((frame.width, frame.height), (160, 120));

        let stats = c.stats();
        assert_eq!(stats.frames_read, 1);
        assert_eq!(stats.read_failures, 1);
    }

    #[test]
    fn fail_open_simulates_missing_device() {
        let mut c = camera("stub://cam?fail_open=true");
        assert!(c.open().is_err());
    }

    #[test]
    fn attentive_scene_draws_face_and_eyes() {
        let mut c = camera("stub://cam");
        c.open().unwrap();
        let frame = c.read_frame().unwrap();
        let gray = frame.gray();
        // Face spans x 53..106, y 30..90; left eye x 63..73, y 45..55.
        assert_eq!(gray[0], BACKGROUND);
        assert_eq!(gray[(35 * 160 + 80) as usize], FACE);
        assert_eq!(gray[(50 * 160 + 68) as usize], EYE);
    }

    #[test]
    fn bad_scripts_are_rejected() {
        let config = |url: &str| CameraConfig {
            url: url.to_string(),
            ..CameraConfig::default()
        };
        assert!(SyntheticCamera::new(&config("stub://cam?script=dancing:3")).is_err());
        assert!(SyntheticCamera::new(&config("stub://cam?script=away:0")).is_err());
        assert!(SyntheticCamera::new(&config("stub://cam?script=")).is_err());
    }
}
