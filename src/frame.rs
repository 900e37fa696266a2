//! Captured frame container.
//!
//! - `Frame`: RGB pixels from a capture device plus a grayscale plane derived
//!   once at capture time.
//! - `GrayRegion`: Borrowed rectangular window into the grayscale plane. This is
//!   what detection backends receive; they never see the whole `Frame`.
//!
//! Frames live for one cycle of the frame loop. Evidence that must outlive the
//! cycle is JPEG-encoded by the capture pipeline, never kept as a `Frame`.

use anyhow::{anyhow, Result};
use std::time::Instant;

use crate::detect::Rect;

pub struct Frame {
    rgb: Vec<u8>,
    gray: Vec<u8>,

    pub width: u32,
    pub height: u32,

    /// Device-local sequence number, starting at 1.
    pub sequence: u64,

    captured_at: Instant,
}

impl Frame {
    /// Create a frame from packed RGB24 pixels.
    pub fn from_rgb(rgb: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = pixel_count(width, height)?
            .checked_mul(3)
            .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))?;
        if rgb.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                rgb.len()
            ));
        }
        let gray = rgb_to_gray(&rgb);
        Ok(Self {
            rgb,
            gray,
            width,
            height,
            sequence,
            captured_at: Instant::now(),
        })
    }

    /// Create a frame from an 8-bit grayscale plane.
    pub fn from_gray(gray: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = pixel_count(width, height)?;
        if gray.len() != expected {
            return Err(anyhow!(
                "gray frame length mismatch: expected {}, got {}",
                expected,
                gray.len()
            ));
        }
        let rgb = gray.iter().flat_map(|&v| [v, v, v]).collect();
        Ok(Self {
            rgb,
            gray,
            width,
            height,
            sequence,
            captured_at: Instant::now(),
        })
    }

    /// Override the capture instant (replayed or simulated feeds).
    pub fn with_captured_at(mut self, at: Instant) -> Self {
        self.captured_at = at;
        self
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn rgb(&self) -> &[u8] {
        &self.rgb
    }

    pub fn gray(&self) -> &[u8] {
        &self.gray
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width as i32, self.height as i32)
    }

    /// Whole-frame grayscale view.
    pub fn gray_view(&self) -> GrayRegion<'_> {
        GrayRegion {
            frame: self,
            rect: self.bounds(),
        }
    }

    /// Grayscale view of `rect`, clipped to the frame. `None` when the clipped
    /// rectangle is empty.
    pub fn region(&self, rect: Rect) -> Option<GrayRegion<'_>> {
        let clipped = rect.clip_to(&self.bounds())?;
        Some(GrayRegion {
            frame: self,
            rect: clipped,
        })
    }
}

/// Read-only window into a frame's grayscale plane.
///
/// Coordinates passed to `pixel` are local to the region; `origin` maps them
/// back to frame coordinates.
#[derive(Clone, Copy)]
pub struct GrayRegion<'a> {
    frame: &'a Frame,
    rect: Rect,
}

impl<'a> GrayRegion<'a> {
    pub fn width(&self) -> u32 {
        self.rect.width as u32
    }

    pub fn height(&self) -> u32 {
        self.rect.height as u32
    }

    /// Top-left corner of the region in frame coordinates.
    pub fn origin(&self) -> (i32, i32) {
        (self.rect.x, self.rect.y)
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    /// Pixel at region-local `(x, y)`. Caller keeps coordinates in bounds.
    pub fn pixel(&self, x: u32, y: u32) -> u8 {
        let fx = self.rect.x as usize + x as usize;
        let fy = self.rect.y as usize + y as usize;
        self.frame.gray[fy * self.frame.width as usize + fx]
    }
}

fn pixel_count(width: u32, height: u32) -> Result<usize> {
    if width == 0 || height == 0 {
        return Err(anyhow!("frame dimensions must be non-zero"));
    }
    width
        .checked_mul(height)
        .map(|v| v as usize)
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

/// ITU-R BT.601 luma.
fn rgb_to_gray(rgb: &[u8]) -> Vec<u8> {
    rgb.chunks_exact(3)
        .map(|px| {
            let luma = 299 * px[0] as u32 + 587 * px[1] as u32 + 114 * px[2] as u32;
            ((luma + 500) / 1000) as u8
        })
        .collect()
}
