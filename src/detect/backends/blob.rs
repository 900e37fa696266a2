use anyhow::Result;

use crate::detect::backend::{CascadeBackend, DetectionParams};
use crate::detect::result::Rect;
use crate::frame::GrayRegion;

/// Intensity-band blob detector.
///
/// Reports the bounding box of every 4-connected component whose pixels fall
/// inside `[low, high]`. It is the reference backend for the synthetic camera,
/// which draws faces as bright patches and eyes as dark ones.
///
/// Parameter mapping:
/// - `min_size`: minimum bounding-box edge
/// - `min_neighbors`: minimum member pixel count
/// - `scale_factor`: unused (single scale)
pub struct BlobBackend {
    name: &'static str,
    low: u8,
    high: u8,
}

impl BlobBackend {
    pub const fn new(name: &'static str, low: u8, high: u8) -> Self {
        Self { name, low, high }
    }

    /// Skin-bright patches (synthetic faces).
    pub const fn faces() -> Self {
        Self::new("blob-face", 170, 255)
    }

    /// Strict eye band: only near-black pupils.
    pub const fn eyes() -> Self {
        Self::new("blob-eye", 0, 45)
    }

    /// Wider band that still finds eyes behind tinted lenses.
    pub const fn eyes_through_glasses() -> Self {
        Self::new("blob-eye-glasses", 0, 95)
    }

    fn in_band(&self, value: u8) -> bool {
        value >= self.low && value <= self.high
    }
}

impl CascadeBackend for BlobBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    fn detect(&self, region: &GrayRegion<'_>, params: &DetectionParams) -> Result<Vec<Rect>> {
        let w = region.width() as usize;
        let h = region.height() as usize;
        let mut visited = vec![false; w * h];
        let mut stack = Vec::new();
        let mut found = Vec::new();

        for y in 0..h {
            for x in 0..w {
                let idx = y * w + x;
                if visited[idx] || !self.in_band(region.pixel(x as u32, y as u32)) {
                    continue;
                }

                let (mut min_x, mut min_y, mut max_x, mut max_y) = (x, y, x, y);
                let mut count = 0u32;
                visited[idx] = true;
                stack.push((x, y));

                while let Some((cx, cy)) = stack.pop() {
                    count += 1;
                    min_x = min_x.min(cx);
                    min_y = min_y.min(cy);
                    max_x = max_x.max(cx);
                    max_y = max_y.max(cy);

                    let mut visit = |nx: usize, ny: usize| {
                        let n = ny * w + nx;
                        if !visited[n] && self.in_band(region.pixel(nx as u32, ny as u32)) {
                            visited[n] = true;
                            stack.push((nx, ny));
                        }
                    };
                    if cx > 0 {
                        visit(cx - 1, cy);
                    }
                    if cx + 1 < w {
                        visit(cx + 1, cy);
                    }
                    if cy > 0 {
                        visit(cx, cy - 1);
                    }
                    if cy + 1 < h {
                        visit(cx, cy + 1);
                    }
                }

                let bw = (max_x - min_x + 1) as u32;
                let bh = (max_y - min_y + 1) as u32;
                if bw >= params.min_size && bh >= params.min_size && count >= params.min_neighbors
                {
                    found.push(Rect::new(min_x as i32, min_y as i32, bw as i32, bh as i32));
                }
            }
        }

        Ok(found)
    }
}
