use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in frame (or region-local) pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> i64 {
        self.width.max(0) as i64 * self.height.max(0) as i64
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some(Rect::new(x1, y1, x2 - x1, y2 - y1))
    }

    pub fn intersection_area(&self, other: &Rect) -> i64 {
        self.intersection(other).map_or(0, |r| r.area())
    }

    /// Two detections describe the same object when their intersection covers
    /// more than half of the smaller rectangle.
    pub fn overlaps_same_object(&self, other: &Rect) -> bool {
        let smaller = self.area().min(other.area());
        if smaller == 0 {
            return false;
        }
        self.intersection_area(other) * 2 > smaller
    }

    pub fn clip_to(&self, bounds: &Rect) -> Option<Rect> {
        self.intersection(bounds)
    }

    pub fn translate(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }
}

/// A detected face and the eye rectangles found inside it (frame coordinates).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FaceCandidate {
    pub face: Rect,
    pub eyes: Vec<Rect>,
    /// The glasses-tolerant eye pass found an eye the strict pass missed.
    pub glasses_detected: bool,
}

impl FaceCandidate {
    pub fn eye_count(&self) -> u32 {
        self.eyes.len() as u32
    }
}

/// Collapse overlapping rectangles, keeping the first-seen of each group.
///
/// Input order is detector evaluation order, so earlier detectors win ties.
pub fn dedup_overlapping(rects: impl IntoIterator<Item = Rect>) -> Vec<Rect> {
    let mut kept: Vec<Rect> = Vec::new();
    for rect in rects {
        if rect.area() == 0 {
            continue;
        }
        if kept.iter().all(|k| !k.overlaps_same_object(&rect)) {
            kept.push(rect);
        }
    }
    kept
}
