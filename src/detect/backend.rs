use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::detect::result::Rect;
use crate::frame::GrayRegion;

/// Parameters handed to a cascade-style detector on every call.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionParams {
    /// Pyramid scale step between detection passes (> 1.0).
    pub scale_factor: f32,
    /// Neighbouring hits required before a window is reported.
    pub min_neighbors: u32,
    /// Smallest reported object edge, in pixels.
    pub min_size: u32,
}

impl DetectionParams {
    pub const fn new(scale_factor: f32, min_neighbors: u32, min_size: u32) -> Self {
        Self {
            scale_factor,
            min_neighbors,
            min_size,
        }
    }

    pub fn validate(&self, label: &str) -> Result<()> {
        if !(self.scale_factor > 1.0) {
            anyhow::bail!("{label}: scale_factor must be greater than 1.0");
        }
        if self.min_size == 0 {
            anyhow::bail!("{label}: min_size must be greater than zero");
        }
        Ok(())
    }
}

/// Detection collaborator.
///
/// # Contract
///
/// Backends are stateless classifiers: the same region and parameters always
/// produce the same rectangles. Returned rectangles are in region-local
/// coordinates; the adapter translates them back into frame coordinates.
///
/// An `Err` is never fatal. The adapter treats it as "nothing detected".
pub trait CascadeBackend: Send {
    /// Backend identifier (for logs).
    fn name(&self) -> &'static str;

    fn detect(&self, region: &GrayRegion<'_>, params: &DetectionParams) -> Result<Vec<Rect>>;
}
