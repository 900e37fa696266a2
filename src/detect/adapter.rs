//! Face/eye detector adapter.
//!
//! Evaluation order (this is also the dedup tie-break order):
//! 1. primary face pass over the whole frame
//! 2. fallback face passes, in registration order, when the primary pass found
//!    nothing (stopping at the first pass that finds a face) or when the frame
//!    sequence lands on the decimation schedule (all fallbacks run)
//! 3. per face: strict eye pass, then glasses-tolerant eye pass
//!
//! Overlapping faces are collapsed keeping the first-seen rectangle.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::detect::backend::{CascadeBackend, DetectionParams};
use crate::detect::backends::BlobBackend;
use crate::detect::result::{dedup_overlapping, FaceCandidate, Rect};
use crate::frame::{Frame, GrayRegion};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    pub primary_face: DetectionParams,
    /// Progressively more permissive passes, tried in order.
    pub fallback_faces: Vec<DetectionParams>,
    pub eyes: DetectionParams,
    pub eyes_glasses: DetectionParams,
    /// Also run the fallback passes on every Nth frame even when the primary
    /// pass succeeded (catches extra faces). 0 disables the schedule.
    pub fallback_every_n_frames: u32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            primary_face: DetectionParams::new(1.3, 5, 30),
            fallback_faces: vec![
                DetectionParams::new(1.1, 3, 20),
                DetectionParams::new(1.05, 2, 12),
            ],
            eyes: DetectionParams::new(1.1, 3, 3),
            eyes_glasses: DetectionParams::new(1.1, 2, 3),
            fallback_every_n_frames: 5,
        }
    }
}

impl DetectorSettings {
    pub fn validate(&self) -> Result<()> {
        self.primary_face.validate("detect.primary_face")?;
        for params in &self.fallback_faces {
            params.validate("detect.fallback_faces")?;
        }
        self.eyes.validate("detect.eyes")?;
        self.eyes_glasses.validate("detect.eyes_glasses")?;
        Ok(())
    }
}

struct Pass {
    backend: Box<dyn CascadeBackend>,
    params: DetectionParams,
}

impl Pass {
    fn run(&self, region: &GrayRegion<'_>) -> Vec<Rect> {
        let (ox, oy) = region.origin();
        match self.backend.detect(region, &self.params) {
            Ok(rects) => rects.into_iter().map(|r| r.translate(ox, oy)).collect(),
            Err(err) => {
                log::debug!("detector {} failed, treating as empty: {}", self.backend.name(), err);
                Vec::new()
            }
        }
    }
}

pub struct DetectorAdapter {
    primary_face: Pass,
    fallback_faces: Vec<Pass>,
    strict_eyes: Pass,
    glasses_eyes: Pass,
    fallback_every_n_frames: u32,
}

impl DetectorAdapter {
    pub fn new(
        primary_face: Box<dyn CascadeBackend>,
        primary_params: DetectionParams,
        strict_eyes: Box<dyn CascadeBackend>,
        strict_params: DetectionParams,
        glasses_eyes: Box<dyn CascadeBackend>,
        glasses_params: DetectionParams,
    ) -> Self {
        Self {
            primary_face: Pass {
                backend: primary_face,
                params: primary_params,
            },
            fallback_faces: Vec::new(),
            strict_eyes: Pass {
                backend: strict_eyes,
                params: strict_params,
            },
            glasses_eyes: Pass {
                backend: glasses_eyes,
                params: glasses_params,
            },
            fallback_every_n_frames: 0,
        }
    }

    /// Adapter wired to the blob reference backends.
    pub fn from_settings(settings: &DetectorSettings) -> Self {
        let mut adapter = Self::new(
            Box::new(BlobBackend::faces()),
            settings.primary_face,
            Box::new(BlobBackend::eyes()),
            settings.eyes,
            Box::new(BlobBackend::eyes_through_glasses()),
            settings.eyes_glasses,
        )
        .with_fallback_every(settings.fallback_every_n_frames);
        for params in &settings.fallback_faces {
            adapter = adapter.with_fallback(Box::new(BlobBackend::faces()), *params);
        }
        adapter
    }

    pub fn with_fallback(mut self, backend: Box<dyn CascadeBackend>, params: DetectionParams) -> Self {
        self.fallback_faces.push(Pass { backend, params });
        self
    }

    pub fn with_fallback_every(mut self, n: u32) -> Self {
        self.fallback_every_n_frames = n;
        self
    }

    /// Run every pass over `frame` and return the merged face candidates.
    pub fn detect(&self, frame: &Frame) -> Vec<FaceCandidate> {
        let whole = frame.gray_view();
        let mut faces = self.primary_face.run(&whole);

        let primary_missed = faces.is_empty();
        let scheduled = self.fallback_every_n_frames > 0
            && frame.sequence % self.fallback_every_n_frames as u64 == 0;
        if primary_missed || scheduled {
            for pass in &self.fallback_faces {
                let found = pass.run(&whole);
                let hit = !found.is_empty();
                faces.extend(found);
                if primary_missed && hit && !scheduled {
                    break;
                }
            }
        }

        dedup_overlapping(faces)
            .into_iter()
            .map(|face| self.candidate_for(frame, face))
            .collect()
    }

    fn candidate_for(&self, frame: &Frame, face: Rect) -> FaceCandidate {
        let Some(region) = frame.region(face) else {
            return FaceCandidate {
                face,
                eyes: Vec::new(),
                glasses_detected: false,
            };
        };

        let strict = self.strict_eyes.run(&region);
        let tolerant = self.glasses_eyes.run(&region);
        let glasses_detected = tolerant
            .iter()
            .any(|t| strict.iter().all(|s| !s.overlaps_same_object(t)));

        FaceCandidate {
            face,
            eyes: dedup_overlapping(strict.into_iter().chain(tolerant)),
            glasses_detected,
        }
    }
}
