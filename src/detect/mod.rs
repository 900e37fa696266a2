mod adapter;
mod backend;
mod backends;
mod result;

pub use adapter::{DetectorAdapter, DetectorSettings};
pub use backend::{CascadeBackend, DetectionParams};
pub use backends::BlobBackend;
pub use result::{dedup_overlapping, FaceCandidate, Rect};
