//! Gaze Witness
//!
//! This crate implements an attention monitoring daemon: a live camera feed is
//! classified frame by frame as "attentive" or "looking away", the noisy
//! per-frame verdicts are debounced into a stable session state with early and
//! hard warnings, and violation frames are captured as evidence.
//!
//! # Architecture
//!
//! Frames flow through the pipeline in one direction:
//!
//! ```text
//! CaptureDevice -> DetectorAdapter -> AttentionClassifier -> Debouncer
//!                                                              |
//!                                   StatusSink <---------------+--> ViolationCapture
//! ```
//!
//! # Module Structure
//!
//! - `frame`: Captured frame container and grayscale region views
//! - `ingest`: Capture devices (synthetic `stub://`, V4L2) and device leasing
//! - `detect`: Detection backends and the face/eye `DetectorAdapter`
//! - `attention`: Verdict classifier, session state and the debounce machine
//! - `capture`: Violation capture pipeline (encode, report, local fallback)
//! - `status`: Per-frame outbound status messages
//! - `monitor`: Frame loop scheduler for one session
//! - `server`: Connection handling, one monitor thread per client
//! - `store` / `sink`: Reference violation-report collaborator (SQLite)

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub mod attention;
pub mod capture;
pub mod config;
pub mod detect;
pub mod frame;
pub mod http;
pub mod ingest;
pub mod monitor;
pub mod server;
pub mod sink;
pub mod status;
pub mod store;

pub use attention::{
    AttentionClassifier, AttentionPolicy, AttentionSession, AttentionSignals, AttentionState,
    AttentionVerdict, DebounceConfig, Debouncer, Transition,
};
pub use capture::{
    CaptureConfig, Disposition, FrameEncoder, HttpReporter, LocalFallbackStore, ViolationCapture,
    ViolationRecord, ViolationReport, ViolationReporter, ViolationType,
};
pub use config::MonitorConfig;
pub use detect::{
    BlobBackend, CascadeBackend, DetectionParams, DetectorAdapter, DetectorSettings,
    FaceCandidate, Rect,
};
pub use frame::{Frame, GrayRegion};
pub use ingest::{
    open_device, CameraConfig, CaptureDevice, CaptureStats, DeviceLease, DevicePool,
    SyntheticCamera,
};
#[cfg(feature = "ingest-v4l2")]
pub use ingest::V4l2Camera;
pub use monitor::{MonitorSession, SessionEnd, SessionReport};
pub use status::{ChannelSink, NdjsonSink, StatusMessage, StatusSink};

/// Sentinel used for any identity field the client did not supply.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Identity of a monitored session, supplied out-of-band at connection start.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionIdentity {
    pub session_id: String,
    pub subject_id: String,
    pub quiz_id: String,
}

impl SessionIdentity {
    /// Build an identity, replacing blank values with the `unknown` sentinel.
    pub fn new(session_id: &str, subject_id: &str, quiz_id: &str) -> Self {
        Self {
            session_id: normalize_identity_field(Some(session_id)),
            subject_id: normalize_identity_field(Some(subject_id)),
            quiz_id: normalize_identity_field(Some(quiz_id)),
        }
    }

    /// Identity from connection query parameters.
    ///
    /// `student_id` is accepted as an alias of `subject_id`.
    pub fn from_query(query: &HashMap<String, String>) -> Self {
        let subject = query
            .get("subject_id")
            .filter(|v| !v.trim().is_empty())
            .or_else(|| query.get("student_id"));
        Self {
            session_id: normalize_identity_field(query.get("session_id").map(String::as_str)),
            subject_id: normalize_identity_field(subject.map(String::as_str)),
            quiz_id: normalize_identity_field(query.get("quiz_id").map(String::as_str)),
        }
    }

    pub fn unknown() -> Self {
        Self::new("", "", "")
    }
}

impl Default for SessionIdentity {
    fn default() -> Self {
        Self::unknown()
    }
}

fn normalize_identity_field(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => UNKNOWN_IDENTITY.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_identity_fields_become_unknown() {
        let id = SessionIdentity::new("  ", "alice", "");
        assert_eq!(id.session_id, UNKNOWN_IDENTITY);
        assert_eq!(id.subject_id, "alice");
        assert_eq!(id.quiz_id, UNKNOWN_IDENTITY);
    }

    #[test]
    fn identity_from_query_accepts_student_alias() {
        let mut query = HashMap::new();
        query.insert("session_id".to_string(), "attempt-17".to_string());
        query.insert("student_id".to_string(), "s1001".to_string());

        let id = SessionIdentity::from_query(&query);
        assert_eq!(id.session_id, "attempt-17");
        assert_eq!(id.subject_id, "s1001");
        assert_eq!(id.quiz_id, UNKNOWN_IDENTITY);
    }

    #[test]
    fn identity_from_empty_query_is_unknown() {
        let id = SessionIdentity::from_query(&HashMap::new());
        assert_eq!(id, SessionIdentity::unknown());
    }
}
