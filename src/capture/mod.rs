//! Violation capture pipeline.
//!
//! On a debounce transition the pipeline:
//! 1. encodes the triggering frame (JPEG, base64)
//! 2. for burst triggers, re-reads `burst_extra_frames` more frames from the
//!    device, `burst_interval` apart; a failed re-read skips that slot
//! 3. dispatches each record to the remote reporter, falling back to the
//!    session-scoped local store on any dispatch error
//! 4. appends every record to the session's violation log, whatever the
//!    dispatch outcome
//!
//! Dispatch failures are never surfaced as session failures.

mod encode;
mod fallback;
mod report;

pub use encode::FrameEncoder;
pub use fallback::LocalFallbackStore;
pub use report::{HttpReporter, ViolationReport, ViolationReporter};

use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::attention::AttentionSession;
use crate::frame::Frame;
use crate::ingest::CaptureDevice;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    EarlyWarning,
    MajorViolation,
    MultipleViolations,
}

impl ViolationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::EarlyWarning => "early_warning",
            ViolationType::MajorViolation => "major_violation",
            ViolationType::MultipleViolations => "multiple_violations",
        }
    }

    /// Hard-warning and repeat triggers capture a short burst.
    pub fn is_burst(&self) -> bool {
        !matches!(self, ViolationType::EarlyWarning)
    }
}

/// Where a record's evidence ended up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Disposition {
    Reported,
    LocalFallback { path: PathBuf },
    /// Remote and local persistence both failed; only the in-memory record remains.
    Unsaved,
}

/// One piece of violation evidence. Immutable once appended to a session log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub timestamp: DateTime<Utc>,
    pub violation_type: ViolationType,
    pub encoded_frame: String,
    pub session_id: String,
    pub subject_id: String,
    pub quiz_id: String,
    pub disposition: Disposition,
}

impl ViolationRecord {
    pub fn iso_timestamp(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn to_report(&self) -> ViolationReport {
        ViolationReport {
            quiz_id: self.quiz_id.clone(),
            student_username: self.subject_id.clone(),
            violation_type: self.violation_type.as_str().to_string(),
            frame_data: self.encoded_frame.clone(),
            timestamp: self.iso_timestamp(),
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.disposition != Disposition::Unsaved
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub burst_extra_frames: u32,
    pub burst_interval_ms: u64,
    pub jpeg_quality: u8,
    /// Collector endpoint. `None` sends every capture to the local fallback.
    pub report_url: Option<String>,
    pub fallback_dir: PathBuf,
    pub report_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            burst_extra_frames: 2,
            burst_interval_ms: 500,
            jpeg_quality: 80,
            report_url: None,
            fallback_dir: PathBuf::from("violations"),
            report_timeout_ms: 3_000,
        }
    }
}

impl CaptureConfig {
    pub fn burst_interval(&self) -> Duration {
        Duration::from_millis(self.burst_interval_ms)
    }

    pub fn report_timeout(&self) -> Duration {
        Duration::from_millis(self.report_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err(anyhow!("capture.jpeg_quality must be in 1..=100"));
        }
        if self.report_timeout_ms == 0 {
            return Err(anyhow!("capture.report_timeout_ms must be positive"));
        }
        if self.fallback_dir.as_os_str().is_empty() {
            return Err(anyhow!("capture.fallback_dir must not be empty"));
        }
        if let Some(url) = &self.report_url {
            url::Url::parse(url).map_err(|e| anyhow!("capture.report_url invalid: {}", e))?;
        }
        Ok(())
    }
}

pub struct ViolationCapture {
    config: CaptureConfig,
    encoder: FrameEncoder,
    reporter: Option<Box<dyn ViolationReporter>>,
    fallback: LocalFallbackStore,
}

impl ViolationCapture {
    /// Build the pipeline, wiring an `HttpReporter` when `report_url` is set.
    pub fn new(config: CaptureConfig) -> Result<Self> {
        config.validate()?;
        let reporter: Option<Box<dyn ViolationReporter>> = match &config.report_url {
            Some(url) => Some(Box::new(HttpReporter::new(url.clone(), config.report_timeout())?)),
            None => None,
        };
        Ok(Self {
            encoder: FrameEncoder::new(config.jpeg_quality)?,
            fallback: LocalFallbackStore::new(config.fallback_dir.clone()),
            reporter,
            config,
        })
    }

    pub fn with_reporter(mut self, reporter: Box<dyn ViolationReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn encoder(&self) -> &FrameEncoder {
        &self.encoder
    }

    pub fn fallback(&self) -> &LocalFallbackStore {
        &self.fallback
    }

    /// Capture evidence for `kind`, starting with `frame`.
    ///
    /// Returns true when at least one record was appended and every appended
    /// record was persisted remotely or locally.
    pub fn capture(
        &self,
        frame: &Frame,
        kind: ViolationType,
        session: &mut AttentionSession,
        device: &mut dyn CaptureDevice,
    ) -> bool {
        let mut appended = 0u32;
        let mut all_persisted = true;

        let mut record_one = |frame: &Frame, session: &mut AttentionSession| {
            if let Some(persisted) = self.capture_one(frame, kind, session) {
                appended += 1;
                all_persisted &= persisted;
            }
        };

        record_one(frame, session);

        if kind.is_burst() {
            for slot in 1..=self.config.burst_extra_frames {
                std::thread::sleep(self.config.burst_interval());
                match device.read_frame() {
                    Ok(extra) => record_one(&extra, session),
                    Err(err) => {
                        log::warn!(
                            "burst capture slot {} for {} skipped: {}",
                            slot,
                            kind.as_str(),
                            err
                        );
                    }
                }
            }
        }

        if appended > 0 {
            session.frames_captured = true;
        }
        log::info!(
            "session {}: captured {} {} frame(s)",
            session.identity.session_id,
            appended,
            kind.as_str()
        );
        appended > 0 && all_persisted
    }

    fn capture_one(
        &self,
        frame: &Frame,
        kind: ViolationType,
        session: &mut AttentionSession,
    ) -> Option<bool> {
        let jpeg = match self.encoder.jpeg(frame) {
            Ok(jpeg) => jpeg,
            Err(err) => {
                log::warn!("violation frame {} not encoded: {}", frame.sequence, err);
                return None;
            }
        };

        let mut record = ViolationRecord {
            timestamp: Utc::now(),
            violation_type: kind,
            encoded_frame: STANDARD.encode(&jpeg),
            session_id: session.identity.session_id.clone(),
            subject_id: session.identity.subject_id.clone(),
            quiz_id: session.identity.quiz_id.clone(),
            disposition: Disposition::Unsaved,
        };

        record.disposition = self.dispatch(&record, frame.sequence, &jpeg);
        let persisted = record.is_persisted();
        session.record_violation(record);
        Some(persisted)
    }

    fn dispatch(&self, record: &ViolationRecord, frame_sequence: u64, jpeg: &[u8]) -> Disposition {
        if let Some(reporter) = &self.reporter {
            match reporter.report(&record.to_report()) {
                Ok(()) => return Disposition::Reported,
                Err(err) => log::warn!(
                    "session {}: violation report failed, using local fallback: {:#}",
                    record.session_id,
                    err
                ),
            }
        }

        match self.fallback.save(record, frame_sequence, jpeg) {
            Ok(path) => {
                log::info!(
                    "session {}: {} evidence stored at {}",
                    record.session_id,
                    record.violation_type.as_str(),
                    path.display()
                );
                Disposition::LocalFallback { path }
            }
            Err(err) => {
                log::error!(
                    "session {}: local fallback failed, evidence kept in memory only: {:#}",
                    record.session_id,
                    err
                );
                Disposition::Unsaved
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::CaptureStats;
    use crate::SessionIdentity;
    use std::sync::{Arc, Mutex};

    struct ScriptedDevice {
        reads: Vec<bool>,
        served: u64,
    }

    impl CaptureDevice for ScriptedDevice {
        fn url(&self) -> &str {
            "test://scripted"
        }

        fn open(&mut self) -> Result<()> {
            Ok(())
        }

        fn read_frame(&mut self) -> Result<Frame> {
            let ok = self.reads.get(self.served as usize).copied().unwrap_or(true);
            self.served += 1;
            if ok {
                Frame::from_gray(vec![90u8; 8 * 8], 8, 8, 100 + self.served)
            } else {
                Err(anyhow!("scripted read failure"))
            }
        }

        fn release(&mut self) {}

        fn stats(&self) -> CaptureStats {
            CaptureStats {
                url: self.url().to_string(),
                frames_read: self.served,
                read_failures: 0,
            }
        }
    }

    struct Recording(Arc<Mutex<Vec<ViolationReport>>>);

    impl ViolationReporter for Recording {
        fn report(&self, report: &ViolationReport) -> Result<()> {
            self.0.lock().unwrap().push(report.clone());
            Ok(())
        }
    }

    struct Refusing;

    impl ViolationReporter for Refusing {
        fn report(&self, _: &ViolationReport) -> Result<()> {
            Err(anyhow!("collector returned 503"))
        }
    }

    fn config(dir: &std::path::Path) -> CaptureConfig {
        CaptureConfig {
            burst_interval_ms: 0,
            fallback_dir: dir.to_path_buf(),
            ..CaptureConfig::default()
        }
    }

    fn frame() -> Frame {
        Frame::from_gray(vec![128u8; 8 * 8], 8, 8, 7).unwrap()
    }

    fn session() -> AttentionSession {
        AttentionSession::new(SessionIdentity::new("attempt-1", "s1001", "quiz-9"))
    }

    #[test]
    fn early_warning_captures_single_reported_frame() {
        let dir = tempfile::tempdir().unwrap();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let capture = ViolationCapture::new(config(dir.path()))
            .unwrap()
            .with_reporter(Box::new(Recording(sent.clone())));
        let mut device = ScriptedDevice { reads: vec![], served: 0 };
        let mut s = session();

        assert!(capture.capture(&frame(), ViolationType::EarlyWarning, &mut s, &mut device));
        assert_eq!(device.served, 0);
        assert_eq!(s.violations().len(), 1);
        assert!(s.frames_captured);
        assert_eq!(s.violations()[0].disposition, Disposition::Reported);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].quiz_id, "quiz-9");
        assert_eq!(sent[0].student_username, "s1001");
        assert_eq!(sent[0].violation_type, "early_warning");
        assert!(sent[0].timestamp.ends_with('Z'));
    }

    #[test]
    fn failed_dispatch_falls_back_to_local_store() {
        let dir = tempfile::tempdir().unwrap();
        let capture = ViolationCapture::new(config(dir.path()))
            .unwrap()
            .with_reporter(Box::new(Refusing));
        let mut device = ScriptedDevice { reads: vec![], served: 0 };
        let mut s = session();

        assert!(capture.capture(&frame(), ViolationType::EarlyWarning, &mut s, &mut device));
        assert_eq!(s.violations().len(), 1);
        match &s.violations()[0].disposition {
            Disposition::LocalFallback { path } => {
                assert!(path.exists());
                assert!(path.starts_with(dir.path().join("attempt-1")));
                assert!(path.with_extension("json").exists());
            }
            other => panic!("unexpected disposition {:?}", other),
        }
    }

    #[test]
    fn burst_rereads_device_and_skips_failed_slots() {
        let dir = tempfile::tempdir().unwrap();
        let capture = ViolationCapture::new(config(dir.path())).unwrap();
        let mut device = ScriptedDevice {
            reads: vec![false, true],
            served: 0,
        };
        let mut s = session();

        assert!(capture.capture(&frame(), ViolationType::MajorViolation, &mut s, &mut device));
        assert_eq!(device.served, 2);
        assert_eq!(s.violations().len(), 2);
        assert!(s
            .violations()
            .iter()
            .all(|r| r.violation_type == ViolationType::MajorViolation));
    }

    #[test]
    fn unwritable_fallback_still_appends_record() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let capture = ViolationCapture::new(config(&blocker)).unwrap();
        let mut device = ScriptedDevice { reads: vec![], served: 0 };
        let mut s = session();

        assert!(!capture.capture(&frame(), ViolationType::EarlyWarning, &mut s, &mut device));
        assert_eq!(s.violations().len(), 1);
        assert_eq!(s.violations()[0].disposition, Disposition::Unsaved);
    }

    #[test]
    fn violation_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&ViolationType::MultipleViolations).unwrap(),
            "\"multiple_violations\""
        );
        assert!(ViolationType::MajorViolation.is_burst());
        assert!(!ViolationType::EarlyWarning.is_burst());
    }
}
