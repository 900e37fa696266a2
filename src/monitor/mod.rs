//! Frame loop scheduler for one monitored session.
//!
//! Each cycle: check for shutdown, read a frame, detect, classify, debounce,
//! run any triggered captures, send one status message, then sleep the rest
//! of the frame period. The loop is single-writer over its session state;
//! sessions share nothing but the `DevicePool`.
//!
//! Exit paths:
//! - shutdown flag set: `SessionEnd::Shutdown`
//! - this session's stop signal set: `SessionEnd::Stopped`
//! - status sink error (client gone): `SessionEnd::TransportClosed`. A status
//!   line goes out on read-failure cycles too, so a dead camera does not hide
//!   a departed client.
//! - optional frame limit reached: `SessionEnd::FrameLimit`
//!
//! The device lease is dropped on every path, including unwinding.

mod pacing;

pub use pacing::{FramePacer, ThroughputMeter, MIN_SLEEP};

use anyhow::Result;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::attention::{AttentionClassifier, AttentionSession, Debouncer, Transition};
use crate::capture::{ViolationCapture, ViolationRecord, ViolationType};
use crate::config::MonitorConfig;
use crate::detect::DetectorAdapter;
use crate::frame::Frame;
use crate::ingest::{CaptureDevice, CaptureStats, DeviceLease};
use crate::status::{StatusMessage, StatusSink};
use crate::SessionIdentity;

const DEFAULT_READ_RETRY_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEnd {
    Shutdown,
    Stopped,
    TransportClosed,
    FrameLimit,
}

/// Returned when a session ends. Owns the session's violation log.
#[derive(Debug)]
pub struct SessionReport {
    pub identity: SessionIdentity,
    pub end: SessionEnd,
    pub frames_processed: u64,
    pub read_failures: u64,
    pub incident_count: u32,
    pub device: CaptureStats,
    pub violations: Vec<ViolationRecord>,
}

pub struct MonitorSession {
    session: AttentionSession,
    detector: DetectorAdapter,
    classifier: AttentionClassifier,
    debouncer: Debouncer,
    capture: ViolationCapture,
    pacer: FramePacer,
    shutdown: Arc<AtomicBool>,
    stop: Option<Arc<AtomicBool>>,
    read_retry_backoff: Duration,
    frame_limit: Option<u64>,
}

impl MonitorSession {
    /// Build a session from validated configuration. Fails before any frame
    /// is read when the configuration is inconsistent.
    pub fn new(
        identity: SessionIdentity,
        config: &MonitorConfig,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            session: AttentionSession::new(identity),
            detector: DetectorAdapter::from_settings(&config.detect),
            classifier: AttentionClassifier::new(config.attention.clone()),
            debouncer: Debouncer::new(config.debounce.clone())?,
            capture: ViolationCapture::new(config.capture.clone())?,
            pacer: FramePacer::new(config.camera.target_fps),
            shutdown,
            stop: None,
            read_retry_backoff: DEFAULT_READ_RETRY_BACKOFF,
            frame_limit: None,
        })
    }

    pub fn with_capture(mut self, capture: ViolationCapture) -> Self {
        self.capture = capture;
        self
    }

    pub fn with_detector(mut self, detector: DetectorAdapter) -> Self {
        self.detector = detector;
        self
    }

    /// Per-session stop signal, checked next to the server-wide shutdown flag.
    pub fn with_stop_signal(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn with_read_retry_backoff(mut self, backoff: Duration) -> Self {
        self.read_retry_backoff = backoff;
        self
    }

    /// Stop after `frames` processed frames.
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.session.identity
    }

    /// Run the frame loop until an exit condition. Consumes the lease, so
    /// the device is released when this returns or unwinds.
    pub fn run(mut self, mut lease: DeviceLease, sink: &mut dyn StatusSink) -> SessionReport {
        let session_id = self.session.identity.session_id.clone();
        log::info!(
            "session {}: monitoring {} at {:?} per frame",
            session_id,
            lease.url(),
            self.pacer.period()
        );

        let mut meter = ThroughputMeter::new(Instant::now());
        let mut frames_processed = 0u64;
        let mut read_failures = 0u64;

        let end = loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break SessionEnd::Shutdown;
            }
            if self.stop.as_ref().is_some_and(|stop| stop.load(Ordering::SeqCst)) {
                break SessionEnd::Stopped;
            }
            if self.frame_limit.is_some_and(|limit| frames_processed >= limit) {
                break SessionEnd::FrameLimit;
            }

            let cycle_start = Instant::now();
            let frame = match lease.device_mut().read_frame() {
                Ok(frame) => frame,
                Err(err) => {
                    read_failures += 1;
                    log::warn!("session {}: frame read failed, retrying: {}", session_id, err);
                    let message = StatusMessage::read_failure(&self.session, meter.fps());
                    if let Err(err) = sink.send(&message) {
                        log::info!("session {}: status channel closed: {}", session_id, err);
                        break SessionEnd::TransportClosed;
                    }
                    std::thread::sleep(self.read_retry_backoff);
                    continue;
                }
            };

            let candidates = self.detector.detect(&frame);
            let verdict = self.classifier.classify(&candidates);
            let transitions = self.debouncer.observe(
                &mut self.session,
                verdict.is_looking_at_screen,
                frame.captured_at(),
            );
            for transition in transitions {
                self.apply(transition, &frame, lease.device_mut());
            }
            log::debug!(
                "session {}: frame {} faces={} eyes={} attentive={} confidence={}",
                session_id,
                frame.sequence,
                verdict.signals.face_count,
                verdict.signals.eye_count,
                verdict.is_looking_at_screen,
                verdict.confidence
            );

            let image = match self.capture.encoder().base64_jpeg(&frame) {
                Ok(image) => image,
                Err(err) => {
                    log::debug!("session {}: status image skipped: {}", session_id, err);
                    String::new()
                }
            };
            frames_processed += 1;
            if let Some(fps) = meter.tick(Instant::now()) {
                log::debug!("session {}: {:.1} fps", session_id, fps);
            }

            let message = StatusMessage::new(&self.session, &verdict, image, meter.fps());
            if let Err(err) = sink.send(&message) {
                log::info!("session {}: status channel closed: {}", session_id, err);
                break SessionEnd::TransportClosed;
            }

            std::thread::sleep(self.pacer.delay(cycle_start.elapsed()));
        };

        let device = lease.device().stats();
        drop(lease);

        let identity = self.session.identity.clone();
        let incident_count = self.session.incident_count;
        let violations = self.session.into_violations();
        log::info!(
            "session {}: ended ({:?}) after {} frames, {} incidents, {} violation records",
            session_id,
            end,
            frames_processed,
            incident_count,
            violations.len()
        );

        SessionReport {
            identity,
            end,
            frames_processed,
            read_failures,
            incident_count,
            device,
            violations,
        }
    }

    fn apply(&mut self, transition: Transition, frame: &Frame, device: &mut dyn CaptureDevice) {
        let id = &self.session.identity.session_id;
        let kind = match transition {
            Transition::AwayStarted => {
                log::info!("session {}: looking away", id);
                return;
            }
            Transition::EarlyWarning { away } => {
                log::warn!("session {}: early warning after {:.1}s away", id, away.as_secs_f64());
                ViolationType::EarlyWarning
            }
            Transition::HardWarning { away } => {
                log::warn!("session {}: hard warning after {:.1}s away", id, away.as_secs_f64());
                ViolationType::MajorViolation
            }
            Transition::Recovered {
                away,
                incident_counted,
            } => {
                log::info!(
                    "session {}: attention recovered after {:.1}s (incident counted: {})",
                    id,
                    away.as_secs_f64(),
                    incident_counted
                );
                return;
            }
            Transition::RepeatedIncidents { incident_count } => {
                log::warn!("session {}: {} incidents recorded", id, incident_count);
                ViolationType::MultipleViolations
            }
        };
        self.capture.capture(frame, kind, &mut self.session, device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{CameraConfig, DevicePool, SyntheticCamera};
    use crate::status::ChannelSink;

    fn config(url: &str, fallback: &std::path::Path) -> MonitorConfig {
        let mut cfg = MonitorConfig::default();
        cfg.camera = CameraConfig {
            url: url.to_string(),
            target_fps: 100,
            width: 160,
            height: 120,
        };
        cfg.capture.fallback_dir = fallback.to_path_buf();
        cfg.capture.burst_interval_ms = 0;
        cfg
    }

    fn lease(pool: &DevicePool, cfg: &MonitorConfig) -> DeviceLease {
        pool.acquire(Box::new(SyntheticCamera::new(&cfg.camera).unwrap()))
            .unwrap()
    }

    #[test]
    fn frame_limit_ends_session_and_releases_device() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config("stub://cam?script=attentive", dir.path());
        let pool = DevicePool::new();
        let (mut sink, rx) = ChannelSink::channel();

        let session = MonitorSession::new(
            SessionIdentity::new("s1", "alice", "q1"),
            &cfg,
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap()
        .with_frame_limit(5);
        let report = session.run(lease(&pool, &cfg), &mut sink);

        assert_eq!(report.end, SessionEnd::FrameLimit);
        assert_eq!(report.frames_processed, 5);
        assert!(report.violations.is_empty());
        assert_eq!(pool.leased_count(), 0);

        let messages: Vec<StatusMessage> = rx.try_iter().collect();
        assert_eq!(messages.len(), 5);
        assert!(messages.iter().all(|m| !m.looking_away && m.face_count == 1));
        assert!(!messages[0].image.is_empty());
    }

    #[test]
    fn read_failures_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config("stub://cam?script=read_failure:2,attentive:3&loop=false", dir.path());
        let pool = DevicePool::new();
        let (mut sink, _rx) = ChannelSink::channel();

        let report = MonitorSession::new(
            SessionIdentity::unknown(),
            &cfg,
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap()
        .with_read_retry_backoff(Duration::from_millis(1))
        .with_frame_limit(3)
        .run(lease(&pool, &cfg), &mut sink);

        assert_eq!(report.frames_processed, 3);
        assert_eq!(report.read_failures, 2);
        assert_eq!(report.device.read_failures, 2);
    }

    #[test]
    fn closed_transport_ends_session() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config("stub://cam", dir.path());
        let pool = DevicePool::new();
        let (mut sink, rx) = ChannelSink::channel();
        drop(rx);

        let report = MonitorSession::new(
            SessionIdentity::unknown(),
            &cfg,
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap()
        .run(lease(&pool, &cfg), &mut sink);

        assert_eq!(report.end, SessionEnd::TransportClosed);
        assert_eq!(report.frames_processed, 1);
        assert_eq!(pool.leased_count(), 0);
    }

    #[test]
    fn shutdown_flag_is_checked_before_first_frame() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config("stub://cam", dir.path());
        let pool = DevicePool::new();
        let (mut sink, _rx) = ChannelSink::channel();

        let report = MonitorSession::new(
            SessionIdentity::unknown(),
            &cfg,
            Arc::new(AtomicBool::new(true)),
        )
        .unwrap()
        .run(lease(&pool, &cfg), &mut sink);

        assert_eq!(report.end, SessionEnd::Shutdown);
        assert_eq!(report.frames_processed, 0);
    }

    fn run_in_background(
        session: MonitorSession,
        lease: DeviceLease,
        mut sink: ChannelSink,
    ) -> std::thread::JoinHandle<SessionReport> {
        std::thread::spawn(move || session.run(lease, &mut sink))
    }

    fn wait_finished(handle: &std::thread::JoinHandle<SessionReport>, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if handle.is_finished() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        handle.is_finished()
    }

    #[test]
    fn client_leaving_during_camera_outage_ends_session() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config("stub://cam?script=attentive:1,read_failure:100000&loop=false", dir.path());
        let pool = DevicePool::new();
        let shutdown = Arc::new(AtomicBool::new(false));
        let (sink, rx) = ChannelSink::channel();

        let session = MonitorSession::new(SessionIdentity::unknown(), &cfg, shutdown.clone())
            .unwrap()
            .with_read_retry_backoff(Duration::from_millis(1));
        let handle = run_in_background(session, lease(&pool, &cfg), sink);

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(!first.read_error);
        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(second.read_error);
        drop(rx);

        let finished = wait_finished(&handle, Duration::from_secs(2));
        shutdown.store(true, Ordering::SeqCst);
        let report = handle.join().unwrap();
        assert!(finished, "session kept running after its client left");
        assert_eq!(report.end, SessionEnd::TransportClosed);
        assert!(report.read_failures >= 1);
        assert_eq!(pool.leased_count(), 0);
    }

    #[test]
    fn stop_signal_ends_only_its_own_session() {
        let dir = tempfile::tempdir().unwrap();
        let pool = DevicePool::new();
        let shutdown = Arc::new(AtomicBool::new(false));

        let cfg_a = config("stub://cam-a", dir.path());
        let cfg_b = config("stub://cam-b", dir.path());
        let stop_a = Arc::new(AtomicBool::new(false));
        let (sink_a, rx_a) = ChannelSink::channel();
        let (sink_b, rx_b) = ChannelSink::channel();

        let a = MonitorSession::new(SessionIdentity::new("a", "s", "q"), &cfg_a, shutdown.clone())
            .unwrap()
            .with_stop_signal(stop_a.clone());
        let b = MonitorSession::new(SessionIdentity::new("b", "s", "q"), &cfg_b, shutdown.clone())
            .unwrap()
            .with_stop_signal(Arc::new(AtomicBool::new(false)));
        let handle_a = run_in_background(a, lease(&pool, &cfg_a), sink_a);
        let handle_b = run_in_background(b, lease(&pool, &cfg_b), sink_b);

        rx_a.recv_timeout(Duration::from_secs(2)).unwrap();
        rx_b.recv_timeout(Duration::from_secs(2)).unwrap();
        stop_a.store(true, Ordering::SeqCst);

        let report_a = handle_a.join().unwrap();
        assert_eq!(report_a.end, SessionEnd::Stopped);
        assert!(!pool.is_leased("stub://cam-a"));

        // b keeps streaming after a has stopped.
        while rx_b.try_recv().is_ok() {}
        rx_b.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(!handle_b.is_finished());

        shutdown.store(true, Ordering::SeqCst);
        assert_eq!(handle_b.join().unwrap().end, SessionEnd::Shutdown);
        drop(rx_a);
    }

    #[test]
    fn inverted_thresholds_rejected_before_loop() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config("stub://cam", dir.path());
        cfg.debounce.early_warning_secs = 8.0;
        cfg.debounce.warning_secs = 4.0;
        assert!(MonitorSession::new(
            SessionIdentity::unknown(),
            &cfg,
            Arc::new(AtomicBool::new(false))
        )
        .is_err());
    }
}
