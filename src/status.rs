//! Outbound per-frame status messages.
//!
//! One `StatusMessage` is sent per frame-loop cycle. A sink error means the
//! consumer is gone and ends the session.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::mpsc;

use crate::attention::{AttentionSession, AttentionVerdict};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    /// Debounced session state, not the raw per-frame verdict.
    pub looking_away: bool,
    /// Seconds.
    pub away_duration: f64,
    /// Base64 JPEG of the current frame; empty when encoding failed.
    pub image: String,
    pub early_warning: bool,
    pub auto_submit: bool,
    pub face_count: u32,
    pub multiple_faces: bool,
    pub glasses_detected: bool,
    pub detection_confidence: u8,
    pub fps: f64,
    pub incident_count: u32,
    pub frames_captured: bool,
    /// The camera read for this cycle failed; detection fields are empty.
    #[serde(default)]
    pub read_error: bool,
}

impl StatusMessage {
    pub fn new(
        session: &AttentionSession,
        verdict: &AttentionVerdict,
        image: String,
        fps: f64,
    ) -> Self {
        Self {
            looking_away: session.is_looking_away(),
            away_duration: session.away_duration.as_secs_f64(),
            image,
            early_warning: session.early_warning_shown,
            auto_submit: session.warning_shown,
            face_count: verdict.signals.face_count,
            multiple_faces: verdict.signals.face_count > 1,
            glasses_detected: verdict.signals.glasses_detected,
            detection_confidence: verdict.confidence,
            fps,
            incident_count: session.incident_count,
            frames_captured: session.frames_captured,
            read_error: false,
        }
    }

    /// Message for a cycle whose frame read failed. Still sent, so a closed
    /// transport is noticed while the camera is down.
    pub fn read_failure(session: &AttentionSession, fps: f64) -> Self {
        let mut message = Self::new(session, &AttentionVerdict::looking_away(), String::new(), fps);
        message.read_error = true;
        message
    }
}

pub trait StatusSink: Send {
    fn send(&mut self, message: &StatusMessage) -> Result<()>;
}

/// Newline-delimited JSON over any writer (the session's TCP stream).
pub struct NdjsonSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> NdjsonSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> StatusSink for NdjsonSink<W> {
    fn send(&mut self, message: &StatusMessage) -> Result<()> {
        serde_json::to_writer(&mut self.writer, message)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// In-process sink; fails once the receiver is dropped.
pub struct ChannelSink {
    tx: mpsc::Sender<StatusMessage>,
}

impl ChannelSink {
    pub fn channel() -> (Self, mpsc::Receiver<StatusMessage>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl StatusSink for ChannelSink {
    fn send(&mut self, message: &StatusMessage) -> Result<()> {
        self.tx
            .send(message.clone())
            .map_err(|_| anyhow!("status receiver disconnected"))
    }
}
