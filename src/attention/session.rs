use serde::Serialize;
use std::time::{Duration, Instant};

use crate::capture::ViolationRecord;
use crate::SessionIdentity;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum AttentionState {
    #[default]
    Attentive,
    LookingAway,
}

/// Cross-frame attention state for one monitored client.
///
/// Mutated once per frame by the `Debouncer`; owns the violation log until
/// `into_violations` hands it to the caller at session end.
#[derive(Debug)]
pub struct AttentionSession {
    pub identity: SessionIdentity,
    pub state: AttentionState,
    pub away_start: Option<Instant>,
    /// Zero while `Attentive`; non-decreasing while `LookingAway`.
    pub away_duration: Duration,
    pub early_warning_shown: bool,
    pub warning_shown: bool,
    pub recovery_streak: u32,
    pub incident_count: u32,
    /// Evidence was captured during the current absence episode.
    pub frames_captured: bool,
    violations: Vec<ViolationRecord>,
}

impl AttentionSession {
    pub fn new(identity: SessionIdentity) -> Self {
        Self {
            identity,
            state: AttentionState::Attentive,
            away_start: None,
            away_duration: Duration::ZERO,
            early_warning_shown: false,
            warning_shown: false,
            recovery_streak: 0,
            incident_count: 0,
            frames_captured: false,
            violations: Vec::new(),
        }
    }

    pub fn is_looking_away(&self) -> bool {
        self.state == AttentionState::LookingAway
    }

    pub fn violations(&self) -> &[ViolationRecord] {
        &self.violations
    }

    pub(crate) fn record_violation(&mut self, record: ViolationRecord) {
        self.violations.push(record);
    }

    pub fn into_violations(self) -> Vec<ViolationRecord> {
        self.violations
    }
}
