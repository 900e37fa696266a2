//! Debounce / hysteresis state machine.
//!
//! ```text
//!            away verdict
//!  Attentive ------------> LookingAway --+ away: recompute away_duration,
//!      ^                        |        |       fire early/hard warning once
//!      |  recovery_frames       |        |
//!      +--- consecutive --------+ <------+ attentive: recovery_streak += 1
//!           attentive verdicts
//! ```
//!
//! An away verdict during recovery resets `recovery_streak` but keeps
//! `away_start`, so flicker never shortens a measured absence.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::attention::session::{AttentionSession, AttentionState};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    pub early_warning_secs: f64,
    pub warning_secs: f64,
    /// Consecutive attentive verdicts needed to leave `LookingAway`.
    pub recovery_frames: u32,
    /// Counted incidents at which each further recovery triggers a
    /// multiple-violations capture.
    pub repeat_offense_count: u32,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            early_warning_secs: 4.0,
            warning_secs: 8.0,
            recovery_frames: 3,
            repeat_offense_count: 3,
        }
    }
}

impl DebounceConfig {
    pub fn early_warning(&self) -> Duration {
        Duration::from_secs_f64(self.early_warning_secs)
    }

    pub fn warning(&self) -> Duration {
        Duration::from_secs_f64(self.warning_secs)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("early_warning_secs", self.early_warning_secs),
            ("warning_secs", self.warning_secs),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(anyhow!("debounce.{name} must be a positive number of seconds"));
            }
        }
        if self.warning_secs <= self.early_warning_secs {
            return Err(anyhow!(
                "debounce.warning_secs ({}) must be greater than early_warning_secs ({})",
                self.warning_secs,
                self.early_warning_secs
            ));
        }
        if self.recovery_frames == 0 {
            return Err(anyhow!("debounce.recovery_frames must be at least 1"));
        }
        if self.repeat_offense_count == 0 {
            return Err(anyhow!("debounce.repeat_offense_count must be at least 1"));
        }
        Ok(())
    }
}

/// State-machine output for one frame. Several may fire on the same frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    AwayStarted,
    EarlyWarning { away: Duration },
    HardWarning { away: Duration },
    Recovered { away: Duration, incident_counted: bool },
    RepeatedIncidents { incident_count: u32 },
}

#[derive(Clone, Debug)]
pub struct Debouncer {
    config: DebounceConfig,
    early_warning: Duration,
    warning: Duration,
}

impl Debouncer {
    /// Rejects inverted or equal thresholds before any frame is processed.
    pub fn new(config: DebounceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            early_warning: config.early_warning(),
            warning: config.warning(),
            config,
        })
    }

    pub fn config(&self) -> &DebounceConfig {
        &self.config
    }

    /// Advance `session` by one frame verdict observed at `now`.
    pub fn observe(
        &self,
        session: &mut AttentionSession,
        attentive: bool,
        now: Instant,
    ) -> Vec<Transition> {
        let mut transitions = Vec::new();
        if attentive {
            self.observe_attentive(session, &mut transitions);
        } else {
            self.observe_away(session, now, &mut transitions);
        }
        transitions
    }

    fn observe_away(
        &self,
        session: &mut AttentionSession,
        now: Instant,
        transitions: &mut Vec<Transition>,
    ) {
        session.recovery_streak = 0;

        let start = match (session.state, session.away_start) {
            (AttentionState::LookingAway, Some(start)) => start,
            _ => {
                session.state = AttentionState::LookingAway;
                session.away_start = Some(now);
                session.away_duration = Duration::ZERO;
                session.frames_captured = false;
                transitions.push(Transition::AwayStarted);
                now
            }
        };

        // Clamp against out-of-order instants so the timer never runs backwards.
        let elapsed = now.saturating_duration_since(start);
        session.away_duration = session.away_duration.max(elapsed);
        let away = session.away_duration;

        if away >= self.early_warning && !session.early_warning_shown {
            session.early_warning_shown = true;
            transitions.push(Transition::EarlyWarning { away });
        }
        if away >= self.warning && !session.warning_shown {
            session.warning_shown = true;
            transitions.push(Transition::HardWarning { away });
        }
    }

    fn observe_attentive(&self, session: &mut AttentionSession, transitions: &mut Vec<Transition>) {
        if session.state == AttentionState::Attentive {
            return;
        }

        session.recovery_streak += 1;
        if session.recovery_streak < self.config.recovery_frames {
            return;
        }

        let away = session.away_duration;
        let incident_counted = away >= self.early_warning;
        if incident_counted {
            session.incident_count += 1;
        }
        transitions.push(Transition::Recovered {
            away,
            incident_counted,
        });
        if incident_counted && session.incident_count >= self.config.repeat_offense_count {
            transitions.push(Transition::RepeatedIncidents {
                incident_count: session.incident_count,
            });
        }

        session.state = AttentionState::Attentive;
        session.away_start = None;
        session.away_duration = Duration::ZERO;
        session.early_warning_shown = false;
        session.warning_shown = false;
        session.recovery_streak = 0;
    }
}
