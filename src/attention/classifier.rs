use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::detect::FaceCandidate;

/// Tunable rule set for the per-frame attention verdict.
///
/// Defaults: two eyes, or one eye when glasses are seen now or were seen on
/// the previous `glasses_streak_frames` consecutive frames. Confidence is
/// `confidence_floor + confidence_per_eye * eyes`, capped at `confidence_cap`,
/// and raised to `glasses_confidence_floor` once the glasses streak is reached.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttentionPolicy {
    pub min_eyes: u32,
    pub min_eyes_with_glasses: u32,
    pub glasses_streak_frames: u32,
    pub confidence_floor: u8,
    pub confidence_per_eye: u8,
    pub confidence_cap: u8,
    pub glasses_confidence_floor: u8,
}

impl Default for AttentionPolicy {
    fn default() -> Self {
        Self {
            min_eyes: 2,
            min_eyes_with_glasses: 1,
            glasses_streak_frames: 2,
            confidence_floor: 50,
            confidence_per_eye: 10,
            confidence_cap: 100,
            glasses_confidence_floor: 60,
        }
    }
}

impl AttentionPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.min_eyes == 0 {
            return Err(anyhow!("attention.min_eyes must be at least 1"));
        }
        if self.min_eyes_with_glasses == 0 {
            return Err(anyhow!("attention.min_eyes_with_glasses must be at least 1"));
        }
        if self.min_eyes_with_glasses > self.min_eyes {
            return Err(anyhow!(
                "attention.min_eyes_with_glasses ({}) must not exceed min_eyes ({})",
                self.min_eyes_with_glasses,
                self.min_eyes
            ));
        }
        if self.confidence_cap > 100 {
            return Err(anyhow!("attention.confidence_cap must be <= 100"));
        }
        if self.confidence_floor > self.confidence_cap
            || self.glasses_confidence_floor > self.confidence_cap
        {
            return Err(anyhow!(
                "attention confidence floors must not exceed confidence_cap ({})",
                self.confidence_cap
            ));
        }
        Ok(())
    }

    fn confidence(&self, eyes: u32, glasses_streak_reached: bool) -> u8 {
        let raw = self.confidence_floor as u32 + self.confidence_per_eye as u32 * eyes;
        let mut confidence = raw.min(self.confidence_cap as u32) as u8;
        if glasses_streak_reached {
            confidence = confidence.max(self.glasses_confidence_floor);
        }
        confidence
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AttentionSignals {
    pub glasses_detected: bool,
    pub eye_count: u32,
    pub face_count: u32,
}

/// Per-frame verdict. Never persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct AttentionVerdict {
    pub is_looking_at_screen: bool,
    /// 0..=100
    pub confidence: u8,
    pub signals: AttentionSignals,
}

impl AttentionVerdict {
    pub fn looking_away() -> Self {
        Self {
            is_looking_at_screen: false,
            confidence: 0,
            signals: AttentionSignals::default(),
        }
    }
}

/// Turns merged face candidates into a verdict.
///
/// Holds the consecutive-glasses streak, so one classifier belongs to one
/// session.
#[derive(Clone, Debug)]
pub struct AttentionClassifier {
    policy: AttentionPolicy,
    glasses_streak: u32,
}

impl AttentionClassifier {
    pub fn new(policy: AttentionPolicy) -> Self {
        Self {
            policy,
            glasses_streak: 0,
        }
    }

    pub fn policy(&self) -> &AttentionPolicy {
        &self.policy
    }

    /// Consecutive frames (ending with the last classified one) with glasses.
    pub fn glasses_streak(&self) -> u32 {
        self.glasses_streak
    }

    pub fn classify(&mut self, candidates: &[FaceCandidate]) -> AttentionVerdict {
        let remembered = self.glasses_streak >= self.policy.glasses_streak_frames;
        let glasses_now = candidates.iter().any(|c| c.glasses_detected);
        self.glasses_streak = if glasses_now {
            self.glasses_streak.saturating_add(1)
        } else {
            0
        };

        if candidates.is_empty() {
            return AttentionVerdict::looking_away();
        }

        let streak_reached =
            remembered || self.glasses_streak >= self.policy.glasses_streak_frames;
        let glasses_override = glasses_now || remembered;

        // Every candidate is scored; an attentive candidate beats any
        // inattentive one, then higher confidence wins.
        let mut best: Option<(bool, u8, u32)> = None;
        for candidate in candidates {
            let eyes = candidate.eye_count();
            let attentive = eyes >= self.policy.min_eyes
                || (eyes >= self.policy.min_eyes_with_glasses && glasses_override);
            let confidence = self.policy.confidence(eyes, streak_reached);
            let better = match best {
                None => true,
                Some((best_attentive, best_confidence, _)) => {
                    (attentive, confidence) > (best_attentive, best_confidence)
                }
            };
            if better {
                best = Some((attentive, confidence, eyes));
            }
        }

        let (attentive, confidence, eyes) = best.unwrap_or((false, 0, 0));
        AttentionVerdict {
            is_looking_at_screen: attentive,
            confidence,
            signals: AttentionSignals {
                glasses_detected: glasses_now,
                eye_count: eyes,
                face_count: candidates.len() as u32,
            },
        }
    }
}
