//! Per-frame attention verdicts and the cross-frame state machine that
//! debounces them into warnings and incidents.

mod classifier;
mod debounce;
mod session;

pub use classifier::{AttentionClassifier, AttentionPolicy, AttentionSignals, AttentionVerdict};
pub use debounce::{DebounceConfig, Debouncer, Transition};
pub use session::{AttentionSession, AttentionState};
