use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reconciler::SessionPhase;
use crate::sync::CheckpointReason;

/// Every state change of a gaming session produces an Event.
/// The CLI prints them; tests assert on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    TimerStarted {
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    TimerPaused {
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    TimerResumed {
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    /// Purchased time was folded into the countdown.
    TimeAdded {
        added_secs: u64,
        remaining_secs: u64,
        /// The timer had run out and started again.
        resumed: bool,
        at: DateTime<Utc>,
    },
    /// Countdown reached zero; gameplay should stop.
    TimerExpired {
        at: DateTime<Utc>,
    },
    CheckpointIssued {
        used_minutes: u32,
        remaining_secs: u64,
        reason: CheckpointReason,
        at: DateTime<Utc>,
    },
    SessionTerminated {
        remaining_secs: u64,
        at: DateTime<Utc>,
    },
    StateSnapshot {
        user_id: String,
        phase: SessionPhase,
        running: bool,
        remaining_secs: u64,
        display: String,
        at: DateTime<Utc>,
    },
}
