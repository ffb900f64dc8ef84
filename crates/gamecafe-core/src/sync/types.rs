//! Core types for checkpoint synchronization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a checkpoint was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointReason {
    /// Periodic write every checkpoint interval.
    Interval,
    Pause,
    Expired,
    Logout,
    /// Teardown without logout (process exit, window closed).
    Unload,
}

impl CheckpointReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointReason::Interval => "interval",
            CheckpointReason::Pause => "pause",
            CheckpointReason::Expired => "expired",
            CheckpointReason::Logout => "logout",
            CheckpointReason::Unload => "unload",
        }
    }
}

impl std::fmt::Display for CheckpointReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A usage report ready to send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub user_id: String,
    /// Cumulative consumption to report: base usage plus elapsed minutes.
    pub used_minutes: u32,
    /// Timer value the checkpoint was taken at.
    pub remaining_secs: u64,
    pub reason: CheckpointReason,
    pub at: DateTime<Utc>,
}

/// Delivery counters for one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Checkpoints handed to the store.
    pub dispatched: u64,
    /// Checkpoints the store acknowledged.
    pub delivered: u64,
    /// Checkpoints that failed and were dropped.
    pub failed: u64,
    /// Last acknowledged checkpoint.
    pub last_delivered_at: Option<DateTime<Utc>>,
    /// `used_minutes` of the last acknowledged checkpoint.
    pub last_used_minutes: Option<u32>,
}

/// Whole minutes consumed between `original_total_secs` and
/// `current_remaining_secs`. Partial minutes are dropped.
pub fn elapsed_minutes(original_total_secs: u64, current_remaining_secs: u64) -> u32 {
    let elapsed = original_total_secs.saturating_sub(current_remaining_secs) / 60;
    u32::try_from(elapsed).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn elapsed_floors_to_whole_minutes() {
        assert_eq!(elapsed_minutes(1800, 1800), 0);
        assert_eq!(elapsed_minutes(1800, 1741), 0);
        assert_eq!(elapsed_minutes(1800, 1740), 1);
        assert_eq!(elapsed_minutes(1800, 0), 30);
        assert_eq!(elapsed_minutes(900, 890), 0);
    }

    #[test]
    fn elapsed_never_negative() {
        assert_eq!(elapsed_minutes(60, 600), 0);
    }

    #[test]
    fn reason_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&CheckpointReason::Unload).unwrap(),
            "\"unload\""
        );
        assert_eq!(CheckpointReason::Interval.to_string(), "interval");
    }

    proptest! {
        #[test]
        fn elapsed_matches_floor_division(start in 0u64..1_000_000, consumed in 0u64..1_000_000) {
            let remaining = start.saturating_sub(consumed);
            let expected = (start - remaining) / 60;
            prop_assert_eq!(u64::from(elapsed_minutes(start, remaining)), expected);
        }
    }
}
