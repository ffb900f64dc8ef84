//! Session countdown timer.
//!
//! The timer is a tick-driven state machine. It owns no thread and no clock:
//! the caller invokes `tick()` once per wall-clock second while the session
//! is live and acts on the returned [`TickOutcome`].
//!
//! ## State Transitions
//!
//! ```text
//! Stopped -> Running -> (Paused | Expired)
//! Paused  -> Running
//! Expired -> Running   (add_seconds with a positive delta)
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let mut timer = SessionTimer::new();
//! timer.start(30 * 60);
//! // once per second:
//! match timer.tick() {
//!     TickOutcome::CheckpointDue { remaining_secs } => { /* persist */ }
//!     TickOutcome::Expired => { /* final checkpoint, notify */ }
//!     _ => {}
//! }
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::events::Event;

/// Seconds between periodic checkpoints.
pub const DEFAULT_CHECKPOINT_INTERVAL_SECS: u64 = 10;

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum TickOutcome {
    /// Timer is not running; nothing changed.
    Idle,
    /// One second was consumed.
    Counted,
    /// One second was consumed and the checkpoint interval elapsed.
    CheckpointDue { remaining_secs: u64 },
    /// The last second was consumed; the timer stopped itself.
    Expired,
}

/// Client-local countdown of the seconds left in a gaming session.
///
/// `origin_secs` is what the countdown represented when it was last
/// reconciled, advanced by every `add_seconds`. `origin_secs -
/// remaining_secs` is therefore the time consumed since reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTimer {
    remaining_secs: u64,
    origin_secs: u64,
    running: bool,
    /// Ticks counted since the last `start`.
    ticks: u64,
    checkpoint_interval_secs: u64,
}

impl SessionTimer {
    /// A stopped timer at zero with the default checkpoint interval.
    pub fn new() -> Self {
        Self::with_checkpoint_interval(DEFAULT_CHECKPOINT_INTERVAL_SECS)
    }

    /// A stopped timer that reports `CheckpointDue` every `interval_secs` ticks.
    pub fn with_checkpoint_interval(interval_secs: u64) -> Self {
        Self {
            remaining_secs: 0,
            origin_secs: 0,
            running: false,
            ticks: 0,
            checkpoint_interval_secs: interval_secs.max(1),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn remaining_secs(&self) -> u64 {
        self.remaining_secs
    }

    pub fn origin_secs(&self) -> u64 {
        self.origin_secs
    }

    /// Seconds consumed since the timer was last started.
    pub fn elapsed_secs(&self) -> u64 {
        self.origin_secs.saturating_sub(self.remaining_secs)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_secs == 0
    }

    pub fn checkpoint_interval_secs(&self) -> u64 {
        self.checkpoint_interval_secs
    }

    /// Whole minutes left, truncated.
    pub fn remaining_minutes(&self) -> u64 {
        self.remaining_secs / 60
    }

    /// `MM:SS` rendering of the remaining time. Minutes are not capped.
    pub fn display(&self) -> String {
        format!("{:02}:{:02}", self.remaining_secs / 60, self.remaining_secs % 60)
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Load `initial_secs` and start counting. A zero load leaves the timer
    /// stopped and returns `None`.
    pub fn start(&mut self, initial_secs: u64) -> Option<Event> {
        self.remaining_secs = initial_secs;
        self.origin_secs = initial_secs;
        self.ticks = 0;
        self.running = initial_secs > 0;
        if !self.running {
            return None;
        }
        Some(Event::TimerStarted {
            remaining_secs: initial_secs,
            at: Utc::now(),
        })
    }

    /// Consume one second. Never goes below zero.
    pub fn tick(&mut self) -> TickOutcome {
        if !self.running {
            return TickOutcome::Idle;
        }
        if self.remaining_secs == 0 {
            self.running = false;
            return TickOutcome::Idle;
        }

        self.remaining_secs -= 1;
        self.ticks += 1;

        if self.remaining_secs == 0 {
            self.running = false;
            return TickOutcome::Expired;
        }
        if self.ticks % self.checkpoint_interval_secs == 0 {
            return TickOutcome::CheckpointDue {
                remaining_secs: self.remaining_secs,
            };
        }
        TickOutcome::Counted
    }

    /// Stop counting without touching the remaining time.
    pub fn pause(&mut self) -> Option<Event> {
        if !self.running {
            return None;
        }
        self.running = false;
        Some(Event::TimerPaused {
            remaining_secs: self.remaining_secs,
            at: Utc::now(),
        })
    }

    /// Continue a paused countdown. Nothing to resume at zero.
    pub fn resume(&mut self) -> Option<Event> {
        if self.running || self.remaining_secs == 0 {
            return None;
        }
        self.running = true;
        Some(Event::TimerResumed {
            remaining_secs: self.remaining_secs,
            at: Utc::now(),
        })
    }

    /// Extend the countdown by `delta_secs`.
    ///
    /// The running state is left alone, except that an exhausted timer given
    /// a positive delta starts running again.
    pub fn add_seconds(&mut self, delta_secs: u64) -> Option<Event> {
        if delta_secs == 0 {
            return None;
        }
        let was_exhausted = self.remaining_secs == 0;
        self.remaining_secs = self.remaining_secs.saturating_add(delta_secs);
        self.origin_secs = self.origin_secs.saturating_add(delta_secs);

        let resumed = was_exhausted && !self.running;
        if resumed {
            self.running = true;
        }
        Some(Event::TimeAdded {
            added_secs: delta_secs,
            remaining_secs: self.remaining_secs,
            resumed,
            at: Utc::now(),
        })
    }
}

impl Default for SessionTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_with_zero_stays_stopped() {
        let mut timer = SessionTimer::new();
        assert!(timer.start(0).is_none());
        assert!(!timer.is_running());
        assert_eq!(timer.tick(), TickOutcome::Idle);
        assert_eq!(timer.remaining_secs(), 0);
    }

    #[test]
    fn ticks_count_down_and_stop_exactly_at_zero() {
        let mut timer = SessionTimer::new();
        timer.start(25);
        for _ in 0..24 {
            timer.tick();
            assert!(timer.is_running());
        }
        assert_eq!(timer.remaining_secs(), 1);
        assert_eq!(timer.tick(), TickOutcome::Expired);
        assert!(!timer.is_running());
        assert_eq!(timer.tick(), TickOutcome::Idle);
        assert_eq!(timer.remaining_secs(), 0);
    }

    #[test]
    fn checkpoint_due_every_interval() {
        let mut timer = SessionTimer::new();
        timer.start(900);
        let due: Vec<u64> = (1..=30)
            .filter_map(|_| match timer.tick() {
                TickOutcome::CheckpointDue { remaining_secs } => Some(remaining_secs),
                _ => None,
            })
            .collect();
        assert_eq!(due, vec![890, 880, 870]);
    }

    #[test]
    fn expiry_wins_over_checkpoint_on_the_same_tick() {
        let mut timer = SessionTimer::new();
        timer.start(10);
        for _ in 0..9 {
            timer.tick();
        }
        assert_eq!(timer.tick(), TickOutcome::Expired);
    }

    #[test]
    fn pause_keeps_remaining_and_blocks_ticks() {
        let mut timer = SessionTimer::new();
        timer.start(120);
        timer.tick();
        assert!(timer.pause().is_some());
        assert!(timer.pause().is_none());
        assert_eq!(timer.tick(), TickOutcome::Idle);
        assert_eq!(timer.remaining_secs(), 119);
        assert!(timer.resume().is_some());
        assert!(timer.is_running());
    }

    #[test]
    fn add_seconds_while_running_keeps_running() {
        let mut timer = SessionTimer::new();
        timer.start(300);
        for _ in 0..60 {
            timer.tick();
            assert!(timer.is_running());
        }
        assert_eq!(timer.remaining_secs(), 240);
        timer.add_seconds(600);
        assert!(timer.is_running());
        assert_eq!(timer.remaining_secs(), 840);
        assert_eq!(timer.elapsed_secs(), 60);
    }

    #[test]
    fn add_seconds_to_exhausted_timer_resumes() {
        let mut timer = SessionTimer::new();
        timer.start(1);
        assert_eq!(timer.tick(), TickOutcome::Expired);
        match timer.add_seconds(60) {
            Some(Event::TimeAdded { resumed, remaining_secs, .. }) => {
                assert!(resumed);
                assert_eq!(remaining_secs, 60);
            }
            other => panic!("expected TimeAdded, got {other:?}"),
        }
        assert!(timer.is_running());
    }

    #[test]
    fn add_seconds_to_paused_timer_stays_paused() {
        let mut timer = SessionTimer::new();
        timer.start(60);
        timer.pause();
        timer.add_seconds(60);
        assert!(!timer.is_running());
        assert_eq!(timer.remaining_secs(), 120);
    }

    #[test]
    fn display_formats_minutes_and_seconds() {
        let mut timer = SessionTimer::new();
        timer.start(6_005);
        assert_eq!(timer.display(), "100:05");
        timer.start(59);
        assert_eq!(timer.display(), "00:59");
        assert_eq!(timer.remaining_minutes(), 0);
    }
}
