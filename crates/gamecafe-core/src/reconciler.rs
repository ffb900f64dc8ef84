//! Quota Reconciler: decides what the session timer is set to.
//!
//! The Quota Store is authoritative. The reconciler derives the countdown
//! from it at login and after purchases, and feeds consumption back through
//! the [`CheckpointSync`].
//!
//! ## Phases
//!
//! ```text
//! Uninitialized -> Reconciling -> Running <-> Paused
//!                                    |          |
//!                                    v          |
//!                                 Expired <-----+ (purchase restarts)
//!                  any phase -> Terminated (logout)
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{CoreError, QuotaError, SessionError};
use crate::events::Event;
use crate::quota::QuotaStore;
use crate::session::SessionContext;
use crate::storage::TimerConfig;
use crate::sync::{Checkpoint, CheckpointReason, CheckpointSync, SyncStatus};
use crate::timer::{SessionTimer, TickOutcome, DEFAULT_CHECKPOINT_INTERVAL_SECS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Uninitialized,
    Reconciling,
    Running,
    Paused,
    Expired,
    Terminated,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionPhase::Uninitialized => "uninitialized",
            SessionPhase::Reconciling => "reconciling",
            SessionPhase::Running => "running",
            SessionPhase::Paused => "paused",
            SessionPhase::Expired => "expired",
            SessionPhase::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    pub checkpoint_interval_secs: u64,
    /// Delay before re-reading the store after a purchase.
    pub purchase_settle: Duration,
    /// Upper bound on waiting for in-flight checkpoints at teardown.
    pub shutdown_flush: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval_secs: DEFAULT_CHECKPOINT_INTERVAL_SECS,
            purchase_settle: Duration::from_millis(500),
            shutdown_flush: Duration::from_secs(2),
        }
    }
}

impl From<&TimerConfig> for ReconcilerConfig {
    fn from(config: &TimerConfig) -> Self {
        Self {
            checkpoint_interval_secs: config.checkpoint_interval_secs,
            purchase_settle: Duration::from_millis(config.purchase_settle_ms),
            shutdown_flush: Duration::from_millis(config.shutdown_flush_ms),
        }
    }
}

/// Drives one user's session timer against the Quota Store.
pub struct QuotaReconciler {
    store: Arc<dyn QuotaStore>,
    session: SessionContext,
    config: ReconcilerConfig,
    timer: Option<SessionTimer>,
    sync: CheckpointSync,
    phase: SessionPhase,
}

impl QuotaReconciler {
    pub fn new(store: Arc<dyn QuotaStore>, session: SessionContext, config: ReconcilerConfig) -> Self {
        let sync = CheckpointSync::new(Arc::clone(&store), session.clone());
        Self {
            store,
            session,
            config,
            timer: None,
            sync,
            phase: SessionPhase::Uninitialized,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn timer(&self) -> Option<&SessionTimer> {
        self.timer.as_ref()
    }

    pub fn remaining_secs(&self) -> u64 {
        self.timer.as_ref().map_or(0, SessionTimer::remaining_secs)
    }

    pub fn is_running(&self) -> bool {
        self.timer.as_ref().is_some_and(SessionTimer::is_running)
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.sync.status()
    }

    /// Derive the countdown from the store and start it.
    ///
    /// Calling this again re-derives from scratch; with no consumption in
    /// between, it lands on the same value.
    pub async fn login(&mut self) -> Result<Event, CoreError> {
        self.ensure_live()?;
        if !self.session.is_authenticated() {
            self.timer = None;
            self.phase = SessionPhase::Uninitialized;
            return Err(SessionError::NotAuthenticated.into());
        }

        self.phase = SessionPhase::Reconciling;
        let (remaining_secs, base_used) = match self.store.fetch(&self.session).await {
            Ok(quota) => {
                debug!(
                    user_id = %self.session.user_id,
                    total = quota.total_minutes,
                    used = quota.used_minutes,
                    "quota read"
                );
                self.remember_total(quota.total_minutes);
                (quota.remaining_secs(), quota.used_minutes)
            }
            Err(e) if e.is_auth_failure() => {
                warn!(user_id = %self.session.user_id, error = %e, "store rejected session");
                self.timer = None;
                self.phase = SessionPhase::Uninitialized;
                return Err(SessionError::NotAuthenticated.into());
            }
            Err(QuotaError::NotFound { .. }) => {
                info!(user_id = %self.session.user_id, "no quota record, treating as zero");
                (0, 0)
            }
            Err(e) if e.is_transient() => {
                let cached = self.session.cached_quota_minutes.unwrap_or(0);
                warn!(
                    user_id = %self.session.user_id,
                    error = %e,
                    cached_minutes = cached,
                    "quota read failed, using cached quota"
                );
                (u64::from(cached) * 60, 0)
            }
            Err(e) => {
                warn!(user_id = %self.session.user_id, error = %e, "quota read refused");
                self.timer = None;
                self.phase = SessionPhase::Uninitialized;
                return Err(e.into());
            }
        };

        self.sync.set_base_used(base_used);
        Ok(self.start_timer(remaining_secs))
    }

    /// Advance one second. Returns an event when something noteworthy
    /// happened: a checkpoint went out or the time ran out.
    pub fn tick(&mut self) -> Option<Event> {
        let timer = self.timer.as_mut()?;
        match timer.tick() {
            TickOutcome::Idle | TickOutcome::Counted => None,
            TickOutcome::CheckpointDue { remaining_secs } => {
                let origin = timer.origin_secs();
                let checkpoint = self.sync.prepare(remaining_secs, origin, CheckpointReason::Interval);
                Some(self.dispatch(checkpoint))
            }
            TickOutcome::Expired => {
                let origin = timer.origin_secs();
                let checkpoint = self.sync.prepare(0, origin, CheckpointReason::Expired);
                self.dispatch(checkpoint);
                self.phase = SessionPhase::Expired;
                info!(user_id = %self.session.user_id, "time expired");
                Some(Event::TimerExpired { at: Utc::now() })
            }
        }
    }

    /// Pause the countdown and checkpoint the current value.
    pub fn pause(&mut self) -> Option<Event> {
        let timer = self.timer.as_mut()?;
        let event = timer.pause()?;
        let checkpoint = self.sync.prepare(
            timer.remaining_secs(),
            timer.origin_secs(),
            CheckpointReason::Pause,
        );
        self.dispatch(checkpoint);
        self.phase = SessionPhase::Paused;
        Some(event)
    }

    pub fn resume(&mut self) -> Result<Option<Event>, CoreError> {
        self.ensure_live()?;
        let timer = self.timer.as_mut().ok_or(SessionError::NotAuthenticated)?;
        if timer.is_exhausted() {
            return Err(SessionError::NoTimeRemaining.into());
        }
        let event = timer.resume();
        if event.is_some() {
            self.phase = SessionPhase::Running;
        }
        Ok(event)
    }

    /// Flip between running and paused.
    pub fn toggle(&mut self) -> Result<Event, CoreError> {
        self.ensure_live()?;
        let timer = self.timer.as_ref().ok_or(SessionError::NotAuthenticated)?;
        if timer.is_exhausted() {
            return Err(SessionError::NoTimeRemaining.into());
        }
        let event = if timer.is_running() {
            self.pause()
        } else {
            self.resume()?
        };
        Ok(event.unwrap_or_else(|| self.snapshot()))
    }

    /// Fold `purchased_minutes` into the session after the store granted
    /// them.
    ///
    /// A live countdown is extended, never replaced. A stopped one is
    /// re-derived from the store's absolute remaining time.
    pub async fn purchase_completed(&mut self, purchased_minutes: u32) -> Result<Event, CoreError> {
        self.ensure_live()?;
        if !self.session.is_authenticated() {
            return Err(SessionError::NotAuthenticated.into());
        }
        if !self.config.purchase_settle.is_zero() {
            tokio::time::sleep(self.config.purchase_settle).await;
        }

        let added_secs = u64::from(purchased_minutes) * 60;
        let reread = self.store.fetch(&self.session).await;
        match &reread {
            Ok(quota) => self.remember_total(quota.total_minutes),
            Err(e) => warn!(user_id = %self.session.user_id, error = %e, "re-read after purchase failed"),
        }

        if let Some(timer) = self.timer.as_mut().filter(|t| !t.is_exhausted()) {
            let event = timer.add_seconds(added_secs);
            info!(
                user_id = %self.session.user_id,
                purchased_minutes,
                remaining_secs = timer.remaining_secs(),
                "purchase added to live session"
            );
            return Ok(event.unwrap_or_else(|| self.snapshot()));
        }

        let remaining_secs = match reread {
            Ok(quota) if quota.remaining_secs() > 0 => {
                self.sync.set_base_used(quota.used_minutes);
                quota.remaining_secs()
            }
            Ok(quota) => {
                // The grant has not landed yet; count the purchase locally.
                self.sync.set_base_used(quota.used_minutes.max(self.used_so_far()));
                added_secs
            }
            Err(_) => {
                let used = self.used_so_far();
                self.sync.set_base_used(used);
                added_secs
            }
        };
        info!(
            user_id = %self.session.user_id,
            purchased_minutes,
            remaining_secs,
            "session restarted after purchase"
        );
        Ok(self.start_timer(remaining_secs))
    }

    /// Final checkpoint, then drop the countdown for good.
    pub async fn logout(&mut self) -> Result<Event, CoreError> {
        self.ensure_live()?;
        let remaining_secs = self.remaining_secs();
        if let Some(timer) = self.timer.as_mut() {
            timer.pause();
            let checkpoint = self.sync.prepare(
                timer.remaining_secs(),
                timer.origin_secs(),
                CheckpointReason::Logout,
            );
            self.sync.deliver(&checkpoint).await;
        }
        self.sync.settle(self.config.shutdown_flush).await;
        self.timer = None;
        self.phase = SessionPhase::Terminated;
        info!(user_id = %self.session.user_id, remaining_secs, "session terminated");
        Ok(Event::SessionTerminated {
            remaining_secs,
            at: Utc::now(),
        })
    }

    /// Fire a last checkpoint without tearing anything down. Follow with
    /// [`settle`](Self::settle) before the process exits.
    pub fn unload(&mut self) -> Option<Event> {
        if self.phase == SessionPhase::Terminated {
            return None;
        }
        let timer = self.timer.as_ref()?;
        let checkpoint = self.sync.prepare(
            timer.remaining_secs(),
            timer.origin_secs(),
            CheckpointReason::Unload,
        );
        Some(self.dispatch(checkpoint))
    }

    /// Wait for in-flight checkpoints, bounded by the shutdown flush window.
    pub async fn settle(&mut self) -> usize {
        self.sync.settle(self.config.shutdown_flush).await
    }

    pub fn snapshot(&self) -> Event {
        Event::StateSnapshot {
            user_id: self.session.user_id.clone(),
            phase: self.phase,
            running: self.is_running(),
            remaining_secs: self.remaining_secs(),
            display: self
                .timer
                .as_ref()
                .map_or_else(|| "00:00".to_string(), SessionTimer::display),
            at: Utc::now(),
        }
    }

    fn start_timer(&mut self, remaining_secs: u64) -> Event {
        let mut timer = SessionTimer::with_checkpoint_interval(self.config.checkpoint_interval_secs);
        let started = timer.start(remaining_secs);
        self.timer = Some(timer);
        match started {
            Some(event) => {
                self.phase = SessionPhase::Running;
                event
            }
            None => {
                self.phase = SessionPhase::Expired;
                Event::TimerExpired { at: Utc::now() }
            }
        }
    }

    fn dispatch(&mut self, checkpoint: Checkpoint) -> Event {
        let event = Event::CheckpointIssued {
            used_minutes: checkpoint.used_minutes,
            remaining_secs: checkpoint.remaining_secs,
            reason: checkpoint.reason,
            at: checkpoint.at,
        };
        self.sync.checkpoint(checkpoint);
        event
    }

    /// Cumulative usage implied by the current countdown.
    fn used_so_far(&self) -> u32 {
        match &self.timer {
            Some(timer) => {
                self.sync
                    .prepare(timer.remaining_secs(), timer.origin_secs(), CheckpointReason::Interval)
                    .used_minutes
            }
            None => self.sync.base_used(),
        }
    }

    fn remember_total(&mut self, total_minutes: u32) {
        self.session.cached_quota_minutes = Some(total_minutes);
        self.sync.set_session(self.session.clone());
    }

    fn ensure_live(&self) -> Result<(), SessionError> {
        if self.phase == SessionPhase::Terminated {
            return Err(SessionError::Terminated);
        }
        Ok(())
    }
}
