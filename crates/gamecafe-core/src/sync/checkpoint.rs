//! Fire-and-forget usage writes to the Quota Store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::types::{elapsed_minutes, Checkpoint, CheckpointReason, SyncStatus};
use crate::quota::QuotaStore;
use crate::session::SessionContext;

/// Pushes consumed time to the store without blocking the tick loop.
///
/// Writes are at-most-once: a failed write is logged and dropped, the next
/// checkpoint carries the cumulative figure anyway.
pub struct CheckpointSync {
    store: Arc<dyn QuotaStore>,
    session: SessionContext,
    /// Store's `usedMinutes` at the last reconciliation.
    base_used_minutes: u32,
    in_flight: JoinSet<()>,
    status: Arc<Mutex<SyncStatus>>,
}

impl CheckpointSync {
    pub fn new(store: Arc<dyn QuotaStore>, session: SessionContext) -> Self {
        Self {
            store,
            session,
            base_used_minutes: 0,
            in_flight: JoinSet::new(),
            status: Arc::new(Mutex::new(SyncStatus::default())),
        }
    }

    pub fn set_base_used(&mut self, used_minutes: u32) {
        self.base_used_minutes = used_minutes;
    }

    pub fn base_used(&self) -> u32 {
        self.base_used_minutes
    }

    pub fn set_session(&mut self, session: SessionContext) {
        self.session = session;
    }

    /// Build the report for a timer at `remaining_secs` that started this
    /// accounting stretch at `origin_secs`.
    pub fn prepare(&self, remaining_secs: u64, origin_secs: u64, reason: CheckpointReason) -> Checkpoint {
        let elapsed = elapsed_minutes(origin_secs, remaining_secs);
        Checkpoint {
            user_id: self.session.user_id.clone(),
            used_minutes: self.base_used_minutes.saturating_add(elapsed),
            remaining_secs,
            reason,
            at: Utc::now(),
        }
    }

    /// Spawn the write for `checkpoint` and return immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn checkpoint(&mut self, checkpoint: Checkpoint) {
        // Reap whatever already finished so the set does not grow unbounded.
        while self.in_flight.try_join_next().is_some() {}

        let store = Arc::clone(&self.store);
        let session = self.session.clone();
        let status = Arc::clone(&self.status);
        bump(&status, |s| s.dispatched += 1);
        self.in_flight.spawn(async move {
            push(store.as_ref(), &session, &checkpoint, &status).await;
        });
    }

    /// Write `checkpoint` and wait for the outcome. Failures are still only
    /// logged; the return value says whether the store acknowledged.
    pub async fn deliver(&self, checkpoint: &Checkpoint) -> bool {
        bump(&self.status, |s| s.dispatched += 1);
        push(self.store.as_ref(), &self.session, checkpoint, &self.status).await
    }

    /// Number of writes not yet reaped.
    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }

    /// Wait up to `timeout` for in-flight writes. Anything still running at
    /// the deadline is detached. Returns how many writes completed.
    pub async fn settle(&mut self, timeout: Duration) -> usize {
        let pending = self.in_flight.len();
        if pending == 0 {
            return 0;
        }

        let in_flight = &mut self.in_flight;
        let drained = tokio::time::timeout(timeout, async {
            while in_flight.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            let left = self.in_flight.len();
            warn!(left, ?timeout, "checkpoint writes still in flight, detaching");
            self.in_flight.detach_all();
            return pending - left;
        }
        pending
    }

    pub fn status(&self) -> SyncStatus {
        self.status
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

async fn push(
    store: &dyn QuotaStore,
    session: &SessionContext,
    checkpoint: &Checkpoint,
    status: &Mutex<SyncStatus>,
) -> bool {
    match store
        .report_usage(session, checkpoint.used_minutes, checkpoint.at)
        .await
    {
        Ok(()) => {
            debug!(
                user_id = %checkpoint.user_id,
                used_minutes = checkpoint.used_minutes,
                reason = %checkpoint.reason,
                "checkpoint delivered"
            );
            bump(status, |s| {
                s.delivered += 1;
                s.last_delivered_at = Some(checkpoint.at);
                s.last_used_minutes = Some(checkpoint.used_minutes);
            });
            true
        }
        Err(e) => {
            warn!(
                user_id = %checkpoint.user_id,
                used_minutes = checkpoint.used_minutes,
                reason = %checkpoint.reason,
                error = %e,
                "checkpoint failed"
            );
            bump(status, |s| s.failed += 1);
            false
        }
    }
}

fn bump(status: &Mutex<SyncStatus>, update: impl FnOnce(&mut SyncStatus)) {
    if let Ok(mut s) = status.lock() {
        update(&mut s);
    }
}
