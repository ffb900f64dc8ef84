//! Session lifecycle scenarios against an in-process Quota Store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gamecafe_core::{
    CheckpointReason, CoreError, Event, LocalQuotaStore, QuotaError, QuotaLedger, QuotaReconciler,
    QuotaService, QuotaStore, ReconcilerConfig, SessionContext, SessionError, SessionPhase,
    TokenAuthority, UserQuota,
};

// ============================================================================
// Test Helpers
// ============================================================================

fn config() -> ReconcilerConfig {
    ReconcilerConfig {
        purchase_settle: Duration::ZERO,
        shutdown_flush: Duration::from_secs(2),
        ..ReconcilerConfig::default()
    }
}

fn service() -> Arc<QuotaService> {
    Arc::new(QuotaService::new(
        QuotaLedger::open_memory().unwrap(),
        TokenAuthority::new("integration-secret", chrono::Duration::hours(1)),
    ))
}

fn reconciler_for(service: &Arc<QuotaService>, user: &str) -> QuotaReconciler {
    let token = service.authority().issue(user).unwrap().token;
    QuotaReconciler::new(
        Arc::new(LocalQuotaStore::new(service.clone())),
        SessionContext::new(user, token),
        config(),
    )
}

fn tick_n(reconciler: &mut QuotaReconciler, n: usize) -> Vec<Event> {
    (0..n).filter_map(|_| reconciler.tick()).collect()
}

/// Store whose every call fails like an unreachable server.
struct UnreachableStore;

#[async_trait]
impl QuotaStore for UnreachableStore {
    async fn fetch(&self, _: &SessionContext) -> Result<UserQuota, QuotaError> {
        Err(QuotaError::Transport("connection refused".into()))
    }

    async fn report_usage(&self, _: &SessionContext, _: u32, _: DateTime<Utc>) -> Result<(), QuotaError> {
        Err(QuotaError::Transport("connection refused".into()))
    }

    async fn add_minutes(&self, _: &SessionContext, _: u32) -> Result<UserQuota, QuotaError> {
        Err(QuotaError::Transport("connection refused".into()))
    }

    async fn reset_usage(&self, _: &SessionContext) -> Result<UserQuota, QuotaError> {
        Err(QuotaError::Transport("connection refused".into()))
    }
}

/// Store that answers every read with a 400-style rejection.
struct RejectingStore;

#[async_trait]
impl QuotaStore for RejectingStore {
    async fn fetch(&self, _: &SessionContext) -> Result<UserQuota, QuotaError> {
        Err(QuotaError::InvalidInput {
            field: "userId".into(),
            message: "must not be empty".into(),
        })
    }

    async fn report_usage(&self, _: &SessionContext, _: u32, _: DateTime<Utc>) -> Result<(), QuotaError> {
        Ok(())
    }

    async fn add_minutes(&self, _: &SessionContext, _: u32) -> Result<UserQuota, QuotaError> {
        Err(QuotaError::Conflict { user_id: "alice".into() })
    }

    async fn reset_usage(&self, _: &SessionContext) -> Result<UserQuota, QuotaError> {
        Err(QuotaError::Conflict { user_id: "alice".into() })
    }
}

// ============================================================================
// Login
// ============================================================================

#[tokio::test]
async fn registration_bonus_runs_to_expiry() {
    let svc = service();
    svc.register("alice", 30).unwrap();
    let mut rec = reconciler_for(&svc, "alice");

    let started = rec.login().await.unwrap();
    assert!(matches!(started, Event::TimerStarted { remaining_secs: 1800, .. }));

    let events = tick_n(&mut rec, 1800);
    assert!(matches!(events.last(), Some(Event::TimerExpired { .. })));
    assert_eq!(rec.phase(), SessionPhase::Expired);
    assert_eq!(rec.remaining_secs(), 0);
    assert!(rec.tick().is_none());

    rec.settle().await;
    let quota = svc.fetch("alice").unwrap();
    assert_eq!(quota.used_minutes, 30);
    assert!(quota.is_exhausted());

    let history = svc.history("alice", 500).unwrap();
    assert_eq!(history.iter().map(|r| r.used_minutes).max(), Some(30));
}

#[tokio::test]
async fn partial_quota_checkpoints_base_usage() {
    let svc = service();
    svc.register("alice", 60).unwrap();
    svc.report_usage("alice", 45, Utc::now()).unwrap();
    let mut rec = reconciler_for(&svc, "alice");

    rec.login().await.unwrap();
    assert_eq!(rec.remaining_secs(), 900);

    let events = tick_n(&mut rec, 10);
    assert!(matches!(
        events.as_slice(),
        [Event::CheckpointIssued { used_minutes: 45, remaining_secs: 890, reason: CheckpointReason::Interval, .. }]
    ));

    rec.settle().await;
    let history = svc.history("alice", 1).unwrap();
    assert_eq!(history[0].used_minutes, 45);
    assert_eq!(rec.sync_status().delivered, 1);
}

#[tokio::test]
async fn repeated_login_is_idempotent() {
    let svc = service();
    svc.register("alice", 60).unwrap();
    svc.report_usage("alice", 15, Utc::now()).unwrap();
    let mut rec = reconciler_for(&svc, "alice");

    let first = rec.login().await.unwrap();
    let second = rec.login().await.unwrap();
    match (first, second) {
        (
            Event::TimerStarted { remaining_secs: a, .. },
            Event::TimerStarted { remaining_secs: b, .. },
        ) => {
            assert_eq!(a, 2700);
            assert_eq!(a, b);
        }
        other => panic!("expected two starts, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_record_means_zero_quota() {
    let svc = service();
    let mut rec = reconciler_for(&svc, "ghost");

    let event = rec.login().await.unwrap();
    assert!(matches!(event, Event::TimerExpired { .. }));
    assert_eq!(rec.phase(), SessionPhase::Expired);
    assert!(!rec.is_running());
}

#[tokio::test]
async fn foreign_token_is_refused() {
    let svc = service();
    svc.register("alice", 30).unwrap();
    let forged = TokenAuthority::new("someone-else", chrono::Duration::hours(1))
        .issue("alice")
        .unwrap()
        .token;
    let mut rec = QuotaReconciler::new(
        Arc::new(LocalQuotaStore::new(svc.clone())),
        SessionContext::new("alice", forged),
        config(),
    );

    let err = rec.login().await.unwrap_err();
    assert!(matches!(err, CoreError::Session(SessionError::NotAuthenticated)));
    assert!(rec.timer().is_none());
}

#[tokio::test]
async fn expired_token_is_refused_before_any_read() {
    let authority = TokenAuthority::new("s", chrono::Duration::hours(1));
    let stale = authority
        .issue_at("alice", Utc::now() - chrono::Duration::hours(3))
        .unwrap()
        .token;
    let mut rec = QuotaReconciler::new(
        Arc::new(UnreachableStore),
        SessionContext::new("alice", stale).with_cached_quota(60),
        config(),
    );

    let err = rec.login().await.unwrap_err();
    assert_eq!(err.to_string(), "please log in again");
    assert_eq!(rec.phase(), SessionPhase::Uninitialized);
}

#[tokio::test]
async fn unreachable_store_falls_back_to_cached_quota() {
    let mut rec = QuotaReconciler::new(
        Arc::new(UnreachableStore),
        SessionContext::new("alice", "opaque-token").with_cached_quota(45),
        config(),
    );

    let event = rec.login().await.unwrap();
    assert!(matches!(event, Event::TimerStarted { remaining_secs: 2700, .. }));

    // Checkpoint failures never surface.
    let events = tick_n(&mut rec, 20);
    assert_eq!(events.len(), 2);
    rec.settle().await;
    assert_eq!(rec.sync_status().failed, 2);
    assert!(rec.is_running());
}

#[tokio::test]
async fn rejected_read_does_not_fall_back_to_cache() {
    let mut rec = QuotaReconciler::new(
        Arc::new(RejectingStore),
        SessionContext::new("alice", "opaque-token").with_cached_quota(45),
        config(),
    );

    let err = rec.login().await.unwrap_err();
    assert!(matches!(err, CoreError::Quota(QuotaError::InvalidInput { .. })));
    assert!(rec.timer().is_none());
    assert_eq!(rec.phase(), SessionPhase::Uninitialized);
}

#[tokio::test]
async fn unreachable_store_without_cache_starts_expired() {
    let mut rec = QuotaReconciler::new(
        Arc::new(UnreachableStore),
        SessionContext::new("alice", "opaque-token"),
        config(),
    );
    rec.login().await.unwrap();
    assert_eq!(rec.phase(), SessionPhase::Expired);
}

// ============================================================================
// Purchases
// ============================================================================

#[tokio::test]
async fn purchase_extends_running_timer() {
    let svc = service();
    svc.register("alice", 5).unwrap();
    let mut rec = reconciler_for(&svc, "alice");
    rec.login().await.unwrap();
    assert_eq!(rec.remaining_secs(), 300);

    for _ in 0..60 {
        rec.tick();
        assert!(rec.is_running());
    }

    svc.add_minutes("alice", 10).unwrap();
    let event = rec.purchase_completed(10).await.unwrap();
    assert!(matches!(
        event,
        Event::TimeAdded { added_secs: 600, remaining_secs: 840, resumed: false, .. }
    ));
    assert!(rec.is_running());
    assert_eq!(rec.phase(), SessionPhase::Running);

    // The added time does not count as consumed.
    let events = tick_n(&mut rec, 60);
    let used: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            Event::CheckpointIssued { used_minutes, .. } => Some(*used_minutes),
            _ => None,
        })
        .collect();
    assert_eq!(used.last(), Some(&2));
}

#[tokio::test]
async fn purchase_after_expiry_restarts_from_store() {
    let svc = service();
    svc.register("alice", 30).unwrap();
    svc.report_usage("alice", 30, Utc::now()).unwrap();
    let mut rec = reconciler_for(&svc, "alice");
    rec.login().await.unwrap();
    assert_eq!(rec.phase(), SessionPhase::Expired);

    svc.add_minutes("alice", 30).unwrap();
    let event = rec.purchase_completed(30).await.unwrap();
    assert!(matches!(event, Event::TimerStarted { remaining_secs: 1800, .. }));
    assert_eq!(rec.phase(), SessionPhase::Running);

    tick_n(&mut rec, 120);
    rec.settle().await;
    assert_eq!(svc.fetch("alice").unwrap().used_minutes, 32);
}

#[tokio::test]
async fn purchase_not_yet_visible_uses_purchased_amount() {
    let svc = service();
    svc.register("alice", 1).unwrap();
    let mut rec = reconciler_for(&svc, "alice");
    rec.login().await.unwrap();
    tick_n(&mut rec, 60);
    assert_eq!(rec.phase(), SessionPhase::Expired);
    rec.settle().await;

    // Grant has not reached the store yet.
    let event = rec.purchase_completed(15).await.unwrap();
    assert!(matches!(event, Event::TimerStarted { remaining_secs: 900, .. }));
    assert!(rec.is_running());
}

// ============================================================================
// Toggle, logout, concurrent sessions
// ============================================================================

#[tokio::test]
async fn toggle_without_time_is_an_error() {
    let svc = service();
    svc.register("alice", 0).unwrap();
    let mut rec = reconciler_for(&svc, "alice");
    rec.login().await.unwrap();

    let err = rec.toggle().unwrap_err();
    assert!(matches!(err, CoreError::Session(SessionError::NoTimeRemaining)));
}

#[tokio::test]
async fn logout_writes_final_usage() {
    let svc = service();
    svc.register("alice", 10).unwrap();
    let mut rec = reconciler_for(&svc, "alice");
    rec.login().await.unwrap();
    tick_n(&mut rec, 130);

    let event = rec.logout().await.unwrap();
    assert!(matches!(event, Event::SessionTerminated { remaining_secs: 470, .. }));
    assert_eq!(rec.phase(), SessionPhase::Terminated);
    assert!(rec.timer().is_none());
    assert_eq!(svc.fetch("alice").unwrap().used_minutes, 2);

    assert!(matches!(
        rec.logout().await,
        Err(CoreError::Session(SessionError::Terminated))
    ));
}

#[tokio::test]
async fn stale_session_cannot_roll_usage_back() {
    let svc = service();
    svc.register("alice", 60).unwrap();
    let mut first = reconciler_for(&svc, "alice");
    let mut second = reconciler_for(&svc, "alice");
    first.login().await.unwrap();
    second.login().await.unwrap();

    tick_n(&mut first, 300);
    first.settle().await;
    tick_n(&mut second, 120);
    second.settle().await;

    assert_eq!(svc.fetch("alice").unwrap().used_minutes, 5);
}
