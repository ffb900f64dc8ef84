//! Quota Store: the per-user record of granted and consumed gaming minutes.
//!
//! The store is the single source of truth. Session timers are a cache in
//! front of it and only ever write consumption back.
//!
//! - [`QuotaStore`]: the async contract the reconciler talks to
//! - [`HttpQuotaStore`]: the contract over HTTP
//! - [`QuotaService`] / [`LocalQuotaStore`]: the authoritative side, backed
//!   by a SQLite [`QuotaLedger`]
//! - [`server`]: axum routes exposing a `QuotaService`

pub mod client;
pub mod ledger;
pub mod server;
pub mod service;

pub use client::HttpQuotaStore;
pub use ledger::{CheckpointRecord, QuotaLedger};
pub use service::{LocalQuotaStore, QuotaService};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QuotaError;
use crate::session::SessionContext;

/// Minutes granted to a fresh account.
pub const DEFAULT_REGISTRATION_BONUS_MINUTES: u32 = 30;

/// Stored quota for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuota {
    /// Cumulative minutes ever granted.
    pub total_minutes: u32,
    /// Minutes consumed in the current accounting window.
    pub used_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserQuota {
    pub fn new(total_minutes: u32, used_minutes: u32) -> Self {
        Self {
            total_minutes,
            used_minutes,
            updated_at: None,
        }
    }

    /// `max(0, total - used)`.
    pub fn remaining_minutes(&self) -> u32 {
        self.total_minutes.saturating_sub(self.used_minutes)
    }

    pub fn remaining_secs(&self) -> u64 {
        u64::from(self.remaining_minutes()) * 60
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_minutes() == 0
    }
}

/// `PATCH /quota` body reporting consumption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub used_minutes: i64,
    pub timestamp: DateTime<Utc>,
}

/// `PATCH /quota` body granting purchased minutes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinutesGrant {
    pub minutes_to_add: i64,
}

/// The two shapes `PATCH /quota` accepts, told apart by their fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuotaPatch {
    Usage(UsageReport),
    Grant(MinutesGrant),
}

/// Acknowledgement returned for usage reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub acknowledged: bool,
}

/// Async contract between a session and the Quota Store.
///
/// Every call is made on behalf of `session` and carries its bearer token.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Read `{ totalMinutes, usedMinutes }`.
    async fn fetch(&self, session: &SessionContext) -> Result<UserQuota, QuotaError>;

    /// Report cumulative consumption. Callers treat this as fire-and-forget.
    async fn report_usage(
        &self,
        session: &SessionContext,
        used_minutes: u32,
        at: DateTime<Utc>,
    ) -> Result<(), QuotaError>;

    /// Grant purchased minutes; returns the updated record.
    async fn add_minutes(
        &self,
        session: &SessionContext,
        minutes: u32,
    ) -> Result<UserQuota, QuotaError>;

    /// Explicit reset of `usedMinutes` to zero.
    async fn reset_usage(&self, session: &SessionContext) -> Result<UserQuota, QuotaError>;
}

/// Convert a stored integer into a minute count, clamping into range.
pub(crate) fn clamp_minutes(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn remaining_clamps_at_zero() {
        assert_eq!(UserQuota::new(60, 45).remaining_minutes(), 15);
        assert_eq!(UserQuota::new(30, 45).remaining_minutes(), 0);
        assert!(UserQuota::new(30, 30).is_exhausted());
        assert_eq!(UserQuota::new(15, 0).remaining_secs(), 900);
    }

    #[test]
    fn patch_bodies_are_told_apart() {
        let usage: QuotaPatch = serde_json::from_str(
            r#"{"usedMinutes": 12, "timestamp": "2026-01-05T10:00:00Z"}"#,
        )
        .unwrap();
        assert!(matches!(usage, QuotaPatch::Usage(UsageReport { used_minutes: 12, .. })));

        let grant: QuotaPatch = serde_json::from_str(r#"{"minutesToAdd": 60}"#).unwrap();
        assert_eq!(grant, QuotaPatch::Grant(MinutesGrant { minutes_to_add: 60 }));

        assert!(serde_json::from_str::<QuotaPatch>(r#"{"minutesToAdd": "lots"}"#).is_err());
    }

    #[test]
    fn quota_uses_camel_case_on_the_wire() {
        let json = serde_json::to_value(UserQuota::new(60, 45)).unwrap();
        assert_eq!(json, serde_json::json!({"totalMinutes": 60, "usedMinutes": 45}));
    }

    #[test]
    fn clamp_minutes_bounds() {
        assert_eq!(clamp_minutes(-5), 0);
        assert_eq!(clamp_minutes(42), 42);
        assert_eq!(clamp_minutes(i64::MAX), u32::MAX);
    }

    proptest! {
        #[test]
        fn remaining_is_difference_when_total_covers_used(used in 0u32..100_000, extra in 0u32..100_000) {
            let quota = UserQuota::new(used + extra, used);
            prop_assert_eq!(quota.remaining_minutes(), extra);
        }

        #[test]
        fn remaining_never_negative(total in 0u32..100_000, used in 0u32..200_000) {
            let quota = UserQuota::new(total, used);
            prop_assert!(quota.remaining_minutes() <= total);
            if used >= total {
                prop_assert_eq!(quota.remaining_minutes(), 0);
            }
        }
    }
}
