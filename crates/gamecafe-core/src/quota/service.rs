//! Authoritative quota operations with token checks, shared by the HTTP
//! server and the in-process store.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::{CheckpointRecord, QuotaLedger, QuotaStore, UserQuota};
use crate::auth::TokenAuthority;
use crate::error::{DatabaseError, QuotaError};
use crate::session::SessionContext;

/// The Quota Store proper: a ledger guarded by a token authority.
pub struct QuotaService {
    ledger: Mutex<QuotaLedger>,
    authority: TokenAuthority,
}

impl QuotaService {
    pub fn new(ledger: QuotaLedger, authority: TokenAuthority) -> Self {
        Self {
            ledger: Mutex::new(ledger),
            authority,
        }
    }

    pub fn authority(&self) -> &TokenAuthority {
        &self.authority
    }

    /// Check that `bearer` is a valid token for `user_id`.
    pub fn authorize(&self, user_id: &str, bearer: Option<&str>) -> Result<(), QuotaError> {
        let token = bearer.ok_or(QuotaError::Unauthorized)?;
        let claims = self.authority.verify(token).map_err(|e| {
            debug!(user_id, error = %e, "rejected bearer token");
            QuotaError::Unauthorized
        })?;
        if claims.user_id != user_id {
            return Err(QuotaError::Forbidden {
                user_id: user_id.to_string(),
            });
        }
        Ok(())
    }

    /// Create an account record with the registration bonus.
    pub fn register(&self, user_id: &str, bonus_minutes: u32) -> Result<UserQuota, QuotaError> {
        if user_id.trim().is_empty() {
            return Err(QuotaError::invalid("userId", "must not be empty"));
        }
        let quota = self.ledger()?.create_account(user_id, bonus_minutes)?;
        info!(user_id, bonus_minutes, "registered quota account");
        Ok(quota)
    }

    pub fn fetch(&self, user_id: &str) -> Result<UserQuota, QuotaError> {
        self.ledger()?
            .get(user_id)?
            .ok_or_else(|| not_found(user_id))
    }

    /// Accept a consumption report. Usage only ever moves forward.
    pub fn report_usage(
        &self,
        user_id: &str,
        used_minutes: i64,
        reported_at: DateTime<Utc>,
    ) -> Result<(), QuotaError> {
        let used = non_negative("usedMinutes", used_minutes)?;
        if !self.ledger()?.record_usage(user_id, used, reported_at)? {
            return Err(not_found(user_id));
        }
        debug!(user_id, used_minutes = used, %reported_at, "usage recorded");
        Ok(())
    }

    pub fn add_minutes(&self, user_id: &str, minutes: i64) -> Result<UserQuota, QuotaError> {
        let minutes = non_negative("minutesToAdd", minutes)?;
        let quota = self
            .ledger()?
            .add_minutes(user_id, minutes)?
            .ok_or_else(|| not_found(user_id))?;
        info!(user_id, minutes, total = quota.total_minutes, "minutes granted");
        Ok(quota)
    }

    pub fn reset_usage(&self, user_id: &str) -> Result<UserQuota, QuotaError> {
        let quota = self
            .ledger()?
            .reset_usage(user_id)?
            .ok_or_else(|| not_found(user_id))?;
        info!(user_id, "usage reset");
        Ok(quota)
    }

    pub fn history(&self, user_id: &str, limit: usize) -> Result<Vec<CheckpointRecord>, QuotaError> {
        Ok(self.ledger()?.checkpoint_history(user_id, limit)?)
    }

    fn ledger(&self) -> Result<MutexGuard<'_, QuotaLedger>, QuotaError> {
        self.ledger
            .lock()
            .map_err(|_| QuotaError::Storage(DatabaseError::Locked))
    }
}

fn not_found(user_id: &str) -> QuotaError {
    QuotaError::NotFound {
        user_id: user_id.to_string(),
    }
}

fn non_negative(field: &str, value: i64) -> Result<u32, QuotaError> {
    if value < 0 {
        return Err(QuotaError::invalid(field, format!("must not be negative, got {value}")));
    }
    u32::try_from(value).map_err(|_| QuotaError::invalid(field, format!("{value} is out of range")))
}

/// In-process [`QuotaStore`] over a shared [`QuotaService`]. Performs the
/// same token checks the HTTP server does.
#[derive(Clone)]
pub struct LocalQuotaStore {
    service: Arc<QuotaService>,
}

impl LocalQuotaStore {
    pub fn new(service: Arc<QuotaService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<QuotaService> {
        &self.service
    }
}

#[async_trait]
impl QuotaStore for LocalQuotaStore {
    async fn fetch(&self, session: &SessionContext) -> Result<UserQuota, QuotaError> {
        self.service.authorize(&session.user_id, session.bearer())?;
        self.service.fetch(&session.user_id)
    }

    async fn report_usage(
        &self,
        session: &SessionContext,
        used_minutes: u32,
        at: DateTime<Utc>,
    ) -> Result<(), QuotaError> {
        self.service.authorize(&session.user_id, session.bearer())?;
        self.service
            .report_usage(&session.user_id, i64::from(used_minutes), at)
    }

    async fn add_minutes(
        &self,
        session: &SessionContext,
        minutes: u32,
    ) -> Result<UserQuota, QuotaError> {
        self.service.authorize(&session.user_id, session.bearer())?;
        self.service.add_minutes(&session.user_id, i64::from(minutes))
    }

    async fn reset_usage(&self, session: &SessionContext) -> Result<UserQuota, QuotaError> {
        self.service.authorize(&session.user_id, session.bearer())?;
        self.service.reset_usage(&session.user_id)
    }
}
