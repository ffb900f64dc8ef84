//! Explicit session context handed to the reconciler and the stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::peek_claims;
use crate::error::CoreError;
use crate::storage::Database;

const SESSION_KEY: &str = "session";

/// Who is playing, with what credentials, and the last quota seen for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub user_id: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Total minutes from the last successful read; the fallback total when
    /// the store cannot be reached.
    #[serde(default)]
    pub cached_quota_minutes: Option<u32>,
}

impl SessionContext {
    /// Session for `user_id` holding `token`. The expiry is read from the token.
    pub fn new(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        let token = token.into();
        let expires_at = peek_claims(&token).map(|claims| claims.expires_at);
        Self {
            user_id: user_id.into(),
            token: Some(token),
            expires_at,
            cached_quota_minutes: None,
        }
    }

    /// Session with no credentials.
    pub fn anonymous(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token: None,
            expires_at: None,
            cached_quota_minutes: None,
        }
    }

    pub fn with_cached_quota(mut self, minutes: u32) -> Self {
        self.cached_quota_minutes = Some(minutes);
        self
    }

    pub fn bearer(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated_at(Utc::now())
    }

    /// A non-empty token that has not passed its known expiry.
    pub fn is_authenticated_at(&self, now: DateTime<Utc>) -> bool {
        self.bearer().is_some() && self.expires_at.map_or(true, |expiry| expiry > now)
    }

    /// Load the saved session, if any.
    pub fn load(db: &Database) -> Result<Option<Self>, CoreError> {
        match db.kv_get(SESSION_KEY)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn save(&self, db: &Database) -> Result<(), CoreError> {
        let json = serde_json::to_string(self)?;
        db.kv_set(SESSION_KEY, &json)?;
        Ok(())
    }

    /// Forget the saved session. Returns whether one existed.
    pub fn clear(db: &Database) -> Result<bool, CoreError> {
        Ok(db.kv_delete(SESSION_KEY)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenAuthority;
    use chrono::Duration;

    #[test]
    fn expiry_comes_from_the_token() {
        let issued = TokenAuthority::new("s", Duration::hours(1)).issue("alice").unwrap();
        let session = SessionContext::new("alice", issued.token);
        assert_eq!(session.expires_at, Some(issued.expires_at));
        assert!(session.is_authenticated());
        assert!(!session.is_authenticated_at(issued.expires_at + Duration::seconds(1)));
    }

    #[test]
    fn missing_or_empty_token_is_unauthenticated() {
        assert!(!SessionContext::anonymous("alice").is_authenticated());
        assert!(!SessionContext::new("alice", "").is_authenticated());
    }

    #[test]
    fn opaque_tokens_have_no_known_expiry() {
        let session = SessionContext::new("alice", "opaque");
        assert_eq!(session.expires_at, None);
        assert!(session.is_authenticated());
    }

    #[test]
    fn save_load_clear() {
        let db = Database::open_memory().unwrap();
        assert!(SessionContext::load(&db).unwrap().is_none());

        let session = SessionContext::new("alice", "opaque").with_cached_quota(90);
        session.save(&db).unwrap();
        assert_eq!(SessionContext::load(&db).unwrap(), Some(session));

        assert!(SessionContext::clear(&db).unwrap());
        assert!(SessionContext::load(&db).unwrap().is_none());
    }
}
