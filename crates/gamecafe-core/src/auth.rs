//! Signed bearer tokens for the Quota Store.
//!
//! A token is `<user_id>.<expires_at_unix>.<hex hmac-sha256>` where the MAC
//! covers `<user_id>.<expires_at_unix>`. User ids may contain dots; the two
//! trailing fields never do.

use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AuthError;

type HmacSha256 = Hmac<Sha256>;

/// Verified contents of a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
}

/// A freshly issued token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedToken {
    pub token: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies bearer tokens with a key derived from a secret.
#[derive(Clone)]
pub struct TokenAuthority {
    key: Vec<u8>,
    ttl: Duration,
}

impl std::fmt::Debug for TokenAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthority")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenAuthority {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            key: derive_signing_key(secret),
            ttl,
        }
    }

    pub fn issue(&self, user_id: &str) -> Result<IssuedToken, AuthError> {
        self.issue_at(user_id, Utc::now())
    }

    /// Issue a token valid from `now` for the configured lifetime.
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidLifetime`] if the lifetime is not positive
    /// or the expiry falls outside the representable range.
    pub fn issue_at(&self, user_id: &str, now: DateTime<Utc>) -> Result<IssuedToken, AuthError> {
        if self.ttl <= Duration::zero() {
            return Err(AuthError::InvalidLifetime);
        }
        let expires_at = now
            .checked_add_signed(self.ttl)
            .ok_or(AuthError::InvalidLifetime)?;
        let payload = format!("{user_id}.{}", expires_at.timestamp());
        let signature = self.sign(&payload);
        Ok(IssuedToken {
            token: format!("{payload}.{signature}"),
            user_id: user_id.to_string(),
            // Second precision, matching what verify() reads back.
            expires_at: Utc
                .timestamp_opt(expires_at.timestamp(), 0)
                .single()
                .unwrap_or(expires_at),
        })
    }

    pub fn verify(&self, token: &str) -> Result<TokenClaims, AuthError> {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<TokenClaims, AuthError> {
        let (payload, signature) = token.rsplit_once('.').ok_or(AuthError::Malformed)?;
        let claims = parse_payload(payload)?;

        let expected = self.sign(payload);
        if !constant_time_eq(signature.as_bytes(), expected.as_bytes()) {
            return Err(AuthError::BadSignature);
        }
        if claims.expires_at <= now {
            return Err(AuthError::Expired {
                expired_at: claims.expires_at,
            });
        }
        Ok(claims)
    }

    fn sign(&self, payload: &str) -> String {
        // HMAC accepts keys of any length, so this cannot fail.
        let mut mac = match HmacSha256::new_from_slice(&self.key) {
            Ok(mac) => mac,
            Err(_) => return String::new(),
        };
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Read the claims of a token without checking its signature. Clients use
/// this to learn the expiry of a token they were handed.
pub fn peek_claims(token: &str) -> Option<TokenClaims> {
    let (payload, _signature) = token.rsplit_once('.')?;
    parse_payload(payload).ok()
}

fn parse_payload(payload: &str) -> Result<TokenClaims, AuthError> {
    let (user_id, expiry) = payload.rsplit_once('.').ok_or(AuthError::Malformed)?;
    if user_id.is_empty() {
        return Err(AuthError::Malformed);
    }
    let expiry: i64 = expiry.parse().map_err(|_| AuthError::Malformed)?;
    let expires_at = Utc
        .timestamp_opt(expiry, 0)
        .single()
        .ok_or(AuthError::Malformed)?;
    Ok(TokenClaims {
        user_id: user_id.to_string(),
        expires_at,
    })
}

fn derive_signing_key(secret: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b"gamecafe-token-key-v1");
    hasher.finalize().to_vec()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
