//! HTTP client for a remote Quota Store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use url::Url;

use super::{Ack, MinutesGrant, QuotaStore, UsageReport, UserQuota};
use crate::error::QuotaError;
use crate::session::SessionContext;

/// [`QuotaStore`] speaking the `/quota` HTTP API.
#[derive(Debug, Clone)]
pub struct HttpQuotaStore {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpQuotaStore {
    /// Client for the store at `base_url`, giving up on requests after
    /// `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, QuotaError> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| QuotaError::invalid("base_url", e.to_string()))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str, user_id: &str) -> Result<Url, QuotaError> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| QuotaError::invalid("base_url", e.to_string()))?;
        url.query_pairs_mut().append_pair("userId", user_id);
        Ok(url)
    }

    fn bearer<'a>(&self, session: &'a SessionContext) -> Result<&'a str, QuotaError> {
        session.bearer().ok_or(QuotaError::Unauthorized)
    }
}

/// Map non-success statuses onto the store's error taxonomy.
async fn check(response: reqwest::Response, user_id: &str) -> Result<reqwest::Response, QuotaError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED => QuotaError::Unauthorized,
        StatusCode::FORBIDDEN => QuotaError::Forbidden {
            user_id: user_id.to_string(),
        },
        StatusCode::NOT_FOUND => QuotaError::NotFound {
            user_id: user_id.to_string(),
        },
        StatusCode::CONFLICT => QuotaError::Conflict {
            user_id: user_id.to_string(),
        },
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => QuotaError::InvalidInput {
            field: "body".into(),
            message: body,
        },
        other => QuotaError::Transport(format!("{other}: {body}")),
    })
}

#[async_trait]
impl QuotaStore for HttpQuotaStore {
    async fn fetch(&self, session: &SessionContext) -> Result<UserQuota, QuotaError> {
        let url = self.endpoint("quota", &session.user_id)?;
        let response = self
            .client
            .get(url)
            .bearer_auth(self.bearer(session)?)
            .send()
            .await?;
        Ok(check(response, &session.user_id).await?.json().await?)
    }

    async fn report_usage(
        &self,
        session: &SessionContext,
        used_minutes: u32,
        at: DateTime<Utc>,
    ) -> Result<(), QuotaError> {
        let url = self.endpoint("quota", &session.user_id)?;
        let body = UsageReport {
            used_minutes: i64::from(used_minutes),
            timestamp: at,
        };
        let response = self
            .client
            .patch(url)
            .bearer_auth(self.bearer(session)?)
            .json(&body)
            .send()
            .await?;
        // The acknowledgement carries nothing we act on.
        let _ack: Option<Ack> = check(response, &session.user_id).await?.json().await.ok();
        Ok(())
    }

    async fn add_minutes(
        &self,
        session: &SessionContext,
        minutes: u32,
    ) -> Result<UserQuota, QuotaError> {
        let url = self.endpoint("quota", &session.user_id)?;
        let body = MinutesGrant {
            minutes_to_add: i64::from(minutes),
        };
        let response = self
            .client
            .patch(url)
            .bearer_auth(self.bearer(session)?)
            .json(&body)
            .send()
            .await?;
        Ok(check(response, &session.user_id).await?.json().await?)
    }

    async fn reset_usage(&self, session: &SessionContext) -> Result<UserQuota, QuotaError> {
        let url = self.endpoint("quota/reset", &session.user_id)?;
        let response = self
            .client
            .post(url)
            .bearer_auth(self.bearer(session)?)
            .send()
            .await?;
        Ok(check(response, &session.user_id).await?.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn session() -> SessionContext {
        SessionContext::new("alice", "tok-123")
    }

    fn store(server: &mockito::ServerGuard) -> HttpQuotaStore {
        HttpQuotaStore::new(&server.url(), Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn base_url_gains_trailing_slash() {
        let store = HttpQuotaStore::new("http://cafe.local/api", Duration::from_secs(1)).unwrap();
        assert_eq!(
            store.endpoint("quota", "a b").unwrap().as_str(),
            "http://cafe.local/api/quota?userId=a+b"
        );
        assert!(HttpQuotaStore::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn fetch_sends_bearer_and_user() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/quota")
            .match_query(Matcher::UrlEncoded("userId".into(), "alice".into()))
            .match_header("authorization", "Bearer tok-123")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"totalMinutes": 60, "usedMinutes": 45}"#)
            .create_async()
            .await;

        let quota = store(&server).fetch(&session()).await.unwrap();
        assert_eq!(quota, UserQuota::new(60, 45));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn report_usage_patches_used_minutes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PATCH", "/quota")
            .match_query(Matcher::UrlEncoded("userId".into(), "alice".into()))
            .match_body(Matcher::PartialJson(serde_json::json!({"usedMinutes": 45})))
            .with_status(200)
            .with_body(r#"{"acknowledged": true}"#)
            .create_async()
            .await;

        store(&server)
            .report_usage(&session(), 45, Utc::now())
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn add_minutes_returns_updated_quota() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PATCH", "/quota")
            .match_query(Matcher::Any)
            .match_body(Matcher::Json(serde_json::json!({"minutesToAdd": 30})))
            .with_status(200)
            .with_body(r#"{"totalMinutes": 90, "usedMinutes": 0}"#)
            .create_async()
            .await;

        let quota = store(&server).add_minutes(&session(), 30).await.unwrap();
        assert_eq!(quota.total_minutes, 90);
    }

    #[tokio::test]
    async fn statuses_map_to_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/quota")
            .match_query(Matcher::UrlEncoded("userId".into(), "alice".into()))
            .with_status(401)
            .create_async()
            .await;
        server
            .mock("GET", "/quota")
            .match_query(Matcher::UrlEncoded("userId".into(), "ghost".into()))
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("POST", "/quota/reset")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let store = store(&server);
        assert!(matches!(store.fetch(&session()).await, Err(QuotaError::Unauthorized)));
        assert!(matches!(
            store.fetch(&SessionContext::new("ghost", "tok")).await,
            Err(QuotaError::NotFound { .. })
        ));
        let err = store.reset_usage(&session()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn missing_token_never_hits_the_network() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("GET", Matcher::Any).expect(0).create_async().await;

        let result = store(&server).fetch(&SessionContext::anonymous("alice")).await;
        assert!(matches!(result, Err(QuotaError::Unauthorized)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unreachable_store_is_transient() {
        let store = HttpQuotaStore::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = store.fetch(&session()).await.unwrap_err();
        assert!(err.is_transient());
    }
}
