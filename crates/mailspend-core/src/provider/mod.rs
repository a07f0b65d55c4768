//! Mail provider clients
//!
//! One client per provider behind the `ProviderClient` trait: OAuth handshake
//! (authorization URL, code exchange, refresh), identity lookup, and read-only
//! mailbox access. Callers hold `Arc<dyn ProviderClient>` obtained from
//! `client_for`, so the orchestrator and handlers never branch on the
//! provider themselves.
//!
//! Error mapping is part of the contract: 401/403 and `invalid_grant`
//! responses become `Error::Unauthorized` (terminal, deactivates the
//! account), everything else network-shaped becomes `Error::Provider`
//! (transient, retried on the next pass).

mod gmail;
mod mock;
mod outlook;
mod yahoo;

pub use gmail::GmailClient;
pub use mock::MockProviderClient;
pub use outlook::OutlookClient;
pub use yahoo::YahooClient;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::config::OAuthConfig;
use crate::error::{Error, Result};
use crate::models::{MailProvider, RawEmail};

/// Token material from a code exchange or refresh
///
/// `refresh_token` is optional: providers omit it on refresh when the
/// existing one stays valid.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

impl TokenGrant {
    /// Absolute expiry computed from `expires_in` at receipt time
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::seconds(self.expires_in)
    }
}

/// Read-only mail access plus the OAuth lifecycle for one provider
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn provider(&self) -> MailProvider;

    /// User-facing consent URL carrying the anti-forgery state
    fn authorization_url(&self, state: &str) -> String;

    /// Redeem an authorization code for tokens
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant>;

    /// Obtain a fresh access token from a refresh token
    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenGrant>;

    /// Address of the mailbox the token grants access to
    async fn user_email(&self, access_token: &str) -> Result<String>;

    /// Provider-specific search expression for financial mail since a date
    fn sync_query(&self, since: DateTime<Utc>) -> String;

    /// Message ids matching a query, newest first, capped at `max`
    async fn list_message_ids(
        &self,
        access_token: &str,
        query: &str,
        max: usize,
    ) -> Result<Vec<String>>;

    /// Full message content for one id
    async fn fetch_message(&self, access_token: &str, message_id: &str) -> Result<RawEmail>;
}

/// Build the client for a provider
///
/// All clients share the same timeout policy; a hung provider endpoint must
/// not stall a sync worker indefinitely.
pub fn client_for(
    provider: MailProvider,
    config: OAuthConfig,
) -> Result<Arc<dyn ProviderClient>> {
    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(Error::Http)?;

    Ok(match provider {
        MailProvider::Gmail => Arc::new(GmailClient::new(http, config)),
        MailProvider::Outlook => Arc::new(OutlookClient::new(http, config)),
        MailProvider::Yahoo => Arc::new(YahooClient::new(http, config)),
    })
}

/// Map a non-success response to the transient/terminal error split
pub(crate) async fn response_error(context: &str, response: reqwest::Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if status == reqwest::StatusCode::UNAUTHORIZED
        || status == reqwest::StatusCode::FORBIDDEN
        || body.contains("invalid_grant")
    {
        Error::Unauthorized(format!("{}: {} {}", context, status, body))
    } else {
        Error::Provider(format!("{}: {} {}", context, status, body))
    }
}

/// Build a URL with encoded query parameters
pub(crate) fn url_with_params(base: &str, params: &[(&str, &str)]) -> String {
    match reqwest::Url::parse_with_params(base, params) {
        Ok(url) => url.to_string(),
        // Base URLs are compile-time constants; this arm is unreachable in
        // practice but keeps the call sites infallible.
        Err(_) => base.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MailProvider;

    fn test_config() -> OAuthConfig {
        OAuthConfig {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            redirect_uri: "https://app.example.com/callback".to_string(),
        }
    }

    #[test]
    fn test_client_for_dispatches_by_provider() {
        for provider in [MailProvider::Gmail, MailProvider::Outlook, MailProvider::Yahoo] {
            let client = client_for(provider, test_config()).unwrap();
            assert_eq!(client.provider(), provider);
        }
    }

    #[test]
    fn test_authorization_url_carries_state_and_client() {
        for provider in [MailProvider::Gmail, MailProvider::Outlook, MailProvider::Yahoo] {
            let client = client_for(provider, test_config()).unwrap();
            let url = client.authorization_url("state-xyz");
            assert!(url.contains("state=state-xyz"), "{}", url);
            assert!(url.contains("client_id=client-id"), "{}", url);
            assert!(url.contains("code"), "{}", url);
        }
    }

    #[test]
    fn test_token_grant_defaults() {
        let grant: TokenGrant =
            serde_json::from_str(r#"{"access_token": "at"}"#).unwrap();
        assert_eq!(grant.access_token, "at");
        assert!(grant.refresh_token.is_none());
        assert_eq!(grant.expires_in, 3600);
        assert!(grant.expires_at() > Utc::now());
    }

    #[test]
    fn test_url_with_params_encodes() {
        let url = url_with_params(
            "https://example.com/auth",
            &[("scope", "a b"), ("state", "s")],
        );
        assert!(url.contains("scope=a%20b") || url.contains("scope=a+b"), "{}", url);
    }
}
