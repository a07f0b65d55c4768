//! Gmail provider client
//!
//! OAuth against Google's endpoints with offline access (refresh tokens),
//! mailbox access through the Gmail REST API. Message bodies arrive as
//! base64url-encoded MIME parts which are flattened into one text blob.

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::OAuthConfig;
use crate::error::{Error, Result};
use crate::models::{MailProvider, RawEmail};
use crate::parser::BANK_DOMAINS;

use super::{response_error, url_with_params, ProviderClient, TokenGrant};

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";
const MESSAGES_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me/messages";
const SCOPES: &str =
    "https://www.googleapis.com/auth/gmail.readonly https://www.googleapis.com/auth/userinfo.email";

pub struct GmailClient {
    http: Client,
    config: OAuthConfig,
}

impl GmailClient {
    pub fn new(http: Client, config: OAuthConfig) -> Self {
        Self { http, config }
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(rename = "internalDate")]
    internal_date: Option<String>,
    payload: Option<MessagePart>,
}

#[derive(Debug, Deserialize)]
struct MessagePart {
    #[serde(default)]
    headers: Vec<Header>,
    body: Option<PartBody>,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct PartBody {
    data: Option<String>,
}

/// Flatten a MIME tree into one text blob, depth first
fn collect_body(part: &MessagePart, out: &mut String) {
    if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref()) {
        // Gmail uses unpadded base64url
        let trimmed = data.trim_end_matches('=');
        if let Ok(bytes) = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(trimmed) {
            out.push_str(&String::from_utf8_lossy(&bytes));
        }
    }
    for sub in &part.parts {
        collect_body(sub, out);
    }
}

fn header<'a>(part: &'a MessagePart, name: &str) -> Option<&'a str> {
    part.headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

#[async_trait]
impl ProviderClient for GmailClient {
    fn provider(&self) -> MailProvider {
        MailProvider::Gmail
    }

    fn authorization_url(&self, state: &str) -> String {
        url_with_params(
            AUTH_URL,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", SCOPES),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("state", state),
            ],
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant> {
        let response = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(response_error("gmail code exchange", response).await);
        }
        Ok(response.json().await?)
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenGrant> {
        let response = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(response_error("gmail token refresh", response).await);
        }
        Ok(response.json().await?)
    }

    async fn user_email(&self, access_token: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct UserInfo {
            email: String,
        }

        let response = self
            .http
            .get(USERINFO_URL)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(response_error("gmail userinfo", response).await);
        }
        let info: UserInfo = response.json().await?;
        Ok(info.email)
    }

    fn sync_query(&self, since: DateTime<Utc>) -> String {
        let senders = BANK_DOMAINS.join(" OR ");
        format!(
            "after:{} (from:({}) OR subject:(transaction OR debited OR credited OR payment))",
            since.format("%Y/%m/%d"),
            senders
        )
    }

    async fn list_message_ids(
        &self,
        access_token: &str,
        query: &str,
        max: usize,
    ) -> Result<Vec<String>> {
        let max_results = max.to_string();
        let url = url_with_params(
            MESSAGES_URL,
            &[("q", query), ("maxResults", max_results.as_str())],
        );

        let response = self.http.get(url).bearer_auth(access_token).send().await?;
        if !response.status().is_success() {
            return Err(response_error("gmail message list", response).await);
        }

        let list: ListResponse = response.json().await?;
        debug!(count = list.messages.len(), "listed gmail messages");
        Ok(list.messages.into_iter().map(|m| m.id).collect())
    }

    async fn fetch_message(&self, access_token: &str, message_id: &str) -> Result<RawEmail> {
        let url = format!("{}/{}?format=full", MESSAGES_URL, message_id);
        let response = self.http.get(url).bearer_auth(access_token).send().await?;
        if !response.status().is_success() {
            return Err(response_error("gmail message fetch", response).await);
        }

        let message: Message = response.json().await?;
        let payload = message
            .payload
            .ok_or_else(|| Error::Provider(format!("gmail message {} has no payload", message_id)))?;

        let mut body = String::new();
        collect_body(&payload, &mut body);

        // internalDate is epoch milliseconds as a string
        let received_at = message
            .internal_date
            .and_then(|d| d.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);

        Ok(RawEmail {
            message_id: message_id.to_string(),
            subject: header(&payload, "subject").unwrap_or_default().to_string(),
            sender: header(&payload, "from").unwrap_or_default().to_string(),
            body,
            received_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GmailClient {
        GmailClient::new(
            Client::new(),
            OAuthConfig {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
                redirect_uri: "https://app.example.com/cb".to_string(),
            },
        )
    }

    #[test]
    fn test_authorization_url_requests_offline_access() {
        let url = client().authorization_url("abc");
        assert!(url.starts_with(AUTH_URL));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("state=abc"));
    }

    #[test]
    fn test_sync_query_includes_date_and_senders() {
        let since = Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap();
        let query = client().sync_query(since);
        assert!(query.starts_with("after:2025/07/01"));
        assert!(query.contains("hdfcbank.com"));
        assert!(query.contains("subject:"));
    }

    #[test]
    fn test_collect_body_flattens_mime_parts() {
        let encoded = |s: &str| base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(s);
        let part: MessagePart = serde_json::from_str(&format!(
            r#"{{
                "headers": [],
                "body": {{}},
                "parts": [
                    {{"body": {{"data": "{}"}}}},
                    {{"body": {{"data": "{}"}}}}
                ]
            }}"#,
            encoded("Rs.500.00 debited "),
            encoded("from account XX1234")
        ))
        .unwrap();

        let mut body = String::new();
        collect_body(&part, &mut body);
        assert_eq!(body, "Rs.500.00 debited from account XX1234");
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let part: MessagePart = serde_json::from_str(
            r#"{"headers": [{"name": "Subject", "value": "Debit alert"}]}"#,
        )
        .unwrap();
        assert_eq!(header(&part, "subject"), Some("Debit alert"));
        assert_eq!(header(&part, "from"), None);
    }
}
