//! Outlook provider client
//!
//! OAuth against the Microsoft identity platform (common tenant), mailbox
//! access through Microsoft Graph. Graph returns bodies as HTML or text
//! with the content type attached; HTML is passed through as-is since the
//! parser strips markup anyway.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::OAuthConfig;
use crate::error::Result;
use crate::models::{MailProvider, RawEmail};

use super::{response_error, url_with_params, ProviderClient, TokenGrant};

const AUTH_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/authorize";
const TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";
const GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";
const SCOPES: &str =
    "https://graph.microsoft.com/Mail.Read https://graph.microsoft.com/User.Read offline_access";

pub struct OutlookClient {
    http: Client,
    config: OAuthConfig,
}

impl OutlookClient {
    pub fn new(http: Client, config: OAuthConfig) -> Self {
        Self { http, config }
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    value: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Message {
    subject: Option<String>,
    from: Option<Recipient>,
    received_date_time: Option<String>,
    body: Option<Body>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Recipient {
    email_address: Option<EmailAddress>,
}

#[derive(Debug, Deserialize)]
struct EmailAddress {
    address: String,
}

#[derive(Debug, Deserialize)]
struct Body {
    content: String,
}

#[async_trait]
impl ProviderClient for OutlookClient {
    fn provider(&self) -> MailProvider {
        MailProvider::Outlook
    }

    fn authorization_url(&self, state: &str) -> String {
        url_with_params(
            AUTH_URL,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("scope", SCOPES),
                ("response_mode", "query"),
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
            return Err(response_error("outlook code exchange", response).await);
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
            return Err(response_error("outlook token refresh", response).await);
        }
        Ok(response.json().await?)
    }

    async fn user_email(&self, access_token: &str) -> Result<String> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Me {
            mail: Option<String>,
            user_principal_name: Option<String>,
        }

        let response = self
            .http
            .get(format!("{}/me", GRAPH_BASE))
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(response_error("outlook userinfo", response).await);
        }

        let me: Me = response.json().await?;
        // Personal accounts often have no `mail` field
        Ok(me
            .mail
            .filter(|m| !m.is_empty())
            .or(me.user_principal_name)
            .unwrap_or_default())
    }

    fn sync_query(&self, since: DateTime<Utc>) -> String {
        // Graph has no sender-domain disjunction cheap enough to inline, so
        // the subject keywords carry the financial gate; the parser rejects
        // whatever still slips through.
        format!(
            "receivedDateTime ge {} and (contains(subject,'transaction') \
             or contains(subject,'debited') or contains(subject,'credited') \
             or contains(subject,'payment'))",
            since.format("%Y-%m-%dT%H:%M:%SZ")
        )
    }

    async fn list_message_ids(
        &self,
        access_token: &str,
        query: &str,
        max: usize,
    ) -> Result<Vec<String>> {
        let top = max.to_string();
        let url = url_with_params(
            &format!("{}/me/messages", GRAPH_BASE),
            &[
                ("$top", top.as_str()),
                ("$select", "id"),
                ("$orderby", "receivedDateTime desc"),
                ("$filter", query),
            ],
        );

        let response = self.http.get(url).bearer_auth(access_token).send().await?;
        if !response.status().is_success() {
            return Err(response_error("outlook message list", response).await);
        }

        let list: ListResponse = response.json().await?;
        debug!(count = list.value.len(), "listed outlook messages");
        Ok(list.value.into_iter().map(|m| m.id).collect())
    }

    async fn fetch_message(&self, access_token: &str, message_id: &str) -> Result<RawEmail> {
        let url = url_with_params(
            &format!("{}/me/messages/{}", GRAPH_BASE, message_id),
            &[("$select", "subject,from,receivedDateTime,body")],
        );

        let response = self.http.get(url).bearer_auth(access_token).send().await?;
        if !response.status().is_success() {
            return Err(response_error("outlook message fetch", response).await);
        }

        let message: Message = response.json().await?;
        let received_at = message
            .received_date_time
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Ok(RawEmail {
            message_id: message_id.to_string(),
            subject: message.subject.unwrap_or_default(),
            sender: message
                .from
                .and_then(|f| f.email_address)
                .map(|a| a.address)
                .unwrap_or_default(),
            body: message.body.map(|b| b.content).unwrap_or_default(),
            received_at,
        })
    }
}
