//! Yahoo provider client
//!
//! OAuth against Yahoo's identity endpoints, mailbox access through the
//! Yahoo Mail JSON API. The query shape mirrors the Gmail client's keyword
//! search.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::OAuthConfig;
use crate::error::Result;
use crate::models::{MailProvider, RawEmail};
use crate::parser::BANK_DOMAINS;

use super::{response_error, url_with_params, ProviderClient, TokenGrant};

const AUTH_URL: &str = "https://api.login.yahoo.com/oauth2/request_auth";
const TOKEN_URL: &str = "https://api.login.yahoo.com/oauth2/get_token";
const USERINFO_URL: &str = "https://api.login.yahoo.com/openid/v1/userinfo";
const MAIL_BASE: &str = "https://mail.yahooapis.com/ws/v3/mailboxes/@.id==primary";

pub struct YahooClient {
    http: Client,
    config: OAuthConfig,
}

impl YahooClient {
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
#[serde(rename_all = "camelCase")]
struct Message {
    subject: Option<String>,
    from: Option<Address>,
    received_date: Option<i64>,
    body: Option<Body>,
}

#[derive(Debug, Deserialize)]
struct Address {
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Body {
    content: String,
}

#[async_trait]
impl ProviderClient for YahooClient {
    fn provider(&self) -> MailProvider {
        MailProvider::Yahoo
    }

    fn authorization_url(&self, state: &str) -> String {
        url_with_params(
            AUTH_URL,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", "mail-r openid"),
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
            return Err(response_error("yahoo code exchange", response).await);
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
            return Err(response_error("yahoo token refresh", response).await);
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
            return Err(response_error("yahoo userinfo", response).await);
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
        let count = max.to_string();
        let url = url_with_params(
            &format!("{}/messages", MAIL_BASE),
            &[("q", query), ("count", count.as_str())],
        );

        let response = self.http.get(url).bearer_auth(access_token).send().await?;
        if !response.status().is_success() {
            return Err(response_error("yahoo message list", response).await);
        }

        let list: ListResponse = response.json().await?;
        debug!(count = list.messages.len(), "listed yahoo messages");
        Ok(list.messages.into_iter().map(|m| m.id).collect())
    }

    async fn fetch_message(&self, access_token: &str, message_id: &str) -> Result<RawEmail> {
        let url = format!("{}/messages/{}", MAIL_BASE, message_id);
        let response = self.http.get(url).bearer_auth(access_token).send().await?;
        if !response.status().is_success() {
            return Err(response_error("yahoo message fetch", response).await);
        }

        let message: Message = response.json().await?;
        let received_at = message
            .received_date
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(Utc::now);

        Ok(RawEmail {
            message_id: message_id.to_string(),
            subject: message.subject.unwrap_or_default(),
            sender: message.from.and_then(|a| a.email).unwrap_or_default(),
            body: message.body.map(|b| b.content).unwrap_or_default(),
            received_at,
        })
    }
}
