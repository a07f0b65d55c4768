//! Mock provider client for testing
//!
//! Scripted responses, no network. Builder methods configure the grants and
//! mailbox contents; counters record how often the token endpoints were hit.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::models::{MailProvider, RawEmail};

use super::{ProviderClient, TokenGrant};

#[derive(Clone)]
pub struct MockProviderClient {
    provider: MailProvider,
    user_email: String,
    grant: TokenGrant,
    refresh_grant: Option<TokenGrant>,
    fail_refresh: bool,
    fail_exchange: bool,
    emails: Arc<Mutex<Vec<RawEmail>>>,
    refresh_calls: Arc<AtomicUsize>,
    fetch_calls: Arc<AtomicUsize>,
}

impl Default for MockProviderClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProviderClient {
    pub fn new() -> Self {
        Self {
            provider: MailProvider::Gmail,
            user_email: "mock@example.com".to_string(),
            grant: TokenGrant {
                access_token: "mock-access".to_string(),
                refresh_token: Some("mock-refresh".to_string()),
                expires_in: 3600,
            },
            refresh_grant: None,
            fail_refresh: false,
            fail_exchange: false,
            emails: Arc::new(Mutex::new(Vec::new())),
            refresh_calls: Arc::new(AtomicUsize::new(0)),
            fetch_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_provider(mut self, provider: MailProvider) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_user_email(mut self, email: &str) -> Self {
        self.user_email = email.to_string();
        self
    }

    pub fn with_grant(mut self, grant: TokenGrant) -> Self {
        self.grant = grant;
        self
    }

    pub fn with_refresh_grant(mut self, grant: TokenGrant) -> Self {
        self.refresh_grant = Some(grant);
        self
    }

    pub fn with_emails(self, emails: Vec<RawEmail>) -> Self {
        *self.emails.lock().unwrap() = emails;
        self
    }

    pub fn failing_refresh(mut self) -> Self {
        self.fail_refresh = true;
        self
    }

    pub fn failing_exchange(mut self) -> Self {
        self.fail_exchange = true;
        self
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderClient for MockProviderClient {
    fn provider(&self) -> MailProvider {
        self.provider
    }

    fn authorization_url(&self, state: &str) -> String {
        format!("mock://auth?state={}", state)
    }

    async fn exchange_code(&self, _code: &str) -> Result<TokenGrant> {
        if self.fail_exchange {
            return Err(Error::Unauthorized("mock exchange rejected".to_string()));
        }
        Ok(self.grant.clone())
    }

    async fn refresh_access_token(&self, _refresh_token: &str) -> Result<TokenGrant> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh {
            return Err(Error::Unauthorized("mock refresh rejected".to_string()));
        }
        Ok(self
            .refresh_grant
            .clone()
            .unwrap_or_else(|| self.grant.clone()))
    }

    async fn user_email(&self, _access_token: &str) -> Result<String> {
        Ok(self.user_email.clone())
    }

    fn sync_query(&self, since: DateTime<Utc>) -> String {
        format!("mock after:{}", since.format("%Y/%m/%d"))
    }

    async fn list_message_ids(
        &self,
        _access_token: &str,
        _query: &str,
        max: usize,
    ) -> Result<Vec<String>> {
        Ok(self
            .emails
            .lock()
            .unwrap()
            .iter()
            .take(max)
            .map(|e| e.message_id.clone())
            .collect())
    }

    async fn fetch_message(&self, _access_token: &str, message_id: &str) -> Result<RawEmail> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.emails
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.message_id == message_id)
            .cloned()
            .ok_or_else(|| Error::Provider(format!("mock message not found: {}", message_id)))
    }
}
