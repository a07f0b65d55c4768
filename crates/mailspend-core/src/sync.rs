//! Sync orchestration
//!
//! One pass selects every active account whose last sync is older than the
//! sync interval and fans out across a bounded worker pool. Accounts are
//! isolated: one account's provider outage or revoked token never blocks the
//! others, and per-message failures inside an account are logged and
//! skipped. Sync counters are recorded for every attempted account so a
//! failing account is not re-selected in a tight loop.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::{ExtractionConfig, OAuthConfig};
use crate::crypto::TokenCipher;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{MailAccount, MailProvider, SyncOutcome};
use crate::parser::EmailParser;
use crate::provider::{client_for, ProviderClient};
use crate::token::TokenManager;

#[derive(Clone)]
pub struct SyncOrchestrator {
    db: Database,
    tokens: TokenManager,
    parser: Arc<EmailParser>,
    clients: HashMap<MailProvider, Arc<dyn ProviderClient>>,
    config: ExtractionConfig,
    limiter: Arc<Semaphore>,
}

impl SyncOrchestrator {
    /// Build an orchestrator with one client per provider configured in the
    /// environment. Providers without OAuth credentials are simply absent;
    /// their accounts are skipped with a warning at sync time.
    pub fn new(db: Database, cipher: TokenCipher, config: ExtractionConfig) -> Result<Self> {
        let mut clients: HashMap<MailProvider, Arc<dyn ProviderClient>> = HashMap::new();
        for provider in [MailProvider::Gmail, MailProvider::Outlook, MailProvider::Yahoo] {
            if let Some(oauth) = OAuthConfig::from_env(provider.as_str()) {
                clients.insert(provider, client_for(provider, oauth)?);
            }
        }
        Self::with_clients(db, cipher, config, clients)
    }

    pub fn with_clients(
        db: Database,
        cipher: TokenCipher,
        config: ExtractionConfig,
        clients: HashMap<MailProvider, Arc<dyn ProviderClient>>,
    ) -> Result<Self> {
        Ok(Self {
            tokens: TokenManager::new(db.clone(), cipher),
            parser: Arc::new(EmailParser::new()?),
            limiter: Arc::new(Semaphore::new(config.worker_pool_size)),
            db,
            clients,
            config,
        })
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    pub fn token_manager(&self) -> &TokenManager {
        &self.tokens
    }

    /// Client for a provider, if OAuth credentials were configured for it
    pub fn client(&self, provider: MailProvider) -> Result<Arc<dyn ProviderClient>> {
        self.clients.get(&provider).cloned().ok_or_else(|| {
            Error::Provider(format!("no oauth client configured for {}", provider))
        })
    }

    /// One scheduled pass over all accounts due for sync
    ///
    /// Returns the number of accounts synced without error.
    pub async fn run_once(&self) -> Result<usize> {
        let cutoff =
            Utc::now() - Duration::seconds(self.config.sync_interval.as_secs() as i64);
        let due = self.db.accounts_due_for_sync(cutoff)?;
        if due.is_empty() {
            return Ok(0);
        }
        info!(count = due.len(), "accounts due for sync");

        let mut set = JoinSet::new();
        for account in due {
            let Ok(client) = self.client(account.provider) else {
                warn!(
                    account_id = account.id,
                    provider = %account.provider,
                    "skipping account, provider not configured"
                );
                continue;
            };

            let this = self.clone();
            set.spawn(async move {
                let _permit = this
                    .limiter
                    .acquire()
                    .await
                    .map_err(|_| Error::Provider("sync worker pool closed".to_string()))?;
                this.process_account(&account, client.as_ref()).await
            });
        }

        let mut synced = 0;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(_)) => synced += 1,
                Ok(Err(e)) => warn!(error = %e, "account sync failed"),
                Err(e) => warn!(error = %e, "sync task panicked"),
            }
        }
        Ok(synced)
    }

    /// Sync one account immediately (manual trigger)
    pub async fn sync_account(&self, account_id: i64) -> Result<SyncOutcome> {
        let account = self
            .db
            .get_mail_account(account_id)?
            .ok_or_else(|| Error::NotFound(format!("Account {} not found", account_id)))?;
        if !account.is_active {
            return Err(Error::InvalidData(
                "account is not connected".to_string(),
            ));
        }
        let client = self.client(account.provider)?;
        self.process_account(&account, client.as_ref()).await
    }

    /// Hourly sweep: refresh every active account whose token has already
    /// expired, so steady-state accounts never sync with a stale token.
    pub async fn force_refresh_expired(&self) -> Result<usize> {
        let expired = self.db.accounts_with_expired_tokens(Utc::now())?;
        if expired.is_empty() {
            return Ok(0);
        }
        info!(count = expired.len(), "accounts with expired tokens");

        let mut refreshed = 0;
        for account in expired {
            let Ok(client) = self.client(account.provider) else {
                continue;
            };
            match self.tokens.refresh(&account, client.as_ref()).await {
                Ok(_) => refreshed += 1,
                Err(e) => warn!(account_id = account.id, error = %e, "token refresh failed"),
            }
        }
        Ok(refreshed)
    }

    async fn process_account(
        &self,
        account: &MailAccount,
        client: &dyn ProviderClient,
    ) -> Result<SyncOutcome> {
        debug!(account_id = account.id, email = %account.email_address, "syncing account");

        let token = self.tokens.access_token(account, client).await?;

        let result = self.collect_candidates(account, client, &token).await;

        // Stats are recorded whether or not collection succeeded; a failing
        // account still advances last_sync_at instead of being re-selected
        // every tick.
        let outcome = match &result {
            Ok(outcome) => *outcome,
            Err(_) => SyncOutcome::default(),
        };
        self.db.update_sync_stats(
            account.id,
            Utc::now(),
            outcome.emails_seen,
            outcome.extracted,
        )?;

        if let Ok(outcome) = &result {
            info!(
                account_id = account.id,
                emails_seen = outcome.emails_seen,
                extracted = outcome.extracted,
                "account sync complete"
            );
        }
        result
    }

    async fn collect_candidates(
        &self,
        account: &MailAccount,
        client: &dyn ProviderClient,
        token: &str,
    ) -> Result<SyncOutcome> {
        let since = account
            .sync_from_date
            .unwrap_or_else(|| Utc::now() - Duration::days(self.config.lookback_days));
        let query = client.sync_query(since);
        let message_ids = client
            .list_message_ids(token, &query, self.config.max_emails_per_run)
            .await?;

        let mut outcome = SyncOutcome::default();
        for message_id in message_ids {
            // Dedup before fetching: already-extracted mail costs one query
            if self.db.candidate_exists(account.id, &message_id)? {
                continue;
            }

            let email = match client.fetch_message(token, &message_id).await {
                Ok(email) => email,
                Err(e) => {
                    warn!(account_id = account.id, %message_id, error = %e, "message fetch failed");
                    continue;
                }
            };
            outcome.emails_seen += 1;

            if let Some(candidate) = self.parser.parse(&email) {
                if self
                    .db
                    .insert_candidate(account.id, &message_id, &candidate)?
                    .is_some()
                {
                    outcome.extracted += 1;
                }
            }
        }
        Ok(outcome)
    }
}
