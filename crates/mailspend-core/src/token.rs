//! OAuth token lifecycle
//!
//! `TokenManager` is the only place where token plaintext and the cipher
//! meet: callbacks store encrypted grants, the orchestrator asks for a
//! usable access token and gets proactive refresh for free, and terminal
//! authorization failures (revoked grants, undecryptable tokens) deactivate
//! the account so it stops being selected for sync.

use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::crypto::{mask, TokenCipher};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::MailAccount;
use crate::provider::{ProviderClient, TokenGrant};

/// Refresh when the token expires within this window
const REFRESH_SKEW_MINUTES: i64 = 5;

#[derive(Clone)]
pub struct TokenManager {
    db: Database,
    cipher: TokenCipher,
}

impl TokenManager {
    pub fn new(db: Database, cipher: TokenCipher) -> Self {
        Self { db, cipher }
    }

    /// Complete an OAuth handshake: resolve the mailbox address, encrypt the
    /// grant, and upsert the account. Returns the stored account.
    pub async fn connect_account(
        &self,
        user_id: i64,
        client: &dyn ProviderClient,
        grant: &TokenGrant,
        lookback_days: i64,
    ) -> Result<MailAccount> {
        let email_address = client.user_email(&grant.access_token).await?;

        let refresh_token = grant
            .refresh_token
            .as_deref()
            .ok_or_else(|| Error::Unauthorized("provider returned no refresh token".to_string()))?;

        let account_id = self.db.upsert_mail_account(
            user_id,
            client.provider(),
            &email_address,
            &self.cipher.encrypt(&grant.access_token)?,
            &self.cipher.encrypt(refresh_token)?,
            grant.expires_at(),
            Utc::now() - Duration::days(lookback_days),
        )?;

        info!(account_id, %email_address, provider = %client.provider(), "connected mail account");

        self.db
            .get_mail_account(account_id)?
            .ok_or_else(|| Error::NotFound(format!("Account {} not found", account_id)))
    }

    /// Decrypted access token for an account, refreshing first when the
    /// stored one is expired or about to expire
    pub async fn access_token(
        &self,
        account: &MailAccount,
        client: &dyn ProviderClient,
    ) -> Result<String> {
        if account.needs_refresh(Duration::minutes(REFRESH_SKEW_MINUTES)) {
            return self.refresh(account, client).await;
        }

        let encrypted = account
            .encrypted_access_token
            .as_deref()
            .ok_or_else(|| Error::Unauthorized("account has no access token".to_string()))?;

        match self.cipher.decrypt(encrypted) {
            Ok(token) => Ok(token),
            Err(e) => {
                self.deactivate(account.id, "undecryptable access token");
                Err(e)
            }
        }
    }

    /// Refresh the access token, rotating the refresh token when the
    /// provider issues a new one. Terminal failures deactivate the account.
    pub async fn refresh(
        &self,
        account: &MailAccount,
        client: &dyn ProviderClient,
    ) -> Result<String> {
        let Some(encrypted_refresh) = account.encrypted_refresh_token.as_deref() else {
            self.deactivate(account.id, "no refresh token");
            return Err(Error::Unauthorized("account has no refresh token".to_string()));
        };

        let refresh_token = match self.cipher.decrypt(encrypted_refresh) {
            Ok(token) => token,
            Err(e) => {
                self.deactivate(account.id, "undecryptable refresh token");
                return Err(e);
            }
        };

        let grant = match client.refresh_access_token(&refresh_token).await {
            Ok(grant) => grant,
            Err(e) if e.is_authorization() => {
                self.deactivate(account.id, "refresh rejected by provider");
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let encrypted_access = self.cipher.encrypt(&grant.access_token)?;
        match grant.refresh_token.as_deref() {
            Some(rotated) => self.db.update_tokens(
                account.id,
                &encrypted_access,
                &self.cipher.encrypt(rotated)?,
                grant.expires_at(),
            )?,
            None => {
                self.db
                    .update_access_token(account.id, &encrypted_access, grant.expires_at())?
            }
        }

        info!(
            account_id = account.id,
            token = %mask(&grant.access_token),
            "refreshed access token"
        );
        Ok(grant.access_token)
    }

    fn deactivate(&self, account_id: i64, reason: &str) {
        warn!(account_id, reason, "deactivating mail account");
        if let Err(e) = self.db.deactivate_account(account_id) {
            warn!(account_id, error = %e, "failed to deactivate account");
        }
    }
}
