//! Connected mail account operations

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{format_datetime, parse_datetime, Database};
use crate::error::Result;
use crate::models::{MailAccount, MailProvider};

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<MailAccount> {
    let provider_str: String = row.get(2)?;
    let token_expires_at: Option<String> = row.get(6)?;
    let last_sync_at: Option<String> = row.get(8)?;
    let sync_from_date: Option<String> = row.get(9)?;
    let created_at: String = row.get(12)?;
    let updated_at: String = row.get(13)?;

    Ok(MailAccount {
        id: row.get(0)?,
        user_id: row.get(1)?,
        provider: provider_str.parse().unwrap_or(MailProvider::Gmail),
        email_address: row.get(3)?,
        encrypted_access_token: row.get(4)?,
        encrypted_refresh_token: row.get(5)?,
        token_expires_at: token_expires_at.map(|s| parse_datetime(&s)),
        is_active: row.get(7)?,
        last_sync_at: last_sync_at.map(|s| parse_datetime(&s)),
        sync_from_date: sync_from_date.map(|s| parse_datetime(&s)),
        total_emails_processed: row.get(10)?,
        total_transactions_extracted: row.get(11)?,
        created_at: parse_datetime(&created_at),
        updated_at: parse_datetime(&updated_at),
    })
}

const ACCOUNT_COLUMNS: &str = "id, user_id, provider, email_address, encrypted_access_token, \
     encrypted_refresh_token, token_expires_at, is_active, last_sync_at, sync_from_date, \
     total_emails_processed, total_transactions_extracted, created_at, updated_at";

impl Database {
    /// Create or update a mail account after a successful OAuth handshake
    ///
    /// An existing (user, provider, address) row is re-activated with the new
    /// tokens; otherwise a new row is created with the given sync-from date.
    #[allow(clippy::too_many_arguments)]
    pub fn upsert_mail_account(
        &self,
        user_id: i64,
        provider: MailProvider,
        email_address: &str,
        encrypted_access_token: &str,
        encrypted_refresh_token: &str,
        token_expires_at: DateTime<Utc>,
        sync_from_date: DateTime<Utc>,
    ) -> Result<i64> {
        let conn = self.conn()?;

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM mail_accounts WHERE user_id = ? AND provider = ? AND email_address = ?",
                params![user_id, provider.as_str(), email_address],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            conn.execute(
                "UPDATE mail_accounts SET encrypted_access_token = ?, encrypted_refresh_token = ?, \
                 token_expires_at = ?, is_active = 1, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
                params![
                    encrypted_access_token,
                    encrypted_refresh_token,
                    format_datetime(token_expires_at),
                    id
                ],
            )?;
            return Ok(id);
        }

        conn.execute(
            "INSERT INTO mail_accounts (user_id, provider, email_address, encrypted_access_token, \
             encrypted_refresh_token, token_expires_at, sync_from_date) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                user_id,
                provider.as_str(),
                email_address,
                encrypted_access_token,
                encrypted_refresh_token,
                format_datetime(token_expires_at),
                format_datetime(sync_from_date),
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Get a mail account by ID
    pub fn get_mail_account(&self, id: i64) -> Result<Option<MailAccount>> {
        let conn = self.conn()?;
        let account = conn
            .query_row(
                &format!("SELECT {} FROM mail_accounts WHERE id = ?", ACCOUNT_COLUMNS),
                params![id],
                account_from_row,
            )
            .optional()?;
        Ok(account)
    }

    /// List all accounts belonging to a user
    pub fn list_accounts_for_user(&self, user_id: i64) -> Result<Vec<MailAccount>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM mail_accounts WHERE user_id = ? ORDER BY created_at",
            ACCOUNT_COLUMNS
        ))?;

        let accounts = stmt
            .query_map(params![user_id], account_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(accounts)
    }

    /// Active accounts that have never synced or whose last sync is older
    /// than the cutoff
    pub fn accounts_due_for_sync(&self, cutoff: DateTime<Utc>) -> Result<Vec<MailAccount>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM mail_accounts WHERE is_active = 1 \
             AND (last_sync_at IS NULL OR last_sync_at < ?) ORDER BY id",
            ACCOUNT_COLUMNS
        ))?;

        let accounts = stmt
            .query_map(params![format_datetime(cutoff)], account_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(accounts)
    }

    /// Active accounts whose token expiry is already in the past
    pub fn accounts_with_expired_tokens(&self, now: DateTime<Utc>) -> Result<Vec<MailAccount>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM mail_accounts WHERE is_active = 1 \
             AND token_expires_at IS NOT NULL AND token_expires_at < ? ORDER BY id",
            ACCOUNT_COLUMNS
        ))?;

        let accounts = stmt
            .query_map(params![format_datetime(now)], account_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(accounts)
    }

    /// Fold one sync pass into the account's cumulative counters and advance
    /// `last_sync_at`. Runs even when individual messages failed, so the
    /// account is not perpetually re-selected.
    pub fn update_sync_stats(
        &self,
        account_id: i64,
        synced_at: DateTime<Utc>,
        emails_seen: i64,
        extracted: i64,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE mail_accounts SET last_sync_at = ?, \
             total_emails_processed = total_emails_processed + ?, \
             total_transactions_extracted = total_transactions_extracted + ?, \
             updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            params![format_datetime(synced_at), emails_seen, extracted, account_id],
        )?;
        Ok(())
    }

    /// Store a refreshed access token and its new expiry
    pub fn update_access_token(
        &self,
        account_id: i64,
        encrypted_access_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE mail_accounts SET encrypted_access_token = ?, token_expires_at = ?, \
             updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            params![encrypted_access_token, format_datetime(expires_at), account_id],
        )?;
        Ok(())
    }

    /// Store a rotated refresh token alongside the new access token
    pub fn update_tokens(
        &self,
        account_id: i64,
        encrypted_access_token: &str,
        encrypted_refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE mail_accounts SET encrypted_access_token = ?, encrypted_refresh_token = ?, \
             token_expires_at = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            params![
                encrypted_access_token,
                encrypted_refresh_token,
                format_datetime(expires_at),
                account_id
            ],
        )?;
        Ok(())
    }

    /// Deactivate an account and clear its token material
    ///
    /// Used for revoked refresh tokens, undecryptable tokens, and explicit
    /// disconnects. The row is kept (not deleted) so counters and extracted
    /// candidates survive; re-authorization re-activates it.
    pub fn deactivate_account(&self, account_id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE mail_accounts SET is_active = 0, encrypted_access_token = NULL, \
             encrypted_refresh_token = NULL, token_expires_at = NULL, \
             updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            params![account_id],
        )?;
        Ok(())
    }

    /// Count of active accounts for a user
    pub fn count_active_accounts_for_user(&self, user_id: i64) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM mail_accounts WHERE user_id = ? AND is_active = 1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
