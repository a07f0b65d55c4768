//! Database access layer with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `accounts` - Connected mail account operations
//! - `candidates` - Extracted transaction candidate store (dedup, state
//!   transitions, query surface)

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use crate::error::{Error, Result};

mod accounts;
mod candidates;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Environment variable for database encryption key
pub const DB_KEY_ENV: &str = "MAILSPEND_DB_KEY";

/// Derive an encryption key from a passphrase using Argon2
///
/// Uses a fixed application salt so the same passphrase always produces the same key,
/// regardless of database path. This allows moving/renaming/restoring the database freely.
fn derive_key(passphrase: &str) -> Result<String> {
    use argon2::{password_hash::SaltString, Argon2, PasswordHasher};

    // Fixed application salt - changing this would invalidate all existing encrypted databases
    const APP_SALT: &[u8; 16] = b"mailspend-db-v1s";

    let salt = SaltString::encode_b64(APP_SALT)
        .map_err(|e| Error::Encryption(format!("Failed to create salt: {}", e)))?;

    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|e| Error::Encryption(format!("Failed to derive key: {}", e)))?;

    // Extract the hash portion for use as SQLCipher key (hex encoded)
    let hash_str = hash
        .hash
        .ok_or_else(|| Error::Encryption("No hash output".to_string()))?;
    Ok(hex::encode(hash_str.as_bytes()))
}

/// Parse a SQLite datetime string into a DateTime<Utc>
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    // SQLite stores as "YYYY-MM-DD HH:MM:SS"; RFC 3339 is accepted for
    // rows written by older builds
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|dt| dt.and_utc())
        .or_else(|_| DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)))
        .unwrap_or_else(|_| Utc::now())
}

/// Format a DateTime<Utc> for storage
///
/// Uses SQLite's own datetime text format so bound timestamps compare
/// correctly against CURRENT_TIMESTAMP columns.
pub(crate) fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    /// Path to the database file
    db_path: String,
}

impl Database {
    /// Create a new database connection pool with encryption
    ///
    /// Requires `MAILSPEND_DB_KEY` environment variable to be set.
    /// The database will be encrypted using SQLCipher with a key derived
    /// from the passphrase via Argon2.
    ///
    /// Returns an error if `MAILSPEND_DB_KEY` is not set. Use `new_unencrypted()`
    /// for development/testing without encryption.
    pub fn new(path: &str) -> Result<Self> {
        let encryption_key = std::env::var(DB_KEY_ENV).ok();
        match encryption_key {
            Some(key) => Self::new_with_key(path, Some(&key)),
            None => Err(Error::Encryption(format!(
                "Database encryption required. Set {} environment variable with your passphrase, \
                or use --no-encrypt for unencrypted databases (not recommended for production).",
                DB_KEY_ENV
            ))),
        }
    }

    /// Create a new unencrypted database connection pool
    ///
    /// WARNING: This creates an unencrypted database. Only use for development
    /// or testing. For production, use `new()` with `MAILSPEND_DB_KEY` set.
    pub fn new_unencrypted(path: &str) -> Result<Self> {
        Self::new_with_key(path, None)
    }

    /// Create a new database with an explicit encryption key
    pub fn new_with_key(path: &str, passphrase: Option<&str>) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);

        let pool = if let Some(pass) = passphrase {
            let key = derive_key(pass)?;
            let key_pragma = format!("PRAGMA key = 'x\"{}\"';", key);

            // Use with_init to set the key on every new connection
            let manager = manager.with_init(move |conn| {
                conn.execute_batch(&key_pragma)?;
                Ok(())
            });

            Pool::builder().max_size(10).build(manager)?
        } else {
            Pool::builder().max_size(10).build(manager)?
        };

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create an in-memory database (for testing)
    ///
    /// Note: Uses a temporary file rather than `:memory:` because SQLCipher
    /// has issues with in-memory databases in the connection pool.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = format!("/tmp/mailspend_test_{}_{}.db", std::process::id(), id);

        // Remove any existing file
        let _ = std::fs::remove_file(&path);

        Self::new_unencrypted(&path)
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Enable foreign keys
            PRAGMA foreign_keys = ON;

            -- WAL mode: better concurrency, readers don't block writers
            PRAGMA journal_mode = WAL;
            PRAGMA cache_size = 2000;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;

            -- Connected mail accounts (one row per user/provider/address)
            CREATE TABLE IF NOT EXISTS mail_accounts (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                provider TEXT NOT NULL,                    -- gmail, outlook, yahoo
                email_address TEXT NOT NULL,
                encrypted_access_token TEXT,
                encrypted_refresh_token TEXT,
                token_expires_at DATETIME,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                last_sync_at DATETIME,
                sync_from_date DATETIME,
                total_emails_processed INTEGER NOT NULL DEFAULT 0,
                total_transactions_extracted INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(user_id, provider, email_address)
            );

            CREATE INDEX IF NOT EXISTS idx_mail_accounts_user ON mail_accounts(user_id);
            CREATE INDEX IF NOT EXISTS idx_mail_accounts_active ON mail_accounts(is_active);
            CREATE INDEX IF NOT EXISTS idx_mail_accounts_last_sync ON mail_accounts(last_sync_at);
            CREATE INDEX IF NOT EXISTS idx_mail_accounts_expiry ON mail_accounts(token_expires_at);

            -- Extracted transaction candidates
            -- (account_id, message_id) is the dedup key: re-syncing the same
            -- mailbox can never produce a second row for a message
            CREATE TABLE IF NOT EXISTS extracted_candidates (
                id INTEGER PRIMARY KEY,
                account_id INTEGER NOT NULL REFERENCES mail_accounts(id),
                message_id TEXT NOT NULL,
                sender_email TEXT NOT NULL,
                email_subject TEXT NOT NULL,
                raw_body TEXT NOT NULL,                    -- retained for audit/debugging
                amount REAL NOT NULL,
                currency TEXT NOT NULL DEFAULT 'INR',
                kind TEXT NOT NULL,
                merchant_name TEXT,
                account_last4 TEXT,
                card_last4 TEXT,
                provider_txn_id TEXT,
                reference_number TEXT,
                description TEXT NOT NULL,
                category_suggestion TEXT NOT NULL DEFAULT 'Other',
                transaction_at DATETIME NOT NULL,
                confidence REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
                state TEXT NOT NULL DEFAULT 'unprocessed', -- unprocessed, processed, failed
                processed_at DATETIME,
                ledger_transaction_id INTEGER,
                error_detail TEXT,
                extracted_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(account_id, message_id)
            );

            CREATE INDEX IF NOT EXISTS idx_candidates_account ON extracted_candidates(account_id);
            CREATE INDEX IF NOT EXISTS idx_candidates_state ON extracted_candidates(state);
            CREATE INDEX IF NOT EXISTS idx_candidates_confidence ON extracted_candidates(confidence);
            CREATE INDEX IF NOT EXISTS idx_candidates_transaction_at ON extracted_candidates(transaction_at);
            "#,
        )?;

        info!("Database schema initialized");
        Ok(())
    }
}

#[cfg(test)]
mod tests;
